pub mod beast_analysis;
