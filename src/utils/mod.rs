pub mod command;
pub mod dag;
pub mod fastx;
pub mod file;
pub mod plotting;
pub mod report;
pub mod scheduler;
pub mod stats;
pub mod streams;
pub mod system;
pub mod taxa;
pub mod template;
pub mod trace;
pub mod tree;
