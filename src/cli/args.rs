use std::path::PathBuf;

use clap::Parser;

use crate::config::defs::{MemorySize, TimeLimit, ToolCommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "beast-pipelines", version, about = "BEAST time-tree inference pipeline with HTML reporting")]
pub struct Arguments {

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'i', long = "input", help = "Sequence alignment (FASTA, optionally gzipped). Names must end in |YYYY-MM-DD, _YYYY-MM-DD, |YYYY or _YYYY.")]
    pub input: Option<PathBuf>,

    #[arg(short = 't', long = "template", help = "beastgen template with $(name=default) placeholders")]
    pub template: Option<PathBuf>,

    #[arg(short = 'o', long = "outdir", default_value = "results", help = "Directory receiving all published outputs")]
    pub outdir: PathBuf,

    #[arg(long, default_value = "beast_analysis")]
    pub prefix: String,

    #[arg(long, default_value_t = 10_000_000)]
    pub chain_length: u64,

    #[arg(long, default_value_t = 1_000)]
    pub log_every: u64,

    #[arg(long, default_value_t = 10_000)]
    pub screen_every: u64,

    #[arg(long, default_value_t = 10, help = "Burn-in percentage, 0 <= burnin < 100")]
    pub burnin: u32,

    #[arg(long, default_value_t = 4)]
    pub max_cpus: usize,

    #[arg(long, default_value = "8 GB")]
    pub max_memory: MemorySize,

    #[arg(long, default_value = "48h")]
    pub max_time: TimeLimit,

    #[clap(long, help = "Optional fixed BEAST seed for reproducibility; defaults to OS entropy")]
    pub seed: Option<u64>,

    #[arg(long = "work-dir", default_value = "work", help = "Scratch directory holding one isolated directory per task")]
    pub work_dir: PathBuf,

    #[arg(long, help = "Maximum number of tasks running at once; defaults to min(max_cpus, physical cores)")]
    pub max_forks: Option<usize>,

    #[arg(long, env = "BEASTGEN", default_value = "beastgen")]
    pub beastgen: ToolCommand,

    #[arg(long, env = "BEAST", default_value = "beast")]
    pub beast: ToolCommand,

    #[arg(long, env = "TREEANNOTATOR", default_value = "treeannotator")]
    pub treeannotator: ToolCommand,

    #[arg(long, env = "LOGANALYSER", default_value = "loganalyser")]
    pub loganalyser: ToolCommand,

    #[arg(long, env = "TREE_PLOTTER", default_value = "visualize_tree.py")]
    pub plotter: ToolCommand,
}
