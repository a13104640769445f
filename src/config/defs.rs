use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::cli::Arguments;

// External software
pub const BEASTGEN_TAG: &str = "beastgen";
pub const BEAST_TAG: &str = "beast";
pub const TREEANNOTATOR_TAG: &str = "treeannotator";
pub const LOGANALYSER_TAG: &str = "loganalyser";
pub const PLOTTER_TAG: &str = "visualize_tree.py";

// Task names, in pipeline order
pub const VALIDATE_TASK: &str = "validate_inputs";
pub const GENERATE_XML_TASK: &str = "generate_xml";
pub const RUN_BEAST_TASK: &str = "run_beast";
pub const ANALYSE_LOG_TASK: &str = "analyse_log";
pub const SUMMARIZE_TREES_TASK: &str = "summarize_trees";
pub const RENDER_TREE_TASK: &str = "render_tree";
pub const ASSEMBLE_REPORT_TASK: &str = "assemble_report";

// Published output layout, relative to outdir
pub const XML_DIR: &str = "xml";
pub const BEAST_DIR: &str = "beast";
pub const TREES_DIR: &str = "trees";
pub const FIGURES_DIR: &str = "figures";
pub const TRACE_FILE: &str = "trace.txt";
pub const TIMELINE_FILE: &str = "timeline.html";
pub const PIPELINE_REPORT_FILE: &str = "pipeline_report.html";
pub const DAG_FILE: &str = "dag.svg";

// Static Parameters
pub const ESS_GOOD_THRESHOLD: f64 = 200.0;
pub const ESS_FAIR_THRESHOLD: f64 = 100.0;
pub const TAXA_TABLE_THRESHOLD: usize = 50;
pub const TREE_TOPOLOGY: &str = "HIPSTR";
pub const TREE_HEIGHTS: &str = "mean";
pub const PLOT_FORMATS: &[&str] = &["png", "svg"];
pub const BEAST_OUTPUT_TAIL: usize = 20;


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("File not found or unreadable: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("XML generation failed: {message}{}", stderr_suffix(.stderr))]
    Generation { message: String, stderr: String },

    #[error("BEAST inference failed: {message}{}", stderr_suffix(.stderr))]
    Inference { message: String, stderr: String },

    #[error("Tree summarization failed: {message}{}", stderr_suffix(.stderr))]
    Summarization { message: String, stderr: String },

    #[error("Log analysis failed: {message}{}", stderr_suffix(.stderr))]
    Statistics { message: String, stderr: String },

    #[error("Tree rendering failed: {message}{}", stderr_suffix(.stderr))]
    Render { message: String, stderr: String },

    #[error("Could not parse statistics summary: {0}")]
    ReportParse(String),

    #[error("Report assembly failed: {0}")]
    ReportAssembly(String),

    #[error("Task {task} is missing artifact '{artifact}' at {}", .path.display())]
    ArtifactMissing { task: String, artifact: String, path: PathBuf },

    #[error("Invalid task graph: {0}")]
    InvalidGraph(String),

    #[error("Stage {stage} failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("IO error: {0}")]
    IOError(String),
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n--- stderr ---\n{}", trimmed)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}


/// Memory ceiling given as `8 GB`, `8.GB`, `512MB` or a bare byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySize(u64);

const KIB: u64 = 1024;

impl MemorySize {
    pub fn from_bytes(bytes: u64) -> Self {
        MemorySize(bytes)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    pub fn megabytes(&self) -> u64 {
        self.0 / (KIB * KIB)
    }
}

impl FromStr for MemorySize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (number, unit) = split_quantity(s)?;
        let multiplier = match unit.to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" => KIB,
            "M" | "MB" => KIB * KIB,
            "G" | "GB" => KIB * KIB * KIB,
            "T" | "TB" => KIB * KIB * KIB * KIB,
            other => return Err(format!("Unknown memory unit '{}' in '{}'", other, s)),
        };
        Ok(MemorySize((number * multiplier as f64).round() as u64))
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = [("TB", KIB.pow(4)), ("GB", KIB.pow(3)), ("MB", KIB.pow(2)), ("KB", KIB)];
        for (label, size) in units {
            if self.0 >= size && self.0 % size == 0 {
                return write!(f, "{} {}", self.0 / size, label);
            }
        }
        write!(f, "{} B", self.0)
    }
}


/// Wall-clock ceiling given as `48h`, `48.h`, `90m`, `2d` or seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLimit(Duration);

impl TimeLimit {
    pub fn duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for TimeLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (number, unit) = split_quantity(s)?;
        let seconds = match unit.to_ascii_lowercase().as_str() {
            "" | "s" | "sec" => number,
            "m" | "min" => number * 60.0,
            "h" | "hr" => number * 3_600.0,
            "d" | "day" => number * 86_400.0,
            other => return Err(format!("Unknown time unit '{}' in '{}'", other, s)),
        };
        if seconds <= 0.0 {
            return Err(format!("Time limit must be positive: '{}'", s));
        }
        let duration = Duration::try_from_secs_f64(seconds)
            .map_err(|e| format!("Time limit out of range '{}': {}", s, e))?;
        Ok(TimeLimit(duration))
    }
}

impl fmt::Display for TimeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_duration(self.0))
    }
}

/// Splits `"8.GB"` / `"8 GB"` / `"48h"` into its number and unit.
fn split_quantity(s: &str) -> Result<(f64, String), String> {
    let trimmed = s.trim();
    let split_at = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    let number = number.trim_end_matches('.');
    let value: f64 = number
        .parse()
        .map_err(|_| format!("Invalid quantity '{}'", s))?;
    Ok((value, unit.trim().to_string()))
}

/// Formats a duration as `1h 02m 03s`, dropping leading zero units.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (days, rem) = (total / 86_400, total % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    if days > 0 {
        format!("{}d {:02}h {:02}m {:02}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}


/// An external tool invocation prefix, e.g. `beast` or `java -jar beast.jar`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        ToolCommand { program: program.to_string(), args: Vec::new() }
    }

    /// Full argv with the tool-specific arguments appended.
    pub fn argv(&self, tool_args: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(1 + self.args.len() + tool_args.len());
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv.extend(tool_args.iter().cloned());
        argv
    }
}

impl FromStr for ToolCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| "Empty tool command".to_string())?;
        Ok(ToolCommand { program, args: parts.collect() })
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv(&[]).join(" "))
    }
}

#[derive(Debug, Clone)]
pub struct ToolSet {
    pub beastgen: ToolCommand,
    pub beast: ToolCommand,
    pub treeannotator: ToolCommand,
    pub loganalyser: ToolCommand,
    pub plotter: ToolCommand,
}

impl Default for ToolSet {
    fn default() -> Self {
        ToolSet {
            beastgen: ToolCommand::new(BEASTGEN_TAG),
            beast: ToolCommand::new(BEAST_TAG),
            treeannotator: ToolCommand::new(TREEANNOTATOR_TAG),
            loganalyser: ToolCommand::new(LOGANALYSER_TAG),
            plotter: ToolCommand::new(PLOTTER_TAG),
        }
    }
}


/// Pipeline-wide settings. Built once in main, shared read-only through an Arc.
#[derive(Debug, Clone)]
pub struct RunParameters {
    pub out_dir: PathBuf,
    pub work_dir: PathBuf,
    pub prefix: String,
    pub chain_length: u64,
    pub log_every: u64,
    pub screen_every: u64,
    pub burnin: u32,
    pub max_cpus: usize,
    pub max_memory: MemorySize,
    pub max_time: TimeLimit,
    pub seed: u64,
    pub max_forks: usize,
    pub tools: ToolSet,
}

impl RunParameters {
    /// Builds and validates parameters from the command line.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments.
    /// * `cwd` - Directory relative paths are resolved against.
    /// * `seed` - Sampler seed, already resolved (user-supplied or random).
    /// * `max_forks` - Number of tasks allowed to run at once.
    ///
    /// # Returns
    /// Validated RunParameters, or InvalidConfig.
    pub fn from_args(args: &Arguments, cwd: &Path, seed: u64, max_forks: usize) -> Result<Self, PipelineError> {
        let params = RunParameters {
            out_dir: absolutize(&args.outdir, cwd),
            work_dir: absolutize(&args.work_dir, cwd),
            prefix: args.prefix.clone(),
            chain_length: args.chain_length,
            log_every: args.log_every,
            screen_every: args.screen_every,
            burnin: args.burnin,
            max_cpus: args.max_cpus,
            max_memory: args.max_memory,
            max_time: args.max_time,
            seed,
            max_forks,
            tools: ToolSet {
                beastgen: args.beastgen.clone(),
                beast: args.beast.clone(),
                treeannotator: args.treeannotator.clone(),
                loganalyser: args.loganalyser.clone(),
                plotter: args.plotter.clone(),
            },
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.burnin >= 100 {
            return Err(PipelineError::InvalidConfig(format!(
                "burn-in must be in [0, 100), got {}%",
                self.burnin
            )));
        }
        if self.chain_length == 0 {
            return Err(PipelineError::InvalidConfig("chain length must be positive".to_string()));
        }
        if self.log_every == 0 || self.screen_every == 0 {
            return Err(PipelineError::InvalidConfig("log and screen intervals must be positive".to_string()));
        }
        if self.max_cpus == 0 || self.max_forks == 0 {
            return Err(PipelineError::InvalidConfig("CPU and task slot counts must be positive".to_string()));
        }
        if self.prefix.is_empty() || self.prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(PipelineError::InvalidConfig(format!("invalid file prefix '{}'", self.prefix)));
        }
        Ok(())
    }

    pub fn xml_file(&self) -> String {
        format!("{}.xml", self.prefix)
    }

    pub fn trace_log_file(&self) -> String {
        format!("{}.log", self.prefix)
    }

    pub fn trees_file(&self) -> String {
        format!("{}.trees", self.prefix)
    }

    pub fn statistics_file(&self) -> String {
        format!("{}.loganalyser.log", self.prefix)
    }

    pub fn mcc_tree_file(&self) -> String {
        format!("{}.mcc.tree", self.prefix)
    }

    pub fn figure_base(&self) -> String {
        format!("{}_timetree", self.prefix)
    }

    pub fn report_file(&self) -> String {
        format!("{}_report.html", self.prefix)
    }
}

fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_size_parsing() {
        assert_eq!("8 GB".parse::<MemorySize>().unwrap().bytes(), 8 * 1024 * 1024 * 1024);
        assert_eq!("8.GB".parse::<MemorySize>().unwrap().bytes(), 8 * 1024 * 1024 * 1024);
        assert_eq!("512MB".parse::<MemorySize>().unwrap().megabytes(), 512);
        assert_eq!("2048".parse::<MemorySize>().unwrap().bytes(), 2048);
        assert!("8 parsecs".parse::<MemorySize>().is_err());
        assert_eq!("8 GB".parse::<MemorySize>().unwrap().to_string(), "8 GB");
    }

    #[test]
    fn test_time_limit_parsing() {
        assert_eq!("48h".parse::<TimeLimit>().unwrap().duration(), Duration::from_secs(48 * 3600));
        assert_eq!("48.h".parse::<TimeLimit>().unwrap().duration(), Duration::from_secs(48 * 3600));
        assert_eq!("90m".parse::<TimeLimit>().unwrap().duration(), Duration::from_secs(5400));
        assert_eq!("2d".parse::<TimeLimit>().unwrap().duration(), Duration::from_secs(172_800));
        assert!("0h".parse::<TimeLimit>().is_err());
        assert!("soon".parse::<TimeLimit>().is_err());
        assert!("99999999999999999999d".parse::<TimeLimit>().is_err());
    }

    #[test]
    fn test_tool_command_parsing() {
        let cmd: ToolCommand = "java -jar beast.jar".parse().unwrap();
        assert_eq!(cmd.program, "java");
        assert_eq!(cmd.argv(&["-threads".to_string()]), vec!["java", "-jar", "beast.jar", "-threads"]);
        assert!("   ".parse::<ToolCommand>().is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 02m 03s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
    }

    #[test]
    fn test_stage_error_carries_stderr() {
        let err = PipelineError::Inference {
            message: "beast exited with status 1".to_string(),
            stderr: "java.lang.OutOfMemoryError\n".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("beast exited with status 1"));
        assert!(text.contains("OutOfMemoryError"));
    }
}
