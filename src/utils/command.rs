/// Functions and structs for building command lines for, and running, the external tools.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, warn};
use tokio::process::Command;

use crate::config::defs::{
    RunParameters, ToolCommand, BEASTGEN_TAG, BEAST_TAG, LOGANALYSER_TAG, PLOTTER_TAG, TREEANNOTATOR_TAG,
};
use crate::utils::file::ValidatedInputs;
use crate::utils::streams::{read_child_lines, read_child_to_string, LineSink};

pub use self::beast::run as run_beast;
pub use self::beastgen::run as run_beastgen;
pub use self::loganalyser::run as run_loganalyser;
pub use self::plotter::run as run_plotter;
pub use self::treeannotator::run as run_treeannotator;


/// How one external tool invocation is run.
#[derive(Debug, Clone)]
pub struct ToolInvocation<'a> {
    pub tool: &'a ToolCommand,
    pub args: Vec<String>,
    pub cwd: &'a Path,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub stdout: LineSink,
}

/// What came back from a tool.
#[derive(Debug)]
pub struct ToolOutput {
    /// None when the process was killed on timeout.
    pub status: Option<ExitStatus>,
    pub stdout: Vec<String>,
    pub stderr: String,
    pub timed_out: bool,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.map(|s| s.success()).unwrap_or(false)
    }

    /// Short description of why the tool did not succeed.
    pub fn failure_message(&self, program: &str) -> String {
        match (self.timed_out, self.status) {
            (true, _) => format!("{} exceeded its wall-clock limit and was killed", program),
            (false, Some(status)) => match status.code() {
                Some(code) => format!("{} exited with status {}", program, code),
                None => format!("{} was terminated by a signal", program),
            },
            (false, None) => format!("{} did not report an exit status", program),
        }
    }
}

/// Spawns a tool, reads its stdout/stderr concurrently and waits for it, enforcing
/// the optional wall-clock limit.
///
/// # Arguments
///
/// * `invocation` - Tool, arguments, working directory, environment, limit and stdout handling.
///
/// # Returns
/// ToolOutput; Err only when the process could not be spawned or waited on.
pub async fn run_tool(invocation: ToolInvocation<'_>) -> Result<ToolOutput> {
    let argv = invocation.tool.argv(&invocation.args);
    let program = invocation.tool.program.clone();
    debug!("Running in {}: {}", invocation.cwd.display(), argv.join(" "));

    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(invocation.cwd)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn {}: {}. Is it installed?", program, e))?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("{} stdout not captured", program))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("{} stderr not captured", program))?;
    let stdout_task = tokio::spawn(read_child_lines(stdout, program.clone(), invocation.stdout));
    let stderr_task = tokio::spawn(read_child_to_string(stderr));

    let (status, timed_out) = match invocation.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                warn!("{} exceeded {:?}; killing it", program, limit);
                child.kill().await?;
                (None, true)
            }
        },
        None => (Some(child.wait().await?), false),
    };

    if timed_out {
        // orphaned grandchildren may hold the pipes open
        stdout_task.abort();
        stderr_task.abort();
        return Ok(ToolOutput { status, stdout: Vec::new(), stderr: String::new(), timed_out });
    }

    let stdout = stdout_task.await??;
    let stderr = stderr_task.await??;
    Ok(ToolOutput { status, stdout, stderr, timed_out })
}


fn file_name(path: &Path) -> PathBuf {
    path.file_name().map(PathBuf::from).unwrap_or_else(|| path.to_path_buf())
}

/// Full command line of a tool as it will run inside its task directory, where
/// every input is staged under its own file name.
///
/// # Arguments
///
/// * `tool` - One of the tool tags in config::defs.
/// * `params` - Run parameters.
/// * `inputs` - Validated alignment and template.
///
/// # Returns
/// argv, program first.
pub fn generate_cli(tool: &str, params: &RunParameters, inputs: &ValidatedInputs) -> Result<Vec<String>> {
    let cmd = match tool {
        BEASTGEN_TAG => params.tools.beastgen.argv(&beastgen::arg_generator(
            params,
            &file_name(&inputs.template),
            &file_name(&inputs.alignment),
        )),
        BEAST_TAG => params.tools.beast.argv(&beast::arg_generator(params, Path::new(&params.xml_file()))),
        TREEANNOTATOR_TAG => params
            .tools
            .treeannotator
            .argv(&treeannotator::arg_generator(params, Path::new(&params.trees_file()))),
        LOGANALYSER_TAG => params
            .tools
            .loganalyser
            .argv(&loganalyser::arg_generator(params, Path::new(&params.trace_log_file()))),
        PLOTTER_TAG => params
            .tools
            .plotter
            .argv(&plotter::arg_generator(params, Path::new(&params.mcc_tree_file()))),
        _ => return Err(anyhow!("Unknown tool: {}", tool)),
    };
    Ok(cmd)
}


mod beastgen {
    use std::path::{Path, PathBuf};

    use log::info;

    use crate::config::defs::{PipelineError, RunParameters};
    use crate::utils::file::is_non_empty_file;
    use crate::utils::streams::LineSink;
    use super::{run_tool, ToolInvocation};

    pub fn arg_generator(params: &RunParameters, template: &Path, alignment: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-D".to_string());
        args_vec.push(format!(
            "chain_length={},log_every={},screen_every={}",
            params.chain_length, params.log_every, params.screen_every
        ));
        args_vec.push(template.to_string_lossy().to_string());
        args_vec.push(alignment.to_string_lossy().to_string());
        args_vec.push(params.xml_file());
        args_vec
    }

    /// Generates `<prefix>.xml` in `task_dir` from the template and alignment.
    pub async fn run(
        params: &RunParameters,
        template: &Path,
        alignment: &Path,
        task_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let tool = &params.tools.beastgen;
        let output = run_tool(ToolInvocation {
            tool,
            args: arg_generator(params, template, alignment),
            cwd: task_dir,
            env: Vec::new(),
            timeout: None,
            stdout: LineSink::Log { tail: 0 },
        })
        .await
        .map_err(|e| PipelineError::Generation { message: e.to_string(), stderr: String::new() })?;

        if !output.success() {
            return Err(PipelineError::Generation {
                message: output.failure_message(&tool.program),
                stderr: output.stderr,
            });
        }

        let xml = task_dir.join(params.xml_file());
        if !is_non_empty_file(&xml) {
            return Err(PipelineError::Generation {
                message: format!("{} produced no XML at {}", tool.program, xml.display()),
                stderr: output.stderr,
            });
        }
        info!("Generated {}", xml.display());
        Ok(xml)
    }
}

mod beast {
    use std::path::Path;

    use log::info;

    use crate::config::defs::{PipelineError, RunParameters, BEAST_OUTPUT_TAIL};
    use crate::utils::streams::LineSink;
    use super::{run_tool, ToolInvocation};

    pub fn arg_generator(params: &RunParameters, xml: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-threads".to_string());
        args_vec.push(params.max_cpus.to_string());
        args_vec.push("-seed".to_string());
        args_vec.push(params.seed.to_string());
        args_vec.push("-overwrite".to_string());
        args_vec.push(xml.to_string_lossy().to_string());
        args_vec
    }

    /// JVM heap ceiling handed to BEAST through the environment.
    pub fn env_generator(params: &RunParameters) -> Vec<(String, String)> {
        vec![(
            "JAVA_TOOL_OPTIONS".to_string(),
            format!("-Xmx{}m", params.max_memory.megabytes().max(1)),
        )]
    }

    /// Runs the sampler on `xml` inside `task_dir`, streaming its progress to the log.
    pub async fn run(params: &RunParameters, xml: &Path, task_dir: &Path) -> Result<(), PipelineError> {
        let tool = &params.tools.beast;
        let output = run_tool(ToolInvocation {
            tool,
            args: arg_generator(params, xml),
            cwd: task_dir,
            env: env_generator(params),
            timeout: Some(params.max_time.duration()),
            stdout: LineSink::Log { tail: BEAST_OUTPUT_TAIL },
        })
        .await
        .map_err(|e| PipelineError::Inference { message: e.to_string(), stderr: String::new() })?;

        if !output.success() {
            let mut message = output.failure_message(&tool.program);
            if !output.stdout.is_empty() {
                message.push_str("\n--- last output ---\n");
                message.push_str(&output.stdout.join("\n"));
            }
            return Err(PipelineError::Inference { message, stderr: output.stderr });
        }

        for file in [params.trace_log_file(), params.trees_file()] {
            if !task_dir.join(&file).is_file() {
                return Err(PipelineError::Inference {
                    message: format!("{} finished but did not write {}", tool.program, file),
                    stderr: output.stderr,
                });
            }
        }
        info!("BEAST finished for {}", params.prefix);
        Ok(())
    }
}

mod treeannotator {
    use std::path::{Path, PathBuf};

    use log::info;

    use crate::config::defs::{PipelineError, RunParameters, TREE_HEIGHTS, TREE_TOPOLOGY};
    use crate::utils::file::is_non_empty_file;
    use crate::utils::stats::burnin_count;
    use crate::utils::streams::LineSink;
    use crate::utils::tree::count_trees;
    use super::{run_tool, ToolInvocation};

    pub fn arg_generator(params: &RunParameters, trees: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-burnin".to_string());
        args_vec.push(params.burnin.to_string());
        args_vec.push("-topology".to_string());
        args_vec.push(TREE_TOPOLOGY.to_string());
        args_vec.push("-heights".to_string());
        args_vec.push(TREE_HEIGHTS.to_string());
        args_vec.push(trees.to_string_lossy().to_string());
        args_vec.push(params.mcc_tree_file());
        args_vec
    }

    /// Summarizes the posterior trees into `<prefix>.mcc.tree` after discarding burn-in.
    pub async fn run(params: &RunParameters, trees: &Path, task_dir: &Path) -> Result<PathBuf, PipelineError> {
        let total = count_trees(trees)
            .map_err(|e| PipelineError::Summarization { message: format!("{:#}", e), stderr: String::new() })?;
        if total == 0 {
            return Err(PipelineError::Summarization {
                message: format!("{} contains no trees", trees.display()),
                stderr: String::new(),
            });
        }
        let retained = total - burnin_count(total, params.burnin);
        if retained == 0 {
            return Err(PipelineError::Summarization {
                message: format!("no trees left after discarding {}% of {} as burn-in", params.burnin, total),
                stderr: String::new(),
            });
        }
        info!("Summarizing {} of {} trees", retained, total);

        let tool = &params.tools.treeannotator;
        let output = run_tool(ToolInvocation {
            tool,
            args: arg_generator(params, trees),
            cwd: task_dir,
            env: Vec::new(),
            timeout: None,
            stdout: LineSink::Log { tail: 0 },
        })
        .await
        .map_err(|e| PipelineError::Summarization { message: e.to_string(), stderr: String::new() })?;

        if !output.success() {
            return Err(PipelineError::Summarization {
                message: output.failure_message(&tool.program),
                stderr: output.stderr,
            });
        }

        let mcc = task_dir.join(params.mcc_tree_file());
        if !is_non_empty_file(&mcc) {
            return Err(PipelineError::Summarization {
                message: format!("{} wrote no summary tree at {}", tool.program, mcc.display()),
                stderr: output.stderr,
            });
        }
        Ok(mcc)
    }
}

mod loganalyser {
    use std::path::{Path, PathBuf};

    use crate::config::defs::{PipelineError, RunParameters};
    use crate::utils::file::write_atomic;
    use crate::utils::streams::LineSink;
    use super::{run_tool, ToolInvocation};

    pub fn arg_generator(params: &RunParameters, trace_log: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-b".to_string());
        args_vec.push(params.burnin.to_string());
        args_vec.push(trace_log.to_string_lossy().to_string());
        args_vec
    }

    /// Summarizes the trace log; the tool's stdout becomes `<prefix>.loganalyser.log`.
    pub async fn run(params: &RunParameters, trace_log: &Path, task_dir: &Path) -> Result<PathBuf, PipelineError> {
        let tool = &params.tools.loganalyser;
        let output = run_tool(ToolInvocation {
            tool,
            args: arg_generator(params, trace_log),
            cwd: task_dir,
            env: Vec::new(),
            timeout: None,
            stdout: LineSink::Keep,
        })
        .await
        .map_err(|e| PipelineError::Statistics { message: e.to_string(), stderr: String::new() })?;

        if !output.success() {
            return Err(PipelineError::Statistics {
                message: output.failure_message(&tool.program),
                stderr: output.stderr,
            });
        }
        if output.stdout.iter().all(|l| l.trim().is_empty()) {
            return Err(PipelineError::Statistics {
                message: format!("{} printed no summary", tool.program),
                stderr: output.stderr,
            });
        }

        let summary = task_dir.join(params.statistics_file());
        let mut text = output.stdout.join("\n");
        text.push('\n');
        write_atomic(&summary, text.as_bytes())?;
        Ok(summary)
    }
}

mod plotter {
    use std::path::{Path, PathBuf};

    use crate::config::defs::{PipelineError, RunParameters, PLOT_FORMATS};
    use crate::utils::file::is_non_empty_file;
    use crate::utils::streams::LineSink;
    use crate::utils::taxa::parse_taxon_date;
    use crate::utils::tree::read_tip_labels;
    use super::{run_tool, ToolInvocation};

    pub fn arg_generator(params: &RunParameters, mcc_tree: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("--input".to_string());
        args_vec.push(mcc_tree.to_string_lossy().to_string());
        args_vec.push("--output".to_string());
        args_vec.push(params.figure_base());
        args_vec.push("--format".to_string());
        args_vec.push(PLOT_FORMATS.join(","));
        args_vec
    }

    fn render_error(message: String) -> PipelineError {
        PipelineError::Render { message, stderr: String::new() }
    }

    /// Checks the tree can be drawn on a time axis: at least two tips, each dated.
    pub fn check_tips(mcc_tree: &Path) -> Result<usize, PipelineError> {
        let tips = read_tip_labels(mcc_tree).map_err(|e| render_error(format!("{:#}", e)))?;
        if tips.len() < 2 {
            return Err(render_error(format!("tree has {} tip(s); at least 2 are needed", tips.len())));
        }
        let undated: Vec<&str> = tips
            .iter()
            .filter(|t| !parse_taxon_date(t).is_parsed())
            .map(String::as_str)
            .collect();
        if !undated.is_empty() {
            return Err(render_error(format!("missing tip-date metadata for: {}", undated.join(", "))));
        }
        Ok(tips.len())
    }

    /// Draws the time-scaled tree as `<prefix>_timetree.png` and `.svg`.
    pub async fn run(params: &RunParameters, mcc_tree: &Path, task_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        check_tips(mcc_tree)?;

        let tool = &params.tools.plotter;
        let output = run_tool(ToolInvocation {
            tool,
            args: arg_generator(params, mcc_tree),
            cwd: task_dir,
            env: Vec::new(),
            timeout: None,
            stdout: LineSink::Log { tail: 0 },
        })
        .await
        .map_err(|e| render_error(e.to_string()))?;

        if !output.success() {
            return Err(PipelineError::Render {
                message: output.failure_message(&tool.program),
                stderr: output.stderr,
            });
        }

        let mut figures = Vec::new();
        for ext in PLOT_FORMATS {
            let figure = task_dir.join(format!("{}.{}", params.figure_base(), ext));
            if !is_non_empty_file(&figure) {
                return Err(PipelineError::Render {
                    message: format!("{} wrote no {} figure at {}", tool.program, ext, figure.display()),
                    stderr: output.stderr,
                });
            }
            figures.push(figure);
        }
        Ok(figures)
    }
}
