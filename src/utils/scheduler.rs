/// Executes a TaskGraph: dependency order, bounded concurrency, isolated task
/// directories, artifact staging/publishing, and skip-on-failure.
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use fxhash::FxHashMap;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinError;

use crate::config::defs::{PipelineError, RunParameters};
use crate::utils::dag::{Artifact, TaskGraph};
use crate::utils::file::{publish_file, stage_input};
use crate::utils::trace::write_run_reports;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: usize,
    pub name: String,
    pub command: String,
    pub status: TaskStatus,
    pub work_dir: PathBuf,
    pub started: Option<DateTime<Local>>,
    pub duration: Option<Duration>,
    pub error: Option<String>,
}

/// Everything a task action gets to see.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: String,
    /// The task's own, freshly created directory. Tools run here.
    pub work_dir: PathBuf,
    pub params: Arc<RunParameters>,
    inputs: FxHashMap<String, Vec<PathBuf>>,
    upstream_runtimes: FxHashMap<String, Duration>,
}

impl TaskContext {
    /// Staged path of a single-file input artifact.
    pub fn input(&self, key: &str) -> Result<PathBuf, PipelineError> {
        self.inputs
            .get(key)
            .and_then(|paths| paths.first())
            .cloned()
            .ok_or_else(|| PipelineError::ArtifactMissing {
                task: self.task.clone(),
                artifact: key.to_string(),
                path: self.work_dir.clone(),
            })
    }

    /// Staged paths of an input artifact; empty for an optional output that matched nothing.
    pub fn inputs(&self, key: &str) -> &[PathBuf] {
        self.inputs.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Wall-clock time of a direct upstream task.
    pub fn upstream_runtime(&self, task: &str) -> Option<Duration> {
        self.upstream_runtimes.get(task).copied()
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started: DateTime<Local>,
    pub elapsed: Duration,
    pub records: Vec<TaskRecord>,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed_stage.is_none() && self.records.iter().all(|r| r.status == TaskStatus::Succeeded)
    }

    pub fn record(&self, name: &str) -> Option<&TaskRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// The summary on success, StageFailed naming the first failing task otherwise.
    pub fn into_result(self) -> Result<RunSummary, PipelineError> {
        if self.success() {
            return Ok(self);
        }
        Err(PipelineError::StageFailed {
            stage: self.failed_stage.unwrap_or_else(|| "unknown".to_string()),
            message: self.error.unwrap_or_else(|| "run did not complete".to_string()),
        })
    }
}

type TaskOutcome = Result<(DateTime<Local>, Duration, Result<(), PipelineError>), JoinError>;

pub struct Scheduler {
    graph: TaskGraph,
    params: Arc<RunParameters>,
    run_dir: PathBuf,
}

struct RunState {
    records: Vec<TaskRecord>,
    waiting: Vec<usize>,
    artifacts: FxHashMap<String, Artifact>,
    ready: VecDeque<usize>,
    failed_stage: Option<String>,
    error: Option<String>,
}

impl Scheduler {
    pub fn new(graph: TaskGraph, params: Arc<RunParameters>) -> Self {
        let run_dir = params.work_dir.join(&params.prefix);
        Scheduler { graph, params, run_dir }
    }

    /// `<work_dir>/<prefix>/<nn>-<task>`
    pub fn task_dir(&self, id: usize) -> PathBuf {
        self.run_dir.join(format!("{:02}-{}", id + 1, self.graph.node(id).spec.name))
    }

    /// Runs every task whose dependencies succeed, then writes the run reports.
    ///
    /// # Returns
    /// RunSummary with one record per task. Task failures are reported in the
    /// summary, never as a panic or early return.
    pub async fn run(self) -> RunSummary {
        let started = Local::now();
        let clock = Instant::now();
        let permits = Arc::new(Semaphore::new(self.params.max_forks.max(1)));
        info!(
            "Running {} tasks with up to {} at once; work directory {}",
            self.graph.len(),
            self.params.max_forks,
            self.run_dir.display()
        );

        let mut state = RunState {
            records: self
                .graph
                .nodes()
                .iter()
                .map(|node| TaskRecord {
                    id: node.id,
                    name: node.spec.name.clone(),
                    command: node.spec.command.clone(),
                    status: TaskStatus::Pending,
                    work_dir: self.task_dir(node.id),
                    started: None,
                    duration: None,
                    error: None,
                })
                .collect(),
            waiting: self.graph.nodes().iter().map(|n| n.deps.len()).collect(),
            artifacts: FxHashMap::default(),
            ready: self
                .graph
                .order()
                .iter()
                .copied()
                .filter(|id| self.graph.node(*id).deps.is_empty())
                .collect(),
            failed_stage: None,
            error: None,
        };
        let mut running: FuturesUnordered<BoxFuture<'static, (usize, TaskOutcome)>> = FuturesUnordered::new();

        loop {
            while let Some(id) = state.ready.pop_front() {
                match self.prepare(id, &state) {
                    Ok(ctx) => {
                        let name = ctx.task.clone();
                        let action = Arc::clone(&self.graph.node(id).spec.action);
                        let permits = Arc::clone(&permits);
                        let handle = tokio::spawn(async move {
                            let permit = permits.acquire_owned().await;
                            let task_start = Local::now();
                            let task_clock = Instant::now();
                            let result = match permit {
                                Ok(_permit) => action(ctx).await,
                                Err(e) => Err(PipelineError::IOError(format!("worker pool closed: {}", e))),
                            };
                            (task_start, task_clock.elapsed(), result)
                        });
                        state.records[id].status = TaskStatus::Running;
                        info!("[{}] submitted", name);
                        running.push(async move { (id, handle.await) }.boxed());
                    }
                    Err(e) => self.fail(id, e, &mut state),
                }
            }

            let Some((id, outcome)) = running.next().await else {
                break;
            };
            match outcome {
                Ok((task_start, elapsed, result)) => {
                    state.records[id].started = Some(task_start);
                    state.records[id].duration = Some(elapsed);
                    match result.and_then(|_| self.collect_outputs(id)) {
                        Ok(artifacts) => self.succeed(id, artifacts, &mut state),
                        Err(e) => self.fail(id, e, &mut state),
                    }
                }
                Err(e) => self.fail(id, PipelineError::IOError(format!("task panicked or was cancelled: {}", e)), &mut state),
            }
        }

        let summary = RunSummary {
            started,
            elapsed: clock.elapsed(),
            records: state.records,
            failed_stage: state.failed_stage,
            error: state.error,
        };
        if let Err(e) = write_run_reports(&summary, &self.graph, &self.params.out_dir) {
            warn!("Could not write run reports: {:#}", e);
        }
        info!(
            "Run finished in {:?}: {} completed, {} failed, {} skipped",
            summary.elapsed,
            summary.count(TaskStatus::Succeeded),
            summary.count(TaskStatus::Failed),
            summary.count(TaskStatus::Skipped)
        );
        summary
    }

    /// Creates the task directory and stages every input artifact into it.
    fn prepare(&self, id: usize, state: &RunState) -> Result<TaskContext, PipelineError> {
        let node = self.graph.node(id);
        let dir = self.task_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        let mut inputs: FxHashMap<String, Vec<PathBuf>> = FxHashMap::default();
        for key in &node.spec.inputs {
            let artifact = state.artifacts.get(key).ok_or_else(|| PipelineError::ArtifactMissing {
                task: node.spec.name.clone(),
                artifact: key.clone(),
                path: PathBuf::new(),
            })?;
            let mut staged = Vec::with_capacity(artifact.paths.len());
            for path in &artifact.paths {
                if !path.exists() {
                    return Err(PipelineError::ArtifactMissing {
                        task: node.spec.name.clone(),
                        artifact: key.clone(),
                        path: path.clone(),
                    });
                }
                staged.push(stage_input(path, &dir)?);
            }
            inputs.insert(key.clone(), staged);
        }

        let upstream_runtimes = node
            .deps
            .iter()
            .filter_map(|d| {
                let record = &state.records[*d];
                record.duration.map(|t| (record.name.clone(), t))
            })
            .collect();

        debug!("[{}] {}", node.spec.name, node.spec.command);
        Ok(TaskContext {
            task: node.spec.name.clone(),
            work_dir: dir,
            params: Arc::clone(&self.params),
            inputs,
            upstream_runtimes,
        })
    }

    /// Matches declared outputs against the task directory and publishes them.
    fn collect_outputs(&self, id: usize) -> Result<Vec<Artifact>, PipelineError> {
        let node = self.graph.node(id);
        let dir = self.task_dir(id);
        let mut entries: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();

        let mut artifacts = Vec::with_capacity(node.spec.outputs.len());
        for output in &node.spec.outputs {
            let paths: Vec<PathBuf> = entries
                .iter()
                .filter(|name| output.pattern.matches(name))
                .map(|name| dir.join(name))
                .collect();
            if output.required && paths.is_empty() {
                return Err(PipelineError::ArtifactMissing {
                    task: node.spec.name.clone(),
                    artifact: output.key.clone(),
                    path: dir.join(output.pattern.to_string()),
                });
            }
            if let Some(subdir) = &output.publish_to {
                let dest_dir = self.params.out_dir.join(subdir);
                for path in &paths {
                    let published = publish_file(path, &dest_dir)?;
                    debug!("[{}] published {}", node.spec.name, published.display());
                }
            }
            artifacts.push(Artifact { key: output.key.clone(), producer: node.spec.name.clone(), paths });
        }
        Ok(artifacts)
    }

    fn succeed(&self, id: usize, artifacts: Vec<Artifact>, state: &mut RunState) {
        let record = &mut state.records[id];
        record.status = TaskStatus::Succeeded;
        info!(
            "[{}] completed in {:.1}s",
            record.name,
            record.duration.unwrap_or_default().as_secs_f64()
        );
        for artifact in artifacts {
            state.artifacts.insert(artifact.key.clone(), artifact);
        }
        for &next in &self.graph.node(id).dependents {
            state.waiting[next] -= 1;
            if state.waiting[next] == 0 && state.records[next].status == TaskStatus::Pending {
                state.ready.push_back(next);
            }
        }
    }

    /// Marks `id` failed and everything downstream of it skipped.
    fn fail(&self, id: usize, err: PipelineError, state: &mut RunState) {
        let name = state.records[id].name.clone();
        let message = err.to_string();
        error!("[{}] failed: {}", name, message);
        state.records[id].status = TaskStatus::Failed;
        state.records[id].error = Some(message.clone());
        if state.failed_stage.is_none() {
            state.failed_stage = Some(name.clone());
            state.error = Some(message);
        }

        for downstream in self.graph.transitive_dependents(id) {
            let record = &mut state.records[downstream];
            if record.status == TaskStatus::Pending {
                warn!("[{}] skipped: upstream task {} failed", record.name, name);
                record.status = TaskStatus::Skipped;
                record.error = Some(format!("upstream task {} failed", name));
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use clap::Parser;
    use tempfile::{tempdir, TempDir};
    use crate::cli::Arguments;
    use crate::utils::dag::{action, OutputSpec, TaskSpec};

    fn params(dir: &TempDir, max_forks: usize) -> Arc<RunParameters> {
        let args = Arguments::parse_from(["beast-pipelines", "--prefix", "unit"]);
        Arc::new(RunParameters::from_args(&args, dir.path(), 1, max_forks).unwrap())
    }

    async fn write_a(ctx: TaskContext) -> Result<(), PipelineError> {
        fs::write(ctx.work_dir.join("a.txt"), "alpha")?;
        Ok(())
    }

    async fn copy_a_to_b(ctx: TaskContext) -> Result<(), PipelineError> {
        let a = ctx.input("a")?;
        let text = fs::read_to_string(&a)?;
        fs::write(ctx.work_dir.join("b.txt"), format!("{}+beta", text))?;
        Ok(())
    }

    async fn always_fails(_ctx: TaskContext) -> Result<(), PipelineError> {
        Err(PipelineError::Inference { message: "boom".to_string(), stderr: String::new() })
    }

    async fn does_nothing(_ctx: TaskContext) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn join(ctx: TaskContext) -> Result<(), PipelineError> {
        assert!(ctx.upstream_runtime("make_b").is_some());
        let b = fs::read_to_string(ctx.input("b")?)?;
        fs::write(ctx.work_dir.join("final.txt"), b)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_runs_in_order_and_publishes() -> Result<(), PipelineError> {
        let dir = tempdir()?;
        let params = params(&dir, 2);
        let graph = TaskGraph::new(vec![
            TaskSpec::new("make_a", "make a".to_string(), action(write_a))
                .output(OutputSpec::required("a", "a.txt")),
            TaskSpec::new("make_b", "make b".to_string(), action(copy_a_to_b))
                .input("a")
                .output(OutputSpec::required("b", "b.txt").publish("stage")),
            TaskSpec::new("final", "join".to_string(), action(join))
                .input("b")
                .input("a")
                .output(OutputSpec::required("final", "final.txt").publish("")),
        ])?;
        let scheduler = Scheduler::new(graph, Arc::clone(&params));
        assert!(scheduler.task_dir(1).ends_with("unit/02-make_b"));

        let summary = scheduler.run().await;
        assert!(summary.success(), "{:?}", summary.error);
        assert_eq!(fs::read_to_string(params.out_dir.join("stage/b.txt"))?, "alpha+beta");
        assert_eq!(fs::read_to_string(params.out_dir.join("final.txt"))?, "alpha+beta");
        assert!(params.out_dir.join("trace.txt").is_file());
        assert!(summary.record("final").and_then(|r| r.duration).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() -> Result<(), PipelineError> {
        let dir = tempdir()?;
        let params = params(&dir, 2);
        let graph = TaskGraph::new(vec![
            TaskSpec::new("make_a", "make a".to_string(), action(write_a))
                .output(OutputSpec::required("a", "a.txt")),
            TaskSpec::new("broken", "broken".to_string(), action(always_fails))
                .input("a")
                .output(OutputSpec::required("never", "never.txt")),
            TaskSpec::new("after_broken", "after".to_string(), action(does_nothing)).input("never"),
            TaskSpec::new("make_b", "make b".to_string(), action(copy_a_to_b))
                .input("a")
                .output(OutputSpec::required("b", "b.txt")),
        ])?;
        let summary = Scheduler::new(graph, params).run().await;

        let status = |name: &str| summary.record(name).map(|r| r.status);
        assert_eq!(status("make_a"), Some(TaskStatus::Succeeded));
        assert_eq!(status("broken"), Some(TaskStatus::Failed));
        assert_eq!(status("after_broken"), Some(TaskStatus::Skipped));
        assert_eq!(status("make_b"), Some(TaskStatus::Succeeded));
        assert!(!summary.success());
        match summary.into_result() {
            Err(PipelineError::StageFailed { stage, message }) => {
                assert_eq!(stage, "broken");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected: {:?}", other.map(|s| s.records.len())),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_required_output_fails_task() -> Result<(), PipelineError> {
        let dir = tempdir()?;
        let graph = TaskGraph::new(vec![
            TaskSpec::new("lazy", "lazy".to_string(), action(does_nothing))
                .output(OutputSpec::required("x", "x.txt"))
                .output(OutputSpec::optional("extra", "x.*.log")),
        ])?;
        let summary = Scheduler::new(graph, params(&dir, 1)).run().await;
        let record = summary.record("lazy").cloned();
        assert_eq!(record.as_ref().map(|r| r.status), Some(TaskStatus::Failed));
        assert!(record.and_then(|r| r.error).unwrap_or_default().contains("missing artifact 'x'"));
        Ok(())
    }

    #[tokio::test]
    async fn test_worker_pool_bound() -> Result<(), PipelineError> {
        lazy_static::lazy_static! {
            static ref ACTIVE: AtomicUsize = AtomicUsize::new(0);
            static ref PEAK: AtomicUsize = AtomicUsize::new(0);
        }
        async fn busy(_ctx: TaskContext) -> Result<(), PipelineError> {
            let now = ACTIVE.fetch_add(1, Ordering::SeqCst) + 1;
            PEAK.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            ACTIVE.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        let dir = tempdir()?;
        let specs = (0..4)
            .map(|i| TaskSpec::new(&format!("t{}", i), String::new(), action(busy)))
            .collect();
        let summary = Scheduler::new(TaskGraph::new(specs)?, params(&dir, 1)).run().await;
        assert!(summary.success());
        assert_eq!(PEAK.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
