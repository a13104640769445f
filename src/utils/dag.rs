/// The task graph: tasks, the artifacts they declare, and a validated execution order.
///
/// Edges are never declared directly. A task that consumes an artifact key depends on
/// the one task declaring that key as an output.
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use fxhash::FxHashMap;

use crate::config::defs::PipelineError;
use crate::utils::scheduler::TaskContext;

pub type TaskAction = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, Result<(), PipelineError>> + Send + Sync>;

/// Wraps an async closure as a TaskAction.
pub fn action<F, Fut>(f: F) -> TaskAction
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// File name pattern of a declared output, matched against a task directory's entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePattern {
    Exact(String),
    /// `prefix*suffix`
    Glob { prefix: String, suffix: String },
}

impl FilePattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.split_once('*') {
            Some((prefix, suffix)) => FilePattern::Glob { prefix: prefix.to_string(), suffix: suffix.to_string() },
            None => FilePattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        match self {
            FilePattern::Exact(name) => name == file_name,
            FilePattern::Glob { prefix, suffix } => {
                file_name.len() > prefix.len() + suffix.len()
                    && file_name.starts_with(prefix.as_str())
                    && file_name.ends_with(suffix.as_str())
            }
        }
    }
}

impl fmt::Display for FilePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilePattern::Exact(name) => f.write_str(name),
            FilePattern::Glob { prefix, suffix } => write!(f, "{}*{}", prefix, suffix),
        }
    }
}

/// An artifact a task promises to leave in its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub key: String,
    pub pattern: FilePattern,
    pub required: bool,
    /// Sub-directory of the output directory the files are copied to; `""` is the
    /// output directory itself. None keeps the artifact in the work directory only.
    pub publish_to: Option<PathBuf>,
}

impl OutputSpec {
    pub fn required(key: &str, pattern: &str) -> Self {
        OutputSpec { key: key.to_string(), pattern: FilePattern::parse(pattern), required: true, publish_to: None }
    }

    pub fn optional(key: &str, pattern: &str) -> Self {
        OutputSpec { required: false, ..OutputSpec::required(key, pattern) }
    }

    pub fn publish(mut self, subdir: &str) -> Self {
        self.publish_to = Some(PathBuf::from(subdir));
        self
    }
}

/// Files a finished task produced for one output key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: String,
    pub producer: String,
    pub paths: Vec<PathBuf>,
}

#[derive(Clone)]
pub struct TaskSpec {
    pub name: String,
    /// Command line shown in logs and run reports.
    pub command: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<OutputSpec>,
    pub action: TaskAction,
}

impl TaskSpec {
    pub fn new(name: &str, command: String, action: TaskAction) -> Self {
        TaskSpec { name: name.to_string(), command, inputs: Vec::new(), outputs: Vec::new(), action }
    }

    pub fn input(mut self, key: &str) -> Self {
        self.inputs.push(key.to_string());
        self
    }

    pub fn output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: usize,
    pub spec: TaskSpec,
    /// Direct upstream tasks, ascending.
    pub deps: Vec<usize>,
    /// Direct downstream tasks, ascending.
    pub dependents: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    order: Vec<usize>,
}

impl TaskGraph {
    /// Validates the tasks and derives their dependencies.
    ///
    /// # Arguments
    ///
    /// * `specs` - Tasks in declaration order; ids follow this order.
    ///
    /// # Returns
    /// The graph, or InvalidGraph on duplicate names, duplicate producers, unknown
    /// input keys or cycles.
    pub fn new(specs: Vec<TaskSpec>) -> Result<Self, PipelineError> {
        let mut names: FxHashMap<&str, usize> = FxHashMap::default();
        let mut producers: FxHashMap<&str, usize> = FxHashMap::default();
        for (id, spec) in specs.iter().enumerate() {
            if names.insert(spec.name.as_str(), id).is_some() {
                return Err(PipelineError::InvalidGraph(format!("duplicate task name '{}'", spec.name)));
            }
            for output in &spec.outputs {
                if let Some(other) = producers.insert(output.key.as_str(), id) {
                    return Err(PipelineError::InvalidGraph(format!(
                        "artifact '{}' is declared by both '{}' and '{}'",
                        output.key, specs[other].name, spec.name
                    )));
                }
            }
        }

        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); specs.len()];
        for (id, spec) in specs.iter().enumerate() {
            for key in &spec.inputs {
                let producer = producers.get(key.as_str()).ok_or_else(|| {
                    PipelineError::InvalidGraph(format!("task '{}' consumes unknown artifact '{}'", spec.name, key))
                })?;
                deps[id].insert(*producer);
            }
        }

        let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); specs.len()];
        for (id, upstream) in deps.iter().enumerate() {
            for dep in upstream {
                dependents[*dep].insert(id);
            }
        }

        let order = kahn_order(&deps, &dependents).map_err(|stuck| {
            let names: Vec<&str> = stuck.iter().map(|id| specs[*id].name.as_str()).collect();
            PipelineError::InvalidGraph(format!("dependency cycle among: {}", names.join(", ")))
        })?;

        let nodes = specs
            .into_iter()
            .enumerate()
            .map(|(id, spec)| TaskNode {
                id,
                spec,
                deps: deps[id].iter().copied().collect(),
                dependents: dependents[id].iter().copied().collect(),
            })
            .collect();
        Ok(TaskGraph { nodes, order })
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &TaskNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.spec.name == name)
    }

    /// Dependencies before dependents; ties broken by declaration order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Every task downstream of `id`, ascending.
    pub fn transitive_dependents(&self, id: usize) -> Vec<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.nodes[id].dependents.iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.nodes[next].dependents.iter().copied());
            }
        }
        seen.into_iter().collect()
    }

    /// Longest-path depth of each task from the roots, indexed by id.
    pub fn levels(&self) -> Vec<usize> {
        let mut levels = vec![0; self.nodes.len()];
        for &id in &self.order {
            levels[id] = self.nodes[id]
                .deps
                .iter()
                .map(|d| levels[*d] + 1)
                .max()
                .unwrap_or(0);
        }
        levels
    }
}

/// Kahn's algorithm with the ready set kept ordered by id. On a cycle, returns the
/// ids that never became ready.
fn kahn_order(deps: &[BTreeSet<usize>], dependents: &[BTreeSet<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..deps.len()).filter(|id| in_degree[*id] == 0).collect();
    let mut order = Vec::with_capacity(deps.len());

    while let Some(id) = ready.pop_first() {
        order.push(id);
        for &next in &dependents[id] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() == deps.len() {
        Ok(order)
    } else {
        Err((0..deps.len()).filter(|id| in_degree[*id] > 0).collect())
    }
}
