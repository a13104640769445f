use std::fs;
use std::sync::Arc;

use chrono::Local;
use log::{info, warn};

use crate::config::defs::{
    PipelineError, RunParameters, ANALYSE_LOG_TASK, ASSEMBLE_REPORT_TASK, BEASTGEN_TAG, BEAST_DIR, BEAST_TAG,
    FIGURES_DIR, GENERATE_XML_TASK, LOGANALYSER_TAG, PLOTTER_TAG, RENDER_TREE_TASK, RUN_BEAST_TASK,
    SUMMARIZE_TREES_TASK, TREEANNOTATOR_TAG, TREES_DIR, VALIDATE_TASK, XML_DIR,
};
use crate::utils::command::{generate_cli, run_beast, run_beastgen, run_loganalyser, run_plotter, run_treeannotator};
use crate::utils::dag::{action, OutputSpec, TaskGraph, TaskSpec};
use crate::utils::fastx::read_alignment;
use crate::utils::file::{stage_input, validate_inputs, ValidatedInputs};
use crate::utils::report::{assemble_report, ReportArtifacts, RunMetadata};
use crate::utils::scheduler::{RunSummary, Scheduler, TaskContext};

// Artifact keys flowing between tasks.
const ALIGNMENT: &str = "alignment";
const TEMPLATE: &str = "template";
const BEAST_XML: &str = "beast_xml";
const TRACE_LOG: &str = "trace_log";
const POSTERIOR_TREES: &str = "posterior_trees";
const EXTRA_LOGS: &str = "extra_logs";
const STATISTICS: &str = "statistics";
const MCC_TREE: &str = "mcc_tree";
const TREE_PNG: &str = "tree_png";
const TREE_SVG: &str = "tree_svg";
const REPORT: &str = "report";


fn file_name_of(path: &std::path::Path) -> Result<String, PipelineError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::FileNotFound(path.to_path_buf()))
}

fn command_line(tool: &str, params: &RunParameters, inputs: &ValidatedInputs) -> Result<String, PipelineError> {
    generate_cli(tool, params, inputs)
        .map(|argv| argv.join(" "))
        .map_err(|e| PipelineError::InvalidConfig(e.to_string()))
}

async fn validate_task(ctx: TaskContext, inputs: ValidatedInputs) -> Result<(), PipelineError> {
    let checked = validate_inputs(Some(&inputs.alignment), Some(&inputs.template), &ctx.work_dir)?;
    let alignment = read_alignment(&checked.alignment)
        .map_err(|e| PipelineError::InvalidConfig(format!("{:#}", e)))?;
    info!(
        "Alignment {}: {} taxa, {} sites, {} without a sampling date",
        checked.alignment.display(),
        alignment.taxon_count(),
        alignment.alignment_length,
        alignment.unparsed().count()
    );
    stage_input(&checked.alignment, &ctx.work_dir)?;
    stage_input(&checked.template, &ctx.work_dir)?;
    Ok(())
}

async fn generate_xml_task(ctx: TaskContext) -> Result<(), PipelineError> {
    let template = ctx.input(TEMPLATE)?;
    let alignment = ctx.input(ALIGNMENT)?;
    run_beastgen(&ctx.params, &template, &alignment, &ctx.work_dir).await?;
    Ok(())
}

async fn run_beast_task(ctx: TaskContext) -> Result<(), PipelineError> {
    let xml = ctx.input(BEAST_XML)?;
    run_beast(&ctx.params, &xml, &ctx.work_dir).await
}

async fn analyse_log_task(ctx: TaskContext) -> Result<(), PipelineError> {
    let trace_log = ctx.input(TRACE_LOG)?;
    run_loganalyser(&ctx.params, &trace_log, &ctx.work_dir).await?;
    Ok(())
}

async fn summarize_trees_task(ctx: TaskContext) -> Result<(), PipelineError> {
    let trees = ctx.input(POSTERIOR_TREES)?;
    run_treeannotator(&ctx.params, &trees, &ctx.work_dir).await?;
    Ok(())
}

async fn render_tree_task(ctx: TaskContext) -> Result<(), PipelineError> {
    let mcc_tree = ctx.input(MCC_TREE)?;
    run_plotter(&ctx.params, &mcc_tree, &ctx.work_dir).await?;
    Ok(())
}

async fn assemble_report_task(ctx: TaskContext) -> Result<(), PipelineError> {
    let artifacts = ReportArtifacts {
        alignment: ctx.input(ALIGNMENT)?,
        template: ctx.input(TEMPLATE)?,
        trace_log: ctx.input(TRACE_LOG)?,
        statistics: ctx.input(STATISTICS)?,
        tree_svg: ctx.inputs(TREE_SVG).first().cloned(),
        tree_png: ctx.inputs(TREE_PNG).first().cloned(),
    };
    let metadata = RunMetadata::from_params(
        &ctx.params,
        ctx.upstream_runtime(RUN_BEAST_TASK),
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    let dest = ctx.work_dir.join(ctx.params.report_file());
    assemble_report(&artifacts, metadata, &dest)?;
    Ok(())
}


/// Builds the analysis graph:
///
/// validate_inputs -> generate_xml -> run_beast -> {analyse_log, summarize_trees -> render_tree}
/// -> assemble_report
///
/// # Arguments
///
/// * `params` - Run parameters.
/// * `inputs` - Validated alignment and template.
///
/// # Returns
/// TaskGraph, or InvalidGraph/InvalidConfig.
pub fn build_graph(params: &RunParameters, inputs: &ValidatedInputs) -> Result<TaskGraph, PipelineError> {
    let alignment_name = file_name_of(&inputs.alignment)?;
    let template_name = file_name_of(&inputs.template)?;
    if alignment_name == template_name {
        return Err(PipelineError::InvalidConfig(format!(
            "alignment and template must have different file names (both are '{}')",
            alignment_name
        )));
    }

    let validated = inputs.clone();
    let figure_base = params.figure_base();

    let tasks = vec![
        TaskSpec::new(
            VALIDATE_TASK,
            format!("validate {} {}", alignment_name, template_name),
            action(move |ctx| validate_task(ctx, validated.clone())),
        )
        .output(OutputSpec::required(ALIGNMENT, &alignment_name))
        .output(OutputSpec::required(TEMPLATE, &template_name)),
        TaskSpec::new(GENERATE_XML_TASK, command_line(BEASTGEN_TAG, params, inputs)?, action(generate_xml_task))
            .input(TEMPLATE)
            .input(ALIGNMENT)
            .output(OutputSpec::required(BEAST_XML, &params.xml_file()).publish(XML_DIR)),
        TaskSpec::new(RUN_BEAST_TASK, command_line(BEAST_TAG, params, inputs)?, action(run_beast_task))
            .input(BEAST_XML)
            .output(OutputSpec::required(TRACE_LOG, &params.trace_log_file()).publish(BEAST_DIR))
            .output(OutputSpec::required(POSTERIOR_TREES, &params.trees_file()).publish(BEAST_DIR))
            .output(OutputSpec::optional(EXTRA_LOGS, &format!("{}.*.log", params.prefix)).publish(BEAST_DIR)),
        TaskSpec::new(ANALYSE_LOG_TASK, command_line(LOGANALYSER_TAG, params, inputs)?, action(analyse_log_task))
            .input(TRACE_LOG)
            .output(OutputSpec::required(STATISTICS, &params.statistics_file()).publish(BEAST_DIR)),
        TaskSpec::new(
            SUMMARIZE_TREES_TASK,
            command_line(TREEANNOTATOR_TAG, params, inputs)?,
            action(summarize_trees_task),
        )
        .input(POSTERIOR_TREES)
        .output(OutputSpec::required(MCC_TREE, &params.mcc_tree_file()).publish(TREES_DIR)),
        TaskSpec::new(RENDER_TREE_TASK, command_line(PLOTTER_TAG, params, inputs)?, action(render_tree_task))
            .input(MCC_TREE)
            .output(OutputSpec::required(TREE_PNG, &format!("{}.png", figure_base)).publish(FIGURES_DIR))
            .output(OutputSpec::required(TREE_SVG, &format!("{}.svg", figure_base)).publish(FIGURES_DIR)),
        TaskSpec::new(
            ASSEMBLE_REPORT_TASK,
            format!("report {}", params.report_file()),
            action(assemble_report_task),
        )
        .input(ALIGNMENT)
        .input(TEMPLATE)
        .input(TRACE_LOG)
        .input(STATISTICS)
        .input(TREE_SVG)
        .input(TREE_PNG)
        .output(OutputSpec::required(REPORT, &params.report_file()).publish("")),
    ];

    TaskGraph::new(tasks)
}

/// Runs the whole analysis and returns the run summary, whether or not every task
/// succeeded. Err only when the run could not be set up.
pub async fn execute(params: Arc<RunParameters>, inputs: ValidatedInputs) -> Result<RunSummary, PipelineError> {
    let graph = build_graph(&params, &inputs)?;
    fs::create_dir_all(&params.out_dir)?;
    fs::create_dir_all(&params.work_dir)?;
    let stale_report = params.out_dir.join(params.report_file());
    if stale_report.exists() {
        warn!("Removing report from a previous run: {}", stale_report.display());
        fs::remove_file(&stale_report)?;
    }
    info!(
        "BEAST analysis '{}': chain length {}, burn-in {}%, seed {}, outputs in {}",
        params.prefix,
        params.chain_length,
        params.burnin,
        params.seed,
        params.out_dir.display()
    );
    Ok(Scheduler::new(graph, params).run().await)
}

/// Runs the analysis; any failed task becomes a StageFailed error.
pub async fn run(params: Arc<RunParameters>, inputs: ValidatedInputs) -> Result<RunSummary, PipelineError> {
    execute(params, inputs).await?.into_result()
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use clap::Parser;
    use crate::cli::Arguments;

    fn params() -> RunParameters {
        let args = Arguments::parse_from(["beast-pipelines", "--prefix", "flu"]);
        RunParameters::from_args(&args, Path::new("/tmp/beast"), 11, 2).unwrap()
    }

    fn inputs() -> ValidatedInputs {
        ValidatedInputs { alignment: PathBuf::from("/data/flu.fasta"), template: PathBuf::from("/data/template.xml") }
    }

    #[test]
    fn test_graph_shape() -> Result<(), PipelineError> {
        let graph = build_graph(&params(), &inputs())?;
        let names: Vec<&str> = graph.order().iter().map(|id| graph.node(*id).spec.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                VALIDATE_TASK,
                GENERATE_XML_TASK,
                RUN_BEAST_TASK,
                ANALYSE_LOG_TASK,
                SUMMARIZE_TREES_TASK,
                RENDER_TREE_TASK,
                ASSEMBLE_REPORT_TASK
            ]
        );

        let deps_of = |name: &str| -> Vec<&str> {
            graph
                .find(name)
                .map(|n| n.deps.iter().map(|d| graph.node(*d).spec.name.as_str()).collect())
                .unwrap_or_default()
        };
        assert_eq!(deps_of(ANALYSE_LOG_TASK), vec![RUN_BEAST_TASK]);
        assert_eq!(deps_of(SUMMARIZE_TREES_TASK), vec![RUN_BEAST_TASK]);
        assert_eq!(
            deps_of(ASSEMBLE_REPORT_TASK),
            vec![VALIDATE_TASK, RUN_BEAST_TASK, ANALYSE_LOG_TASK, RENDER_TREE_TASK]
        );
        Ok(())
    }

    #[test]
    fn test_beast_failure_blocks_every_later_stage() -> Result<(), PipelineError> {
        let graph = build_graph(&params(), &inputs())?;
        let beast = graph.find(RUN_BEAST_TASK).map(|n| n.id).unwrap_or_default();
        let blocked: Vec<&str> = graph
            .transitive_dependents(beast)
            .into_iter()
            .map(|id| graph.node(id).spec.name.as_str())
            .collect();
        assert_eq!(
            blocked,
            vec![ANALYSE_LOG_TASK, SUMMARIZE_TREES_TASK, RENDER_TREE_TASK, ASSEMBLE_REPORT_TASK]
        );
        Ok(())
    }

    #[test]
    fn test_same_file_names_rejected() {
        let clash = ValidatedInputs {
            alignment: PathBuf::from("/a/input.txt"),
            template: PathBuf::from("/b/input.txt"),
        };
        assert!(matches!(build_graph(&params(), &clash), Err(PipelineError::InvalidConfig(_))));
    }
}
