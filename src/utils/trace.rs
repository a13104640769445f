/// Run-level artifacts written after every run, successful or not:
/// `trace.txt`, `timeline.html`, `pipeline_report.html` and `dag.svg`.
use std::fmt::Write as FmtWrite;
use std::path::Path;

use anyhow::Result;

use crate::config::defs::{format_duration, DAG_FILE, PIPELINE_REPORT_FILE, TIMELINE_FILE, TRACE_FILE};
use crate::utils::dag::TaskGraph;
use crate::utils::file::write_atomic;
use crate::utils::report::html_escape;
use crate::utils::scheduler::{RunSummary, TaskRecord, TaskStatus};

const NODE_WIDTH: usize = 180;
const NODE_HEIGHT: usize = 40;
const COLUMN_GAP: usize = 60;
const ROW_GAP: usize = 30;
const MARGIN: usize = 20;

fn status_colour(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Succeeded => "#2e7d32",
        TaskStatus::Failed => "#c62828",
        TaskStatus::Skipped => "#9e9e9e",
        TaskStatus::Running => "#1565c0",
        TaskStatus::Pending => "#bdbdbd",
    }
}

fn start_text(record: &TaskRecord) -> String {
    record
        .started
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn duration_text(record: &TaskRecord) -> String {
    record.duration.map(format_duration).unwrap_or_else(|| "-".to_string())
}

/// Tab-separated task records, one line per task in id order.
pub fn trace_table(summary: &RunSummary) -> String {
    let mut out = String::from("task_id\tname\tstatus\tstart\tduration\tworkdir\terror\n");
    for r in &summary.records {
        let error = r.error.as_deref().unwrap_or("-").replace(['\t', '\n', '\r'], " ");
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            r.id + 1,
            r.name,
            r.status,
            start_text(r),
            duration_text(r),
            r.work_dir.display(),
            error
        ));
    }
    out
}

/// Gantt-style chart of when each task ran.
pub fn timeline_html(summary: &RunSummary) -> Result<String> {
    let total_ms = summary.elapsed.as_millis().max(1) as f64;
    let mut html = String::new();
    writeln!(html, "<!DOCTYPE html>")?;
    writeln!(html, "<html lang=\"en\"><head><meta charset=\"utf-8\"/><title>Timeline</title>")?;
    writeln!(html, "<style>")?;
    writeln!(html, "body{{font-family:Helvetica,Arial,sans-serif;margin:24px;}}")?;
    writeln!(html, ".row{{display:flex;align-items:center;margin:4px 0;}}")?;
    writeln!(html, ".name{{width:180px;font-size:13px;}}")?;
    writeln!(html, ".lane{{position:relative;flex:1;height:18px;background:#f5f5f5;}}")?;
    writeln!(html, ".bar{{position:absolute;top:0;height:18px;}}")?;
    writeln!(html, ".took{{width:110px;text-align:right;font-size:12px;color:#555;}}")?;
    writeln!(html, "</style></head><body>")?;
    writeln!(
        html,
        "<h1>Timeline</h1><p>Started {}; total {}</p>",
        summary.started.format("%Y-%m-%d %H:%M:%S"),
        format_duration(summary.elapsed)
    )?;

    for r in &summary.records {
        let bar = match (r.started, r.duration) {
            (Some(start), Some(duration)) => {
                let offset = (start - summary.started).num_milliseconds().max(0) as f64;
                let left = (offset / total_ms * 100.0).min(100.0);
                let width = (duration.as_millis() as f64 / total_ms * 100.0).clamp(0.5, (100.0 - left).max(0.5));
                format!(
                    "<div class=\"bar\" style=\"left:{:.2}%;width:{:.2}%;background:{}\"></div>",
                    left,
                    width,
                    status_colour(r.status)
                )
            }
            _ => String::new(),
        };
        writeln!(
            html,
            "<div class=\"row\"><div class=\"name\">{}</div><div class=\"lane\">{}</div><div class=\"took\">{} {}</div></div>",
            html_escape(&r.name),
            bar,
            r.status,
            duration_text(r)
        )?;
    }
    writeln!(html, "</body></html>")?;
    Ok(html)
}

/// Run overview: outcome, failing stage, and every task's record.
pub fn pipeline_report_html(summary: &RunSummary, graph: &TaskGraph) -> Result<String> {
    let mut html = String::new();
    let outcome = if summary.success() { "succeeded" } else { "failed" };
    writeln!(html, "<!DOCTYPE html>")?;
    writeln!(html, "<html lang=\"en\"><head><meta charset=\"utf-8\"/><title>Pipeline report</title>")?;
    writeln!(html, "<style>")?;
    writeln!(html, "body{{font-family:Helvetica,Arial,sans-serif;margin:24px;}}")?;
    writeln!(html, "table{{border-collapse:collapse;font-size:13px;}}")?;
    writeln!(html, "th,td{{border:1px solid #ddd;padding:4px 8px;text-align:left;vertical-align:top;}}")?;
    writeln!(html, "pre{{white-space:pre-wrap;margin:0;font-size:12px;}}")?;
    writeln!(html, "</style></head><body>")?;
    writeln!(html, "<h1>Pipeline run {}</h1>", outcome)?;
    writeln!(
        html,
        "<p>Started {}; elapsed {}; {} completed, {} failed, {} skipped.</p>",
        summary.started.format("%Y-%m-%d %H:%M:%S"),
        format_duration(summary.elapsed),
        summary.count(TaskStatus::Succeeded),
        summary.count(TaskStatus::Failed),
        summary.count(TaskStatus::Skipped)
    )?;
    if let (Some(stage), Some(error)) = (&summary.failed_stage, &summary.error) {
        writeln!(
            html,
            "<h2>Failed stage: {}</h2><pre>{}</pre>",
            html_escape(stage),
            html_escape(error)
        )?;
    }

    writeln!(html, "<h2>Tasks</h2><table>")?;
    writeln!(html, "<tr><th>#</th><th>Task</th><th>Status</th><th>Duration</th><th>Depends on</th><th>Command</th></tr>")?;
    for r in &summary.records {
        let deps: Vec<&str> = graph
            .node(r.id)
            .deps
            .iter()
            .map(|d| graph.node(*d).spec.name.as_str())
            .collect();
        writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td style=\"color:{}\">{}</td><td>{}</td><td>{}</td><td><pre>{}</pre></td></tr>",
            r.id + 1,
            html_escape(&r.name),
            status_colour(r.status),
            r.status,
            duration_text(r),
            html_escape(&deps.join(", ")),
            html_escape(&r.command)
        )?;
    }
    writeln!(html, "</table></body></html>")?;
    Ok(html)
}

/// The task graph, laid out in columns by dependency depth, nodes coloured by status.
pub fn dag_svg(graph: &TaskGraph, summary: &RunSummary) -> Result<String> {
    let levels = graph.levels();
    let depth = levels.iter().copied().max().map(|m| m + 1).unwrap_or(0);

    let mut rows_per_level = vec![0usize; depth];
    let mut position = vec![(0usize, 0usize); graph.len()];
    for &id in graph.order() {
        let level = levels[id];
        position[id] = (
            MARGIN + level * (NODE_WIDTH + COLUMN_GAP),
            MARGIN + rows_per_level[level] * (NODE_HEIGHT + ROW_GAP),
        );
        rows_per_level[level] += 1;
    }
    let width = MARGIN * 2 + depth.max(1) * (NODE_WIDTH + COLUMN_GAP) - COLUMN_GAP;
    let height = MARGIN * 2
        + rows_per_level.iter().copied().max().unwrap_or(1) * (NODE_HEIGHT + ROW_GAP)
        - ROW_GAP;

    let mut svg = String::new();
    writeln!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\" viewBox=\"0 0 {} {}\">",
        width, height, width, height
    )?;
    writeln!(
        svg,
        "<defs><marker id=\"arrow\" markerWidth=\"8\" markerHeight=\"8\" refX=\"8\" refY=\"4\" orient=\"auto\"><path d=\"M0,0 L8,4 L0,8 z\" fill=\"#555\"/></marker></defs>"
    )?;
    for node in graph.nodes() {
        let (x, y) = position[node.id];
        for dep in &node.deps {
            let (dx, dy) = position[*dep];
            writeln!(
                svg,
                "<line x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\" stroke=\"#555\" marker-end=\"url(#arrow)\"/>",
                dx + NODE_WIDTH,
                dy + NODE_HEIGHT / 2,
                x,
                y + NODE_HEIGHT / 2
            )?;
        }
    }
    for node in graph.nodes() {
        let (x, y) = position[node.id];
        let status = summary
            .records
            .get(node.id)
            .map(|r| r.status)
            .unwrap_or(TaskStatus::Pending);
        writeln!(
            svg,
            "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" rx=\"6\" fill=\"{}\"/>",
            x,
            y,
            NODE_WIDTH,
            NODE_HEIGHT,
            status_colour(status)
        )?;
        writeln!(
            svg,
            "<text x=\"{}\" y=\"{}\" fill=\"#fff\" font-family=\"Helvetica,Arial,sans-serif\" font-size=\"13\" text-anchor=\"middle\" dominant-baseline=\"middle\">{}</text>",
            x + NODE_WIDTH / 2,
            y + NODE_HEIGHT / 2,
            html_escape(&node.spec.name)
        )?;
    }
    writeln!(svg, "</svg>")?;
    Ok(svg)
}

/// Writes all four run-level artifacts into `out_dir`.
pub fn write_run_reports(summary: &RunSummary, graph: &TaskGraph, out_dir: &Path) -> Result<()> {
    write_atomic(&out_dir.join(TRACE_FILE), trace_table(summary).as_bytes())?;
    write_atomic(&out_dir.join(TIMELINE_FILE), timeline_html(summary)?.as_bytes())?;
    write_atomic(&out_dir.join(PIPELINE_REPORT_FILE), pipeline_report_html(summary, graph)?.as_bytes())?;
    write_atomic(&out_dir.join(DAG_FILE), dag_svg(graph, summary)?.as_bytes())?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use chrono::Local;
    use crate::utils::dag::{action, OutputSpec, TaskSpec};
    use crate::utils::scheduler::TaskContext;

    async fn noop(_ctx: TaskContext) -> Result<(), crate::config::defs::PipelineError> {
        Ok(())
    }

    fn graph() -> TaskGraph {
        TaskGraph::new(vec![
            TaskSpec::new("first", "tool --in a".to_string(), action(noop)).output(OutputSpec::required("a", "a")),
            TaskSpec::new("second", "tool --in a".to_string(), action(noop)).input("a"),
        ])
        .unwrap()
    }

    fn summary() -> RunSummary {
        let started = Local::now();
        let record = |id: usize, name: &str, status: TaskStatus| TaskRecord {
            id,
            name: name.to_string(),
            command: "tool --in a".to_string(),
            status,
            work_dir: PathBuf::from(format!("/work/run/{:02}-{}", id + 1, name)),
            started: (status != TaskStatus::Skipped).then_some(started),
            duration: (status != TaskStatus::Skipped).then_some(Duration::from_millis(1500)),
            error: match status {
                TaskStatus::Failed => Some("exit 1\nstderr line".to_string()),
                TaskStatus::Skipped => Some("upstream task first failed".to_string()),
                _ => None,
            },
        };
        RunSummary {
            started,
            elapsed: Duration::from_secs(2),
            records: vec![record(0, "first", TaskStatus::Failed), record(1, "second", TaskStatus::Skipped)],
            failed_stage: Some("first".to_string()),
            error: Some("exit 1".to_string()),
        }
    }

    #[test]
    fn test_trace_table() {
        let table = trace_table(&summary());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("task_id\tname\tstatus"));
        let first: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(first.len(), 7);
        assert_eq!(first[2], "FAILED");
        assert_eq!(first[4], "1.5s");
        assert_eq!(first[6], "exit 1 stderr line");
        assert!(lines[2].contains("SKIPPED"));
    }

    #[test]
    fn test_reports_mention_failure() -> Result<()> {
        let summary = summary();
        let report = pipeline_report_html(&summary, &graph())?;
        assert!(report.contains("Pipeline run failed"));
        assert!(report.contains("Failed stage: first"));
        let timeline = timeline_html(&summary)?;
        assert_eq!(timeline.matches("class=\"bar\"").count(), 1);
        Ok(())
    }

    #[test]
    fn test_dag_svg_has_every_node_and_edge() -> Result<()> {
        let svg = dag_svg(&graph(), &summary())?;
        assert_eq!(svg.matches("<rect").count(), 2);
        assert_eq!(svg.matches("<line").count(), 1);
        assert!(svg.contains(">second</text>"));
        Ok(())
    }
}
