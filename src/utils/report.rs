/// Builds the single-file HTML report for a finished BEAST run.
///
/// `render_report` is a pure function of already-parsed inputs; `assemble_report`
/// gathers those inputs from the published artifacts and writes the document.
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info, warn};

use crate::config::defs::{format_duration, MemorySize, PipelineError, RunParameters, TimeLimit, TAXA_TABLE_THRESHOLD};
use crate::utils::fastx::{read_alignment, Alignment};
use crate::utils::file::write_atomic;
use crate::utils::plotting::trace_plot_svg;
use crate::utils::stats::{burnin_count, parse_statistics_summary, read_trace_log, EssQuality, ParameterSummary, TraceLog};
use crate::utils::taxa::date_range;
use crate::utils::template::{read_template, TemplateSummary};

/// Trace columns tried, in order, for the posterior trace plot.
const TRACE_PLOT_COLUMNS: &[&str] = &["posterior", "joint", "likelihood"];

#[derive(Debug, Clone, PartialEq)]
pub enum TreeImage {
    Svg(String),
    Png(Vec<u8>),
}

/// Settings and timings of the run being reported.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub prefix: String,
    pub chain_length: u64,
    pub log_every: u64,
    pub screen_every: u64,
    pub burnin: u32,
    pub seed: u64,
    pub max_cpus: usize,
    pub max_memory: MemorySize,
    pub max_time: TimeLimit,
    pub beast_runtime: Option<Duration>,
    pub generated_at: String,
}

impl RunMetadata {
    pub fn from_params(params: &RunParameters, beast_runtime: Option<Duration>, generated_at: String) -> Self {
        RunMetadata {
            prefix: params.prefix.clone(),
            chain_length: params.chain_length,
            log_every: params.log_every,
            screen_every: params.screen_every,
            burnin: params.burnin,
            seed: params.seed,
            max_cpus: params.max_cpus,
            max_memory: params.max_memory,
            max_time: params.max_time,
            beast_runtime,
            generated_at,
        }
    }

    /// Value passed to beastgen for a template placeholder, if this run sets it.
    fn value_for(&self, placeholder: &str) -> Option<String> {
        match placeholder {
            "chain_length" => Some(self.chain_length.to_string()),
            "log_every" => Some(self.log_every.to_string()),
            "screen_every" => Some(self.screen_every.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportInputs {
    pub alignment: Alignment,
    pub template: TemplateSummary,
    pub trace: TraceLog,
    pub statistics: Vec<ParameterSummary>,
    pub tree_image: TreeImage,
    pub metadata: RunMetadata,
}

/// Locations of the upstream artifacts the report is built from.
#[derive(Debug, Clone)]
pub struct ReportArtifacts {
    pub alignment: PathBuf,
    pub template: PathBuf,
    pub trace_log: PathBuf,
    pub statistics: PathBuf,
    pub tree_svg: Option<PathBuf>,
    pub tree_png: Option<PathBuf>,
}

pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn fmt_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v != 0.0 && (v.abs() >= 1e5 || v.abs() < 1e-3) => format!("{:.4e}", v),
        Some(v) => format!("{:.4}", v),
        None => "n/a".to_string(),
    }
}

/// Drops the `<?xml ...?>` prolog and doctype so the SVG can sit inside HTML.
fn strip_svg_prolog(svg: &str) -> &str {
    svg.find("<svg").map(|i| &svg[i..]).unwrap_or(svg)
}

fn badge(quality: Option<EssQuality>) -> String {
    match quality {
        Some(q) => format!("<span class=\"badge {}\">{}</span>", q.label().to_ascii_lowercase(), q.label()),
        None => "<span class=\"badge none\">n/a</span>".to_string(),
    }
}

fn card(html: &mut String, label: &str, value: &str) -> std::fmt::Result {
    writeln!(
        html,
        "<div class=\"card\"><div class=\"label\">{}</div><div class=\"value\">{}</div></div>",
        html_escape(label),
        html_escape(value)
    )
}

fn write_head(html: &mut String, title: &str) -> std::fmt::Result {
    writeln!(html, "<!DOCTYPE html>")?;
    writeln!(html, "<html lang=\"en\">")?;
    writeln!(html, "<head>")?;
    writeln!(html, "<meta charset=\"utf-8\"/>")?;
    writeln!(html, "<title>{}</title>", html_escape(title))?;
    writeln!(html, "<style>")?;
    writeln!(
        html,
        "body{{font-family:-apple-system,Segoe UI,Helvetica,Arial,sans-serif;margin:24px auto;max-width:1100px;color:#222;}}"
    )?;
    writeln!(html, "h1{{margin:0 0 6px 0;font-size:24px;}}")?;
    writeln!(html, "h2{{margin:28px 0 8px 0;font-size:19px;border-bottom:1px solid #ddd;padding-bottom:4px;}}")?;
    writeln!(html, ".meta{{color:#666;font-size:13px;}}")?;
    writeln!(html, ".cards{{display:flex;flex-wrap:wrap;gap:10px;}}")?;
    writeln!(
        html,
        ".card{{border:1px solid #e3e3e3;border-radius:6px;padding:8px 12px;min-width:150px;background:#fafafa;}}"
    )?;
    writeln!(html, ".card .label{{font-size:12px;color:#666;}}")?;
    writeln!(html, ".card .value{{font-size:17px;font-weight:600;}}")?;
    writeln!(html, "table{{border-collapse:collapse;font-size:13px;margin:6px 0;}}")?;
    writeln!(html, "th,td{{border:1px solid #ddd;padding:4px 8px;text-align:left;}}")?;
    writeln!(html, "th{{background:#f2f2f2;}}")?;
    writeln!(html, ".badge{{border-radius:4px;padding:1px 6px;font-size:12px;font-weight:bold;color:#fff;}}")?;
    writeln!(html, ".badge.good{{background:#2e7d32;}}")?;
    writeln!(html, ".badge.fair{{background:#d98200;}}")?;
    writeln!(html, ".badge.low{{background:#c62828;}}")?;
    writeln!(html, ".badge.none{{background:#999;}}")?;
    writeln!(html, ".warning{{border-left:4px solid #c62828;background:#fdecea;padding:6px 12px;}}")?;
    writeln!(html, ".figure svg,.figure img{{max-width:100%;height:auto;border:1px solid #e5e5e5;}}")?;
    writeln!(html, "footer{{margin-top:32px;color:#888;font-size:12px;}}")?;
    writeln!(html, "</style>")?;
    writeln!(html, "</head>")?;
    Ok(())
}

fn write_input_section(html: &mut String, inputs: &ReportInputs) -> std::fmt::Result {
    let alignment = &inputs.alignment;
    let unparsed: Vec<&str> = alignment.unparsed().map(|t| t.name.as_str()).collect();
    let range = date_range(alignment.taxa.iter().map(|t| &t.date))
        .map(|(lo, hi)| format!("{} to {}", lo, hi))
        .unwrap_or_else(|| "n/a".to_string());

    writeln!(html, "<h2>Input Data</h2>")?;
    writeln!(html, "<div class=\"cards\">")?;
    card(html, "Taxa", &alignment.taxon_count().to_string())?;
    card(html, "Alignment length", &format!("{} sites", alignment.alignment_length))?;
    card(html, "Template", &inputs.template.file_name)?;
    card(html, "Sampling dates", &range)?;
    card(html, "Unparsed dates", &unparsed.len().to_string())?;
    writeln!(html, "</div>")?;

    if !unparsed.is_empty() {
        writeln!(html, "<div class=\"warning\"><p>No sampling date could be read from:</p><ul>")?;
        for name in &unparsed {
            writeln!(html, "<li>{}</li>", html_escape(name))?;
        }
        writeln!(html, "</ul></div>")?;
    }

    if alignment.taxon_count() < TAXA_TABLE_THRESHOLD {
        writeln!(html, "<table class=\"taxa\">")?;
        writeln!(html, "<tr><th>Taxon</th><th>Sampling date</th><th>Sequence length</th></tr>")?;
        for taxon in &alignment.taxa {
            let date = taxon.date.date().map(|d| d.to_string()).unwrap_or_else(|| "unparsed".to_string());
            writeln!(
                html,
                "<tr class=\"taxon\"><td>{}</td><td>{}</td><td>{}</td></tr>",
                html_escape(&taxon.name),
                date,
                taxon.length
            )?;
        }
        writeln!(html, "</table>")?;
    } else {
        writeln!(
            html,
            "<p class=\"taxa-summary\">{} taxa; the per-taxon table is shown only for alignments of fewer than {} taxa.</p>",
            alignment.taxon_count(),
            TAXA_TABLE_THRESHOLD
        )?;
    }
    Ok(())
}

fn write_model_section(html: &mut String, inputs: &ReportInputs) -> std::fmt::Result {
    writeln!(html, "<h2>Model Summary</h2>")?;
    if inputs.template.placeholders.is_empty() {
        writeln!(html, "<p>The template declares no placeholders.</p>")?;
        return Ok(());
    }
    writeln!(html, "<table class=\"model\">")?;
    writeln!(html, "<tr><th>Placeholder</th><th>Template default</th><th>Value used</th></tr>")?;
    for placeholder in &inputs.template.placeholders {
        let used = inputs
            .metadata
            .value_for(&placeholder.name)
            .unwrap_or_else(|| placeholder.default.clone());
        writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            html_escape(&placeholder.name),
            html_escape(&placeholder.default),
            html_escape(&used)
        )?;
    }
    writeln!(html, "</table>")?;
    Ok(())
}

fn write_analysis_section(html: &mut String, inputs: &ReportInputs) -> std::fmt::Result {
    let meta = &inputs.metadata;
    let samples = inputs.trace.sample_count();
    let retained = inputs.trace.retained_count(meta.burnin);
    let runtime = meta.beast_runtime.map(format_duration).unwrap_or_else(|| "n/a".to_string());

    writeln!(html, "<h2>Analysis Details</h2>")?;
    writeln!(html, "<div class=\"cards\">")?;
    card(html, "Chain length", &meta.chain_length.to_string())?;
    card(html, "Log every", &meta.log_every.to_string())?;
    card(html, "Screen every", &meta.screen_every.to_string())?;
    card(html, "Burn-in", &format!("{}%", meta.burnin))?;
    card(html, "Seed", &meta.seed.to_string())?;
    card(html, "CPU ceiling", &meta.max_cpus.to_string())?;
    card(html, "Memory ceiling", &meta.max_memory.to_string())?;
    card(html, "Time ceiling", &meta.max_time.to_string())?;
    card(html, "BEAST runtime", &runtime)?;
    card(html, "Trace samples", &format!("{} ({} after burn-in)", samples, retained))?;
    writeln!(html, "</div>")?;
    Ok(())
}

fn write_estimates_section(html: &mut String, inputs: &ReportInputs) -> std::fmt::Result {
    writeln!(html, "<h2>Parameter Estimates</h2>")?;

    let low: Vec<&ParameterSummary> = inputs
        .statistics
        .iter()
        .filter(|p| p.quality() == Some(EssQuality::Low))
        .collect();
    if !low.is_empty() {
        writeln!(
            html,
            "<div class=\"warning\"><p>{} parameter(s) have a low effective sample size; consider a longer chain:</p><ul>",
            low.len()
        )?;
        for p in &low {
            writeln!(html, "<li>{} (ESS {})</li>", html_escape(&p.name), fmt_value(p.ess))?;
        }
        writeln!(html, "</ul></div>")?;
    }

    let unassessed = inputs.statistics.iter().filter(|p| p.ess.is_none()).count();
    if unassessed > 0 {
        writeln!(html, "<p class=\"meta\">{} parameter(s) have no ESS estimate.</p>", unassessed)?;
    }

    writeln!(html, "<table class=\"estimates\">")?;
    writeln!(
        html,
        "<tr><th>Parameter</th><th>Mean</th><th>Std. error</th><th>Median</th><th>95% HPD</th><th>ESS</th><th>Quality</th></tr>"
    )?;
    for p in &inputs.statistics {
        writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>[{}, {}]</td><td>{}</td><td>{}</td></tr>",
            html_escape(&p.name),
            fmt_value(p.mean),
            fmt_value(p.stderr),
            fmt_value(p.median),
            fmt_value(p.hpd_lower),
            fmt_value(p.hpd_upper),
            fmt_value(p.ess),
            badge(p.quality())
        )?;
    }
    writeln!(html, "</table>")?;
    writeln!(
        html,
        "<p class=\"meta\">ESS: Good &ge; 200, Fair 100&ndash;199, Low &lt; 100.</p>"
    )?;
    Ok(())
}

fn write_trace_section(html: &mut String, inputs: &ReportInputs) -> std::fmt::Result {
    writeln!(html, "<h2>Posterior Trace</h2>")?;
    let series = TRACE_PLOT_COLUMNS
        .iter()
        .find_map(|c| inputs.trace.series(c).map(|s| (*c, s)));

    let Some((column, series)) = series else {
        writeln!(html, "<p>The trace log has no posterior column to plot.</p>")?;
        return Ok(());
    };

    let burnin = burnin_count(series.len(), inputs.metadata.burnin);
    match trace_plot_svg(&series, burnin) {
        Ok(svg) => {
            writeln!(
                html,
                "<p class=\"meta\">{} by state; the shaded region is discarded as burn-in ({} of {} samples).</p>",
                html_escape(column),
                burnin,
                series.len()
            )?;
            writeln!(html, "<div class=\"figure\">{}</div>", strip_svg_prolog(&svg))?;
        }
        Err(e) => {
            writeln!(html, "<p>Trace plot not available: {}</p>", html_escape(&e.to_string()))?;
        }
    }
    Ok(())
}

fn write_tree_section(html: &mut String, inputs: &ReportInputs) -> std::fmt::Result {
    writeln!(html, "<h2>Time-scaled MCC Tree</h2>")?;
    match &inputs.tree_image {
        TreeImage::Svg(svg) => writeln!(html, "<div class=\"figure\">{}</div>", strip_svg_prolog(svg))?,
        TreeImage::Png(bytes) => writeln!(
            html,
            "<div class=\"figure\"><img alt=\"MCC tree\" src=\"data:image/png;base64,{}\"/></div>",
            BASE64.encode(bytes)
        )?,
    }
    Ok(())
}

/// Renders the report document.
///
/// # Arguments
///
/// * `inputs` - Parsed alignment, template, trace, statistics, tree image and run metadata.
///
/// # Returns
/// The complete HTML document. Identical inputs give byte-identical output.
pub fn render_report(inputs: &ReportInputs) -> Result<String> {
    let mut html = String::new();
    let title = format!("BEAST analysis report: {}", inputs.metadata.prefix);

    write_head(&mut html, &title)?;
    writeln!(html, "<body>")?;
    writeln!(html, "<header>")?;
    writeln!(html, "<h1>{}</h1>", html_escape(&title))?;
    writeln!(html, "<div class=\"meta\">Generated {}</div>", html_escape(&inputs.metadata.generated_at))?;
    writeln!(html, "</header>")?;

    write_input_section(&mut html, inputs)?;
    write_model_section(&mut html, inputs)?;
    write_analysis_section(&mut html, inputs)?;
    write_estimates_section(&mut html, inputs)?;
    write_trace_section(&mut html, inputs)?;
    write_tree_section(&mut html, inputs)?;

    writeln!(
        html,
        "<footer>Bayesian evolutionary analysis with BEAST; MCC tree summarized by TreeAnnotator.</footer>"
    )?;
    writeln!(html, "</body></html>")?;
    Ok(html)
}

fn require(path: &Path, what: &str) -> Result<(), PipelineError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::ReportAssembly(format!("{} not found at {}", what, path.display())))
    }
}

/// Reads the rendered tree, preferring SVG and falling back to PNG.
pub fn load_tree_image(svg: Option<&Path>, png: Option<&Path>) -> Result<TreeImage, PipelineError> {
    if let Some(path) = svg.filter(|p| p.is_file()) {
        let markup = fs::read_to_string(path)
            .map_err(|e| PipelineError::ReportAssembly(format!("Failed to read {}: {}", path.display(), e)))?;
        if markup.contains("<svg") {
            return Ok(TreeImage::Svg(markup));
        }
        warn!("{} is not SVG markup; falling back to PNG", path.display());
    }
    if let Some(path) = png.filter(|p| p.is_file()) {
        let bytes = fs::read(path)
            .map_err(|e| PipelineError::ReportAssembly(format!("Failed to read {}: {}", path.display(), e)))?;
        return Ok(TreeImage::Png(bytes));
    }
    Err(PipelineError::ReportAssembly("no rendered tree image (SVG or PNG) available".to_string()))
}

/// Reads every upstream artifact, renders the report and writes it atomically.
/// Nothing is written when any input is missing or unreadable.
///
/// # Arguments
///
/// * `artifacts` - Paths of the alignment, template, trace log, statistics and tree images.
/// * `metadata` - Run settings and timings.
/// * `dest` - Report file to write.
///
/// # Returns
/// Path of the written report.
pub fn assemble_report(
    artifacts: &ReportArtifacts,
    metadata: RunMetadata,
    dest: &Path,
) -> Result<PathBuf, PipelineError> {
    require(&artifacts.alignment, "Alignment")?;
    require(&artifacts.template, "Template")?;
    require(&artifacts.trace_log, "Trace log")?;
    require(&artifacts.statistics, "Statistics summary")?;
    let tree_image = load_tree_image(artifacts.tree_svg.as_deref(), artifacts.tree_png.as_deref())?;

    let alignment = read_alignment(&artifacts.alignment)
        .map_err(|e| PipelineError::ReportAssembly(format!("{:#}", e)))?;
    let template = read_template(&artifacts.template)
        .map_err(|e| PipelineError::ReportAssembly(format!("{:#}", e)))?;
    let trace = read_trace_log(&artifacts.trace_log)
        .map_err(|e| PipelineError::ReportAssembly(format!("{:#}", e)))?;
    let statistics_text = fs::read_to_string(&artifacts.statistics)?;
    let statistics = parse_statistics_summary(&statistics_text)?;
    debug!(
        "Report inputs: {} taxa, {} trace samples, {} parameters",
        alignment.taxon_count(),
        trace.sample_count(),
        statistics.len()
    );

    for p in statistics.iter().filter(|p| p.quality() == Some(EssQuality::Low)) {
        warn!("Low ESS for {}: {}", p.name, fmt_value(p.ess));
    }

    let inputs = ReportInputs { alignment, template, trace, statistics, tree_image, metadata };
    let html = render_report(&inputs).map_err(|e| PipelineError::ReportAssembly(e.to_string()))?;
    write_atomic(dest, html.as_bytes())?;
    info!("Report written to {}", dest.display());
    Ok(dest.to_path_buf())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::fastx::Taxon;
    use crate::utils::taxa::parse_taxon_date;
    use crate::utils::template::parse_placeholders;
    use tempfile::tempdir;

    const STATS: &str = "burnIn   <= 100,   maxState  <= 1000
statistic\tmean\tstderr\tmedian\t95%HPDlo\t95%HPDup\tESS
posterior\t-1500.2\t0.5\t-1500.1\t-1510.0\t-1490.0\t250.0
clockRate\t0.001\t0.0001\t0.001\t0.0008\t0.0012\t150.0
kappa\t4.2\t0.3\t4.1\t3.5\t5.0\t42.0
";

    fn metadata() -> RunMetadata {
        RunMetadata {
            prefix: "flu".to_string(),
            chain_length: 1000,
            log_every: 100,
            screen_every: 500,
            burnin: 10,
            seed: 42,
            max_cpus: 2,
            max_memory: "2 GB".parse().unwrap(),
            max_time: "1h".parse().unwrap(),
            beast_runtime: Some(Duration::from_secs(65)),
            generated_at: "2024-01-01 00:00:00".to_string(),
        }
    }

    fn sample_inputs(n_taxa: usize) -> ReportInputs {
        let taxa = (0..n_taxa)
            .map(|i| {
                let name = format!("virus{}|20{:02}-01-15", i, i % 24);
                Taxon { date: parse_taxon_date(&name), name, length: 12 }
            })
            .collect();
        let rows = (0..10).map(|i| vec![i as f64 * 100.0, -1500.0 - (i % 3) as f64]).collect();
        ReportInputs {
            alignment: Alignment { taxa, alignment_length: 12 },
            template: TemplateSummary {
                file_name: "template.xml".to_string(),
                placeholders: parse_placeholders("$(chain_length=10000000) $(log_every=1000) $(clock=strict)"),
            },
            trace: TraceLog { columns: vec!["state".to_string(), "posterior".to_string()], rows },
            statistics: parse_statistics_summary(STATS).unwrap(),
            tree_image: TreeImage::Svg("<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>".to_string()),
            metadata: metadata(),
        }
    }

    #[test]
    fn test_taxon_table_threshold() -> Result<()> {
        let html = render_report(&sample_inputs(49))?;
        assert_eq!(html.matches("<tr class=\"taxon\">").count(), 49);
        assert!(!html.contains("taxa-summary"));

        let html = render_report(&sample_inputs(50))?;
        assert_eq!(html.matches("<tr class=\"taxon\">").count(), 0);
        assert!(html.contains("<p class=\"taxa-summary\">50 taxa"));
        Ok(())
    }

    #[test]
    fn test_render_is_deterministic() -> Result<()> {
        let inputs = sample_inputs(5);
        assert_eq!(render_report(&inputs)?, render_report(&inputs)?);
        Ok(())
    }

    #[test]
    fn test_ess_badges_and_warning() -> Result<()> {
        let html = render_report(&sample_inputs(3))?;
        assert!(html.contains("<span class=\"badge good\">Good</span>"));
        assert!(html.contains("<span class=\"badge fair\">Fair</span>"));
        assert!(html.contains("<span class=\"badge low\">Low</span>"));
        assert!(html.contains("<li>kappa (ESS"));
        assert!(!html.contains("<li>clockRate"));
        Ok(())
    }

    #[test]
    fn test_model_summary_uses_run_values() -> Result<()> {
        let html = render_report(&sample_inputs(3))?;
        assert!(html.contains("<tr><td>chain_length</td><td>10000000</td><td>1000</td></tr>"));
        assert!(html.contains("<tr><td>clock</td><td>strict</td><td>strict</td></tr>"));
        Ok(())
    }

    #[test]
    fn test_tree_embedding() -> Result<()> {
        let html = render_report(&sample_inputs(3))?;
        assert!(!html.contains("<?xml"));
        assert!(html.contains("<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>"));

        let mut inputs = sample_inputs(3);
        inputs.tree_image = TreeImage::Png(vec![0x89, b'P', b'N', b'G']);
        let html = render_report(&inputs)?;
        assert!(html.contains("src=\"data:image/png;base64,iVBORw==\""));
        Ok(())
    }

    #[test]
    fn test_names_are_escaped() -> Result<()> {
        let mut inputs = sample_inputs(1);
        inputs.alignment.taxa[0].name = "<script>_2020".to_string();
        let html = render_report(&inputs)?;
        assert!(html.contains("&lt;script&gt;_2020"));
        assert!(!html.contains("<script>"));
        Ok(())
    }

    #[test]
    fn test_missing_artifact_writes_nothing() -> Result<()> {
        let dir = tempdir()?;
        let aln = dir.path().join("aln.fasta");
        let template = dir.path().join("template.xml");
        let trace = dir.path().join("flu.log");
        let svg = dir.path().join("flu_timetree.svg");
        fs::write(&aln, ">a_2020\nACGT\n>b_2021\nACGT\n")?;
        fs::write(&template, "$(chain_length=10)")?;
        fs::write(&trace, "state\tposterior\n0\t-10\n100\t-9\n")?;
        fs::write(&svg, "<svg></svg>")?;

        let artifacts = ReportArtifacts {
            alignment: aln,
            template,
            trace_log: trace,
            statistics: dir.path().join("flu.loganalyser.log"),
            tree_svg: Some(svg),
            tree_png: None,
        };
        let dest = dir.path().join("flu_report.html");
        let err = assemble_report(&artifacts, metadata(), &dest).unwrap_err();
        assert!(matches!(err, PipelineError::ReportAssembly(_)));
        assert!(!dest.exists());

        fs::write(&artifacts.statistics, STATS)?;
        assemble_report(&artifacts, metadata(), &dest)?;
        assert!(fs::read_to_string(&dest)?.contains("<tr class=\"taxon\">"));
        Ok(())
    }

    #[test]
    fn test_png_fallback() -> Result<()> {
        let dir = tempdir()?;
        let png = dir.path().join("tree.png");
        fs::write(&png, [1u8, 2, 3])?;
        let missing_svg = dir.path().join("tree.svg");
        assert_eq!(load_tree_image(Some(&missing_svg), Some(&png))?, TreeImage::Png(vec![1, 2, 3]));
        assert!(load_tree_image(Some(&missing_svg), None).is_err());
        Ok(())
    }
}
