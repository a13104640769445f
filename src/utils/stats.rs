/// Parsing of MCMC outputs: the sampler's trace log and the loganalyser summary table.
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::config::defs::{PipelineError, ESS_FAIR_THRESHOLD, ESS_GOOD_THRESHOLD};


/// Convergence quality of a parameter, judged from its effective sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EssQuality {
    /// ESS >= 200
    Good,
    /// 100 <= ESS < 200
    Fair,
    /// ESS < 100
    Low,
}

impl EssQuality {
    pub fn from_ess(ess: f64) -> Self {
        if ess >= ESS_GOOD_THRESHOLD {
            EssQuality::Good
        } else if ess >= ESS_FAIR_THRESHOLD {
            EssQuality::Fair
        } else {
            EssQuality::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EssQuality::Good => "Good",
            EssQuality::Fair => "Fair",
            EssQuality::Low => "Low",
        }
    }
}

impl fmt::Display for EssQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}


/// One row of the loganalyser summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: Option<f64>,
    pub stderr: Option<f64>,
    pub median: Option<f64>,
    pub hpd_lower: Option<f64>,
    pub hpd_upper: Option<f64>,
    pub ess: Option<f64>,
}

impl ParameterSummary {
    pub fn quality(&self) -> Option<EssQuality> {
        self.ess.map(EssQuality::from_ess)
    }
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    mean: usize,
    stderr: usize,
    median: usize,
    hpd_lower: usize,
    hpd_upper: usize,
    ess: usize,
}

impl Columns {
    fn widest(&self) -> usize {
        [self.mean, self.stderr, self.median, self.hpd_lower, self.hpd_upper, self.ess]
            .into_iter()
            .max()
            .unwrap_or(0)
    }
}

const NAME_HEADERS: &[&str] = &["item", "statistic", "parameter"];
const MEAN_HEADERS: &[&str] = &["mean"];
const STDERR_HEADERS: &[&str] = &["stderr", "stderror", "se", "stderrofmean"];
const MEDIAN_HEADERS: &[&str] = &["median"];
const HPD_LOWER_HEADERS: &[&str] = &["95%hpdlo", "95%hpdlower", "hpdlower", "hpdlo", "lower"];
const HPD_UPPER_HEADERS: &[&str] = &["95%hpdup", "95%hpdupper", "hpdupper", "hpdup", "upper"];
const ESS_HEADERS: &[&str] = &["ess"];

fn is_header(tokens: &[String]) -> bool {
    tokens
        .first()
        .map(|t| NAME_HEADERS.contains(&t.as_str()))
        .unwrap_or(false)
        && tokens.iter().any(|t| t == "mean")
        && tokens.iter().any(|t| t == "ess")
}

fn find_column(tokens: &[String], names: &[&str], label: &str) -> Result<usize, PipelineError> {
    tokens
        .iter()
        .position(|t| names.contains(&t.as_str()))
        .ok_or_else(|| PipelineError::ReportParse(format!("header row has no {} column", label)))
}

fn parse_cell(cell: &str) -> Option<f64> {
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => None,
    }
}

/// Parses the loganalyser summary table.
///
/// The header row is located by its first token (`item`, `statistic` or `parameter`)
/// and the presence of `mean` and `ESS`; columns are then mapped by name, so both the
/// BEAST 1 and BEAST 2 layouts work. Rows run until the first blank line.
///
/// # Arguments
///
/// * `text` - loganalyser standard output.
///
/// # Returns
/// One ParameterSummary per row, or ReportParse when the header (or a required
/// column) is absent or a row is truncated.
pub fn parse_statistics_summary(text: &str) -> Result<Vec<ParameterSummary>, PipelineError> {
    let mut lines = text.lines().enumerate();

    let columns = loop {
        let Some((_, line)) = lines.next() else {
            return Err(PipelineError::ReportParse(
                "no header row (expected a line starting with 'item' or 'statistic' listing mean and ESS)".to_string(),
            ));
        };
        let tokens: Vec<String> = line.split_whitespace().map(|t| t.to_ascii_lowercase()).collect();
        if is_header(&tokens) {
            break Columns {
                mean: find_column(&tokens, MEAN_HEADERS, "mean")?,
                stderr: find_column(&tokens, STDERR_HEADERS, "standard error")?,
                median: find_column(&tokens, MEDIAN_HEADERS, "median")?,
                hpd_lower: find_column(&tokens, HPD_LOWER_HEADERS, "95% HPD lower")?,
                hpd_upper: find_column(&tokens, HPD_UPPER_HEADERS, "95% HPD upper")?,
                ess: find_column(&tokens, ESS_HEADERS, "ESS")?,
            };
        }
    };

    let mut rows = Vec::new();
    for (index, line) in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            if rows.is_empty() {
                continue;
            }
            break;
        }
        if fields.len() <= columns.widest() {
            return Err(PipelineError::ReportParse(format!(
                "line {} has {} fields, expected at least {}: '{}'",
                index + 1,
                fields.len(),
                columns.widest() + 1,
                line.trim()
            )));
        }
        rows.push(ParameterSummary {
            name: fields[0].to_string(),
            mean: parse_cell(fields[columns.mean]),
            stderr: parse_cell(fields[columns.stderr]),
            median: parse_cell(fields[columns.median]),
            hpd_lower: parse_cell(fields[columns.hpd_lower]),
            hpd_upper: parse_cell(fields[columns.hpd_upper]),
            ess: parse_cell(fields[columns.ess]),
        });
    }
    Ok(rows)
}


/// Number of leading samples discarded for a burn-in percentage.
/// 0% discards nothing; the result is always smaller than `total` for burnin < 100.
pub fn burnin_count(total: usize, burnin_percent: u32) -> usize {
    (total as u128 * burnin_percent.min(100) as u128 / 100) as usize
}


/// The sampler's tab-separated trace: one row per logged state.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceLog {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl TraceLog {
    pub fn sample_count(&self) -> usize {
        self.rows.len()
    }

    pub fn retained_count(&self, burnin_percent: u32) -> usize {
        self.rows.len() - burnin_count(self.rows.len(), burnin_percent)
    }

    /// (state, value) pairs of one column, e.g. `posterior`.
    pub fn series(&self, column: &str) -> Option<Vec<(f64, f64)>> {
        let index = self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))?;
        Some(
            self.rows
                .iter()
                .filter_map(|row| Some((*row.first()?, *row.get(index)?)))
                .collect(),
        )
    }
}

/// Parses a BEAST trace log. Lines starting with `#` are comments; the first other
/// line is the header (`Sample`/`state` first); rows must be numeric.
pub fn parse_trace_log(text: &str) -> Result<TraceLog> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty() && !l.starts_with('#'));

    let (_, header) = lines.next().ok_or_else(|| anyhow!("trace log has no header"))?;
    let columns: Vec<String> = header.trim_end().split('\t').map(|c| c.trim().to_string()).collect();

    let mut rows = Vec::new();
    for (index, line) in lines {
        let row = line
            .trim_end()
            .split('\t')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|e| anyhow!("trace log line {}: {}", index + 1, e))?;
        if row.len() != columns.len() {
            return Err(anyhow!(
                "trace log line {} has {} values for {} columns",
                index + 1,
                row.len(),
                columns.len()
            ));
        }
        rows.push(row);
    }
    Ok(TraceLog { columns, rows })
}

pub fn read_trace_log(path: &Path) -> Result<TraceLog> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read trace log {}", path.display()))?;
    parse_trace_log(&text).with_context(|| format!("Invalid trace log {}", path.display()))
}
