/// Sampling dates encoded in sequence names.
///
/// Four encodings are accepted, always at the end of the name:
/// `NAME|YYYY-MM-DD`, `NAME_YYYY-MM-DD`, `NAME|YYYY` and `NAME_YYYY`.
use std::fmt;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FULL_DATE: Regex = Regex::new(r"^(?P<name>.+)[|_](?P<date>\d{4}-\d{2}-\d{2})$").unwrap();
    static ref YEAR_ONLY: Regex = Regex::new(r"^(?P<name>.+)[|_](?P<year>\d{4})$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SamplingDate {
    Full(NaiveDate),
    Year(i32),
}

impl SamplingDate {
    pub fn year(&self) -> i32 {
        match self {
            SamplingDate::Full(date) => chrono::Datelike::year(date),
            SamplingDate::Year(year) => *year,
        }
    }
}

impl fmt::Display for SamplingDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingDate::Full(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            SamplingDate::Year(year) => write!(f, "{}", year),
        }
    }
}

/// Outcome of reading a date from a taxon name. Unparsed names are kept, not dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaxonDate {
    Parsed { name: String, date: SamplingDate },
    Unparsed,
}

impl TaxonDate {
    pub fn date(&self) -> Option<SamplingDate> {
        match self {
            TaxonDate::Parsed { date, .. } => Some(*date),
            TaxonDate::Unparsed => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, TaxonDate::Parsed { .. })
    }
}

/// Parses the trailing sampling date of a taxon name.
///
/// # Arguments
///
/// * `taxon` - Sequence name, e.g. `virus1|2023-01-15` or `virus2_2023`.
///
/// # Returns
/// TaxonDate::Parsed with the bare name and date, or TaxonDate::Unparsed when the
/// name carries no date or the full date is not a real calendar day.
pub fn parse_taxon_date(taxon: &str) -> TaxonDate {
    let taxon = taxon.trim();
    if let Some(caps) = FULL_DATE.captures(taxon) {
        return match NaiveDate::parse_from_str(&caps["date"], "%Y-%m-%d") {
            Ok(date) => TaxonDate::Parsed {
                name: caps["name"].to_string(),
                date: SamplingDate::Full(date),
            },
            Err(_) => TaxonDate::Unparsed,
        };
    }
    if let Some(caps) = YEAR_ONLY.captures(taxon) {
        if let Ok(year) = caps["year"].parse::<i32>() {
            return TaxonDate::Parsed {
                name: caps["name"].to_string(),
                date: SamplingDate::Year(year),
            };
        }
    }
    TaxonDate::Unparsed
}

/// Earliest and latest sampling dates among parsed taxa.
pub fn date_range<'a, I>(dates: I) -> Option<(SamplingDate, SamplingDate)>
where
    I: IntoIterator<Item = &'a TaxonDate>,
{
    let mut parsed = dates.into_iter().filter_map(TaxonDate::date);
    let first = parsed.next()?;
    Some(parsed.fold((first, first), |(lo, hi), d| {
        (min_date(lo, d), max_date(hi, d))
    }))
}

fn sort_key(date: &SamplingDate) -> (i32, u32) {
    match date {
        SamplingDate::Full(d) => (date.year(), chrono::Datelike::ordinal(d)),
        SamplingDate::Year(_) => (date.year(), 0),
    }
}

fn min_date(a: SamplingDate, b: SamplingDate) -> SamplingDate {
    if sort_key(&b) < sort_key(&a) { b } else { a }
}

fn max_date(a: SamplingDate, b: SamplingDate) -> SamplingDate {
    if sort_key(&b) > sort_key(&a) { b } else { a }
}
