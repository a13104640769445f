use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::warn;
use seq_io::fasta::{Reader as FastaReader, Record};

use crate::utils::file::open_maybe_gzipped;
use crate::utils::taxa::{parse_taxon_date, TaxonDate};

/// One aligned sequence and the sampling date read from its name.
#[derive(Debug, Clone, PartialEq)]
pub struct Taxon {
    pub name: String,
    pub date: TaxonDate,
    pub length: usize,
}

/// Summary of the input alignment, as needed by the report.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub taxa: Vec<Taxon>,
    pub alignment_length: usize,
}

impl Alignment {
    pub fn taxon_count(&self) -> usize {
        self.taxa.len()
    }

    pub fn unparsed(&self) -> impl Iterator<Item = &Taxon> {
        self.taxa.iter().filter(|t| !t.date.is_parsed())
    }
}

/// Reads a FASTA alignment (plain or gzipped) into taxa with sampling dates.
///
/// # Arguments
///
/// * `path` - Alignment file.
///
/// # Returns
/// Alignment with one Taxon per record. Names without a parsable date are kept and
/// marked Unparsed; an alignment with no records is an error.
pub fn read_alignment(path: &Path) -> Result<Alignment> {
    let reader = open_maybe_gzipped(path)
        .with_context(|| format!("Failed to open alignment {}", path.display()))?;
    let mut fasta = FastaReader::new(reader);

    let mut taxa = Vec::new();
    while let Some(result) = fasta.next() {
        let record = result.map_err(|e| anyhow!("Invalid FASTA in {}: {}", path.display(), e))?;
        let name = record
            .id()
            .map_err(|e| anyhow!("Non UTF-8 sequence name in {}: {}", path.display(), e))?
            .to_string();
        let length = record.full_seq().iter().filter(|b| !b.is_ascii_whitespace()).count();
        let date = parse_taxon_date(&name);
        if !date.is_parsed() {
            warn!("No sampling date could be read from sequence name '{}'", name);
        }
        taxa.push(Taxon { name, date, length });
    }

    if taxa.is_empty() {
        return Err(anyhow!("Alignment {} contains no sequences", path.display()));
    }

    let alignment_length = taxa.iter().map(|t| t.length).max().unwrap_or(0);
    Ok(Alignment { taxa, alignment_length })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::taxa::SamplingDate;
    use std::fs;
    use std::io::Write;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    #[test]
    fn test_read_alignment_dates_and_lengths() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("aln.fasta");
        fs::write(&path, ">virus1|2023-01-15 some description\nACGT\nAC-T\n>virus2_2023\nACGTAC-T\n>mystery\nACGT\n")?;

        let aln = read_alignment(&path)?;
        assert_eq!(aln.taxon_count(), 3);
        assert_eq!(aln.alignment_length, 8);
        assert_eq!(aln.taxa[0].name, "virus1|2023-01-15");
        assert_eq!(aln.taxa[1].date.date(), Some(SamplingDate::Year(2023)));
        assert_eq!(aln.unparsed().map(|t| t.name.as_str()).collect::<Vec<_>>(), vec!["mystery"]);
        Ok(())
    }

    #[test]
    fn test_read_gzipped_alignment() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("aln.fasta.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&path)?, Compression::default());
        encoder.write_all(b">a_2001\nACGT\n>b_2002\nACGT\n")?;
        encoder.finish()?;

        let aln = read_alignment(&path)?;
        assert_eq!(aln.taxon_count(), 2);
        assert_eq!(aln.alignment_length, 4);
        Ok(())
    }

    #[test]
    fn test_empty_alignment_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.fasta");
        fs::write(&path, "")?;
        assert!(read_alignment(&path).is_err());
        Ok(())
    }
}
