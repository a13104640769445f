/// Light reading of NEXUS/Newick tree files: enough to count sampled trees and to list
/// the tips of a summary tree. Topology and branch lengths are left to the external tools.
///
/// Files are read line by line; a posterior sample can run to gigabytes.
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::utils::file::open_maybe_gzipped;

fn is_nexus_header(line: &str) -> bool {
    line.trim().to_ascii_lowercase().starts_with("#nexus")
}

fn is_tree_statement(line: &str) -> bool {
    let lower = line.trim_start().to_ascii_lowercase();
    lower.starts_with("tree ") || lower.starts_with("tree\t")
}

/// Visits each line as lossy UTF-8 until `f` returns false.
fn for_each_line<R, F>(mut reader: R, mut f: F) -> std::io::Result<()>
where
    R: BufRead,
    F: FnMut(&str) -> bool,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        if !f(&String::from_utf8_lossy(&buf)) {
            return Ok(());
        }
    }
}

/// Counts the trees in a NEXUS `trees` block, or `;`-terminated lines of a Newick file.
pub fn count_trees_from<R: BufRead>(reader: R) -> std::io::Result<usize> {
    let mut nexus: Option<bool> = None;
    let mut count = 0;
    for_each_line(reader, |line| {
        if nexus.is_none() {
            if line.trim().is_empty() {
                return true;
            }
            nexus = Some(is_nexus_header(line));
        }
        let is_tree = if nexus == Some(true) {
            is_tree_statement(line)
        } else {
            line.trim_end().ends_with(';')
        };
        if is_tree {
            count += 1;
        }
        true
    })?;
    Ok(count)
}

/// Counts the trees in a plain or gzipped trees file without loading it.
pub fn count_trees(path: &Path) -> Result<usize> {
    let reader = open_maybe_gzipped(path)
        .with_context(|| format!("Failed to open trees file {}", path.display()))?;
    count_trees_from(BufReader::new(reader))
        .with_context(|| format!("Failed to read trees file {}", path.display()))
}

/// Reads a label starting at `chars[*i]`, quoted (`'a|b'`, `''` escapes a quote) or bare.
fn read_label(chars: &[char], i: &mut usize) -> String {
    let mut label = String::new();
    if chars[*i] == '\'' || chars[*i] == '"' {
        let quote = chars[*i];
        *i += 1;
        while *i < chars.len() {
            if chars[*i] == quote {
                if *i + 1 < chars.len() && chars[*i + 1] == quote {
                    label.push(quote);
                    *i += 2;
                    continue;
                }
                *i += 1;
                break;
            }
            label.push(chars[*i]);
            *i += 1;
        }
    } else {
        while *i < chars.len() && !matches!(chars[*i], ':' | ',' | ')' | '(' | ';' | '[') && !chars[*i].is_whitespace() {
            label.push(chars[*i]);
            *i += 1;
        }
    }
    label
}

fn skip_comment(chars: &[char], i: &mut usize) {
    while *i < chars.len() && chars[*i] != ']' {
        *i += 1;
    }
    *i += 1;
}

/// Tip labels of a Newick string, in order of appearance. Comments (`[&...]`),
/// branch lengths and internal node labels are skipped.
pub fn newick_tips(newick: &str) -> Vec<String> {
    let chars: Vec<char> = newick.chars().collect();
    let mut tips = Vec::new();
    let mut at_leaf_position = true;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '[' => skip_comment(&chars, &mut i),
            '(' | ',' => {
                at_leaf_position = true;
                i += 1;
            }
            ')' => {
                at_leaf_position = false;
                i += 1;
            }
            ':' => {
                i += 1;
                while i < chars.len() && !matches!(chars[i], ',' | ')' | '(' | ';' | '[') {
                    i += 1;
                }
            }
            ';' => break,
            c if c.is_whitespace() => i += 1,
            _ => {
                let label = read_label(&chars, &mut i);
                if at_leaf_position && !label.is_empty() {
                    tips.push(label);
                }
                at_leaf_position = false;
            }
        }
    }
    tips
}

fn skip_while(chars: &[char], i: &mut usize, skip: impl Fn(char) -> bool) {
    while *i < chars.len() && skip(chars[*i]) {
        *i += 1;
    }
}

/// Parses a NEXUS `Translate` block body (`1 name, 2 'other|name'`). Quoted names may
/// contain commas.
fn parse_translate(body: &str) -> HashMap<String, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut table = HashMap::new();
    let mut i = 0;
    loop {
        skip_while(&chars, &mut i, |c| c.is_whitespace() || c == ',');
        if i >= chars.len() {
            break;
        }
        let key = read_label(&chars, &mut i);
        if key.is_empty() {
            i += 1;
            continue;
        }
        skip_while(&chars, &mut i, char::is_whitespace);
        if i >= chars.len() {
            break;
        }
        let value = read_label(&chars, &mut i);
        if !value.is_empty() {
            table.insert(key, value);
        }
    }
    table
}

enum TreeScan {
    Header,
    Nexus { in_trees: bool, translate: Option<String> },
    Newick,
}

/// Tip labels of the first tree in a NEXUS or Newick stream, with NEXUS translate
/// tables applied. Reading stops at the first tree.
///
/// # Arguments
///
/// * `reader` - Tree file contents.
///
/// # Returns
/// Tip names; an error when no tree statement can be found.
pub fn tip_labels_from<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut scan = TreeScan::Header;
    let mut table: HashMap<String, String> = HashMap::new();
    let mut newick: Option<Result<String>> = None;

    for_each_line(reader, |line| {
        if let TreeScan::Header = scan {
            if line.trim().is_empty() {
                return true;
            }
            scan = if is_nexus_header(line) {
                TreeScan::Nexus { in_trees: false, translate: None }
            } else {
                TreeScan::Newick
            };
        }
        match &mut scan {
            TreeScan::Header => true,
            TreeScan::Newick => {
                if line.trim_end().ends_with(';') {
                    newick = Some(Ok(line.to_string()));
                    return false;
                }
                true
            }
            TreeScan::Nexus { in_trees, translate } => {
                if let Some(body) = translate.as_mut() {
                    match line.find(';') {
                        Some(end) => {
                            body.push_str(&line[..end]);
                            table = parse_translate(body);
                            *translate = None;
                        }
                        None => body.push_str(line),
                    }
                    return true;
                }
                let trimmed = line.trim();
                let lower = trimmed.to_ascii_lowercase();
                if lower.starts_with("begin trees") {
                    *in_trees = true;
                } else if *in_trees && lower.starts_with("translate") {
                    let rest = &trimmed["translate".len()..];
                    match rest.find(';') {
                        Some(end) => table = parse_translate(&rest[..end]),
                        None => *translate = Some(format!("{}\n", rest)),
                    }
                } else if is_tree_statement(line) {
                    newick = Some(
                        line.find('=')
                            .map(|eq| line[eq + 1..].to_string())
                            .ok_or_else(|| anyhow!("Malformed tree statement: {}", trimmed)),
                    );
                    return false;
                }
                true
            }
        }
    })?;

    let newick = match (newick, &scan) {
        (Some(statement), _) => statement?,
        (None, TreeScan::Nexus { .. }) => return Err(anyhow!("NEXUS file has no tree statement")),
        (None, _) => return Err(anyhow!("No Newick tree found")),
    };
    Ok(newick_tips(&newick)
        .into_iter()
        .map(|t| table.get(&t).cloned().unwrap_or(t))
        .collect())
}

pub fn read_tip_labels(path: &Path) -> Result<Vec<String>> {
    let reader = open_maybe_gzipped(path)
        .with_context(|| format!("Failed to open tree file {}", path.display()))?;
    tip_labels_from(BufReader::new(reader)).with_context(|| format!("Invalid tree file {}", path.display()))
}


#[cfg(test)]
mod tests {
    use super::*;

    const MCC_NEXUS: &str = "#NEXUS

Begin taxa;
\tDimensions ntax=3;
\t\tTaxlabels
\t\t\t'virus1|2023-01-15'
\t\t\tvirus2_2022
\t\t\tvirus3_2021-06-30
\t\t\t;
End;
Begin trees;
\tTranslate
\t\t   1 'virus1|2023-01-15',
\t\t   2 virus2_2022,
\t\t   3 virus3_2021-06-30
;
tree TREE1 = [&R] ((1[&height=0.0,posterior=1.0]:1.25,2[&height=1.0]:0.25)[&posterior=0.97]:0.5,3:0.75)[&posterior=1.0];
End;
";

    #[test]
    fn test_newick_tips_plain() {
        assert_eq!(newick_tips("(A,B);"), vec!["A", "B"]);
        assert_eq!(newick_tips("((A:0.1,B:0.2)E:0.5,C:0.3)F;"), vec!["A", "B", "C"]);
        assert_eq!(newick_tips("('a b|2020':1,'it''s_2021':2);"), vec!["a b|2020", "it's_2021"]);
        assert_eq!(newick_tips("A;"), vec!["A"]);
        assert!(newick_tips("();").is_empty());
    }

    #[test]
    fn test_nexus_translate_applied() -> Result<()> {
        let tips = tip_labels_from(MCC_NEXUS.as_bytes())?;
        assert_eq!(tips, vec!["virus1|2023-01-15", "virus2_2022", "virus3_2021-06-30"]);
        Ok(())
    }

    #[test]
    fn test_count_trees() -> std::io::Result<()> {
        let nexus = "#NEXUS\nBegin trees;\ntree STATE_0 = (A,B);\ntree STATE_1000 = (A,B);\nEnd;\n";
        assert_eq!(count_trees_from(nexus.as_bytes())?, 2);
        assert_eq!(count_trees_from("#NEXUS\nBegin trees;\nEnd;\n".as_bytes())?, 0);
        assert_eq!(count_trees_from("(A,B);\n(A,C);\n".as_bytes())?, 2);
        assert_eq!(count_trees_from("".as_bytes())?, 0);
        Ok(())
    }

    #[test]
    fn test_count_trees_through_small_buffer() -> std::io::Result<()> {
        let mut nexus = String::from("#NEXUS\nBegin trees;\n");
        for state in 0..500 {
            nexus.push_str(&format!("tree STATE_{} = [&lnP=-{}.5] ((A:1,B:1):1,C:2);\n", state * 1000, state));
        }
        nexus.push_str("End;\n");
        // an 8-byte buffer never holds more than a fragment of one line
        let reader = BufReader::with_capacity(8, nexus.as_bytes());
        assert_eq!(count_trees_from(reader)?, 500);
        Ok(())
    }

    #[test]
    fn test_count_trees_gzipped_file() -> Result<()> {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run.trees.gz");
        let mut encoder = GzEncoder::new(std::fs::File::create(&path)?, Compression::default());
        encoder.write_all(b"#NEXUS\nBegin trees;\ntree STATE_0 = (A,B);\ntree STATE_1 = (A,B);\nEnd;\n")?;
        encoder.finish()?;
        assert_eq!(count_trees(&path)?, 2);
        Ok(())
    }

    #[test]
    fn test_tip_labels_stop_at_first_tree() -> Result<()> {
        let mut nexus = b"#NEXUS\nBegin trees;\ntree T1 = (a_2020,b_2021);\n".to_vec();
        nexus.extend_from_slice(b"tree T2 = \xff\xfe not a tree\n");
        assert_eq!(tip_labels_from(&nexus[..])?, vec!["a_2020", "b_2021"]);
        Ok(())
    }

    #[test]
    fn test_translate_label_with_comma() -> Result<()> {
        let nexus = "#NEXUS\nBegin trees;\n\tTranslate\n\t\t1 'A/Hong Kong, 1|2020-01-01',\n\t\t2 B_2019\n;\ntree T = (1:1,2:1);\nEnd;\n";
        let tips = tip_labels_from(nexus.as_bytes())?;
        assert_eq!(tips, vec!["A/Hong Kong, 1|2020-01-01", "B_2019"]);
        Ok(())
    }

    #[test]
    fn test_missing_tree_is_an_error() {
        assert!(tip_labels_from("#NEXUS\nBegin trees;\nEnd;\n".as_bytes()).is_err());
        assert!(tip_labels_from("".as_bytes()).is_err());
    }
}
