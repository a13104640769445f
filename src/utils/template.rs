use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // beastgen placeholders: $(chain_length=10000000)
    static ref PLACEHOLDER: Regex = Regex::new(r"\$\(\s*([A-Za-z_][\w.]*)\s*=\s*([^)]*?)\s*\)").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub default: String,
}

/// What the report needs to know about the beastgen template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSummary {
    pub file_name: String,
    pub placeholders: Vec<Placeholder>,
}

/// Lists each `$(name=default)` placeholder once, in order of first appearance.
pub fn parse_placeholders(text: &str) -> Vec<Placeholder> {
    let mut placeholders: Vec<Placeholder> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(text) {
        let name = caps[1].to_string();
        if placeholders.iter().any(|p| p.name == name) {
            continue;
        }
        placeholders.push(Placeholder { name, default: caps[2].to_string() });
    }
    placeholders
}

pub fn read_template(path: &Path) -> Result<TemplateSummary> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read template {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(TemplateSummary { file_name, placeholders: parse_placeholders(&text) })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_placeholders() {
        let text = r#"<run id="mcmc" chainLength="$(chain_length=10000000)">
            <logger logEvery="$(log_every=1000)" fileName="$(filebase).log"/>
            <logger logEvery="$( screen_every = 10000 )"/>
            <logger logEvery="$(log_every=5000)"/>"#;
        let placeholders = parse_placeholders(text);
        assert_eq!(
            placeholders,
            vec![
                Placeholder { name: "chain_length".to_string(), default: "10000000".to_string() },
                Placeholder { name: "log_every".to_string(), default: "1000".to_string() },
                Placeholder { name: "screen_every".to_string(), default: "10000".to_string() },
            ]
        );
    }

    #[test]
    fn test_read_template() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("hky.template.xml");
        std::fs::write(&path, "<run chainLength=\"$(chain_length=42)\"/>")?;
        let summary = read_template(&path)?;
        assert_eq!(summary.file_name, "hky.template.xml");
        assert_eq!(summary.placeholders.len(), 1);
        assert_eq!(summary.placeholders[0].default, "42");
        Ok(())
    }
}
