//! Structured severity classification.
//!
//! Analyzer JSON is decoded into private serde shapes and immediately
//! normalized into [`Finding`]s; nothing outside this module sees the raw
//! tool schema.

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Contents written when a tool did not produce its structured artifact.
pub const PLACEHOLDER_ARTIFACT: &str = r#"{"results": []}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Unknown,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub description: String,
    pub severity: Severity,
    pub source_tool: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unknown: usize,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        self.add(severity, 1);
    }

    pub fn add(&mut self, severity: Severity, n: usize) {
        match severity {
            Severity::High => self.high += n,
            Severity::Medium => self.medium += n,
            Severity::Low => self.low += n,
            Severity::Unknown => self.unknown += n,
        }
    }

    pub fn merge(&mut self, other: &SeverityCounts) {
        self.high += other.high;
        self.medium += other.medium;
        self.low += other.low;
        self.unknown += other.unknown;
    }

    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut counts = Self::default();
        for finding in findings {
            counts.record(finding.severity);
        }
        counts
    }
}

/// Findings decoded from an analyzer's JSON artifact.
#[derive(Debug, Clone, Default)]
pub struct StructuredFindings {
    entries: Vec<RawEntry>,
}

impl StructuredFindings {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawEntry {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    check: Option<String>,
    #[serde(default)]
    impact: Option<String>,
}

#[derive(Deserialize)]
struct RawDocument {
    results: Option<RawResults>,
}

// Plain list, or slither's `{"results": {"detectors": [...]}}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawResults {
    List(Vec<RawEntry>),
    Detectors {
        #[serde(default)]
        detectors: Vec<RawEntry>,
    },
}

pub fn parse_structured_str(content: &str, path: &Path) -> Result<StructuredFindings, ParseError> {
    let document: RawDocument = serde_json::from_str(content).map_err(|source| ParseError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;

    match document.results {
        Some(RawResults::List(entries)) | Some(RawResults::Detectors { detectors: entries }) => {
            Ok(StructuredFindings { entries })
        }
        None => Err(ParseError::Schema(path.to_path_buf())),
    }
}

pub fn parse_structured(path: &Path) -> Result<StructuredFindings, ParseError> {
    if !path.is_file() {
        return Err(ParseError::Missing(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_structured_str(&content, path)
}

/// Normalize structured findings. Severity comes from `impact`; anything
/// outside High/Medium/Low is `Unknown`.
pub fn classify(structured: Option<&StructuredFindings>, source_tool: &str) -> Vec<Finding> {
    let Some(structured) = structured else {
        return Vec::new();
    };

    structured
        .entries
        .iter()
        .map(|entry| {
            let description = entry
                .description
                .as_deref()
                .or(entry.check.as_deref())
                .unwrap_or("(no description)")
                .trim()
                .to_string();
            Finding {
                description,
                severity: entry.impact.as_deref().map(Severity::from_label).unwrap_or(Severity::Unknown),
                source_tool: source_tool.to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn path() -> PathBuf {
        PathBuf::from("slither-output.json")
    }

    #[test]
    fn test_plain_results_list() {
        let json = r#"{"results": [
            {"description": "Reentrancy in Vault.withdraw()", "impact": "High"},
            {"description": "Missing zero check", "impact": "Low"},
            {"description": "Pragma", "impact": "Informational"}
        ]}"#;
        let structured = parse_structured_str(json, &path()).unwrap();
        let findings = classify(Some(&structured), "slither");

        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[1].severity, Severity::Low);
        assert_eq!(findings[2].severity, Severity::Unknown);
        assert_eq!(findings[0].source_tool, "slither");
    }

    #[test]
    fn test_slither_detectors_shape() {
        let json = r#"{"success": true, "error": null, "results": {"detectors": [
            {"check": "arbitrary-send-eth", "impact": "High", "description": "sends eth to arbitrary user\n"},
            {"check": "naming-convention", "impact": "medium"}
        ]}}"#;
        let structured = parse_structured_str(json, &path()).unwrap();
        let findings = classify(Some(&structured), "slither");

        assert_eq!(findings[0].description, "sends eth to arbitrary user");
        assert_eq!(findings[1].description, "naming-convention");
        assert_eq!(findings[1].severity, Severity::Medium);
    }

    #[test]
    fn test_placeholder_is_empty_but_valid() {
        let structured = parse_structured_str(PLACEHOLDER_ARTIFACT, &path()).unwrap();
        assert!(structured.is_empty());
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(parse_structured_str("{not json", &path()), Err(ParseError::Malformed { .. })));
        assert!(matches!(parse_structured_str(r#"{"success": false}"#, &path()), Err(ParseError::Schema(_))));
        assert!(matches!(
            parse_structured(Path::new("/definitely/not/here.json")),
            Err(ParseError::Missing(_))
        ));
    }

    #[test]
    fn test_classify_none_is_empty() {
        assert!(classify(None, "slither").is_empty());
    }

    #[test]
    fn test_counts_from_findings() {
        let json = r#"{"results": [{"impact": "High"}, {"impact": "High"}, {"impact": "Medium"}]}"#;
        let structured = parse_structured_str(json, &path()).unwrap();
        let counts = SeverityCounts::from_findings(&classify(Some(&structured), "slither"));
        assert_eq!(counts, SeverityCounts { high: 2, medium: 1, low: 0, unknown: 0 });
    }
}
