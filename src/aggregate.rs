//! Project-wide totals, derived only from what previous runs left on disk.

use crate::{
    classifier::{self, SeverityCounts},
    config::{Config, ToolInvocationSpec},
    error::AuditError,
    heuristics::{self, TextHeuristic},
    reporter::Reporter,
    tool::ToolAvailability,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const AGGREGATE_REPORT_FILE: &str = "comprehensive-audit-report.md";
pub const AGGREGATE_JSON_FILE: &str = "comprehensive-audit-report.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub target_ids: Vec<String>,
    pub severity_counts: SeverityCounts,
    /// Targets whose counts came from the text fallback.
    pub fallback_targets: Vec<String>,
    pub primary_tool: Option<String>,
    /// Installation check from the run; empty when recomposed from disk alone.
    #[serde(default)]
    pub tool_availability: Vec<ToolAvailability>,
    pub generated_at: String,
    #[serde(skip)]
    pub rendered_markdown: String,
}

pub struct AggregateComposer {
    primary: Option<ToolInvocationSpec>,
    heuristic: Box<dyn TextHeuristic>,
    reporter: Reporter,
    availability: Vec<ToolAvailability>,
}

impl AggregateComposer {
    pub fn new(config: &Config) -> Self {
        Self {
            primary: config.primary_analyzer().cloned(),
            heuristic: heuristics::from_config(&config.heuristics),
            reporter: Reporter::new(),
            availability: Vec::new(),
        }
    }

    pub fn with_availability(mut self, availability: Vec<ToolAvailability>) -> Self {
        self.availability = availability;
        self
    }

    /// Scan every target directory under `output_root` and total the primary
    /// analyzer's findings. Unparseable artifacts fall back to the text
    /// heuristic; they are logged, never fatal.
    pub fn compose(&self, output_root: &Path) -> Result<AggregateReport, AuditError> {
        let target_ids = list_target_dirs(output_root)?;
        let mut severity_counts = SeverityCounts::default();
        let mut fallback_targets = Vec::new();

        match &self.primary {
            None => warn!("no Analyzer tool configured, severity totals will be empty"),
            Some(primary) => {
                for id in &target_ids {
                    let dir = output_root.join(id);
                    if self.count_target(primary, id, &dir, &mut severity_counts) {
                        fallback_targets.push(id.clone());
                    }
                }
            }
        }

        let mut report = AggregateReport {
            target_ids,
            severity_counts,
            fallback_targets,
            primary_tool: self.primary.as_ref().map(|p| p.name.clone()),
            tool_availability: self.availability.clone(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            rendered_markdown: String::new(),
        };
        report.rendered_markdown = self.reporter.render_aggregate(&report);
        Ok(report)
    }

    // Returns true when the text fallback was used.
    fn count_target(&self, primary: &ToolInvocationSpec, id: &str, dir: &Path, counts: &mut SeverityCounts) -> bool {
        let structured = primary
            .structured_artifact_name()
            .ok_or_else(|| crate::error::ParseError::Missing(dir.to_path_buf()))
            .and_then(|name| classifier::parse_structured(&dir.join(name)));

        match structured {
            Ok(structured) => {
                let findings = classifier::classify(Some(&structured), &primary.name);
                counts.merge(&SeverityCounts::from_findings(&findings));
                false
            }
            Err(e) => {
                warn!(target = %id, error = %e, "cannot parse structured findings, using text fallback");
                let raw_path = dir.join(primary.raw_artifact_name());
                match fs::read_to_string(&raw_path) {
                    Ok(raw) => self.heuristic.classify_text(&raw, counts),
                    Err(e) => debug!(path = %raw_path.display(), error = %e, "no raw output to scan"),
                }
                true
            }
        }
    }

    /// Write the markdown and JSON aggregate reports into `output_root`.
    pub fn write(&self, report: &AggregateReport, output_root: &Path) -> Result<Vec<PathBuf>, AuditError> {
        let md_path = output_root.join(AGGREGATE_REPORT_FILE);
        fs::write(&md_path, &report.rendered_markdown)?;

        let json_path = output_root.join(AGGREGATE_JSON_FILE);
        let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
        fs::write(&json_path, json)?;

        Ok(vec![md_path, json_path])
    }
}

fn list_target_dirs(output_root: &Path) -> Result<Vec<String>, AuditError> {
    let entries = fs::read_dir(output_root).map_err(|source| AuditError::OutputRoot {
        path: output_root.to_path_buf(),
        source,
    })?;

    let mut ids: Vec<String> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(root = %output_root.display(), error = %e, "cannot read output directory entry, target not counted");
                None
            }
        })
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn target(root: &Path, id: &str, json: Option<&str>, raw: Option<&str>) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        if let Some(json) = json {
            fs::write(dir.join("slither-output.json"), json).unwrap();
        }
        if let Some(raw) = raw {
            fs::write(dir.join("slither-output.txt"), raw).unwrap();
        }
    }

    #[test]
    fn test_structured_counts() {
        let tmp = tempdir().unwrap();
        target(
            tmp.path(),
            "Token",
            Some(r#"{"results": [{"impact": "High"}, {"impact": "Low"}, {"impact": "Optimization"}]}"#),
            None,
        );
        target(tmp.path(), "Auction", Some(r#"{"results": []}"#), None);
        fs::write(tmp.path().join("comprehensive-audit-report.md"), "stale").unwrap();

        let report = AggregateComposer::new(&Config::default()).compose(tmp.path()).unwrap();
        assert_eq!(report.target_ids, vec!["Auction", "Token"]);
        assert_eq!(report.severity_counts.high, 1);
        assert_eq!(report.severity_counts.low, 1);
        assert_eq!(report.severity_counts.unknown, 1);
        assert!(report.fallback_targets.is_empty());
    }

    #[test]
    fn test_malformed_json_falls_back_to_text() {
        let tmp = tempdir().unwrap();
        target(
            tmp.path(),
            "Vault",
            Some("{\"results\": [trunc"),
            Some("Reentrancy in Vault.withdraw() (medium severity)"),
        );

        let report = AggregateComposer::new(&Config::default()).compose(tmp.path()).unwrap();
        assert_eq!(report.severity_counts.medium, 1);
        assert_eq!(report.severity_counts.high, 1);
        assert_eq!(report.fallback_targets, vec!["Vault"]);
    }

    #[test]
    fn test_missing_artifacts_do_not_fail() {
        let tmp = tempdir().unwrap();
        target(tmp.path(), "Empty", None, None);
        target(tmp.path(), "TextOnly", None, Some("low severity"));

        let report = AggregateComposer::new(&Config::default()).compose(tmp.path()).unwrap();
        assert_eq!(report.target_ids.len(), 2);
        assert_eq!(report.severity_counts.low, 1);
        assert_eq!(report.fallback_targets.len(), 2);
    }

    #[test]
    fn test_write_outputs() {
        let tmp = tempdir().unwrap();
        target(tmp.path(), "A", Some(r#"{"results": [{"impact": "High"}]}"#), None);

        let composer = AggregateComposer::new(&Config::default());
        let report = composer.compose(tmp.path()).unwrap();
        let written = composer.write(&report, tmp.path()).unwrap();
        assert_eq!(written.len(), 2);

        let md = fs::read_to_string(tmp.path().join(AGGREGATE_REPORT_FILE)).unwrap();
        assert!(md.contains("- [A](./A/audit-report.md)"));

        let json: AggregateReport =
            serde_json::from_str(&fs::read_to_string(tmp.path().join(AGGREGATE_JSON_FILE)).unwrap()).unwrap();
        assert_eq!(json.severity_counts.high, 1);
    }

    #[test]
    fn test_availability_in_overview() {
        let tmp = tempdir().unwrap();
        target(tmp.path(), "A", Some(r#"{"results": []}"#), None);

        let composer = AggregateComposer::new(&Config::default()).with_availability(vec![ToolAvailability {
            program: "myth".to_string(),
            tools: vec!["mythril".to_string()],
            available: false,
            version: None,
        }]);
        let report = composer.compose(tmp.path()).unwrap();
        assert_eq!(report.tool_availability.len(), 1);
        assert!(report.rendered_markdown.contains("| myth | mythril | ❌ missing | - |"));
    }

    #[test]
    fn test_missing_output_root_is_error() {
        let tmp = tempdir().unwrap();
        let result = AggregateComposer::new(&Config::default()).compose(&tmp.path().join("gone"));
        assert!(result.is_err());
    }
}
