use crate::{
    aggregate::AggregateReport,
    classifier::{Finding, SeverityCounts},
    config::{ToolInvocationSpec, ToolRole},
    pipeline::{TargetAuditReport, TARGET_REPORT_FILE},
};

pub struct ReportContext<'a> {
    pub generated_at: String,
    pub compiler_version: Option<&'a str>,
    pub tools: &'a [ToolInvocationSpec],
    /// Name of the text heuristic used when structured results are unavailable.
    pub estimate_method: &'a str,
}

pub struct Reporter;

impl Reporter {
    pub fn new() -> Self {
        Self
    }

    pub fn render_target_report(&self, report: &TargetAuditReport, context: &ReportContext) -> String {
        let mut md = format!(
            "# {} Smart Contract Audit Report\n\n",
            report.target.contract_name()
        );

        md.push_str("## Overview\n\n");
        md.push_str(&format!("- **Contract:** {}\n", report.target.relative_path));
        md.push_str(&format!("- **Audit date:** {}\n", context.generated_at));
        md.push_str(&format!(
            "- **Compiler version:** {}\n",
            context.compiler_version.unwrap_or("unknown")
        ));
        md.push_str(&format!("- **Tools run:** {}\n\n", report.outcomes.len()));

        md.push_str(&self.generate_completion_matrix(report, context.tools));
        md.push_str(&self.generate_diagrams_section(&report.diagrams));
        md.push_str(&self.generate_findings_section(report, context));
        md.push_str(&self.generate_raw_output_section(report, context.tools));

        md
    }

    fn generate_completion_matrix(&self, report: &TargetAuditReport, tools: &[ToolInvocationSpec]) -> String {
        let mut md = String::from("## Tool Results\n\n");
        md.push_str("| Tool | Role | Status | Exit code | Attempts | Duration |\n");
        md.push_str("|------|------|--------|-----------|----------|----------|\n");

        for outcome in &report.outcomes {
            let role = tools
                .iter()
                .find(|t| t.name == outcome.tool_name)
                .map(|t| role_label(t.role))
                .unwrap_or("-");
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {:.1}s |\n",
                outcome.tool_name,
                role,
                outcome.status().label(),
                outcome.exit_code,
                outcome.attempts,
                outcome.duration_ms as f64 / 1000.0
            ));
        }
        md.push('\n');

        let failures: Vec<_> = report.outcomes.iter().filter(|o| !o.exit_succeeded).collect();
        if !failures.is_empty() {
            md.push_str("### Failures\n\n");
            for outcome in failures {
                let first_line = outcome
                    .raw_output
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .unwrap_or("(no output)");
                md.push_str(&format!(
                    "- **{}** {}: `{}`\n",
                    outcome.tool_name,
                    outcome.status().label(),
                    first_line.replace('`', "'")
                ));
            }
            md.push('\n');
        }

        md
    }

    fn generate_diagrams_section(&self, diagrams: &[String]) -> String {
        if diagrams.is_empty() {
            return String::new();
        }

        let mut md = String::from("## Diagrams\n\n");
        for name in diagrams {
            md.push_str(&format!("### {}\n\n![{}](./{}.png)\n\n", name, name, name));
        }
        md
    }

    fn generate_findings_section(&self, report: &TargetAuditReport, context: &ReportContext) -> String {
        let tools = context.tools;
        let mut md = String::from("## Findings Summary\n\n");
        let primary = tools.iter().find(|t| t.role == ToolRole::Analyzer);

        match primary {
            None => md.push_str("No primary analyzer is configured.\n\n"),
            Some(primary) => {
                md.push_str(&format!("### {} findings\n\n", primary.name));
                let primary_failed = report
                    .outcomes
                    .iter()
                    .any(|o| o.tool_name == primary.name && !o.exit_succeeded);

                if let Some(counts) = &report.heuristic_counts {
                    md.push_str(&format!(
                        "Structured results could not be parsed. Estimate from raw output by {} matching (approximate, not deduplicated): {}\n\n",
                        context.estimate_method,
                        format_counts(counts)
                    ));
                } else if primary_failed {
                    md.push_str(&format!("{} failed; no findings were produced.\n\n", primary.name));
                } else if report.findings.is_empty() {
                    md.push_str("No issues found.\n\n");
                } else {
                    md.push_str(&format!(
                        "{}\n\n",
                        format_counts(&SeverityCounts::from_findings(&report.findings))
                    ));
                    md.push_str(&format_findings(&report.findings, true));
                }
            }
        }

        let linters: Vec<_> = tools.iter().filter(|t| t.role == ToolRole::Linter).collect();
        for linter in linters {
            md.push_str(&format!("### {} issues\n\n", linter.name));
            let issues: Vec<Finding> = report
                .lint_findings
                .iter()
                .filter(|f| f.source_tool == linter.name)
                .cloned()
                .collect();
            if issues.is_empty() {
                md.push_str("No issues found.\n\n");
            } else {
                md.push_str(&format_findings(&issues, false));
            }
        }

        md
    }

    fn generate_raw_output_section(&self, report: &TargetAuditReport, tools: &[ToolInvocationSpec]) -> String {
        let Some(primary) = tools.iter().find(|t| t.role == ToolRole::Analyzer) else {
            return String::new();
        };
        let Some(outcome) = report.outcomes.iter().find(|o| o.tool_name == primary.name) else {
            return String::new();
        };

        format!(
            "## Full Output\n\n### {} raw output\n\n{}\n",
            primary.name,
            fenced(&outcome.raw_output)
        )
    }

    pub fn render_aggregate(&self, report: &AggregateReport) -> String {
        let mut md = String::from("# Comprehensive Smart Contract Audit Report\n\n");

        md.push_str("## Overview\n\n");
        md.push_str(&format!("- **Generated:** {}\n", report.generated_at));
        md.push_str(&format!("- **Contracts audited:** {}\n", report.target_ids.len()));
        if let Some(primary) = &report.primary_tool {
            md.push_str(&format!("- **Severity source:** {}\n", primary));
        }
        md.push('\n');

        if !report.tool_availability.is_empty() {
            md.push_str("### Tool Installation\n\n");
            md.push_str("| Program | Used by | Status | Version |\n");
            md.push_str("|---------|---------|--------|---------|\n");
            for availability in &report.tool_availability {
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    availability.program,
                    availability.tools.join(", "),
                    if availability.available { "✅ installed" } else { "❌ missing" },
                    availability.version.as_deref().unwrap_or("-")
                ));
            }
            md.push('\n');
        }

        md.push_str("## Audited Contracts\n\n");
        if report.target_ids.is_empty() {
            md.push_str("No contracts were audited.\n");
        }
        for id in &report.target_ids {
            md.push_str(&format!("- [{}](./{}/{})\n", id, id, TARGET_REPORT_FILE));
        }
        md.push('\n');

        md.push_str("## Issue Totals\n\n");
        md.push_str("| Severity | Count |\n|----------|-------|\n");
        md.push_str(&format!("| High | {} |\n", report.severity_counts.high));
        md.push_str(&format!("| Medium | {} |\n", report.severity_counts.medium));
        md.push_str(&format!("| Low | {} |\n\n", report.severity_counts.low));

        if !report.fallback_targets.is_empty() {
            md.push_str("### Estimated counts\n\n");
            md.push_str(
                "Structured results were unavailable for the contracts below; their counts come from keyword matching over raw output and may overcount.\n\n",
            );
            for id in &report.fallback_targets {
                md.push_str(&format!("- {}\n", id));
            }
            md.push('\n');
        }

        md
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

fn role_label(role: ToolRole) -> &'static str {
    match role {
        ToolRole::Analyzer => "static analysis",
        ToolRole::SymbolicExecution => "symbolic execution",
        ToolRole::Linter => "linting",
        ToolRole::Visualizer => "visualization",
    }
}

fn format_counts(counts: &SeverityCounts) -> String {
    format!(
        "High: {}, Medium: {}, Low: {}, Unknown: {}",
        counts.high, counts.medium, counts.low, counts.unknown
    )
}

fn format_findings(findings: &[Finding], with_severity: bool) -> String {
    let mut md = String::new();
    for finding in findings {
        let description = finding.description.split_whitespace().collect::<Vec<_>>().join(" ");
        if with_severity {
            md.push_str(&format!("- **[{}]** {}\n", finding.severity, description));
        } else {
            md.push_str(&format!("- {}\n", description));
        }
    }
    md.push('\n');
    md
}

/// Code fence longer than any backtick run inside `content`.
fn fenced(content: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    let fence = "`".repeat(longest.max(2) + 1);
    let body = content.trim_end_matches('\n');
    format!("{}text\n{}\n{}\n", fence, body, fence)
}
