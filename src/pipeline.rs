use crate::{
    aggregate::{AggregateComposer, AggregateReport},
    classifier::{self, Finding, Severity, SeverityCounts},
    config::{Config, ToolInvocationSpec, ToolRole},
    error::AuditError,
    file_discovery::{AuditTarget, TargetDiscovery},
    heuristics::{self, TextHeuristic},
    reporter::{ReportContext, Reporter},
    tool::{Invocation, ToolAdapter, ToolAvailability, ToolOutcome, NO_EXIT_CODE},
    workspace,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const TARGET_REPORT_FILE: &str = "audit-report.md";

#[derive(Debug, Clone, Serialize)]
pub struct TargetAuditReport {
    pub target: AuditTarget,
    pub outcomes: Vec<ToolOutcome>,
    /// Primary analyzer findings from its structured artifact.
    pub findings: Vec<Finding>,
    pub lint_findings: Vec<Finding>,
    /// Set when the structured artifact could not be parsed and the text fallback ran.
    pub heuristic_counts: Option<SeverityCounts>,
    /// Names of tools whose diagram was rendered to `<name>.png`.
    pub diagrams: Vec<String>,
    #[serde(skip)]
    pub rendered_markdown: String,
}

impl TargetAuditReport {
    pub fn failed_tools(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.exit_succeeded)
            .map(|o| o.tool_name.as_str())
            .collect()
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub targets: usize,
    pub reports: Vec<PathBuf>,
    pub failed_targets: Vec<(String, String)>,
    pub tool_availability: Vec<ToolAvailability>,
    pub aggregate: AggregateReport,
}

/// Runs every configured tool over every target, one at a time.
///
/// Targets and tools are processed sequentially: symbolic execution tools
/// are heavy enough that concurrent runs exhaust memory and turn timeouts
/// nondeterministic.
pub struct AuditPipeline {
    config: Config,
    output_root: PathBuf,
    adapter: ToolAdapter,
    heuristic: Box<dyn TextHeuristic>,
    reporter: Reporter,
    compiler_version: Option<String>,
}

impl AuditPipeline {
    pub fn new(config: Config) -> Self {
        let output_root = workspace::absolute(&config.output_root);
        let heuristic = heuristics::from_config(&config.heuristics);

        Self {
            config,
            output_root,
            adapter: ToolAdapter::new(),
            heuristic,
            reporter: Reporter::new(),
            compiler_version: None,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Full run: discover, reset the output root, audit each target, aggregate.
    ///
    /// Only setup failures are returned as errors; tool failures and
    /// per-target filesystem failures are recorded and the run continues.
    pub async fn run(&mut self, contract_root: &Path) -> Result<RunSummary, AuditError> {
        workspace::guard_overlap(contract_root, &self.output_root)?;

        println!("🔍 Discovering contracts in {}...", contract_root.display());
        let targets = TargetDiscovery::new(&self.config).discover(contract_root)?;
        println!("  Found {} contract(s)", targets.len());

        workspace::prepare(&self.output_root)?;

        println!("🧰 Checking tool installation...");
        let tool_availability = self.check_tools().await;
        for availability in &tool_availability {
            if availability.available {
                println!(
                    "  ✅ {} {}",
                    availability.program,
                    availability.version.as_deref().unwrap_or("(version unknown)")
                );
            } else {
                println!("  ❌ {} not found (used by {})", availability.program, availability.tools.join(", "));
            }
        }

        if let Some(command) = self.config.compiler_version_command.clone() {
            self.compiler_version = self.adapter.probe_version(&command).await;
        }
        if let Some(version) = &self.compiler_version {
            println!("🔧 Compiler: {}", version);
        }

        let mut reports = Vec::new();
        let mut failed_targets = Vec::new();

        for (i, target) in targets.iter().enumerate() {
            println!("\n========== [{}/{}] {} ==========", i + 1, targets.len(), target.relative_path);
            match self.audit(target).await {
                Ok(report) => {
                    let failed = report.failed_tools();
                    if failed.is_empty() {
                        println!("  ✅ All tools completed");
                    } else {
                        println!("  ⚠️  Failed tools: {}", failed.join(", "));
                    }
                    reports.push(self.output_root.join(&target.sanitized_id).join(TARGET_REPORT_FILE));
                }
                Err(e) => {
                    error!(target = %target.relative_path, error = %e, "target skipped");
                    println!("  ❌ Skipped: {}", e);
                    failed_targets.push((target.relative_path.clone(), e.to_string()));
                }
            }
        }

        println!("\n📊 Composing aggregate report...");
        let composer = AggregateComposer::new(&self.config).with_availability(tool_availability.clone());
        let aggregate = composer.compose(&self.output_root)?;
        composer.write(&aggregate, &self.output_root)?;

        Ok(RunSummary {
            targets: targets.len(),
            reports,
            failed_targets,
            tool_availability,
            aggregate,
        })
    }

    /// Installation check, once per distinct program in declared order.
    /// Missing programs are reported, not fatal: their tools fail per target.
    pub async fn check_tools(&self) -> Vec<ToolAvailability> {
        let mut checked: Vec<ToolAvailability> = Vec::new();
        for spec in &self.config.tools {
            if let Some(existing) = checked.iter_mut().find(|a| a.program == spec.program) {
                existing.tools.push(spec.name.clone());
                continue;
            }
            let mut availability = self.adapter.check_installed(&spec.program, &spec.version_args).await;
            if !availability.available {
                warn!(program = %spec.program, tool = %spec.name, "tool program not installed");
            }
            availability.tools.push(spec.name.clone());
            checked.push(availability);
        }
        checked
    }

    /// Audit one target. Only failure to create its output directory is an error.
    pub async fn audit(&self, target: &AuditTarget) -> Result<TargetAuditReport, AuditError> {
        let dir = workspace::target_dir(&self.output_root, target)?;

        let mut outcomes = Vec::with_capacity(self.config.tools.len());
        let mut diagrams = Vec::new();

        for spec in &self.config.tools {
            println!("  ▶ {}", spec.name);
            let artifact = spec.structured_artifact_name().map(|name| dir.join(name));
            let invocation = Invocation {
                target: target.absolute_path.clone(),
                output_dir: dir.clone(),
                artifact: artifact.clone(),
            };

            let outcome = self.run_with_retry(spec, &invocation).await;
            write_artifact(&dir.join(spec.raw_artifact_name()), &outcome.raw_output);

            if !outcome.exit_succeeded {
                warn!(
                    target = %target.relative_path,
                    tool = %spec.name,
                    code = outcome.exit_code,
                    timed_out = outcome.timed_out,
                    "tool failed"
                );
            }

            if let Some(path) = &artifact {
                if !path.exists() {
                    write_artifact(path, classifier::PLACEHOLDER_ARTIFACT);
                }
            }

            if spec.role == ToolRole::Visualizer && outcome.exit_succeeded && self.render_diagram(spec, &dir, &outcome).await {
                diagrams.push(spec.name.clone());
            }

            outcomes.push(outcome);
        }

        let (findings, heuristic_counts) = self.primary_findings(&dir, &outcomes);
        let lint_findings = lint_findings(&self.config.tools, &outcomes);

        let mut report = TargetAuditReport {
            target: target.clone(),
            outcomes,
            findings,
            lint_findings,
            heuristic_counts,
            diagrams,
            rendered_markdown: String::new(),
        };

        let context = ReportContext {
            generated_at: chrono::Utc::now().to_rfc3339(),
            compiler_version: self.compiler_version.as_deref(),
            tools: &self.config.tools,
            estimate_method: self.heuristic.name(),
        };
        report.rendered_markdown = self.reporter.render_target_report(&report, &context);
        write_artifact(&dir.join(TARGET_REPORT_FILE), &report.rendered_markdown);

        Ok(report)
    }

    async fn run_with_retry(&self, spec: &ToolInvocationSpec, invocation: &Invocation) -> ToolOutcome {
        let policy = &self.config.retry;
        let mut attempt = 1;

        loop {
            let mut outcome = self.adapter.run(spec, invocation).await;
            outcome.attempts = attempt;

            let retryable = !outcome.exit_succeeded && (!outcome.timed_out || policy.retry_timeouts);
            if !retryable || attempt >= policy.max_attempts {
                return outcome;
            }

            info!(tool = %spec.name, attempt, max = policy.max_attempts, "retrying failed tool");
            if policy.backoff_seconds > 0 {
                tokio::time::sleep(Duration::from_secs(policy.backoff_seconds)).await;
            }
            // some analyzers refuse to overwrite an existing JSON file
            if let Some(path) = &invocation.artifact {
                if let Err(e) = fs::remove_file(path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "cannot remove artifact before retry");
                    }
                }
            }
            attempt += 1;
        }
    }

    async fn render_diagram(&self, spec: &ToolInvocationSpec, dir: &Path, outcome: &ToolOutcome) -> bool {
        let Some(diagram) = &spec.diagram else {
            return false;
        };
        if outcome.raw_output.trim().is_empty() {
            return false;
        }

        let dot = dir.join(format!("{}.dot", spec.name));
        let png = dir.join(format!("{}.png", spec.name));
        if !write_artifact(&dot, &outcome.raw_output) {
            return false;
        }
        self.adapter.render_diagram(&diagram.program, &diagram.args, &dot, &png).await
    }

    fn primary_findings(&self, dir: &Path, outcomes: &[ToolOutcome]) -> (Vec<Finding>, Option<SeverityCounts>) {
        let Some(primary) = self.config.primary_analyzer() else {
            return (Vec::new(), None);
        };
        let Some(artifact) = primary.structured_artifact_name() else {
            return (Vec::new(), None);
        };

        match classifier::parse_structured(&dir.join(artifact)) {
            Ok(structured) => {
                debug!(tool = %primary.name, entries = structured.len(), "parsed structured findings");
                (classifier::classify(Some(&structured), &primary.name), None)
            }
            Err(e) => {
                warn!(tool = %primary.name, error = %e, "structured findings unavailable, using text fallback");
                let mut counts = SeverityCounts::default();
                if let Some(outcome) = outcomes.iter().find(|o| o.tool_name == primary.name) {
                    self.heuristic.classify_text(&outcome.raw_output, &mut counts);
                }
                (Vec::new(), Some(counts))
            }
        }
    }
}

fn lint_findings(tools: &[ToolInvocationSpec], outcomes: &[ToolOutcome]) -> Vec<Finding> {
    tools
        .iter()
        .zip(outcomes)
        // linters exit nonzero when they report errors; only skip runs that produced nothing
        .filter(|(spec, outcome)| {
            spec.role == ToolRole::Linter && !outcome.timed_out && outcome.exit_code != NO_EXIT_CODE
        })
        .flat_map(|(spec, outcome)| {
            outcome
                .raw_output
                .lines()
                .filter(|line| line.contains("Error") || line.contains("Warning"))
                .map(|line| Finding {
                    description: line.trim().to_string(),
                    severity: Severity::Unknown,
                    source_tool: spec.name.clone(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

// Artifact writes are best effort; a missing file is handled downstream.
fn write_artifact(path: &Path, content: &str) -> bool {
    match fs::write(path, content) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot write artifact");
            false
        }
    }
}
