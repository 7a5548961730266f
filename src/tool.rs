//! Runs one external analysis tool and normalizes its result.

use crate::config::{StreamMode, ToolInvocationSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Prefix of `raw_output` when a tool was killed for exceeding its timeout.
pub const TIMEOUT_MARKER: &str = "[timed out]";

/// Exit code recorded when there is none: spawn failure, timeout kill, or signal.
pub const NO_EXIT_CODE: i32 = -1;

const AUX_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

static RESULTS_FOUND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b\d+\s+results?(\(s\))?\s+found").expect("static regex"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool_name: String,
    pub exit_succeeded: bool,
    pub issues_found: bool,
    pub raw_output: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub attempts: u32,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolStatus {
    Completed,
    CompletedWithFindings,
    Failed,
    TimedOut,
}

impl ToolStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ToolStatus::Completed => "✅ completed",
            ToolStatus::CompletedWithFindings => "✅ completed (issues found)",
            ToolStatus::Failed => "❌ failed",
            ToolStatus::TimedOut => "❌ failed (timed out)",
        }
    }
}

impl ToolOutcome {
    pub fn status(&self) -> ToolStatus {
        match (self.exit_succeeded, self.issues_found, self.timed_out) {
            (_, _, true) => ToolStatus::TimedOut,
            (true, true, _) => ToolStatus::CompletedWithFindings,
            (true, false, _) => ToolStatus::Completed,
            (false, _, _) => ToolStatus::Failed,
        }
    }
}

/// Result of the installation check for one program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAvailability {
    pub program: String,
    /// Configured tools that run this program.
    pub tools: Vec<String>,
    pub available: bool,
    pub version: Option<String>,
}

/// Per-call values substituted into a tool's argument template.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub target: PathBuf,
    pub output_dir: PathBuf,
    pub artifact: Option<PathBuf>,
}

impl Invocation {
    pub fn render_args(&self, spec: &ToolInvocationSpec) -> Vec<String> {
        let artifact = self
            .artifact
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        spec.args
            .iter()
            .map(|arg| {
                arg.replace("{target}", &self.target.to_string_lossy())
                    .replace("{output_dir}", &self.output_dir.to_string_lossy())
                    .replace("{artifact}", &artifact)
                    .replace("{name}", &spec.name)
            })
            .collect()
    }
}

pub struct ToolAdapter;

impl ToolAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Run `spec` once. Never fails: spawn errors, crashes and timeouts are
    /// all reported through the returned outcome.
    pub async fn run(&self, spec: &ToolInvocationSpec, invocation: &Invocation) -> ToolOutcome {
        let args = invocation.render_args(spec);
        debug!(tool = %spec.name, program = %spec.program, ?args, "spawning tool");

        let started = Instant::now();
        let timeout = spec.timeout_seconds.map(Duration::from_secs);
        let result = execute(&spec.program, &args, timeout).await;
        let duration_ms = started.elapsed().as_millis();

        match result {
            Execution::Finished { code, stdout, stderr } => {
                let raw_output = select_output(spec.stream, &stdout, &stderr);
                let mut exit_succeeded = code == Some(0);
                let mut issues_found = false;
                if !exit_succeeded && has_findings_marker(&raw_output, &spec.findings_markers) {
                    debug!(tool = %spec.name, ?code, "nonzero exit with analysis output, treating as findings");
                    exit_succeeded = true;
                    issues_found = true;
                }
                ToolOutcome {
                    tool_name: spec.name.clone(),
                    exit_succeeded,
                    issues_found,
                    raw_output,
                    exit_code: code.unwrap_or(NO_EXIT_CODE),
                    timed_out: false,
                    attempts: 1,
                    duration_ms,
                }
            }
            Execution::TimedOut(limit) => ToolOutcome {
                tool_name: spec.name.clone(),
                exit_succeeded: false,
                issues_found: false,
                raw_output: format!(
                    "{} {} did not finish within {}s and was terminated",
                    TIMEOUT_MARKER,
                    spec.name,
                    limit.as_secs()
                ),
                exit_code: NO_EXIT_CODE,
                timed_out: true,
                attempts: 1,
                duration_ms,
            },
            Execution::SpawnFailed(e) => ToolOutcome {
                tool_name: spec.name.clone(),
                exit_succeeded: false,
                issues_found: false,
                raw_output: format!("failed to start {}: {}", spec.program, e),
                exit_code: NO_EXIT_CODE,
                timed_out: false,
                attempts: 1,
                duration_ms,
            },
        }
    }

    /// First line of a version command's output, or `None` if it fails.
    pub async fn probe_version(&self, command: &[String]) -> Option<String> {
        let (program, args) = command.split_first()?;
        match execute(program, args, Some(AUX_COMMAND_TIMEOUT)).await {
            Execution::Finished { code: Some(0), stdout, stderr } => {
                let text = if stdout.trim().is_empty() { stderr } else { stdout };
                text.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string)
            }
            _ => {
                warn!(program = %program, "version probe failed");
                None
            }
        }
    }

    /// Start `program` once to see whether it is installed. Any process that
    /// starts counts as available, whatever its exit status; the version is
    /// the first output line of a clean exit.
    pub async fn check_installed(&self, program: &str, version_args: &[String]) -> ToolAvailability {
        let (available, version) = match execute(program, version_args, Some(AUX_COMMAND_TIMEOUT)).await {
            Execution::Finished { code: Some(0), stdout, stderr } => {
                let text = if stdout.trim().is_empty() { stderr } else { stdout };
                (true, text.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string))
            }
            Execution::Finished { .. } | Execution::TimedOut(_) => (true, None),
            Execution::SpawnFailed(e) => {
                debug!(program = %program, error = %e, "program not installed");
                (false, None)
            }
        };
        ToolAvailability {
            program: program.to_string(),
            tools: Vec::new(),
            available,
            version,
        }
    }

    /// Render a DOT file to PNG with the configured diagram command.
    pub async fn render_diagram(&self, program: &str, args: &[String], input: &Path, output: &Path) -> bool {
        let args: Vec<String> = args
            .iter()
            .map(|a| {
                a.replace("{input}", &input.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
            })
            .collect();
        match execute(program, &args, Some(AUX_COMMAND_TIMEOUT)).await {
            Execution::Finished { code: Some(0), .. } => output.is_file(),
            Execution::Finished { stderr, .. } => {
                warn!(program = %program, stderr = %stderr.trim(), "diagram rendering failed");
                false
            }
            Execution::TimedOut(_) => {
                warn!(program = %program, "diagram rendering timed out");
                false
            }
            Execution::SpawnFailed(e) => {
                warn!(program = %program, error = %e, "diagram renderer unavailable");
                false
            }
        }
    }
}

impl Default for ToolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

enum Execution {
    Finished {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut(Duration),
    SpawnFailed(std::io::Error),
}

async fn execute(program: &str, args: &[String], timeout: Option<Duration>) -> Execution {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => return Execution::SpawnFailed(e),
    };

    // Dropping the wait future on timeout drops the child, which kills it.
    let waited = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => return Execution::TimedOut(limit),
        },
        None => child.wait_with_output().await,
    };

    match waited {
        Ok(output) => Execution::Finished {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        },
        Err(e) => Execution::SpawnFailed(e),
    }
}

fn select_output(mode: StreamMode, stdout: &str, stderr: &str) -> String {
    match mode {
        StreamMode::Stdout if !stdout.trim().is_empty() => stdout.to_string(),
        StreamMode::Stdout => stderr.to_string(),
        StreamMode::Combined => {
            let mut combined = stdout.to_string();
            if !stderr.is_empty() {
                if !combined.is_empty() && !combined.ends_with('\n') {
                    combined.push('\n');
                }
                combined.push_str(stderr);
            }
            combined
        }
    }
}

pub fn has_findings_marker(raw: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| !m.is_empty() && raw.contains(m.as_str())) || RESULTS_FOUND.is_match(raw)
}
