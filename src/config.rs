use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::{env, path::{Path, PathBuf}};

pub const DEFAULT_FINDINGS_MARKERS: &[&str] = &["analyzed", "result(s) found", "results found"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub contract_root: PathBuf,
    pub output_root: PathBuf,
    pub source_extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    /// Command whose first output line is shown as the compiler version in reports.
    pub compiler_version_command: Option<Vec<String>>,
    pub retry: RetryConfig,
    pub heuristics: HeuristicsConfig,
    pub tools: Vec<ToolInvocationSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_seconds: u64,
    pub retry_timeouts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicsConfig {
    pub enabled: bool,
    pub count_mode: CountMode,
    pub escalation: EscalationMode,
    pub high_markers: Vec<String>,
    pub medium_markers: Vec<String>,
    pub low_markers: Vec<String>,
    pub escalation_keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountMode {
    /// Each marker adds one when it appears anywhere in the text.
    Presence,
    /// Every occurrence of a marker adds one.
    Occurrences,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationMode {
    Off,
    /// One High when any escalation keyword appears.
    Any,
    /// One High per occurrence of every escalation keyword.
    Each,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolRole {
    Analyzer,
    SymbolicExecution,
    Linter,
    Visualizer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamMode {
    /// Stdout, or stderr when the tool wrote nothing to stdout.
    Stdout,
    Combined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationSpec {
    pub name: String,
    pub role: ToolRole,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub structured_artifact: Option<String>,
    #[serde(default = "default_findings_markers")]
    pub findings_markers: Vec<String>,
    #[serde(default = "default_stream")]
    pub stream: StreamMode,
    #[serde(default)]
    pub diagram: Option<DiagramSpec>,
    /// Arguments for the installation check before a run.
    #[serde(default = "default_version_args")]
    pub version_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramSpec {
    pub program: String,
    pub args: Vec<String>,
}

fn default_findings_markers() -> Vec<String> {
    DEFAULT_FINDINGS_MARKERS.iter().map(|s| s.to_string()).collect()
}

fn default_version_args() -> Vec<String> {
    strings(&["--version"])
}

fn default_stream() -> StreamMode {
    StreamMode::Stdout
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_seconds: 0,
            retry_timeouts: false,
        }
    }
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count_mode: CountMode::Presence,
            escalation: EscalationMode::Any,
            high_markers: strings(&["high severity"]),
            medium_markers: strings(&["medium severity"]),
            low_markers: strings(&["low severity"]),
            escalation_keywords: strings(&["arbitrary user", "sends eth to arbitrary", "Reentrancy"]),
        }
    }
}

impl Default for DiagramSpec {
    fn default() -> Self {
        Self {
            program: "dot".to_string(),
            args: strings(&["-Tpng", "{input}", "-o", "{output}"]),
        }
    }
}

impl ToolInvocationSpec {
    pub fn new(name: &str, role: ToolRole, program: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            role,
            program: program.to_string(),
            args: strings(args),
            timeout_seconds: None,
            structured_artifact: None,
            findings_markers: default_findings_markers(),
            stream: StreamMode::Stdout,
            diagram: None,
            version_args: default_version_args(),
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_diagram(mut self) -> Self {
        self.diagram = Some(DiagramSpec::default());
        self
    }

    /// File name of the raw text artifact, e.g. `slither-output.txt`.
    pub fn raw_artifact_name(&self) -> String {
        format!("{}-output.txt", self.name)
    }

    /// File name of the structured artifact. Analyzer tools always have one.
    pub fn structured_artifact_name(&self) -> Option<String> {
        match (&self.structured_artifact, self.role) {
            (Some(name), _) => Some(name.clone()),
            (None, ToolRole::Analyzer) => Some(format!("{}-output.json", self.name)),
            (None, _) => None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            contract_root: PathBuf::from("./contracts"),
            output_root: PathBuf::from("./audit-reports"),
            source_extensions: strings(&["sol"]),
            exclude_dirs: strings(&["node_modules"]),
            compiler_version_command: Some(strings(&["solc", "--version"])),
            retry: RetryConfig::default(),
            heuristics: HeuristicsConfig::default(),
            tools: default_tools(),
        }
    }
}

pub fn default_tools() -> Vec<ToolInvocationSpec> {
    vec![
        ToolInvocationSpec::new("slither", ToolRole::Analyzer, "slither", &["{target}", "--json", "{artifact}"]),
        ToolInvocationSpec::new(
            "mythril",
            ToolRole::SymbolicExecution,
            "myth",
            &["analyze", "{target}", "-o", "markdown", "--max-depth", "10"],
        )
        .with_timeout(300),
        ToolInvocationSpec::new("solhint", ToolRole::Linter, "solhint", &["{target}"]),
        ToolInvocationSpec::new("surya-describe", ToolRole::Visualizer, "surya", &["describe", "{target}"]),
        ToolInvocationSpec::new("surya-graph", ToolRole::Visualizer, "surya", &["graph", "{target}"]).with_diagram(),
        ToolInvocationSpec::new("surya-inheritance", ToolRole::Visualizer, "surya", &["inheritance", "{target}"])
            .with_diagram(),
    ]
}

impl Config {
    /// Get the default config file path (~/.contract-audit.toml)
    pub fn default_config_path() -> crate::Result<PathBuf> {
        let home_dir = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(PathBuf::from(home_dir).join(".contract-audit.toml"))
    }

    /// Load config from the default path, falling back to defaults if the file doesn't exist
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::default_config_path()?;

        let config = if config_path.exists() {
            println!("📝 Loading configuration from: {}", config_path.display());
            Self::from_file(&config_path)?
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Load config from a specific file path
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a file
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                anyhow::bail!("tool names must not be empty");
            }
            if tool.name.contains(['/', '\\']) {
                anyhow::bail!("tool name '{}' must not contain path separators", tool.name);
            }
            if tool.program.trim().is_empty() {
                anyhow::bail!("tool '{}' has an empty program", tool.name);
            }
            if !seen.insert(tool.name.as_str()) {
                anyhow::bail!("tool '{}' is declared more than once", tool.name);
            }
        }

        Ok(())
    }

    /// The first `Analyzer` in declared order; its artifacts feed the aggregate tally.
    pub fn primary_analyzer(&self) -> Option<&ToolInvocationSpec> {
        self.tools.iter().find(|t| t.role == ToolRole::Analyzer)
    }

    /// Create a config file with all available options documented
    pub fn create_documented_config() -> String {
        r#"# contract-audit configuration file
# Command-line arguments for the contract and output roots override these values.

# Directory scanned for contract sources
contract_root = "./contracts"

# Directory receiving reports. WARNING: its contents are deleted at the start of every run.
output_root = "./audit-reports"

# Source file extensions to audit
source_extensions = ["sol"]

# Directory names skipped anywhere in the tree
exclude_dirs = ["node_modules"]

# First line of this command's output is shown as the compiler version
compiler_version_command = ["solc", "--version"]

[retry]
# Total attempts per tool (1 = no retry)
max_attempts = 1
# Pause between attempts
backoff_seconds = 0
# Whether a timed-out tool is retried
retry_timeouts = false

[heuristics]
# Text fallback used when a structured findings file is missing or malformed.
# Counts are approximate and never deduplicated.
enabled = true
# "presence": each marker counts once per file; "occurrences": every hit counts
count_mode = "presence"
# "off", "any" (one High if any keyword appears) or "each" (one High per hit)
escalation = "any"
high_markers = ["high severity"]
medium_markers = ["medium severity"]
low_markers = ["low severity"]
escalation_keywords = ["arbitrary user", "sends eth to arbitrary", "Reentrancy"]

# Tools run in declared order. Placeholders in args:
#   {target}      absolute path of the contract
#   {output_dir}  absolute path of the contract's report directory
#   {artifact}    absolute path of the tool's structured artifact
#   {name}        tool name
# Roles: Analyzer, SymbolicExecution, Linter, Visualizer.
# The first Analyzer is the primary analyzer used for severity counts.
# Before a run each distinct program is started once with `version_args`
# (default ["--version"]) to report which tools are installed.

[[tools]]
name = "slither"
role = "Analyzer"
program = "slither"
args = ["{target}", "--json", "{artifact}"]

[[tools]]
name = "mythril"
role = "SymbolicExecution"
program = "myth"
args = ["analyze", "{target}", "-o", "markdown", "--max-depth", "10"]
timeout_seconds = 300

[[tools]]
name = "solhint"
role = "Linter"
program = "solhint"
args = ["{target}"]

[[tools]]
name = "surya-describe"
role = "Visualizer"
program = "surya"
args = ["describe", "{target}"]

[[tools]]
name = "surya-graph"
role = "Visualizer"
program = "surya"
args = ["graph", "{target}"]
diagram = { program = "dot", args = ["-Tpng", "{input}", "-o", "{output}"] }

[[tools]]
name = "surya-inheritance"
role = "Visualizer"
program = "surya"
args = ["inheritance", "{target}"]
diagram = { program = "dot", args = ["-Tpng", "{input}", "-o", "{output}"] }
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_config_parses_to_defaults() {
        let config: Config = toml::from_str(&Config::create_documented_config()).unwrap();
        config.validate().unwrap();

        let defaults = Config::default();
        assert_eq!(config.tools.len(), defaults.tools.len());
        assert_eq!(config.primary_analyzer().unwrap().name, "slither");
        assert_eq!(config.tools[1].timeout_seconds, Some(300));
        assert!(config.tools[4].diagram.is_some());
        assert_eq!(config.heuristics.escalation, EscalationMode::Any);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str("output_root = \"out\"\n[retry]\nmax_attempts = 3\n").unwrap();
        assert_eq!(config.output_root, PathBuf::from("out"));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(!config.retry.retry_timeouts);
        assert_eq!(config.source_extensions, vec!["sol".to_string()]);
    }

    #[test]
    fn test_validate_rejects_duplicates_and_zero_attempts() {
        let mut config = Config::default();
        config.tools.push(config.tools[0].clone());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_artifact_names() {
        let slither = &default_tools()[0];
        assert_eq!(slither.raw_artifact_name(), "slither-output.txt");
        assert_eq!(slither.structured_artifact_name().as_deref(), Some("slither-output.json"));

        let solhint = &default_tools()[2];
        assert_eq!(solhint.structured_artifact_name(), None);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.toml");
        Config::default().to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.tools.len(), 6);
    }
}
