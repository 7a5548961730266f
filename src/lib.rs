pub mod aggregate;
pub mod classifier;
pub mod config;
pub mod error;
pub mod file_discovery;
pub mod heuristics;
pub mod pipeline;
pub mod reporter;
pub mod tool;
pub mod workspace;

pub use aggregate::{AggregateComposer, AggregateReport};
pub use classifier::{Finding, Severity, SeverityCounts};
pub use config::{Config, ToolInvocationSpec, ToolRole};
pub use error::AuditError;
pub use file_discovery::{AuditTarget, TargetDiscovery};
pub use pipeline::{AuditPipeline, RunSummary, TargetAuditReport};
pub use reporter::Reporter;
pub use tool::{ToolAdapter, ToolAvailability, ToolOutcome};

pub type Result<T> = anyhow::Result<T>;
