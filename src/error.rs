use std::path::PathBuf;
use thiserror::Error;

/// Filesystem and setup failures. Only `OutputRoot`, `ContractRoot` and
/// `OutputOverlapsSources` abort a run; the rest are scoped to one target.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("cannot prepare output root {path}: {source}")]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output root {0} is not a directory")]
    OutputRootNotDir(PathBuf),

    #[error("contract root {path} is not readable: {reason}")]
    ContractRoot { path: PathBuf, reason: String },

    #[error("output root {output} overlaps contract sources in {contracts}; refusing to wipe it")]
    OutputOverlapsSources { output: PathBuf, contracts: PathBuf },

    #[error("cannot create target directory {path}: {source}")]
    TargetDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuditError {
    /// Whether the error should stop the whole run rather than a single target.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuditError::OutputRoot { .. }
                | AuditError::OutputRootNotDir(_)
                | AuditError::ContractRoot { .. }
                | AuditError::OutputOverlapsSources { .. }
        )
    }
}

/// Structured findings could not be read; always recovered with the text fallback.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("structured artifact {0} is missing")]
    Missing(PathBuf),

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} has no recognizable results field")]
    Schema(PathBuf),
}
