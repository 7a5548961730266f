use crate::error::AuditError;
use crate::file_discovery::AuditTarget;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PrepareSummary {
    pub created: bool,
    pub removed: usize,
    pub failed: usize,
}

/// Reset `output_root` for a fresh run.
///
/// **Destructive:** every file and directory inside an existing root is
/// deleted; only the root entry itself is kept. A missing root is created
/// together with its parents. An entry that cannot be removed is logged and
/// skipped. Only failing to establish the root is an error.
pub fn prepare(output_root: &Path) -> Result<PrepareSummary, AuditError> {
    let mut summary = PrepareSummary::default();

    match fs::symlink_metadata(output_root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(AuditError::OutputRootNotDir(output_root.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir_all(output_root).map_err(|source| AuditError::OutputRoot {
                path: output_root.to_path_buf(),
                source,
            })?;
            println!("📁 Created output directory: {}", output_root.display());
            summary.created = true;
            return Ok(summary);
        }
        Err(source) => {
            return Err(AuditError::OutputRoot {
                path: output_root.to_path_buf(),
                source,
            })
        }
    }

    let entries = fs::read_dir(output_root).map_err(|source| AuditError::OutputRoot {
        path: output_root.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %output_root.display(), error = %e, "cannot read output directory entry");
                summary.failed += 1;
                continue;
            }
        };

        let path = entry.path();
        match remove_entry(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed stale artifact");
                summary.removed += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot remove stale artifact, continuing");
                summary.failed += 1;
            }
        }
    }

    println!(
        "🧹 Cleared {} old entries from {}",
        summary.removed,
        output_root.display()
    );
    Ok(summary)
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    // symlink_metadata so a link to a directory is unlinked, not followed
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Create the per-target output directory.
pub fn target_dir(output_root: &Path, target: &AuditTarget) -> Result<PathBuf, AuditError> {
    let dir = output_root.join(&target.sanitized_id);
    fs::create_dir_all(&dir).map_err(|source| AuditError::TargetDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

/// Refuse output roots that would wipe the contract sources.
pub fn guard_overlap(contract_root: &Path, output_root: &Path) -> Result<(), AuditError> {
    let contracts = absolute(contract_root);
    let output = absolute(output_root);

    if contracts.starts_with(&output) {
        return Err(AuditError::OutputOverlapsSources { output, contracts });
    }
    Ok(())
}

/// Canonical path when it exists, otherwise joined onto the current directory.
pub fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_prepare_creates_missing_root() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("a").join("b");

        let summary = prepare(&root).unwrap();
        assert!(summary.created);
        assert!(root.is_dir());
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("out");
        fs::create_dir_all(root.join("Old").join("deep")).unwrap();
        fs::write(root.join("Old").join("deep").join("x.txt"), "x").unwrap();
        fs::write(root.join("comprehensive-audit-report.md"), "old").unwrap();

        let first = prepare(&root).unwrap();
        assert_eq!(first.removed, 2);
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);

        let second = prepare(&root).unwrap();
        assert_eq!(second, PrepareSummary::default());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
        assert!(root.is_dir());
    }

    #[test]
    fn test_prepare_rejects_file_root() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();

        let err = prepare(&file).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_guard_overlap() {
        let tmp = tempdir().unwrap();
        let contracts = tmp.path().join("contracts");
        fs::create_dir_all(&contracts).unwrap();

        assert!(guard_overlap(&contracts, &tmp.path().join("reports")).is_ok());
        assert!(guard_overlap(&contracts, &contracts).is_err());
        assert!(guard_overlap(&contracts, tmp.path()).is_err());
        // reports nested under the sources are fine: nothing above them is wiped
        assert!(guard_overlap(&contracts, &contracts.join("reports")).is_ok());
    }
}
