use crate::config::Config;
use crate::error::AuditError;
use ignore::{DirEntry, WalkBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTarget {
    pub absolute_path: PathBuf,
    /// Path below the contract root, always `/`-separated.
    pub relative_path: String,
    /// Output subdirectory name, unique within one run.
    pub sanitized_id: String,
}

impl AuditTarget {
    /// File name without the source extension, e.g. `Vault` for `core/Vault.sol`.
    pub fn contract_name(&self) -> String {
        self.absolute_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.sanitized_id.clone())
    }
}

pub struct TargetDiscovery {
    extensions: Vec<String>,
    exclude_dirs: HashSet<String>,
}

impl TargetDiscovery {
    pub fn new(config: &Config) -> Self {
        Self {
            extensions: config
                .source_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_dirs: config.exclude_dirs.iter().cloned().collect(),
        }
    }

    /// Enumerate audit targets sorted by relative path.
    ///
    /// Symbolic links are not followed, so the walk cannot cycle. Only an
    /// unusable root is an error; unreadable entries below it are logged and
    /// skipped.
    pub fn discover(&self, contract_root: &Path) -> Result<Vec<AuditTarget>, AuditError> {
        if !contract_root.is_dir() {
            return Err(AuditError::ContractRoot {
                path: contract_root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        let root = contract_root.canonicalize().map_err(|e| AuditError::ContractRoot {
            path: contract_root.to_path_buf(),
            reason: e.to_string(),
        })?;

        let excluded = self.exclude_dirs.clone();
        let mut walker_builder = WalkBuilder::new(&root);
        walker_builder
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                let name = entry.file_name().to_string_lossy();
                !(is_dir && excluded.contains(&*name))
            });

        let mut found = Vec::new();
        for result in walker_builder.build() {
            let Some(entry) = readable_entry(result) else {
                continue;
            };
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file || !self.has_source_extension(entry.path()) {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            found.push((relative_string(relative), entry.path().to_path_buf()));
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));

        let mut used = HashSet::new();
        let targets = found
            .into_iter()
            .map(|(relative_path, absolute_path)| {
                let sanitized_id = unique_id(sanitize(&relative_path), &mut used);
                AuditTarget {
                    absolute_path,
                    relative_path,
                    sanitized_id,
                }
            })
            .collect();

        Ok(targets)
    }

    fn has_source_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }
}

fn readable_entry(result: Result<DirEntry, ignore::Error>) -> Option<DirEntry> {
    match result {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(error = %e, "skipping unreadable entry during discovery");
            None
        }
    }
}

fn relative_string(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// `core/Vault.sol` -> `core_Vault`.
pub fn sanitize(relative_path: &str) -> String {
    let stem = match relative_path.rfind('.') {
        Some(dot) if dot > relative_path.rfind('/').map(|s| s + 1).unwrap_or(0) => &relative_path[..dot],
        _ => relative_path,
    };
    stem.replace(['/', '\\'], "_")
}

// Later collisions get -2, -3, ...; inputs arrive sorted so the result is deterministic.
fn unique_id(base: String, used: &mut HashSet<String>) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "pragma solidity ^0.8.20;").unwrap();
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Token.sol"), "Token");
        assert_eq!(sanitize("core/vault/Vault.sol"), "core_vault_Vault");
        assert_eq!(sanitize("v1.2/Token"), "v1.2_Token");
        assert_eq!(sanitize(".hidden"), ".hidden");
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        touch(root, "b/Zeta.sol");
        touch(root, "Alpha.sol");
        touch(root, "a/Beta.SOL");
        touch(root, "node_modules/@oz/ERC20.sol");
        touch(root, "a/node_modules/Dep.sol");
        touch(root, "notes.md");

        let discovery = TargetDiscovery::new(&Config::default());
        let targets = discovery.discover(root).unwrap();
        let rels: Vec<_> = targets.iter().map(|t| t.relative_path.as_str()).collect();

        assert_eq!(rels, vec!["Alpha.sol", "a/Beta.SOL", "b/Zeta.sol"]);
        assert!(rels.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(targets[1].sanitized_id, "a_Beta");
        assert!(targets.iter().all(|t| t.absolute_path.is_absolute()));

        let again = discovery.discover(root).unwrap();
        assert_eq!(targets, again);
    }

    #[test]
    fn test_colliding_ids_are_disambiguated() {
        let tmp = tempdir().unwrap();
        touch(tmp.path(), "a/b.sol");
        touch(tmp.path(), "a_b.sol");

        let targets = TargetDiscovery::new(&Config::default()).discover(tmp.path()).unwrap();
        let ids: Vec<_> = targets.iter().map(|t| t.sanitized_id.as_str()).collect();
        assert_eq!(ids, vec!["a_b", "a_b-2"]);
    }

    #[test]
    fn test_missing_root_is_error() {
        let tmp = tempdir().unwrap();
        let err = TargetDiscovery::new(&Config::default())
            .discover(&tmp.path().join("nope"))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_walk_error_is_skipped() {
        let denied = ignore::Error::WithPath {
            path: PathBuf::from("/contracts/private"),
            err: Box::new(ignore::Error::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied))),
        };
        assert!(readable_entry(Err(denied)).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_link_does_not_abort_discovery() {
        let tmp = tempdir().unwrap();
        touch(tmp.path(), "Token.sol");
        std::os::unix::fs::symlink(tmp.path().join("gone"), tmp.path().join("Broken.sol")).unwrap();
        fs::create_dir_all(tmp.path().join("lib")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("missing-dir"), tmp.path().join("lib/vendor")).unwrap();

        let targets = TargetDiscovery::new(&Config::default()).discover(tmp.path()).unwrap();
        let rels: Vec<_> = targets.iter().map(|t| t.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["Token.sol"]);
    }

    #[test]
    fn test_contract_name() {
        let target = AuditTarget {
            absolute_path: PathBuf::from("/src/core/Vault.sol"),
            relative_path: "core/Vault.sol".to_string(),
            sanitized_id: "core_Vault".to_string(),
        };
        assert_eq!(target.contract_name(), "Vault");
    }
}
