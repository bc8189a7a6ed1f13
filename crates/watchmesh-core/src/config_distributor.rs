//! Pushes this node's config-sync file set to newly connected peers and
//! applies whatever a peer pushes back, atomically and with a restart
//! trigger on change (spec §4.9).

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::ClusterError;

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Builds the `{relative_path -> content}` bundle for the globs configured
/// for `peer_name`, read from `sync_root`.
pub fn build_bundle(sync_root: &Path, globs: &[String]) -> BTreeMap<String, String> {
    let mut bundle = BTreeMap::new();
    for pattern in globs {
        let full_pattern = sync_root.join(pattern);
        let Some(pattern_str) = full_pattern.to_str() else {
            continue;
        };
        let Ok(paths) = glob::glob(pattern_str) else {
            continue;
        };
        for path in paths.flatten() {
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(relative) = path.strip_prefix(sync_root) {
                    bundle.insert(relative.display().to_string(), content);
                }
            }
        }
    }
    bundle
}

/// Applies a config bundle received from `sender_identity`, returning
/// whether anything on disk changed (callers use this to decide whether to
/// request a restart).
pub struct ConfigDistributor {
    state_dir: PathBuf,
    accept_config: Vec<String>,
}

impl ConfigDistributor {
    pub fn new(state_dir: impl Into<PathBuf>, accept_config: Vec<String>) -> Self {
        Self {
            state_dir: state_dir.into(),
            accept_config,
        }
    }

    fn sender_dir(&self, sender_identity: &str) -> PathBuf {
        self.state_dir
            .join("cluster/config")
            .join(sha256_hex(sender_identity))
    }

    pub fn apply(
        &self,
        sender_identity: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<bool, ClusterError> {
        if !self.accept_config.iter().any(|cn| cn == sender_identity) {
            return Err(ClusterError::ProtocolViolation {
                peer: sender_identity.to_string(),
                reason: "sender is not in accept_config".to_string(),
            });
        }

        let dir = self.sender_dir(sender_identity);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        set_mode(&dir, 0o700)?;

        let wanted: std::collections::HashSet<String> = files
            .keys()
            .map(|relative| sha256_hex(relative))
            .collect();

        let mut changed = false;

        for (relative, content) in files {
            let target = dir.join(sha256_hex(relative));
            if fs::read_to_string(&target).ok().as_deref() != Some(content.as_str()) {
                atomic_write(&target, content)?;
                set_mode(&target, 0o600)?;
                changed = true;
            }
        }

        for entry in fs::read_dir(&dir).map_err(io_err(&dir))? {
            let entry = entry.map_err(io_err(&dir))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !wanted.contains(name) {
                fs::remove_file(entry.path()).map_err(io_err(&dir))?;
                changed = true;
            }
        }

        Ok(changed)
    }
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> ClusterError + '_ {
    move |source| {
        ClusterError::ProtocolViolation {
            peer: path.display().to_string(),
            reason: source.to_string(),
        }
    }
}

fn atomic_write(target: &Path, content: &str) -> Result<(), ClusterError> {
    let tmp = target.with_extension("tmp");
    fs::write(&tmp, content).map_err(io_err(&tmp))?;
    fs::rename(&tmp, target).map_err(io_err(target))?;
    Ok(())
}

fn set_mode(path: &Path, mode: u32) -> Result<(), ClusterError> {
    let mut perms = fs::metadata(path).map_err(io_err(path))?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms).map_err(io_err(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sender_not_in_accept_config() {
        let dir = tempfile::tempdir().unwrap();
        let distributor = ConfigDistributor::new(dir.path(), vec!["node-a".to_string()]);
        let files = BTreeMap::from([("hosts.conf".to_string(), "define host {}".to_string())]);
        let err = distributor.apply("node-evil", &files).unwrap_err();
        assert!(matches!(err, ClusterError::ProtocolViolation { .. }));
    }

    #[test]
    fn writes_new_files_and_reports_changed() {
        let dir = tempfile::tempdir().unwrap();
        let distributor = ConfigDistributor::new(dir.path(), vec!["node-a".to_string()]);
        let files = BTreeMap::from([("hosts.conf".to_string(), "define host {}".to_string())]);
        let changed = distributor.apply("node-a", &files).unwrap();
        assert!(changed);

        // applying the same bundle again reports no change
        let changed_again = distributor.apply("node-a", &files).unwrap();
        assert!(!changed_again);
    }

    #[test]
    fn removes_files_dropped_from_the_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let distributor = ConfigDistributor::new(dir.path(), vec!["node-a".to_string()]);
        let first = BTreeMap::from([
            ("hosts.conf".to_string(), "a".to_string()),
            ("services.conf".to_string(), "b".to_string()),
        ]);
        distributor.apply("node-a", &first).unwrap();

        let second = BTreeMap::from([("hosts.conf".to_string(), "a".to_string())]);
        let changed = distributor.apply("node-a", &second).unwrap();
        assert!(changed);
    }
}
