use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SyncError;
use crate::value::FlatMap;

const BACKUP_DIR: &str = "__backups__";

/// Persists the last successfully received remote payload per logical
/// name, so a restart can serve configuration while the center is down.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(conf_root: &Path) -> Self {
        Self { dir: conf_root.join(BACKUP_DIR) }
    }

    /// Writes the payload as `<name>.bak`, latest wins. The write goes
    /// through a temp file and a rename so a crash leaves either the old
    /// snapshot or none, never half of the new one.
    pub async fn save(
        &self,
        name: &str,
        payload: &FlatMap,
    ) -> Result<(), SyncError> {
        let encoded = serde_json::to_vec(payload).map_err(|err| {
            SyncError::Snapshot(std::io::Error::other(err))
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(SyncError::Snapshot)?;

        let final_path = self.path_for(name);
        let tmp_path = self.dir.join(format!("{name}.bak.tmp"));

        tokio::fs::write(&tmp_path, &encoded)
            .await
            .map_err(SyncError::Snapshot)?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(SyncError::Snapshot)?;
        Ok(())
    }

    /// Loads the snapshot for `name`. Missing, truncated or otherwise
    /// unparsable files are a cache miss, not an error.
    pub async fn load(
        &self,
        name: &str,
    ) -> Option<FlatMap> {
        let path = self.path_for(name);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) => {
                debug!(
                    "snapshot miss: path={}, error={}",
                    path.display(),
                    err
                );
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(payload) => Some(payload),
            Err(err) => {
                debug!(
                    "snapshot unreadable, treating as miss: path={}, error={}",
                    path.display(),
                    err
                );
                None
            }
        }
    }

    pub fn path_for(
        &self,
        name: &str,
    ) -> PathBuf {
        self.dir.join(format!("{name}.bak"))
    }
}
