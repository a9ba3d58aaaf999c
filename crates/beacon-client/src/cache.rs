//! Last-known-good snapshot on local disk, the final rung of the fallback
//! chain.

use std::path::{Path, PathBuf};

use beacon_core::{ClientError, SettingsSnapshot};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been cached yet.
    pub async fn load(&self) -> Result<Option<SettingsSnapshot>, ClientError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ClientError::Cache(format!("{}: {e}", self.path.display())))
    }

    /// Written to a sibling temp file, then renamed over the target.
    pub async fn save(&self, snapshot: &SettingsSnapshot) -> Result<(), ClientError> {
        let body = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| ClientError::Cache(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| self.error(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await.map_err(|e| self.error(e))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| self.error(e))?;
        debug!(path = %self.path.display(), keys = snapshot.len(), "snapshot cached");
        Ok(())
    }

    fn error(&self, e: std::io::Error) -> ClientError {
        ClientError::Cache(format!("{}: {e}", self.path.display()))
    }
}
