use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use beacon_core::settings::{validate_entry, SettingsSnapshot};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// Authoritative settings snapshot, persisted as a single JSON object.
///
/// Reads never block on writes: they clone the current `Arc`. Writes are
/// serialized, persisted atomically (temp file, fsync, rename) and only then
/// swapped into memory, so a failed write leaves the previous snapshot in
/// place on disk and in memory.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Arc<SettingsSnapshot>>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Load the store from `path`. A missing file is an empty snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(&path)?;
            let value: Value = serde_json::from_str(&content)?;
            SettingsSnapshot::from_value(value)?
        } else {
            debug!(?path, "settings file not found, starting empty");
            SettingsSnapshot::new()
        };
        info!(?path, keys = snapshot.len(), "settings store opened");
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(snapshot)),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.current.read().get(key).cloned()
    }

    pub fn get_all(&self) -> Arc<SettingsSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Validate and commit a single key. Returns the committed snapshot.
    pub async fn set(&self, key: &str, value: Value) -> Result<Arc<SettingsSnapshot>> {
        validate_entry(key, &value)?;
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.get_all()).clone();
        let _ = next.insert(key, value);
        self.commit(next).await
    }

    /// Replace the whole snapshot. Keys absent from `snapshot` are removed.
    pub async fn set_all(&self, snapshot: SettingsSnapshot) -> Result<Arc<SettingsSnapshot>> {
        snapshot.validate()?;
        let _guard = self.write_lock.lock().await;
        self.commit(snapshot).await
    }

    // Caller holds `write_lock`.
    async fn commit(&self, next: SettingsSnapshot) -> Result<Arc<SettingsSnapshot>> {
        let bytes = serde_json::to_vec_pretty(&next)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io(format!("persist task failed: {e}")))??;

        let next = Arc::new(next);
        *self.current.write() = Arc::clone(&next);
        debug!(keys = next.len(), "settings committed");
        Ok(next)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}
