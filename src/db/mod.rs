//! Storage layer: user credentials and the dedup cache.

pub mod credentials;
pub mod dedup;

pub use credentials::CredentialStore;
pub use dedup::DedupCache;

use crate::error::{AppError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Write `value` as pretty JSON to `path` via a temp file and rename, so a
/// crash mid-write never leaves a truncated file behind.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::Storage(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| AppError::Storage(format!("Failed to serialize: {}", e)))?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)
        .map_err(|e| AppError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| AppError::Storage(format!("Failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}

/// `write_json_atomic` on tokio's blocking pool, keeping file I/O off the
/// worker threads that drive the poll tasks.
pub(crate) async fn write_json_off_thread<T>(path: PathBuf, value: T) -> Result<()>
where
    T: Serialize + Send + 'static,
{
    tokio::task::spawn_blocking(move || write_json_atomic(&path, &value))
        .await
        .map_err(|e| AppError::Storage(format!("Write task failed: {}", e)))?
}
