//! Database backup command.

use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::storage::Storage;

/// Outcome of a backup.
#[derive(Debug, Serialize)]
pub struct BackupReport {
    pub path: String,
    pub size_bytes: u64,
}

/// Write a consistent snapshot of the database to `path`.
pub fn execute(storage: &dyn Storage, path: &Path) -> Result<BackupReport> {
    storage.backup_to(path)?;
    let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    Ok(BackupReport {
        path: path.display().to_string(),
        size_bytes,
    })
}

/// Default backup filename: `driftwatch-backup-<timestamp>.db`.
pub fn default_backup_path() -> std::path::PathBuf {
    std::path::PathBuf::from(format!(
        "driftwatch-backup-{}.db",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    ))
}
