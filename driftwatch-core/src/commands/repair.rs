//! Integrity check and repair command.

use serde::Serialize;

use crate::error::Result;
use crate::storage::{IntegrityResult, RepairReport, Storage};

/// Outcome of a repair pass (or a dry-run inspection).
#[derive(Debug, Serialize)]
pub struct RepairCommandReport {
    pub dry_run: bool,
    /// State before anything was touched.
    pub before: IntegrityResult,
    /// Actions taken; absent in dry-run mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairReport>,
    /// State after repair; absent in dry-run mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<IntegrityResult>,
}

/// Inspect integrity and, unless dry-run, repair orphaned rows.
pub fn execute(storage: &dyn Storage, dry_run: bool, create_backup: bool) -> Result<RepairCommandReport> {
    let before = storage.check_integrity()?;

    if dry_run {
        return Ok(RepairCommandReport {
            dry_run: true,
            before,
            repair: None,
            after: None,
        });
    }

    let repair = storage.repair(create_backup)?;
    let after = storage.check_integrity()?;

    Ok(RepairCommandReport {
        dry_run: false,
        before,
        repair: Some(repair),
        after: Some(after),
    })
}
