//! Retention cleanup: prune old monitoring runs, drifts, and alerts.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::storage::{AlertFilter, DatabaseStats, DriftFilter, Storage};

/// What a cleanup removed (or would remove, in dry-run mode).
#[derive(Debug, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub monitoring_runs_removed: u64,
    pub drifts_removed: u64,
    pub alerts_removed: u64,
    pub vacuumed: bool,
    /// Present when `--stats` was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DatabaseStats>,
}

/// Options for one cleanup pass. `None` windows fall back to the
/// configured retention.
#[derive(Debug, Default)]
pub struct CleanupOptions {
    pub monitoring_runs: Option<Duration>,
    pub drifts: Option<Duration>,
    pub alerts: Option<Duration>,
    pub vacuum: bool,
    pub stats: bool,
    pub dry_run: bool,
}

/// Apply retention. Rows strictly older than each cutoff are deleted;
/// dry-run counts candidates without touching anything.
pub fn execute(
    storage: &dyn Storage,
    retention: &RetentionConfig,
    opts: &CleanupOptions,
) -> Result<CleanupReport> {
    let now = Utc::now();
    let cutoff = |window: Duration| now - chrono::Duration::seconds(window.as_secs() as i64);

    let runs_cutoff = cutoff(opts.monitoring_runs.unwrap_or(retention.monitoring_runs));
    let drifts_cutoff = cutoff(opts.drifts.unwrap_or(retention.drifts));
    let alerts_cutoff = cutoff(opts.alerts.unwrap_or(retention.alerts));

    let (monitoring_runs_removed, drifts_removed, alerts_removed) = if opts.dry_run {
        // Count candidates through the read paths.
        let mut run_candidates = 0u64;
        for endpoint in storage.list_endpoints()? {
            run_candidates += storage
                .get_monitoring_history(&endpoint.id, Duration::from_secs(u32::MAX as u64))?
                .iter()
                .filter(|r| r.timestamp < runs_cutoff)
                .count() as u64;
        }
        let drift_candidates = storage
            .get_drifts(&DriftFilter {
                until: Some(drifts_cutoff),
                ..Default::default()
            })?
            .len() as u64;
        let alert_candidates = storage
            .get_alerts(&AlertFilter::default())?
            .iter()
            .filter(|a| a.sent_at < alerts_cutoff)
            .count() as u64;
        (run_candidates, drift_candidates, alert_candidates)
    } else {
        (
            storage.cleanup_old_monitoring_runs(runs_cutoff)?,
            storage.cleanup_old_drifts(drifts_cutoff)?,
            storage.cleanup_old_alerts(alerts_cutoff)?,
        )
    };

    let vacuumed = if opts.vacuum && !opts.dry_run {
        storage.vacuum()?;
        true
    } else {
        false
    };

    let stats = if opts.stats {
        Some(storage.get_database_stats()?)
    } else {
        None
    };

    Ok(CleanupReport {
        dry_run: opts.dry_run,
        monitoring_runs_removed,
        drifts_removed,
        alerts_removed,
        vacuumed,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::storage::{MemoryStorage, MonitoringRun};

    fn seed(storage: &MemoryStorage) {
        storage
            .save_endpoint(&Endpoint::new("api", "https://api.example.com"))
            .unwrap();
        for age_days in [1, 40, 100] {
            let mut run = MonitoringRun::new("api");
            run.timestamp = Utc::now() - chrono::Duration::days(age_days);
            run.response_status = 200;
            storage.save_monitoring_run(&mut run).unwrap();
        }
    }

    #[test]
    fn test_dry_run_counts_without_deleting() {
        let storage = MemoryStorage::new();
        seed(&storage);

        let report = execute(
            &storage,
            &RetentionConfig::default(),
            &CleanupOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
        // 40- and 100-day-old runs fall outside the default 30-day window.
        assert!(report.dry_run);
        assert_eq!(report.monitoring_runs_removed, 2);
        assert_eq!(storage.get_database_stats().unwrap().monitoring_runs, 3);
    }

    #[test]
    fn test_cleanup_deletes_and_reports_counts() {
        let storage = MemoryStorage::new();
        seed(&storage);

        let report = execute(
            &storage,
            &RetentionConfig::default(),
            &CleanupOptions {
                stats: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(report.monitoring_runs_removed, 2);
        assert_eq!(report.stats.unwrap().monitoring_runs, 1);
    }

    #[test]
    fn test_override_window() {
        let storage = MemoryStorage::new();
        seed(&storage);

        let report = execute(
            &storage,
            &RetentionConfig::default(),
            &CleanupOptions {
                monitoring_runs: Some(Duration::from_secs(200 * 86400)),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(report.monitoring_runs_removed, 0);
    }
}
