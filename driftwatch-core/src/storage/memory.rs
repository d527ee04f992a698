//! In-memory storage engine, used for CI `--no-storage` runs and tests.
//!
//! One read-write lock protects all tables; every read returns copies so
//! callers cannot mutate backing state. The same referential rules as the
//! SQLite engine are enforced by hand, and a test-only door exists for
//! staging orphaned rows the way disabled foreign keys would.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::endpoint::Endpoint;
use crate::error::{DriftWatchError, Result};

use super::{
    derive_health, epoch, Alert, AlertFilter, DatabaseStats, Drift, DriftFilter, HealthStatus,
    IntegrityIssue, IntegrityResult, IssueKind, MonitoringRun, RepairReport, Storage,
};

#[derive(Default)]
struct Inner {
    endpoints: BTreeMap<String, Endpoint>,
    runs: BTreeMap<i64, MonitoringRun>,
    drifts: BTreeMap<i64, Drift>,
    alerts: BTreeMap<i64, Alert>,
    next_run_id: i64,
    next_drift_id: i64,
    next_alert_id: i64,
    /// When false, parent checks are skipped so tests can stage orphans.
    enforce_refs: bool,
}

/// Volatile storage with the same contract as the SQLite engine,
/// except backup reports unsupported.
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_run_id: 1,
                next_drift_id: 1,
                next_alert_id: 1,
                enforce_refs: true,
                ..Default::default()
            }),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| DriftWatchError::SystemError("storage lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| DriftWatchError::SystemError("storage lock poisoned".to_string()))
    }

    /// Disable or re-enable referential checks. Mirrors switching
    /// `PRAGMA foreign_keys` off on the SQLite engine; test use only.
    pub fn set_enforce_references(&self, enforce: bool) -> Result<()> {
        self.write()?.enforce_refs = enforce;
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn save_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let mut inner = self.write()?;
        let mut stored = endpoint.clone();
        stored.updated_at = Utc::now();
        if let Some(existing) = inner.endpoints.get(&endpoint.id) {
            stored.created_at = existing.created_at;
        }
        inner.endpoints.insert(stored.id.clone(), stored);
        Ok(())
    }

    fn get_endpoint(&self, id: &str) -> Result<Option<Endpoint>> {
        Ok(self.read()?.endpoints.get(id).cloned())
    }

    fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        // BTreeMap iteration gives id order.
        Ok(self.read()?.endpoints.values().cloned().collect())
    }

    fn delete_endpoint(&self, id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        if inner.endpoints.remove(id).is_none() {
            return Ok(false);
        }
        inner.runs.retain(|_, r| r.endpoint_id != id);
        let removed_drifts: Vec<i64> = inner
            .drifts
            .iter()
            .filter(|(_, d)| d.endpoint_id == id)
            .map(|(drift_id, _)| *drift_id)
            .collect();
        inner.drifts.retain(|_, d| d.endpoint_id != id);
        inner
            .alerts
            .retain(|_, a| !removed_drifts.contains(&a.drift_id));
        Ok(true)
    }

    fn save_monitoring_run(&self, run: &mut MonitoringRun) -> Result<i64> {
        let mut inner = self.write()?;
        if inner.enforce_refs && !inner.endpoints.contains_key(&run.endpoint_id) {
            return Err(DriftWatchError::ForeignKeyViolation {
                table: "monitoring_runs".to_string(),
                parent: "endpoint".to_string(),
                id: run.endpoint_id.clone(),
            });
        }
        if run.timestamp == epoch() {
            run.timestamp = Utc::now();
        }
        run.id = inner.next_run_id;
        inner.next_run_id += 1;
        inner.runs.insert(run.id, run.clone());
        Ok(run.id)
    }

    fn get_monitoring_history(
        &self,
        endpoint_id: &str,
        period: Duration,
    ) -> Result<Vec<MonitoringRun>> {
        let cutoff = Utc::now() - chrono::Duration::seconds(period.as_secs() as i64);
        let inner = self.read()?;
        let mut runs: Vec<MonitoringRun> = inner
            .runs
            .values()
            .filter(|r| r.endpoint_id == endpoint_id && r.timestamp >= cutoff)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(runs)
    }

    fn save_drift(&self, drift: &mut Drift) -> Result<i64> {
        let mut inner = self.write()?;
        if inner.enforce_refs && !inner.endpoints.contains_key(&drift.endpoint_id) {
            return Err(DriftWatchError::ForeignKeyViolation {
                table: "drifts".to_string(),
                parent: "endpoint".to_string(),
                id: drift.endpoint_id.clone(),
            });
        }
        if drift.detected_at == epoch() {
            drift.detected_at = Utc::now();
        }
        drift.id = inner.next_drift_id;
        inner.next_drift_id += 1;
        inner.drifts.insert(drift.id, drift.clone());
        Ok(drift.id)
    }

    fn get_drifts(&self, filter: &DriftFilter) -> Result<Vec<Drift>> {
        let inner = self.read()?;
        let mut drifts: Vec<Drift> = inner
            .drifts
            .values()
            .filter(|d| {
                filter
                    .endpoint_id
                    .as_ref()
                    .is_none_or(|id| &d.endpoint_id == id)
                    && filter.severity.is_none_or(|s| d.severity == s)
                    && filter.since.is_none_or(|t| d.detected_at >= t)
                    && filter.until.is_none_or(|t| d.detected_at <= t)
                    && filter.acknowledged.is_none_or(|a| d.acknowledged == a)
            })
            .cloned()
            .collect();
        drifts.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then(b.id.cmp(&a.id)));
        Ok(drifts)
    }

    fn acknowledge_drift(&self, id: i64) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.drifts.get_mut(&id) {
            Some(drift) => {
                drift.acknowledged = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn save_alert(&self, alert: &mut Alert) -> Result<i64> {
        let mut inner = self.write()?;
        if inner.enforce_refs && !inner.drifts.contains_key(&alert.drift_id) {
            return Err(DriftWatchError::ForeignKeyViolation {
                table: "alerts".to_string(),
                parent: "drift".to_string(),
                id: alert.drift_id.to_string(),
            });
        }
        if alert.sent_at == epoch() {
            alert.sent_at = Utc::now();
        }
        alert.id = inner.next_alert_id;
        inner.next_alert_id += 1;
        inner.alerts.insert(alert.id, alert.clone());
        Ok(alert.id)
    }

    fn get_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let inner = self.read()?;
        let mut alerts: Vec<Alert> = inner
            .alerts
            .values()
            .filter(|a| {
                filter.drift_id.is_none_or(|id| a.drift_id == id)
                    && filter
                        .alert_type
                        .as_ref()
                        .is_none_or(|t| &a.alert_type == t)
                    && filter
                        .channel_name
                        .as_ref()
                        .is_none_or(|c| &a.channel_name == c)
                    && filter.status.is_none_or(|s| a.status == s)
                    && filter.since.is_none_or(|t| a.sent_at >= t)
            })
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then(b.id.cmp(&a.id)));
        Ok(alerts)
    }

    fn cleanup_old_monitoring_runs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.write()?;
        let before = inner.runs.len();
        inner.runs.retain(|_, r| r.timestamp >= cutoff);
        Ok((before - inner.runs.len()) as u64)
    }

    fn cleanup_old_drifts(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.write()?;
        let before = inner.drifts.len();
        inner.drifts.retain(|_, d| d.detected_at >= cutoff);
        Ok((before - inner.drifts.len()) as u64)
    }

    fn cleanup_old_alerts(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.write()?;
        let before = inner.alerts.len();
        inner.alerts.retain(|_, a| a.sent_at >= cutoff);
        Ok((before - inner.alerts.len()) as u64)
    }

    fn get_database_stats(&self) -> Result<DatabaseStats> {
        let inner = self.read()?;
        Ok(DatabaseStats {
            size_bytes: 0,
            endpoints: inner.endpoints.len() as u64,
            monitoring_runs: inner.runs.len() as u64,
            drifts: inner.drifts.len() as u64,
            alerts: inner.alerts.len() as u64,
        })
    }

    fn vacuum(&self) -> Result<()> {
        // Nothing to reclaim.
        Ok(())
    }

    fn check_integrity(&self) -> Result<IntegrityResult> {
        let inner = self.read()?;
        let mut issues = Vec::new();

        let orphaned_runs = inner
            .runs
            .values()
            .filter(|r| !inner.endpoints.contains_key(&r.endpoint_id))
            .count() as u64;
        let orphaned_drifts = inner
            .drifts
            .values()
            .filter(|d| !inner.endpoints.contains_key(&d.endpoint_id))
            .count() as u64;
        let orphaned_alerts = inner
            .alerts
            .values()
            .filter(|a| !inner.drifts.contains_key(&a.drift_id))
            .count() as u64;

        for (table, count) in [
            ("monitoring_runs", orphaned_runs),
            ("drifts", orphaned_drifts),
            ("alerts", orphaned_alerts),
        ] {
            if count > 0 {
                issues.push(IntegrityIssue {
                    table: table.to_string(),
                    kind: IssueKind::OrphanedRecords,
                    count,
                    detail: format!("{} row(s) reference a missing parent", count),
                });
            }
        }

        Ok(IntegrityResult {
            healthy: issues.is_empty(),
            issues,
            tables_checked: vec![
                "endpoints".to_string(),
                "monitoring_runs".to_string(),
                "drifts".to_string(),
                "alerts".to_string(),
            ],
        })
    }

    fn repair(&self, _create_backup: bool) -> Result<RepairReport> {
        let mut inner = self.write()?;
        let mut report = RepairReport::default();

        let before = inner.runs.len();
        let endpoint_ids: std::collections::HashSet<String> =
            inner.endpoints.keys().cloned().collect();
        inner.runs.retain(|_, r| endpoint_ids.contains(&r.endpoint_id));
        report.orphaned_runs_removed = (before - inner.runs.len()) as u64;

        let before = inner.drifts.len();
        inner
            .drifts
            .retain(|_, d| endpoint_ids.contains(&d.endpoint_id));
        report.orphaned_drifts_removed = (before - inner.drifts.len()) as u64;

        let before = inner.alerts.len();
        let drift_ids: std::collections::HashSet<i64> = inner.drifts.keys().copied().collect();
        inner.alerts.retain(|_, a| drift_ids.contains(&a.drift_id));
        report.orphaned_alerts_removed = (before - inner.alerts.len()) as u64;

        let total = report.orphaned_runs_removed
            + report.orphaned_drifts_removed
            + report.orphaned_alerts_removed;
        if total > 0 {
            report.actions.push(format!(
                "Removed orphaned rows: {} monitoring run(s), {} drift(s), {} alert(s)",
                report.orphaned_runs_removed,
                report.orphaned_drifts_removed,
                report.orphaned_alerts_removed
            ));
        }
        Ok(report)
    }

    fn backup_to(&self, _path: &Path) -> Result<()> {
        Err(DriftWatchError::BackupUnsupported {
            engine: "in-memory".to_string(),
        })
    }

    fn get_health_status(&self) -> Result<HealthStatus> {
        let integrity = self.check_integrity()?;
        let stats = self.get_database_stats()?;
        let (level, recommendations) = derive_health(&integrity, &stats, 0.0, false);
        Ok(HealthStatus {
            healthy: integrity.healthy,
            level,
            integrity,
            stats,
            fragmentation_percent: 0.0,
            recommendations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DriftType;
    use crate::error::Severity;

    fn seeded(storage: &MemoryStorage, id: &str) {
        storage
            .save_endpoint(&Endpoint::new(id, "https://api.example.com/v1"))
            .unwrap();
    }

    #[test]
    fn test_copies_do_not_leak_backing_state() {
        let storage = MemoryStorage::new();
        seeded(&storage, "users");

        let mut listed = storage.list_endpoints().unwrap();
        listed[0].url = "https://evil.example.com".to_string();

        let fresh = storage.get_endpoint("users").unwrap().unwrap();
        assert_eq!(fresh.url, "https://api.example.com/v1");
    }

    #[test]
    fn test_list_ordered_by_id() {
        let storage = MemoryStorage::new();
        seeded(&storage, "zeta");
        seeded(&storage, "alpha");
        let ids: Vec<String> = storage
            .list_endpoints()
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_fk_checks_match_sqlite_engine() {
        let storage = MemoryStorage::new();
        let mut run = MonitoringRun::new("ghost");
        assert!(matches!(
            storage.save_monitoring_run(&mut run).unwrap_err(),
            DriftWatchError::ForeignKeyViolation { .. }
        ));
    }

    #[test]
    fn test_orphan_staging_and_repair() {
        let storage = MemoryStorage::new();
        storage.set_enforce_references(false).unwrap();
        let mut run = MonitoringRun::new("ghost");
        storage.save_monitoring_run(&mut run).unwrap();
        storage.set_enforce_references(true).unwrap();

        let integrity = storage.check_integrity().unwrap();
        assert!(!integrity.healthy);
        assert_eq!(integrity.issues[0].table, "monitoring_runs");

        let report = storage.repair(false).unwrap();
        assert_eq!(report.orphaned_runs_removed, 1);
        assert!(storage.check_integrity().unwrap().healthy);
    }

    #[test]
    fn test_backup_unsupported() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.backup_to(Path::new("/tmp/x.db")).unwrap_err(),
            DriftWatchError::BackupUnsupported { .. }
        ));
    }

    #[test]
    fn test_upsert_preserves_created_at() {
        let storage = MemoryStorage::new();
        seeded(&storage, "users");
        let created = storage.get_endpoint("users").unwrap().unwrap().created_at;

        let mut endpoint = Endpoint::new("users", "https://api.example.com/v2");
        endpoint.created_at = Utc::now() + chrono::Duration::days(10);
        storage.save_endpoint(&endpoint).unwrap();

        let back = storage.get_endpoint("users").unwrap().unwrap();
        assert_eq!(back.created_at, created);
        assert_eq!(back.url, "https://api.example.com/v2");
    }

    #[test]
    fn test_drift_time_range_filter() {
        let storage = MemoryStorage::new();
        seeded(&storage, "users");

        let mut old = Drift {
            id: 0,
            endpoint_id: "users".to_string(),
            detected_at: Utc::now() - chrono::Duration::hours(48),
            drift_type: DriftType::FieldAdded,
            severity: Severity::Low,
            description: "old".to_string(),
            before_value: None,
            after_value: None,
            field_path: "$.a".to_string(),
            acknowledged: false,
        };
        storage.save_drift(&mut old).unwrap();
        let mut recent = old.clone();
        recent.detected_at = Utc::now();
        recent.description = "recent".to_string();
        storage.save_drift(&mut recent).unwrap();

        let found = storage
            .get_drifts(&DriftFilter {
                since: Some(Utc::now() - chrono::Duration::hours(24)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].description, "recent");
    }
}
