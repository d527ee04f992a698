//! Persistence layer: entities, the `Storage` capability set, and the two
//! engines that implement it (SQLite-backed and in-memory).
//!
//! Storage exclusively owns persisted state and enforces referential
//! integrity: monitoring runs and drifts must reference an existing
//! endpoint, alerts must reference an existing drift. Both engines return
//! copies of stored entities so callers can never mutate backing state.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::DriftType;
use crate::endpoint::Endpoint;
use crate::error::{DriftWatchError, Result, Severity};

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// One observation of an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringRun {
    /// Assigned by storage on save.
    pub id: i64,
    pub endpoint_id: String,
    /// Defaults to "now" on save when left at the epoch.
    pub timestamp: DateTime<Utc>,
    pub response_status: u16,
    pub response_time_ms: u64,
    pub response_body: String,
    /// Header name (lowercase) to first value.
    pub response_headers: HashMap<String, String>,
    /// Opaque encoded validation summary, when a spec was checked.
    pub validation_result: Option<String>,
}

impl MonitoringRun {
    /// A run for the given endpoint with storage-assigned id and timestamp.
    pub fn new(endpoint_id: impl Into<String>) -> Self {
        Self {
            id: 0,
            endpoint_id: endpoint_id.into(),
            timestamp: epoch(),
            response_status: 0,
            response_time_ms: 0,
            response_body: String::new(),
            response_headers: HashMap::new(),
            validation_result: None,
        }
    }
}

/// A detected change versus a prior baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drift {
    /// Assigned by storage on save.
    pub id: i64,
    pub endpoint_id: String,
    /// Defaults to "now" on save when left at the epoch.
    pub detected_at: DateTime<Utc>,
    pub drift_type: DriftType,
    pub severity: Severity,
    pub description: String,
    pub before_value: Option<String>,
    pub after_value: Option<String>,
    /// JSONPath-style location, e.g. `$.user.id`.
    pub field_path: String,
    pub acknowledged: bool,
}

/// Delivery state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Sent,
    Failed,
    Pending,
    Retry,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Sent => write!(f, "sent"),
            AlertStatus::Failed => write!(f, "failed"),
            AlertStatus::Pending => write!(f, "pending"),
            AlertStatus::Retry => write!(f, "retry"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = DriftWatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sent" => Ok(AlertStatus::Sent),
            "failed" => Ok(AlertStatus::Failed),
            "pending" => Ok(AlertStatus::Pending),
            "retry" => Ok(AlertStatus::Retry),
            _ => Err(DriftWatchError::SystemError(format!(
                "unknown alert status '{}'",
                s
            ))),
        }
    }
}

/// Record of one delivery attempt for a drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Assigned by storage on save.
    pub id: i64,
    pub drift_id: i64,
    /// Channel kind ("slack", "webhook", "log").
    pub alert_type: String,
    pub channel_name: String,
    pub sent_at: DateTime<Utc>,
    pub status: AlertStatus,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

/// Conjunctive filters for drift queries. `None` means "don't filter".
#[derive(Debug, Clone, Default)]
pub struct DriftFilter {
    pub endpoint_id: Option<String>,
    pub severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub acknowledged: Option<bool>,
}

/// Conjunctive filters for alert queries.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub drift_id: Option<i64>,
    pub alert_type: Option<String>,
    pub channel_name: Option<String>,
    pub status: Option<AlertStatus>,
    pub since: Option<DateTime<Utc>>,
}

/// Row counts and on-disk size.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseStats {
    /// Database file size in bytes; 0 for the in-memory engine.
    pub size_bytes: u64,
    pub endpoints: u64,
    pub monitoring_runs: u64,
    pub drifts: u64,
    pub alerts: u64,
}

/// Kind of problem found by an integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Rows whose parent no longer exists.
    OrphanedRecords,
    /// Engine-level corruption reported by the database itself.
    Corruption,
}

/// One problem found by [`Storage::check_integrity`].
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityIssue {
    pub table: String,
    pub kind: IssueKind,
    pub count: u64,
    pub detail: String,
}

/// Outcome of an integrity check.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityResult {
    pub healthy: bool,
    pub issues: Vec<IntegrityIssue>,
    pub tables_checked: Vec<String>,
}

/// Actions taken by [`Storage::repair`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    pub actions: Vec<String>,
    pub orphaned_runs_removed: u64,
    pub orphaned_drifts_removed: u64,
    pub orphaned_alerts_removed: u64,
    /// Backup written before repair, when requested and supported.
    pub backup_path: Option<String>,
}

/// Coarse health bucket for the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Excellent,
    Good,
    Warning,
    Critical,
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthLevel::Excellent => write!(f, "excellent"),
            HealthLevel::Good => write!(f, "good"),
            HealthLevel::Warning => write!(f, "warning"),
            HealthLevel::Critical => write!(f, "critical"),
        }
    }
}

/// A suggested maintenance action.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    /// Action keyword: "backup", "vacuum", "repair", or "cleanup".
    pub action: String,
    pub priority: Severity,
    pub reason: String,
}

/// Aggregate database health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub level: HealthLevel,
    pub integrity: IntegrityResult,
    pub stats: DatabaseStats,
    /// Share of free pages in the database file (0 for in-memory).
    pub fragmentation_percent: f64,
    pub recommendations: Vec<Recommendation>,
}

/// The storage capability set. Both engines obey the same invariants;
/// only backup support differs (unsupported in-memory).
pub trait Storage: Send + Sync {
    /// Upsert keyed by id: preserves `created_at` on update, always
    /// refreshes `updated_at`.
    fn save_endpoint(&self, endpoint: &Endpoint) -> Result<()>;
    fn get_endpoint(&self, id: &str) -> Result<Option<Endpoint>>;
    fn list_endpoints(&self) -> Result<Vec<Endpoint>>;
    /// Delete an endpoint and cascade to its runs, drifts, and alerts.
    /// Returns whether the endpoint existed.
    fn delete_endpoint(&self, id: &str) -> Result<bool>;

    /// Assigns an id (returned and written back), defaults the timestamp,
    /// and fails if the referenced endpoint does not exist.
    fn save_monitoring_run(&self, run: &mut MonitoringRun) -> Result<i64>;
    /// Runs with `timestamp >= now - period`, newest first.
    fn get_monitoring_history(
        &self,
        endpoint_id: &str,
        period: Duration,
    ) -> Result<Vec<MonitoringRun>>;

    /// Assigns an id, defaults `detected_at`, fails if the endpoint is missing.
    fn save_drift(&self, drift: &mut Drift) -> Result<i64>;
    /// Filtered drifts, newest first.
    fn get_drifts(&self, filter: &DriftFilter) -> Result<Vec<Drift>>;
    /// Mark a drift acknowledged. Returns whether it existed.
    fn acknowledge_drift(&self, id: i64) -> Result<bool>;

    /// Assigns an id, fails if the referenced drift is missing.
    fn save_alert(&self, alert: &mut Alert) -> Result<i64>;
    fn get_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>>;

    /// Delete rows strictly older than the cutoff; returns rows removed.
    fn cleanup_old_monitoring_runs(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    fn cleanup_old_drifts(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    fn cleanup_old_alerts(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    fn get_database_stats(&self) -> Result<DatabaseStats>;
    /// Reclaim space and refresh statistics; a no-op in-memory.
    fn vacuum(&self) -> Result<()>;
    fn check_integrity(&self) -> Result<IntegrityResult>;
    /// Remove orphaned rows (runs → drifts → alerts order) inside one
    /// transaction, optionally writing a backup first. Engine-level
    /// corruption is reported, never masked.
    fn repair(&self, create_backup: bool) -> Result<RepairReport>;
    /// Write a consistent snapshot to `path`. The in-memory engine
    /// reports this as unsupported.
    fn backup_to(&self, path: &Path) -> Result<()>;
    fn get_health_status(&self) -> Result<HealthStatus>;
}

/// The sentinel "unset" timestamp storage replaces with "now".
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).unwrap()
}

/// Bucket health and derive recommendations from integrity + fragmentation.
/// Shared by both engines so they classify identically.
pub(crate) fn derive_health(
    integrity: &IntegrityResult,
    stats: &DatabaseStats,
    fragmentation_percent: f64,
    supports_backup: bool,
) -> (HealthLevel, Vec<Recommendation>) {
    let mut recommendations = Vec::new();
    let issue_count: u64 = integrity.issues.iter().map(|i| i.count).sum();
    let has_corruption = integrity
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::Corruption);

    if has_corruption {
        recommendations.push(Recommendation {
            action: "backup".to_string(),
            priority: Severity::Critical,
            reason: "Engine-level corruption detected; back up what is readable now".to_string(),
        });
    }
    if integrity
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::OrphanedRecords)
    {
        recommendations.push(Recommendation {
            action: "repair".to_string(),
            priority: Severity::High,
            reason: format!("{} orphaned row(s) found", issue_count),
        });
    }
    if fragmentation_percent > 20.0 {
        recommendations.push(Recommendation {
            action: "vacuum".to_string(),
            priority: Severity::Medium,
            reason: format!("{:.0}% of the file is free pages", fragmentation_percent),
        });
    }
    if stats.monitoring_runs > 100_000 {
        recommendations.push(Recommendation {
            action: "cleanup".to_string(),
            priority: Severity::Low,
            reason: format!("{} monitoring runs stored", stats.monitoring_runs),
        });
    }
    if supports_backup && stats.size_bytes > 0 && recommendations.is_empty() {
        recommendations.push(Recommendation {
            action: "backup".to_string(),
            priority: Severity::Low,
            reason: "Periodic backups keep restores cheap".to_string(),
        });
    }

    let level = if has_corruption {
        HealthLevel::Critical
    } else if issue_count > 0 {
        HealthLevel::Warning
    } else if fragmentation_percent > 20.0 {
        HealthLevel::Good
    } else {
        HealthLevel::Excellent
    };

    (level, recommendations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_status_round_trip() {
        for s in [
            AlertStatus::Sent,
            AlertStatus::Failed,
            AlertStatus::Pending,
            AlertStatus::Retry,
        ] {
            assert_eq!(s.to_string().parse::<AlertStatus>().unwrap(), s);
        }
    }

    #[test]
    fn test_derive_health_buckets() {
        let clean = IntegrityResult {
            healthy: true,
            issues: vec![],
            tables_checked: vec![],
        };
        let stats = DatabaseStats::default();
        let (level, _) = derive_health(&clean, &stats, 0.0, true);
        assert_eq!(level, HealthLevel::Excellent);

        let orphaned = IntegrityResult {
            healthy: false,
            issues: vec![IntegrityIssue {
                table: "drifts".to_string(),
                kind: IssueKind::OrphanedRecords,
                count: 3,
                detail: String::new(),
            }],
            tables_checked: vec![],
        };
        let (level, recs) = derive_health(&orphaned, &stats, 0.0, true);
        assert_eq!(level, HealthLevel::Warning);
        assert!(recs.iter().any(|r| r.action == "repair"));

        let corrupt = IntegrityResult {
            healthy: false,
            issues: vec![IntegrityIssue {
                table: "endpoints".to_string(),
                kind: IssueKind::Corruption,
                count: 1,
                detail: "page 12".to_string(),
            }],
            tables_checked: vec![],
        };
        let (level, recs) = derive_health(&corrupt, &stats, 0.0, true);
        assert_eq!(level, HealthLevel::Critical);
        assert_eq!(recs[0].priority, Severity::Critical);
    }

    #[test]
    fn test_derive_health_fragmentation() {
        let clean = IntegrityResult {
            healthy: true,
            issues: vec![],
            tables_checked: vec![],
        };
        let (level, recs) = derive_health(&clean, &DatabaseStats::default(), 35.0, true);
        assert_eq!(level, HealthLevel::Good);
        assert!(recs.iter().any(|r| r.action == "vacuum"));
    }
}
