//! SQLite-backed storage engine.
//!
//! One write connection behind a mutex gives single-writer serialization;
//! WAL journaling and enabled foreign keys are applied at open. Schema
//! changes go through an ordered migration list recorded in a
//! `schema_version` table, so re-running migrations is a no-op.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::endpoint::Endpoint;
use crate::error::{DriftWatchError, Result};

use super::{
    derive_health, epoch, Alert, AlertFilter, AlertStatus, DatabaseStats, Drift, DriftFilter,
    HealthStatus, IntegrityIssue, IntegrityResult, IssueKind, MonitoringRun, RepairReport, Storage,
};

/// One schema migration step.
struct Migration {
    version: i32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations, in order. Each runs in its own transaction.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "initial schema",
    sql: r#"
CREATE TABLE IF NOT EXISTS endpoints (
    id          TEXT PRIMARY KEY,
    url         TEXT NOT NULL,
    method      TEXT NOT NULL,
    spec_file   TEXT,
    config      TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS monitoring_runs (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint_id       TEXT NOT NULL REFERENCES endpoints(id) ON DELETE CASCADE,
    timestamp         INTEGER NOT NULL,
    response_status   INTEGER NOT NULL,
    response_time_ms  INTEGER NOT NULL,
    response_body     TEXT NOT NULL,
    response_headers  TEXT NOT NULL,
    validation_result TEXT
);

CREATE TABLE IF NOT EXISTS drifts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint_id  TEXT NOT NULL REFERENCES endpoints(id) ON DELETE CASCADE,
    detected_at  INTEGER NOT NULL,
    drift_type   TEXT NOT NULL,
    severity     TEXT NOT NULL,
    description  TEXT NOT NULL,
    before_value TEXT,
    after_value  TEXT,
    field_path   TEXT NOT NULL,
    acknowledged INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS alerts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    drift_id      INTEGER NOT NULL REFERENCES drifts(id) ON DELETE CASCADE,
    alert_type    TEXT NOT NULL,
    channel_name  TEXT NOT NULL,
    sent_at       INTEGER NOT NULL,
    status        TEXT NOT NULL,
    error_message TEXT,
    retry_count   INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_runs_endpoint ON monitoring_runs (endpoint_id);
CREATE INDEX IF NOT EXISTS idx_runs_timestamp ON monitoring_runs (timestamp);
CREATE INDEX IF NOT EXISTS idx_runs_endpoint_timestamp ON monitoring_runs (endpoint_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_drifts_endpoint ON drifts (endpoint_id);
CREATE INDEX IF NOT EXISTS idx_drifts_detected_at ON drifts (detected_at);
CREATE INDEX IF NOT EXISTS idx_drifts_severity ON drifts (severity);
CREATE INDEX IF NOT EXISTS idx_drifts_acknowledged ON drifts (acknowledged);
CREATE INDEX IF NOT EXISTS idx_alerts_drift ON alerts (drift_id);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts (status);
CREATE INDEX IF NOT EXISTS idx_alerts_channel ON alerts (channel_name);
"#,
}];

const TABLES: &[&str] = &["endpoints", "monitoring_runs", "drifts", "alerts"];

/// File-backed SQLite storage.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `path`, apply pragmas
    /// and any pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        let storage = Self {
            conn: Mutex::new(conn),
            path: Some(path),
        };
        storage.init()?;
        Ok(storage)
    }

    /// Open a private in-memory SQLite database. Used by tests that need
    /// real SQL semantics without a file; production in-memory use goes
    /// through [`super::MemoryStorage`].
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        storage.init()?;
        Ok(storage)
    }

    fn init(&self) -> Result<()> {
        {
            let conn = self.conn()?;
            if self.path.is_some() {
                conn.pragma_update(None, "journal_mode", "WAL")?;
            }
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
        }
        self.apply_migrations()
    }

    /// Apply pending migrations. Safe to call repeatedly: versions at or
    /// below the recorded one are skipped.
    fn apply_migrations(&self) -> Result<()> {
        let mut conn = self.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version     INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at  INTEGER NOT NULL
            )",
            [],
        )?;

        let current: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| {
                r.get(0)
            })?;

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            let tx = conn.transaction()?;
            tx.execute_batch(migration.sql)?;
            tx.execute(
                "INSERT INTO schema_version (version, description, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.description, Utc::now().timestamp()],
            )?;
            tx.commit()?;
            log::info!(
                "Applied schema migration v{}: {}",
                migration.version,
                migration.description
            );
        }

        Ok(())
    }

    /// The highest applied schema version.
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.conn()?;
        let version = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )?;
        Ok(version)
    }

    /// Database file path, `None` for in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DriftWatchError::SystemError("storage mutex poisoned".to_string()))
    }

    /// Raw connection access for operations not covered by the trait
    /// (tests use this to bypass foreign-key enforcement when staging
    /// orphaned rows). Prefer the trait methods.
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn()?;
        f(&conn)
    }

    fn endpoint_exists(conn: &Connection, id: &str) -> Result<bool> {
        let exists = conn
            .query_row("SELECT 1 FROM endpoints WHERE id = ?1", params![id], |_| {
                Ok(())
            })
            .optional()?
            .is_some();
        Ok(exists)
    }

    fn drift_exists(conn: &Connection, id: i64) -> Result<bool> {
        let exists = conn
            .query_row("SELECT 1 FROM drifts WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?
            .is_some();
        Ok(exists)
    }

    fn row_to_endpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Endpoint> {
        let method: String = row.get("method")?;
        let config_json: String = row.get("config")?;
        let spec_file: Option<String> = row.get("spec_file")?;
        Ok(Endpoint {
            id: row.get("id")?,
            url: row.get("url")?,
            method: method.parse().unwrap_or_default(),
            spec_file: spec_file.map(PathBuf::from),
            config: serde_json::from_str(&config_json).unwrap_or_default(),
            created_at: ts(row.get("created_at")?),
            updated_at: ts(row.get("updated_at")?),
        })
    }

    fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<MonitoringRun> {
        let headers_json: String = row.get("response_headers")?;
        let headers: HashMap<String, String> =
            serde_json::from_str(&headers_json).unwrap_or_default();
        Ok(MonitoringRun {
            id: row.get("id")?,
            endpoint_id: row.get("endpoint_id")?,
            timestamp: ts(row.get("timestamp")?),
            response_status: row.get::<_, i64>("response_status")? as u16,
            response_time_ms: row.get::<_, i64>("response_time_ms")? as u64,
            response_body: row.get("response_body")?,
            response_headers: headers,
            validation_result: row.get("validation_result")?,
        })
    }

    fn row_to_drift(row: &rusqlite::Row<'_>) -> rusqlite::Result<Drift> {
        let drift_type: String = row.get("drift_type")?;
        let severity: String = row.get("severity")?;
        Ok(Drift {
            id: row.get("id")?,
            endpoint_id: row.get("endpoint_id")?,
            detected_at: ts(row.get("detected_at")?),
            drift_type: drift_type
                .parse()
                .unwrap_or(crate::diff::DriftType::FieldModified),
            severity: severity.parse().unwrap_or(crate::error::Severity::Medium),
            description: row.get("description")?,
            before_value: row.get("before_value")?,
            after_value: row.get("after_value")?,
            field_path: row.get("field_path")?,
            acknowledged: row.get::<_, i64>("acknowledged")? != 0,
        })
    }

    fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
        let status: String = row.get("status")?;
        Ok(Alert {
            id: row.get("id")?,
            drift_id: row.get("drift_id")?,
            alert_type: row.get("alert_type")?,
            channel_name: row.get("channel_name")?,
            sent_at: ts(row.get("sent_at")?),
            status: status.parse().unwrap_or(AlertStatus::Failed),
            error_message: row.get("error_message")?,
            retry_count: row.get::<_, i64>("retry_count")? as u32,
        })
    }

    fn count_orphans(conn: &Connection) -> Result<(u64, u64, u64)> {
        let runs: i64 = conn.query_row(
            "SELECT COUNT(*) FROM monitoring_runs
             WHERE endpoint_id NOT IN (SELECT id FROM endpoints)",
            [],
            |r| r.get(0),
        )?;
        let drifts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM drifts
             WHERE endpoint_id NOT IN (SELECT id FROM endpoints)",
            [],
            |r| r.get(0),
        )?;
        let alerts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts
             WHERE drift_id NOT IN (SELECT id FROM drifts)",
            [],
            |r| r.get(0),
        )?;
        Ok((runs as u64, drifts as u64, alerts as u64))
    }

    fn fragmentation_percent(conn: &Connection) -> Result<f64> {
        let freelist: i64 = conn.query_row("PRAGMA freelist_count", [], |r| r.get(0))?;
        let pages: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        if pages == 0 {
            return Ok(0.0);
        }
        Ok(freelist as f64 / pages as f64 * 100.0)
    }
}

impl Storage for SqliteStorage {
    fn save_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let conn = self.conn()?;
        let config_json = serde_json::to_string(&endpoint.config)?;
        let now = Utc::now().timestamp();
        conn.execute(
            "INSERT INTO endpoints (id, url, method, spec_file, config, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 url = excluded.url,
                 method = excluded.method,
                 spec_file = excluded.spec_file,
                 config = excluded.config,
                 updated_at = excluded.updated_at",
            params![
                endpoint.id,
                endpoint.url,
                endpoint.method.to_string(),
                endpoint
                    .spec_file
                    .as_ref()
                    .map(|p| p.display().to_string()),
                config_json,
                endpoint.created_at.timestamp(),
                now,
            ],
        )?;
        Ok(())
    }

    fn get_endpoint(&self, id: &str) -> Result<Option<Endpoint>> {
        let conn = self.conn()?;
        let endpoint = conn
            .query_row(
                "SELECT * FROM endpoints WHERE id = ?1",
                params![id],
                Self::row_to_endpoint,
            )
            .optional()?;
        Ok(endpoint)
    }

    fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM endpoints ORDER BY created_at DESC, id")?;
        let endpoints = stmt
            .query_map([], Self::row_to_endpoint)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(endpoints)
    }

    fn delete_endpoint(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM endpoints WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn save_monitoring_run(&self, run: &mut MonitoringRun) -> Result<i64> {
        let conn = self.conn()?;
        if !Self::endpoint_exists(&conn, &run.endpoint_id)? {
            return Err(DriftWatchError::ForeignKeyViolation {
                table: "monitoring_runs".to_string(),
                parent: "endpoint".to_string(),
                id: run.endpoint_id.clone(),
            });
        }
        if run.timestamp == epoch() {
            run.timestamp = Utc::now();
        }
        let headers_json = serde_json::to_string(&run.response_headers)?;
        conn.execute(
            "INSERT INTO monitoring_runs
                 (endpoint_id, timestamp, response_status, response_time_ms,
                  response_body, response_headers, validation_result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.endpoint_id,
                run.timestamp.timestamp(),
                run.response_status as i64,
                run.response_time_ms as i64,
                run.response_body,
                headers_json,
                run.validation_result,
            ],
        )?;
        run.id = conn.last_insert_rowid();
        Ok(run.id)
    }

    fn get_monitoring_history(
        &self,
        endpoint_id: &str,
        period: Duration,
    ) -> Result<Vec<MonitoringRun>> {
        let conn = self.conn()?;
        let cutoff = Utc::now().timestamp() - period.as_secs() as i64;
        let mut stmt = conn.prepare(
            "SELECT * FROM monitoring_runs
             WHERE endpoint_id = ?1 AND timestamp >= ?2
             ORDER BY timestamp DESC, id DESC",
        )?;
        let runs = stmt
            .query_map(params![endpoint_id, cutoff], Self::row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn save_drift(&self, drift: &mut Drift) -> Result<i64> {
        let conn = self.conn()?;
        if !Self::endpoint_exists(&conn, &drift.endpoint_id)? {
            return Err(DriftWatchError::ForeignKeyViolation {
                table: "drifts".to_string(),
                parent: "endpoint".to_string(),
                id: drift.endpoint_id.clone(),
            });
        }
        if drift.detected_at == epoch() {
            drift.detected_at = Utc::now();
        }
        conn.execute(
            "INSERT INTO drifts
                 (endpoint_id, detected_at, drift_type, severity, description,
                  before_value, after_value, field_path, acknowledged)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                drift.endpoint_id,
                drift.detected_at.timestamp(),
                drift.drift_type.to_string(),
                drift.severity.to_string(),
                drift.description,
                drift.before_value,
                drift.after_value,
                drift.field_path,
                drift.acknowledged as i64,
            ],
        )?;
        drift.id = conn.last_insert_rowid();
        Ok(drift.id)
    }

    fn get_drifts(&self, filter: &DriftFilter) -> Result<Vec<Drift>> {
        let conn = self.conn()?;
        let mut sql = String::from("SELECT * FROM drifts WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref endpoint_id) = filter.endpoint_id {
            sql.push_str(&format!(" AND endpoint_id = ?{}", args.len() + 1));
            args.push(Box::new(endpoint_id.clone()));
        }
        if let Some(severity) = filter.severity {
            sql.push_str(&format!(" AND severity = ?{}", args.len() + 1));
            args.push(Box::new(severity.to_string()));
        }
        if let Some(since) = filter.since {
            sql.push_str(&format!(" AND detected_at >= ?{}", args.len() + 1));
            args.push(Box::new(since.timestamp()));
        }
        if let Some(until) = filter.until {
            sql.push_str(&format!(" AND detected_at <= ?{}", args.len() + 1));
            args.push(Box::new(until.timestamp()));
        }
        if let Some(acknowledged) = filter.acknowledged {
            sql.push_str(&format!(" AND acknowledged = ?{}", args.len() + 1));
            args.push(Box::new(acknowledged as i64));
        }
        sql.push_str(" ORDER BY detected_at DESC, id DESC");

        let mut stmt = conn.prepare(&sql)?;
        let drifts = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                Self::row_to_drift,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(drifts)
    }

    fn acknowledge_drift(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE drifts SET acknowledged = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    }

    fn save_alert(&self, alert: &mut Alert) -> Result<i64> {
        let conn = self.conn()?;
        if !Self::drift_exists(&conn, alert.drift_id)? {
            return Err(DriftWatchError::ForeignKeyViolation {
                table: "alerts".to_string(),
                parent: "drift".to_string(),
                id: alert.drift_id.to_string(),
            });
        }
        if alert.sent_at == epoch() {
            alert.sent_at = Utc::now();
        }
        conn.execute(
            "INSERT INTO alerts
                 (drift_id, alert_type, channel_name, sent_at, status,
                  error_message, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                alert.drift_id,
                alert.alert_type,
                alert.channel_name,
                alert.sent_at.timestamp(),
                alert.status.to_string(),
                alert.error_message,
                alert.retry_count as i64,
            ],
        )?;
        alert.id = conn.last_insert_rowid();
        Ok(alert.id)
    }

    fn get_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let conn = self.conn()?;
        let mut sql = String::from("SELECT * FROM alerts WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(drift_id) = filter.drift_id {
            sql.push_str(&format!(" AND drift_id = ?{}", args.len() + 1));
            args.push(Box::new(drift_id));
        }
        if let Some(ref alert_type) = filter.alert_type {
            sql.push_str(&format!(" AND alert_type = ?{}", args.len() + 1));
            args.push(Box::new(alert_type.clone()));
        }
        if let Some(ref channel_name) = filter.channel_name {
            sql.push_str(&format!(" AND channel_name = ?{}", args.len() + 1));
            args.push(Box::new(channel_name.clone()));
        }
        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
            args.push(Box::new(status.to_string()));
        }
        if let Some(since) = filter.since {
            sql.push_str(&format!(" AND sent_at >= ?{}", args.len() + 1));
            args.push(Box::new(since.timestamp()));
        }
        sql.push_str(" ORDER BY sent_at DESC, id DESC");

        let mut stmt = conn.prepare(&sql)?;
        let alerts = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                Self::row_to_alert,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }

    fn cleanup_old_monitoring_runs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM monitoring_runs WHERE timestamp < ?1",
            params![cutoff.timestamp()],
        )?;
        Ok(removed as u64)
    }

    fn cleanup_old_drifts(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM drifts WHERE detected_at < ?1",
            params![cutoff.timestamp()],
        )?;
        Ok(removed as u64)
    }

    fn cleanup_old_alerts(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM alerts WHERE sent_at < ?1",
            params![cutoff.timestamp()],
        )?;
        Ok(removed as u64)
    }

    fn get_database_stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn()?;
        let size_bytes = match &self.path {
            Some(path) => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            None => 0,
        };
        let count = |table: &str| -> Result<u64> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
            Ok(n as u64)
        };
        Ok(DatabaseStats {
            size_bytes,
            endpoints: count("endpoints")?,
            monitoring_runs: count("monitoring_runs")?,
            drifts: count("drifts")?,
            alerts: count("alerts")?,
        })
    }

    fn vacuum(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("VACUUM; ANALYZE;")?;
        Ok(())
    }

    fn check_integrity(&self) -> Result<IntegrityResult> {
        let conn = self.conn()?;
        let mut issues = Vec::new();

        let (runs, drifts, alerts) = Self::count_orphans(&conn)?;
        for (table, count) in [
            ("monitoring_runs", runs),
            ("drifts", drifts),
            ("alerts", alerts),
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

        let mut stmt = conn.prepare("PRAGMA integrity_check")?;
        let findings = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for finding in findings.iter().filter(|f| f.as_str() != "ok") {
            issues.push(IntegrityIssue {
                table: "<engine>".to_string(),
                kind: IssueKind::Corruption,
                count: 1,
                detail: finding.clone(),
            });
        }

        Ok(IntegrityResult {
            healthy: issues.is_empty(),
            issues,
            tables_checked: TABLES.iter().map(|t| t.to_string()).collect(),
        })
    }

    fn repair(&self, create_backup: bool) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        if create_backup {
            if let Some(path) = &self.path {
                let backup_path =
                    path.with_extension(format!("pre-repair.{}.db", Utc::now().timestamp()));
                self.backup_to(&backup_path)?;
                report
                    .actions
                    .push(format!("Backed up database to {}", backup_path.display()));
                report.backup_path = Some(backup_path.display().to_string());
            }
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // Orphan deletion order matters: runs and drifts reference
        // endpoints, alerts reference drifts.
        let runs = tx.execute(
            "DELETE FROM monitoring_runs
             WHERE endpoint_id NOT IN (SELECT id FROM endpoints)",
            [],
        )?;
        let drifts = tx.execute(
            "DELETE FROM drifts WHERE endpoint_id NOT IN (SELECT id FROM endpoints)",
            [],
        )?;
        let alerts = tx.execute(
            "DELETE FROM alerts WHERE drift_id NOT IN (SELECT id FROM drifts)",
            [],
        )?;
        tx.execute_batch("REINDEX")?;
        tx.commit()?;

        report.orphaned_runs_removed = runs as u64;
        report.orphaned_drifts_removed = drifts as u64;
        report.orphaned_alerts_removed = alerts as u64;
        if runs + drifts + alerts > 0 {
            report.actions.push(format!(
                "Removed orphaned rows: {} monitoring run(s), {} drift(s), {} alert(s)",
                runs, drifts, alerts
            ));
        }
        report.actions.push("Rebuilt indexes".to_string());

        // Orphan cleanup cannot fix engine-level corruption; surface it.
        let mut stmt = conn.prepare("PRAGMA integrity_check")?;
        let findings = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let corrupt: Vec<&String> = findings.iter().filter(|f| f.as_str() != "ok").collect();
        if !corrupt.is_empty() {
            log::error!(
                "Engine corruption persists after repair: {}",
                corrupt
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            report.actions.push(format!(
                "Engine corruption persists ({} finding(s)); restore from a backup",
                corrupt.len()
            ));
        }

        Ok(report)
    }

    fn backup_to(&self, path: &Path) -> Result<()> {
        let conn = self.conn()?;
        if self.path.is_some() {
            // Fold WAL content into the main file so the snapshot is complete.
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        }
        let mut dst = Connection::open(path)?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut dst)?;
        backup.run_to_completion(128, std::time::Duration::from_millis(10), None)?;
        Ok(())
    }

    fn get_health_status(&self) -> Result<HealthStatus> {
        let integrity = self.check_integrity()?;
        let stats = self.get_database_stats()?;
        let fragmentation = {
            let conn = self.conn()?;
            Self::fragmentation_percent(&conn)?
        };
        let (level, recommendations) = derive_health(&integrity, &stats, fragmentation, true);
        Ok(HealthStatus {
            healthy: integrity.healthy,
            level,
            integrity,
            stats,
            fragmentation_percent: fragmentation,
            recommendations,
        })
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DriftType;
    use crate::error::Severity;

    fn open_temp() -> (tempfile::TempDir, SqliteStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::open(dir.path().join("test.db")).unwrap();
        (dir, storage)
    }

    fn seeded_endpoint(storage: &SqliteStorage, id: &str) -> Endpoint {
        let endpoint = Endpoint::new(id, "https://api.example.com/v1");
        storage.save_endpoint(&endpoint).unwrap();
        endpoint
    }

    fn sample_drift(endpoint_id: &str) -> Drift {
        Drift {
            id: 0,
            endpoint_id: endpoint_id.to_string(),
            detected_at: epoch(),
            drift_type: DriftType::FieldRemoved,
            severity: Severity::Critical,
            description: "Field '$.user.id' was removed".to_string(),
            before_value: Some("123".to_string()),
            after_value: None,
            field_path: "$.user.id".to_string(),
            acknowledged: false,
        }
    }

    #[test]
    fn test_migrations_idempotent() {
        let (_dir, storage) = open_temp();
        assert_eq!(storage.schema_version().unwrap(), 1);
        storage.apply_migrations().unwrap();
        assert_eq!(storage.schema_version().unwrap(), 1);
        let count: i64 = storage
            .with_connection(|c| {
                Ok(c.query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_endpoint_round_trip_and_upsert() {
        let (_dir, storage) = open_temp();
        let mut endpoint = seeded_endpoint(&storage, "users");
        let created = storage.get_endpoint("users").unwrap().unwrap().created_at;

        endpoint.url = "https://api.example.com/v2".to_string();
        storage.save_endpoint(&endpoint).unwrap();

        let back = storage.get_endpoint("users").unwrap().unwrap();
        assert_eq!(back.url, "https://api.example.com/v2");
        // created_at survives the upsert
        assert_eq!(back.created_at, created);
        assert!(back.updated_at >= created);
    }

    #[test]
    fn test_run_requires_endpoint() {
        let (_dir, storage) = open_temp();
        let mut run = MonitoringRun::new("ghost");
        let err = storage.save_monitoring_run(&mut run).unwrap_err();
        assert!(matches!(err, DriftWatchError::ForeignKeyViolation { .. }));
    }

    #[test]
    fn test_run_round_trip() {
        let (_dir, storage) = open_temp();
        seeded_endpoint(&storage, "users");

        let mut run = MonitoringRun::new("users");
        run.response_status = 200;
        run.response_time_ms = 42;
        run.response_body = r#"{"a":1}"#.to_string();
        run.response_headers
            .insert("content-type".to_string(), "application/json".to_string());
        let id = storage.save_monitoring_run(&mut run).unwrap();
        assert!(id > 0);
        assert_ne!(run.timestamp, epoch());

        let history = storage
            .get_monitoring_history("users", Duration::from_secs(3600))
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].response_status, 200);
        assert_eq!(
            history[0].response_headers.get("content-type").unwrap(),
            "application/json"
        );
        assert!((history[0].timestamp - run.timestamp).num_seconds().abs() <= 1);
    }

    #[test]
    fn test_drift_filters() {
        let (_dir, storage) = open_temp();
        seeded_endpoint(&storage, "a");
        seeded_endpoint(&storage, "b");

        let mut d1 = sample_drift("a");
        storage.save_drift(&mut d1).unwrap();
        let mut d2 = sample_drift("b");
        d2.severity = Severity::Low;
        storage.save_drift(&mut d2).unwrap();
        storage.acknowledge_drift(d2.id).unwrap();

        let all = storage.get_drifts(&DriftFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let only_a = storage
            .get_drifts(&DriftFilter {
                endpoint_id: Some("a".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].endpoint_id, "a");

        let critical = storage
            .get_drifts(&DriftFilter {
                severity: Some(Severity::Critical),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(critical.len(), 1);

        let acked = storage
            .get_drifts(&DriftFilter {
                acknowledged: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].endpoint_id, "b");
    }

    #[test]
    fn test_alert_requires_drift() {
        let (_dir, storage) = open_temp();
        let mut alert = Alert {
            id: 0,
            drift_id: 999,
            alert_type: "slack".to_string(),
            channel_name: "ops".to_string(),
            sent_at: epoch(),
            status: AlertStatus::Pending,
            error_message: None,
            retry_count: 0,
        };
        assert!(storage.save_alert(&mut alert).is_err());
    }

    #[test]
    fn test_delete_endpoint_cascades() {
        let (_dir, storage) = open_temp();
        seeded_endpoint(&storage, "users");
        let mut run = MonitoringRun::new("users");
        run.response_status = 200;
        storage.save_monitoring_run(&mut run).unwrap();
        let mut drift = sample_drift("users");
        storage.save_drift(&mut drift).unwrap();
        let mut alert = Alert {
            id: 0,
            drift_id: drift.id,
            alert_type: "log".to_string(),
            channel_name: "console".to_string(),
            sent_at: epoch(),
            status: AlertStatus::Sent,
            error_message: None,
            retry_count: 0,
        };
        storage.save_alert(&mut alert).unwrap();

        assert!(storage.delete_endpoint("users").unwrap());
        let stats = storage.get_database_stats().unwrap();
        assert_eq!(stats.endpoints, 0);
        assert_eq!(stats.monitoring_runs, 0);
        assert_eq!(stats.drifts, 0);
        assert_eq!(stats.alerts, 0);
    }

    #[test]
    fn test_cleanup_counts() {
        let (_dir, storage) = open_temp();
        seeded_endpoint(&storage, "users");
        for age_secs in [10_000, 20_000, 30] {
            let mut run = MonitoringRun::new("users");
            run.timestamp = Utc::now() - chrono::Duration::seconds(age_secs);
            run.response_status = 200;
            storage.save_monitoring_run(&mut run).unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::seconds(5_000);
        let removed = storage.cleanup_old_monitoring_runs(cutoff).unwrap();
        assert_eq!(removed, 2);

        let remaining = storage
            .get_monitoring_history("users", Duration::from_secs(86400))
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|r| r.timestamp >= cutoff));
    }

    #[test]
    fn test_orphan_detection_and_repair() {
        let (_dir, storage) = open_temp();

        // Stage an orphan with FK enforcement off, the only way one can exist.
        storage
            .with_connection(|conn| {
                conn.pragma_update(None, "foreign_keys", "OFF")?;
                conn.execute(
                    "INSERT INTO monitoring_runs
                         (endpoint_id, timestamp, response_status, response_time_ms,
                          response_body, response_headers)
                     VALUES ('ghost', 0, 200, 1, '', '{}')",
                    [],
                )?;
                conn.pragma_update(None, "foreign_keys", "ON")?;
                Ok(())
            })
            .unwrap();

        let integrity = storage.check_integrity().unwrap();
        assert!(!integrity.healthy);
        assert_eq!(integrity.issues.len(), 1);
        assert_eq!(integrity.issues[0].table, "monitoring_runs");
        assert_eq!(integrity.issues[0].kind, IssueKind::OrphanedRecords);

        let report = storage.repair(false).unwrap();
        assert_eq!(report.orphaned_runs_removed, 1);

        let after = storage.check_integrity().unwrap();
        assert!(after.healthy);
        assert!(after.issues.is_empty());
    }

    #[test]
    fn test_backup_produces_readable_copy() {
        let (dir, storage) = open_temp();
        seeded_endpoint(&storage, "users");

        let backup_path = dir.path().join("backup.db");
        storage.backup_to(&backup_path).unwrap();

        let restored = SqliteStorage::open(&backup_path).unwrap();
        assert!(restored.get_endpoint("users").unwrap().is_some());
    }

    #[test]
    fn test_health_status_clean_database() {
        let (_dir, storage) = open_temp();
        let health = storage.get_health_status().unwrap();
        assert!(health.healthy);
        assert_eq!(health.level, super::super::HealthLevel::Excellent);
    }

    #[test]
    fn test_vacuum_runs() {
        let (_dir, storage) = open_temp();
        seeded_endpoint(&storage, "users");
        storage.vacuum().unwrap();
    }
}
