//! API drift detection library.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use driftwatch_core::config::{CliOverrides, DriftWatchConfig};
//! use driftwatch_core::DriftWatch;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DriftWatchConfig::load(None, &CliOverrides::default())?;
//! let dw = DriftWatch::new(config)?;
//! let report = dw.check(None, None).await?;
//! println!("Checked {} endpoint(s)", report.checked);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`config`] — Configuration loading (YAML, env vars, CLI overrides)
//! - [`endpoint`] — Endpoint definitions and validation
//! - [`storage`] — Persistence: SQLite and in-memory engines, migrations,
//!   integrity and repair
//! - [`http`] — Request execution with retries and metrics
//! - [`diff`] — Pure response comparison and severity classification
//! - [`openapi`] — Response validation against an OpenAPI spec
//! - [`scheduler`] — Interval triggers and the bounded worker pool
//! - [`checker`] — The single-endpoint check pass
//! - [`alert`] — Channel routing and delivery records
//! - [`baseline`] — Baseline file capture and verification
//! - [`commands`] — Individual command implementations
//! - [`error`] — Error types

pub mod alert;
pub mod baseline;
pub mod checker;
pub mod commands;
pub mod config;
pub mod diff;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod openapi;
pub mod scheduler;
pub mod storage;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alert::AlertDispatcher;
use checker::Checker;
use config::DriftWatchConfig;
use error::Result;
use http::HttpExecutor;
use storage::{MemoryStorage, SqliteStorage, Storage};

pub use baseline::Baseline;
pub use commands::backup::BackupReport;
pub use commands::baseline::{BaselineCaptureReport, BaselineValidateReport};
pub use commands::ci::{CiFormat, CiOptions, CiResult, FailOn};
pub use commands::cleanup::{CleanupOptions, CleanupReport};
pub use commands::export::ExportBundle;
pub use commands::repair::RepairCommandReport;
pub use commands::report::MonitoringReport;
pub use commands::status::StatusReport;
pub use error::{DriftWatchError, ErrorKind, Severity};
pub use scheduler::{CheckOnceReport, Scheduler, SchedulerStatus};
pub use storage::HealthStatus;

/// Main entry point for the DriftWatch library.
///
/// Holds the configuration, the storage handle, and the shared HTTP
/// executor; its methods delegate to the command implementations.
pub struct DriftWatch {
    pub config: DriftWatchConfig,
    storage: Arc<dyn Storage>,
    executor: Arc<HttpExecutor>,
}

impl DriftWatch {
    /// Create an instance, opening the storage engine the config names
    /// (`:memory:` selects the volatile engine).
    pub fn new(config: DriftWatchConfig) -> Result<Self> {
        let storage: Arc<dyn Storage> = if config.global.database_url == ":memory:" {
            Arc::new(MemoryStorage::new())
        } else {
            Arc::new(SqliteStorage::open(&config.global.database_url)?)
        };
        Self::with_storage(config, storage)
    }

    /// Create an instance over an existing storage handle.
    pub fn with_storage(config: DriftWatchConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let executor = Arc::new(HttpExecutor::new(&config.global.user_agent)?);
        Ok(Self {
            config,
            storage,
            executor,
        })
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn executor(&self) -> &Arc<HttpExecutor> {
        &self.executor
    }

    /// Upsert every configured endpoint into storage so runs and drifts
    /// can reference them.
    pub fn sync_endpoints(&self) -> Result<()> {
        for endpoint in &self.config.endpoints {
            self.storage.save_endpoint(endpoint)?;
        }
        Ok(())
    }

    fn build_checker(&self, include_performance: bool) -> Arc<Checker> {
        Arc::new(
            Checker::new(
                Arc::clone(&self.executor),
                Arc::clone(&self.storage),
                self.config.global.clone(),
            )
            .with_performance(include_performance),
        )
    }

    fn build_dispatcher(&self) -> Result<Arc<AlertDispatcher>> {
        Ok(Arc::new(AlertDispatcher::new(
            &self.config.alerting,
            Arc::clone(&self.storage),
        )?))
    }

    /// Build a scheduler with every configured endpoint registered,
    /// optionally narrowed to the given ids.
    pub fn scheduler(&self, endpoint_filter: Option<&[String]>) -> Result<Scheduler> {
        self.sync_endpoints()?;
        let scheduler = Scheduler::new(
            self.build_checker(false),
            self.build_dispatcher()?,
            self.config.global.max_workers,
        );
        for endpoint in &self.config.endpoints {
            if let Some(filter) = endpoint_filter {
                if !filter.iter().any(|id| id == &endpoint.id) {
                    continue;
                }
            }
            scheduler.add_endpoint(endpoint.clone())?;
        }
        Ok(scheduler)
    }

    /// One synchronous pass over the configured endpoints.
    pub async fn check(
        &self,
        endpoint_filter: Option<&[String]>,
        timeout: Option<Duration>,
    ) -> Result<CheckOnceReport> {
        let scheduler = self.scheduler(endpoint_filter)?;
        scheduler.check_once(timeout).await
    }

    /// One-shot CI run over the configured endpoints.
    pub async fn ci(&self, opts: &CiOptions) -> Result<CiResult> {
        if opts.persist {
            self.sync_endpoints()?;
        }
        let checker = self.build_checker(opts.include_performance);
        commands::ci::execute(&checker, &self.config.endpoints, opts).await
    }

    /// Capture the current responses of all enabled endpoints as a
    /// baseline file.
    pub async fn capture_baseline(&self, output: &Path) -> Result<BaselineCaptureReport> {
        let retry = http::RetryPolicy {
            max_retries: self.config.global.retry_count,
            base_delay: self.config.global.retry_delay,
        };
        commands::baseline::capture(&self.executor, &self.config.endpoints, &retry, output).await
    }

    /// Verify an existing baseline file.
    pub fn validate_baseline(path: &Path) -> BaselineValidateReport {
        commands::baseline::validate(path)
    }

    /// Monitoring report over `period` (defaults to the configured one).
    pub fn report(&self, period: Option<Duration>) -> Result<MonitoringReport> {
        let period = period.unwrap_or(self.config.reporting.default_period);
        commands::report::execute(self.storage.as_ref(), period)
    }

    /// Export stored data for `period`.
    pub fn export(&self, period: Option<Duration>) -> Result<ExportBundle> {
        let period = period.unwrap_or(self.config.reporting.default_period);
        commands::export::execute(self.storage.as_ref(), period)
    }

    /// Apply retention cleanup.
    pub fn cleanup(&self, opts: &CleanupOptions) -> Result<CleanupReport> {
        commands::cleanup::execute(self.storage.as_ref(), &self.config.retention, opts)
    }

    /// Check integrity and repair orphaned rows.
    pub fn repair(&self, dry_run: bool, create_backup: bool) -> Result<RepairCommandReport> {
        commands::repair::execute(self.storage.as_ref(), dry_run, create_backup)
    }

    /// Snapshot the database to `path`.
    pub fn backup(&self, path: &Path) -> Result<BackupReport> {
        commands::backup::execute(self.storage.as_ref(), path)
    }

    /// Aggregate database health.
    pub fn db_health(&self) -> Result<HealthStatus> {
        commands::db_health::execute(self.storage.as_ref())
    }

    /// Endpoint status overview from stored history.
    pub fn status_report(&self) -> Result<StatusReport> {
        commands::status::execute(self.storage.as_ref())
    }

    /// Send a synthetic drift through the configured channels.
    pub async fn test_alerts(
        &self,
        channel: Option<&str>,
    ) -> Result<Vec<(String, std::result::Result<(), String>)>> {
        self.build_dispatcher()?.test_channels(channel).await
    }

    /// Recorded alert deliveries, newest first.
    pub fn alert_history(
        &self,
        filter: &storage::AlertFilter,
    ) -> Result<Vec<storage::Alert>> {
        self.storage.get_alerts(filter)
    }
}
