//! Single-endpoint check pass: fetch, compare against the baseline,
//! persist the observation and any drifts.
//!
//! Used by scheduler workers in live mode and by the one-shot CI command.
//! Baseline selection order: an explicit entry (CI), else the most recent
//! monitoring run from the last 24 hours, else no comparison.

use std::sync::Arc;
use std::time::Duration;

use crate::baseline::BaselineEntry;
use crate::config::GlobalConfig;
use crate::diff::{self, DiffOptions, DiffResult, DriftType, StructuralChange};
use crate::endpoint::Endpoint;
use crate::error::{DriftWatchError, Result, Severity};
use crate::http::{HttpExecutor, HttpResponse, RequestSpec, RetryPolicy};
use crate::openapi::{SpecValidator, ValidationMode, ValidationReport};
use crate::storage::{Drift, MonitoringRun, Storage};

/// How far back a stored run may be and still serve as the baseline.
const BASELINE_WINDOW: Duration = Duration::from_secs(24 * 3600);

/// Where drift results go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Persist the monitoring run and drift rows.
    Live,
    /// Compute only; the CI layer aggregates the outcome itself.
    Ci,
}

/// Everything one pass produced.
#[derive(Debug)]
pub struct CheckOutcome {
    pub endpoint_id: String,
    pub response: HttpResponse,
    /// The stored run (id 0 when not persisted).
    pub run: MonitoringRun,
    /// Comparison result; `None` when no baseline was available.
    pub diff: Option<DiffResult>,
    pub validation: Option<ValidationReport>,
    /// Drift entities derived from the diff (persisted in live mode).
    pub drifts: Vec<Drift>,
}

/// Dependencies for a check pass, shared across workers.
pub struct Checker {
    executor: Arc<HttpExecutor>,
    storage: Arc<dyn Storage>,
    global: GlobalConfig,
    include_performance: bool,
}

impl Checker {
    pub fn new(executor: Arc<HttpExecutor>, storage: Arc<dyn Storage>, global: GlobalConfig) -> Self {
        Self {
            executor,
            storage,
            global,
            include_performance: false,
        }
    }

    /// Enable performance-change detection (CI `--include-performance`).
    pub fn with_performance(mut self, enabled: bool) -> Self {
        self.include_performance = enabled;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Run one pass for `endpoint`.
    pub async fn run_check(
        &self,
        endpoint: &Endpoint,
        explicit_baseline: Option<&BaselineEntry>,
        mode: CheckMode,
    ) -> Result<CheckOutcome> {
        let spec = self.build_request(endpoint)?;
        let retry = RetryPolicy {
            max_retries: endpoint.config.retry_count,
            base_delay: self.global.retry_delay,
        };

        let response = self.executor.execute(&spec, &retry).await?;
        log::debug!(
            "{}: {} in {}ms (attempt {})",
            endpoint.id,
            response.status,
            response.response_time_ms,
            response.attempts
        );

        // The prior run must be read before the new one is written, or the
        // new run would become its own baseline.
        let stored_baseline = if explicit_baseline.is_none() {
            self.latest_run(&endpoint.id)?
        } else {
            None
        };

        let mut validation = None;
        if let Some(spec_file) = &endpoint.spec_file {
            match self.validate_against_spec(endpoint, spec_file, &response) {
                Ok(report) => validation = Some(report),
                Err(e) => {
                    log::warn!("{}: spec validation skipped: {}", endpoint.id, e);
                }
            }
        }

        let mut run = MonitoringRun::new(&endpoint.id);
        run.response_status = response.status;
        run.response_time_ms = response.response_time_ms;
        run.response_body = response.body_string();
        run.response_headers = response.first_headers();
        run.validation_result = validation.as_ref().map(|v| v.encode());

        if mode == CheckMode::Live {
            self.storage.save_monitoring_run(&mut run)?;
        }

        let current = response.to_sample();
        let opts = self.diff_options(endpoint);
        let diff = match (explicit_baseline, stored_baseline.as_ref()) {
            (Some(entry), _) => Some(diff::compare(&entry.to_sample(), &current, &opts)),
            (None, Some(prior)) => {
                let prior_sample = diff::ResponseSample {
                    status: prior.response_status,
                    headers: prior.response_headers.clone(),
                    body: prior.response_body.clone(),
                    response_time_ms: prior.response_time_ms,
                };
                Some(diff::compare(&prior_sample, &current, &opts))
            }
            (None, None) => {
                log::debug!("{}: no baseline yet, skipping comparison", endpoint.id);
                None
            }
        };

        let mut drifts = Vec::new();
        if let Some(diff_result) = &diff {
            for change in &diff_result.structural_changes {
                drifts.push(change_to_drift(&endpoint.id, change));
            }
            if let Some(perf) = &diff_result.performance_change {
                drifts.push(Drift {
                    id: 0,
                    endpoint_id: endpoint.id.clone(),
                    detected_at: crate::storage::epoch(),
                    drift_type: DriftType::PerformanceChange,
                    severity: perf.severity,
                    description: perf.description.clone(),
                    before_value: Some(format!("{}ms", perf.old_ms)),
                    after_value: Some(format!("{}ms", perf.new_ms)),
                    field_path: "$".to_string(),
                    acknowledged: false,
                });
            }
        }
        if let Some(report) = &validation {
            for change in &report.field_diffs {
                drifts.push(change_to_drift(&endpoint.id, change));
            }
            for error in &report.errors {
                drifts.push(Drift {
                    id: 0,
                    endpoint_id: endpoint.id.clone(),
                    detected_at: crate::storage::epoch(),
                    drift_type: DriftType::SchemaViolation,
                    severity: Severity::High,
                    description: error.clone(),
                    before_value: None,
                    after_value: None,
                    field_path: "$".to_string(),
                    acknowledged: false,
                });
            }
        }

        if mode == CheckMode::Live {
            for drift in &mut drifts {
                self.storage.save_drift(drift)?;
            }
        }

        Ok(CheckOutcome {
            endpoint_id: endpoint.id.clone(),
            response,
            run,
            diff,
            validation,
            drifts,
        })
    }

    /// Record a failed check so history and status reflect it. The run's
    /// status 0 marks "no response"; the error kind rides along in the
    /// validation column.
    pub fn record_failure(&self, endpoint: &Endpoint, error: &DriftWatchError) {
        let mut run = MonitoringRun::new(&endpoint.id);
        run.response_status = 0;
        run.validation_result = Some(
            serde_json::json!({
                "error": error.code(),
                "message": error.to_string(),
            })
            .to_string(),
        );
        if let Err(e) = self.storage.save_monitoring_run(&mut run) {
            log::error!("{}: could not record failed check: {}", endpoint.id, e);
        }
    }

    fn build_request(&self, endpoint: &Endpoint) -> Result<RequestSpec> {
        let body = match &endpoint.config.body_file {
            Some(path) => Some(std::fs::read(path).map_err(|e| {
                DriftWatchError::ConfigError(format!(
                    "Cannot read body file '{}' for endpoint '{}': {}",
                    path.display(),
                    endpoint.id,
                    e
                ))
            })?),
            None => None,
        };
        // The tightest deadline wins.
        let timeout = endpoint.config.timeout.min(self.global.timeout);
        Ok(RequestSpec {
            method: endpoint.method,
            url: endpoint.url.clone(),
            headers: endpoint.config.headers.clone(),
            body,
            timeout,
        })
    }

    fn latest_run(&self, endpoint_id: &str) -> Result<Option<MonitoringRun>> {
        let history = self
            .storage
            .get_monitoring_history(endpoint_id, BASELINE_WINDOW)?;
        // Newest first; failed fetches (status 0) are not baselines.
        Ok(history
            .into_iter()
            .find(|r| r.response_status != 0))
    }

    fn validate_against_spec(
        &self,
        endpoint: &Endpoint,
        spec_file: &std::path::Path,
        response: &HttpResponse,
    ) -> Result<ValidationReport> {
        let validator = SpecValidator::load(spec_file)?;
        let url_path = url::Url::parse(&endpoint.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string());
        let mode = if endpoint.config.validation.strict {
            ValidationMode::Strict
        } else {
            ValidationMode::Lenient
        };
        validator.validate_response(response, &url_path, endpoint.method, mode)
    }

    fn diff_options(&self, endpoint: &Endpoint) -> DiffOptions {
        DiffOptions {
            performance_mode: self.include_performance,
            ignore_fields: endpoint.config.validation.ignore_fields.clone(),
            required_fields: endpoint.config.validation.required_fields.clone(),
            ..Default::default()
        }
    }
}

fn change_to_drift(endpoint_id: &str, change: &StructuralChange) -> Drift {
    Drift {
        id: 0,
        endpoint_id: endpoint_id.to_string(),
        detected_at: crate::storage::epoch(),
        drift_type: change.change_type,
        severity: change.severity,
        description: change.description.clone(),
        before_value: change.old_value.clone(),
        after_value: change.new_value.clone(),
        field_path: change.path.clone(),
        acknowledged: false,
    }
}
