//! Monitoring report over a look-back window.

use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, Severity};
use crate::storage::{DriftFilter, Storage};

/// Aggregate figures for one endpoint.
#[derive(Debug, Serialize)]
pub struct EndpointReport {
    pub id: String,
    pub url: String,
    pub checks: usize,
    /// Checks that returned a 2xx status.
    pub successes: usize,
    /// Checks that produced no response at all.
    pub failures: usize,
    pub avg_response_time_ms: u64,
    pub drifts: usize,
    pub critical_drifts: usize,
    pub high_drifts: usize,
    pub unacknowledged_drifts: usize,
}

/// The full report.
#[derive(Debug, Serialize)]
pub struct MonitoringReport {
    /// Window length in seconds.
    pub period_secs: u64,
    pub endpoints: Vec<EndpointReport>,
    pub total_checks: usize,
    pub total_drifts: usize,
}

/// Build a report from stored runs and drifts.
pub fn execute(storage: &dyn Storage, period: Duration) -> Result<MonitoringReport> {
    let since = chrono::Utc::now() - chrono::Duration::seconds(period.as_secs() as i64);
    let mut endpoints = Vec::new();
    let mut total_checks = 0;
    let mut total_drifts = 0;

    for endpoint in storage.list_endpoints()? {
        let runs = storage.get_monitoring_history(&endpoint.id, period)?;
        let drifts = storage.get_drifts(&DriftFilter {
            endpoint_id: Some(endpoint.id.clone()),
            since: Some(since),
            ..Default::default()
        })?;

        let successes = runs
            .iter()
            .filter(|r| (200..300).contains(&r.response_status))
            .count();
        let failures = runs.iter().filter(|r| r.response_status == 0).count();
        let responded: Vec<&_> = runs.iter().filter(|r| r.response_status != 0).collect();
        let avg_response_time_ms = if responded.is_empty() {
            0
        } else {
            responded.iter().map(|r| r.response_time_ms).sum::<u64>() / responded.len() as u64
        };

        total_checks += runs.len();
        total_drifts += drifts.len();

        endpoints.push(EndpointReport {
            id: endpoint.id,
            url: endpoint.url,
            checks: runs.len(),
            successes,
            failures,
            avg_response_time_ms,
            drifts: drifts.len(),
            critical_drifts: drifts
                .iter()
                .filter(|d| d.severity == Severity::Critical)
                .count(),
            high_drifts: drifts
                .iter()
                .filter(|d| d.severity == Severity::High)
                .count(),
            unacknowledged_drifts: drifts.iter().filter(|d| !d.acknowledged).count(),
        });
    }

    Ok(MonitoringReport {
        period_secs: period.as_secs(),
        endpoints,
        total_checks,
        total_drifts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DriftType;
    use crate::endpoint::Endpoint;
    use crate::storage::{epoch, Drift, MemoryStorage, MonitoringRun};

    #[test]
    fn test_report_aggregates_per_endpoint() {
        let storage = MemoryStorage::new();
        storage
            .save_endpoint(&Endpoint::new("api", "https://api.example.com"))
            .unwrap();

        for (status, ms) in [(200u16, 40u64), (200, 60), (0, 0)] {
            let mut run = MonitoringRun::new("api");
            run.response_status = status;
            run.response_time_ms = ms;
            storage.save_monitoring_run(&mut run).unwrap();
        }
        let mut drift = Drift {
            id: 0,
            endpoint_id: "api".to_string(),
            detected_at: epoch(),
            drift_type: DriftType::FieldRemoved,
            severity: Severity::Critical,
            description: "x".to_string(),
            before_value: None,
            after_value: None,
            field_path: "$.x".to_string(),
            acknowledged: false,
        };
        storage.save_drift(&mut drift).unwrap();

        let report = execute(&storage, Duration::from_secs(3600)).unwrap();
        assert_eq!(report.endpoints.len(), 1);
        let ep = &report.endpoints[0];
        assert_eq!(ep.checks, 3);
        assert_eq!(ep.successes, 2);
        assert_eq!(ep.failures, 1);
        assert_eq!(ep.avg_response_time_ms, 50);
        assert_eq!(ep.critical_drifts, 1);
        assert_eq!(ep.unacknowledged_drifts, 1);
        assert_eq!(report.total_checks, 3);
        assert_eq!(report.total_drifts, 1);
    }
}
