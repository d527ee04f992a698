//! Endpoint status overview from stored history.
//!
//! The scheduler exposes its own live status map; this command answers
//! the same question from persisted data so it works without a running
//! monitor process.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::storage::{DriftFilter, Storage};

/// One endpoint's most recent observations.
#[derive(Debug, Serialize)]
pub struct EndpointStatusRow {
    pub id: String,
    pub url: String,
    pub enabled: bool,
    pub last_check: Option<DateTime<Utc>>,
    /// Status of the most recent run; 0 means the check failed outright.
    pub last_status: Option<u16>,
    pub last_response_time_ms: Option<u64>,
    /// Unacknowledged drifts from the last 24 hours.
    pub recent_drifts: usize,
}

/// The status overview.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub endpoints: Vec<EndpointStatusRow>,
}

/// Build the overview from the last day of stored data.
pub fn execute(storage: &dyn Storage) -> Result<StatusReport> {
    let day = Duration::from_secs(24 * 3600);
    let since = Utc::now() - chrono::Duration::hours(24);
    let mut endpoints = Vec::new();

    for endpoint in storage.list_endpoints()? {
        let runs = storage.get_monitoring_history(&endpoint.id, day)?;
        let latest = runs.first();
        let recent_drifts = storage
            .get_drifts(&DriftFilter {
                endpoint_id: Some(endpoint.id.clone()),
                since: Some(since),
                acknowledged: Some(false),
                ..Default::default()
            })?
            .len();

        endpoints.push(EndpointStatusRow {
            id: endpoint.id,
            url: endpoint.url,
            enabled: endpoint.config.enabled,
            last_check: latest.map(|r| r.timestamp),
            last_status: latest.map(|r| r.response_status),
            last_response_time_ms: latest.map(|r| r.response_time_ms),
            recent_drifts,
        });
    }

    Ok(StatusReport { endpoints })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::storage::{MemoryStorage, MonitoringRun};

    #[test]
    fn test_status_reflects_latest_run() {
        let storage = MemoryStorage::new();
        storage
            .save_endpoint(&Endpoint::new("api", "https://api.example.com"))
            .unwrap();
        let mut old = MonitoringRun::new("api");
        old.timestamp = Utc::now() - chrono::Duration::hours(2);
        old.response_status = 500;
        storage.save_monitoring_run(&mut old).unwrap();
        let mut new = MonitoringRun::new("api");
        new.response_status = 200;
        new.response_time_ms = 33;
        storage.save_monitoring_run(&mut new).unwrap();

        let report = execute(&storage).unwrap();
        assert_eq!(report.endpoints.len(), 1);
        assert_eq!(report.endpoints[0].last_status, Some(200));
        assert_eq!(report.endpoints[0].last_response_time_ms, Some(33));
    }

    #[test]
    fn test_status_with_no_runs() {
        let storage = MemoryStorage::new();
        storage
            .save_endpoint(&Endpoint::new("api", "https://api.example.com"))
            .unwrap();
        let report = execute(&storage).unwrap();
        assert!(report.endpoints[0].last_check.is_none());
    }
}
