//! Export stored data as one serializable bundle.

use std::time::Duration;

use serde::Serialize;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::storage::{Alert, AlertFilter, Drift, DriftFilter, MonitoringRun, Storage};

/// Everything persisted within the export window.
#[derive(Debug, Serialize)]
pub struct ExportBundle {
    pub exported_at: chrono::DateTime<chrono::Utc>,
    pub period_secs: u64,
    pub endpoints: Vec<Endpoint>,
    pub monitoring_runs: Vec<MonitoringRun>,
    pub drifts: Vec<Drift>,
    pub alerts: Vec<Alert>,
}

/// Collect endpoints plus their runs, drifts, and alerts from the window.
pub fn execute(storage: &dyn Storage, period: Duration) -> Result<ExportBundle> {
    let since = chrono::Utc::now() - chrono::Duration::seconds(period.as_secs() as i64);
    let endpoints = storage.list_endpoints()?;

    let mut monitoring_runs = Vec::new();
    for endpoint in &endpoints {
        monitoring_runs.extend(storage.get_monitoring_history(&endpoint.id, period)?);
    }

    let drifts = storage.get_drifts(&DriftFilter {
        since: Some(since),
        ..Default::default()
    })?;
    let alerts = storage.get_alerts(&AlertFilter {
        since: Some(since),
        ..Default::default()
    })?;

    Ok(ExportBundle {
        exported_at: chrono::Utc::now(),
        period_secs: period.as_secs(),
        endpoints,
        monitoring_runs,
        drifts,
        alerts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_export_round_trips_as_json() {
        let storage = MemoryStorage::new();
        storage
            .save_endpoint(&Endpoint::new("api", "https://api.example.com"))
            .unwrap();
        let mut run = MonitoringRun::new("api");
        run.response_status = 200;
        storage.save_monitoring_run(&mut run).unwrap();

        let bundle = execute(&storage, Duration::from_secs(3600)).unwrap();
        assert_eq!(bundle.endpoints.len(), 1);
        assert_eq!(bundle.monitoring_runs.len(), 1);

        let json = serde_json::to_string(&bundle).unwrap();
        assert!(json.contains("\"monitoring_runs\""));
    }
}
