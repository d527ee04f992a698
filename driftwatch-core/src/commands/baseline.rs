//! Capture and verify baseline files.

use std::path::Path;

use serde::Serialize;

use crate::baseline::{Baseline, BaselineEntry};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::http::{HttpExecutor, RequestSpec, RetryPolicy};

/// Report from a baseline capture.
#[derive(Debug, Serialize)]
pub struct BaselineCaptureReport {
    /// Where the baseline file was written.
    pub path: String,
    /// Endpoint ids captured successfully.
    pub captured: Vec<String>,
    /// Endpoints that could not be fetched, with the reason.
    pub skipped: Vec<SkippedEndpoint>,
}

#[derive(Debug, Serialize)]
pub struct SkippedEndpoint {
    pub id: String,
    pub reason: String,
}

/// Report from validating an existing baseline file.
#[derive(Debug, Serialize)]
pub struct BaselineValidateReport {
    pub path: String,
    pub valid: bool,
    pub entries: usize,
    pub errors: Vec<String>,
}

/// Fetch every enabled endpoint once and write the responses as a baseline.
pub async fn capture(
    executor: &HttpExecutor,
    endpoints: &[Endpoint],
    retry: &RetryPolicy,
    output: &Path,
) -> Result<BaselineCaptureReport> {
    let mut baseline = Baseline::default();
    let mut captured = Vec::new();
    let mut skipped = Vec::new();

    for endpoint in endpoints.iter().filter(|e| e.config.enabled) {
        let spec = RequestSpec {
            method: endpoint.method,
            url: endpoint.url.clone(),
            headers: endpoint.config.headers.clone(),
            body: None,
            timeout: endpoint.config.timeout,
        };
        match executor.execute(&spec, retry).await {
            Ok(response) => {
                baseline.insert(&endpoint.id, BaselineEntry::from_response(&response));
                captured.push(endpoint.id.clone());
            }
            Err(e) => {
                log::warn!("Baseline capture skipped '{}': {}", endpoint.id, e);
                skipped.push(SkippedEndpoint {
                    id: endpoint.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    baseline.validate(&output.display().to_string())?;
    baseline.save(output)?;

    Ok(BaselineCaptureReport {
        path: output.display().to_string(),
        captured,
        skipped,
    })
}

/// Check that a baseline file loads and satisfies its invariants.
pub fn validate(path: &Path) -> BaselineValidateReport {
    match Baseline::load(path) {
        Ok(baseline) => BaselineValidateReport {
            path: path.display().to_string(),
            valid: true,
            entries: baseline.len(),
            errors: Vec::new(),
        },
        Err(e) => BaselineValidateReport {
            path: path.display().to_string(),
            valid: false,
            entries: 0,
            errors: vec![e.to_string()],
        },
    }
}
