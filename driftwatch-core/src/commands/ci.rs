//! One-shot CI mode: check every enabled endpoint against a baseline and
//! produce a machine-readable result plus a gating exit code.
//!
//! Exit codes: 0 success, 1 endpoint error, 2 breaking change or `--fail-on`
//! threshold exceeded, 3 configuration error, 4 every endpoint failed with a
//! network error, 5 strict spec validation failed. When several apply, the
//! more specific gate wins: 2, then 5, then 4, then 1.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::baseline::Baseline;
use crate::checker::{CheckMode, Checker};
use crate::diff::{DriftType, StructuralChange};
use crate::endpoint::Endpoint;
use crate::error::{DriftWatchError, ErrorKind, Result, Severity};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERAL_ERROR: i32 = 1;
pub const EXIT_BREAKING: i32 = 2;
pub const EXIT_CONFIG_ERROR: i32 = 3;
pub const EXIT_NETWORK_ERROR: i32 = 4;
pub const EXIT_VALIDATION_ERROR: i32 = 5;

/// Gate condition for exit code 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    /// Fail on any breaking change (the default).
    Breaking,
    /// Fail on any change at or above this severity.
    Severity(Severity),
}

impl Default for FailOn {
    fn default() -> Self {
        FailOn::Breaking
    }
}

impl std::str::FromStr for FailOn {
    type Err = DriftWatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "breaking" => Ok(FailOn::Breaking),
            "critical" | "crit" => Ok(FailOn::Severity(Severity::Critical)),
            "high" => Ok(FailOn::Severity(Severity::High)),
            "medium" | "med" => Ok(FailOn::Severity(Severity::Medium)),
            "low" => Ok(FailOn::Severity(Severity::Low)),
            _ => Err(DriftWatchError::ConfigError(format!(
                "Invalid --fail-on '{}'. Use breaking, critical, high, medium, or low.",
                s
            ))),
        }
    }
}

/// Output format for the CI result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiFormat {
    Json,
    Junit,
    Summary,
}

impl std::str::FromStr for CiFormat {
    type Err = DriftWatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(CiFormat::Json),
            "junit" => Ok(CiFormat::Junit),
            "summary" => Ok(CiFormat::Summary),
            _ => Err(DriftWatchError::ConfigError(format!(
                "Invalid --format '{}'. Use json, junit, or summary.",
                s
            ))),
        }
    }
}

/// Per-endpoint CI outcome.
#[derive(Debug, Clone, Serialize)]
pub struct CiEndpointResult {
    pub id: String,
    pub url: String,
    pub method: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub breaking_changes: usize,
    pub changes: Vec<StructuralChange>,
    pub validation_errors: Vec<String>,
}

/// The aggregated CI run.
#[derive(Debug, Clone, Serialize)]
pub struct CiResult {
    pub success: bool,
    pub exit_code: i32,
    pub timestamp: DateTime<Utc>,
    /// Wall-clock seconds for the whole run.
    pub duration: f64,
    pub endpoints_checked: usize,
    pub total_changes: usize,
    pub breaking_changes: usize,
    pub critical_changes: usize,
    pub high_changes: usize,
    pub medium_changes: usize,
    pub low_changes: usize,
    pub summary: String,
    pub endpoints: Vec<CiEndpointResult>,
}

/// Options for one CI run.
#[derive(Debug, Default)]
pub struct CiOptions {
    pub fail_on: FailOn,
    pub include_performance: bool,
    /// Explicit baseline; absent means "compare against stored history".
    pub baseline: Option<Baseline>,
    /// Persist runs and drifts as a live check would.
    pub persist: bool,
}

/// Execute the CI pass over `endpoints`.
pub async fn execute(checker: &Checker, endpoints: &[Endpoint], opts: &CiOptions) -> Result<CiResult> {
    let started = Instant::now();
    let timestamp = Utc::now();
    let mode = if opts.persist {
        CheckMode::Live
    } else {
        CheckMode::Ci
    };

    let mut results = Vec::new();
    let mut error_kinds: Vec<ErrorKind> = Vec::new();

    for endpoint in endpoints.iter().filter(|e| e.config.enabled) {
        let baseline_entry = match &opts.baseline {
            Some(baseline) => match baseline.get(&endpoint.id) {
                Some(entry) => Some(entry),
                None => {
                    let e = DriftWatchError::BaselineMissing(endpoint.id.clone());
                    error_kinds.push(e.kind());
                    results.push(errored_result(endpoint, &e));
                    continue;
                }
            },
            None => None,
        };

        match checker.run_check(endpoint, baseline_entry, mode).await {
            Ok(outcome) => {
                let mut changes: Vec<StructuralChange> = outcome
                    .diff
                    .as_ref()
                    .map(|d| d.structural_changes.clone())
                    .unwrap_or_default();
                if let Some(perf) = outcome.diff.as_ref().and_then(|d| d.performance_change.as_ref())
                {
                    changes.push(StructuralChange {
                        change_type: DriftType::PerformanceChange,
                        path: "$".to_string(),
                        severity: perf.severity,
                        breaking: false,
                        description: perf.description.clone(),
                        old_value: Some(format!("{}ms", perf.old_ms)),
                        new_value: Some(format!("{}ms", perf.new_ms)),
                    });
                }
                let validation_errors = outcome
                    .validation
                    .as_ref()
                    .map(|v| v.errors.clone())
                    .unwrap_or_default();
                let breaking = changes.iter().filter(|c| c.breaking).count();

                results.push(CiEndpointResult {
                    id: endpoint.id.clone(),
                    url: endpoint.url.clone(),
                    method: endpoint.method.to_string(),
                    success: true,
                    status_code: Some(outcome.response.status),
                    response_time: Some(outcome.response.response_time_ms),
                    error: None,
                    breaking_changes: breaking,
                    changes,
                    validation_errors,
                });
            }
            Err(e) => {
                log::warn!("CI check failed for '{}': {}", endpoint.id, e);
                error_kinds.push(e.kind());
                results.push(errored_result(endpoint, &e));
            }
        }
    }

    let total_changes: usize = results.iter().map(|r| r.changes.len()).sum();
    let breaking_changes: usize = results.iter().map(|r| r.breaking_changes).sum();
    let count_severity = |s: Severity| -> usize {
        results
            .iter()
            .flat_map(|r| &r.changes)
            .filter(|c| c.severity == s)
            .count()
    };
    let critical_changes = count_severity(Severity::Critical);
    let high_changes = count_severity(Severity::High);
    let medium_changes = count_severity(Severity::Medium);
    let low_changes = count_severity(Severity::Low);

    let exit_code = derive_exit_code(&results, &error_kinds, opts.fail_on, breaking_changes);
    let errored = results.iter().filter(|r| !r.success).count();
    let summary = format!(
        "{} endpoint(s) checked, {} error(s), {} change(s) ({} breaking)",
        results.len(),
        errored,
        total_changes,
        breaking_changes
    );

    Ok(CiResult {
        success: exit_code == EXIT_SUCCESS,
        exit_code,
        timestamp,
        duration: started.elapsed().as_secs_f64(),
        endpoints_checked: results.len(),
        total_changes,
        breaking_changes,
        critical_changes,
        high_changes,
        medium_changes,
        low_changes,
        summary,
        endpoints: results,
    })
}

fn errored_result(endpoint: &Endpoint, error: &DriftWatchError) -> CiEndpointResult {
    CiEndpointResult {
        id: endpoint.id.clone(),
        url: endpoint.url.clone(),
        method: endpoint.method.to_string(),
        success: false,
        status_code: None,
        response_time: None,
        error: Some(format!("[{}] {}", error.code(), error)),
        breaking_changes: 0,
        changes: Vec::new(),
        validation_errors: Vec::new(),
    }
}

fn derive_exit_code(
    results: &[CiEndpointResult],
    error_kinds: &[ErrorKind],
    fail_on: FailOn,
    breaking_total: usize,
) -> i32 {
    let threshold_hit = match fail_on {
        FailOn::Breaking => breaking_total > 0,
        FailOn::Severity(min) => results
            .iter()
            .flat_map(|r| &r.changes)
            .any(|c| c.severity >= min),
    };
    if threshold_hit {
        return EXIT_BREAKING;
    }

    if results.iter().any(|r| !r.validation_errors.is_empty()) {
        return EXIT_VALIDATION_ERROR;
    }

    let errored = results.iter().filter(|r| !r.success).count();
    if errored > 0 {
        let all_failed = errored == results.len();
        let all_network = !error_kinds.is_empty()
            && error_kinds.iter().all(|k| *k == ErrorKind::Network);
        if all_failed && all_network {
            return EXIT_NETWORK_ERROR;
        }
        return EXIT_GENERAL_ERROR;
    }

    EXIT_SUCCESS
}

/// Render the result as pretty JSON.
pub fn render_json(result: &CiResult) -> String {
    serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string())
}

/// Render the result as a JUnit XML report: one testsuite, one testcase per
/// endpoint. Endpoint errors become `<error>`, breaking changes `<failure>`.
pub fn render_junit(result: &CiResult) -> String {
    let failures = result
        .endpoints
        .iter()
        .filter(|e| e.success && e.breaking_changes > 0)
        .count();
    let errors = result.endpoints.iter().filter(|e| !e.success).count();

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuite name=\"DriftWatch CI Check\" tests=\"{}\" failures=\"{}\" errors=\"{}\" time=\"{:.3}\" timestamp=\"{}\">\n",
        result.endpoints_checked,
        failures,
        errors,
        result.duration,
        result.timestamp.to_rfc3339(),
    ));

    for endpoint in &result.endpoints {
        let time = endpoint.response_time.unwrap_or(0) as f64 / 1000.0;
        xml.push_str(&format!(
            "  <testcase name=\"endpoint_{}\" classname=\"driftwatch.endpoint\" time=\"{:.3}\">\n",
            xml_escape(&endpoint.id),
            time
        ));

        if let Some(error) = &endpoint.error {
            xml.push_str(&format!(
                "    <error message=\"{}\"/>\n",
                xml_escape(error)
            ));
        } else if endpoint.breaking_changes > 0 {
            let details: Vec<String> = endpoint
                .changes
                .iter()
                .filter(|c| c.breaking)
                .map(|c| format!("{}: {}", c.path, c.description))
                .collect();
            xml.push_str(&format!(
                "    <failure message=\"{} breaking change(s)\">{}</failure>\n",
                endpoint.breaking_changes,
                xml_escape(&details.join("\n"))
            ));
        }

        xml.push_str(&format!(
            "    <system-out>{}</system-out>\n",
            xml_escape(&endpoint_summary(endpoint))
        ));
        xml.push_str("  </testcase>\n");
    }

    xml.push_str("</testsuite>\n");
    xml
}

/// Render a short human-readable summary.
pub fn render_summary(result: &CiResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("DriftWatch CI — {}\n", result.summary));
    for endpoint in &result.endpoints {
        out.push_str(&format!("  {}\n", endpoint_summary(endpoint)));
        for change in &endpoint.changes {
            out.push_str(&format!(
                "    [{}]{} {} — {}\n",
                change.severity,
                if change.breaking { " BREAKING" } else { "" },
                change.path,
                change.description
            ));
        }
    }
    out.push_str(&format!("Exit code: {}\n", result.exit_code));
    out
}

fn endpoint_summary(endpoint: &CiEndpointResult) -> String {
    match (&endpoint.error, endpoint.status_code) {
        (Some(error), _) => format!("{} {} — ERROR: {}", endpoint.method, endpoint.url, error),
        (None, Some(status)) => format!(
            "{} {} — {} in {}ms, {} change(s), {} breaking",
            endpoint.method,
            endpoint.url,
            status,
            endpoint.response_time.unwrap_or(0),
            endpoint.changes.len(),
            endpoint.breaking_changes
        ),
        (None, None) => format!("{} {} — not checked", endpoint.method, endpoint.url),
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(severity: Severity, breaking: bool) -> StructuralChange {
        StructuralChange {
            change_type: if breaking {
                DriftType::FieldRemoved
            } else {
                DriftType::FieldAdded
            },
            path: "$.x".to_string(),
            severity,
            breaking,
            description: "test".to_string(),
            old_value: None,
            new_value: None,
        }
    }

    fn endpoint_result(
        id: &str,
        success: bool,
        changes: Vec<StructuralChange>,
    ) -> CiEndpointResult {
        let breaking = changes.iter().filter(|c| c.breaking).count();
        CiEndpointResult {
            id: id.to_string(),
            url: format!("https://api.example.com/{}", id),
            method: "GET".to_string(),
            success,
            status_code: success.then_some(200),
            response_time: success.then_some(42),
            error: (!success).then(|| "[NETWORK_CONNECTION] connection refused".to_string()),
            breaking_changes: breaking,
            changes,
            validation_errors: Vec::new(),
        }
    }

    #[test]
    fn test_exit_zero_when_clean() {
        let results = vec![endpoint_result("a", true, vec![])];
        assert_eq!(
            derive_exit_code(&results, &[], FailOn::Breaking, 0),
            EXIT_SUCCESS
        );
    }

    #[test]
    fn test_exit_two_on_breaking() {
        let results = vec![endpoint_result(
            "a",
            true,
            vec![change(Severity::Critical, true)],
        )];
        assert_eq!(
            derive_exit_code(&results, &[], FailOn::Breaking, 1),
            EXIT_BREAKING
        );
    }

    #[test]
    fn test_exit_one_on_endpoint_error() {
        let results = vec![
            endpoint_result("a", true, vec![]),
            endpoint_result("b", false, vec![]),
        ];
        assert_eq!(
            derive_exit_code(&results, &[ErrorKind::Network], FailOn::Breaking, 0),
            EXIT_GENERAL_ERROR
        );
    }

    #[test]
    fn test_exit_four_when_everything_unreachable() {
        let results = vec![
            endpoint_result("a", false, vec![]),
            endpoint_result("b", false, vec![]),
        ];
        assert_eq!(
            derive_exit_code(
                &results,
                &[ErrorKind::Network, ErrorKind::Network],
                FailOn::Breaking,
                0
            ),
            EXIT_NETWORK_ERROR
        );
    }

    #[test]
    fn test_fail_on_severity_threshold() {
        // Only high changes with fail_on=critical: passes.
        let results = vec![endpoint_result(
            "a",
            true,
            vec![change(Severity::High, false)],
        )];
        assert_eq!(
            derive_exit_code(&results, &[], FailOn::Severity(Severity::Critical), 0),
            EXIT_SUCCESS
        );
        // Same changes with fail_on=high: gate trips.
        assert_eq!(
            derive_exit_code(&results, &[], FailOn::Severity(Severity::High), 0),
            EXIT_BREAKING
        );
    }

    #[test]
    fn test_exit_five_on_validation_errors() {
        let mut result = endpoint_result("a", true, vec![]);
        result.validation_errors = vec!["Status 418 is not declared".to_string()];
        assert_eq!(
            derive_exit_code(&[result], &[], FailOn::Breaking, 0),
            EXIT_VALIDATION_ERROR
        );
    }

    #[test]
    fn test_fail_on_parse() {
        assert_eq!("breaking".parse::<FailOn>().unwrap(), FailOn::Breaking);
        assert_eq!(
            "crit".parse::<FailOn>().unwrap(),
            FailOn::Severity(Severity::Critical)
        );
        assert_eq!(
            "HIGH".parse::<FailOn>().unwrap(),
            FailOn::Severity(Severity::High)
        );
        assert!("urgent".parse::<FailOn>().is_err());
    }

    #[test]
    fn test_junit_rendering_and_escaping() {
        let mut broken = endpoint_result(
            "users<&>",
            true,
            vec![change(Severity::Critical, true)],
        );
        broken.changes[0].description = "Field \"x\" & 'y' removed".to_string();
        let errored = endpoint_result("orders", false, vec![]);

        let result = CiResult {
            success: false,
            exit_code: EXIT_BREAKING,
            timestamp: Utc::now(),
            duration: 0.5,
            endpoints_checked: 2,
            total_changes: 1,
            breaking_changes: 1,
            critical_changes: 1,
            high_changes: 0,
            medium_changes: 0,
            low_changes: 0,
            summary: "test".to_string(),
            endpoints: vec![broken, errored],
        };

        let xml = render_junit(&result);
        assert!(xml.contains("testsuite name=\"DriftWatch CI Check\""));
        assert!(xml.contains("tests=\"2\" failures=\"1\" errors=\"1\""));
        assert!(xml.contains("endpoint_users&lt;&amp;&gt;"));
        assert!(xml.contains("<failure message=\"1 breaking change(s)\">"));
        assert!(xml.contains("&quot;x&quot; &amp; &apos;y&apos;"));
        assert!(xml.contains("<error message="));
        assert!(xml.contains("<system-out>"));
        assert!(!xml.contains("Field \"x\""));
    }

    #[test]
    fn test_json_rendering_schema_fields() {
        let result = CiResult {
            success: true,
            exit_code: 0,
            timestamp: Utc::now(),
            duration: 0.1,
            endpoints_checked: 1,
            total_changes: 0,
            breaking_changes: 0,
            critical_changes: 0,
            high_changes: 0,
            medium_changes: 0,
            low_changes: 0,
            summary: "ok".to_string(),
            endpoints: vec![endpoint_result("a", true, vec![])],
        };
        let json: serde_json::Value = serde_json::from_str(&render_json(&result)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["endpoints_checked"], 1);
        assert!(json["endpoints"][0]["id"].is_string());
        assert_eq!(json["endpoints"][0]["method"], "GET");
    }
}
