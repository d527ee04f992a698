//! Response comparison: two captured responses in, a classified diff out.
//!
//! The comparison is pure. Status, significant headers, and the JSON body
//! are examined in that order; body changes come from a recursive walk that
//! emits changes in key-sorted path order, so the same pair of responses
//! always produces the same change sequence.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Severity;

/// Category of a detected change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftType {
    FieldAdded,
    FieldRemoved,
    FieldModified,
    TypeChanged,
    PerformanceChange,
    SchemaViolation,
    StatusChanged,
    HeaderChanged,
}

impl std::fmt::Display for DriftType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriftType::FieldAdded => "field_added",
            DriftType::FieldRemoved => "field_removed",
            DriftType::FieldModified => "field_modified",
            DriftType::TypeChanged => "type_changed",
            DriftType::PerformanceChange => "performance_change",
            DriftType::SchemaViolation => "schema_violation",
            DriftType::StatusChanged => "status_changed",
            DriftType::HeaderChanged => "header_changed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DriftType {
    type Err = crate::error::DriftWatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "field_added" => Ok(DriftType::FieldAdded),
            "field_removed" => Ok(DriftType::FieldRemoved),
            "field_modified" => Ok(DriftType::FieldModified),
            "type_changed" => Ok(DriftType::TypeChanged),
            "performance_change" => Ok(DriftType::PerformanceChange),
            "schema_violation" => Ok(DriftType::SchemaViolation),
            "status_changed" => Ok(DriftType::StatusChanged),
            "header_changed" => Ok(DriftType::HeaderChanged),
            _ => Err(crate::error::DriftWatchError::SystemError(format!(
                "unknown drift type '{}'",
                s
            ))),
        }
    }
}

/// One structural change between baseline and current response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralChange {
    /// Category of the change.
    #[serde(rename = "type")]
    pub change_type: DriftType,
    /// JSONPath-style location, e.g. `$.user.id`.
    pub path: String,
    /// Classified severity.
    pub severity: Severity,
    /// Whether a downstream consumer is likely to fail.
    pub breaking: bool,
    /// Human-readable summary.
    pub description: String,
    /// Rendered previous value, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    /// Rendered current value, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
}

/// A response-time regression or improvement beyond the thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceChange {
    pub severity: Severity,
    pub description: String,
    pub old_ms: u64,
    pub new_ms: u64,
}

/// The full outcome of comparing two responses.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffResult {
    /// Whether anything at all changed.
    pub has_changes: bool,
    /// All typed changes, in canonical order.
    pub structural_changes: Vec<StructuralChange>,
    /// Value-level view: the subset of changes that modified scalar values.
    pub data_changes: Vec<StructuralChange>,
    /// Response-time change, when performance mode is on and a threshold hit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_change: Option<PerformanceChange>,
    /// The subset of structural changes with `breaking = true`.
    pub breaking_changes: Vec<StructuralChange>,
}

/// Tuning knobs for a comparison.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Emit a performance change when the response-time delta crosses a threshold.
    pub performance_mode: bool,
    /// Headers (lowercase) whose value changes are reported.
    pub significant_headers: Vec<String>,
    /// Path prefixes whose diffs are dropped.
    pub ignore_fields: Vec<String>,
    /// Paths whose removal is always critical and breaking.
    pub required_fields: Vec<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            performance_mode: false,
            significant_headers: vec!["content-type".to_string()],
            ignore_fields: Vec::new(),
            required_fields: Vec::new(),
        }
    }
}

/// A captured response reduced to the fields the comparison needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSample {
    pub status: u16,
    /// Header name (lowercase) to first value.
    pub headers: HashMap<String, String>,
    pub body: String,
    pub response_time_ms: u64,
}

/// Compare a baseline response against the current one.
pub fn compare(prev: &ResponseSample, curr: &ResponseSample, opts: &DiffOptions) -> DiffResult {
    let mut changes: Vec<StructuralChange> = Vec::new();

    // 1. Status code.
    if prev.status != curr.status {
        let crossed = is_success(prev.status) != is_success(curr.status);
        changes.push(StructuralChange {
            change_type: DriftType::StatusChanged,
            path: "$".to_string(),
            severity: Severity::High,
            breaking: crossed,
            description: format!("Status code changed from {} to {}", prev.status, curr.status),
            old_value: Some(prev.status.to_string()),
            new_value: Some(curr.status.to_string()),
        });
    }

    // 2. Significant headers.
    let mut header_names: Vec<&String> = opts.significant_headers.iter().collect();
    header_names.sort();
    for name in header_names {
        let old = prev.headers.get(name.as_str());
        let new = curr.headers.get(name.as_str());
        if old != new {
            changes.push(StructuralChange {
                change_type: DriftType::HeaderChanged,
                path: format!("$.headers.{}", name),
                severity: Severity::Medium,
                breaking: false,
                description: format!("Header '{}' changed", name),
                old_value: old.cloned(),
                new_value: new.cloned(),
            });
        }
    }

    // 3–5. Body comparison, skipped entirely when bytes are identical.
    if prev.body != curr.body {
        match (
            serde_json::from_str::<Value>(&prev.body),
            serde_json::from_str::<Value>(&curr.body),
        ) {
            (Ok(prev_json), Ok(curr_json)) => {
                walk(&prev_json, &curr_json, "$", &mut changes);
            }
            (prev_parsed, _) => {
                // One or both sides are not JSON; the worst case is a
                // previously-JSON body that no longer parses.
                let severity = if prev_parsed.is_ok() {
                    Severity::High
                } else {
                    Severity::Medium
                };
                changes.push(StructuralChange {
                    change_type: DriftType::FieldModified,
                    path: "$".to_string(),
                    severity,
                    breaking: false,
                    description: "Response body changed (not comparable as JSON)".to_string(),
                    old_value: Some(truncate(&prev.body)),
                    new_value: Some(truncate(&curr.body)),
                });
            }
        }
    }

    // 6. Policy pass: drop ignored paths, escalate required removals.
    changes.retain(|c| !path_matches_any(&c.path, &opts.ignore_fields));
    for change in &mut changes {
        if change.change_type == DriftType::FieldRemoved
            && path_matches_any(&change.path, &opts.required_fields)
        {
            change.severity = Severity::Critical;
            change.breaking = true;
        }
    }

    // 7. Performance.
    let performance_change = if opts.performance_mode && prev.response_time_ms > 0 {
        let old = prev.response_time_ms as f64;
        let new = curr.response_time_ms as f64;
        let ratio = (new - old).abs() / old;
        if ratio > 1.0 {
            Some(PerformanceChange {
                severity: Severity::High,
                description: format!(
                    "Response time changed from {}ms to {}ms ({:+.0}%)",
                    prev.response_time_ms,
                    curr.response_time_ms,
                    (new - old) / old * 100.0
                ),
                old_ms: prev.response_time_ms,
                new_ms: curr.response_time_ms,
            })
        } else if ratio > 0.25 {
            Some(PerformanceChange {
                severity: Severity::Medium,
                description: format!(
                    "Response time changed from {}ms to {}ms ({:+.0}%)",
                    prev.response_time_ms,
                    curr.response_time_ms,
                    (new - old) / old * 100.0
                ),
                old_ms: prev.response_time_ms,
                new_ms: curr.response_time_ms,
            })
        } else {
            None
        }
    } else {
        None
    };

    let data_changes = changes
        .iter()
        .filter(|c| c.change_type == DriftType::FieldModified)
        .cloned()
        .collect();
    let breaking_changes: Vec<StructuralChange> =
        changes.iter().filter(|c| c.breaking).cloned().collect();
    let has_changes = !changes.is_empty() || performance_change.is_some();

    DiffResult {
        has_changes,
        structural_changes: changes,
        data_changes,
        performance_change,
        breaking_changes,
    }
}

/// Structural walk shared with the spec validator's content diff.
///
/// Emits changes for `path` and everything beneath it, in key-sorted order.
pub fn walk(prev: &Value, curr: &Value, path: &str, out: &mut Vec<StructuralChange>) {
    match (prev, curr) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            let mut keys: Vec<&String> = prev_map.keys().chain(curr_map.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child_path = format!("{}.{}", path, key);
                match (prev_map.get(key), curr_map.get(key)) {
                    (Some(p), Some(c)) => walk(p, c, &child_path, out),
                    (Some(p), None) => out.push(StructuralChange {
                        change_type: DriftType::FieldRemoved,
                        path: child_path.clone(),
                        severity: Severity::Critical,
                        breaking: true,
                        description: format!("Field '{}' was removed", child_path),
                        old_value: Some(render(p)),
                        new_value: None,
                    }),
                    (None, Some(c)) => out.push(StructuralChange {
                        change_type: DriftType::FieldAdded,
                        path: child_path.clone(),
                        severity: Severity::Low,
                        breaking: false,
                        description: format!("Field '{}' was added", child_path),
                        old_value: None,
                        new_value: Some(render(c)),
                    }),
                    (None, None) => unreachable!("key came from one of the maps"),
                }
            }
        }
        (Value::Array(prev_arr), Value::Array(curr_arr)) => {
            if prev_arr.len() != curr_arr.len() {
                out.push(StructuralChange {
                    change_type: DriftType::FieldModified,
                    path: path.to_string(),
                    severity: Severity::Medium,
                    breaking: false,
                    description: format!(
                        "Array length changed from {} to {}",
                        prev_arr.len(),
                        curr_arr.len()
                    ),
                    old_value: Some(prev_arr.len().to_string()),
                    new_value: Some(curr_arr.len().to_string()),
                });
            }
            for (idx, (p, c)) in prev_arr.iter().zip(curr_arr.iter()).enumerate() {
                walk(p, c, &format!("{}[{}]", path, idx), out);
            }
        }
        _ if same_json_type(prev, curr) => {
            // Scalars of the same type: value comparison.
            if prev != curr {
                let severity = if path_has_identity_token(path) {
                    Severity::High
                } else {
                    Severity::Medium
                };
                out.push(StructuralChange {
                    change_type: DriftType::FieldModified,
                    path: path.to_string(),
                    severity,
                    breaking: false,
                    description: format!("Value at '{}' changed", path),
                    old_value: Some(render(prev)),
                    new_value: Some(render(curr)),
                });
            }
        }
        _ => {
            out.push(StructuralChange {
                change_type: DriftType::TypeChanged,
                path: path.to_string(),
                severity: Severity::Critical,
                breaking: true,
                description: format!(
                    "Type at '{}' changed from {} to {}",
                    path,
                    json_type_name(prev),
                    json_type_name(curr)
                ),
                old_value: Some(render(prev)),
                new_value: Some(render(curr)),
            });
        }
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn same_json_type(a: &Value, b: &Value) -> bool {
    json_type_name(a) == json_type_name(b)
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render a JSON value compactly, capped for storage and display.
fn render(v: &Value) -> String {
    let s = match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate(&s)
}

fn truncate(s: &str) -> String {
    const MAX: usize = 200;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let cut: String = s.chars().take(MAX).collect();
        format!("{}…", cut)
    }
}

/// Whether any path segment looks like an identifier or version field.
fn path_has_identity_token(path: &str) -> bool {
    path.split(['.', '[']).any(|segment| {
        let seg = segment.trim_end_matches(']').to_lowercase();
        seg == "id" || seg.ends_with("_id") || seg.contains("version")
    })
}

/// Prefix match on JSONPath strings: `$.meta` matches `$.meta` and `$.meta.x`.
fn path_matches_any(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| {
        path == p
            || path.starts_with(&format!("{}.", p))
            || path.starts_with(&format!("{}[", p))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: u16, body: &str, ms: u64) -> ResponseSample {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        ResponseSample {
            status,
            headers,
            body: body.to_string(),
            response_time_ms: ms,
        }
    }

    #[test]
    fn test_identical_responses_no_changes() {
        let a = sample(200, r#"{"a":1}"#, 50);
        let result = compare(&a, &a.clone(), &DiffOptions::default());
        assert!(!result.has_changes);
        assert!(result.structural_changes.is_empty());
    }

    #[test]
    fn test_removed_field_is_critical_breaking() {
        let prev = sample(200, r#"{"user":{"id":"123","name":"John"}}"#, 50);
        let curr = sample(200, r#"{"user":{"name":"John"}}"#, 50);
        let result = compare(&prev, &curr, &DiffOptions::default());

        assert_eq!(result.structural_changes.len(), 1);
        let change = &result.structural_changes[0];
        assert_eq!(change.change_type, DriftType::FieldRemoved);
        assert_eq!(change.path, "$.user.id");
        assert_eq!(change.severity, Severity::Critical);
        assert!(change.breaking);
        assert_eq!(result.breaking_changes.len(), 1);
    }

    #[test]
    fn test_type_change_is_critical_breaking() {
        let prev = sample(200, r#"{"age":30}"#, 50);
        let curr = sample(200, r#"{"age":"30"}"#, 50);
        let result = compare(&prev, &curr, &DiffOptions::default());

        let change = &result.structural_changes[0];
        assert_eq!(change.change_type, DriftType::TypeChanged);
        assert_eq!(change.path, "$.age");
        assert_eq!(change.severity, Severity::Critical);
        assert!(change.breaking);
    }

    #[test]
    fn test_added_field_is_low_non_breaking() {
        let prev = sample(200, r#"{"a":1}"#, 50);
        let curr = sample(200, r#"{"a":1,"b":2}"#, 50);
        let result = compare(&prev, &curr, &DiffOptions::default());

        let change = &result.structural_changes[0];
        assert_eq!(change.change_type, DriftType::FieldAdded);
        assert_eq!(change.severity, Severity::Low);
        assert!(!change.breaking);
        assert!(result.breaking_changes.is_empty());
    }

    #[test]
    fn test_scalar_modification_escalated_on_id_path() {
        let prev = sample(200, r#"{"user":{"id":"1","note":"x"}}"#, 50);
        let curr = sample(200, r#"{"user":{"id":"2","note":"y"}}"#, 50);
        let result = compare(&prev, &curr, &DiffOptions::default());

        let id_change = result
            .structural_changes
            .iter()
            .find(|c| c.path == "$.user.id")
            .unwrap();
        assert_eq!(id_change.severity, Severity::High);

        let note_change = result
            .structural_changes
            .iter()
            .find(|c| c.path == "$.user.note")
            .unwrap();
        assert_eq!(note_change.severity, Severity::Medium);
        assert_eq!(result.data_changes.len(), 2);
    }

    #[test]
    fn test_status_change_crossing_boundary_is_breaking() {
        let prev = sample(200, r#"{}"#, 50);
        let curr = sample(500, r#"{}"#, 50);
        let result = compare(&prev, &curr, &DiffOptions::default());

        let change = &result.structural_changes[0];
        assert_eq!(change.change_type, DriftType::StatusChanged);
        assert!(change.breaking);

        // Within the success class: still reported, not breaking.
        let curr2 = sample(201, r#"{}"#, 50);
        let result2 = compare(&prev, &curr2, &DiffOptions::default());
        assert!(!result2.structural_changes[0].breaking);
    }

    #[test]
    fn test_header_change_reported_for_significant_headers() {
        let prev = sample(200, r#"{}"#, 50);
        let mut curr = sample(200, r#"{}"#, 50);
        curr.headers
            .insert("content-type".to_string(), "text/html".to_string());
        let result = compare(&prev, &curr, &DiffOptions::default());

        let change = &result.structural_changes[0];
        assert_eq!(change.change_type, DriftType::HeaderChanged);
        assert_eq!(change.path, "$.headers.content-type");
    }

    #[test]
    fn test_non_json_body_change() {
        let prev = sample(200, r#"{"a":1}"#, 50);
        let curr = sample(200, "<html>oops</html>", 50);
        let result = compare(&prev, &curr, &DiffOptions::default());

        let change = &result.structural_changes[0];
        assert_eq!(change.change_type, DriftType::FieldModified);
        assert_eq!(change.path, "$");
        // previous parsed, current did not
        assert_eq!(change.severity, Severity::High);
    }

    #[test]
    fn test_array_length_diff() {
        let prev = sample(200, r#"{"items":[1,2,3]}"#, 50);
        let curr = sample(200, r#"{"items":[1,9]}"#, 50);
        let result = compare(&prev, &curr, &DiffOptions::default());

        let length = result
            .structural_changes
            .iter()
            .find(|c| c.path == "$.items")
            .unwrap();
        assert_eq!(length.change_type, DriftType::FieldModified);

        // Index-aligned prefix still compared element-wise.
        let second = result
            .structural_changes
            .iter()
            .find(|c| c.path == "$.items[1]")
            .unwrap();
        assert_eq!(second.change_type, DriftType::FieldModified);
    }

    #[test]
    fn test_performance_thresholds() {
        let prev = sample(200, r#"{}"#, 50);
        let curr = sample(200, r#"{}"#, 500);
        let opts = DiffOptions {
            performance_mode: true,
            ..Default::default()
        };
        let result = compare(&prev, &curr, &opts);
        let perf = result.performance_change.unwrap();
        assert_eq!(perf.severity, Severity::High);
        assert!(result.has_changes);

        // 30% regression → medium.
        let curr2 = sample(200, r#"{}"#, 65);
        let result2 = compare(&prev, &curr2, &opts);
        assert_eq!(
            result2.performance_change.unwrap().severity,
            Severity::Medium
        );

        // 10% → below threshold.
        let curr3 = sample(200, r#"{}"#, 55);
        assert!(compare(&prev, &curr3, &opts).performance_change.is_none());

        // Off by default.
        assert!(compare(&prev, &curr, &DiffOptions::default())
            .performance_change
            .is_none());
    }

    #[test]
    fn test_ignore_fields_drop_diffs() {
        let prev = sample(200, r#"{"meta":{"request_id":"a"},"v":1}"#, 50);
        let curr = sample(200, r#"{"meta":{"request_id":"b"},"v":2}"#, 50);
        let opts = DiffOptions {
            ignore_fields: vec!["$.meta".to_string()],
            ..Default::default()
        };
        let result = compare(&prev, &curr, &opts);
        assert_eq!(result.structural_changes.len(), 1);
        assert_eq!(result.structural_changes[0].path, "$.v");
    }

    #[test]
    fn test_required_field_removal_forced_breaking() {
        let prev = sample(200, r#"{"optional":"x"}"#, 50);
        let curr = sample(200, r#"{}"#, 50);
        let opts = DiffOptions {
            required_fields: vec!["$.optional".to_string()],
            ..Default::default()
        };
        let result = compare(&prev, &curr, &opts);
        assert_eq!(result.structural_changes[0].severity, Severity::Critical);
        assert!(result.structural_changes[0].breaking);
    }

    #[test]
    fn test_deterministic_ordering() {
        let prev = sample(200, r#"{"z":1,"a":{"y":2,"b":3},"m":[1,2]}"#, 50);
        let curr = sample(200, r#"{"z":9,"a":{"y":8,"b":7},"m":[3,4]}"#, 50);
        let first = compare(&prev, &curr, &DiffOptions::default());
        for _ in 0..10 {
            let again = compare(&prev, &curr, &DiffOptions::default());
            assert_eq!(again.structural_changes, first.structural_changes);
        }
        // Paths come out key-sorted.
        let paths: Vec<&str> = first
            .structural_changes
            .iter()
            .map(|c| c.path.as_str())
            .collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn test_nested_recursion() {
        let prev = sample(200, r#"{"a":{"b":{"c":{"d":1}}}}"#, 50);
        let curr = sample(200, r#"{"a":{"b":{"c":{"d":2}}}}"#, 50);
        let result = compare(&prev, &curr, &DiffOptions::default());
        assert_eq!(result.structural_changes[0].path, "$.a.b.c.d");
    }
}
