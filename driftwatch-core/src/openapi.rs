//! OpenAPI response validation.
//!
//! Loads an OpenAPI 3 document (YAML or JSON), resolves the operation
//! matching an endpoint's URL path and method, and checks a captured
//! response against it: declared status codes, required response headers,
//! and body fields versus the schema. Undeclared body fields come back as
//! low-severity field diffs rather than errors.
//!
//! Header checks are presence-only; validating header values against
//! declared patterns or types is a known limitation.

use std::path::{Path, PathBuf};

use openapiv3::{OpenAPI, Operation, ReferenceOr, Schema, SchemaKind, StatusCode, Type};
use serde::Serialize;
use serde_json::Value;

use crate::diff::{self, DriftType, StructuralChange};
use crate::endpoint::HttpMethod;
use crate::error::{DriftWatchError, Result, Severity};
use crate::http::HttpResponse;

/// How validation findings are graded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Unknown status codes and missing required headers are errors.
    Strict,
    /// The same conditions are downgraded to warnings.
    Lenient,
}

/// Outcome of validating one response against one operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Schema-driven diffs: undeclared fields, missing required fields,
    /// fields whose type disagrees with the schema.
    pub field_diffs: Vec<StructuralChange>,
}

impl ValidationReport {
    /// Opaque encoding stored on monitoring runs.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A loaded spec plus the operations it declares.
pub struct SpecValidator {
    spec: OpenAPI,
    source: PathBuf,
}

impl SpecValidator {
    /// Load and parse a spec file. YAML unless the extension says JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DriftWatchError::SpecInvalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let spec: OpenAPI = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| DriftWatchError::SpecInvalid {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|e| DriftWatchError::SpecInvalid {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        };

        Ok(Self {
            spec,
            source: path.to_path_buf(),
        })
    }

    /// The file this spec was loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Validate a captured response against the operation matching
    /// `url_path` and `method`.
    pub fn validate_response(
        &self,
        response: &HttpResponse,
        url_path: &str,
        method: HttpMethod,
        mode: ValidationMode,
    ) -> Result<ValidationReport> {
        let operation = self.find_operation(url_path, method)?;
        let mut report = ValidationReport {
            valid: true,
            ..Default::default()
        };

        let matched = match_status(operation, response.status);
        match matched {
            Some(spec_response) => {
                if let Some(resolved) = self.resolve_response(spec_response) {
                    self.check_headers(resolved, response, mode, &mut report);
                    self.check_body(resolved, response, &mut report);
                }
            }
            None => {
                let finding = format!(
                    "Status {} is not declared for {} {}",
                    response.status, method, url_path
                );
                self.grade(mode, finding, &mut report);
            }
        }

        Ok(report)
    }

    /// Content diff used when no spec is configured: the structural walk
    /// without status, header, or performance rules.
    pub fn compare_responses(prev: &Value, curr: &Value) -> Vec<StructuralChange> {
        let mut changes = Vec::new();
        diff::walk(prev, curr, "$", &mut changes);
        changes
    }

    fn grade(&self, mode: ValidationMode, finding: String, report: &mut ValidationReport) {
        match mode {
            ValidationMode::Strict => {
                report.valid = false;
                report.errors.push(finding);
            }
            ValidationMode::Lenient => report.warnings.push(finding),
        }
    }

    fn find_operation(&self, url_path: &str, method: HttpMethod) -> Result<&Operation> {
        for (template, item) in &self.spec.paths.paths {
            let ReferenceOr::Item(item) = item else {
                continue;
            };
            if !path_template_matches(template, url_path) {
                continue;
            }
            let operation = match method {
                HttpMethod::Get => item.get.as_ref(),
                HttpMethod::Post => item.post.as_ref(),
                HttpMethod::Put => item.put.as_ref(),
                HttpMethod::Delete => item.delete.as_ref(),
            };
            if let Some(op) = operation {
                return Ok(op);
            }
        }
        Err(DriftWatchError::OperationNotFound {
            method: method.to_string(),
            path: url_path.to_string(),
        })
    }

    fn resolve_response<'a>(
        &'a self,
        r: &'a ReferenceOr<openapiv3::Response>,
    ) -> Option<&'a openapiv3::Response> {
        match r {
            ReferenceOr::Item(item) => Some(item),
            ReferenceOr::Reference { reference } => {
                let name = reference.strip_prefix("#/components/responses/")?;
                match self.spec.components.as_ref()?.responses.get(name)? {
                    ReferenceOr::Item(item) => Some(item),
                    ReferenceOr::Reference { .. } => None,
                }
            }
        }
    }

    fn resolve_schema<'a>(&'a self, r: &'a ReferenceOr<Schema>) -> Option<&'a Schema> {
        match r {
            ReferenceOr::Item(item) => Some(item),
            ReferenceOr::Reference { reference } => {
                let name = reference.strip_prefix("#/components/schemas/")?;
                match self.spec.components.as_ref()?.schemas.get(name)? {
                    ReferenceOr::Item(item) => Some(item),
                    ReferenceOr::Reference { .. } => None,
                }
            }
        }
    }

    fn resolve_boxed_schema<'a>(&'a self, r: &'a ReferenceOr<Box<Schema>>) -> Option<&'a Schema> {
        match r {
            ReferenceOr::Item(item) => Some(item),
            ReferenceOr::Reference { reference } => {
                let name = reference.strip_prefix("#/components/schemas/")?;
                match self.spec.components.as_ref()?.schemas.get(name)? {
                    ReferenceOr::Item(item) => Some(item),
                    ReferenceOr::Reference { .. } => None,
                }
            }
        }
    }

    fn check_headers(
        &self,
        spec_response: &openapiv3::Response,
        response: &HttpResponse,
        mode: ValidationMode,
        report: &mut ValidationReport,
    ) {
        for (name, header) in spec_response.headers.iter() {
            let required = match header {
                ReferenceOr::Item(h) => h.required,
                ReferenceOr::Reference { .. } => false,
            };
            if required && !response.headers.contains_key(&name.to_lowercase()) {
                self.grade(
                    mode,
                    format!("Required response header '{}' is missing", name),
                    report,
                );
            }
        }
    }

    fn check_body(
        &self,
        spec_response: &openapiv3::Response,
        response: &HttpResponse,
        report: &mut ValidationReport,
    ) {
        let Some(media) = spec_response
            .content
            .iter()
            .find(|(ct, _)| ct.starts_with("application/json"))
            .map(|(_, media)| media)
        else {
            return;
        };
        let Some(schema) = media.schema.as_ref().and_then(|s| self.resolve_schema(s)) else {
            return;
        };
        let Ok(body) = serde_json::from_slice::<Value>(&response.body) else {
            report
                .warnings
                .push("Response body is not valid JSON; schema not checked".to_string());
            return;
        };

        self.walk_schema(schema, &body, "$", report);
    }

    /// Recursive comparison of a JSON value against an object schema.
    fn walk_schema(&self, schema: &Schema, value: &Value, path: &str, report: &mut ValidationReport) {
        let SchemaKind::Type(Type::Object(object)) = &schema.schema_kind else {
            return;
        };
        let Value::Object(map) = value else {
            report.field_diffs.push(StructuralChange {
                change_type: DriftType::TypeChanged,
                path: path.to_string(),
                severity: Severity::Critical,
                breaking: true,
                description: format!("Expected an object at '{}' per the schema", path),
                old_value: Some("object".to_string()),
                new_value: Some(json_type(value).to_string()),
            });
            return;
        };

        // Declared but absent required properties.
        for required in &object.required {
            if !map.contains_key(required) {
                let field_path = format!("{}.{}", path, required);
                report.field_diffs.push(StructuralChange {
                    change_type: DriftType::FieldRemoved,
                    path: field_path.clone(),
                    severity: Severity::Critical,
                    breaking: true,
                    description: format!("Required field '{}' is missing", field_path),
                    old_value: None,
                    new_value: None,
                });
            }
        }

        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            let field_value = &map[key.as_str()];
            let field_path = format!("{}.{}", path, key);
            match object.properties.get(key) {
                None => {
                    report.field_diffs.push(StructuralChange {
                        change_type: DriftType::FieldAdded,
                        path: field_path.clone(),
                        severity: Severity::Low,
                        breaking: false,
                        description: format!("Field '{}' is not declared in the schema", field_path),
                        old_value: None,
                        new_value: Some(json_type(field_value).to_string()),
                    });
                }
                Some(prop) => {
                    let Some(prop_schema) = self.resolve_boxed_schema(prop) else {
                        continue;
                    };
                    if let Some(expected) = schema_type_name(prop_schema) {
                        let actual = json_type(field_value);
                        if !types_compatible(expected, actual, field_value) {
                            report.field_diffs.push(StructuralChange {
                                change_type: DriftType::TypeChanged,
                                path: field_path.clone(),
                                severity: Severity::Critical,
                                breaking: true,
                                description: format!(
                                    "Field '{}' is {} but the schema declares {}",
                                    field_path, actual, expected
                                ),
                                old_value: Some(expected.to_string()),
                                new_value: Some(actual.to_string()),
                            });
                            continue;
                        }
                    }
                    if matches!(
                        prop_schema.schema_kind,
                        SchemaKind::Type(Type::Object(_))
                    ) {
                        self.walk_schema(prop_schema, field_value, &field_path, report);
                    }
                }
            }
        }
    }
}

/// Match a response status against the operation's declared responses:
/// exact code first, then a range like `4XX`, then `default`.
fn match_status(
    operation: &Operation,
    status: u16,
) -> Option<&ReferenceOr<openapiv3::Response>> {
    let responses = &operation.responses;
    for (code, response) in responses.responses.iter() {
        if let StatusCode::Code(c) = code {
            if *c == status {
                return Some(response);
            }
        }
    }
    for (code, response) in responses.responses.iter() {
        if let StatusCode::Range(range) = code {
            if status / 100 == *range {
                return Some(response);
            }
        }
    }
    responses.default.as_ref()
}

/// Whether a concrete URL path matches a spec template like `/users/{id}`.
fn path_template_matches(template: &str, path: &str) -> bool {
    let t: Vec<&str> = template.trim_matches('/').split('/').collect();
    let p: Vec<&str> = path.trim_matches('/').split('/').collect();
    if t.len() != p.len() {
        return false;
    }
    t.iter()
        .zip(&p)
        .all(|(ts, ps)| (ts.starts_with('{') && ts.ends_with('}')) || ts == ps)
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn schema_type_name(schema: &Schema) -> Option<&'static str> {
    match &schema.schema_kind {
        SchemaKind::Type(Type::String(_)) => Some("string"),
        SchemaKind::Type(Type::Number(_)) | SchemaKind::Type(Type::Integer(_)) => Some("number"),
        SchemaKind::Type(Type::Boolean(_)) => Some("boolean"),
        SchemaKind::Type(Type::Object(_)) => Some("object"),
        SchemaKind::Type(Type::Array(_)) => Some("array"),
        // Composite schemas (oneOf/anyOf/allOf) are not type-checked.
        _ => None,
    }
}

/// Null is tolerated for any declared type: nullability markers vary
/// between spec versions and generators.
fn types_compatible(expected: &str, actual: &str, value: &Value) -> bool {
    actual == expected || value.is_null()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::io::Write;

    const SPEC_YAML: &str = r#"
openapi: 3.0.3
info:
  title: Test API
  version: "1.0"
paths:
  /users/{id}:
    get:
      responses:
        '200':
          description: A user
          headers:
            X-Request-Id:
              required: true
              schema:
                type: string
          content:
            application/json:
              schema:
                type: object
                required: [id, name]
                properties:
                  id:
                    type: string
                  name:
                    type: string
                  age:
                    type: integer
"#;

    fn load_spec() -> SpecValidator {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(SPEC_YAML.as_bytes()).unwrap();
        // The spec is parsed eagerly, so the temp file may drop afterwards.
        SpecValidator::load(file.path()).unwrap()
    }

    fn response(status: u16, body: &str, with_request_id: bool) -> HttpResponse {
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            vec!["application/json".to_string()],
        );
        if with_request_id {
            headers.insert("x-request-id".to_string(), vec!["r-1".to_string()]);
        }
        HttpResponse {
            status,
            headers,
            body: body.as_bytes().to_vec(),
            response_time_ms: 10,
            fetched_at: Utc::now(),
            attempts: 1,
        }
    }

    #[test]
    fn test_valid_response_passes() {
        let validator = load_spec();
        let resp = response(200, r#"{"id":"1","name":"Ada"}"#, true);
        let report = validator
            .validate_response(&resp, "/users/1", HttpMethod::Get, ValidationMode::Strict)
            .unwrap();
        assert!(report.valid, "errors: {:?}", report.errors);
        assert!(report.field_diffs.is_empty());
    }

    #[test]
    fn test_undeclared_status_strict_vs_lenient() {
        let validator = load_spec();
        let resp = response(418, r#"{}"#, true);

        let strict = validator
            .validate_response(&resp, "/users/1", HttpMethod::Get, ValidationMode::Strict)
            .unwrap();
        assert!(!strict.valid);
        assert_eq!(strict.errors.len(), 1);

        let lenient = validator
            .validate_response(&resp, "/users/1", HttpMethod::Get, ValidationMode::Lenient)
            .unwrap();
        assert!(lenient.valid);
        assert_eq!(lenient.warnings.len(), 1);
    }

    #[test]
    fn test_missing_required_header() {
        let validator = load_spec();
        let resp = response(200, r#"{"id":"1","name":"Ada"}"#, false);
        let report = validator
            .validate_response(&resp, "/users/1", HttpMethod::Get, ValidationMode::Strict)
            .unwrap();
        assert!(!report.valid);
        assert!(report.errors[0].contains("X-Request-Id"));
    }

    #[test]
    fn test_missing_required_field_is_critical_diff() {
        let validator = load_spec();
        let resp = response(200, r#"{"name":"Ada"}"#, true);
        let report = validator
            .validate_response(&resp, "/users/1", HttpMethod::Get, ValidationMode::Lenient)
            .unwrap();
        let diff = report
            .field_diffs
            .iter()
            .find(|d| d.path == "$.id")
            .unwrap();
        assert_eq!(diff.change_type, DriftType::FieldRemoved);
        assert_eq!(diff.severity, Severity::Critical);
        assert!(diff.breaking);
    }

    #[test]
    fn test_undeclared_field_is_low_diff() {
        let validator = load_spec();
        let resp = response(200, r#"{"id":"1","name":"Ada","nickname":"ada"}"#, true);
        let report = validator
            .validate_response(&resp, "/users/1", HttpMethod::Get, ValidationMode::Strict)
            .unwrap();
        assert!(report.valid);
        let diff = report
            .field_diffs
            .iter()
            .find(|d| d.path == "$.nickname")
            .unwrap();
        assert_eq!(diff.change_type, DriftType::FieldAdded);
        assert_eq!(diff.severity, Severity::Low);
    }

    #[test]
    fn test_type_mismatch_is_critical_diff() {
        let validator = load_spec();
        let resp = response(200, r#"{"id":"1","name":"Ada","age":"30"}"#, true);
        let report = validator
            .validate_response(&resp, "/users/1", HttpMethod::Get, ValidationMode::Strict)
            .unwrap();
        let diff = report
            .field_diffs
            .iter()
            .find(|d| d.path == "$.age")
            .unwrap();
        assert_eq!(diff.change_type, DriftType::TypeChanged);
        assert!(diff.breaking);
    }

    #[test]
    fn test_unknown_operation() {
        let validator = load_spec();
        let resp = response(200, r#"{}"#, true);
        let err = validator
            .validate_response(&resp, "/orders", HttpMethod::Get, ValidationMode::Strict)
            .unwrap_err();
        assert!(matches!(err, DriftWatchError::OperationNotFound { .. }));
    }

    #[test]
    fn test_path_template_matching() {
        assert!(path_template_matches("/users/{id}", "/users/42"));
        assert!(path_template_matches("/users", "/users"));
        assert!(!path_template_matches("/users/{id}", "/users"));
        assert!(!path_template_matches("/users/{id}", "/orders/42"));
    }

    #[test]
    fn test_compare_responses_walks_bodies() {
        let prev = serde_json::json!({"a": 1, "b": "x"});
        let curr = serde_json::json!({"a": 2});
        let changes = SpecValidator::compare_responses(&prev, &curr);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().any(|c| c.path == "$.b"
            && c.change_type == DriftType::FieldRemoved));
    }
}
