//! Endpoint definitions: monitoring targets and their per-endpoint settings.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DriftWatchError, Result};

/// Minimum user-facing polling interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);
/// Intervals at or above this are rounded down to one check per day.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// HTTP methods supported for monitored endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Get
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = DriftWatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(DriftWatchError::ConfigError(format!(
                "Invalid HTTP method '{}'. Use GET, POST, PUT, or DELETE.",
                s
            ))),
        }
    }
}

/// How strictly responses are validated and which fields diffs may touch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Strict mode turns unknown status codes and missing required headers
    /// into errors instead of warnings.
    #[serde(default)]
    pub strict: bool,
    /// JSONPath-style prefixes whose diffs are dropped entirely.
    #[serde(default)]
    pub ignore_fields: Vec<String>,
    /// Paths whose removal is always a critical, breaking change.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Header keys with their values masked, for `Debug` output. Request and
/// channel headers routinely carry bearer tokens.
pub(crate) fn redact_header_values(headers: &HashMap<String, String>) -> BTreeMap<&str, &str> {
    headers.keys().map(|k| (k.as_str(), "[REDACTED]")).collect()
}

/// Per-endpoint monitoring settings, embedded in [`Endpoint`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Polling interval. User-facing values must be between 1 minute and 24 hours.
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Per-request timeout.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Number of retries on transient failures.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Extra request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Whether this endpoint is polled by the scheduler.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Optional file whose contents become the request body (POST/PUT).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_file: Option<PathBuf>,
    /// Validation behavior for this endpoint.
    #[serde(default)]
    pub validation: ValidationPolicy,
}

fn default_retry_count() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("retry_count", &self.retry_count)
            .field("headers", &redact_header_values(&self.headers))
            .field("enabled", &self.enabled)
            .field("body_file", &self.body_file)
            .field("validation", &self.validation)
            .finish()
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            timeout: Duration::from_secs(30),
            retry_count: default_retry_count(),
            headers: HashMap::new(),
            enabled: true,
            body_file: None,
            validation: ValidationPolicy::default(),
        }
    }
}

/// A monitoring target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Stable unique identifier.
    pub id: String,
    /// Target URL (http or https).
    pub url: String,
    /// Request method.
    #[serde(default)]
    pub method: HttpMethod,
    /// Optional OpenAPI spec file validated against on each check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_file: Option<PathBuf>,
    /// Monitoring settings.
    #[serde(default)]
    pub config: EndpointConfig,
    /// When the endpoint was first saved.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// When the endpoint was last modified.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Create an endpoint with default settings.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            url: url.into(),
            method: HttpMethod::Get,
            spec_file: None,
            config: EndpointConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate the endpoint definition against the user-facing rules:
    /// non-empty id, well-formed http(s) URL, interval within bounds.
    ///
    /// Intervals of 24 hours or more are clamped to daily rather than
    /// rejected; intervals below one minute are a configuration error.
    pub fn validate(&mut self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(DriftWatchError::InvalidEndpoint {
                id: "<empty>".to_string(),
                reason: "id must not be empty".to_string(),
            });
        }

        let parsed = url::Url::parse(&self.url).map_err(|e| DriftWatchError::InvalidEndpoint {
            id: self.id.clone(),
            reason: format!("invalid URL '{}': {}", self.url, e),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(DriftWatchError::InvalidEndpoint {
                id: self.id.clone(),
                reason: format!("URL scheme must be http or https, got '{}'", parsed.scheme()),
            });
        }

        if self.config.interval < MIN_INTERVAL {
            return Err(DriftWatchError::InvalidEndpoint {
                id: self.id.clone(),
                reason: format!(
                    "interval {} is below the 1m minimum",
                    format_duration(self.config.interval)
                ),
            });
        }
        if self.config.interval > MAX_INTERVAL {
            log::warn!(
                "Endpoint '{}' interval {} exceeds 24h; rounding to daily",
                self.id,
                format_duration(self.config.interval)
            );
            self.config.interval = MAX_INTERVAL;
        }

        if self.config.timeout.is_zero() {
            return Err(DriftWatchError::InvalidEndpoint {
                id: self.id.clone(),
                reason: "timeout must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Parse a human duration string: `45s`, `5m`, `2h`, `1d`, or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DriftWatchError::ConfigError(
            "empty duration string".to_string(),
        ));
    }
    let (num, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = num.parse().map_err(|_| {
        DriftWatchError::ConfigError(format!(
            "Invalid duration '{}'. Use forms like 30s, 5m, 2h, 1d.",
            s
        ))
    })?;
    let secs = match unit.trim() {
        "s" | "sec" | "secs" => value,
        "m" | "min" | "mins" => value * 60,
        "h" | "hr" | "hrs" => value * 3600,
        "d" | "day" | "days" => value * 86400,
        other => {
            return Err(DriftWatchError::ConfigError(format!(
                "Unknown duration unit '{}' in '{}'. Use s, m, h, or d.",
                other, s
            )))
        }
    };
    Ok(Duration::from_secs(secs))
}

/// Render a duration in the largest unit that divides it evenly.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 86400 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Serde adapter storing durations as human strings (`5m`) in YAML/JSON.
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("m5").is_err());
    }

    #[test]
    fn test_format_duration_round_trip() {
        for s in ["45s", "5m", "2h", "1d"] {
            assert_eq!(format_duration(parse_duration(s).unwrap()), s);
        }
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("DELETE".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
        assert!("PATCH".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut e = Endpoint::new("api", "ftp://example.com/feed");
        assert!(e.validate().is_err());
        let mut e = Endpoint::new("api", "not a url");
        assert!(e.validate().is_err());
    }

    #[test]
    fn test_validate_interval_bounds() {
        let mut e = Endpoint::new("api", "https://example.com/v1");
        e.config.interval = Duration::from_secs(30);
        assert!(e.validate().is_err());

        e.config.interval = Duration::from_secs(48 * 3600);
        e.validate().unwrap();
        assert_eq!(e.config.interval, MAX_INTERVAL);
    }

    #[test]
    fn test_debug_redacts_header_values() {
        let mut config = EndpointConfig::default();
        config
            .headers
            .insert("Authorization".to_string(), "Bearer s3cret".to_string());
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("Authorization"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn test_endpoint_config_yaml_round_trip() {
        let config = EndpointConfig {
            interval: Duration::from_secs(300),
            timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: EndpointConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, config);
    }
}
