//! Configuration loading and resolution.
//!
//! Supports a YAML config file (`.driftwatch.yaml` by default), environment
//! variables, and CLI overrides with a defined priority order
//! (CLI > env > YAML > defaults). String values may reference environment
//! variables as `$NAME` or `${NAME}` for secrets (tokens, webhook URLs).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::{parse_duration, Endpoint, EndpointConfig, HttpMethod};
use crate::error::{DriftWatchError, Result, Severity};

/// Helper macro to apply an optional owned value directly to a target field.
macro_rules! apply_option {
    ($opt:expr => $target:expr) => {
        if let Some(v) = $opt {
            $target = v;
        }
    };
}

/// Helper macro to clone a borrowed optional value directly to a target field.
macro_rules! apply_option_clone {
    ($opt:expr => $target:expr) => {
        if let Some(ref v) = $opt {
            $target = v.clone();
        }
    };
}

/// Top-level configuration for DriftWatch.
#[derive(Debug, Clone, Default)]
pub struct DriftWatchConfig {
    /// Project metadata (name, environment label).
    pub project: ProjectConfig,
    /// Global defaults applied to every endpoint and to the scheduler.
    pub global: GlobalConfig,
    /// Monitored endpoints.
    pub endpoints: Vec<Endpoint>,
    /// Alert channels and routing rules.
    pub alerting: AlertingConfig,
    /// Report generation settings.
    pub reporting: ReportingConfig,
    /// How long persisted rows are kept.
    pub retention: RetentionConfig,
}

/// Project metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Display name used in reports and alerts.
    pub name: String,
    /// Logical environment label (e.g. "production").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "driftwatch".to_string(),
            environment: None,
        }
    }
}

/// Global defaults for requests, workers, and storage.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Default per-request timeout when an endpoint does not set one.
    pub timeout: Duration,
    /// Default retry count for transient failures.
    pub retry_count: u32,
    /// Base delay for exponential retry backoff.
    pub retry_delay: Duration,
    /// Size of the scheduler's worker pool.
    pub max_workers: usize,
    /// SQLite database path, or `:memory:` for the in-memory engine.
    pub database_url: String,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            max_workers: 4,
            database_url: ".driftwatch.db".to_string(),
            user_agent: format!("driftwatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// One configured alert delivery channel.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    /// Slack incoming webhook.
    Slack {
        name: String,
        webhook_url: String,
    },
    /// Generic JSON POST webhook.
    Webhook {
        name: String,
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Render the alert into the process log (no external delivery).
    Log {
        name: String,
    },
}

// Webhook URLs and channel headers are delivery credentials; keep them
// out of Debug output the way the request-header types do.
impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelConfig::Slack { name, .. } => f
                .debug_struct("Slack")
                .field("name", name)
                .field("webhook_url", &"[REDACTED]")
                .finish(),
            ChannelConfig::Webhook { name, headers, .. } => f
                .debug_struct("Webhook")
                .field("name", name)
                .field("url", &"[REDACTED]")
                .field("headers", &crate::endpoint::redact_header_values(headers))
                .finish(),
            ChannelConfig::Log { name } => {
                f.debug_struct("Log").field("name", name).finish()
            }
        }
    }
}

impl ChannelConfig {
    /// The channel's configured name.
    pub fn name(&self) -> &str {
        match self {
            ChannelConfig::Slack { name, .. } => name,
            ChannelConfig::Webhook { name, .. } => name,
            ChannelConfig::Log { name } => name,
        }
    }

    /// The channel kind recorded on Alert rows.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelConfig::Slack { .. } => "slack",
            ChannelConfig::Webhook { .. } => "webhook",
            ChannelConfig::Log { .. } => "log",
        }
    }
}

/// Routing rule deciding which drifts reach which channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule name for logs.
    pub name: String,
    /// Minimum drift severity that triggers the rule.
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    /// Only route drifts flagged as breaking.
    #[serde(default)]
    pub breaking_only: bool,
    /// Channel names to deliver to.
    pub channels: Vec<String>,
    /// Endpoint ids the rule applies to; empty means all endpoints.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

fn default_min_severity() -> Severity {
    Severity::Medium
}

/// Alerting section: channels plus routing rules.
#[derive(Debug, Clone, Default)]
pub struct AlertingConfig {
    /// Configured delivery channels.
    pub channels: Vec<ChannelConfig>,
    /// Routing rules evaluated per drift.
    pub rules: Vec<AlertRule>,
    /// Delivery attempts per alert before giving up.
    pub max_attempts: u32,
    /// Base delay for delivery retry backoff.
    pub retry_delay: Duration,
}

/// Report generation settings.
#[derive(Debug, Clone)]
pub struct ReportingConfig {
    /// Default look-back window for `report` and `export`.
    pub default_period: Duration,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            default_period: Duration::from_secs(24 * 3600),
        }
    }
}

/// Row retention windows per table.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// How long monitoring runs are kept.
    pub monitoring_runs: Duration,
    /// How long drift rows are kept.
    pub drifts: Duration,
    /// How long alert rows are kept.
    pub alerts: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            monitoring_runs: Duration::from_secs(30 * 86400),
            drifts: Duration::from_secs(90 * 86400),
            alerts: Duration::from_secs(90 * 86400),
        }
    }
}

// ── YAML deserialization structs ──

#[derive(Deserialize, Default)]
struct YamlConfig {
    project: Option<ProjectConfig>,
    global: Option<YamlGlobalConfig>,
    endpoints: Option<Vec<YamlEndpoint>>,
    alerting: Option<YamlAlertingConfig>,
    reporting: Option<YamlReportingConfig>,
    retention: Option<YamlRetentionConfig>,
}

#[derive(Deserialize, Default)]
struct YamlGlobalConfig {
    timeout: Option<String>,
    retry_count: Option<u32>,
    retry_delay: Option<String>,
    max_workers: Option<usize>,
    database_url: Option<String>,
    user_agent: Option<String>,
}

#[derive(Deserialize)]
struct YamlEndpoint {
    id: String,
    url: String,
    method: Option<String>,
    interval: Option<String>,
    timeout: Option<String>,
    retry_count: Option<u32>,
    #[serde(default)]
    headers: HashMap<String, String>,
    enabled: Option<bool>,
    body_file: Option<PathBuf>,
    spec: Option<PathBuf>,
    validation: Option<crate::endpoint::ValidationPolicy>,
}

#[derive(Deserialize, Default)]
struct YamlAlertingConfig {
    channels: Option<Vec<ChannelConfig>>,
    rules: Option<Vec<AlertRule>>,
    max_attempts: Option<u32>,
    retry_delay: Option<String>,
}

#[derive(Deserialize, Default)]
struct YamlReportingConfig {
    default_period: Option<String>,
}

#[derive(Deserialize, Default)]
struct YamlRetentionConfig {
    monitoring_runs: Option<String>,
    drifts: Option<String>,
    alerts: Option<String>,
}

/// CLI overrides that take highest priority.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override the database path.
    pub database_url: Option<String>,
    /// Override the global request timeout.
    pub timeout: Option<Duration>,
    /// Override the worker pool size.
    pub max_workers: Option<usize>,
}

/// Default config file name searched in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".driftwatch.yaml";

impl DriftWatchConfig {
    /// Load configuration with the following priority (highest wins):
    /// 1. CLI arguments
    /// 2. Environment variables (`DRIFTWATCH_*`)
    /// 3. YAML config file
    /// 4. Built-in defaults
    pub fn load(config_path: Option<&str>, overrides: &CliOverrides) -> Result<Self> {
        let mut config = DriftWatchConfig::default();

        // Layer 3: YAML config file
        let yaml_path = config_path.unwrap_or(DEFAULT_CONFIG_FILE);
        match std::fs::read_to_string(yaml_path) {
            Ok(content) => {
                let interpolated = interpolate_env(&content)?;
                let yaml_config: YamlConfig =
                    serde_yaml::from_str(&interpolated).map_err(|e| {
                        DriftWatchError::ConfigError(format!(
                            "Failed to parse config file '{}': {}",
                            yaml_path, e
                        ))
                    })?;
                config.apply_yaml(yaml_config)?;
            }
            Err(_) if config_path.is_none() => {
                // No config file is fine when not explicitly requested
            }
            Err(_) => {
                return Err(DriftWatchError::ConfigFileNotFound {
                    path: yaml_path.to_string(),
                });
            }
        }

        // Layer 2: Environment variables
        config.apply_env()?;

        // Layer 1: CLI overrides
        config.apply_cli(overrides);

        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) -> Result<()> {
        if let Some(p) = yaml.project {
            self.project = p;
        }

        if let Some(g) = yaml.global {
            if let Some(v) = g.timeout {
                self.global.timeout = parse_duration(&v)?;
            }
            apply_option!(g.retry_count => self.global.retry_count);
            if let Some(v) = g.retry_delay {
                self.global.retry_delay = parse_duration(&v)?;
            }
            apply_option!(g.max_workers => self.global.max_workers);
            apply_option!(g.database_url => self.global.database_url);
            apply_option!(g.user_agent => self.global.user_agent);
        }

        if let Some(endpoints) = yaml.endpoints {
            self.endpoints = endpoints
                .into_iter()
                .map(|e| self.build_endpoint(e))
                .collect::<Result<Vec<_>>>()?;
        }

        if let Some(a) = yaml.alerting {
            apply_option!(a.channels => self.alerting.channels);
            apply_option!(a.rules => self.alerting.rules);
            apply_option!(a.max_attempts => self.alerting.max_attempts);
            if let Some(v) = a.retry_delay {
                self.alerting.retry_delay = parse_duration(&v)?;
            }
        }

        if let Some(r) = yaml.reporting {
            if let Some(v) = r.default_period {
                self.reporting.default_period = parse_duration(&v)?;
            }
        }

        if let Some(r) = yaml.retention {
            if let Some(v) = r.monitoring_runs {
                self.retention.monitoring_runs = parse_duration(&v)?;
            }
            if let Some(v) = r.drifts {
                self.retention.drifts = parse_duration(&v)?;
            }
            if let Some(v) = r.alerts {
                self.retention.alerts = parse_duration(&v)?;
            }
        }

        Ok(())
    }

    /// Convert a YAML endpoint entry, filling gaps from the global section.
    fn build_endpoint(&self, y: YamlEndpoint) -> Result<Endpoint> {
        let method = match y.method {
            Some(m) => m.parse::<HttpMethod>()?,
            None => HttpMethod::Get,
        };
        let interval = match y.interval {
            Some(v) => parse_duration(&v)?,
            None => EndpointConfig::default().interval,
        };
        let timeout = match y.timeout {
            Some(v) => parse_duration(&v)?,
            None => self.global.timeout,
        };
        let now = chrono::Utc::now();
        Ok(Endpoint {
            id: y.id,
            url: y.url,
            method,
            spec_file: y.spec,
            config: EndpointConfig {
                interval,
                timeout,
                retry_count: y.retry_count.unwrap_or(self.global.retry_count),
                headers: y.headers,
                enabled: y.enabled.unwrap_or(true),
                body_file: y.body_file,
                validation: y.validation.unwrap_or_default(),
            },
            created_at: now,
            updated_at: now,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("DRIFTWATCH_DATABASE_URL") {
            self.global.database_url = v;
        }
        if let Ok(v) = std::env::var("DRIFTWATCH_TIMEOUT") {
            self.global.timeout = parse_duration(&v)?;
        }
        if let Ok(v) = std::env::var("DRIFTWATCH_RETRY_COUNT") {
            if let Ok(n) = v.parse::<u32>() {
                self.global.retry_count = n;
            }
        }
        if let Ok(v) = std::env::var("DRIFTWATCH_MAX_WORKERS") {
            if let Ok(n) = v.parse::<usize>() {
                self.global.max_workers = n;
            }
        }
        if let Ok(v) = std::env::var("DRIFTWATCH_USER_AGENT") {
            self.global.user_agent = v;
        }
        Ok(())
    }

    fn apply_cli(&mut self, overrides: &CliOverrides) {
        apply_option_clone!(overrides.database_url => self.global.database_url);
        apply_option!(overrides.timeout => self.global.timeout);
        apply_option!(overrides.max_workers => self.global.max_workers);
    }

    /// Validate the assembled configuration: worker pool size, endpoint
    /// definitions, unique ids, and rule → channel references.
    pub fn validate(&mut self) -> Result<()> {
        if self.global.max_workers == 0 {
            return Err(DriftWatchError::ConfigError(
                "global.max_workers must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for endpoint in &mut self.endpoints {
            endpoint.validate()?;
            if !seen.insert(endpoint.id.clone()) {
                return Err(DriftWatchError::ConfigError(format!(
                    "Duplicate endpoint id '{}'",
                    endpoint.id
                )));
            }
        }

        let channel_names: std::collections::HashSet<&str> = self
            .alerting
            .channels
            .iter()
            .map(|c| c.name())
            .collect();
        for rule in &self.alerting.rules {
            for channel in &rule.channels {
                if !channel_names.contains(channel.as_str()) {
                    return Err(DriftWatchError::ConfigError(format!(
                        "Alert rule '{}' references unknown channel '{}'",
                        rule.name, channel
                    )));
                }
            }
        }

        if self.alerting.max_attempts == 0 {
            self.alerting.max_attempts = 3;
        }
        if self.alerting.retry_delay.is_zero() {
            self.alerting.retry_delay = Duration::from_secs(2);
        }

        Ok(())
    }

    /// Find an endpoint by id.
    pub fn endpoint(&self, id: &str) -> Result<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| DriftWatchError::EndpointNotFound(id.to_string()))
    }

    /// Starter YAML written by `driftwatch init`.
    pub fn starter_yaml() -> String {
        format!(
            r#"project:
  name: my-api
  environment: production

global:
  timeout: 30s
  retry_count: 3
  retry_delay: 1s
  max_workers: 4
  database_url: .driftwatch.db
  user_agent: driftwatch/{version}

endpoints:
  - id: example-api
    url: https://httpbin.org/json
    method: GET
    interval: 5m
    timeout: 10s
    headers:
      Accept: application/json
    enabled: true

alerting:
  channels:
    - type: log
      name: console
  rules:
    - name: breaking-changes
      min_severity: high
      breaking_only: true
      channels: [console]

reporting:
  default_period: 24h

retention:
  monitoring_runs: 30d
  drifts: 90d
  alerts: 90d
"#,
            version = env!("CARGO_PKG_VERSION")
        )
    }
}

/// Replace `$NAME` and `${NAME}` references with environment values.
///
/// Only uppercase names are treated as references so JSONPath strings and
/// shell-looking values pass through untouched. A referenced variable that
/// is not set is a configuration error.
pub fn interpolate_env(content: &str) -> Result<String> {
    let mut out = String::with_capacity(content.len());
    let mut chars = content.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = matches!(chars.peek(), Some((_, '{')));
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&(_, nc)) = chars.peek() {
            if nc.is_ascii_uppercase() || nc == '_' || (!name.is_empty() && nc.is_ascii_digit()) {
                name.push(nc);
                chars.next();
            } else {
                break;
            }
        }
        if braced {
            match chars.peek() {
                Some(&(_, '}')) => {
                    chars.next();
                }
                _ => {
                    return Err(DriftWatchError::ConfigError(format!(
                        "Unterminated ${{{}}} reference in config",
                        name
                    )))
                }
            }
        }
        if name.is_empty() {
            out.push('$');
            if braced {
                out.push('{');
            }
            continue;
        }
        match std::env::var(&name) {
            Ok(value) => out.push_str(&value),
            Err(_) => {
                return Err(DriftWatchError::ConfigError(format!(
                    "Environment variable '{}' referenced in config is not set",
                    name
                )))
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriftWatchConfig::default();
        assert_eq!(config.global.max_workers, 4);
        assert_eq!(config.global.retry_count, 3);
        assert_eq!(config.global.database_url, ".driftwatch.db");
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
project:
  name: payments
global:
  timeout: 20s
  max_workers: 8
  database_url: /var/lib/dw.db
endpoints:
  - id: users
    url: https://api.example.com/users
    interval: 10m
    headers:
      Accept: application/json
  - id: orders
    url: https://api.example.com/orders
    method: POST
    enabled: false
alerting:
  channels:
    - type: slack
      name: ops
      webhook_url: https://hooks.slack.com/services/T/B/x
  rules:
    - name: critical-only
      min_severity: critical
      channels: [ops]
"#;
        let parsed: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let mut config = DriftWatchConfig::default();
        config.apply_yaml(parsed).unwrap();
        config.validate().unwrap();

        assert_eq!(config.project.name, "payments");
        assert_eq!(config.global.timeout, Duration::from_secs(20));
        assert_eq!(config.global.max_workers, 8);
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[0].config.interval, Duration::from_secs(600));
        // endpoint timeout falls back to the global value
        assert_eq!(config.endpoints[0].config.timeout, Duration::from_secs(20));
        assert_eq!(config.endpoints[1].method, HttpMethod::Post);
        assert!(!config.endpoints[1].config.enabled);
        assert_eq!(config.alerting.channels[0].kind(), "slack");
        assert_eq!(config.alerting.rules[0].min_severity, Severity::Critical);
    }

    #[test]
    fn test_duplicate_endpoint_ids_rejected() {
        let mut config = DriftWatchConfig::default();
        config.endpoints.push(Endpoint::new("a", "https://x.example/1"));
        config.endpoints.push(Endpoint::new("a", "https://x.example/2"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rule_unknown_channel_rejected() {
        let mut config = DriftWatchConfig::default();
        config.alerting.rules.push(AlertRule {
            name: "r".to_string(),
            min_severity: Severity::Low,
            breaking_only: false,
            channels: vec!["nope".to_string()],
            endpoints: vec![],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = DriftWatchConfig::default();
        let overrides = CliOverrides {
            database_url: Some("/tmp/other.db".to_string()),
            timeout: Some(Duration::from_secs(5)),
            max_workers: Some(2),
        };
        config.apply_cli(&overrides);
        assert_eq!(config.global.database_url, "/tmp/other.db");
        assert_eq!(config.global.timeout, Duration::from_secs(5));
        assert_eq!(config.global.max_workers, 2);
    }

    #[test]
    fn test_interpolate_env() {
        std::env::set_var("DW_TEST_TOKEN", "s3cret");
        assert_eq!(
            interpolate_env("Bearer $DW_TEST_TOKEN").unwrap(),
            "Bearer s3cret"
        );
        assert_eq!(
            interpolate_env("Bearer ${DW_TEST_TOKEN}!").unwrap(),
            "Bearer s3cret!"
        );
        // lowercase after $ is not a reference
        assert_eq!(interpolate_env("$.user.id").unwrap(), "$.user.id");
    }

    #[test]
    fn test_interpolate_env_missing_var() {
        std::env::remove_var("DW_TEST_MISSING");
        assert!(interpolate_env("$DW_TEST_MISSING").is_err());
    }

    #[test]
    fn test_channel_debug_redacts_secrets() {
        let slack = ChannelConfig::Slack {
            name: "ops".to_string(),
            webhook_url: "https://hooks.slack.com/services/T/B/t0ken".to_string(),
        };
        let rendered = format!("{:?}", slack);
        assert!(rendered.contains("ops"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("t0ken"));

        let webhook = ChannelConfig::Webhook {
            name: "hook".to_string(),
            url: "https://sink.example.com/?token=abc123".to_string(),
            headers: [("Authorization".to_string(), "Bearer xyz789".to_string())]
                .into_iter()
                .collect(),
        };
        let rendered = format!("{:?}", webhook);
        assert!(rendered.contains("Authorization"));
        assert!(!rendered.contains("abc123"));
        assert!(!rendered.contains("xyz789"));
    }

    #[test]
    fn test_starter_yaml_parses() {
        let yaml = DriftWatchConfig::starter_yaml();
        let parsed: YamlConfig = serde_yaml::from_str(&yaml).unwrap();
        let mut config = DriftWatchConfig::default();
        config.apply_yaml(parsed).unwrap();
        config.validate().unwrap();
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.alerting.channels.len(), 1);
    }
}
