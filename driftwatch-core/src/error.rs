//! Error types for DriftWatch operations.

use thiserror::Error;

/// Broad error categories used for exit-code mapping and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorKind {
    /// Invalid or missing configuration.
    Config,
    /// A network operation failed (timeout, connection, DNS, TLS).
    Network,
    /// Response or spec validation failed.
    Validation,
    /// A storage operation failed.
    Storage,
    /// An alert delivery operation failed.
    Alert,
    /// An authentication or authorization failure.
    Auth,
    /// An unexpected internal failure.
    System,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "CONFIG"),
            ErrorKind::Network => write!(f, "NETWORK"),
            ErrorKind::Validation => write!(f, "VALIDATION"),
            ErrorKind::Storage => write!(f, "STORAGE"),
            ErrorKind::Alert => write!(f, "ALERT"),
            ErrorKind::Auth => write!(f, "AUTH"),
            ErrorKind::System => write!(f, "SYSTEM"),
        }
    }
}

/// Four-level severity scale shared by errors and detected drifts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = DriftWatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(DriftWatchError::ConfigError(format!(
                "Invalid severity '{}'. Use 'low', 'medium', 'high', or 'critical'.",
                s
            ))),
        }
    }
}

/// All error types that DriftWatch operations can produce.
#[derive(Error, Debug)]
pub enum DriftWatchError {
    /// Invalid or missing configuration (YAML parse errors, missing required fields, etc.).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An explicitly requested config file does not exist.
    #[error("Config file '{path}' not found")]
    ConfigFileNotFound { path: String },

    /// An endpoint definition failed validation.
    #[error("Invalid endpoint '{id}': {reason}")]
    InvalidEndpoint { id: String, reason: String },

    /// No endpoint with the given id is configured.
    #[error("Endpoint '{0}' not found")]
    EndpointNotFound(String),

    /// A request did not complete within its deadline.
    #[error("Request to {url} timed out after {timeout_secs}s")]
    NetworkTimeout { url: String, timeout_secs: u64 },

    /// A TCP connection could not be established.
    #[error("Connection to {url} failed: {detail}")]
    NetworkConnection { url: String, detail: String },

    /// Hostname resolution failed.
    #[error("DNS resolution failed for {host}")]
    NetworkDns { host: String },

    /// TLS handshake or certificate verification failed.
    #[error("TLS error for {url}: {detail}")]
    NetworkTls { url: String, detail: String },

    /// The enclosing operation deadline fired and the request was aborted.
    #[error("Request to {url} cancelled: {reason}")]
    RequestCancelled { url: String, reason: String },

    /// An OpenAPI spec file could not be loaded or parsed.
    #[error("Invalid OpenAPI spec '{path}': {reason}")]
    SpecInvalid { path: String, reason: String },

    /// An operation for the response could not be resolved from the spec.
    #[error("Operation {method} {path} not found in spec")]
    OperationNotFound { method: String, path: String },

    /// Response validation against the spec failed (strict mode).
    #[error("Validation failed for {endpoint}: {detail}")]
    ValidationFailed { endpoint: String, detail: String },

    /// A baseline file is malformed or fails its invariants.
    #[error("Invalid baseline file '{path}': {reason}")]
    BaselineInvalid { path: String, reason: String },

    /// The baseline file has no entry for an enabled endpoint.
    #[error("No baseline entry for endpoint '{0}'")]
    BaselineMissing(String),

    /// A database operation failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// The underlying SQLite engine reported an error.
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// A write referenced a parent row that does not exist.
    #[error("Referential integrity violation: {table} row references missing {parent} '{id}'")]
    ForeignKeyViolation {
        table: String,
        parent: String,
        id: String,
    },

    /// Backup or restore is not supported by the active storage engine.
    #[error("Backup is not supported by the {engine} storage engine")]
    BackupUnsupported { engine: String },

    /// An alert could not be delivered after exhausting retries.
    #[error("Alert delivery to '{channel}' failed: {reason}")]
    AlertDeliveryFailed { channel: String, reason: String },

    /// A named alert channel is not configured.
    #[error("Alert channel '{0}' not found. Check the alerting section of your config.")]
    ChannelNotFound(String),

    /// The scheduler was started while already running, or stopped while stopped.
    #[error("Scheduler is already {state}")]
    SchedulerState { state: String },

    /// A scheduler pass was requested with no enabled endpoints.
    #[error("No enabled endpoints to check")]
    NoEndpoints,

    /// Credentials were rejected by a remote service.
    #[error("Authentication failed for {url}: {detail}")]
    AuthFailed { url: String, detail: String },

    /// A filesystem I/O operation failed (baseline files, backups, config, etc.).
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A worker task panicked or failed in an unexpected way.
    #[error("Internal error: {0}")]
    SystemError(String),
}

impl DriftWatchError {
    /// The broad category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        use DriftWatchError::*;
        match self {
            ConfigError(_) | ConfigFileNotFound { .. } | InvalidEndpoint { .. }
            | EndpointNotFound(_) | SchedulerState { .. } | NoEndpoints => ErrorKind::Config,
            NetworkTimeout { .. } | NetworkConnection { .. } | NetworkDns { .. }
            | NetworkTls { .. } | RequestCancelled { .. } => ErrorKind::Network,
            SpecInvalid { .. } | OperationNotFound { .. } | ValidationFailed { .. }
            | BaselineInvalid { .. } | BaselineMissing(_) => ErrorKind::Validation,
            StorageError(_) | DatabaseError(_) | ForeignKeyViolation { .. }
            | BackupUnsupported { .. } => ErrorKind::Storage,
            AlertDeliveryFailed { .. } | ChannelNotFound(_) => ErrorKind::Alert,
            AuthFailed { .. } => ErrorKind::Auth,
            IoError(_) | JsonError(_) | SystemError(_) => ErrorKind::System,
        }
    }

    /// Short stable code for logs and structured output.
    pub fn code(&self) -> &'static str {
        use DriftWatchError::*;
        match self {
            ConfigError(_) => "CONFIG_INVALID",
            ConfigFileNotFound { .. } => "CONFIG_NOT_FOUND",
            InvalidEndpoint { .. } => "CONFIG_ENDPOINT",
            EndpointNotFound(_) => "CONFIG_UNKNOWN_ENDPOINT",
            SchedulerState { .. } => "CONFIG_SCHEDULER_STATE",
            NoEndpoints => "CONFIG_NO_ENDPOINTS",
            NetworkTimeout { .. } => "NETWORK_TIMEOUT",
            NetworkConnection { .. } => "NETWORK_CONNECTION",
            NetworkDns { .. } => "NETWORK_DNS",
            NetworkTls { .. } => "NETWORK_TLS",
            RequestCancelled { .. } => "NETWORK_CANCELLED",
            SpecInvalid { .. } => "VALIDATION_SPEC",
            OperationNotFound { .. } => "VALIDATION_OPERATION",
            ValidationFailed { .. } => "VALIDATION_FAILED",
            BaselineInvalid { .. } => "VALIDATION_BASELINE",
            BaselineMissing(_) => "VALIDATION_BASELINE_MISSING",
            StorageError(_) => "STORAGE_FAILED",
            DatabaseError(_) => "STORAGE_ENGINE",
            ForeignKeyViolation { .. } => "STORAGE_REFERENTIAL",
            BackupUnsupported { .. } => "STORAGE_BACKUP_UNSUPPORTED",
            AlertDeliveryFailed { .. } => "ALERT_DELIVERY",
            ChannelNotFound(_) => "ALERT_CHANNEL",
            AuthFailed { .. } => "AUTH_REJECTED",
            IoError(_) => "SYSTEM_IO",
            JsonError(_) => "SYSTEM_JSON",
            SystemError(_) => "SYSTEM_INTERNAL",
        }
    }

    /// Severity of the error on the same scale used for drifts.
    pub fn severity(&self) -> Severity {
        use DriftWatchError::*;
        match self {
            ForeignKeyViolation { .. } | DatabaseError(_) | SystemError(_) => Severity::Critical,
            StorageError(_) | ValidationFailed { .. } | SpecInvalid { .. }
            | AuthFailed { .. } => Severity::High,
            ConfigError(_) | ConfigFileNotFound { .. } | InvalidEndpoint { .. }
            | BaselineInvalid { .. } | NetworkTls { .. } | AlertDeliveryFailed { .. }
            | IoError(_) | JsonError(_) => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Whether retrying the same operation can reasonably succeed.
    pub fn recoverable(&self) -> bool {
        use DriftWatchError::*;
        matches!(
            self,
            NetworkTimeout { .. }
                | NetworkConnection { .. }
                | NetworkDns { .. }
                | RequestCancelled { .. }
                | AlertDeliveryFailed { .. }
        )
    }

    /// Remediation hint printed by the CLI below the error message.
    pub fn guidance(&self) -> &'static str {
        use DriftWatchError::*;
        match self {
            ConfigError(_) | InvalidEndpoint { .. } => {
                "Run 'driftwatch config validate' to check your configuration."
            }
            ConfigFileNotFound { .. } => {
                "Run 'driftwatch init' to create a starter config, or pass --config <path>."
            }
            EndpointNotFound(_) => "Run 'driftwatch list' to see configured endpoints.",
            NoEndpoints => "Enable at least one endpoint in the config file.",
            SchedulerState { .. } => "Stop the running monitor before starting another.",
            NetworkTimeout { .. } => {
                "Increase the endpoint timeout or check the service's responsiveness."
            }
            NetworkConnection { .. } | NetworkDns { .. } => {
                "Verify the URL and that the host is reachable from this machine."
            }
            NetworkTls { .. } => "Check the server certificate and your trust store.",
            RequestCancelled { .. } => "The enclosing deadline fired; raise --timeout if needed.",
            SpecInvalid { .. } | OperationNotFound { .. } => {
                "Verify the spec file path and that it is a valid OpenAPI 3 document."
            }
            ValidationFailed { .. } => {
                "Inspect the validation errors; switch to lenient mode to downgrade them."
            }
            BaselineInvalid { .. } | BaselineMissing(_) => {
                "Re-capture the baseline with 'driftwatch baseline'."
            }
            StorageError(_) | DatabaseError(_) => {
                "Run 'driftwatch db-health' to inspect the database."
            }
            ForeignKeyViolation { .. } => "Run 'driftwatch repair' to remove orphaned records.",
            BackupUnsupported { .. } => "Use a file-backed database for backup support.",
            AlertDeliveryFailed { .. } => {
                "Check the channel's webhook URL and network reachability."
            }
            ChannelNotFound(_) => "Check the alerting.channels section of your config.",
            AuthFailed { .. } => "Verify the credentials referenced by your config.",
            IoError(_) => "Check filesystem permissions and available disk space.",
            JsonError(_) | SystemError(_) => "This may be a bug; re-run with --verbose.",
        }
    }
}

impl From<reqwest::Error> for DriftWatchError {
    fn from(e: reqwest::Error) -> Self {
        let url = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if e.is_timeout() {
            return DriftWatchError::NetworkTimeout { url, timeout_secs: 0 };
        }
        if e.is_connect() {
            // reqwest folds DNS and TCP failures into connect errors; the
            // source chain distinguishes them.
            let detail = source_chain(&e);
            if detail.contains("dns") || detail.contains("resolve") {
                let host = e
                    .url()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or(url);
                return DriftWatchError::NetworkDns { host };
            }
            if detail.contains("certificate") || detail.contains("tls") || detail.contains("ssl") {
                return DriftWatchError::NetworkTls { url, detail };
            }
            return DriftWatchError::NetworkConnection { url, detail };
        }
        DriftWatchError::NetworkConnection {
            url,
            detail: source_chain(&e),
        }
    }
}

/// Walk an error's source chain into a single lowercase string.
fn source_chain(e: &dyn std::error::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        msg.push_str(&format!(": {}", s));
        source = s.source();
    }
    msg.to_lowercase()
}

/// Convenience type alias for `Result<T, DriftWatchError>`.
pub type Result<T> = std::result::Result<T, DriftWatchError>;
