//! HTTP execution: one request with a deadline, transparent retries on
//! transient failures, and full response capture.
//!
//! Retryable outcomes are network errors (connect, DNS, timeout) and
//! retry-worthy status codes (5xx, 408, 429). Other 4xx responses are data,
//! not errors: they are captured and returned so the diff engine can see
//! them. TLS failures are never retried.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::endpoint::HttpMethod;
use crate::error::{DriftWatchError, Result};

/// Retry settings for one request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Base delay, doubled per attempt with jitter.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Everything needed to issue one request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A captured response.
#[derive(Debug, Clone, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    /// Header name (lowercase) to all values, in arrival order.
    pub headers: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
    pub response_time_ms: u64,
    /// When the successful attempt was issued.
    pub fetched_at: DateTime<Utc>,
    /// 1-based attempt number that produced this response.
    pub attempts: u32,
}

impl HttpResponse {
    /// Body as UTF-8 text, lossily.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Header name to first value, the shape stored on monitoring runs.
    pub fn first_headers(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(k, v)| v.first().map(|first| (k.clone(), first.clone())))
            .collect()
    }

    /// Reduce to the diff engine's input shape.
    pub fn to_sample(&self) -> crate::diff::ResponseSample {
        crate::diff::ResponseSample {
            status: self.status,
            headers: self.first_headers(),
            body: self.body_string(),
            response_time_ms: self.response_time_ms,
        }
    }
}

/// Per-kind failure counts. All counters are atomic; snapshots are
/// consistent enough for reporting.
#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    total: AtomicU64,
    success: AtomicU64,
    timeout_failures: AtomicU64,
    connection_failures: AtomicU64,
    dns_failures: AtomicU64,
    tls_failures: AtomicU64,
}

/// Point-in-time copy of [`ExecutorMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub success: u64,
    pub timeout_failures: u64,
    pub connection_failures: u64,
    pub dns_failures: u64,
    pub tls_failures: u64,
}

impl ExecutorMetrics {
    fn record_outcome(&self, outcome: &Result<HttpResponse>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(_) => {
                self.success.fetch_add(1, Ordering::Relaxed);
            }
            Err(DriftWatchError::NetworkTimeout { .. }) => {
                self.timeout_failures.fetch_add(1, Ordering::Relaxed);
            }
            Err(DriftWatchError::NetworkDns { .. }) => {
                self.dns_failures.fetch_add(1, Ordering::Relaxed);
            }
            Err(DriftWatchError::NetworkTls { .. }) => {
                self.tls_failures.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.connection_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            timeout_failures: self.timeout_failures.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            dns_failures: self.dns_failures.load(Ordering::Relaxed),
            tls_failures: self.tls_failures.load(Ordering::Relaxed),
        }
    }
}

/// Issues requests through one shared, pooled client.
pub struct HttpExecutor {
    client: reqwest::Client,
    metrics: ExecutorMetrics,
}

impl HttpExecutor {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| DriftWatchError::SystemError(format!("HTTP client init: {}", e)))?;
        Ok(Self {
            client,
            metrics: ExecutorMetrics::default(),
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Execute the request, retrying transient failures per the policy.
    ///
    /// Cancellation: the future holds no locks, so dropping it (e.g. when an
    /// enclosing `tokio::time::timeout` fires) aborts the in-flight attempt.
    pub async fn execute(&self, spec: &RequestSpec, retry: &RetryPolicy) -> Result<HttpResponse> {
        let outcome = self.execute_with_retries(spec, retry).await;
        self.metrics.record_outcome(&outcome);
        outcome
    }

    async fn execute_with_retries(
        &self,
        spec: &RequestSpec,
        retry: &RetryPolicy,
    ) -> Result<HttpResponse> {
        let mut last_err = None;

        for attempt in 0..=retry.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(retry.base_delay, attempt)).await;
                log::debug!(
                    "Retrying {} {} (attempt {}/{})",
                    spec.method,
                    spec.url,
                    attempt + 1,
                    retry.max_retries + 1
                );
            }

            match self.attempt(spec, attempt + 1).await {
                Ok(response) => {
                    if retryable_status(response.status) && attempt < retry.max_retries {
                        log::debug!(
                            "{} {} returned {}, will retry",
                            spec.method,
                            spec.url,
                            response.status
                        );
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if !e.recoverable() || attempt == retry.max_retries {
                        return Err(e);
                    }
                    last_err = Some(e);
                }
            }
        }

        // Loop always returns before falling through; keep the compiler honest.
        Err(last_err
            .unwrap_or_else(|| DriftWatchError::SystemError("retry loop exhausted".to_string())))
    }

    async fn attempt(&self, spec: &RequestSpec, attempt: u32) -> Result<HttpResponse> {
        let method = match spec.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut request = self
            .client
            .request(method, &spec.url)
            .timeout(spec.timeout);
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }
        if let Some(ref body) = spec.body {
            request = request.body(body.clone());
        }

        let fetched_at = Utc::now();
        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            match DriftWatchError::from(e) {
                DriftWatchError::NetworkTimeout { url, .. } => DriftWatchError::NetworkTimeout {
                    url,
                    timeout_secs: spec.timeout.as_secs(),
                },
                other => other,
            }
        })?;

        let status = response.status().as_u16();
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(text) = value.to_str() {
                headers
                    .entry(name.as_str().to_lowercase())
                    .or_default()
                    .push(text.to_string());
            }
        }

        let body = response.bytes().await.map_err(DriftWatchError::from)?;
        let response_time_ms = started.elapsed().as_millis() as u64;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
            response_time_ms,
            fetched_at,
            attempts: attempt,
        })
    }
}

/// 5xx plus the two retry-worthy 4xx codes.
fn retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Exponential backoff with ±12.5% jitter so synchronized endpoints
/// don't hammer a recovering service in lockstep.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let jitter_window = exp.as_millis() as u64 / 4;
    if jitter_window == 0 {
        return exp;
    }
    let offset = fastrand::u64(0..=jitter_window);
    exp - Duration::from_millis(jitter_window / 2) + Duration::from_millis(offset)
}
