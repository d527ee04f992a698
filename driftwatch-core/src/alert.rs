//! Alert routing and delivery.
//!
//! Channels are tagged variants built from configuration by a small
//! factory; delivery is one `send` capability per variant. The dispatcher
//! evaluates routing rules per drift, retries failed deliveries with
//! exponential backoff, and records every outcome as an Alert row — always
//! after the drift itself is persisted.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AlertRule, AlertingConfig, ChannelConfig};
use crate::diff::DriftType;
use crate::error::{DriftWatchError, Result, Severity};
use crate::storage::{epoch, Alert, AlertStatus, Drift, Storage};

/// A concrete delivery backend.
#[derive(Clone)]
pub enum Channel {
    Slack {
        name: String,
        webhook_url: String,
    },
    Webhook {
        name: String,
        url: String,
        headers: std::collections::HashMap<String, String>,
    },
    Log {
        name: String,
    },
}

// Same redaction as ChannelConfig: webhook URLs and headers are
// credentials, not state worth logging.
impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Slack { name, .. } => f
                .debug_struct("Slack")
                .field("name", name)
                .field("webhook_url", &"[REDACTED]")
                .finish(),
            Channel::Webhook { name, headers, .. } => f
                .debug_struct("Webhook")
                .field("name", name)
                .field("url", &"[REDACTED]")
                .field("headers", &crate::endpoint::redact_header_values(headers))
                .finish(),
            Channel::Log { name } => f.debug_struct("Log").field("name", name).finish(),
        }
    }
}

impl Channel {
    /// Factory from the config representation.
    pub fn from_config(config: &ChannelConfig) -> Self {
        match config {
            ChannelConfig::Slack { name, webhook_url } => Channel::Slack {
                name: name.clone(),
                webhook_url: webhook_url.clone(),
            },
            ChannelConfig::Webhook { name, url, headers } => Channel::Webhook {
                name: name.clone(),
                url: url.clone(),
                headers: headers.clone(),
            },
            ChannelConfig::Log { name } => Channel::Log { name: name.clone() },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Channel::Slack { name, .. } => name,
            Channel::Webhook { name, .. } => name,
            Channel::Log { name } => name,
        }
    }

    /// Channel kind recorded on Alert rows.
    pub fn kind(&self) -> &'static str {
        match self {
            Channel::Slack { .. } => "slack",
            Channel::Webhook { .. } => "webhook",
            Channel::Log { .. } => "log",
        }
    }

    /// Deliver one drift notification.
    pub async fn send(&self, client: &reqwest::Client, drift: &Drift) -> Result<()> {
        match self {
            Channel::Slack { name, webhook_url } => {
                let payload = serde_json::json!({
                    "text": format!(
                        "*[{}] drift on `{}`*\n{} at `{}`",
                        drift.severity, drift.endpoint_id, drift.description, drift.field_path
                    ),
                });
                post_json(client, webhook_url, &payload, name).await
            }
            Channel::Webhook { name, url, headers } => {
                let payload = serde_json::json!({
                    "endpoint_id": drift.endpoint_id,
                    "drift_type": drift.drift_type,
                    "severity": drift.severity,
                    "description": drift.description,
                    "field_path": drift.field_path,
                    "before_value": drift.before_value,
                    "after_value": drift.after_value,
                    "detected_at": drift.detected_at,
                });
                let mut request = client.post(url).json(&payload);
                for (k, v) in headers {
                    request = request.header(k, v);
                }
                let response = request.send().await.map_err(|e| {
                    DriftWatchError::AlertDeliveryFailed {
                        channel: name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                check_delivery_status(response.status().as_u16(), name)
            }
            Channel::Log { .. } => {
                log::warn!(
                    "ALERT [{}] {}: {} at {}",
                    drift.severity,
                    drift.endpoint_id,
                    drift.description,
                    drift.field_path
                );
                Ok(())
            }
        }
    }
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    payload: &serde_json::Value,
    channel: &str,
) -> Result<()> {
    let response = client.post(url).json(payload).send().await.map_err(|e| {
        DriftWatchError::AlertDeliveryFailed {
            channel: channel.to_string(),
            reason: e.to_string(),
        }
    })?;
    check_delivery_status(response.status().as_u16(), channel)
}

fn check_delivery_status(status: u16, channel: &str) -> Result<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(DriftWatchError::AlertDeliveryFailed {
            channel: channel.to_string(),
            reason: format!("delivery endpoint returned {}", status),
        })
    }
}

/// Whether a drift should count as breaking for rule matching. Removals
/// and type changes always break consumers; anything critical is treated
/// the same.
fn drift_is_breaking(drift: &Drift) -> bool {
    matches!(
        drift.drift_type,
        DriftType::FieldRemoved | DriftType::TypeChanged
    ) || drift.severity == Severity::Critical
}

/// Routes drifts to channels and records delivery outcomes.
pub struct AlertDispatcher {
    channels: Vec<Channel>,
    rules: Vec<AlertRule>,
    storage: Arc<dyn Storage>,
    client: reqwest::Client,
    max_attempts: u32,
    retry_delay: Duration,
}

impl AlertDispatcher {
    pub fn new(config: &AlertingConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DriftWatchError::SystemError(format!("alert client init: {}", e)))?;
        Ok(Self {
            channels: config.channels.iter().map(Channel::from_config).collect(),
            rules: config.rules.clone(),
            storage,
            client,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
        })
    }

    /// Channels a drift should reach, deduplicated across rules.
    fn matching_channels(&self, drift: &Drift) -> Vec<&Channel> {
        let mut names: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if drift.severity < rule.min_severity {
                continue;
            }
            if rule.breaking_only && !drift_is_breaking(drift) {
                continue;
            }
            if !rule.endpoints.is_empty() && !rule.endpoints.contains(&drift.endpoint_id) {
                continue;
            }
            for channel in &rule.channels {
                if !names.contains(&channel.as_str()) {
                    names.push(channel);
                }
            }
        }
        self.channels
            .iter()
            .filter(|c| names.contains(&c.name()))
            .collect()
    }

    /// Route one persisted drift. Returns the recorded alerts.
    pub async fn dispatch(&self, drift: &Drift) -> Result<Vec<Alert>> {
        debug_assert!(drift.id > 0, "dispatch requires a persisted drift");
        let mut recorded = Vec::new();

        for channel in self.matching_channels(drift) {
            let mut alert = Alert {
                id: 0,
                drift_id: drift.id,
                alert_type: channel.kind().to_string(),
                channel_name: channel.name().to_string(),
                sent_at: epoch(),
                status: AlertStatus::Pending,
                error_message: None,
                retry_count: 0,
            };

            for attempt in 0..self.max_attempts {
                if attempt > 0 {
                    alert.status = AlertStatus::Retry;
                    alert.retry_count = attempt;
                    let delay = self.retry_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
                    tokio::time::sleep(delay).await;
                }
                match channel.send(&self.client, drift).await {
                    Ok(()) => {
                        alert.status = AlertStatus::Sent;
                        alert.error_message = None;
                        break;
                    }
                    Err(e) => {
                        log::warn!(
                            "Delivery to '{}' failed (attempt {}/{}): {}",
                            channel.name(),
                            attempt + 1,
                            self.max_attempts,
                            e
                        );
                        alert.error_message = Some(e.to_string());
                    }
                }
            }
            if alert.status != AlertStatus::Sent {
                alert.status = AlertStatus::Failed;
            }

            self.storage.save_alert(&mut alert)?;
            recorded.push(alert);
        }

        Ok(recorded)
    }

    /// Send a synthetic drift through every channel, or just the named one.
    /// Nothing is persisted; the per-channel outcome is returned.
    pub async fn test_channels(
        &self,
        filter: Option<&str>,
    ) -> Result<Vec<(String, std::result::Result<(), String>)>> {
        let selected: Vec<&Channel> = match filter {
            Some(name) => {
                let found: Vec<&Channel> =
                    self.channels.iter().filter(|c| c.name() == name).collect();
                if found.is_empty() {
                    return Err(DriftWatchError::ChannelNotFound(name.to_string()));
                }
                found
            }
            None => self.channels.iter().collect(),
        };

        let drift = Drift {
            id: 0,
            endpoint_id: "test-endpoint".to_string(),
            detected_at: chrono::Utc::now(),
            drift_type: DriftType::FieldModified,
            severity: Severity::Low,
            description: "Test alert from driftwatch".to_string(),
            before_value: Some("before".to_string()),
            after_value: Some("after".to_string()),
            field_path: "$.test".to_string(),
            acknowledged: false,
        };

        let mut outcomes = Vec::new();
        for channel in selected {
            let outcome = channel
                .send(&self.client, &drift)
                .await
                .map_err(|e| e.to_string());
            outcomes.push((channel.name().to_string(), outcome));
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc as StdArc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::endpoint::Endpoint;
    use crate::storage::MemoryStorage;

    /// Minimal webhook sink: responds with the given statuses in order.
    async fn spawn_sink(statuses: Vec<u16>) -> (String, StdArc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = StdArc::new(AtomicU32::new(0));
        let hits_clone = StdArc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let n = hits_clone.fetch_add(1, Ordering::SeqCst) as usize;
                let status = statuses
                    .get(n.min(statuses.len().saturating_sub(1)))
                    .copied()
                    .unwrap_or(200);
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                tokio::spawn(async move {
                    let mut buf = [0u8; 8192];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{}", addr), hits)
    }

    fn persisted_drift(storage: &dyn Storage, severity: Severity, drift_type: DriftType) -> Drift {
        storage
            .save_endpoint(&Endpoint::new("api", "https://api.example.com"))
            .unwrap();
        let mut drift = Drift {
            id: 0,
            endpoint_id: "api".to_string(),
            detected_at: epoch(),
            drift_type,
            severity,
            description: "field removed".to_string(),
            before_value: Some("x".to_string()),
            after_value: None,
            field_path: "$.x".to_string(),
            acknowledged: false,
        };
        storage.save_drift(&mut drift).unwrap();
        drift
    }

    fn alerting(channels: Vec<ChannelConfig>, rules: Vec<AlertRule>) -> AlertingConfig {
        AlertingConfig {
            channels,
            rules,
            max_attempts: 2,
            retry_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_dispatch_records_sent_alert() {
        let (url, hits) = spawn_sink(vec![200]).await;
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let drift = persisted_drift(storage.as_ref(), Severity::Critical, DriftType::FieldRemoved);

        let config = alerting(
            vec![ChannelConfig::Webhook {
                name: "hook".to_string(),
                url,
                headers: Default::default(),
            }],
            vec![AlertRule {
                name: "all".to_string(),
                min_severity: Severity::Low,
                breaking_only: false,
                channels: vec!["hook".to_string()],
                endpoints: vec![],
            }],
        );
        let dispatcher = AlertDispatcher::new(&config, Arc::clone(&storage)).unwrap();

        let alerts = dispatcher.dispatch(&drift).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Sent);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let stored = storage.get_alerts(&Default::default()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].drift_id, drift.id);
    }

    #[tokio::test]
    async fn test_failed_delivery_retries_then_records_failure() {
        let (url, hits) = spawn_sink(vec![500]).await;
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let drift = persisted_drift(storage.as_ref(), Severity::High, DriftType::FieldModified);

        let config = alerting(
            vec![ChannelConfig::Webhook {
                name: "hook".to_string(),
                url,
                headers: Default::default(),
            }],
            vec![AlertRule {
                name: "all".to_string(),
                min_severity: Severity::Low,
                breaking_only: false,
                channels: vec!["hook".to_string()],
                endpoints: vec![],
            }],
        );
        let dispatcher = AlertDispatcher::new(&config, Arc::clone(&storage)).unwrap();

        let alerts = dispatcher.dispatch(&drift).await.unwrap();
        assert_eq!(alerts[0].status, AlertStatus::Failed);
        assert_eq!(alerts[0].retry_count, 1);
        assert!(alerts[0].error_message.is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_severity_and_breaking_filters() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let low_drift = persisted_drift(storage.as_ref(), Severity::Low, DriftType::FieldAdded);

        let config = alerting(
            vec![ChannelConfig::Log {
                name: "console".to_string(),
            }],
            vec![AlertRule {
                name: "breaking".to_string(),
                min_severity: Severity::High,
                breaking_only: true,
                channels: vec!["console".to_string()],
                endpoints: vec![],
            }],
        );
        let dispatcher = AlertDispatcher::new(&config, Arc::clone(&storage)).unwrap();

        // Low, non-breaking: no channel matches.
        let alerts = dispatcher.dispatch(&low_drift).await.unwrap();
        assert!(alerts.is_empty());

        // Critical removal: matches.
        let critical =
            persisted_drift(storage.as_ref(), Severity::Critical, DriftType::FieldRemoved);
        let alerts = dispatcher.dispatch(&critical).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Sent);
    }

    #[tokio::test]
    async fn test_endpoint_filter() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let drift = persisted_drift(storage.as_ref(), Severity::Critical, DriftType::FieldRemoved);

        let config = alerting(
            vec![ChannelConfig::Log {
                name: "console".to_string(),
            }],
            vec![AlertRule {
                name: "other-only".to_string(),
                min_severity: Severity::Low,
                breaking_only: false,
                channels: vec!["console".to_string()],
                endpoints: vec!["other-endpoint".to_string()],
            }],
        );
        let dispatcher = AlertDispatcher::new(&config, Arc::clone(&storage)).unwrap();
        let alerts = dispatcher.dispatch(&drift).await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_channel_test_with_filter() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let config = alerting(
            vec![
                ChannelConfig::Log {
                    name: "a".to_string(),
                },
                ChannelConfig::Log {
                    name: "b".to_string(),
                },
            ],
            vec![],
        );
        let dispatcher = AlertDispatcher::new(&config, storage).unwrap();

        let all = dispatcher.test_channels(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let one = dispatcher.test_channels(Some("b")).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].0, "b");
        assert!(one[0].1.is_ok());

        assert!(matches!(
            dispatcher.test_channels(Some("nope")).await.unwrap_err(),
            DriftWatchError::ChannelNotFound(_)
        ));
    }
}
