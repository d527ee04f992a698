//! Baseline files: captured reference responses keyed by endpoint id.
//!
//! The file is JSON. Text bodies are stored raw; anything that is not
//! valid UTF-8 is base64-encoded and tagged so a round trip is lossless.

use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::ResponseSample;
use crate::error::{DriftWatchError, Result};
use crate::http::HttpResponse;

/// One endpoint's reference response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub status_code: u16,
    /// Header name (lowercase) to first value.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Raw body text, or base64 when `body_encoding` says so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// `"base64"` when the body field is encoded; absent for raw text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<String>,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl BaselineEntry {
    /// Capture an entry from a live response.
    pub fn from_response(response: &HttpResponse) -> Self {
        let (body, body_encoding) = if response.body.is_empty() {
            (None, None)
        } else {
            match std::str::from_utf8(&response.body) {
                Ok(text) => (Some(text.to_string()), None),
                Err(_) => (
                    Some(base64::engine::general_purpose::STANDARD.encode(&response.body)),
                    Some("base64".to_string()),
                ),
            }
        };
        Self {
            status_code: response.status,
            headers: response.first_headers().into_iter().collect(),
            body,
            body_encoding,
            response_time_ms: response.response_time_ms,
            timestamp: response.fetched_at,
        }
    }

    /// Decode the stored body back to text (lossily for binary bodies).
    pub fn body_text(&self) -> String {
        match (&self.body, self.body_encoding.as_deref()) {
            (Some(body), Some("base64")) => base64::engine::general_purpose::STANDARD
                .decode(body)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default(),
            (Some(body), _) => body.clone(),
            (None, _) => String::new(),
        }
    }

    /// Reduce to the diff engine's input shape.
    pub fn to_sample(&self) -> ResponseSample {
        ResponseSample {
            status: self.status_code,
            headers: self.headers.clone().into_iter().collect(),
            body: self.body_text(),
            response_time_ms: self.response_time_ms,
        }
    }
}

/// The full baseline: endpoint id to entry, stored key-sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(flatten)]
    pub entries: BTreeMap<String, BaselineEntry>,
}

impl Baseline {
    /// Read and validate a baseline file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DriftWatchError::BaselineInvalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let baseline: Baseline =
            serde_json::from_str(&content).map_err(|e| DriftWatchError::BaselineInvalid {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        baseline.validate(&path.display().to_string())?;
        Ok(baseline)
    }

    /// Write the baseline as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check the file invariants: at least one entry, plausible status
    /// codes, non-zero timestamps. Bodies may be absent.
    pub fn validate(&self, source: &str) -> Result<()> {
        if self.entries.is_empty() {
            return Err(DriftWatchError::BaselineInvalid {
                path: source.to_string(),
                reason: "baseline has no entries".to_string(),
            });
        }
        for (id, entry) in &self.entries {
            if !(100..600).contains(&entry.status_code) {
                return Err(DriftWatchError::BaselineInvalid {
                    path: source.to_string(),
                    reason: format!(
                        "entry '{}' has implausible status code {}",
                        id, entry.status_code
                    ),
                });
            }
            if entry.timestamp.timestamp() == 0 {
                return Err(DriftWatchError::BaselineInvalid {
                    path: source.to_string(),
                    reason: format!("entry '{}' has a zero timestamp", id),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, endpoint_id: &str) -> Option<&BaselineEntry> {
        self.entries.get(endpoint_id)
    }

    pub fn insert(&mut self, endpoint_id: impl Into<String>, entry: BaselineEntry) {
        self.entries.insert(endpoint_id.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
