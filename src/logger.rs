//! Buffered device log upload.
//!
//! The server accepts batched device logs on `POST /api/log`. Entries are
//! buffered in memory (last 20 kept), flushed on a periodic timer, on
//! shutdown, and immediately whenever an error-level entry is present.
//! Uploads are skipped entirely until an API key is known.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::error::Error;
use crate::HTTP_TIMEOUT_SECS;

const LOG_ENDPOINT: &str = "/api/log";
const MAX_ENTRIES: usize = 20;

/// Severity of a device log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A single entry in the upload buffer.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// RFC3339 UTC timestamp
    pub timestamp: String,
    /// Severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
    /// Structured context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct LogPayload<'a> {
    logs: &'a [LogEntry],
}

/// Collects device log entries and ships them to the server.
#[derive(Debug)]
pub struct DeviceLog {
    http: reqwest::Client,
    base_url: String,
    api_key: Mutex<String>,
    entries: Mutex<Vec<LogEntry>>,
}

impl DeviceLog {
    /// Create a log shipper for the given server.
    ///
    /// `api_key` may start empty; uploads are skipped until
    /// [`DeviceLog::set_api_key`] provides one (after setup).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url: base_url.into(),
            api_key: Mutex::new(api_key.into()),
            entries: Mutex::new(Vec::with_capacity(MAX_ENTRIES)),
        }
    }

    /// Update the API key after a successful setup exchange.
    pub fn set_api_key(&self, api_key: impl Into<String>) {
        if let Ok(mut key) = self.api_key.lock() {
            *key = api_key.into();
        }
    }

    /// Buffer an info entry.
    pub fn info(&self, message: &str, details: Option<serde_json::Value>) {
        tracing::info!(target: "device_log", message, ?details);
        self.push(LogLevel::Info, message, details);
    }

    /// Buffer a warning entry.
    pub fn warn(&self, message: &str, details: Option<serde_json::Value>) {
        tracing::warn!(target: "device_log", message, ?details);
        self.push(LogLevel::Warn, message, details);
    }

    /// Buffer an error entry.
    pub fn error(&self, message: &str, details: Option<serde_json::Value>) {
        tracing::error!(target: "device_log", message, ?details);
        self.push(LogLevel::Error, message, details);
    }

    fn push(&self, level: LogLevel, message: &str, details: Option<serde_json::Value>) {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            message: message.to_string(),
            details,
        };

        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.push(entry);
        if entries.len() > MAX_ENTRIES {
            let excess = entries.len() - MAX_ENTRIES;
            entries.drain(..excess);
        }
    }

    /// Number of buffered entries.
    pub fn buffered(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Upload all buffered entries and clear the buffer on success.
    ///
    /// A missing API key or an empty buffer is not an error; the buffer is
    /// kept for a later attempt. On upload failure the entries are restored.
    pub async fn flush(&self) -> Result<(), Error> {
        let api_key = self
            .api_key
            .lock()
            .map(|key| key.clone())
            .unwrap_or_default();
        if api_key.is_empty() {
            tracing::debug!("skipping log upload: no API key configured");
            return Ok(());
        }

        let batch = {
            let Ok(mut entries) = self.entries.lock() else {
                return Ok(());
            };
            if entries.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *entries)
        };

        let url = format!("{}{}", self.base_url, LOG_ENDPOINT);
        let result = self
            .http
            .post(&url)
            .header("Access-Token", &api_key)
            .header("Content-Type", "application/json")
            .json(&LogPayload { logs: &batch })
            .send()
            .await;

        let restore = |batch: Vec<LogEntry>| {
            if let Ok(mut entries) = self.entries.lock() {
                let mut merged = batch;
                merged.append(&mut entries);
                *entries = merged;
                if entries.len() > MAX_ENTRIES {
                    let excess = entries.len() - MAX_ENTRIES;
                    entries.drain(..excess);
                }
            }
        };

        match result {
            Ok(response) => {
                let status = response.status();
                if status.as_u16() == 200 || status.as_u16() == 204 {
                    tracing::debug!(count = batch.len(), "device logs uploaded");
                    Ok(())
                } else {
                    restore(batch);
                    Err(Error::Status {
                        status: status.as_u16(),
                        body: String::new(),
                    })
                }
            }
            Err(e) => {
                restore(batch);
                Err(e.into())
            }
        }
    }

    /// Upload the buffer only if it contains an error-level entry.
    pub async fn flush_on_error(&self) -> Result<(), Error> {
        let has_error = self
            .entries
            .lock()
            .map(|entries| entries.iter().any(|e| e.level == LogLevel::Error))
            .unwrap_or(false);

        if has_error {
            self.flush().await
        } else {
            Ok(())
        }
    }
}
