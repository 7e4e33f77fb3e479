//! API client for the display server.
//!
//! Three fetch operations: the device-specific display, the shared current
//! screen (mirror mode), and first-time setup/registration, plus the raw
//! image download. Every display fetch carries the device identity and
//! telemetry headers the server expects; the image download sends only the
//! client identifier.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Deserialize;

use crate::config::Config;
use crate::error::Error;
use crate::{metrics, percentage_to_voltage, DEFAULT_REFRESH_RATE, FW_VERSION, HTTP_TIMEOUT_SECS, USER_AGENT};

const DISPLAY_ENDPOINT: &str = "/api/display";
const CURRENT_SCREEN_ENDPOINT: &str = "/api/current_screen";
const SETUP_ENDPOINT: &str = "/api/setup";

/// Display metadata returned by the server per fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayDescriptor {
    /// Full URL of the image to download
    #[serde(default)]
    pub image_url: String,

    /// Filename the server uses for change detection
    #[serde(default)]
    pub filename: String,

    /// Seconds until the next fetch; 0 or absent means the 60s default
    #[serde(default)]
    pub refresh_rate: u32,

    /// Application-level status code, when the server sends one
    #[serde(default)]
    pub status: Option<u32>,

    /// Error message embedded in an otherwise successful response
    #[serde(default)]
    pub error: Option<String>,
}

impl DisplayDescriptor {
    /// Error message, if the server embedded one.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|msg| !msg.is_empty())
    }
}

/// Credentials returned by a successful setup exchange.
#[derive(Debug, Clone)]
pub struct SetupInfo {
    /// API key to persist and use for subsequent requests
    pub api_key: String,
    /// Human-readable device name assigned by the server
    pub friendly_id: String,
    /// Optional welcome image
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetupBody {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    friendly_id: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the display server.
///
/// Stateless apart from the last server-supplied refresh rate, which is
/// echoed back in the `Refresh-Rate` header of the next request.
#[derive(Debug)]
pub struct Client {
    http: reqwest::Client,
    config: Config,
    last_refresh_rate: AtomicU32,
}

impl Client {
    /// Create a client for the given configuration.
    pub fn new(config: Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            config,
            last_refresh_rate: AtomicU32::new(DEFAULT_REFRESH_RATE),
        }
    }

    /// The refresh rate most recently supplied by the server, or the default.
    pub fn last_refresh_rate(&self) -> u32 {
        self.last_refresh_rate.load(Ordering::Relaxed)
    }

    /// Fetch the device-specific display descriptor.
    pub async fn fetch_display(&self) -> Result<DisplayDescriptor, Error> {
        self.fetch_descriptor(DISPLAY_ENDPOINT).await
    }

    /// Fetch the shared current screen (mirror mode).
    pub async fn fetch_current_screen(&self) -> Result<DisplayDescriptor, Error> {
        self.fetch_descriptor(CURRENT_SCREEN_ENDPOINT).await
    }

    async fn fetch_descriptor(&self, endpoint: &str) -> Result<DisplayDescriptor, Error> {
        let url = format!("{}{}", self.config.base_url, endpoint);
        tracing::debug!(%url, "fetching display descriptor");

        let system = metrics::collect();
        let voltage = percentage_to_voltage(system.battery_percent);
        let (auth_name, auth_value) = self.config.auth_header();

        let model = if self.config.model.is_empty() {
            "virtual"
        } else {
            &self.config.model
        };

        let response = self
            .http
            .get(&url)
            .header(auth_name, auth_value)
            .header("percent_charged", format!("{:.0}", system.battery_percent))
            .header("Battery-Voltage", format!("{:.2}", voltage))
            .header("RSSI", system.rssi.to_string())
            .header("FW-Version", FW_VERSION)
            .header("Model", model)
            .header("Width", self.config.window_width.to_string())
            .header("Height", self.config.window_height.to_string())
            .header("Refresh-Rate", self.last_refresh_rate().to_string())
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let descriptor = parse_descriptor(&body)?;

        self.last_refresh_rate
            .store(descriptor.refresh_rate, Ordering::Relaxed);

        tracing::debug!(
            image_url = %descriptor.image_url,
            filename = %descriptor.filename,
            refresh_rate = descriptor.refresh_rate,
            "display descriptor received"
        );

        Ok(descriptor)
    }

    /// Exchange the device identifier for credentials.
    ///
    /// Sends only the `ID` header. The server reports failure through a
    /// non-200 `status` field in the JSON body, not the HTTP status line.
    pub async fn fetch_setup(&self, device_id: &str) -> Result<SetupInfo, Error> {
        let url = format!("{}{}", self.config.base_url, SETUP_ENDPOINT);
        tracing::debug!(%url, device_id, "requesting device setup");

        let response = self.http.get(&url).header("ID", device_id).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        parse_setup(&body)
    }

    /// Download raw image bytes from the URL supplied by a descriptor.
    pub async fn fetch_image(&self, image_url: &str) -> Result<Vec<u8>, Error> {
        tracing::debug!(%image_url, "downloading image");

        let response = self.http.get(image_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        let data = response.bytes().await?;
        tracing::debug!(bytes = data.len(), "image downloaded");
        Ok(data.to_vec())
    }
}

/// Parse a display response body, applying the default refresh rate.
fn parse_descriptor(body: &str) -> Result<DisplayDescriptor, Error> {
    let mut descriptor: DisplayDescriptor = serde_json::from_str(body)?;
    if descriptor.refresh_rate == 0 {
        descriptor.refresh_rate = DEFAULT_REFRESH_RATE;
    }
    Ok(descriptor)
}

/// Parse a setup response body, turning an embedded failure status into a
/// [`Error::Registration`].
fn parse_setup(body: &str) -> Result<SetupInfo, Error> {
    let parsed: SetupBody = serde_json::from_str(body)?;

    match parsed.status {
        Some(200) => {}
        other => {
            return Err(Error::Registration {
                status: other.unwrap_or(0),
                message: parsed
                    .message
                    .unwrap_or_else(|| "setup rejected by server".to_string()),
            });
        }
    }

    let api_key = parsed.api_key.unwrap_or_default();
    if api_key.is_empty() {
        return Err(Error::Registration {
            status: 200,
            message: "setup response contained no API key".to_string(),
        });
    }

    Ok(SetupInfo {
        api_key,
        friendly_id: parsed.friendly_id.unwrap_or_default(),
        image_url: parsed.image_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor() {
        let descriptor =
            parse_descriptor(r#"{"image_url": "http://x/a.png", "filename": "a.png", "refresh_rate": 300}"#)
                .unwrap();
        assert_eq!(descriptor.image_url, "http://x/a.png");
        assert_eq!(descriptor.filename, "a.png");
        assert_eq!(descriptor.refresh_rate, 300);
        assert!(descriptor.error_message().is_none());
    }

    #[test]
    fn test_parse_descriptor_defaults_refresh_rate() {
        let descriptor = parse_descriptor(r#"{"image_url": "http://x/a.png"}"#).unwrap();
        assert_eq!(descriptor.refresh_rate, DEFAULT_REFRESH_RATE);

        let descriptor =
            parse_descriptor(r#"{"image_url": "http://x/a.png", "refresh_rate": 0}"#).unwrap();
        assert_eq!(descriptor.refresh_rate, DEFAULT_REFRESH_RATE);
    }

    #[test]
    fn test_parse_descriptor_with_error_field() {
        let descriptor =
            parse_descriptor(r#"{"status": 500, "error": "Device not found"}"#).unwrap();
        assert_eq!(descriptor.error_message(), Some("Device not found"));
        assert_eq!(descriptor.status, Some(500));
    }

    #[test]
    fn test_parse_descriptor_rejects_malformed_json() {
        assert!(matches!(parse_descriptor("not json"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_parse_setup_success() {
        let info = parse_setup(
            r#"{"status": 200, "api_key": "abc123", "friendly_id": "kitchen", "image_url": "http://x/welcome.png"}"#,
        )
        .unwrap();
        assert_eq!(info.api_key, "abc123");
        assert_eq!(info.friendly_id, "kitchen");
        assert_eq!(info.image_url.as_deref(), Some("http://x/welcome.png"));
    }

    #[test]
    fn test_parse_setup_failure_status() {
        let err = parse_setup(r#"{"status": 404, "message": "MAC not registered"}"#).unwrap_err();
        match err {
            Error::Registration { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "MAC not registered");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_setup_missing_status_is_failure() {
        let err = parse_setup(r#"{"api_key": "abc"}"#).unwrap_err();
        assert!(matches!(err, Error::Registration { status: 0, .. }));
    }

    #[test]
    fn test_parse_setup_requires_api_key() {
        let err = parse_setup(r#"{"status": 200, "friendly_id": "kitchen"}"#).unwrap_err();
        assert!(matches!(err, Error::Registration { status: 200, .. }));
    }

    #[test]
    fn test_client_starts_with_default_refresh_rate() {
        let client = Client::new(Config::default());
        assert_eq!(client.last_refresh_rate(), DEFAULT_REFRESH_RATE);
    }
}
