//! Configuration loading, merging, and persistence.
//!
//! Priority: CLI flags > environment variables > config file > defaults.
//! The file lives at `$XDG_CONFIG_HOME/trmnl-display/config.json` (or
//! `~/.config/trmnl-display/config.json`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default display server.
pub const DEFAULT_BASE_URL: &str = "https://trmnl.app";

/// Default window width in pixels.
pub const DEFAULT_WINDOW_WIDTH: u32 = 800;

/// Default window height in pixels.
pub const DEFAULT_WINDOW_HEIGHT: u32 = 480;

const CONFIG_FILE_NAME: &str = "config.json";

/// Display rotation, restricted to the four right angles.
///
/// Any other stored value normalizes to [`Rotation::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum Rotation {
    /// No rotation
    #[default]
    None,
    /// 90 degrees clockwise
    Cw90,
    /// 180 degrees
    Cw180,
    /// 270 degrees clockwise
    Cw270,
}

impl Rotation {
    /// Rotation angle in degrees.
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Advance one step in the fixed cycle 0 -> 90 -> 180 -> 270 -> 0.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Rotation::None => Rotation::Cw90,
            Rotation::Cw90 => Rotation::Cw180,
            Rotation::Cw180 => Rotation::Cw270,
            Rotation::Cw270 => Rotation::None,
        }
    }

    /// Whether this rotation swaps the width and height of the output.
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

impl From<u32> for Rotation {
    fn from(degrees: u32) -> Self {
        match degrees {
            90 => Rotation::Cw90,
            180 => Rotation::Cw180,
            270 => Rotation::Cw270,
            _ => Rotation::None,
        }
    }
}

impl From<Rotation> for u32 {
    fn from(r: Rotation) -> u32 {
        r.degrees()
    }
}

/// Application configuration.
///
/// Either `api_key` or `device_id` must be present before the refresh loop
/// starts; the API key wins when both are set (see [`Config::auth_header`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API key for authenticated devices (from setup or usetrmnl.com)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Device identifier (MAC address) for unregistered devices
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_id: String,

    /// Human-readable device name assigned by the server during setup
    #[serde(skip_serializing_if = "String::is_empty")]
    pub friendly_id: String,

    /// Base URL of the display server
    pub base_url: String,

    /// Device model name sent in the `Model` header
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,

    /// Window width in pixels
    pub window_width: u32,

    /// Window height in pixels
    pub window_height: u32,

    /// Invert colors (dark mode)
    pub dark_mode: bool,

    /// Simulate e-paper grain and quantization
    pub epaper_mode: bool,

    /// Display rotation
    pub rotation: Rotation,

    /// Fetch the shared current screen instead of the device-specific display
    pub mirror_mode: bool,

    /// Seconds between device log uploads
    pub log_flush_interval: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            device_id: String::new(),
            friendly_id: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: String::new(),
            window_width: DEFAULT_WINDOW_WIDTH,
            window_height: DEFAULT_WINDOW_HEIGHT,
            dark_mode: false,
            epaper_mode: false,
            rotation: Rotation::None,
            mirror_mode: false,
            log_flush_interval: crate::DEFAULT_LOG_FLUSH_SECS,
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment variables.
    ///
    /// A missing config file is not an error; defaults apply.
    pub fn load() -> Result<Self, Error> {
        let mut cfg = Config::default();

        if let Some(path) = config_path() {
            match std::fs::read_to_string(&path) {
                Ok(data) => {
                    cfg = serde_json::from_str(&data).map_err(|e| {
                        Error::Config(format!("failed to parse {}: {}", path.display(), e))
                    })?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::Io(format!(
                        "failed to read {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        if let Ok(api_key) = std::env::var("TRMNL_API_KEY") {
            if !api_key.is_empty() {
                cfg.api_key = api_key;
            }
        }
        if let Ok(device_id) = std::env::var("TRMNL_DEVICE_ID") {
            if !device_id.is_empty() {
                cfg.device_id = device_id;
            }
        }
        if let Ok(base_url) = std::env::var("TRMNL_BASE_URL") {
            if !base_url.is_empty() {
                cfg.base_url = base_url;
            }
        }

        Ok(cfg)
    }

    /// Write the configuration to the config file, creating the directory
    /// if needed.
    pub fn save(&self) -> Result<(), Error> {
        let path = config_path()
            .ok_or_else(|| Error::Io("could not determine config directory".to_string()))?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::Io(format!("failed to create {}: {}", dir.display(), e)))?;
        }

        let data = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Io(format!("failed to serialize config: {}", e)))?;
        std::fs::write(&path, data)
            .map_err(|e| Error::Io(format!("failed to write {}: {}", path.display(), e)))?;

        tracing::debug!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Check that the configuration can drive a refresh loop.
    pub fn validate(&self) -> Result<(), Error> {
        if self.api_key.is_empty() && self.device_id.is_empty() {
            return Err(Error::Config(
                "either an API key or a device ID must be provided".to_string(),
            ));
        }
        if self.base_url.is_empty() {
            return Err(Error::Config("base URL cannot be empty".to_string()));
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(Error::Config(
                "window dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Authentication header name and value.
    ///
    /// `access-token` carries the API key when one is configured; otherwise
    /// the bare device ID goes in the `ID` header. Exactly one of the two is
    /// ever sent.
    pub fn auth_header(&self) -> (&'static str, &str) {
        if !self.api_key.is_empty() {
            ("access-token", &self.api_key)
        } else {
            ("ID", &self.device_id)
        }
    }
}

/// Path of the config file, honoring `XDG_CONFIG_HOME`.
fn config_path() -> Option<PathBuf> {
    let config_home = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(config_home.join("trmnl-display").join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_cycle() {
        let mut r = Rotation::None;
        let expected = [90, 180, 270, 0];
        for degrees in expected {
            r = r.next();
            assert_eq!(r.degrees(), degrees);
        }
    }

    #[test]
    fn test_rotation_normalizes_invalid() {
        assert_eq!(Rotation::from(45), Rotation::None);
        assert_eq!(Rotation::from(360), Rotation::None);
        assert_eq!(Rotation::from(90), Rotation::Cw90);
    }

    #[test]
    fn test_rotation_dimension_swap() {
        assert!(Rotation::Cw90.swaps_dimensions());
        assert!(Rotation::Cw270.swaps_dimensions());
        assert!(!Rotation::None.swaps_dimensions());
        assert!(!Rotation::Cw180.swaps_dimensions());
    }

    #[test]
    fn test_validate_requires_identity() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());

        let cfg = Config {
            device_id: "AA:BB:CC:DD:EE:FF".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_auth_header_prefers_api_key() {
        let cfg = Config {
            api_key: "key123".to_string(),
            device_id: "AA:BB:CC:DD:EE:FF".to_string(),
            ..Config::default()
        };
        assert_eq!(cfg.auth_header(), ("access-token", "key123"));

        let cfg = Config {
            device_id: "AA:BB:CC:DD:EE:FF".to_string(),
            ..Config::default()
        };
        assert_eq!(cfg.auth_header(), ("ID", "AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_config_roundtrip() {
        let cfg = Config {
            api_key: "key".to_string(),
            rotation: Rotation::Cw270,
            dark_mode: true,
            ..Config::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"rotation\":270"));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rotation, Rotation::Cw270);
        assert!(back.dark_mode);
        assert!(back.device_id.is_empty());
    }
}
