//! # trmnl-display
//!
//! A virtual client for [TRMNL](https://usetrmnl.com) e-ink displays.
//!
//! Physical TRMNL devices poll a display server, download the rendered
//! dashboard image, and put it on an e-ink panel. This crate does the same
//! thing against a desktop window: it polls `/api/display` (or
//! `/api/current_screen` in mirror mode), downloads the image, optionally
//! rotates / inverts / e-paper-simulates it, and presents the result.
//!
//! ## Architecture
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | Refresh orchestrator | [`app`] | timer-driven fetch/render state machine |
//! | API client | [`client`] | display, mirror, setup, and image fetches |
//! | Image pipeline | [`transform`] | decode → e-paper → rotate → invert → encode |
//! | Generated frames | [`screen`] | startup splash and error screens |
//! | Display sink | [`sink`], [`window`] | where frames and status lines go |
//! | Device telemetry | [`metrics`] | battery, WiFi RSSI, MAC identity |
//! | Device log | [`logger`] | buffered log upload to `/api/log` |
//!
//! ## Wire protocol
//!
//! Every display fetch carries the device headers the server expects:
//!
//! - `access-token` (API key) **or** `ID` (device MAC) - never both
//! - `percent_charged`, `Battery-Voltage`, `RSSI` - synthetic telemetry
//! - `FW-Version`, `Model`, `Width`, `Height` - device identity
//! - `Refresh-Rate` - echo of the last server-supplied interval
//!
//! The response body is `{image_url, filename, refresh_rate, status?, error?}`.
//! A separate `GET /api/setup` exchange (only the `ID` header) returns
//! `{status, api_key, friendly_id, ...}` for first-time registration.

pub mod app;
pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod models;
pub mod screen;
pub mod sink;
pub mod transform;
pub mod window;

pub use app::{App, AppHandle, RefreshState, Trigger};
pub use client::{Client, DisplayDescriptor, SetupInfo};
pub use config::{Config, Rotation};
pub use error::Error;
pub use sink::DisplaySink;
pub use transform::RenderSettings;

/// Client identifier sent as `User-Agent` on every request.
pub const USER_AGENT: &str = concat!("trmnl-display/", env!("CARGO_PKG_VERSION"));

/// Firmware version reported in the `FW-Version` header.
pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Refresh interval used before the server has supplied one, in seconds.
pub const DEFAULT_REFRESH_RATE: u32 = 60;

/// Fixed retry interval after a failed refresh cycle, in seconds.
pub const ERROR_RETRY_SECS: u32 = 60;

/// Default interval between device log uploads, in seconds (30 minutes).
pub const DEFAULT_LOG_FLUSH_SECS: u32 = 1800;

/// HTTP timeout applied to every API request, in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Convert a battery charge percentage to a synthetic Li-ion pack voltage.
///
/// The curve is a hand-tuned piecewise approximation of a LiPo discharge
/// profile. Servers validate the shape of this curve, so the breakpoints and
/// coefficients are load-bearing: the 83-90% segment deliberately ends at
/// 4.017V rather than meeting the 4.02V plateau.
///
/// # Example
///
/// ```
/// use trmnl_display::percentage_to_voltage;
///
/// assert_eq!(percentage_to_voltage(0.0), 3.0);
/// assert_eq!(percentage_to_voltage(50.0), 3.6);
/// assert_eq!(percentage_to_voltage(100.0), 4.08);
/// ```
pub fn percentage_to_voltage(percentage: f64) -> f64 {
    if percentage <= 1.0 {
        3.0
    } else if percentage <= 83.0 {
        3.0 + percentage * 0.012
    } else if percentage <= 90.0 {
        3.996 + (percentage - 83.0) * 0.003
    } else if percentage <= 95.0 {
        4.02
    } else if percentage < 100.0 {
        4.06
    } else {
        4.08
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voltage_endpoints() {
        assert_eq!(percentage_to_voltage(100.0), 4.08);
        assert_eq!(percentage_to_voltage(150.0), 4.08); // Clamp high
        assert_eq!(percentage_to_voltage(0.0), 3.0);
        assert_eq!(percentage_to_voltage(-5.0), 3.0); // Clamp low
        assert_eq!(percentage_to_voltage(1.0), 3.0);
    }

    #[test]
    fn test_voltage_linear_band() {
        assert_eq!(percentage_to_voltage(50.0), 3.6);
        assert!((percentage_to_voltage(83.0) - 3.996).abs() < 1e-9);
    }

    #[test]
    fn test_voltage_hand_tuned_band() {
        // The 83-90% segment ends at 4.017V, just short of the 4.02V plateau.
        assert!((percentage_to_voltage(90.0) - 4.017).abs() < 1e-9);
        assert_eq!(percentage_to_voltage(92.0), 4.02);
        assert_eq!(percentage_to_voltage(97.0), 4.06);
    }

    #[test]
    fn test_voltage_non_decreasing() {
        let mut last = 0.0;
        for pct in 0..=100 {
            let v = percentage_to_voltage(pct as f64);
            assert!(v >= last, "curve decreased at {}%: {} < {}", pct, v, last);
            last = v;
        }
    }
}
