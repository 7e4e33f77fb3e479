//! Device telemetry: battery charge, WiFi signal, and MAC-derived identity.
//!
//! Desktop machines rarely expose all of these, so every probe degrades to a
//! sensible default: full battery and a decent signal. The probes mirror what
//! the platform tools report (`/sys` on Linux, `pmset`/`airport` on macOS,
//! `wmic`/`netsh` on Windows).

use std::fmt;

use rand::Rng;

/// Synthetic device metrics attached to every display request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemMetrics {
    /// Battery charge percentage (0-100)
    pub battery_percent: f64,
    /// WiFi signal strength in dBm
    pub rssi: i32,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        // Desktops without a battery report full charge and a good signal.
        Self {
            battery_percent: 100.0,
            rssi: -50,
        }
    }
}

impl fmt::Display for SystemMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Battery: {:.1}%, WiFi: {} dBm",
            self.battery_percent, self.rssi
        )
    }
}

/// Gather current system metrics, falling back to defaults per probe.
pub fn collect() -> SystemMetrics {
    let mut metrics = SystemMetrics::default();

    if let Some(battery) = battery_percentage() {
        metrics.battery_percent = battery;
    }
    if let Some(rssi) = wifi_rssi() {
        metrics.rssi = rssi;
    }

    metrics
}

/// Detect the MAC address of the primary network interface, formatted as
/// uppercase colon-separated hex.
pub fn mac_address() -> Option<String> {
    let mac = detect_mac()?;
    let mac = mac.trim().to_uppercase().replace('-', ":");
    if mac.len() == 17 && mac != "00:00:00:00:00:00" {
        Some(mac)
    } else {
        None
    }
}

/// Generate a random locally-administered MAC address.
///
/// Used as device identity when no hardware address can be detected.
pub fn random_mac() -> String {
    let mut rng = rand::thread_rng();
    let mut buf = [0u8; 6];
    rng.fill(&mut buf[..]);
    // Locally administered, unicast: bit 1 set, bit 0 clear.
    buf[0] = (buf[0] | 0x02) & 0xFE;
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5]
    )
}

#[cfg(target_os = "linux")]
fn battery_percentage() -> Option<f64> {
    for bat in ["BAT0", "BAT1"] {
        let path = format!("/sys/class/power_supply/{}/capacity", bat);
        if let Ok(data) = std::fs::read_to_string(&path) {
            if let Ok(percent) = data.trim().parse::<f64>() {
                return Some(percent);
            }
        }
    }
    None
}

#[cfg(target_os = "macos")]
fn battery_percentage() -> Option<f64> {
    let output = std::process::Command::new("pmset")
        .args(["-g", "batt"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    // Example line: " -InternalBattery-0 (id=12345) 85%; discharging; ..."
    for line in text.lines() {
        for part in line.split_whitespace() {
            if let Some(stripped) = part.strip_suffix("%;").or_else(|| part.strip_suffix('%')) {
                if let Ok(percent) = stripped.parse::<f64>() {
                    return Some(percent);
                }
            }
        }
    }
    None
}

#[cfg(target_os = "windows")]
fn battery_percentage() -> Option<f64> {
    let output = std::process::Command::new("wmic")
        .args(["path", "Win32_Battery", "get", "EstimatedChargeRemaining"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines().nth(1)?.trim().parse::<f64>().ok()
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn battery_percentage() -> Option<f64> {
    None
}

#[cfg(target_os = "linux")]
fn wifi_rssi() -> Option<i32> {
    // `iw dev` to find the wireless interface, then `iw dev <if> link`
    // reports "signal: -xx dBm".
    let output = std::process::Command::new("iw").arg("dev").output().ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let iface = text
        .lines()
        .find_map(|line| line.trim().strip_prefix("Interface "))?
        .trim()
        .to_string();

    let output = std::process::Command::new("iw")
        .args(["dev", &iface, "link"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        if let Some(rest) = line.trim().strip_prefix("signal:") {
            let value = rest.trim().split_whitespace().next()?;
            if let Ok(rssi) = value.parse::<i32>() {
                return Some(rssi);
            }
        }
    }
    None
}

#[cfg(target_os = "macos")]
fn wifi_rssi() -> Option<i32> {
    let output = std::process::Command::new(
        "/System/Library/PrivateFrameworks/Apple80211.framework/Versions/Current/Resources/airport",
    )
    .arg("-I")
    .output()
    .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        if let Some(rest) = line.trim().strip_prefix("agrCtlRSSI:") {
            if let Ok(rssi) = rest.trim().parse::<i32>() {
                return Some(rssi);
            }
        }
    }
    None
}

#[cfg(target_os = "windows")]
fn wifi_rssi() -> Option<i32> {
    let output = std::process::Command::new("netsh")
        .args(["wlan", "show", "interfaces"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        if line.contains("Signal") && line.contains('%') {
            let percent = line
                .split(':')
                .nth(1)?
                .trim()
                .trim_end_matches('%')
                .parse::<i32>()
                .ok()?;
            // 100% ~ -30 dBm, 0% ~ -90 dBm.
            return Some(-90 + percent * 60 / 100);
        }
    }
    None
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn wifi_rssi() -> Option<i32> {
    None
}

#[cfg(target_os = "linux")]
fn detect_mac() -> Option<String> {
    // First non-loopback interface with a hardware address.
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name == "lo" {
            continue;
        }
        if let Ok(address) = std::fs::read_to_string(entry.path().join("address")) {
            let address = address.trim();
            if !address.is_empty() && address != "00:00:00:00:00:00" {
                return Some(address.to_string());
            }
        }
    }
    None
}

#[cfg(target_os = "macos")]
fn detect_mac() -> Option<String> {
    let output = std::process::Command::new("ifconfig")
        .arg("-a")
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        if let Some(rest) = line.trim().strip_prefix("ether ") {
            let mac = rest.trim();
            if !mac.is_empty() {
                return Some(mac.to_string());
            }
        }
    }
    None
}

#[cfg(target_os = "windows")]
fn detect_mac() -> Option<String> {
    let output = std::process::Command::new("getmac")
        .args(["/FO", "csv", "/NH"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next()?;
    let mac = first.split(',').next()?.trim_matches('"');
    if mac.len() == 17 {
        Some(mac.to_string())
    } else {
        None
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn detect_mac() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let metrics = SystemMetrics::default();
        assert_eq!(metrics.battery_percent, 100.0);
        assert_eq!(metrics.rssi, -50);
    }

    #[test]
    fn test_collect_never_panics() {
        let metrics = collect();
        assert!(metrics.battery_percent >= 0.0);
        assert!(metrics.rssi < 0);
    }

    #[test]
    fn test_random_mac_format() {
        let mac = random_mac();
        assert_eq!(mac.len(), 17);
        assert_eq!(mac.matches(':').count(), 5);

        let first = u8::from_str_radix(&mac[0..2], 16).unwrap();
        assert_eq!(first & 0x02, 0x02, "locally administered bit must be set");
        assert_eq!(first & 0x01, 0, "multicast bit must be clear");
    }

    #[test]
    fn test_random_macs_differ() {
        assert_ne!(random_mac(), random_mac());
    }

    #[test]
    fn test_display_format() {
        let metrics = SystemMetrics {
            battery_percent: 85.5,
            rssi: -62,
        };
        let text = metrics.to_string();
        assert!(text.contains("85.5%"));
        assert!(text.contains("-62 dBm"));
    }
}
