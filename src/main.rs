//! Binary entry point: flag parsing, config merge, and wiring the
//! orchestrator task to the display window.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use trmnl_display::app::App;
use trmnl_display::config::{Config, Rotation, DEFAULT_WINDOW_HEIGHT, DEFAULT_WINDOW_WIDTH};
use trmnl_display::logger::DeviceLog;
use trmnl_display::window::DisplayWindow;
use trmnl_display::{metrics, models, percentage_to_voltage};

/// TRMNL virtual display client.
///
/// Polls a display server like a physical TRMNL device and renders the
/// dashboard image in a desktop window. Keyboard shortcuts: R refreshes,
/// T rotates.
#[derive(Debug, Parser)]
#[command(name = "trmnl-display", version, about)]
struct Cli {
    /// API key (for usetrmnl.com)
    #[arg(long)]
    api_key: Option<String>,

    /// Device ID (for self-hosted servers)
    #[arg(long)]
    device_id: Option<String>,

    /// MAC address to use as device ID (e.g. AA:BB:CC:DD:EE:FF);
    /// clears any saved API key to force re-registration
    #[arg(long)]
    mac_address: Option<String>,

    /// Base URL of the display server
    #[arg(long)]
    base_url: Option<String>,

    /// Device model (e.g. TRMNL, virtual-hd, virtual-fhd)
    #[arg(long)]
    model: Option<String>,

    /// List available device models and exit
    #[arg(long)]
    list_models: bool,

    /// Window width (overrides model default)
    #[arg(long)]
    width: Option<u32>,

    /// Window height (overrides model default)
    #[arg(long)]
    height: Option<u32>,

    /// Enable dark mode (invert colors)
    #[arg(long)]
    dark: bool,

    /// Simulate e-paper grain and quantization
    #[arg(long)]
    epaper: bool,

    /// Rotate image (degrees: 0, 90, 180, 270, or -90)
    #[arg(long, allow_hyphen_values = true)]
    rotation: Option<i32>,

    /// Mirror mode: show the shared current screen, not the device-specific
    /// display
    #[arg(long)]
    mirror: bool,

    /// Run setup to retrieve an API key via the device MAC address
    #[arg(long)]
    setup: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Seconds between device log uploads (default 1800)
    #[arg(long)]
    log_flush_interval: Option<u32>,

    /// Save the merged settings to the config file and exit
    #[arg(long)]
    save: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if cli.list_models {
        print!("{}", models::list_models());
        return;
    }

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => fatal(&format!("failed to load config: {}", e)),
    };

    merge_flags(&mut config, &cli);

    if cli.save {
        if let Err(e) = config.save() {
            fatal(&format!("failed to save config: {}", e));
        }
        println!("Configuration saved successfully");
        return;
    }

    // Without any configured identity, fall back to the hardware MAC, or a
    // generated one as a last resort.
    if config.device_id.is_empty() && config.api_key.is_empty() {
        match metrics::mac_address() {
            Some(mac) => {
                tracing::info!(%mac, "auto-detected device ID from network interface");
                config.device_id = mac;
            }
            None => {
                let mac = metrics::random_mac();
                tracing::warn!(%mac, "could not detect MAC address; generated a random one");
                config.device_id = mac;
            }
        }
    }

    if let Err(e) = config.validate() {
        fatal(&e.to_string());
    }

    let needs_setup = config.api_key.is_empty() || cli.setup;

    let system = metrics::collect();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.base_url,
        auth = if config.api_key.is_empty() { "device-id" } else { "api-key" },
        window = %format!("{}x{}", config.window_width, config.window_height),
        dark_mode = config.dark_mode,
        epaper_mode = config.epaper_mode,
        mirror_mode = config.mirror_mode,
        battery = %format!("{:.1}% ({:.2}V)", system.battery_percent, percentage_to_voltage(system.battery_percent)),
        rssi = system.rssi,
        "starting TRMNL virtual display"
    );

    let logger = Arc::new(DeviceLog::new(
        config.base_url.clone(),
        config.api_key.clone(),
    ));
    logger.info(
        "Application started",
        Some(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "device_id": config.device_id,
            "model": config.model,
            "resolution": format!("{}x{}", config.window_width, config.window_height),
            "battery": system.battery_percent,
            "wifi_rssi": system.rssi,
        })),
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => fatal(&format!("failed to start async runtime: {}", e)),
    };

    let (window, sink) = match DisplayWindow::new(&config) {
        Ok(pair) => pair,
        Err(e) => fatal(&format!("failed to create window: {}", e)),
    };

    let (app, handle) = App::new(config, logger, sink, needs_setup);

    let signal_handle = handle.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("signal received, shutting down");
            signal_handle.shutdown();
        }
    });

    let orchestrator = runtime.spawn(app.run());

    // Blocks on the main thread until the window closes or shutdown is
    // signaled; closing the window signals the orchestrator.
    window.run(handle);

    if let Err(e) = runtime.block_on(orchestrator) {
        tracing::warn!(error = %e, "orchestrator task ended abnormally");
    }

    tracing::info!("shutdown complete");
}

/// Apply CLI flags on top of the loaded config.
fn merge_flags(config: &mut Config, cli: &Cli) {
    if let Some(api_key) = &cli.api_key {
        config.api_key = api_key.clone();
    }
    if let Some(device_id) = &cli.device_id {
        config.device_id = device_id.clone();
    }
    if let Some(mac) = &cli.mac_address {
        let mac = mac.trim().to_uppercase();
        let separators = mac.matches(':').count() + mac.matches('-').count();
        if mac.len() == 17 && separators == 5 {
            // A manually specified MAC overrides the saved identity and
            // clears the API key so the device re-registers.
            config.device_id = mac.replace('-', ":");
            config.api_key.clear();
        } else {
            fatal(&format!(
                "invalid MAC address format: {} (expected AA:BB:CC:DD:EE:FF or AA-BB-CC-DD-EE-FF)",
                mac
            ));
        }
    }
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }

    if !config.model.is_empty() {
        match models::get_model(&config.model) {
            Some(model) => {
                // Model dimensions are defaults; explicit flags still win.
                if config.window_width == DEFAULT_WINDOW_WIDTH {
                    config.window_width = model.width;
                }
                if config.window_height == DEFAULT_WINDOW_HEIGHT {
                    config.window_height = model.height;
                }
            }
            None => fatal(&format!(
                "unknown model: {} (use --list-models to see available models)",
                config.model
            )),
        }
    }

    if let Some(width) = cli.width {
        if width > 0 {
            config.window_width = width;
        }
    }
    if let Some(height) = cli.height {
        if height > 0 {
            config.window_height = height;
        }
    }
    if cli.dark {
        config.dark_mode = true;
    }
    if cli.epaper {
        config.epaper_mode = true;
    }
    if let Some(rotation) = cli.rotation {
        // -90 is shorthand for 270.
        let degrees = if rotation == -90 { 270 } else { rotation.max(0) as u32 };
        config.rotation = Rotation::from(degrees);
    }
    if cli.mirror {
        config.mirror_mode = true;
    }
    if let Some(interval) = cli.log_flush_interval {
        if interval > 0 {
            config.log_flush_interval = interval;
        }
    }
}

fn fatal(message: &str) -> ! {
    eprintln!("error: {}", message);
    std::process::exit(1);
}
