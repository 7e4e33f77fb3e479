//! Refresh orchestration: the timer-driven fetch/render state machine.
//!
//! A single background task owns all mutable refresh state (current
//! rotation, the retained last frame, the connection flag), so none of it
//! needs a lock. Manual triggers arrive over capacity-one channels sent with
//! `try_send`: a trigger that lands while one of the same kind is already
//! pending is dropped, which bounds the queue at one pending refresh and one
//! pending rotate no matter how fast the user hammers the shortcut.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};

use crate::client::Client;
use crate::config::Config;
use crate::error::Error;
use crate::logger::DeviceLog;
use crate::metrics;
use crate::screen;
use crate::sink::DisplaySink;
use crate::transform::{self, RenderSettings};
use crate::ERROR_RETRY_SECS;

/// Status shown when a manual trigger fires before the first successful
/// render.
pub const WAITING_STATUS: &str = "Please wait - connecting...";

/// Delay before the splash frame, giving the window time to appear.
const WINDOW_SETTLE: Duration = Duration::from_millis(500);

/// How long the splash and post-registration frames stay visible.
const SPLASH_DWELL: Duration = Duration::from_secs(2);

/// Where the orchestrator currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Showing the splash frame
    Startup,
    /// Running the registration exchange
    Setup,
    /// First fetch has not completed yet
    Connecting,
    /// Normal timer-driven operation
    Steady,
    /// Last cycle failed; retrying on the fixed 60s interval
    ErrorRetry,
}

/// Outcome of a manual trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The trigger was queued and will run
    Queued,
    /// A trigger of the same kind was already pending; this one was dropped
    Coalesced,
    /// Not connected yet; the trigger was ignored (show [`WAITING_STATUS`])
    NotReady,
}

/// Handle for feeding external events into the orchestrator.
///
/// Cheap to clone; typically owned by the window layer.
#[derive(Debug, Clone)]
pub struct AppHandle {
    refresh_tx: mpsc::Sender<()>,
    rotate_tx: mpsc::Sender<()>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
}

impl AppHandle {
    /// Request an immediate fetch-and-render cycle.
    pub fn request_refresh(&self) -> Trigger {
        self.send_trigger(&self.refresh_tx)
    }

    /// Request a one-step rotation and re-render of the retained frame.
    pub fn request_rotate(&self) -> Trigger {
        self.send_trigger(&self.rotate_tx)
    }

    fn send_trigger(&self, tx: &mpsc::Sender<()>) -> Trigger {
        if !self.is_connected() {
            return Trigger::NotReady;
        }
        match tx.try_send(()) {
            Ok(()) => Trigger::Queued,
            Err(mpsc::error::TrySendError::Full(())) => Trigger::Coalesced,
            Err(mpsc::error::TrySendError::Closed(())) => Trigger::NotReady,
        }
    }

    /// Whether the first Steady-state render has completed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Signal cooperative shutdown. In-flight work finishes; no new cycle is
    /// scheduled afterwards.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}

/// The refresh orchestrator.
///
/// Construct with [`App::new`], then drive with [`App::run`] on a dedicated
/// task.
pub struct App<S: DisplaySink> {
    config: Config,
    client: Client,
    logger: Arc<DeviceLog>,
    sink: S,
    needs_setup: bool,
    state: RefreshState,
    /// Raw bytes of the last successfully fetched image, kept so a rotate
    /// can re-render without a network fetch.
    last_frame: Option<Vec<u8>>,
    connected: Arc<AtomicBool>,
    refresh_rx: mpsc::Receiver<()>,
    rotate_rx: mpsc::Receiver<()>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: DisplaySink> App<S> {
    /// Create an orchestrator and its handle.
    ///
    /// `needs_setup` forces the registration exchange before the first fetch
    /// (set when no API key is configured or setup was explicitly
    /// requested).
    pub fn new(config: Config, logger: Arc<DeviceLog>, sink: S, needs_setup: bool) -> (Self, AppHandle) {
        // Capacity one encodes the at-most-one-pending coalescing rule.
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let (rotate_tx, rotate_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));

        let client = Client::new(config.clone());

        let handle = AppHandle {
            refresh_tx,
            rotate_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx: shutdown_rx.clone(),
            connected: connected.clone(),
        };

        let app = Self {
            config,
            client,
            logger,
            sink,
            needs_setup,
            state: RefreshState::Startup,
            last_frame: None,
            connected,
            refresh_rx,
            rotate_rx,
            shutdown_rx,
        };

        (app, handle)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RefreshState {
        self.state
    }

    /// Run the refresh loop until shutdown is signaled.
    pub async fn run(mut self) {
        // Give the window a moment to map before the first frame.
        if self.dwell(WINDOW_SETTLE).await {
            return;
        }

        self.show_startup_screen();
        if self.dwell(SPLASH_DWELL).await {
            return;
        }

        if self.needs_setup && !self.run_setup().await {
            // Registration failure is terminal for the session: keep the
            // error frame up and wait for the shutdown signal.
            let _ = self.shutdown_rx.wait_for(|stop| *stop).await;
            tracing::info!("shutdown after setup failure");
            return;
        }

        self.state = RefreshState::Connecting;
        self.sink.set_status("Connecting to TRMNL API...");

        let mut refresh_rate = self.fetch_and_display().await;

        let timer = sleep(Duration::from_secs(u64::from(refresh_rate)));
        tokio::pin!(timer);

        let flush_period = Duration::from_secs(u64::from(self.config.log_flush_interval.max(1)));
        let mut log_flush = tokio::time::interval_at(Instant::now() + flush_period, flush_period);
        tracing::debug!(?flush_period, "log flush timer armed");

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    // A dropped sender counts as shutdown too.
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        self.logger.info(
                            "Application shutting down",
                            Some(json!({"reason": "user_initiated"})),
                        );
                        if let Err(e) = self.logger.flush().await {
                            tracing::warn!(error = %e, "failed to flush logs on shutdown");
                        }
                        tracing::info!("refresh loop stopped");
                        return;
                    }
                }

                _ = &mut timer => {
                    refresh_rate = self.fetch_and_display().await;
                    timer.as_mut().reset(Instant::now() + Duration::from_secs(u64::from(refresh_rate)));
                }

                Some(()) = self.refresh_rx.recv() => {
                    tracing::debug!("executing manual refresh");
                    refresh_rate = self.fetch_and_display().await;
                    timer.as_mut().reset(Instant::now() + Duration::from_secs(u64::from(refresh_rate)));
                }

                Some(()) = self.rotate_rx.recv() => {
                    tracing::debug!("executing manual rotate");
                    self.rotate_display();
                    self.rerender_last_frame();
                }

                _ = log_flush.tick() => {
                    if let Err(e) = self.logger.flush().await {
                        tracing::debug!(error = %e, "periodic log flush failed");
                    }
                }
            }
        }
    }

    /// Sleep, returning early with `true` if shutdown is signaled.
    async fn dwell(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => false,
            // A dropped sender also means the session is over.
            _ = self.shutdown_rx.wait_for(|stop| *stop) => true,
        }
    }

    /// Run the registration exchange. Returns `false` on failure.
    async fn run_setup(&mut self) -> bool {
        self.state = RefreshState::Setup;
        self.sink.set_status("Registering device...");
        tracing::info!(device_id = %self.config.device_id, "running device setup");

        match self.client.fetch_setup(&self.config.device_id).await {
            Ok(info) => {
                self.config.api_key = info.api_key;
                self.config.friendly_id = info.friendly_id;

                if let Err(e) = self.config.save() {
                    tracing::warn!(error = %e, "could not save config after setup");
                    self.logger.warn(
                        "Failed to save config after setup",
                        Some(json!({"error": e.to_string()})),
                    );
                }

                // The client bakes in the auth header source, so rebuild it
                // with the fresh API key.
                self.client = Client::new(self.config.clone());
                self.logger.set_api_key(self.config.api_key.clone());

                self.logger.info(
                    "Device setup successful",
                    Some(json!({
                        "friendly_id": self.config.friendly_id,
                        "device_id": self.config.device_id,
                    })),
                );

                self.sink
                    .set_status(&format!("Registered as {}", self.config.friendly_id));
                self.dwell(SPLASH_DWELL).await;
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "device setup failed");
                self.logger.error(
                    "Device setup failed",
                    Some(json!({
                        "error": e.to_string(),
                        "device_id": self.config.device_id,
                    })),
                );
                let _ = self.logger.flush_on_error().await;

                self.show_error_screen(
                    "Registration Failed",
                    &format!("Device: {}\nError: {}", self.config.device_id, e),
                );
                self.sink
                    .set_status("Registration failed - see display for details");
                false
            }
        }
    }

    /// One fetch-and-render cycle. Returns the interval (seconds) until the
    /// next cycle: the server-declared refresh rate on success, the fixed
    /// 60-second retry interval on any failure.
    async fn fetch_and_display(&mut self) -> u32 {
        let descriptor = if self.config.mirror_mode {
            tracing::debug!("fetching current screen (mirror mode)");
            self.client.fetch_current_screen().await
        } else {
            tracing::debug!("fetching display");
            self.client.fetch_display().await
        };

        let descriptor = match descriptor {
            Ok(descriptor) => descriptor,
            Err(e) => {
                return self
                    .cycle_failure(
                        "Connection Error",
                        &format!("Failed to connect to server: {}", e),
                        "Failed to fetch display",
                        &e,
                    )
                    .await;
            }
        };

        // The server can embed an error in an otherwise successful response.
        if let Some(message) = descriptor.error_message() {
            let message = message.to_string();
            self.logger.error(
                "API error response",
                Some(json!({"error": message, "status": descriptor.status})),
            );
            let _ = self.logger.flush_on_error().await;
            self.sink.set_status(&format!("API Error: {}", message));
            self.show_error_screen("API Error", &message);
            self.state = RefreshState::ErrorRetry;
            return ERROR_RETRY_SECS;
        }

        let image = match self.client.fetch_image(&descriptor.image_url).await {
            Ok(image) => image,
            Err(e) => {
                return self
                    .cycle_failure(
                        "Download Error",
                        &format!("Could not download image: {}", e),
                        "Failed to download image",
                        &e,
                    )
                    .await;
            }
        };

        // Retain the raw bytes so a rotate can re-render without a fetch.
        self.last_frame = Some(image.clone());

        if let Err(e) = self.present(&image) {
            return self
                .cycle_failure(
                    "Display Error",
                    &format!("Could not render image: {}", e),
                    "Failed to render image",
                    &e,
                )
                .await;
        }

        if !self.connected.load(Ordering::Relaxed) {
            self.connected.store(true, Ordering::Relaxed);
            self.sink.set_actions_enabled(true);
            tracing::info!("connected; manual shortcuts enabled");
        }

        let now = chrono::Local::now();
        let next = now + chrono::Duration::seconds(i64::from(descriptor.refresh_rate));
        let mut status = format!(
            "Last updated: {} | Next: {}",
            now.format("%H:%M:%S"),
            next.format("%H:%M:%S"),
        );
        if self.config.mirror_mode {
            status = format!("[Mirror] {}", status);
        }
        self.sink.set_status(&status);

        self.state = RefreshState::Steady;
        self.logger.info(
            "Display updated successfully",
            Some(json!({
                "filename": descriptor.filename,
                "refresh_rate": descriptor.refresh_rate,
                "mirror_mode": self.config.mirror_mode,
                "status": descriptor.status,
            })),
        );
        tracing::debug!(
            refresh_rate = descriptor.refresh_rate,
            "display updated"
        );

        descriptor.refresh_rate
    }

    /// Common failure path: error frame, status line, device log, fixed
    /// retry interval.
    async fn cycle_failure(
        &mut self,
        title: &str,
        screen_message: &str,
        log_message: &str,
        error: &Error,
    ) -> u32 {
        tracing::error!(error = %error, "{}", log_message);
        self.logger.error(
            log_message,
            Some(json!({
                "error": error.to_string(),
                "mirror_mode": self.config.mirror_mode,
            })),
        );
        let _ = self.logger.flush_on_error().await;

        self.sink.set_status(&format!("Error: {}", error));
        self.show_error_screen(title, screen_message);

        self.state = RefreshState::ErrorRetry;
        ERROR_RETRY_SECS
    }

    /// Advance the rotation one step and persist it.
    fn rotate_display(&mut self) {
        self.config.rotation = self.config.rotation.next();
        tracing::info!(degrees = self.config.rotation.degrees(), "rotation changed");

        if let Err(e) = self.config.save() {
            tracing::warn!(error = %e, "failed to save rotation to config");
        }

        self.logger.info(
            "Display rotation changed",
            Some(json!({"rotation": self.config.rotation.degrees()})),
        );
    }

    /// Re-render the retained frame with the current render settings.
    fn rerender_last_frame(&mut self) {
        let Some(frame) = self.last_frame.clone() else {
            tracing::debug!("no frame retained; nothing to re-render");
            return;
        };

        if let Err(e) = self.present(&frame) {
            tracing::error!(error = %e, "failed to re-render frame");
            self.sink.set_status(&format!("Error re-rendering: {}", e));
        }
    }

    /// Transform raw bytes per the current settings and hand the result to
    /// the sink.
    fn present(&self, raw: &[u8]) -> Result<(), Error> {
        let settings = RenderSettings::from(&self.config);
        let frame = transform::transform(raw, &settings)?;
        self.sink.render(&frame)
    }

    fn show_startup_screen(&mut self) {
        let identity = if !self.config.device_id.is_empty() {
            self.config.device_id.clone()
        } else {
            metrics::mac_address().unwrap_or_else(|| "Unknown".to_string())
        };

        let message = if self.config.friendly_id.is_empty() {
            format!("MAC: {}", identity)
        } else {
            format!("Device: {}\nMAC: {}", self.config.friendly_id, identity)
        };

        match screen::startup_screen(self.config.window_width, self.config.window_height, &message)
        {
            Ok(png) => {
                if let Err(e) = self.present(&png) {
                    tracing::warn!(error = %e, "failed to display startup screen");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to generate startup screen"),
        }
    }

    fn show_error_screen(&mut self, title: &str, message: &str) {
        tracing::debug!(title, detail = message, "showing error screen");
        match screen::error_screen(
            self.config.window_width,
            self.config.window_height,
            title,
            message,
        ) {
            Ok(png) => {
                if let Err(e) = self.present(&png) {
                    tracing::warn!(error = %e, "failed to display error screen");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to generate error screen"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;

    impl DisplaySink for NullSink {
        fn render(&self, _image: &[u8]) -> Result<(), Error> {
            Ok(())
        }
        fn set_status(&self, _status: &str) {}
        fn set_actions_enabled(&self, _enabled: bool) {}
    }

    fn test_app() -> (App<NullSink>, AppHandle) {
        let config = Config {
            device_id: "AA:BB:CC:DD:EE:FF".to_string(),
            ..Config::default()
        };
        let logger = Arc::new(DeviceLog::new(config.base_url.clone(), ""));
        App::new(config, logger, NullSink, false)
    }

    #[tokio::test]
    async fn test_triggers_ignored_before_connect() {
        let (mut app, handle) = test_app();

        assert_eq!(handle.request_refresh(), Trigger::NotReady);
        assert_eq!(handle.request_rotate(), Trigger::NotReady);

        // Nothing was queued: the channels stay empty.
        assert!(app.refresh_rx.try_recv().is_err());
        assert!(app.rotate_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_triggers_coalesce_when_pending() {
        let (mut app, handle) = test_app();
        app.connected.store(true, Ordering::Relaxed);

        assert_eq!(handle.request_refresh(), Trigger::Queued);
        assert_eq!(handle.request_refresh(), Trigger::Coalesced);
        assert_eq!(handle.request_refresh(), Trigger::Coalesced);

        // Exactly one trigger is pending.
        assert!(app.refresh_rx.try_recv().is_ok());
        assert!(app.refresh_rx.try_recv().is_err());

        // Rotate coalesces independently of refresh.
        assert_eq!(handle.request_rotate(), Trigger::Queued);
        assert_eq!(handle.request_rotate(), Trigger::Coalesced);
        assert!(app.rotate_rx.try_recv().is_ok());
        assert!(app.rotate_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_signal_observed() {
        let (app, handle) = test_app();
        let mut shutdown_rx = app.shutdown_rx.clone();

        assert!(!*shutdown_rx.borrow());
        handle.shutdown();
        shutdown_rx.changed().await.unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[test]
    fn test_initial_state() {
        let (app, handle) = test_app();
        assert_eq!(app.state, RefreshState::Startup);
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_failed_fetch_arms_fixed_retry() {
        // Port 1 refuses connections, so the descriptor fetch fails fast.
        let config = Config {
            device_id: "AA:BB:CC:DD:EE:FF".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            window_width: 64,
            window_height: 48,
            ..Config::default()
        };
        let logger = Arc::new(DeviceLog::new(config.base_url.clone(), ""));
        let (mut app, handle) = App::new(config, logger, NullSink, false);

        let interval = app.fetch_and_display().await;
        assert_eq!(interval, crate::ERROR_RETRY_SECS);
        assert_eq!(app.state(), RefreshState::ErrorRetry);
        assert!(!handle.is_connected());
    }
}
