//! Desktop window sink: winit 0.30 `ApplicationHandler` + softbuffer 0.4.
//!
//! The window runs a pump-driven loop on the main thread. The orchestrator
//! task talks to it only through [`WindowSink`], which decodes frames and
//! forwards them over a channel; that is how sink calls are marshaled onto
//! the thread that owns the event loop.
//!
//! Keyboard shortcuts: `R` requests a refresh, `T` requests a rotate.

use std::num::NonZeroU32;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use softbuffer::{Context, Surface};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop, OwnedDisplayHandle};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window as WinitWindow, WindowAttributes, WindowId};

use crate::app::{AppHandle, Trigger, WAITING_STATUS};
use crate::config::Config;
use crate::error::Error;
use crate::sink::DisplaySink;

const WINDOW_TITLE: &str = "TRMNL Virtual Display";

/// A decoded frame ready for presentation: 0RGB pixels, row-major.
struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

enum WindowCommand {
    Frame(Frame),
    Status(String),
    ActionsEnabled(bool),
}

/// The orchestrator-facing half of the window.
///
/// Decodes image bytes on the calling task and ships pixels to the window
/// thread, so a malformed frame is rejected here as [`Error::Render`]
/// without ever reaching the event loop.
pub struct WindowSink {
    commands: Sender<WindowCommand>,
}

impl DisplaySink for WindowSink {
    fn render(&self, image: &[u8]) -> Result<(), Error> {
        let decoded = image::load_from_memory(image)
            .map_err(|e| Error::Render(e.to_string()))?
            .to_rgba8();

        let (width, height) = decoded.dimensions();
        let pixels = decoded
            .pixels()
            .map(|p| {
                let [r, g, b, _] = p.0;
                0xFF00_0000 | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
            })
            .collect();

        self.commands
            .send(WindowCommand::Frame(Frame {
                width,
                height,
                pixels,
            }))
            .map_err(|_| Error::Render("window closed".to_string()))
    }

    fn set_status(&self, status: &str) {
        let _ = self
            .commands
            .send(WindowCommand::Status(status.to_string()));
    }

    fn set_actions_enabled(&self, enabled: bool) {
        let _ = self.commands.send(WindowCommand::ActionsEnabled(enabled));
    }
}

/// The display window. Owns the event loop; must live on the main thread.
pub struct DisplayWindow {
    event_loop: Option<EventLoop<()>>,
    window: Arc<WinitWindow>,
    _context: Context<OwnedDisplayHandle>,
    surface: Surface<OwnedDisplayHandle, Arc<WinitWindow>>,
    commands: Receiver<WindowCommand>,
    handle: Option<AppHandle>,
    phys_w: u32,
    phys_h: u32,
    frame: Option<Frame>,
    status: String,
    actions_enabled: bool,
    closing: bool,
    needs_redraw: bool,
}

impl ApplicationHandler for DisplayWindow {
    fn resumed(&mut self, _: &ActiveEventLoop) {}

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.closing = true;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let (Some(w), Some(h)) =
                    (NonZeroU32::new(size.width), NonZeroU32::new(size.height))
                {
                    self.surface.resize(w, h).ok();
                    self.needs_redraw = true;
                }
            }
            WindowEvent::ScaleFactorChanged {
                mut inner_size_writer,
                ..
            } => {
                // Keep a fixed physical pixel count on every monitor.
                let _ = inner_size_writer
                    .request_inner_size(PhysicalSize::new(self.phys_w, self.phys_h));
            }
            WindowEvent::RedrawRequested => {
                self.needs_redraw = true;
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match code {
                KeyCode::KeyR => self.on_trigger(ManualAction::Refresh),
                KeyCode::KeyT => self.on_trigger(ManualAction::Rotate),
                _ => {}
            },
            _ => {}
        }
    }
}

/// Which manual action a key maps to.
#[derive(Clone, Copy)]
enum ManualAction {
    Refresh,
    Rotate,
}

impl DisplayWindow {
    /// Create the window and its orchestrator-facing sink.
    ///
    /// Must be called on the main thread.
    pub fn new(config: &Config) -> Result<(Self, WindowSink), Error> {
        let mut event_loop = EventLoop::builder()
            .build()
            .map_err(|e| Error::Render(format!("failed to create event loop: {}", e)))?;

        let phys_w = config.window_width.max(1);
        let phys_h = config.window_height.max(1);
        let phys_size = PhysicalSize::new(phys_w, phys_h);

        let attrs = WindowAttributes::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size(phys_size)
            .with_min_inner_size(phys_size)
            .with_max_inner_size(phys_size)
            .with_resizable(false);

        // winit 0.30 creates windows inside resumed(); one pump triggers it.
        struct Creator {
            attrs: Option<WindowAttributes>,
            result: Option<(
                Arc<WinitWindow>,
                Context<OwnedDisplayHandle>,
                Surface<OwnedDisplayHandle, Arc<WinitWindow>>,
            )>,
            error: Option<String>,
        }

        impl ApplicationHandler for Creator {
            fn resumed(&mut self, event_loop: &ActiveEventLoop) {
                if self.result.is_some() || self.error.is_some() {
                    return;
                }
                let Some(attrs) = self.attrs.take() else {
                    return;
                };
                let window = match event_loop.create_window(attrs) {
                    Ok(window) => Arc::new(window),
                    Err(e) => {
                        self.error = Some(e.to_string());
                        return;
                    }
                };
                let context = match Context::new(event_loop.owned_display_handle()) {
                    Ok(context) => context,
                    Err(e) => {
                        self.error = Some(e.to_string());
                        return;
                    }
                };
                let surface = match Surface::new(&context, window.clone()) {
                    Ok(surface) => surface,
                    Err(e) => {
                        self.error = Some(e.to_string());
                        return;
                    }
                };
                self.result = Some((window, context, surface));
            }

            fn window_event(&mut self, _: &ActiveEventLoop, _: WindowId, _: WindowEvent) {}
        }

        let mut creator = Creator {
            attrs: Some(attrs),
            result: None,
            error: None,
        };
        let _ = event_loop.pump_app_events(Some(Duration::from_millis(100)), &mut creator);

        if let Some(message) = creator.error {
            return Err(Error::Render(format!("window creation failed: {}", message)));
        }
        let (window, context, mut surface) = creator
            .result
            .ok_or_else(|| Error::Render("window creation never completed".to_string()))?;

        if let (Some(w), Some(h)) = (NonZeroU32::new(phys_w), NonZeroU32::new(phys_h)) {
            surface.resize(w, h).ok();
        }

        let (tx, rx) = mpsc::channel();

        let display_window = Self {
            event_loop: Some(event_loop),
            window,
            _context: context,
            surface,
            commands: rx,
            handle: None,
            phys_w,
            phys_h,
            frame: None,
            status: String::new(),
            actions_enabled: false,
            closing: false,
            needs_redraw: false,
        };

        Ok((display_window, WindowSink { commands: tx }))
    }

    /// Drive the window until it is closed or the orchestrator shuts down.
    ///
    /// Signals orchestrator shutdown when the window closes.
    pub fn run(mut self, handle: AppHandle) {
        self.handle = Some(handle);
        loop {
            if !self.pump_window_events() || self.closing {
                break;
            }

            while let Ok(command) = self.commands.try_recv() {
                match command {
                    WindowCommand::Frame(frame) => {
                        self.frame = Some(frame);
                        self.needs_redraw = true;
                    }
                    WindowCommand::Status(status) => {
                        self.status = status;
                        self.update_title();
                    }
                    WindowCommand::ActionsEnabled(enabled) => {
                        self.actions_enabled = enabled;
                    }
                }
            }

            // Shutdown signaled elsewhere (Ctrl-C) also closes the window.
            if self.handle.as_ref().is_some_and(AppHandle::is_shutdown) {
                break;
            }

            if self.needs_redraw {
                self.present();
                self.needs_redraw = false;
            }

            std::thread::sleep(Duration::from_millis(16));
        }

        if let Some(handle) = &self.handle {
            handle.shutdown();
        }
    }

    fn pump_window_events(&mut self) -> bool {
        if let Some(mut el) = self.event_loop.take() {
            let status = el.pump_app_events(Some(Duration::ZERO), self);
            self.event_loop = Some(el);
            !matches!(status, PumpStatus::Exit(_))
        } else {
            false
        }
    }

    fn on_trigger(&mut self, action: ManualAction) {
        let Some(handle) = &self.handle else {
            return;
        };

        if !self.actions_enabled {
            self.status = WAITING_STATUS.to_string();
            self.update_title();
            return;
        }

        let result = match action {
            ManualAction::Refresh => handle.request_refresh(),
            ManualAction::Rotate => handle.request_rotate(),
        };

        match result {
            Trigger::Queued => {}
            Trigger::Coalesced => {
                tracing::debug!("manual trigger dropped: one already pending");
            }
            Trigger::NotReady => {
                self.status = WAITING_STATUS.to_string();
                self.update_title();
            }
        }
    }

    fn update_title(&self) {
        if self.status.is_empty() {
            self.window.set_title(WINDOW_TITLE);
        } else {
            self.window
                .set_title(&format!("{} - {}", WINDOW_TITLE, self.status));
        }
    }

    /// Blit the current frame into the surface, letterboxed and scaled to
    /// fit (nearest neighbor), on a white background.
    fn present(&mut self) {
        let Ok(mut buffer) = self.surface.buffer_mut() else {
            return;
        };

        buffer.fill(0xFFFF_FFFF);

        if let Some(frame) = &self.frame {
            let (dst_w, dst_h) = (self.phys_w, self.phys_h);
            let scale = f64::min(
                f64::from(dst_w) / f64::from(frame.width),
                f64::from(dst_h) / f64::from(frame.height),
            )
            .min(1.0);
            let out_w = ((f64::from(frame.width) * scale) as u32).max(1);
            let out_h = ((f64::from(frame.height) * scale) as u32).max(1);
            let off_x = (dst_w - out_w) / 2;
            let off_y = (dst_h - out_h) / 2;

            for y in 0..out_h {
                let src_y = (u64::from(y) * u64::from(frame.height) / u64::from(out_h)) as u32;
                for x in 0..out_w {
                    let src_x = (u64::from(x) * u64::from(frame.width) / u64::from(out_w)) as u32;
                    let src = frame.pixels[(src_y * frame.width + src_x) as usize];
                    let dst_idx = ((off_y + y) * dst_w + (off_x + x)) as usize;
                    if dst_idx < buffer.len() {
                        buffer[dst_idx] = src;
                    }
                }
            }
        }

        let _ = buffer.present();
    }
}
