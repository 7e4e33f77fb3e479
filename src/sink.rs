//! The display sink contract.
//!
//! The orchestrator runs on a background task and only ever talks to the
//! presentation layer through this trait. Implementations must be safe to
//! call from a non-UI task: either they are thread-safe themselves or they
//! marshal internally to their owning UI thread (the desktop window in
//! [`crate::window`] forwards over a channel).

use crate::error::Error;

/// Where frames and status lines go.
pub trait DisplaySink: Send {
    /// Present an encoded image (PNG/JPEG/GIF bytes).
    ///
    /// # Errors
    ///
    /// [`Error::Render`] when the bytes cannot be decoded into a frame.
    fn render(&self, image: &[u8]) -> Result<(), Error>;

    /// Update the one-line status text.
    fn set_status(&self, status: &str);

    /// Enable or disable manual-action affordances (refresh/rotate
    /// shortcuts). Disabled until the first successful render.
    fn set_actions_enabled(&self, enabled: bool);
}
