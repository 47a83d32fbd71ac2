//! Display capture contract and frame types.
//!
//! The capture backend is a collaborator: the session only depends on
//! the [`FrameSource`] trait. The Windows desktop-duplication backend
//! lives in [`dxgi`]; other platforms supply their own source or run
//! Viewer-only.

pub mod dxgi;

use crate::error::EngineError;

// ── Frame ────────────────────────────────────────────────────────

/// A raw captured image in 32-bit BGRA.
///
/// `pixels` holds `height` rows of `stride` bytes each; `stride` may
/// exceed `4 * width` because the GPU pads rows. Frames are produced
/// by the capture backend, consumed exactly once by the encoder and
/// released; raw pixels never cross a session boundary.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row pitch in bytes (`>= 4 * width`).
    pub stride: u32,
    /// BGRA pixel data, `stride * height` bytes.
    pub pixels: Vec<u8>,
    /// Monotonically increasing capture counter.
    pub sequence: u64,
}

impl Frame {
    /// Byte slice of row `y`, padding included.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        &self.pixels[start..start + self.stride as usize]
    }
}

// ── Captured ─────────────────────────────────────────────────────

/// Outcome of one capture poll.
#[derive(Debug)]
pub enum Captured {
    /// A new desktop frame.
    Frame(Frame),
    /// Nothing changed within the poll deadline. The session re-uses
    /// the previous frame so the outgoing cadence stays stable while
    /// the screen is idle.
    Timeout,
}

// ── FrameSource ──────────────────────────────────────────────────

/// Produces the sequence of raw frames for one Host session.
///
/// Implementations exclusively own their duplication handle and any
/// staging surface. Errors from [`capture`](FrameSource::capture) are
/// fatal for the session; an idle screen is the [`Captured::Timeout`]
/// value, not an error.
///
/// The process must be per-monitor DPI-aware before the first call to
/// [`size`](FrameSource::size) (see [`crate::platform`]), or reported
/// dimensions drift from the real pixel grid on HiDPI displays.
pub trait FrameSource: Send {
    /// Acquire the display and allocate staging resources.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Poll for the next frame, blocking at most the capture deadline.
    fn capture(&mut self) -> Result<Captured, EngineError>;

    /// Native display dimensions. Valid after [`start`](FrameSource::start).
    fn size(&self) -> (u32, u32);

    /// Release the display. Further captures fail.
    fn close(&mut self);
}
