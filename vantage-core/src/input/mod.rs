//! Synthetic input: injector contract and coordinate mapping.
//!
//! The Host replays Viewer events through an [`InputInjector`]. The
//! Windows `SendInput` backend lives in [`win32`]; the parser feeding
//! it lives in [`receiver`].

pub mod receiver;
pub mod win32;

use crate::error::EngineError;

// ── MouseButton ──────────────────────────────────────────────────

/// Physical mouse buttons addressable over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

// ── InputInjector ────────────────────────────────────────────────

/// Platform-neutral synthetic input emission.
///
/// Coordinates are always normalised: 0..65535 maps linearly onto the
/// primary display. Per-monitor DPI awareness must be declared before
/// the first call (see [`crate::platform`]) or HiDPI scaling drifts
/// the pointer.
pub trait InputInjector: Send {
    /// Move the pointer to an absolute normalised position.
    fn move_mouse(&mut self, nx: u16, ny: u16) -> Result<(), EngineError>;

    /// Press (`down = true`) or release one button.
    fn mouse_button(&mut self, button: MouseButton, down: bool) -> Result<(), EngineError>;

    /// Rotate the wheel; 120 units per notch.
    fn mouse_wheel(&mut self, delta: i16) -> Result<(), EngineError>;

    /// Emit a physical key transition for a virtual-key code,
    /// translated to a scancode by the OS mapping.
    fn key_scancode(&mut self, vk: u16, up: bool, extended: bool) -> Result<(), EngineError>;

    /// Tap one Unicode code point (down then up), bypassing scancode
    /// translation.
    fn key_unicode(&mut self, ch: char) -> Result<(), EngineError>;

    /// Best-effort release of SHIFT/CTRL/ALT/META so a dying session
    /// cannot leave modifiers stuck down.
    fn reset(&mut self);
}

// ── ScreenGeometry ───────────────────────────────────────────────

/// Primary display dimensions for normalised-to-pixel mapping.
///
/// Captured once, after DPI awareness is declared. Backends that take
/// normalised coordinates directly (Windows absolute mouse input) do
/// not need it; backends addressing the pixel grid do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub width_px: u32,
    pub height_px: u32,
}

impl ScreenGeometry {
    pub fn new(width_px: u32, height_px: u32) -> Self {
        Self {
            width_px,
            height_px,
        }
    }

    /// Map a normalised position onto the pixel grid.
    pub fn map(&self, nx: u16, ny: u16) -> (u32, u32) {
        let x = nx as u64 * self.width_px as u64 / 65535;
        let y = ny as u64 * self.height_px as u64 / 65535;
        (x as u32, y as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_stays_in_bounds() {
        let geom = ScreenGeometry::new(2560, 1440);
        for nx in [0u16, 1, 32768, 65534, 65535] {
            for ny in [0u16, 1, 32768, 65534, 65535] {
                let (x, y) = geom.map(nx, ny);
                assert!(x <= 2560);
                assert!(y <= 1440);
            }
        }
        assert_eq!(geom.map(0, 0), (0, 0));
        assert_eq!(geom.map(65535, 65535), (2560, 1440));
    }

    #[test]
    fn mapping_is_monotonic() {
        let geom = ScreenGeometry::new(1920, 1080);
        let mut prev_x = 0;
        for nx in (0..=65535u32).step_by(257) {
            let (x, _) = geom.map(nx as u16, 0);
            assert!(x >= prev_x);
            prev_x = x;
        }
    }

    #[test]
    fn centre_maps_to_centre() {
        let geom = ScreenGeometry::new(1920, 1080);
        let (x, y) = geom.map(32768, 32768);
        // 32768/65535 is a hair over one half.
        assert!((959..=961).contains(&x));
        assert!((539..=541).contains(&y));
    }
}
