//! Video encoding: BGRA → I420 scaling and the encoder contract.
//!
//! The session depends only on [`VideoEncoder`]; the concrete H.264
//! implementation lives in [`h264`]. Scaling and colour conversion
//! are fused into a single nearest-neighbour pass so an idle 4K
//! desktop does not pay for two full-frame traversals.

pub mod h264;

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::capture::Frame;
use crate::error::EngineError;

/// Lowest bitrate `set_bitrate` will apply.
pub const BITRATE_FLOOR_KBPS: u32 = 300;
/// Highest bitrate `set_bitrate` will apply.
pub const BITRATE_CEIL_KBPS: u32 = 8000;
/// Minimum spacing between two encoder reconfigurations.
pub const RECONFIG_GUARD: Duration = Duration::from_millis(750);
/// Peak-rate headroom above the target bitrate.
pub const VBV_HEADROOM_KBPS: u32 = 500;

// ── EncodedFrame ─────────────────────────────────────────────────

/// One H.264 access unit in Annex-B byte-stream format.
///
/// An empty `data` means the codec elided the frame (buffering or
/// skip); callers drop it silently.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Annex-B NAL units.
    pub data: Bytes,
    /// Presentation index in encode order.
    pub pts: u64,
    /// Whether this access unit starts with an IDR.
    pub is_keyframe: bool,
}

// ── VideoEncoder ─────────────────────────────────────────────────

/// Contract between the session and the codec.
pub trait VideoEncoder: Send {
    /// Encode one captured frame. Empty output means "frame elided,
    /// skip", not an error.
    fn encode(&mut self, frame: &Frame) -> Result<EncodedFrame, EngineError>;

    /// Request a new target bitrate in kbps.
    ///
    /// Rate-limited internally: at most one reconfiguration per
    /// [`RECONFIG_GUARD`], and only when the clamped value differs
    /// from the last applied one. Never flushes the pipeline.
    fn set_bitrate(&mut self, kbps: u32);

    /// Release codec resources. Further encodes fail.
    fn close(&mut self) {}
}

// ── ReconfigGate ─────────────────────────────────────────────────

/// Clamp + damping applied in front of every bitrate reconfiguration.
///
/// The adaptive controller already spaces its decisions; this guard is
/// the encoder's own damper so two independent clocks cannot thrash
/// the codec.
#[derive(Debug)]
pub struct ReconfigGate {
    last_applied: u32,
    last_reconfig: Instant,
}

impl ReconfigGate {
    pub fn new(initial_kbps: u32, now: Instant) -> Self {
        Self {
            last_applied: initial_kbps,
            last_reconfig: now,
        }
    }

    /// Returns the clamped bitrate to apply, or `None` when the
    /// request is inside the guard window or equal to the last
    /// applied value.
    pub fn admit(&mut self, kbps: u32, now: Instant) -> Option<u32> {
        let kbps = kbps.clamp(BITRATE_FLOOR_KBPS, BITRATE_CEIL_KBPS);

        if now.duration_since(self.last_reconfig) < RECONFIG_GUARD {
            return None;
        }
        if kbps == self.last_applied {
            return None;
        }

        self.last_applied = kbps;
        self.last_reconfig = now;
        Some(kbps)
    }
}

// ── Dimension helpers ────────────────────────────────────────────

/// Resolve requested output dimensions against the native capture
/// size: 0 means "native", odd values round down (4:2:0 chroma needs
/// even dimensions).
pub fn resolve_output_dims(in_w: u32, in_h: u32, out_w: u32, out_h: u32) -> (u32, u32) {
    let (w, h) = if out_w == 0 || out_h == 0 {
        (in_w, in_h)
    } else {
        (out_w, out_h)
    };
    (w & !1, h & !1)
}

// ── I420Buffer ───────────────────────────────────────────────────

/// Pre-allocated I420 planes, refilled once per encoded frame.
pub struct I420Buffer {
    width: usize,
    height: usize,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl I420Buffer {
    /// Allocate planes for even `width` × `height`.
    pub fn new(width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        Self {
            width: w,
            height: h,
            y: vec![0; w * h],
            u: vec![0; (w / 2) * (h / 2)],
            v: vec![0; (w / 2) * (h / 2)],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.y
    }

    pub fn u_plane(&self) -> &[u8] {
        &self.u
    }

    pub fn v_plane(&self) -> &[u8] {
        &self.v
    }

    /// Downscale `frame` (nearest neighbour) and convert BGRA → YUV420
    /// in one pass, BT.601 integer arithmetic.
    pub fn fill_scaled_bgra(&mut self, frame: &Frame) {
        let in_w = frame.width as usize;
        let in_h = frame.height as usize;
        let stride = frame.stride as usize;
        let (out_w, out_h) = (self.width, self.height);

        let mut y_index = 0;
        let mut uv_index = 0;

        for j in 0..out_h {
            let src_y = j * in_h / out_h;
            let row = &frame.pixels[src_y * stride..src_y * stride + stride];

            for i in 0..out_w {
                let src_x = i * in_w / out_w;
                let off = src_x * 4;
                let b = row[off] as i32;
                let g = row[off + 1] as i32;
                let r = row[off + 2] as i32;

                let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
                self.y[y_index] = y.clamp(0, 255) as u8;
                y_index += 1;

                if j % 2 == 0 && i % 2 == 0 {
                    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                    self.u[uv_index] = u.clamp(0, 255) as u8;
                    self.v[uv_index] = v.clamp(0, 255) as u8;
                    uv_index += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(w: u32, h: u32, bgra: [u8; 4]) -> Frame {
        let stride = w * 4 + 8; // GPU-style row padding
        let mut pixels = vec![0u8; (stride * h) as usize];
        for y in 0..h as usize {
            for x in 0..w as usize {
                let off = y * stride as usize + x * 4;
                pixels[off..off + 4].copy_from_slice(&bgra);
            }
        }
        Frame {
            width: w,
            height: h,
            stride,
            pixels,
            sequence: 1,
        }
    }

    #[test]
    fn output_dims_default_to_native_and_round_down() {
        assert_eq!(resolve_output_dims(1920, 1080, 0, 0), (1920, 1080));
        assert_eq!(resolve_output_dims(1920, 1080, 1281, 721), (1280, 720));
        assert_eq!(resolve_output_dims(1921, 1081, 0, 0), (1920, 1080));
    }

    #[test]
    fn gate_skips_equal_and_guards_rate() {
        let t0 = Instant::now();
        let mut gate = ReconfigGate::new(1800, t0);

        // Inside the guard window nothing passes, not even a change.
        assert_eq!(gate.admit(1200, t0 + Duration::from_millis(100)), None);

        // After the guard a change is applied once.
        let t1 = t0 + Duration::from_millis(800);
        assert_eq!(gate.admit(1200, t1), Some(1200));

        // The same value never reconfigures.
        assert_eq!(gate.admit(1200, t1 + Duration::from_secs(10)), None);

        // The guard restarts from the last applied change.
        assert_eq!(gate.admit(800, t1 + Duration::from_millis(200)), None);
        assert_eq!(gate.admit(800, t1 + Duration::from_millis(800)), Some(800));
    }

    #[test]
    fn gate_clamps_to_encoder_range() {
        let t0 = Instant::now();
        let mut gate = ReconfigGate::new(1800, t0);
        let later = t0 + Duration::from_secs(1);

        assert_eq!(gate.admit(50, later), Some(BITRATE_FLOOR_KBPS));
        assert_eq!(
            gate.admit(20_000, later + Duration::from_secs(1)),
            Some(BITRATE_CEIL_KBPS)
        );
    }

    #[test]
    fn conversion_hits_bt601_anchors() {
        let mut buf = I420Buffer::new(4, 4);

        buf.fill_scaled_bgra(&solid_frame(4, 4, [255, 255, 255, 255]));
        assert!(buf.y_plane().iter().all(|&y| y == 235));
        assert!(buf.u_plane().iter().all(|&u| u == 128));
        assert!(buf.v_plane().iter().all(|&v| v == 128));

        buf.fill_scaled_bgra(&solid_frame(4, 4, [0, 0, 0, 255]));
        assert!(buf.y_plane().iter().all(|&y| y == 16));
        assert!(buf.u_plane().iter().all(|&u| u == 128));
    }

    #[test]
    fn downscale_samples_within_bounds() {
        // 7x5 source into 4x4 output: every source index must stay in
        // range despite the non-integral ratio.
        let frame = solid_frame(7, 5, [10, 200, 30, 255]);
        let mut buf = I420Buffer::new(4, 4);
        buf.fill_scaled_bgra(&frame);

        // Solid input stays solid after nearest-neighbour scaling.
        let first = buf.y_plane()[0];
        assert!(buf.y_plane().iter().all(|&y| y == first));
    }

    #[test]
    fn plane_sizes_match_i420_layout() {
        let buf = I420Buffer::new(64, 48);
        assert_eq!(buf.y_plane().len(), 64 * 48);
        assert_eq!(buf.u_plane().len(), 32 * 24);
        assert_eq!(buf.v_plane().len(), 32 * 24);
    }
}
