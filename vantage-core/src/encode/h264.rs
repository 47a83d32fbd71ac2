//! OpenH264 encoder backend.
//!
//! Configured for zero-latency streaming: bitrate-mode rate control,
//! frame skipping on overshoot, SPS/PPS repeated on every IDR so a
//! late Viewer decodes from the next keyframe without a catch-up
//! signal. One IDR is forced every `fps` frames; bitrate changes go
//! through the raw encoder option API so the pipeline is never
//! flushed.
//!
//! # Safety
//!
//! The raw `set_option` / `force_intra_frame` calls are the only
//! unsafe surface and are confined to this module.

use std::time::Instant;

use bytes::Bytes;
use openh264::encoder::{Encoder, EncoderConfig, FrameType};
use openh264::formats::YUVSource;
use openh264::OpenH264API;
use openh264_sys2::{SBitrateInfo, ENCODER_OPTION_BITRATE, ENCODER_OPTION_MAX_BITRATE, SPATIAL_LAYER_ALL};
use tracing::debug;

use crate::capture::Frame;
use crate::encode::{
    resolve_output_dims, EncodedFrame, I420Buffer, ReconfigGate, VideoEncoder, VBV_HEADROOM_KBPS,
};
use crate::error::EngineError;

/// Bitrate applied until the adaptive controller speaks.
const DEFAULT_BITRATE_KBPS: u32 = 1800;

impl YUVSource for I420Buffer {
    fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    fn strides(&self) -> (usize, usize, usize) {
        (self.width(), self.width() / 2, self.width() / 2)
    }

    fn y(&self) -> &[u8] {
        self.y_plane()
    }

    fn u(&self) -> &[u8] {
        self.u_plane()
    }

    fn v(&self) -> &[u8] {
        self.v_plane()
    }
}

// ── H264Encoder ──────────────────────────────────────────────────

/// H.264 Annex-B encoder with live bitrate reconfiguration.
pub struct H264Encoder {
    encoder: Option<Encoder>,
    fps: u32,
    yuv: I420Buffer,
    frame_index: u64,
    gate: ReconfigGate,
}

// SAFETY: the codec instance is driven by exactly one session task at
// a time (`encode` and `set_bitrate` both take `&mut self` and the
// session wraps the encoder in a mutex); the raw pointers inside are
// never shared.
unsafe impl Send for H264Encoder {}

impl H264Encoder {
    /// Open an encoder scaling `in_w`×`in_h` captures down to
    /// `out_w`×`out_h` (0 = native; odd values round down).
    pub fn new(in_w: u32, in_h: u32, out_w: u32, out_h: u32, fps: u32) -> Result<Self, EngineError> {
        let (out_w, out_h) = resolve_output_dims(in_w, in_h, out_w, out_h);
        if out_w == 0 || out_h == 0 {
            return Err(EngineError::Encoder("output dimensions are zero".into()));
        }
        let fps = fps.max(1);

        let config = EncoderConfig::new()
            .set_bitrate_bps(DEFAULT_BITRATE_KBPS * 1000)
            .max_frame_rate(fps as f32)
            .enable_skip_frame(true);

        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| EngineError::Encoder(format!("openh264 open failed: {e}")))?;

        Ok(Self {
            encoder: Some(encoder),
            fps,
            yuv: I420Buffer::new(out_w, out_h),
            frame_index: 0,
            gate: ReconfigGate::new(DEFAULT_BITRATE_KBPS, Instant::now()),
        })
    }

    /// Output dimensions after rounding.
    pub fn output_size(&self) -> (u32, u32) {
        (self.yuv.width() as u32, self.yuv.height() as u32)
    }
}

impl VideoEncoder for H264Encoder {
    fn encode(&mut self, frame: &Frame) -> Result<EncodedFrame, EngineError> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| EngineError::Encoder("encoder is closed".into()))?;

        self.yuv.fill_scaled_bgra(frame);

        // Keyframe cadence: one IDR per second of video, SPS/PPS
        // attached, so late joiners lock on within `fps` frames.
        if self.frame_index % self.fps as u64 == 0 {
            unsafe {
                encoder.raw_api().force_intra_frame(true);
            }
        }

        let bitstream = encoder
            .encode(&self.yuv)
            .map_err(|e| EngineError::Encoder(format!("encode failed: {e}")))?;

        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR);
        let data = Bytes::from(bitstream.to_vec());
        let pts = self.frame_index;
        self.frame_index += 1;

        Ok(EncodedFrame {
            data,
            pts,
            is_keyframe,
        })
    }

    fn set_bitrate(&mut self, kbps: u32) {
        let Some(encoder) = self.encoder.as_mut() else {
            return;
        };
        let Some(kbps) = self.gate.admit(kbps, Instant::now()) else {
            return;
        };

        let mut target = SBitrateInfo {
            iLayer: SPATIAL_LAYER_ALL,
            iBitrate: (kbps * 1000) as i32,
        };
        let mut ceiling = SBitrateInfo {
            iLayer: SPATIAL_LAYER_ALL,
            iBitrate: ((kbps + VBV_HEADROOM_KBPS) * 1000) as i32,
        };

        let rc = unsafe {
            let api = encoder.raw_api();
            let a = api.set_option(
                ENCODER_OPTION_BITRATE,
                (&mut target as *mut SBitrateInfo).cast(),
            );
            let b = api.set_option(
                ENCODER_OPTION_MAX_BITRATE,
                (&mut ceiling as *mut SBitrateInfo).cast(),
            );
            (a, b)
        };
        if rc.0 != 0 || rc.1 != 0 {
            debug!(kbps, "bitrate reconfiguration rejected by codec");
        }
    }

    fn close(&mut self) {
        self.encoder = None;
    }
}
