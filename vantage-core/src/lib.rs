//! Core of the vantage remote-desktop engine.
//!
//! A Host captures its primary display, encodes it as an H.264 Annex-B
//! stream and ships it over a length-prefixed TCP framing to a single
//! Viewer, which feeds frames to a local UI and returns input events
//! that the Host replays as synthetic OS input. A sidecar data channel
//! carries clipboard text, chunked file transfers and chat.
//!
//! The mesh-VPN overlay, the on-screen renderer and the platform input
//! APIs are collaborators; this crate owns the streaming pipeline, the
//! wire protocols and the adaptive bitrate control between them.

pub mod capture;
pub mod codec;
pub mod config;
pub mod data;
pub mod encode;
mod error;
pub mod input;
pub mod net;
pub mod platform;
pub mod protocol;
pub mod session;

pub use error::EngineError;

pub use capture::{Captured, Frame, FrameSource};
pub use codec::{FrameCodec, MAX_VIDEO_FRAME};
pub use config::{EngineConfig, VideoConfig};
pub use encode::{EncodedFrame, VideoEncoder};
pub use input::{InputInjector, MouseButton, ScreenGeometry};
pub use protocol::input::InputEvent;
pub use session::adaptive::AdaptiveController;
pub use session::viewer::ViewerSession;
