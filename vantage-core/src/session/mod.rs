//! Streaming sessions.
//!
//! [`host`] runs the Host side: capture → encode → bounded queue →
//! socket, plus the input return channel. [`viewer`] runs the other
//! end, and [`ui_bridge`] re-serves the stream to a locally-attached
//! UI over loopback. [`adaptive`] holds the bitrate controller both
//! sides of the Host pipeline consult.

pub mod adaptive;
pub mod host;
pub mod ui_bridge;
pub mod viewer;
