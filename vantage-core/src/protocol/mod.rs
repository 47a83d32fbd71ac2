//! Binary wire protocols carried over the session sockets.
//!
//! Two independent framings live here:
//!
//! - [`input`]: the 14-byte input event header (Viewer → Host),
//!   travelling in the reverse direction of the video socket.
//! - [`data`]: the typed sidecar packets (clipboard, file transfer,
//!   chat) on the data-channel socket.
//!
//! The video frames themselves use the length-prefixed framing in
//! [`crate::codec`].

pub mod data;
pub mod input;
