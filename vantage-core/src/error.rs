//! Domain-specific error type for the engine.
//!
//! All fallible operations return `Result<T, EngineError>`. Malformed
//! network input is never a panic: every violation is typed so the
//! owning session can close its socket and leave the rest of the
//! process running.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Protocol ─────────────────────────────────────────────────
    /// A peer violated the wire protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A video frame exceeded the wire limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A data-channel payload exceeded the wire limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// File-transfer metadata could not be parsed.
    #[error("invalid transfer metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    /// UTF-8 conversion failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    // ── Pipeline ─────────────────────────────────────────────────
    /// The display capture backend failed.
    #[error("capture error: {0}")]
    Capture(String),

    /// The video encoder could not be opened or crashed mid-stream.
    #[error("encoder error: {0}")]
    Encoder(String),

    /// Synthetic input emission failed.
    #[error("input injection error: {0}")]
    Inject(String),

    /// A file transfer was refused because one is already running.
    #[error("file transfer already in progress")]
    TransferBusy,

    // ── Connection ───────────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for EngineError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        EngineError::ChannelClosed
    }
}

impl EngineError {
    /// Whether an I/O failure may clear on retry.
    ///
    /// The send task counts these instead of aborting outright; a
    /// non-transient error kills the session on first sight.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Timeout(_) => true,
            EngineError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}
