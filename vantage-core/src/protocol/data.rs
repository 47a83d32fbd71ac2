//! Sidecar data-channel packet framing.
//!
//! # Wire format
//!
//! ```text
//! u8  type
//! u32 payload_len (LE)
//! payload bytes
//! ```
//!
//! Types: 1 = clipboard UTF-8, 2 = file-start (JSON `{name, size}`),
//! 3 = file-data chunk, 4 = chat. Unknown types are dropped by the
//! receiver, not treated as fatal: the channel must survive peers
//! that speak a newer dialect.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::EngineError;

/// Header length: type byte plus payload length.
pub const DATA_HEADER_LEN: usize = 5;

/// Upper bound on a single data-channel payload (128 MiB).
pub const MAX_DATA_PAYLOAD: usize = 128 * 1024 * 1024;

/// Chunk size used when sending files.
pub const FILE_CHUNK_SIZE: usize = 64 * 1024;

// ── DataType ─────────────────────────────────────────────────────

/// Known packet types on the data channel.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Clipboard text (UTF-8).
    Clipboard = 1,
    /// File transfer metadata (JSON `{name, size}`).
    FileStart = 2,
    /// File content chunk (raw bytes).
    FileData = 3,
    /// Chat message (UTF-8).
    Chat = 4,
}

impl TryFrom<u8> for DataType {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DataType::Clipboard),
            2 => Ok(DataType::FileStart),
            3 => Ok(DataType::FileData),
            4 => Ok(DataType::Chat),
            _ => Err(EngineError::UnknownVariant {
                type_name: "DataType",
                value: value as u64,
            }),
        }
    }
}

// ── FileStart ────────────────────────────────────────────────────

/// Metadata announcing an incoming file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStart {
    /// File name as the sender knows it; the receiver keeps only the
    /// basename.
    pub name: String,
    /// Total content length in bytes.
    pub size: u64,
}

impl FileStart {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ── Wire I/O ─────────────────────────────────────────────────────

/// Write one packet: header then payload.
pub async fn write_packet<W>(writer: &mut W, kind: u8, payload: &[u8]) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_DATA_PAYLOAD {
        return Err(EngineError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_DATA_PAYLOAD,
        });
    }

    let mut header = [0u8; DATA_HEADER_LEN];
    header[0] = kind;
    header[1..].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    writer.write_all(&header).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    Ok(())
}

/// Read one packet; returns the raw type byte so callers can drop
/// unknown types without killing the channel.
pub async fn read_packet<R>(reader: &mut R) -> Result<(u8, Vec<u8>), EngineError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; DATA_HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let kind = header[0];
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_DATA_PAYLOAD {
        return Err(EngineError::PayloadTooLarge {
            size: len,
            max: MAX_DATA_PAYLOAD,
        });
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut payload).await?;
    }
    Ok((kind, payload))
}
