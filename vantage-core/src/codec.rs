//! Length-prefixed framing for the video stream.
//!
//! # Wire format
//!
//! ```text
//! u32 length (LE) || payload
//! ```
//!
//! The length counts the payload only, never the 4-byte header. A
//! length of 0 or above [`MAX_VIDEO_FRAME`] is a protocol error and
//! must close the session; a Viewer pointed at a raw-mode Host will
//! fail-stop here instead of rendering garbage.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::EngineError;

/// Upper bound on a single encoded video frame (10 MiB).
pub const MAX_VIDEO_FRAME: usize = 10 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Codec for `u32 length || payload` video frames.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = EngineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut length_bytes = [0u8; HEADER_LEN];
        length_bytes.copy_from_slice(&src[..HEADER_LEN]);
        let length = u32::from_le_bytes(length_bytes) as usize;

        if length == 0 {
            return Err(EngineError::ProtocolViolation("zero-length video frame"));
        }
        if length > MAX_VIDEO_FRAME {
            return Err(EngineError::FrameTooLarge {
                size: length,
                max: MAX_VIDEO_FRAME,
            });
        }

        if src.len() < HEADER_LEN + length {
            // Grow once up front so the frame arrives into a single buffer.
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();
        Ok(Some(payload))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = EngineError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.is_empty() {
            return Err(EngineError::ProtocolViolation("zero-length video frame"));
        }
        if item.len() > MAX_VIDEO_FRAME {
            return Err(EngineError::FrameTooLarge {
                size: item.len(),
                max: MAX_VIDEO_FRAME,
            });
        }

        dst.reserve(HEADER_LEN + item.len());
        dst.put_u32_le(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();

        let payload = Bytes::from_static(b"\x00\x00\x00\x01annex-b nal");
        codec.encode(payload.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_header_waits() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[0x05u8, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_payload_waits() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(8);
        buf.extend_from_slice(b"half");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"half");
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], b"halfhalf");
    }

    #[test]
    fn zero_length_rejected() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(0);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(EngineError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn oversized_rejected() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(MAX_VIDEO_FRAME as u32 + 1);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(EngineError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn back_to_back_frames() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"first"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"second"), &mut buf).unwrap();

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"first");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"second");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
