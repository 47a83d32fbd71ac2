//! Viewer session: dial the Host, pull framed video, push input.
//!
//! The read loop re-uses one receive buffer sized to the largest
//! frame seen so far and forwards payloads into a bounded UI queue
//! with drop-newest semantics: rendering latency is preferable to
//! backlog. The input path writes events in the reverse direction of
//! the same socket; the two directions share nothing but the socket.

use std::net::IpAddr;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::MAX_VIDEO_FRAME;
use crate::config::{INPUT_WRITE_TIMEOUT, UI_QUEUE_CAP, VIEWER_READ_TIMEOUT};
use crate::error::EngineError;
use crate::net::dial_tcp;
use crate::protocol::input::InputEvent;

// ── ViewerConfig ─────────────────────────────────────────────────

/// Tunables for one viewer connection.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Capacity of the UI delivery queue.
    pub ui_queue_cap: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            ui_queue_cap: UI_QUEUE_CAP,
        }
    }
}

// ── ViewerSession ────────────────────────────────────────────────

/// One live connection to a Host.
pub struct ViewerSession {
    frames: mpsc::Receiver<Bytes>,
    input: mpsc::Sender<InputEvent>,
    stop: CancellationToken,
}

impl ViewerSession {
    /// Dial `(host_ip, port)` and start the read and input loops.
    pub async fn connect(
        host_ip: IpAddr,
        port: u16,
        config: ViewerConfig,
    ) -> Result<Self, EngineError> {
        let stream = dial_tcp(host_ip, port).await?;
        info!(%host_ip, port, "connected to host");

        let (read_half, write_half) = stream.into_split();
        let (frame_tx, frame_rx) = mpsc::channel(config.ui_queue_cap.max(1));
        let (input_tx, input_rx) = mpsc::channel(64);
        let stop = CancellationToken::new();

        tokio::spawn(read_loop(read_half, frame_tx, stop.clone()));
        tokio::spawn(input_loop(write_half, input_rx, stop.clone()));

        Ok(Self {
            frames: frame_rx,
            input: input_tx,
            stop,
        })
    }

    /// Next video payload, or `None` once the session is over.
    pub async fn recv_frame(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }

    /// Handle for forwarding UI input events to the Host.
    pub fn input(&self) -> mpsc::Sender<InputEvent> {
        self.input.clone()
    }

    /// Tear the session down.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    /// Decompose into the pieces the UI bridge needs.
    pub fn split(
        self,
    ) -> (
        mpsc::Receiver<Bytes>,
        mpsc::Sender<InputEvent>,
        CancellationToken,
    ) {
        (self.frames, self.input, self.stop)
    }
}

// ── Read loop ────────────────────────────────────────────────────

async fn read_loop(
    mut reader: OwnedReadHalf,
    frames: mpsc::Sender<Bytes>,
    stop: CancellationToken,
) {
    let mut header = [0u8; 4];
    // One receive buffer, grown to the largest frame seen; per-frame
    // allocation at 25 fps is measurable garbage.
    let mut buf: Vec<u8> = Vec::new();

    loop {
        let read_one = async {
            tokio::time::timeout(VIEWER_READ_TIMEOUT, reader.read_exact(&mut header))
                .await
                .map_err(|_| EngineError::Timeout(VIEWER_READ_TIMEOUT))??;

            let len = u32::from_le_bytes(header) as usize;
            if len == 0 {
                return Err(EngineError::ProtocolViolation("zero-length video frame"));
            }
            if len > MAX_VIDEO_FRAME {
                return Err(EngineError::FrameTooLarge {
                    size: len,
                    max: MAX_VIDEO_FRAME,
                });
            }

            if buf.len() < len {
                buf.resize(len, 0);
            }
            tokio::time::timeout(VIEWER_READ_TIMEOUT, reader.read_exact(&mut buf[..len]))
                .await
                .map_err(|_| EngineError::Timeout(VIEWER_READ_TIMEOUT))??;

            Ok::<Bytes, EngineError>(Bytes::copy_from_slice(&buf[..len]))
        };

        let outcome = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            outcome = read_one => outcome,
        };

        match outcome {
            Ok(payload) => {
                // Drop-newest into the UI queue; a slow renderer gets
                // fresh frames late rather than stale frames forever.
                let _ = frames.try_send(payload);
            }
            Err(EngineError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                info!("host closed the stream");
                break;
            }
            Err(e) => {
                debug!(error = %e, "video stream ended");
                break;
            }
        }
    }

    stop.cancel();
}

// ── Input loop ───────────────────────────────────────────────────

async fn input_loop(
    mut writer: OwnedWriteHalf,
    mut events: mpsc::Receiver<InputEvent>,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let bytes = match event.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "refusing malformed input event");
                continue;
            }
        };

        match tokio::time::timeout(INPUT_WRITE_TIMEOUT, writer.write_all(&bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "input write failed");
                break;
            }
            Err(_) => {
                debug!("input write timed out");
                break;
            }
        }
    }

    stop.cancel();
}
