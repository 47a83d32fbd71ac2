//! Loopback bridge toward the locally-attached UI.
//!
//! Re-serves the viewer's frame queue on a localhost listener with
//! the same `u32 length || payload` framing the Host speaks, and
//! relays the UI's 14-byte(+text) input events back toward the Host.
//! One UI at a time; when none is attached, frames keep draining
//! through the bounded queue's drop-newest policy, so reconnecting
//! always resumes near live.

use bytes::Bytes;
use futures::SinkExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::FrameCodec;
use crate::error::EngineError;
use crate::net::tune_stream;
use crate::protocol::input::InputEvent;

/// Serve the UI bridge until the session stop token fires.
pub async fn serve(
    listener: TcpListener,
    mut frames: mpsc::Receiver<Bytes>,
    input: mpsc::Sender<InputEvent>,
    stop: CancellationToken,
) -> Result<(), EngineError> {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = accepted?;
        tune_stream(&stream);
        info!(%peer, "ui attached");

        handle_ui(stream, &mut frames, &input, &stop).await;
        info!("ui detached");

        if stop.is_cancelled() {
            return Ok(());
        }
    }
}

/// Pump frames out and input events in until the UI disconnects or
/// the session dies. The input direction runs in its own task so a
/// frame write never clobbers a half-read event.
async fn handle_ui(
    stream: TcpStream,
    frames: &mut mpsc::Receiver<Bytes>,
    input: &mpsc::Sender<InputEvent>,
    stop: &CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let mut sink = FramedWrite::new(write_half, FrameCodec);

    let ui_gone = CancellationToken::new();
    let relay = tokio::spawn(relay_input(
        read_half,
        input.clone(),
        ui_gone.clone(),
        stop.clone(),
    ));

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ui_gone.cancelled() => break,

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    // Upstream session is gone; nothing more to serve.
                    stop.cancel();
                    break;
                };
                if let Err(e) = sink.send(frame).await {
                    debug!(error = %e, "ui write failed");
                    break;
                }
            }
        }
    }

    ui_gone.cancel();
    let _ = relay.await;
}

async fn relay_input(
    mut reader: OwnedReadHalf,
    input: mpsc::Sender<InputEvent>,
    ui_gone: CancellationToken,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ui_gone.cancelled() => break,
            event = InputEvent::read_from(&mut reader) => event,
        };

        match event {
            Ok(event) => {
                if input.send(event).await.is_err() {
                    stop.cancel();
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "ui input stream ended");
                break;
            }
        }
    }

    ui_gone.cancel();
}
