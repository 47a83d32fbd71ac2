//! Host streaming session: capture → encode → bounded queue → socket,
//! plus the input return channel.
//!
//! One viewer at a time. Three cooperative tasks share the session
//! queue and a stop token:
//!
//! - **capture** paces a ticker at `1/fps`, skips the poll entirely
//!   while the queue is nearly full, encodes and enqueues without
//!   blocking (drop-newest on full);
//! - **send** drains the queue under a write deadline and feeds the
//!   adaptive controller with the queue occupancy;
//! - **input** replays inbound events through the injector.
//!
//! Whichever task exits first cancels the token; the others observe
//! it at their next suspension point. The send task drains what is
//! already queued for at most the drain budget before the socket
//! goes down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{Captured, Frame, FrameSource};
use crate::config::{
    VideoConfig, MAX_CONSECUTIVE_SEND_ERRORS, SEND_DRAIN_TIMEOUT, SEND_WRITE_TIMEOUT,
    SESSION_QUEUE_CAP,
};
use crate::encode::{EncodedFrame, VideoEncoder};
use crate::error::EngineError;
use crate::input::receiver::InputReceiver;
use crate::input::InputInjector;
use crate::net::tune_stream;
use crate::session::adaptive::AdaptiveController;

// ── PipelineFactory ──────────────────────────────────────────────

/// Builds the capture/encode/inject backends for each accepted
/// viewer. The encoder is constructed only after the source reports
/// the native display size.
pub trait PipelineFactory: Send + Sync + 'static {
    type Source: FrameSource + 'static;
    type Encoder: VideoEncoder + 'static;
    type Injector: InputInjector + 'static;

    fn source(&self) -> Result<Self::Source, EngineError>;

    fn encoder(
        &self,
        in_w: u32,
        in_h: u32,
        video: &VideoConfig,
    ) -> Result<Self::Encoder, EngineError>;

    fn injector(&self) -> Result<Self::Injector, EngineError>;
}

// ── Serve loop ───────────────────────────────────────────────────

/// Accept viewers forever, streaming to at most one at a time.
///
/// A connection arriving while a session is live is closed
/// immediately; a finished session returns the Host to accepting.
pub async fn serve<F: PipelineFactory>(
    listener: TcpListener,
    video: VideoConfig,
    factory: F,
) -> Result<(), EngineError> {
    let factory = Arc::new(factory);
    let busy = Arc::new(AtomicBool::new(false));

    loop {
        let (stream, peer) = listener.accept().await?;
        if busy.swap(true, Ordering::SeqCst) {
            // Already streaming; the session owns the capturer and
            // the encoder, so a second viewer cannot be served.
            drop(stream);
            continue;
        }

        tune_stream(&stream);
        info!(%peer, "viewer accepted");

        let busy = Arc::clone(&busy);
        let factory = Arc::clone(&factory);
        let video = video.clone();
        tokio::spawn(async move {
            if let Err(e) = run_session(stream, &video, factory.as_ref()).await {
                warn!(error = %e, "session failed");
            }
            info!("session closed");
            busy.store(false, Ordering::SeqCst);
        });
    }
}

/// Run one viewer session to completion over an established stream.
pub async fn run_session<F: PipelineFactory>(
    stream: TcpStream,
    video: &VideoConfig,
    factory: &F,
) -> Result<(), EngineError> {
    let mut source = factory.source()?;
    source.start()?;
    let (in_w, in_h) = source.size();

    let encoder = factory.encoder(in_w, in_h, video)?;
    let encoder = Arc::new(Mutex::new(encoder));
    let injector = factory.injector()?;

    let (read_half, write_half) = stream.into_split();
    let (frame_tx, frame_rx) = mpsc::channel(SESSION_QUEUE_CAP);
    let stop = CancellationToken::new();

    let capture = tokio::spawn(capture_task(
        source,
        Arc::clone(&encoder),
        frame_tx,
        video.fps.max(1),
        stop.clone(),
    ));
    let send = tokio::spawn(send_task(
        write_half,
        frame_rx,
        Arc::clone(&encoder),
        video.raw_mode,
        stop.clone(),
    ));
    let input = tokio::spawn(input_task(read_half, injector, stop.clone()));

    // Every task cancels the token on exit, so the first to die takes
    // the other two with it.
    let _ = tokio::join!(capture, send, input);

    if let Ok(mut enc) = encoder.lock() {
        enc.close();
    }
    Ok(())
}

// ── Capture task ─────────────────────────────────────────────────

async fn capture_task<S, E>(
    mut source: S,
    encoder: Arc<Mutex<E>>,
    queue: mpsc::Sender<EncodedFrame>,
    fps: u32,
    stop: CancellationToken,
) where
    S: FrameSource,
    E: VideoEncoder,
{
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / fps);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_frame: Option<Frame> = None;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Congestion avoidance: with the queue nearly full, whatever
        // we produce now would be dropped at the enqueue anyway, so
        // skip the poll and save the encode cycles.
        let queue_len = queue.max_capacity() - queue.capacity();
        if queue_len >= queue.max_capacity() - 1 {
            continue;
        }

        match source.capture() {
            Ok(Captured::Frame(frame)) => last_frame = Some(frame),
            // Idle screen: keep cadence by re-encoding the last frame.
            Ok(Captured::Timeout) => {}
            Err(e) => {
                warn!(error = %e, "capture failed");
                break;
            }
        }
        let Some(frame) = last_frame.as_ref() else {
            continue;
        };

        let encoded = {
            let Ok(mut enc) = encoder.lock() else { break };
            enc.encode(frame)
        };
        match encoded {
            // Codec elided the frame; nothing to ship.
            Ok(ef) if ef.data.is_empty() => {}
            Ok(ef) => {
                // Non-blocking enqueue: a full queue drops this, the
                // newest frame, never the head of the line.
                let _ = queue.try_send(ef);
            }
            Err(e) => {
                warn!(error = %e, "encode failed");
                break;
            }
        }
    }

    source.close();
    stop.cancel();
}

// ── Send task ────────────────────────────────────────────────────

async fn send_task<E: VideoEncoder>(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<EncodedFrame>,
    encoder: Arc<Mutex<E>>,
    raw_mode: bool,
    stop: CancellationToken,
) {
    let mut controller = AdaptiveController::new(Instant::now());
    let mut consecutive_errors = 0u32;

    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        // Occupancy after the dequeue is the congestion signal. Raw
        // mode streams to external consumers with no drop handshake,
        // so the ladder stays parked.
        if !raw_mode {
            if let Some(kbps) = controller.observe(queue.len(), Instant::now()) {
                if let Ok(mut enc) = encoder.lock() {
                    enc.set_bitrate(kbps);
                }
                info!(kbps, "bitrate adjusted");
            }
        }

        match write_frame(&mut writer, &frame, raw_mode, SEND_WRITE_TIMEOUT).await {
            Ok(()) => consecutive_errors = 0,
            Err(e) if e.is_transient() => {
                consecutive_errors += 1;
                debug!(error = %e, attempt = consecutive_errors, "frame write failed");
                if consecutive_errors >= MAX_CONSECUTIVE_SEND_ERRORS {
                    warn!("too many consecutive write failures");
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "frame write failed");
                break;
            }
        }
    }

    // A torn-down session still flushes what is already queued, for
    // at most the drain budget.
    if stop.is_cancelled() {
        let _ = tokio::time::timeout(SEND_DRAIN_TIMEOUT, async {
            while let Some(frame) = queue.recv().await {
                if write_frame(&mut writer, &frame, raw_mode, SEND_DRAIN_TIMEOUT)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        })
        .await;
    }

    stop.cancel();
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    frame: &EncodedFrame,
    raw_mode: bool,
    deadline: Duration,
) -> Result<(), EngineError> {
    let write = async {
        if !raw_mode {
            let header = (frame.data.len() as u32).to_le_bytes();
            writer.write_all(&header).await?;
        }
        writer.write_all(&frame.data).await?;
        Ok::<(), std::io::Error>(())
    };

    match tokio::time::timeout(deadline, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(EngineError::Io(e)),
        Err(_) => Err(EngineError::Timeout(deadline)),
    }
}

// ── Input task ───────────────────────────────────────────────────

async fn input_task<I: InputInjector>(
    read_half: OwnedReadHalf,
    injector: I,
    stop: CancellationToken,
) {
    let mut receiver = InputReceiver::new(injector);
    if let Err(e) = receiver.run(read_half, stop.clone()).await {
        debug!(error = %e, "input channel closed");
    }
    stop.cancel();
}
