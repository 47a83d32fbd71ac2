//! Sidecar data channel: clipboard, chunked file transfer, chat.
//!
//! A separate TCP connection on its own port, multiplexing typed
//! packets (see [`crate::protocol::data`]). One peer serves, the
//! other dials; each end runs one session at a time with a writer
//! draining the outbound queue and a reader dispatching inbound
//! packets. A 30 s inter-packet read deadline protects against dead
//! peers.
//!
//! Received files land in `~/Downloads/<basename>`; the directory is
//! created user-private. No temporary file is used, so an interrupted
//! transfer leaves its partial file on disk.

pub mod clipboard;

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DATA_READ_TIMEOUT;
use crate::error::EngineError;
use crate::net::{dial_tcp, tune_stream};
use crate::protocol::data::{read_packet, write_packet, DataType, FileStart, FILE_CHUNK_SIZE};

/// Outbound packet: raw type byte plus payload.
pub type OutboundPacket = (u8, Vec<u8>);

/// Where received files go when the platform reports no home.
const FALLBACK_DOWNLOAD_DIR: &str = "Received_Files";

/// Resolve the receive directory: `$HOME/Downloads`, or a local
/// folder when the home directory is unknown.
pub fn default_download_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join("Downloads"),
        None => PathBuf::from(FALLBACK_DOWNLOAD_DIR),
    }
}

// ── DataContext ──────────────────────────────────────────────────

/// Shared collaborators for a data-channel endpoint.
pub struct DataContext {
    /// Echo-suppressed clipboard state for this peer.
    pub clipboard: Arc<ClipboardSync>,
    /// Directory receiving incoming files.
    pub download_dir: PathBuf,
    /// Optional consumer for inbound chat text.
    pub chat_sink: Option<Box<dyn Fn(String) + Send + Sync>>,
}

// ── DataChannel handle ───────────────────────────────────────────

/// Cloneable sender half of the data channel.
///
/// Packets queue through a bounded channel; when no peer is attached
/// the queue fills and further sends are dropped rather than blocking
/// the caller.
#[derive(Clone)]
pub struct DataChannel {
    outbound: mpsc::Sender<OutboundPacket>,
}

/// Create the handle plus the receiver that [`serve`]/[`dial`] drain.
pub fn channel() -> (DataChannel, mpsc::Receiver<OutboundPacket>) {
    let (tx, rx) = mpsc::channel(64);
    (DataChannel { outbound: tx }, rx)
}

impl DataChannel {
    /// Queue clipboard text for the peer.
    pub async fn send_clipboard(&self, text: &str) -> Result<(), EngineError> {
        self.outbound
            .send((DataType::Clipboard as u8, text.as_bytes().to_vec()))
            .await?;
        Ok(())
    }

    /// Non-blocking clipboard send for synchronous callers (the
    /// watcher sink). Dropped when the queue is full.
    pub fn try_send_clipboard(&self, text: String) {
        let _ = self
            .outbound
            .try_send((DataType::Clipboard as u8, text.into_bytes()));
    }

    /// Queue a chat line for the peer.
    pub async fn send_chat(&self, text: &str) -> Result<(), EngineError> {
        self.outbound
            .send((DataType::Chat as u8, text.as_bytes().to_vec()))
            .await?;
        Ok(())
    }

    /// Stream a file to the peer: metadata first, then fixed-size
    /// chunks. Queue back-pressure paces the disk reads.
    pub async fn send_file(&self, path: &Path) -> Result<(), EngineError> {
        let meta = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .ok_or(EngineError::ProtocolViolation("file name has no basename"))?
            .to_string_lossy()
            .into_owned();

        let start = FileStart {
            name,
            size: meta.len(),
        };
        self.outbound
            .send((DataType::FileStart as u8, start.to_bytes()?))
            .await?;

        let mut file = File::open(path).await?;
        let mut chunk = vec![0u8; FILE_CHUNK_SIZE];
        loop {
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            self.outbound
                .send((DataType::FileData as u8, chunk[..n].to_vec()))
                .await?;
        }
        Ok(())
    }
}

// ── Serve / dial ─────────────────────────────────────────────────

/// Host side: accept one data peer at a time; extra connections are
/// closed immediately.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<DataContext>,
    mut outbound: mpsc::Receiver<OutboundPacket>,
) -> Result<(), EngineError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tune_stream(&stream);
        info!(%peer, "data channel accepted");

        let session = run_session(stream, Arc::clone(&ctx), &mut outbound);
        tokio::pin!(session);

        loop {
            tokio::select! {
                biased;
                _ = &mut session => break,
                extra = listener.accept() => {
                    if let Ok((extra_stream, _)) = extra {
                        drop(extra_stream); // busy
                    }
                }
            }
        }
        info!("data channel closed");
    }
}

/// Viewer side: dial the Host's data port and run until disconnect.
pub async fn dial(
    host_ip: IpAddr,
    port: u16,
    ctx: Arc<DataContext>,
    mut outbound: mpsc::Receiver<OutboundPacket>,
) -> Result<(), EngineError> {
    let stream = dial_tcp(host_ip, port).await?;
    info!(%host_ip, port, "data channel connected");
    run_session(stream, ctx, &mut outbound).await;
    info!("data channel closed");
    Ok(())
}

/// One data-channel session: writer drains the outbound queue, a
/// spawned reader dispatches inbound packets.
async fn run_session(
    stream: TcpStream,
    ctx: Arc<DataContext>,
    outbound: &mut mpsc::Receiver<OutboundPacket>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let stop = CancellationToken::new();
    let reader = tokio::spawn(read_session(read_half, ctx, stop.clone()));

    loop {
        let (kind, payload) = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            item = outbound.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        if let Err(e) = write_packet(&mut write_half, kind, &payload).await {
            debug!(error = %e, "data write failed");
            break;
        }
    }

    stop.cancel();
    let _ = reader.await;
}

// ── Inbound dispatch ─────────────────────────────────────────────

/// At most one in-flight file per channel.
struct FileReceiveState {
    file: File,
    path: PathBuf,
    expected: u64,
    received: u64,
}

async fn read_session(mut reader: OwnedReadHalf, ctx: Arc<DataContext>, stop: CancellationToken) {
    let mut transfer: Option<FileReceiveState> = None;

    loop {
        let packet = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            packet = tokio::time::timeout(DATA_READ_TIMEOUT, read_packet(&mut reader)) => packet,
        };

        let (kind, payload) = match packet {
            Ok(Ok(packet)) => packet,
            Ok(Err(e)) => {
                debug!(error = %e, "data read ended");
                break;
            }
            Err(_) => {
                debug!("data channel idle past deadline");
                break;
            }
        };

        match DataType::try_from(kind) {
            Ok(DataType::Clipboard) => match String::from_utf8(payload) {
                Ok(text) => {
                    if let Err(e) = ctx.clipboard.apply_remote(&text) {
                        debug!(error = %e, "clipboard write failed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "protocol violation: clipboard payload not utf-8");
                    break;
                }
            },

            Ok(DataType::FileStart) => {
                if transfer.is_some() {
                    warn!("file-start while a transfer is in progress; rejected");
                    continue;
                }
                let meta = match FileStart::from_bytes(&payload) {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!(error = %e, "protocol violation: malformed file metadata");
                        break;
                    }
                };
                match open_receive_target(&ctx.download_dir, &meta.name).await {
                    Ok((path, file)) => {
                        info!(path = %path.display(), size = meta.size, "receiving file");
                        transfer = Some(FileReceiveState {
                            file,
                            path,
                            expected: meta.size,
                            received: 0,
                        });
                        // A zero-byte file is complete on arrival.
                        if let Some(done) = take_if_complete(&mut transfer).await {
                            info!(path = %done.display(), "file received");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, name = %meta.name, "cannot open receive target");
                    }
                }
            }

            Ok(DataType::FileData) => match transfer.as_mut() {
                // No preceding file-start: silently dropped.
                None => {}
                Some(state) => {
                    match state.file.write_all(&payload).await {
                        Ok(()) => {
                            state.received += payload.len() as u64;
                            if let Some(done) = take_if_complete(&mut transfer).await {
                                info!(path = %done.display(), "file received");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, path = %state.path.display(), "file write failed");
                            transfer = None; // partial file stays on disk
                        }
                    }
                }
            },

            Ok(DataType::Chat) => match String::from_utf8(payload) {
                Ok(text) => {
                    if let Some(sink) = ctx.chat_sink.as_ref() {
                        sink(text);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "protocol violation: chat payload not utf-8");
                    break;
                }
            },

            Err(_) => {
                debug!(kind, "unknown data packet type dropped");
            }
        }
    }

    stop.cancel();
}

/// Close out a finished transfer and return its path.
async fn take_if_complete(transfer: &mut Option<FileReceiveState>) -> Option<PathBuf> {
    let done = transfer
        .as_ref()
        .is_some_and(|state| state.received >= state.expected);
    if !done {
        return None;
    }

    let state = transfer.take()?;
    let mut file = state.file;
    if let Err(e) = file.flush().await {
        warn!(error = %e, "file flush failed");
    }
    Some(state.path)
}

/// Strip the sender's path (both separator conventions), resolve into
/// the download directory and create the file truncated.
async fn open_receive_target(dir: &Path, name: &str) -> Result<(PathBuf, File), EngineError> {
    let base = sanitize_basename(name)
        .ok_or(EngineError::ProtocolViolation("file name has no basename"))?;

    create_private_dir(dir)?;
    let path = dir.join(base);
    let file = File::create(&path).await?;
    Ok((path, file))
}

/// Last path component of `name`, refusing empty and dot names.
fn sanitize_basename(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next()?;
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base)
}

/// Create the receive directory user-private (0700 on Unix).
fn create_private_dir(dir: &Path) -> Result<(), EngineError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .or_else(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Ok(())
                } else {
                    Err(e)
                }
            })?;
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

// Re-exported for callers wiring the watcher to the channel.
pub use clipboard::{ClipboardBackend, ClipboardSync, NullClipboard, SystemClipboard};
