//! vantage: peer-to-peer remote-desktop engine.
//!
//! Host mode (no `--connect`): capture the primary display, stream
//! H.264 to one viewer, replay returned input, and serve the sidecar
//! data channel. Viewer mode (`--connect <ip>`): pull the stream,
//! re-serve it to a local UI over the loopback bridge, and relay
//! input and data the other way.
//!
//! Exit codes: 0 on SIGINT/SIGTERM, 1 on fatal initialisation
//! failure (capture, encoder or socket bind).

use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vantage_core::capture::dxgi::DxgiSource;
use vantage_core::config::{EngineConfig, VideoConfig, PORT_DATA, PORT_UI_BRIDGE, PORT_VIDEO};
use vantage_core::data::{self, ClipboardSync, DataContext, NullClipboard, SystemClipboard};
use vantage_core::encode::h264::H264Encoder;
use vantage_core::input::win32::SendInputInjector;
use vantage_core::net;
use vantage_core::session::viewer::{ViewerConfig, ViewerSession};
use vantage_core::session::{host, ui_bridge};
use vantage_core::{platform, EngineError};

// ── CLI ──────────────────────────────────────────────────────────

/// Peer-to-peer remote-desktop engine over a mesh-VPN overlay.
#[derive(Debug, Parser)]
#[command(name = "vantage", version, disable_help_flag = true)]
struct Args {
    /// Peer identity string (default: OS hostname).
    #[arg(long)]
    host: Option<String>,

    /// Target Host IP; omitted means "run as Host".
    #[arg(long)]
    connect: Option<IpAddr>,

    /// Output width in pixels; 0 means native.
    #[arg(short = 'w', long = "width", default_value_t = 0)]
    width: u32,

    /// Output height in pixels; 0 means native.
    #[arg(short = 'h', long = "height", default_value_t = 0)]
    height: u32,

    /// Capture cadence in frames per second.
    #[arg(long, default_value_t = 25)]
    fps: u32,

    /// Omit the per-frame length prefix (for external decoders).
    #[arg(long, default_value_t = false)]
    raw: bool,

    /// Print help.
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

// ── Host pipeline ────────────────────────────────────────────────

/// Production backends: DXGI capture, OpenH264, `SendInput`.
struct EnginePipeline;

impl host::PipelineFactory for EnginePipeline {
    type Source = DxgiSource;
    type Encoder = H264Encoder;
    type Injector = SendInputInjector;

    fn source(&self) -> Result<DxgiSource, EngineError> {
        Ok(DxgiSource::new())
    }

    fn encoder(
        &self,
        in_w: u32,
        in_h: u32,
        video: &VideoConfig,
    ) -> Result<H264Encoder, EngineError> {
        H264Encoder::new(in_w, in_h, video.width, video.height, video.fps)
    }

    fn injector(&self) -> Result<SendInputInjector, EngineError> {
        SendInputInjector::new()
    }
}

// ── Entry point ──────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let args = Args::parse();
    let hostname = args.host.clone().unwrap_or_else(|| {
        gethostname::gethostname().to_string_lossy().into_owned()
    });

    let config = EngineConfig {
        hostname,
        connect: args.connect,
        video: VideoConfig {
            width: args.width,
            height: args.height,
            fps: args.fps.max(1),
            raw_mode: args.raw,
        },
    };

    // Must precede the first capture or injector call; coordinate
    // mapping assumes the unscaled pixel grid.
    platform::declare_dpi_awareness();

    let result = match config.connect {
        None => run_host(config).await,
        Some(ip) => run_viewer(config, ip).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::from(1)
        }
    }
}

// ── Host mode ────────────────────────────────────────────────────

async fn run_host(config: EngineConfig) -> Result<(), EngineError> {
    info!(host = %config.hostname, "host mode");

    let video_listener = net::listen_tcp(PORT_VIDEO).await?;
    let data_listener = net::listen_tcp(PORT_DATA).await?;
    info!(video = PORT_VIDEO, data = PORT_DATA, "listening");

    let (clipboard, data_handle, outbound) = data_endpoint();
    let ctx = Arc::new(DataContext {
        clipboard: Arc::clone(&clipboard),
        download_dir: data::default_download_dir(),
        chat_sink: Some(Box::new(|msg| info!(%msg, "chat"))),
    });
    drop(data_handle); // host keeps only the watcher's clone

    let stop = CancellationToken::new();
    tokio::spawn(clipboard.watch(stop.clone()));
    tokio::spawn(async move {
        if let Err(e) = data::serve(data_listener, ctx, outbound).await {
            warn!(error = %e, "data channel listener failed");
        }
    });

    let video = tokio::spawn(host::serve(
        video_listener,
        config.video.clone(),
        EnginePipeline,
    ));

    tokio::select! {
        _ = shutdown_signal() => {
            info!("interrupt received, shutting down");
        }
        result = video => {
            // The accept loop only returns on listener failure.
            if let Ok(Err(e)) = result {
                stop.cancel();
                return Err(e);
            }
        }
    }

    stop.cancel();
    Ok(())
}

// ── Viewer mode ──────────────────────────────────────────────────

async fn run_viewer(config: EngineConfig, host_ip: IpAddr) -> Result<(), EngineError> {
    info!(host = %config.hostname, target = %host_ip, "viewer mode");

    let session = ViewerSession::connect(host_ip, PORT_VIDEO, ViewerConfig::default()).await?;
    let (frames, input, stop) = session.split();

    let ui_listener = net::listen_loopback(PORT_UI_BRIDGE).await?;
    info!(port = PORT_UI_BRIDGE, "ui bridge listening");
    let ui_stop = stop.clone();
    tokio::spawn(async move {
        if let Err(e) = ui_bridge::serve(ui_listener, frames, input, ui_stop).await {
            warn!(error = %e, "ui bridge failed");
        }
    });

    let (clipboard, _data_handle, outbound) = data_endpoint();
    let ctx = Arc::new(DataContext {
        clipboard: Arc::clone(&clipboard),
        download_dir: data::default_download_dir(),
        chat_sink: Some(Box::new(|msg| info!(%msg, "chat"))),
    });
    tokio::spawn(clipboard.watch(stop.clone()));
    tokio::spawn(async move {
        if let Err(e) = data::dial(host_ip, PORT_DATA, ctx, outbound).await {
            warn!(error = %e, "data channel unavailable");
        }
    });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("interrupt received, shutting down");
        }
        _ = stop.cancelled() => {
            info!("session ended by host");
        }
    }

    stop.cancel();
    Ok(())
}

// ── Shared wiring ────────────────────────────────────────────────

/// Clipboard sync wired into a fresh data-channel handle.
fn data_endpoint() -> (
    Arc<ClipboardSync>,
    data::DataChannel,
    tokio::sync::mpsc::Receiver<data::OutboundPacket>,
) {
    let clipboard = match SystemClipboard::new() {
        Ok(backend) => ClipboardSync::new(Box::new(backend)),
        Err(e) => {
            warn!(error = %e, "no system clipboard; sync disabled");
            ClipboardSync::new(Box::new(NullClipboard))
        }
    };

    let (handle, outbound) = data::channel();
    let sink = handle.clone();
    clipboard.set_sink(move |text| sink.try_send_clipboard(text));

    (clipboard, handle, outbound)
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
