//! End-to-end session tests over localhost sockets, with fake
//! capture/encode/inject backends standing in for the platform.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use vantage_core::capture::{Captured, Frame, FrameSource};
use vantage_core::config::VideoConfig;
use vantage_core::encode::{EncodedFrame, VideoEncoder};
use vantage_core::input::{InputInjector, MouseButton};
use vantage_core::protocol::input::{InputEvent, BUTTON_LEFT};
use vantage_core::session::host::{self, PipelineFactory};
use vantage_core::session::viewer::{ViewerConfig, ViewerSession};
use vantage_core::EngineError;

// ── Fakes ────────────────────────────────────────────────────────

struct TestSource {
    sequence: u64,
}

impl FrameSource for TestSource {
    fn start(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn capture(&mut self) -> Result<Captured, EngineError> {
        self.sequence += 1;
        Ok(Captured::Frame(Frame {
            width: 8,
            height: 8,
            stride: 32,
            pixels: vec![0x7F; 32 * 8],
            sequence: self.sequence,
        }))
    }

    fn size(&self) -> (u32, u32) {
        (8, 8)
    }

    fn close(&mut self) {}
}

struct TestEncoder {
    bitrates: Arc<Mutex<Vec<u32>>>,
}

impl VideoEncoder for TestEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<EncodedFrame, EngineError> {
        Ok(EncodedFrame {
            data: Bytes::from(vec![frame.sequence as u8; 32]),
            pts: frame.sequence,
            is_keyframe: frame.sequence == 1,
        })
    }

    fn set_bitrate(&mut self, kbps: u32) {
        self.bitrates.lock().unwrap().push(kbps);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Move(u16, u16),
    Button(MouseButton, bool),
    Wheel(i16),
    Scancode(u16, bool, bool),
    Unicode(char),
    Reset,
}

#[derive(Clone)]
struct SharedInjector {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl InputInjector for SharedInjector {
    fn move_mouse(&mut self, nx: u16, ny: u16) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(Call::Move(nx, ny));
        Ok(())
    }

    fn mouse_button(&mut self, button: MouseButton, down: bool) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(Call::Button(button, down));
        Ok(())
    }

    fn mouse_wheel(&mut self, delta: i16) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(Call::Wheel(delta));
        Ok(())
    }

    fn key_scancode(&mut self, vk: u16, up: bool, extended: bool) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(Call::Scancode(vk, up, extended));
        Ok(())
    }

    fn key_unicode(&mut self, ch: char) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(Call::Unicode(ch));
        Ok(())
    }

    fn reset(&mut self) {
        self.calls.lock().unwrap().push(Call::Reset);
    }
}

struct TestFactory {
    calls: Arc<Mutex<Vec<Call>>>,
    bitrates: Arc<Mutex<Vec<u32>>>,
}

impl PipelineFactory for TestFactory {
    type Source = TestSource;
    type Encoder = TestEncoder;
    type Injector = SharedInjector;

    fn source(&self) -> Result<TestSource, EngineError> {
        Ok(TestSource { sequence: 0 })
    }

    fn encoder(&self, _w: u32, _h: u32, _video: &VideoConfig) -> Result<TestEncoder, EngineError> {
        Ok(TestEncoder {
            bitrates: Arc::clone(&self.bitrates),
        })
    }

    fn injector(&self) -> Result<SharedInjector, EngineError> {
        Ok(SharedInjector {
            calls: Arc::clone(&self.calls),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────

async fn spawn_host(video: VideoConfig) -> (std::net::SocketAddr, Arc<Mutex<Vec<Call>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let factory = TestFactory {
        calls: Arc::clone(&calls),
        bitrates: Arc::new(Mutex::new(Vec::new())),
    };
    tokio::spawn(host::serve(listener, video, factory));
    (addr, calls)
}

async fn read_framed(client: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    client.read_exact(&mut header).await.unwrap();
    let len = u32::from_le_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    client.read_exact(&mut payload).await.unwrap();
    payload
}

async fn wait_for<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

fn fast_video() -> VideoConfig {
    VideoConfig {
        fps: 50,
        ..VideoConfig::default()
    }
}

// ── Host tests ───────────────────────────────────────────────────

#[tokio::test]
async fn host_streams_length_prefixed_frames() {
    let (addr, _) = spawn_host(fast_video()).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut last_pts = 0u8;
    for _ in 0..5 {
        let payload = read_framed(&mut client).await;
        assert_eq!(payload.len(), 32);
        // Payloads carry the fake encoder's pts byte, strictly rising:
        // FIFO queue, sender never reorders.
        assert!(payload[0] > last_pts);
        last_pts = payload[0];
    }
}

#[tokio::test]
async fn host_replays_input_in_order() {
    let (addr, calls) = spawn_host(fast_video()).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    // Prove the stream is live before injecting.
    let _ = read_framed(&mut client).await;

    let script = [
        InputEvent::mouse_move(32768, 32768),
        InputEvent::mouse_down(BUTTON_LEFT, 32768, 32768),
        InputEvent::mouse_up(BUTTON_LEFT, 32768, 32768),
        InputEvent::text("Hi ☃").unwrap(),
    ];
    for event in &script {
        client.write_all(&event.encode().unwrap()).await.unwrap();
    }

    wait_for(
        || calls.lock().unwrap().iter().any(|c| *c == Call::Unicode('☃')),
        "input replay",
    )
    .await;

    let calls = calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            Call::Move(32768, 32768),
            Call::Move(32768, 32768),
            Call::Button(MouseButton::Left, true),
            Call::Move(32768, 32768),
            Call::Button(MouseButton::Left, false),
            Call::Unicode('H'),
            Call::Unicode('i'),
            Call::Unicode(' '),
            Call::Unicode('☃'),
        ]
    );

    // Exactly one press and one release.
    let downs = calls
        .iter()
        .filter(|c| **c == Call::Button(MouseButton::Left, true))
        .count();
    let ups = calls
        .iter()
        .filter(|c| **c == Call::Button(MouseButton::Left, false))
        .count();
    assert_eq!((downs, ups), (1, 1));
}

#[tokio::test]
async fn host_resets_modifiers_when_viewer_leaves() {
    let (addr, calls) = spawn_host(fast_video()).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let _ = read_framed(&mut client).await;

    drop(client);

    wait_for(
        || calls.lock().unwrap().last() == Some(&Call::Reset),
        "modifier reset",
    )
    .await;
}

#[tokio::test]
async fn second_viewer_is_closed_immediately() {
    let (addr, _) = spawn_host(fast_video()).await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    let _ = read_framed(&mut first).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 4];
    // The host closes the spare connection without sending a byte.
    match tokio::time::timeout(Duration::from_secs(5), second.read(&mut buf)).await {
        Ok(Ok(0)) => {}
        Ok(Ok(n)) => panic!("unexpected {n} bytes on a busy host"),
        Ok(Err(_)) => {} // reset is fine too
        Err(_) => panic!("busy host left the connection dangling"),
    }

    // The first viewer is unaffected.
    let _ = read_framed(&mut first).await;
}

#[tokio::test]
async fn host_accepts_again_after_session_ends() {
    let (addr, _) = spawn_host(fast_video()).await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    let _ = read_framed(&mut first).await;
    drop(first);

    // Reconnect until the old session has fully torn down.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut again = TcpStream::connect(addr).await.unwrap();
        let mut header = [0u8; 4];
        match tokio::time::timeout(Duration::from_millis(500), again.read_exact(&mut header)).await
        {
            Ok(Ok(_)) => break,
            _ if tokio::time::Instant::now() > deadline => {
                panic!("host never accepted a second session");
            }
            _ => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
}

#[tokio::test]
async fn raw_mode_omits_length_prefix() {
    let video = VideoConfig {
        raw_mode: true,
        ..fast_video()
    };
    let (addr, _) = spawn_host(video).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    // The fake encoder fills payloads with the pts byte; a framed
    // stream would lead with a little-endian 32 instead.
    let mut buf = [0u8; 32];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf[0], buf[1]);
    assert_ne!(&buf[..4], &32u32.to_le_bytes());
}

// ── Viewer tests ─────────────────────────────────────────────────

#[tokio::test]
async fn viewer_pulls_frames_and_returns_input() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let fake_host = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        for n in 1u8..=3 {
            let payload = vec![n; 10];
            stream
                .write_all(&(payload.len() as u32).to_le_bytes())
                .await
                .unwrap();
            stream.write_all(&payload).await.unwrap();
        }
        // Then collect one input event off the same socket.
        InputEvent::read_from(&mut stream).await.unwrap()
    });

    let mut session = ViewerSession::connect(
        addr.ip(),
        addr.port(),
        ViewerConfig::default(),
    )
    .await
    .unwrap();

    for n in 1u8..=3 {
        let frame = session.recv_frame().await.unwrap();
        assert_eq!(&frame[..], &vec![n; 10][..]);
    }

    session
        .input()
        .send(InputEvent::mouse_wheel(-120, 7, 9))
        .await
        .unwrap();

    let received = fake_host.await.unwrap();
    assert_eq!(received, InputEvent::mouse_wheel(-120, 7, 9));
}

#[tokio::test]
async fn viewer_fail_stops_on_oversized_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // 11 MiB announcement: over the protocol bound.
        stream
            .write_all(&(11u32 * 1024 * 1024).to_le_bytes())
            .await
            .unwrap();
        // Keep the socket open; the viewer must bail regardless.
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    });

    let mut session =
        ViewerSession::connect(addr.ip(), addr.port(), ViewerConfig::default())
            .await
            .unwrap();
    let got = tokio::time::timeout(Duration::from_secs(5), session.recv_frame()).await;
    assert_eq!(got.unwrap(), None);
}

#[tokio::test]
async fn viewer_fail_stops_against_raw_mode_host() {
    // A raw-mode Host leads with Annex-B start codes; the framed
    // reader decodes 0x01000000 as a 16 MiB length and bails.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(&[0, 0, 0, 1]).await.unwrap();
        stream.write_all(&[0x67; 64]).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    });

    let mut session =
        ViewerSession::connect(addr.ip(), addr.port(), ViewerConfig::default())
            .await
            .unwrap();
    let got = tokio::time::timeout(Duration::from_secs(5), session.recv_frame()).await;
    assert_eq!(got.unwrap(), None);
}

#[tokio::test]
async fn viewer_connect_refused_is_an_error() {
    // Bind-then-drop guarantees a dead port.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = ViewerSession::connect(
        IpAddr::from([127, 0, 0, 1]),
        addr.port(),
        ViewerConfig::default(),
    )
    .await;
    assert!(result.is_err());
}
