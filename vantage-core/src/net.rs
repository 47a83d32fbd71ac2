//! TCP plumbing toward the mesh-VPN overlay.
//!
//! The overlay collaborator hands the engine an authenticated virtual
//! TCP socket per peer; from here on the engine only needs `listen`,
//! `dial` and the latency tuning every session socket gets. The
//! overlay owns authentication and encryption; streams are trusted.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::config::SOCKET_BUF_SIZE;
use crate::error::EngineError;

/// Listen on all interfaces of the overlay address space.
pub async fn listen_tcp(port: u16) -> Result<TcpListener, EngineError> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    Ok(TcpListener::bind(addr).await?)
}

/// Listen on the loopback interface only (UI bridge).
pub async fn listen_loopback(port: u16) -> Result<TcpListener, EngineError> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    Ok(TcpListener::bind(addr).await?)
}

/// Connect to a peer and apply session tuning.
pub async fn dial_tcp(ip: IpAddr, port: u16) -> Result<TcpStream, EngineError> {
    let stream = TcpStream::connect(SocketAddr::new(ip, port)).await?;
    tune_stream(&stream);
    Ok(stream)
}

/// Low-latency socket options for a session stream: no Nagle delay,
/// keepalive, and 512 KiB buffers so a bursty keyframe does not stall
/// the writer.
pub fn tune_stream(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "set_nodelay failed");
    }

    let sock = SockRef::from(stream);
    if let Err(e) = sock.set_keepalive(true) {
        debug!(error = %e, "set_keepalive failed");
    }
    if let Err(e) = sock.set_send_buffer_size(SOCKET_BUF_SIZE) {
        debug!(error = %e, "set_send_buffer_size failed");
    }
    if let Err(e) = sock.set_recv_buffer_size(SOCKET_BUF_SIZE) {
        debug!(error = %e, "set_recv_buffer_size failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_reaches_listener() {
        let listener = listen_loopback(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dial = dial_tcp(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let (accepted, dialed) = tokio::join!(listener.accept(), dial);

        let (stream, _) = accepted.unwrap();
        tune_stream(&stream);
        assert!(dialed.is_ok());
    }

    #[tokio::test]
    async fn loopback_listener_is_not_public() {
        let listener = listen_loopback(0).await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }
}
