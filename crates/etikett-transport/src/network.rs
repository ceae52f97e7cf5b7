// SPDX-License-Identifier: Apache-2.0
//
// Raw TCP printer session (JetDirect, default port 9100).
//
// The simplest hardware path: open a socket and stream command bytes.
// Status is whatever the printer volunteers on the return channel —
// polls drain any pending bytes without blocking and decode the most
// recent status byte.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use etikett_core::error::{EtikettError, Result};
use etikett_core::types::DeviceStatus;

use crate::parse_status_byte;

/// Default JetDirect port.
pub const RAW_PORT: u16 = 9100;

/// Timeout for establishing the connection.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Socket write chunk size.
const SOCKET_CHUNK: usize = 8 * 1024;

/// An open socket session to one network printer.
#[derive(Debug)]
pub struct NetworkSession {
    stream: TcpStream,
    peer: String,
}

impl NetworkSession {
    /// Connect to `host:port` with a bounded timeout.
    pub async fn open(host: &str, port: u16) -> Result<Self> {
        let peer = format!("{host}:{port}");
        info!(peer = %peer, "opening network printer session");

        let stream = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            TcpStream::connect(&peer),
        )
        .await
        .map_err(|_| {
            EtikettError::Transport(format!(
                "connect to {peer} timed out after {CONNECT_TIMEOUT_SECS}s"
            ))
        })?
        .map_err(|e| EtikettError::Transport(format!("connect to {peer}: {e}")))?;

        Ok(Self { stream, peer })
    }

    /// Write the full buffer in socket-sized chunks.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut sent = 0;
        for chunk in bytes.chunks(SOCKET_CHUNK) {
            self.stream.write_all(chunk).await.map_err(|e| {
                EtikettError::Transport(format!("write to {} at byte {sent}: {e}", self.peer))
            })?;
            sent += chunk.len();
        }
        debug!(peer = %self.peer, sent, "socket write complete");
        Ok(sent)
    }

    /// Drain pending status bytes without blocking.
    ///
    /// A closed peer reads as `Offline`; no pending bytes reads as
    /// `Ready`; otherwise the most recent status byte wins.
    pub async fn poll(&mut self) -> Result<DeviceStatus> {
        let mut latest: Option<u8> = None;
        let mut buf = [0u8; 64];

        loop {
            match self.stream.try_read(&mut buf) {
                Ok(0) => return Ok(DeviceStatus::Offline),
                Ok(n) => {
                    latest = Some(buf[n - 1]);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    return Err(EtikettError::Transport(format!(
                        "status read from {}: {e}",
                        self.peer
                    )));
                }
            }
        }

        Ok(latest.map(parse_status_byte).unwrap_or(DeviceStatus::Ready))
    }

    /// Flush and shut the socket down cleanly.
    pub async fn close(&mut self) -> Result<()> {
        self.stream
            .flush()
            .await
            .map_err(|e| EtikettError::Transport(format!("flush {}: {e}", self.peer)))?;
        self.stream
            .shutdown()
            .await
            .map_err(|e| EtikettError::Transport(format!("shutdown {}: {e}", self.peer)))?;
        debug!(peer = %self.peer, "network session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Bind a loopback listener standing in for a printer.
    async fn fake_printer() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        (listener, addr.ip().to_string())
    }

    #[tokio::test]
    async fn write_delivers_every_byte() {
        let (listener, host) = fake_printer().await;
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            sock.read_to_end(&mut received).await.expect("read");
            received
        });

        let payload = vec![0x5A; 20_000]; // spans multiple chunks
        let mut session = NetworkSession::open(&host, port).await.expect("open");
        let sent = session.write(&payload).await.expect("write");
        assert_eq!(sent, payload.len());
        session.close().await.expect("close");

        let received = server.await.expect("server task");
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn poll_is_ready_when_printer_is_silent() {
        let (listener, host) = fake_printer().await;
        let port = listener.local_addr().expect("addr").port();

        let _server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.expect("accept");
            // Hold the connection open without sending anything.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(sock);
        });

        let mut session = NetworkSession::open(&host, port).await.expect("open");
        assert_eq!(session.poll().await.expect("poll"), DeviceStatus::Ready);
    }

    #[tokio::test]
    async fn poll_decodes_reported_status() {
        let (listener, host) = fake_printer().await;
        let port = listener.local_addr().expect("addr").port();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let _server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.expect("accept");
            sock.write_all(&[crate::STATUS_OUT_OF_MEDIA])
                .await
                .expect("send status");
            sock.flush().await.expect("flush");
            let _ = tx.send(());
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(sock);
        });

        let mut session = NetworkSession::open(&host, port).await.expect("open");
        rx.await.expect("status sent");
        // Give the byte a moment to land in the socket buffer.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            session.poll().await.expect("poll"),
            DeviceStatus::OutOfMedia
        );
    }

    #[tokio::test]
    async fn poll_reports_offline_after_peer_closes() {
        let (listener, host) = fake_printer().await;
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.expect("accept");
            drop(sock);
        });

        let mut session = NetworkSession::open(&host, port).await.expect("open");
        server.await.expect("server closed");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.poll().await.expect("poll"), DeviceStatus::Offline);
    }

    #[tokio::test]
    async fn connect_to_unreachable_host_is_a_transport_error() {
        // Port 1 on loopback is almost certainly closed.
        let result = NetworkSession::open("127.0.0.1", 1).await;
        assert!(matches!(result, Err(EtikettError::Transport(_))));
    }
}
