//! Datagram transport abstraction beneath the mesh engine.
//!
//! The engine needs exactly three operations: best-effort unicast send,
//! blocking receive with a timeout, and close. Reliability, retry, and
//! ordering above a single hop belong to the relay and retry loops, never
//! to the transport. Implementations may be connection-oriented or
//! connectionless; the engine treats them identically.
//!
//! The node and the transport are decoupled by a channel split: the socket
//! read task owns the sender half of an inbox queue, [`Transport::recv`]
//! drains the receiver half. Neither side holds a reference to the other.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::proto::{self, Envelope};

/// Default blocking window for one `recv` call in the receive worker.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum datagram the transport will accept. Bundles carry full JSON
/// envelopes plus hop paths, so this is generous rather than tight.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Unicast datagram transport.
pub trait Transport: Send + Sync + 'static {
    /// Best-effort send to `dst`; returns false on transport error.
    /// A false return is a warning-level event, not a failure: the
    /// originator's retry loop handles recovery.
    fn send(&self, envelope: &Envelope, dst: SocketAddr) -> impl Future<Output = bool> + Send;

    /// Next inbound message, waiting up to `timeout`. `None` on timeout
    /// or when the transport has closed.
    fn recv(&self, timeout: Duration) -> impl Future<Output = Option<Envelope>> + Send;

    /// Release sockets and stop background reads.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// UDP transport: one JSON envelope per datagram.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    inbox: Mutex<mpsc::Receiver<Envelope>>,
    cancel: CancellationToken,
    reader: TaskTracker,
}

impl UdpTransport {
    /// Bind the node's unicast socket and start the background read task.
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let (tx, rx) = mpsc::channel(1024);
        let cancel = CancellationToken::new();
        let reader = TaskTracker::new();

        let read_socket = Arc::clone(&socket);
        let read_cancel = cancel.clone();
        reader.spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let received = tokio::select! {
                    _ = read_cancel.cancelled() => break,
                    received = read_socket.recv_from(&mut buf) => received,
                };
                let (len, from) = match received {
                    Ok(pair) => pair,
                    Err(error) => {
                        tracing::warn!(%error, "udp receive failed");
                        continue;
                    }
                };
                match proto::decode(&buf[..len]) {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    // Malformed datagrams are dropped without notifying
                    // the sender.
                    Err(error) => {
                        tracing::debug!(%from, %error, "dropping undecodable datagram");
                    }
                }
            }
        });
        reader.close();

        Ok(UdpTransport {
            socket,
            inbox: Mutex::new(rx),
            cancel,
            reader,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    async fn send(&self, envelope: &Envelope, dst: SocketAddr) -> bool {
        let wire = match proto::encode(envelope) {
            Ok(wire) => wire,
            Err(error) => {
                tracing::warn!(%error, "failed to encode outbound message");
                return false;
            }
        };
        match self.socket.send_to(wire.as_bytes(), dst).await {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(%dst, %error, "transport send failed");
                false
            }
        }
    }

    async fn recv(&self, timeout: Duration) -> Option<Envelope> {
        let mut inbox = self.inbox.lock().await;
        tokio::time::timeout(timeout, inbox.recv()).await.ok()?
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.reader.wait().await;
    }
}
