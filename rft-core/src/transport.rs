//! A small datagram abstraction the sender/receiver state machines are
//! written against, so they can be driven either by a real `UdpSocket` (the
//! client/server binaries) or by an in-memory duplex pair (tests).

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, buf: &[u8]) -> std::io::Result<()>;

    /// Blocks up to `timeout` for the next datagram. `Ok(None)` on timeout.
    async fn recv_timeout(&self, timeout: Duration) -> std::io::Result<Option<Vec<u8>>>;
}

/// A real `UdpSocket` for the client/server binaries' ephemeral data ports.
///
/// The control handshake only ever conveys the server's data port to the
/// client (a `dataPort` field); the client's own ephemeral data port is never
/// sent back, so whichever side doesn't already know the peer's address has
/// to learn it from the first datagram that actually arrives. `unbound`
/// leaves the peer to be learned this way; `with_peer` is for the side that
/// already knows it (the client, in both directions).
pub struct UdpTransport {
    socket: UdpSocket,
    peer: RwLock<Option<SocketAddr>>,
}

impl UdpTransport {
    pub fn with_peer(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer: RwLock::new(Some(peer)),
        }
    }

    pub fn unbound(socket: UdpSocket) -> Self {
        Self {
            socket,
            peer: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, buf: &[u8]) -> std::io::Result<()> {
        let peer = *self.peer.read().await;
        let peer = peer.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "peer address not yet learned")
        })?;
        self.socket.send_to(buf, peer).await?;
        Ok(())
    }

    /// The first datagram received on an `unbound` transport pins `peer` to
    /// its source address; datagrams from any other address are dropped.
    async fn recv_timeout(&self, timeout: Duration) -> std::io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; 65_535];
        match tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => {
                let mut guard = self.peer.write().await;
                match *guard {
                    None => *guard = Some(from),
                    Some(known) if known != from => return Ok(None),
                    Some(_) => {}
                }
                drop(guard);
                buf.truncate(n);
                Ok(Some(buf))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }
}
