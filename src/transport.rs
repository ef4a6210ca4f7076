//! Unreliable datagram transport: UDP, loopback addressing, a 1024-byte
//! datagram buffer, and a read deadline on the client's reply wait. This
//! module is the one place in the crate that actually touches a socket.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// The maximum size of any single datagram exchanged between clients and
/// replicas.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// A bound UDP socket plus the fixed-size receive buffer every replica and
/// client uses for exchanging plain-text protocol messages.
pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    /// Binds a UDP socket to `address`. A bind failure at startup is fatal
    /// and aborts the process — the caller converts the `io::Error` into
    /// `crate::error::Error::Bind`.
    pub async fn bind(address: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(address).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends `payload` to `to`. A failed send is a transient transport
    /// error: callers log and continue rather than abort.
    pub async fn send(&self, to: SocketAddr, payload: &str) -> std::io::Result<()> {
        self.socket.send_to(payload.as_bytes(), to).await?;
        Ok(())
    }

    /// Receives one datagram, decoded as UTF-8 text and paired with its
    /// source address, which is the only notion of peer identity this
    /// protocol has. Non-UTF-8 payloads are treated as malformed and
    /// dropped by the caller.
    pub async fn receive(&self) -> std::io::Result<(String, SocketAddr)> {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        let (size, from) = self.socket.recv_from(&mut buffer).await?;
        let payload = String::from_utf8_lossy(&buffer[..size]).into_owned();
        Ok((payload, from))
    }

    /// Receives one datagram, bounded by `deadline`. `Ok(None)` on timeout.
    pub async fn receive_within(
        &self,
        deadline: Duration,
    ) -> std::io::Result<Option<(String, SocketAddr)>> {
        match tokio::time::timeout(deadline, self.receive()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}
