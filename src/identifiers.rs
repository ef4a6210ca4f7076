//! Client identity: the address a client's datagrams arrive from, carried
//! implicitly on the wire as the UDP source port rather than as an
//! explicit field on any message.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// A client is identified by the address it sends from — nothing is
/// minted, since the transport already hands us the source address on
/// every datagram.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ClientId(SocketAddr);

impl From<SocketAddr> for ClientId {
    fn from(address: SocketAddr) -> Self {
        Self(address)
    }
}

impl From<ClientId> for SocketAddr {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

impl ClientId {
    pub fn address(self) -> SocketAddr {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}
