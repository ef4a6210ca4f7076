//! Cluster membership: an ordered list of peer addresses known identically
//! to every node, plus the local replica's own index into it.

use crate::viewstamp::View;
use std::net::SocketAddr;

/// The default cluster size; kept as a named constant so the default CLI
/// wiring (`src/bin/vr.rs`) doesn't repeat the magic number.
pub const DEFAULT_REPLICAS: usize = 3;

/// The first port of the default loopback cluster's contiguous port range.
pub const STARTING_PORT: u16 = 8000;

/// The membership of a Viewstamped Replication cluster: every replica's
/// address, in the fixed order that defines op-number-to-primary mapping.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Configuration {
    peers: Vec<SocketAddr>,
}

impl Configuration {
    pub fn new(peers: Vec<SocketAddr>) -> Self {
        assert!(!peers.is_empty(), "a configuration needs at least one replica");
        Self { peers }
    }

    /// The default 3-replica loopback cluster on ports 8000..8003.
    pub fn default_loopback() -> Self {
        let peers = (0..DEFAULT_REPLICAS as u16)
            .map(|i| SocketAddr::from(([127, 0, 0, 1], STARTING_PORT + i)))
            .collect();
        Self::new(peers)
    }

    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    pub fn replicas(&self) -> usize {
        self.peers.len()
    }

    pub fn address(&self, index: usize) -> SocketAddr {
        self.peers[index]
    }

    /// The index of `address` in this configuration, if it is a member.
    pub fn index_of(&self, address: SocketAddr) -> Option<usize> {
        self.peers.iter().position(|&peer| peer == address)
    }

    /// The index of the primary of `view`: `view mod N` (§2).
    pub fn primary_index(&self, view: View) -> usize {
        view.primary_index(self.replicas())
    }

    pub fn primary_address(&self, view: View) -> SocketAddr {
        self.peers[self.primary_index(view)]
    }

    /// `⌊N/2⌋` — the number of *remote* votes needed; combined with the
    /// primary's implicit vote this is a strict majority (GLOSSARY: Quorum).
    pub fn sub_majority(&self) -> usize {
        self.replicas() / 2
    }
}
