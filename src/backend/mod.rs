//! Content-routing backend contract
//!
//! The scenario drives a backend only through `RoutingBackend`. Besides the
//! two measured operations (provide, find providers) the trait carries the
//! network-maintenance hooks used while bootstrapping and warming up; those
//! have no-op defaults so simple backends only implement what they measure.
//!
//! All methods must tolerate concurrent calls and should give up promptly once
//! the deadline passes.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::cid::ContentId;
use crate::config::RunParams;
use crate::deadline::Deadline;

pub mod memory;
pub mod remote;

pub use memory::{LatencyModel, MemoryNetwork, MemoryNode};
pub use remote::{NodeHost, RemoteNetwork, RemoteNode};

/// Opaque identity of a backend node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identity (base58 of 16 random bytes)
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(bs58::encode(bytes).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a node publishes so others can reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    #[serde(default)]
    pub addrs: Vec<String>,
}

#[async_trait]
pub trait RoutingBackend: Send + Sync {
    fn peer_info(&self) -> PeerInfo;

    /// Announce that this node holds `cid`; `verify` asks the backend to confirm the record landed
    async fn provide(&self, deadline: &Deadline, cid: &ContentId, verify: bool) -> Result<()>;

    /// Nodes known to hold `cid`
    async fn find_providers(&self, deadline: &Deadline, cid: &ContentId) -> Result<Vec<PeerId>>;

    async fn connect(&self, _deadline: &Deadline, _peer: &PeerInfo) -> Result<()> {
        Ok(())
    }

    /// Look a peer up through the routing table, adding it on success
    async fn lookup_peer(&self, _deadline: &Deadline, _peer: &PeerId) -> Result<()> {
        Ok(())
    }

    async fn refresh_routing_table(&self, _deadline: &Deadline) -> Result<()> {
        Ok(())
    }

    async fn random_walk(&self, _deadline: &Deadline) -> Result<()> {
        Ok(())
    }

    fn routing_table_size(&self) -> usize {
        0
    }
}

/// Creates this worker's backend node during setup
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn create(&self, params: &RunParams) -> Result<Arc<dyn RoutingBackend>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_peer_ids_differ() {
        let a = PeerId::random();
        let b = PeerId::random();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn test_peer_info_json() {
        let info = PeerInfo {
            peer_id: PeerId::new("peer-a"),
            addrs: vec!["mem://peer-a".to_string()],
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["peer_id"], "peer-a");
        let back: PeerInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }
}
