// src/backend/memory.rs
//
// In-memory content-routing simulation.
//
// Every node of a `MemoryNetwork` shares one provider table, so a record
// announced by one node is visible to every other. Routing tables only decide
// whether a node can reach the network at all: with an empty table both
// provide and find-providers fail the way a real DHT does when it has no peers.
// Latency is simulated per measured operation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use rand::Rng;
use tracing::{debug, trace};

use super::{BackendFactory, PeerId, PeerInfo, RoutingBackend};
use crate::cid::ContentId;
use crate::config::RunParams;
use crate::deadline::Deadline;

/// Simulated per-operation latency: `base` plus uniform jitter in `[0, jitter]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyModel {
    pub base: Duration,
    pub jitter: Duration,
}

impl LatencyModel {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fixed(base: Duration) -> Self {
        Self {
            base,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }

    pub fn sample(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        let extra = rand::rng().random_range(0..=self.jitter.as_nanos() as u64);
        self.base + Duration::from_nanos(extra)
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    nodes: HashMap<PeerId, PeerInfo>,
    tables: HashMap<PeerId, BTreeSet<PeerId>>,
    /// Holders per identifier, in announcement order
    providers: HashMap<ContentId, Vec<PeerId>>,
}

impl NetworkState {
    fn link(&mut self, a: &PeerId, b: &PeerId) {
        if a == b {
            return;
        }
        self.tables.entry(a.clone()).or_default().insert(b.clone());
        self.tables.entry(b.clone()).or_default().insert(a.clone());
    }

    fn table_len(&self, id: &PeerId) -> usize {
        self.tables.get(id).map(|t| t.len()).unwrap_or(0)
    }

    /// Add every neighbour's neighbours to `id`'s table
    fn refresh(&mut self, id: &PeerId) -> usize {
        let neighbours: Vec<PeerId> = match self.tables.get(id) {
            Some(t) => t.iter().cloned().collect(),
            None => return 0,
        };
        let mut learned = Vec::new();
        for n in &neighbours {
            if let Some(t) = self.tables.get(n) {
                learned.extend(t.iter().filter(|p| *p != id).cloned());
            }
        }
        let mut added = 0;
        for peer in learned {
            if self.tables.entry(id.clone()).or_default().insert(peer.clone()) {
                self.tables.entry(peer).or_default().insert(id.clone());
                added += 1;
            }
        }
        added
    }
}

/// Shared in-memory network; cheap to clone
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
    latency: LatencyModel,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new(LatencyModel::none())
    }
}

impl MemoryNetwork {
    pub fn new(latency: LatencyModel) -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState::default())),
            latency,
        }
    }

    /// Register a new node on this network
    pub fn join(&self, params: &RunParams) -> MemoryNode {
        let peer_id = PeerId::random();
        let info = PeerInfo {
            addrs: vec![format!("mem://{}", peer_id)],
            peer_id,
        };
        {
            let mut state = self.state.lock();
            state.nodes.insert(info.peer_id.clone(), info.clone());
            state.tables.entry(info.peer_id.clone()).or_default();
        }
        debug!("Memory node {} joined the network", info.peer_id);
        MemoryNode {
            network: self.clone(),
            info,
            bucket_size: params.bucket_size,
            auto_refresh: params.auto_refresh,
        }
    }

    /// Holders currently recorded for `cid`
    pub fn providers_of(&self, cid: &ContentId) -> Vec<PeerId> {
        self.state
            .lock()
            .providers
            .get(cid)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl BackendFactory for MemoryNetwork {
    async fn create(&self, params: &RunParams) -> Result<Arc<dyn RoutingBackend>> {
        Ok(Arc::new(self.join(params)))
    }
}

/// One node of a `MemoryNetwork`
#[derive(Debug, Clone)]
pub struct MemoryNode {
    network: MemoryNetwork,
    info: PeerInfo,
    bucket_size: usize,
    auto_refresh: bool,
}

impl MemoryNode {
    pub fn peer_id(&self) -> &PeerId {
        &self.info.peer_id
    }

    async fn simulate_latency(&self, deadline: &Deadline) -> Result<()> {
        let delay = self.network.latency.sample();
        if !delay.is_zero() {
            deadline.run(tokio::time::sleep(delay)).await?;
        }
        Ok(())
    }

    fn ensure_reachable(&self, state: &NetworkState) -> Result<()> {
        if state.table_len(&self.info.peer_id) == 0 {
            bail!("failed to find any peer in table");
        }
        Ok(())
    }
}

#[async_trait]
impl RoutingBackend for MemoryNode {
    fn peer_info(&self) -> PeerInfo {
        self.info.clone()
    }

    async fn provide(&self, deadline: &Deadline, cid: &ContentId, verify: bool) -> Result<()> {
        self.simulate_latency(deadline).await?;
        {
            let mut state = self.network.state.lock();
            self.ensure_reachable(&state)?;
            let holders = state.providers.entry(*cid).or_default();
            if !holders.contains(&self.info.peer_id) {
                holders.push(self.info.peer_id.clone());
            }
        }
        if verify {
            let state = self.network.state.lock();
            let found = state
                .providers
                .get(cid)
                .map(|h| h.contains(&self.info.peer_id))
                .unwrap_or(false);
            if !found {
                bail!("provider record for {} not found after provide", cid);
            }
        }
        trace!("{} provided {}", self.info.peer_id, cid);
        Ok(())
    }

    async fn find_providers(&self, deadline: &Deadline, cid: &ContentId) -> Result<Vec<PeerId>> {
        self.simulate_latency(deadline).await?;
        let state = self.network.state.lock();
        self.ensure_reachable(&state)?;
        let holders = state
            .providers
            .get(cid)
            .map(|h| h.iter().take(self.bucket_size).cloned().collect())
            .unwrap_or_default();
        Ok(holders)
    }

    async fn connect(&self, _deadline: &Deadline, peer: &PeerInfo) -> Result<()> {
        let mut state = self.network.state.lock();
        if !state.nodes.contains_key(&peer.peer_id) {
            bail!("dial {}: no such peer on the network", peer.peer_id);
        }
        state.link(&self.info.peer_id, &peer.peer_id);
        if self.auto_refresh {
            state.refresh(&self.info.peer_id);
        }
        Ok(())
    }

    async fn lookup_peer(&self, _deadline: &Deadline, peer: &PeerId) -> Result<()> {
        let mut state = self.network.state.lock();
        self.ensure_reachable(&state)?;
        if !state.nodes.contains_key(peer) {
            bail!("routing: peer {} not found", peer);
        }
        state.link(&self.info.peer_id, peer);
        Ok(())
    }

    async fn refresh_routing_table(&self, _deadline: &Deadline) -> Result<()> {
        let mut state = self.network.state.lock();
        self.ensure_reachable(&state)?;
        let added = state.refresh(&self.info.peer_id);
        debug!("{} refreshed routing table (+{} peers)", self.info.peer_id, added);
        Ok(())
    }

    async fn random_walk(&self, _deadline: &Deadline) -> Result<()> {
        let mut state = self.network.state.lock();
        self.ensure_reachable(&state)?;
        // Walk to a random known peer and learn its neighbourhood
        let target = state
            .tables
            .get(&self.info.peer_id)
            .and_then(|t| t.iter().choose(&mut rand::rng()).cloned());
        if let Some(target) = target {
            let learned: Vec<PeerId> = state
                .tables
                .get(&target)
                .map(|t| t.iter().cloned().collect())
                .unwrap_or_default();
            for peer in learned {
                state.link(&self.info.peer_id, &peer);
            }
        }
        Ok(())
    }

    fn routing_table_size(&self) -> usize {
        self.network.state.lock().table_len(&self.info.peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RunParams {
        RunParams {
            bucket_size: 2,
            ..RunParams::default()
        }
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_unconnected_node_cannot_provide() {
        let net = MemoryNetwork::default();
        let node = net.join(&params());
        let cid = ContentId::from_data(b"CID 0");
        let err = node.provide(&deadline(), &cid, true).await.unwrap_err();
        assert!(err.to_string().contains("failed to find any peer"));
        assert!(node.find_providers(&deadline(), &cid).await.is_err());
    }

    #[tokio::test]
    async fn test_provide_then_find() {
        let net = MemoryNetwork::default();
        let a = net.join(&params());
        let b = net.join(&params());
        a.connect(&deadline(), &b.peer_info()).await.unwrap();
        assert_eq!(a.routing_table_size(), 1);
        assert_eq!(b.routing_table_size(), 1);

        let cid = ContentId::from_data(b"CID 1");
        a.provide(&deadline(), &cid, true).await.unwrap();
        // Providing twice keeps a single record
        a.provide(&deadline(), &cid, false).await.unwrap();

        let found = b.find_providers(&deadline(), &cid).await.unwrap();
        assert_eq!(found, vec![a.peer_id().clone()]);
        assert_eq!(net.providers_of(&cid).len(), 1);
    }

    #[tokio::test]
    async fn test_find_caps_at_bucket_size() {
        let net = MemoryNetwork::default();
        let nodes: Vec<_> = (0..4).map(|_| net.join(&params())).collect();
        for n in &nodes[1..] {
            n.connect(&deadline(), &nodes[0].peer_info()).await.unwrap();
        }
        let cid = ContentId::from_data(b"CID 2");
        for n in &nodes[1..] {
            n.provide(&deadline(), &cid, true).await.unwrap();
        }
        let found = nodes[0].find_providers(&deadline(), &cid).await.unwrap();
        assert_eq!(found.len(), 2, "bucket_size=2 caps the holders returned");
    }

    #[tokio::test]
    async fn test_refresh_learns_neighbours_of_neighbours() {
        let p = RunParams {
            auto_refresh: false,
            ..params()
        };
        let net = MemoryNetwork::default();
        let hub = net.join(&p);
        let a = net.join(&p);
        let b = net.join(&p);
        a.connect(&deadline(), &hub.peer_info()).await.unwrap();
        b.connect(&deadline(), &hub.peer_info()).await.unwrap();
        assert_eq!(a.routing_table_size(), 1);

        a.refresh_routing_table(&deadline()).await.unwrap();
        assert_eq!(a.routing_table_size(), 2);
        assert_eq!(b.routing_table_size(), 2);
    }

    #[tokio::test]
    async fn test_connect_unknown_peer_fails() {
        let net = MemoryNetwork::default();
        let a = net.join(&params());
        let ghost = PeerInfo {
            peer_id: PeerId::new("ghost"),
            addrs: vec![],
        };
        assert!(a.connect(&deadline(), &ghost).await.is_err());
    }

    #[tokio::test]
    async fn test_latency_respects_deadline() {
        let net = MemoryNetwork::new(LatencyModel::fixed(Duration::from_secs(10)));
        let a = net.join(&params());
        let b = net.join(&params());
        a.connect(&deadline(), &b.peer_info()).await.unwrap();
        let short = Deadline::after(Duration::from_millis(50));
        let err = a
            .provide(&short, &ContentId::from_data(b"CID 0"), true)
            .await
            .unwrap_err();
        assert!(err.is::<crate::deadline::DeadlineExceeded>());
    }

    #[test]
    fn test_latency_sample_bounds() {
        let model = LatencyModel::with_jitter(Duration::from_millis(10), Duration::from_millis(5));
        for _ in 0..100 {
            let d = model.sample();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(15));
        }
        assert_eq!(LatencyModel::none().sample(), Duration::ZERO);
    }
}
