// src/backend/remote.rs
//
// Routing nodes hosted by the rendezvous server.
//
// Workers running as separate processes cannot share a `MemoryNetwork`
// directly. Instead the server keeps one network and a node per joined worker
// (`NodeHost`); each worker drives its node over the rendezvous wire protocol
// through `RemoteNode`. Simulated latency is applied on the worker side, on
// top of the real round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::memory::{LatencyModel, MemoryNetwork, MemoryNode};
use super::{BackendFactory, PeerId, PeerInfo, RoutingBackend};
use crate::cid::ContentId;
use crate::config::RunParams;
use crate::constants::SERVER_MAX_WAIT;
use crate::deadline::Deadline;
use crate::rendezvous::protocol::{BackendCall, Request, Response};
use crate::rendezvous::tcp::exchange;

/// Server-side registry of hosted nodes, all on one network
#[derive(Debug, Default)]
pub struct NodeHost {
    network: MemoryNetwork,
    nodes: Mutex<HashMap<PeerId, MemoryNode>>,
}

impl NodeHost {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn join(&self, bucket_size: usize, auto_refresh: bool) -> PeerInfo {
        let params = RunParams {
            bucket_size,
            auto_refresh,
            ..RunParams::default()
        };
        let node = self.network.join(&params);
        let info = node.peer_info();
        self.nodes.lock().insert(info.peer_id.clone(), node);
        info
    }

    /// Run `call` as `node`; failures come back as `Response::Error`
    pub async fn call(&self, node: &PeerId, call: BackendCall) -> Response {
        let found = self.nodes.lock().get(node).cloned();
        let Some(node) = found else {
            return Response::Error {
                message: format!("unknown node {}", node),
            };
        };
        let deadline = Deadline::after(SERVER_MAX_WAIT);
        let result = match call {
            BackendCall::Provide { cid, verify } => node.provide(&deadline, &cid, verify).await.map(|()| Response::Ok),
            BackendCall::FindProviders { cid } => node
                .find_providers(&deadline, &cid)
                .await
                .map(|peers| Response::Providers { peers }),
            BackendCall::Connect { peer } => node.connect(&deadline, &peer).await.map(|()| routed(&node)),
            BackendCall::LookupPeer { peer } => node.lookup_peer(&deadline, &peer).await.map(|()| routed(&node)),
            BackendCall::RefreshRoutingTable => node.refresh_routing_table(&deadline).await.map(|()| routed(&node)),
            BackendCall::RandomWalk => node.random_walk(&deadline).await.map(|()| routed(&node)),
        };
        result.unwrap_or_else(|e| Response::Error {
            message: format!("{:#}", e),
        })
    }
}

fn routed(node: &MemoryNode) -> Response {
    Response::Routed {
        table_size: node.routing_table_size(),
    }
}

/// Factory joining nodes hosted by the rendezvous server at `addr`
#[derive(Debug, Clone)]
pub struct RemoteNetwork {
    addr: String,
    latency: LatencyModel,
}

impl RemoteNetwork {
    pub fn new(addr: impl Into<String>, latency: LatencyModel) -> Self {
        Self {
            addr: addr.into(),
            latency,
        }
    }
}

#[async_trait]
impl BackendFactory for RemoteNetwork {
    async fn create(&self, params: &RunParams) -> Result<Arc<dyn RoutingBackend>> {
        let request = Request::Join {
            bucket_size: params.bucket_size,
            auto_refresh: params.auto_refresh,
        };
        let deadline = Deadline::after(params.timeout());
        let info = match deadline.run(exchange(&self.addr, &request)).await?? {
            Response::Joined { info } => info,
            Response::Error { message } => bail!("join via {} failed: {}", self.addr, message),
            other => bail!("unexpected response to join: {:?}", other),
        };
        debug!("Joined hosted network at {} as {}", self.addr, info.peer_id);
        Ok(Arc::new(RemoteNode {
            addr: self.addr.clone(),
            latency: self.latency,
            info,
            table_size: AtomicUsize::new(0),
        }))
    }
}

/// Worker-side handle on a hosted node
#[derive(Debug)]
pub struct RemoteNode {
    addr: String,
    latency: LatencyModel,
    info: PeerInfo,
    /// Last table size the server reported
    table_size: AtomicUsize,
}

impl RemoteNode {
    async fn call(&self, deadline: &Deadline, call: BackendCall) -> Result<Response> {
        let request = Request::Backend {
            node: self.info.peer_id.clone(),
            call,
        };
        trace!("{} {} -> {}", self.info.peer_id, request.name(), self.addr);
        match deadline.run(exchange(&self.addr, &request)).await?? {
            Response::Error { message } => Err(anyhow!(message)),
            other => Ok(other),
        }
    }

    async fn maintain(&self, deadline: &Deadline, call: BackendCall) -> Result<()> {
        match self.call(deadline, call).await? {
            Response::Routed { table_size } => {
                self.table_size.store(table_size, Ordering::Relaxed);
                Ok(())
            }
            other => bail!("unexpected routing response: {:?}", other),
        }
    }

    async fn simulate_latency(&self, deadline: &Deadline) -> Result<()> {
        let delay = self.latency.sample();
        if !delay.is_zero() {
            deadline.run(tokio::time::sleep(delay)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RoutingBackend for RemoteNode {
    fn peer_info(&self) -> PeerInfo {
        self.info.clone()
    }

    async fn provide(&self, deadline: &Deadline, cid: &ContentId, verify: bool) -> Result<()> {
        self.simulate_latency(deadline).await?;
        match self.call(deadline, BackendCall::Provide { cid: *cid, verify }).await? {
            Response::Ok => Ok(()),
            other => bail!("unexpected response to provide: {:?}", other),
        }
    }

    async fn find_providers(&self, deadline: &Deadline, cid: &ContentId) -> Result<Vec<PeerId>> {
        self.simulate_latency(deadline).await?;
        match self.call(deadline, BackendCall::FindProviders { cid: *cid }).await? {
            Response::Providers { peers } => Ok(peers),
            other => bail!("unexpected response to find_providers: {:?}", other),
        }
    }

    async fn connect(&self, deadline: &Deadline, peer: &PeerInfo) -> Result<()> {
        self.maintain(deadline, BackendCall::Connect { peer: peer.clone() }).await
    }

    async fn lookup_peer(&self, deadline: &Deadline, peer: &PeerId) -> Result<()> {
        self.maintain(deadline, BackendCall::LookupPeer { peer: peer.clone() }).await
    }

    async fn refresh_routing_table(&self, deadline: &Deadline) -> Result<()> {
        self.maintain(deadline, BackendCall::RefreshRoutingTable).await
    }

    async fn random_walk(&self, deadline: &Deadline) -> Result<()> {
        self.maintain(deadline, BackendCall::RandomWalk).await
    }

    fn routing_table_size(&self) -> usize {
        self.table_size.load(Ordering::Relaxed)
    }
}
