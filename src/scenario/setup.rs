// src/scenario/setup.rs
//
// Coordination steps that bracket the measured phase: setup (sequence number,
// backend node, peer exchange), bootstrap (connect, barrier, refresh, peer
// lookups, barrier), the optional random walk, and teardown.

use std::sync::Arc;

use anyhow::{Context, Result};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{BackendFactory, PeerId, PeerInfo, RoutingBackend};
use crate::cohort::SequenceNumber;
use crate::config::RunParams;
use crate::constants::{STATE_BOOTSTRAPPED, STATE_END, STATE_REFRESHED, STATE_SETUP, TOPIC_PEERS};
use crate::deadline::Deadline;
use crate::rendezvous::Rendezvous;

/// Published on the peers topic by every worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub seq: SequenceNumber,
    pub info: PeerInfo,
}

/// Everything a worker knows once setup completes
pub struct SetupOutcome {
    pub seq: SequenceNumber,
    pub backend: Arc<dyn RoutingBackend>,
    /// Every worker's record, ordered by sequence number
    pub peers: Vec<PeerRecord>,
}

impl SetupOutcome {
    fn others(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.iter().filter(move |p| p.seq != self.seq)
    }
}

pub async fn setup(
    params: &RunParams,
    instance_count: usize,
    rendezvous: &dyn Rendezvous,
    factory: &dyn BackendFactory,
    deadline: &Deadline,
) -> Result<SetupOutcome> {
    let seq = rendezvous
        .signal_entry(deadline, STATE_SETUP)
        .await
        .context("Failed to obtain sequence number")?;
    debug!("Assigned sequence number {}", seq);

    let backend = factory
        .create(params)
        .await
        .context("Failed to create routing backend")?;

    let record = PeerRecord {
        seq,
        info: backend.peer_info(),
    };
    let payload = serde_json::to_value(&record).context("Failed to encode peer record")?;
    rendezvous
        .publish(deadline, TOPIC_PEERS, payload)
        .await
        .context("Failed to publish peer record")?;

    let payloads = rendezvous
        .observe(deadline, TOPIC_PEERS, instance_count)
        .await
        .with_context(|| format!("Failed waiting for {} peer records", instance_count))?;
    let mut peers = payloads
        .into_iter()
        .map(serde_json::from_value::<PeerRecord>)
        .collect::<Result<Vec<_>, _>>()
        .context("Malformed peer record on peers topic")?;
    peers.sort_by_key(|p| p.seq);

    info!("Worker {} sees {} peers", seq, peers.len());
    Ok(SetupOutcome { seq, backend, peers })
}

/// Peers this worker dials during bootstrap
///
/// Bootstrappers are the workers with `seq <= n_bootstrap`. When `n_bootstrap`
/// is not positive or covers the whole swarm, every peer is a bootstrapper.
/// A worker never dials itself.
pub fn bootstrap_targets(peers: &[PeerRecord], own_seq: SequenceNumber, n_bootstrap: i64) -> Vec<PeerRecord> {
    let everyone = n_bootstrap <= 0 || n_bootstrap >= peers.len() as i64;
    peers
        .iter()
        .filter(|p| p.seq != own_seq)
        .filter(|p| everyone || p.seq <= n_bootstrap)
        .cloned()
        .collect()
}

pub async fn bootstrap(
    params: &RunParams,
    outcome: &SetupOutcome,
    instance_count: usize,
    rendezvous: &dyn Rendezvous,
    deadline: &Deadline,
) -> Result<()> {
    let targets = bootstrap_targets(&outcome.peers, outcome.seq, params.n_bootstrap);
    for target in &targets {
        deadline
            .run(outcome.backend.connect(deadline, &target.info))
            .await?
            .with_context(|| {
                format!(
                    "Failed to connect to bootstrap peer {} (seq {})",
                    target.info.peer_id, target.seq
                )
            })?;
    }
    debug!("Worker {} connected to {} bootstrap peers", outcome.seq, targets.len());
    signal_and_wait(rendezvous, deadline, STATE_BOOTSTRAPPED, instance_count).await?;

    if !params.auto_refresh {
        deadline
            .run(outcome.backend.refresh_routing_table(deadline))
            .await?
            .context("Failed to refresh routing table")?;
    }

    let lookups: Vec<PeerId> = {
        let others: Vec<&PeerRecord> = outcome.others().collect();
        let wanted = params.n_find_peers.max(0) as usize;
        others
            .choose_multiple(&mut rand::rng(), wanted.min(others.len()))
            .map(|p| p.info.peer_id.clone())
            .collect()
    };
    for peer in &lookups {
        deadline
            .run(outcome.backend.lookup_peer(deadline, peer))
            .await?
            .with_context(|| format!("Failed to look up peer {}", peer))?;
    }
    signal_and_wait(rendezvous, deadline, STATE_REFRESHED, instance_count).await?;

    info!(
        "Worker {} bootstrapped; routing table holds {} peers",
        outcome.seq,
        outcome.backend.routing_table_size()
    );
    Ok(())
}

pub async fn random_walk(backend: &dyn RoutingBackend, deadline: &Deadline) -> Result<()> {
    deadline
        .run(backend.random_walk(deadline))
        .await?
        .context("Random walk did not complete")?;
    debug!("Random walk done; routing table holds {} peers", backend.routing_table_size());
    Ok(())
}

pub async fn teardown(rendezvous: &dyn Rendezvous, deadline: &Deadline, instance_count: usize) -> Result<()> {
    signal_and_wait(rendezvous, deadline, STATE_END, instance_count).await
}

async fn signal_and_wait(
    rendezvous: &dyn Rendezvous,
    deadline: &Deadline,
    state: &str,
    instance_count: usize,
) -> Result<()> {
    rendezvous
        .signal_entry(deadline, state)
        .await
        .with_context(|| format!("Failed to signal '{}'", state))?;
    rendezvous
        .barrier(deadline, state, instance_count as i64)
        .await
        .with_context(|| format!("Failed waiting for {} instances at '{}'", instance_count, state))?;
    Ok(())
}
