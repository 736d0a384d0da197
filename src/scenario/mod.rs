//! The find-providers scenario
//!
//! One call drives one worker through the whole run:
//!
//! 1. **Configuring**: parameters are validated.
//! 2. **Coordinating**: the run deadline starts, the rendezvous channel is
//!    leased, and setup hands back a sequence number, a backend node and the
//!    full peer list.
//! 3. **Bootstrapping**: connect to bootstrap peers and meet at the barriers.
//! 4. **Warming**: optional random walk.
//! 5. **Executing**: providers announce every CID, seekers look each one up.
//! 6. **Tearing down**: signal `end` and wait for everyone. Runs whenever setup
//!    succeeded; a teardown failure is logged and does not change the result.
//!
//! The rendezvous lease is dropped, and the channel released, on every path.

use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::BackendFactory;
use crate::cid::ContentId;
use crate::cohort::assign_role;
use crate::config::RunParams;
use crate::deadline::Deadline;
use crate::error::ScenarioError;
use crate::executor::{execute, ExecutionReport};
use crate::rendezvous::{Rendezvous, RendezvousLease};
use crate::telemetry::TelemetrySink;
use crate::workload::generate_cids;

pub mod setup;

pub use setup::{PeerRecord, SetupOutcome};

/// Per-worker environment supplied by whoever launches the worker
#[derive(Clone)]
pub struct RunEnv {
    pub run_id: String,
    pub instance_label: String,
    /// Total number of workers in the run
    pub test_instance_count: usize,
    pub sink: Arc<dyn TelemetrySink>,
}

pub async fn find_providers(
    params: &RunParams,
    env: &RunEnv,
    rendezvous: Arc<dyn Rendezvous>,
    factory: &dyn BackendFactory,
) -> Result<ExecutionReport, ScenarioError> {
    params.validate().map_err(ScenarioError::Config)?;
    let cids = generate_cids(params.record_count);

    let deadline = Deadline::after(params.timeout());
    let lease = RendezvousLease::acquire(rendezvous);

    let outcome = setup::setup(params, env.test_instance_count, &*lease, factory, &deadline)
        .await
        .map_err(ScenarioError::Coordination)?;
    info!(
        "[{}] run {} joined as seq {} of {}",
        env.instance_label, env.run_id, outcome.seq, env.test_instance_count
    );
    if outcome.seq == 1 {
        warn_on_degenerate_cohort(params, env.test_instance_count);
    }

    let result = run_phases(params, env, &lease, &outcome, &cids, deadline).await;

    if let Err(e) = setup::teardown(&*lease, &deadline, env.test_instance_count).await {
        warn!("[{}] teardown failed: {:#}", env.instance_label, e);
    }

    match &result {
        Ok(report) => info!(
            "[{}] finished as {}: {}/{} operations succeeded",
            env.instance_label, report.role, report.succeeded, report.attempted
        ),
        Err(e) => warn!("[{}] run failed while {}: {}", env.instance_label, e.phase(), e),
    }
    result
}

async fn run_phases(
    params: &RunParams,
    env: &RunEnv,
    rendezvous: &RendezvousLease,
    outcome: &SetupOutcome,
    cids: &[ContentId],
    deadline: Deadline,
) -> Result<ExecutionReport, ScenarioError> {
    setup::bootstrap(params, outcome, env.test_instance_count, &**rendezvous, &deadline)
        .await
        .map_err(ScenarioError::Bootstrap)?;

    if params.random_walk {
        setup::random_walk(outcome.backend.as_ref(), &deadline)
            .await
            .map_err(ScenarioError::RandomWalk)?;
    }

    let role = assign_role(outcome.seq, params.nodes_providing);
    execute(
        outcome.seq,
        role,
        cids,
        Arc::clone(&outcome.backend),
        Arc::clone(&env.sink),
        deadline,
    )
    .await
}

fn warn_on_degenerate_cohort(params: &RunParams, instance_count: usize) {
    if params.nodes_providing >= instance_count as i64 {
        warn!(
            "nodes_providing={} covers all {} instances; nobody will look providers up",
            params.nodes_providing, instance_count
        );
    } else if params.nodes_providing <= 0 {
        warn!(
            "nodes_providing={}; nobody will provide and every lookup finds no holders",
            params.nodes_providing
        );
    }
}
