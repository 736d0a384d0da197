// src/executor.rs
//
// Fans one task out per content identifier, either providing it or looking up
// its providers, and records a metric for every operation that succeeds.
//
// All tasks are drained even after a failure. The first error in completion
// order becomes the worker's result; metrics already recorded by siblings stay.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::backend::RoutingBackend;
use crate::cid::ContentId;
use crate::cohort::{Role, SequenceNumber};
use crate::deadline::Deadline;
use crate::error::{OperationError, ScenarioError};
use crate::metrics::MetricDefinition;
use crate::telemetry::TelemetrySink;

/// Outcome of a worker's execution phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub seq: SequenceNumber,
    pub role: Role,
    pub attempted: usize,
    pub succeeded: usize,
}

/// Run every operation for `role` concurrently and wait for all of them
pub async fn execute(
    seq: SequenceNumber,
    role: Role,
    cids: &[ContentId],
    backend: Arc<dyn RoutingBackend>,
    sink: Arc<dyn TelemetrySink>,
    deadline: Deadline,
) -> Result<ExecutionReport, ScenarioError> {
    info!("Worker {} executing as {} over {} CIDs", seq, role, cids.len());

    let mut tasks: JoinSet<Result<(), OperationError>> = JoinSet::new();
    for (index, cid) in cids.iter().copied().enumerate() {
        let backend = Arc::clone(&backend);
        let sink = Arc::clone(&sink);
        match role {
            Role::Provider => tasks.spawn(provide_one(index, cid, backend, sink, deadline)),
            Role::Seeker => tasks.spawn(find_one(index, cid, backend, sink, deadline)),
        };
    }

    let mut succeeded = 0;
    let mut first_error: Option<OperationError> = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.unwrap_or_else(|e| Err(OperationError::Join(e.to_string())));
        match outcome {
            Ok(()) => succeeded += 1,
            Err(e) => {
                debug!("Worker {} {} operation failed: {}", seq, role, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(match role {
            Role::Provider => ScenarioError::Provide(e),
            Role::Seeker => ScenarioError::FindProviders(e),
        });
    }

    info!("Worker {} completed {}/{} operations", seq, succeeded, cids.len());
    Ok(ExecutionReport {
        seq,
        role,
        attempted: cids.len(),
        succeeded,
    })
}

async fn provide_one(
    index: usize,
    cid: ContentId,
    backend: Arc<dyn RoutingBackend>,
    sink: Arc<dyn TelemetrySink>,
    deadline: Deadline,
) -> Result<(), OperationError> {
    let started = Instant::now();
    deadline
        .run(backend.provide(&deadline, &cid, true))
        .await?
        .map_err(OperationError::from_backend)?;
    let elapsed = started.elapsed();

    sink.record_message(&format!("Provided CID: {}", cid));
    sink.record_metric(
        &MetricDefinition::time_to_provide(index),
        elapsed.as_nanos() as f64,
    );
    Ok(())
}

async fn find_one(
    index: usize,
    cid: ContentId,
    backend: Arc<dyn RoutingBackend>,
    sink: Arc<dyn TelemetrySink>,
    deadline: Deadline,
) -> Result<(), OperationError> {
    let started = Instant::now();
    let providers = deadline
        .run(backend.find_providers(&deadline, &cid))
        .await?
        .map_err(OperationError::from_backend)?;
    let elapsed = started.elapsed();

    sink.record_metric(
        &MetricDefinition::time_to_find(index),
        elapsed.as_nanos() as f64,
    );
    sink.record_metric(&MetricDefinition::peers_found(index), providers.len() as f64);
    Ok(())
}
