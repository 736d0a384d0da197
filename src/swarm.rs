// src/swarm.rs
//
// Local swarm: runs N workers of the find-providers scenario inside this
// process. By default they share an in-process hub and one in-memory routing
// network. Given a rendezvous address, workers coordinate through that server
// and drive nodes it hosts, exactly as separate worker processes would.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::backend::{BackendFactory, LatencyModel, MemoryNetwork, RemoteNetwork};
use crate::cohort::Role;
use crate::config::RunParams;
use crate::error::ScenarioError;
use crate::executor::ExecutionReport;
use crate::metrics::{LatencySummary, MetricRecord};
use crate::rendezvous::{Rendezvous, RendezvousHub, TcpRendezvous};
use crate::scenario::{self, RunEnv};
use crate::telemetry::{JsonlSink, RecordingSink, TeeSink, TelemetrySink, TracingSink};

#[derive(Debug, Clone)]
pub struct SwarmOptions {
    pub run_id: String,
    /// Simulated latency of every backend operation
    pub latency: LatencyModel,
    /// Append every event to this JSON-lines file
    pub results_file: Option<PathBuf>,
    /// Coordinate through a TCP rendezvous server instead of an in-process hub
    pub rendezvous_addr: Option<String>,
    pub show_progress: bool,
}

impl Default for SwarmOptions {
    fn default() -> Self {
        Self {
            run_id: format!("local-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S")),
            latency: LatencyModel::none(),
            results_file: None,
            rendezvous_addr: None,
            show_progress: false,
        }
    }
}

/// One worker's result plus everything it recorded
#[derive(Debug)]
pub struct WorkerOutcome {
    /// Spawn index (0-based); sequence numbers are assigned by the rendezvous
    pub index: usize,
    pub label: String,
    pub result: Result<ExecutionReport, ScenarioError>,
    pub records: Vec<MetricRecord>,
    pub messages: Vec<String>,
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn role(&self) -> Option<Role> {
        self.result.as_ref().ok().map(|r| r.role)
    }
}

#[derive(Debug)]
pub struct SwarmReport {
    pub run_id: String,
    pub instances: usize,
    pub elapsed: Duration,
    /// Ordered by spawn index
    pub workers: Vec<WorkerOutcome>,
}

impl SwarmReport {
    pub fn all_succeeded(&self) -> bool {
        self.workers.iter().all(WorkerOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &WorkerOutcome> {
        self.workers.iter().filter(|w| !w.is_success())
    }

    pub fn records(&self) -> impl Iterator<Item = &MetricRecord> {
        self.workers.iter().flat_map(|w| w.records.iter())
    }

    pub fn role_count(&self, role: Role) -> usize {
        self.workers.iter().filter(|w| w.role() == Some(role)).count()
    }

    /// Latency summaries keyed by the role that produced them
    pub fn summary_by_role(&self) -> BTreeMap<&'static str, LatencySummary> {
        let mut out: BTreeMap<&'static str, LatencySummary> = BTreeMap::new();
        for worker in &self.workers {
            let Some(role) = worker.role() else { continue };
            let summary = LatencySummary::from_records(&worker.records);
            out.entry(role.as_str()).or_default().merge(&summary);
        }
        out
    }

    pub fn latency_summary(&self) -> LatencySummary {
        LatencySummary::from_records(self.records())
    }
}

pub async fn run_local_swarm(params: &RunParams, instances: usize, options: SwarmOptions) -> Result<SwarmReport> {
    if instances == 0 {
        bail!("A swarm needs at least one instance");
    }
    params.validate().context("Invalid run parameters")?;

    let started = Instant::now();
    let hub = RendezvousHub::new();
    let network: Arc<dyn BackendFactory> = match &options.rendezvous_addr {
        Some(addr) => Arc::new(RemoteNetwork::new(addr.clone(), options.latency)),
        None => Arc::new(MemoryNetwork::new(options.latency)),
    };
    let jsonl = options
        .results_file
        .as_deref()
        .map(JsonlSink::create)
        .transpose()?
        .map(Arc::new);

    info!(
        "Starting local swarm {}: {} instances, {} CIDs, nodes_providing={}",
        options.run_id, instances, params.record_count, params.nodes_providing
    );

    let pb = if options.show_progress {
        let pb = ProgressBar::new(instances as u64);
        pb.set_style(ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} workers {msg}",
        )?);
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut futs = FuturesUnordered::new();
    for index in 0..instances {
        let label = format!("instance-{}", index);
        let recording = Arc::new(RecordingSink::new());
        let mut tee = TeeSink::new()
            .with(recording.clone())
            .with(Arc::new(TracingSink::new(label.clone())));
        if let Some(jsonl) = &jsonl {
            tee = tee.with(Arc::new(jsonl.for_instance(label.clone())));
        }
        let sink: Arc<dyn TelemetrySink> = Arc::new(tee);

        let rendezvous: Arc<dyn Rendezvous> = match &options.rendezvous_addr {
            Some(addr) => Arc::new(TcpRendezvous::new(addr.clone())),
            None => Arc::new(hub.client()),
        };
        let env = RunEnv {
            run_id: options.run_id.clone(),
            instance_label: label.clone(),
            test_instance_count: instances,
            sink,
        };
        let params = params.clone();
        let network = Arc::clone(&network);

        futs.push(tokio::spawn(async move {
            let result = scenario::find_providers(&params, &env, rendezvous, network.as_ref()).await;
            WorkerOutcome {
                index,
                label,
                result,
                records: recording.records(),
                messages: recording.messages(),
            }
        }));
    }

    let mut workers = Vec::with_capacity(instances);
    while let Some(joined) = futs.next().await {
        let outcome = joined.context("Worker task join error")?;
        if let Err(e) = &outcome.result {
            warn!("{} failed: {}", outcome.label, e);
        }
        pb.inc(1);
        workers.push(outcome);
    }
    pb.finish_and_clear();
    workers.sort_by_key(|w| w.index);

    if let Some(jsonl) = &jsonl {
        jsonl.flush()?;
    }

    let report = SwarmReport {
        run_id: options.run_id,
        instances,
        elapsed: started.elapsed(),
        workers,
    };
    info!(
        "Swarm {} finished in {:.2?}: {} providers, {} seekers, {} failed",
        report.run_id,
        report.elapsed,
        report.role_count(Role::Provider),
        report.role_count(Role::Seeker),
        report.failures().count()
    );
    Ok(report)
}
