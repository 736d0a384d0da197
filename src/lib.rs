// src/lib.rs

pub mod backend; // Content-routing backend trait + in-memory network
pub mod cid; // Content identifiers (CIDv0)
pub mod cohort; // Provider/seeker assignment
pub mod config; // Run parameters
pub mod constants;
pub mod deadline;
pub mod error;
pub mod executor; // Concurrent provide / find-providers fan-out
pub mod metrics;
pub mod rendezvous; // Coordination service: trait, in-process hub, TCP client/server
pub mod results_dir; // Results directory management
pub mod scenario; // The find-providers run, phase by phase
pub mod swarm; // Many workers in one process
pub mod telemetry; // Metric/message sinks
pub mod tsv_export; // TSV export for machine-readable results
pub mod workload;

pub use config::RunParams;
pub use error::{OperationError, Phase, ScenarioError};
pub use executor::ExecutionReport;
pub use scenario::{find_providers, RunEnv};
