// src/constants.rs
//
// Central location for the defaults and well-known names used by routing-bench.
// Keep magic numbers here so the scenario, swarm and CLI agree on them.

use std::time::Duration;

// =============================================================================
// Run parameter defaults
// =============================================================================

/// Overall run deadline (seconds)
/// User can override via params: timeout_secs
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Whether to warm the routing table with a random walk before executing
/// User can override via params: random_walk
pub const DEFAULT_RANDOM_WALK: bool = false;

/// Number of bootstrap peers every worker connects to
/// Values <= 0 (or >= instance count) mean every peer is a bootstrapper
pub const DEFAULT_N_BOOTSTRAP: i64 = 1;

/// Number of extra peer lookups each worker performs after bootstrapping
pub const DEFAULT_N_FIND_PEERS: i64 = 1;

/// Routing bucket size; also caps the holders returned by one find-providers call
pub const DEFAULT_BUCKET_SIZE: usize = 20;

/// Whether the backend refreshes its routing table on its own
pub const DEFAULT_AUTO_REFRESH: bool = true;

/// Size of the provider cohort (workers with seq <= K provide)
pub const DEFAULT_NODES_PROVIDING: i64 = 1;

/// Number of content identifiers in the shared workload
pub const DEFAULT_RECORD_COUNT: usize = 5;

/// Environment variable carrying `key=value|key=value` run parameters
pub const PARAMS_ENV_VAR: &str = "TEST_INSTANCE_PARAMS";

/// Separator between parameters in a parameter string
pub const PARAM_SEPARATOR: char = '|';

// =============================================================================
// Rendezvous states and topics
// =============================================================================

/// State whose counter hands out worker sequence numbers
pub const STATE_SETUP: &str = "setup";

/// Topic carrying every worker's peer info
pub const TOPIC_PEERS: &str = "peers";

/// Barrier reached once every worker has connected to its bootstrappers
pub const STATE_BOOTSTRAPPED: &str = "bootstrapped";

/// Barrier reached once every worker has refreshed its routing table
pub const STATE_REFRESHED: &str = "refreshed";

/// Barrier reached once every worker has finished its run
pub const STATE_END: &str = "end";

// =============================================================================
// Rendezvous server
// =============================================================================

/// Default listen address for the TCP rendezvous server
pub const DEFAULT_RENDEZVOUS_LISTEN: &str = "0.0.0.0:7770";

/// Upper bound on how long the server parks a single blocking request
/// Clients bound their own waits with the run deadline; this only reaps
/// requests whose client vanished without closing the socket.
pub const SERVER_MAX_WAIT: Duration = Duration::from_secs(3600);

/// Maximum accepted request line (bytes)
pub const MAX_REQUEST_LINE: usize = 1024 * 1024;

// =============================================================================
// Metrics
// =============================================================================

/// Unit used for latency metrics
pub const UNIT_NANOSECONDS: &str = "ns";

/// Unit used for holder-count metrics
pub const UNIT_PEERS: &str = "peers";

/// Histogram upper bound for latency summaries (1 hour in microseconds)
pub const HIST_MAX_LATENCY_US: u64 = 3_600_000_000;

/// Significant digits kept by summary histograms
pub const HIST_SIGFIGS: u8 = 3;

// =============================================================================
// Results
// =============================================================================

/// Results directory prefix: {prefix}-{YYYYMMDD}-{HHMM}-{test_name}
pub const RESULTS_DIR_PREFIX: &str = "routing-bench";

/// Per-event results file (JSON lines)
pub const RESULTS_JSONL_FILE: &str = "results.jsonl";

/// Per-metric TSV export
pub const METRICS_TSV_FILE: &str = "metrics.tsv";

/// Per-kind latency summary TSV export
pub const SUMMARY_TSV_FILE: &str = "summary.tsv";
