// -----------------------------------------------------------------------------
// routing-bench - measures time-to-provide and time-to-find on a content
// routing layer, with workers coordinated through a rendezvous service
// -----------------------------------------------------------------------------

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use routing_bench::backend::{LatencyModel, RemoteNetwork};
use routing_bench::config::{self, RunParams};
use routing_bench::rendezvous::{Rendezvous, TcpRendezvous};
use routing_bench::results_dir::{ResultsDir, RunMetadata};
use routing_bench::swarm::{run_local_swarm, SwarmOptions};
use routing_bench::telemetry::{JsonlSink, TeeSink, TelemetrySink, TracingSink};
use routing_bench::tsv_export::TsvExporter;
use routing_bench::{find_providers, RunEnv};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

// -----------------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------------
#[derive(Parser)]
#[command(name = "routing-bench", version, about = "Content-routing provide/find benchmark")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Parameter sources shared by every subcommand
#[derive(clap::Args, Debug, Clone)]
struct ParamArgs {
    /// YAML file with run parameters
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Override a parameter (repeatable), e.g. --param nodes_providing=3
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
}

impl ParamArgs {
    fn resolve(&self) -> Result<RunParams> {
        config::resolve(self.config.as_deref(), &self.params)
    }
}

/// Simulated backend latency
#[derive(clap::Args, Debug, Clone)]
struct LatencyArgs {
    /// Base latency of every backend operation (milliseconds)
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// Extra uniform jitter on top of the base latency (milliseconds)
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,
}

impl LatencyArgs {
    fn model(&self) -> LatencyModel {
        LatencyModel::with_jitter(
            Duration::from_millis(self.latency_ms),
            Duration::from_millis(self.jitter_ms),
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a whole swarm inside this process
    ///
    /// Examples:
    ///   routing-bench local --instances 5 --param nodes_providing=2
    ///   routing-bench local --instances 20 -c params.yaml --latency-ms 20 --jitter-ms 30
    Local {
        #[arg(short = 'n', long, default_value_t = 5)]
        instances: usize,

        #[command(flatten)]
        params: ParamArgs,

        #[command(flatten)]
        latency: LatencyArgs,

        /// Coordinate through a running routing-bench-rendezvous instead of in-process
        #[arg(long)]
        rendezvous: Option<String>,

        /// Base directory for the results directory
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Name used in the results directory (defaults to the config file stem)
        #[arg(long)]
        name: Option<String>,

        /// Don't write a results directory
        #[arg(long)]
        no_results: bool,
    },
    /// Run a single worker against a TCP rendezvous server
    ///
    /// The worker's routing node is hosted by the rendezvous server, so every
    /// worker process of a run shares one provider table.
    ///
    /// Examples:
    ///   routing-bench worker --rendezvous 10.0.0.5:7770 --instances 4
    Worker {
        #[arg(long)]
        rendezvous: String,

        /// Total number of workers in the run
        #[arg(short = 'n', long)]
        instances: usize,

        #[command(flatten)]
        params: ParamArgs,

        #[command(flatten)]
        latency: LatencyArgs,

        /// Label used in logs and results
        #[arg(long, default_value = "worker")]
        label: String,

        /// Run identifier shared by every worker
        #[arg(long, default_value = "default")]
        run_id: String,

        /// Append metrics and messages to this JSON-lines file
        #[arg(long)]
        results_file: Option<PathBuf>,
    },
    /// Print the resolved run parameters as YAML
    Params {
        #[command(flatten)]
        params: ParamArgs,
    },
}

// -----------------------------------------------------------------------------
// main
// -----------------------------------------------------------------------------
#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::new(format!("routing_bench={}", level));
    fmt().with_env_filter(filter).with_target(false).init();
    debug!("Logging initialized at level: {}", level);

    match cli.command {
        Commands::Local {
            instances,
            params,
            latency,
            rendezvous,
            results_dir,
            name,
            no_results,
        } => {
            let run_params = params.resolve()?;
            let options = SwarmOptions {
                latency: latency.model(),
                rendezvous_addr: rendezvous,
                show_progress: true,
                ..SwarmOptions::default()
            };
            let results = if no_results {
                None
            } else {
                let metadata = RunMetadata::new(
                    String::new(),
                    options.run_id.clone(),
                    run_params.clone(),
                    instances,
                );
                Some(ResultsDir::create(
                    params.config.as_deref(),
                    name.as_deref(),
                    results_dir.as_deref(),
                    metadata,
                )?)
            };
            local_cmd(&run_params, instances, options, results).await?;
        }
        Commands::Worker {
            rendezvous,
            instances,
            params,
            latency,
            label,
            run_id,
            results_file,
        } => {
            let run_params = params.resolve()?;
            worker_cmd(&run_params, &rendezvous, instances, latency.model(), label, run_id, results_file).await?;
        }
        Commands::Params { params } => {
            let run_params = params.resolve()?;
            print!("{}", serde_yaml::to_string(&run_params).context("Failed to render parameters")?);
        }
    }
    Ok(())
}

async fn local_cmd(
    params: &RunParams,
    instances: usize,
    mut options: SwarmOptions,
    mut results: Option<ResultsDir>,
) -> Result<()> {
    if let Some(dir) = &results {
        options.results_file = Some(dir.jsonl_path());
        dir.write_metadata()?;
    }

    let t0 = Instant::now();
    let report = run_local_swarm(params, instances, options).await?;
    let elapsed = t0.elapsed().as_secs_f64();

    println!(
        "Run {}: {} instances in {:.2}s ({} failed)",
        report.run_id,
        report.instances,
        elapsed,
        report.failures().count()
    );
    for (role, summary) in report.summary_by_role() {
        summary.print_summary(&format!("{} latency (us) / peers found", role));
    }
    for failure in report.failures() {
        if let Err(e) = &failure.result {
            eprintln!("❌ {} failed while {}: {}", failure.label, e.phase(), e);
        }
    }

    if let Some(dir) = results.as_mut() {
        let exporter = TsvExporter::new(dir.path());
        exporter.export_metrics(&report, routing_bench::constants::METRICS_TSV_FILE)?;
        exporter.export_summary(&report, routing_bench::constants::SUMMARY_TSV_FILE)?;
        dir.finalize(elapsed, report.failures().count())?;
    }

    if !report.all_succeeded() {
        bail!("{} of {} instances failed", report.failures().count(), report.instances);
    }
    Ok(())
}

async fn worker_cmd(
    params: &RunParams,
    addr: &str,
    instances: usize,
    latency: LatencyModel,
    label: String,
    run_id: String,
    results_file: Option<PathBuf>,
) -> Result<()> {
    if instances == 0 {
        bail!("--instances must be at least 1");
    }
    let mut tee = TeeSink::new().with(Arc::new(TracingSink::new(label.clone())));
    let jsonl = results_file
        .as_deref()
        .map(JsonlSink::create)
        .transpose()?
        .map(Arc::new);
    if let Some(jsonl) = &jsonl {
        tee = tee.with(Arc::new(jsonl.for_instance(label.clone())));
    }
    let sink: Arc<dyn TelemetrySink> = Arc::new(tee);

    let env = RunEnv {
        run_id,
        instance_label: label,
        test_instance_count: instances,
        sink,
    };
    let rendezvous: Arc<dyn Rendezvous> = Arc::new(TcpRendezvous::new(addr));
    let network = RemoteNetwork::new(addr, latency);

    info!("Worker {} joining run {} via {}", env.instance_label, env.run_id, addr);
    let result = find_providers(params, &env, rendezvous, &network).await;
    if let Some(jsonl) = &jsonl {
        jsonl.flush()?;
    }

    let report = result.with_context(|| format!("Worker {} failed", env.instance_label))?;
    println!(
        "{} (seq {}) {}: {}/{} operations succeeded",
        env.instance_label, report.seq, report.role, report.succeeded, report.attempted
    );
    Ok(())
}
