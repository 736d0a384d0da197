// src/bin/rendezvous.rs
//
// Standalone TCP rendezvous server for multi-process runs.

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use routing_bench::constants::DEFAULT_RENDEZVOUS_LISTEN;
use routing_bench::rendezvous::RendezvousServer;
use tracing::{debug, info};

#[derive(Parser)]
#[command(
    name = "routing-bench-rendezvous",
    version,
    about = "Rendezvous server coordinating routing-bench workers"
)]
struct Cli {
    /// Listen address
    #[arg(long, default_value = DEFAULT_RENDEZVOUS_LISTEN)]
    listen: String,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Wait for SIGINT or SIGTERM; returns the signal name for logging
async fn wait_for_shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

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
    let filter = EnvFilter::new(format!("routing_bench_rendezvous={},routing_bench={}", level, level));
    fmt().with_env_filter(filter).with_target(false).init();
    debug!("Logging initialized at level: {}", level);

    let server = RendezvousServer::bind(&cli.listen).await?;
    println!("routing-bench-rendezvous listening on {}", server.local_addr()?);

    server
        .serve_with_shutdown(async {
            let sig = wait_for_shutdown_signal().await;
            info!("Received {} - initiating graceful shutdown", sig);
        })
        .await?;

    info!("Rendezvous shutdown complete");
    Ok(())
}
