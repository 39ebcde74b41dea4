//! runhttp: serve an HTTP router under a managed lifecycle.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                        RUNTIME                           │
//!                 │                                                          │
//!   Client ───────┼─▶ net::listener ─▶ http::server ─▶ middleware ─▶ router │
//!                 │         │                                                │
//!                 │         ▼ state changes                                  │
//!                 │   ConnectionTracker ──┐                                  │
//!                 │                       ├─▶ ReporterGroup ─▶ MetricsSink  │
//!                 │   RuntimeStatsReporter┘                                  │
//!                 │                                                          │
//!   SIGTERM/INT ──┼─▶ MultiSignal ─▶ first exit event ─▶ stop reporters     │
//!                 │                                     ─▶ drain listener    │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use runhttp::config::{config_from_env, load_config, RuntimeConfig};
use runhttp::http::{default_router, RouterConfig};
use runhttp::observability::{CountingAllocator, Logger};
use runhttp::RuntimeBuilder;

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

#[derive(Debug, Parser)]
#[command(name = "runhttp", version, about = "Serve an HTTP router with graceful shutdown and telemetry")]
struct Cli {
    /// Path to a TOML config file; RUNTIME_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Route answering liveness checks
    #[arg(long, default_value = runhttp::http::DEFAULT_HEALTH_CHECK)]
    health_check: String,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_defaults: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.print_defaults {
        print!("{}", toml::to_string_pretty(&RuntimeConfig::default())?);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => config_from_env()?,
    };

    let logger = Logger::from_config(&config.logger)?;
    tracing::dispatcher::set_global_default(logger.dispatch().clone())?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %config.httpserver.address,
        max_connections = config.httpserver.max_connections,
        shutdown_grace_secs = config.httpserver.shutdown_grace_secs,
        "runhttp starting"
    );

    let router = default_router(&RouterConfig {
        health_check: cli.health_check,
    });
    let runtime = RuntimeBuilder::new(config, router).logger(logger).build()?;
    runtime.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
