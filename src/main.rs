//! Policy engine (v1)
//!
//! Runs the policy kernel and keeps it in sync with a discovery server.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌───────────────────────────────────────────────────┐
//!                 │                   POLICY ENGINE                   │
//!                 │                                                   │
//!   Discovery     │  ┌───────────┐    ┌──────────┐    ┌────────────┐  │
//!   server  ◀─────┼─▶│   xds     │───▶│ handler  │───▶│   kernel   │◀─┼── route key
//!   (ADS stream)  │  │  client   │    │ + policy │    │ route table│──┼─▶ chain, body mode
//!                 │  └───────────┘    │ registry │    └────────────┘  │
//!                 │                   └──────────┘                    │
//!                 │  ┌─────────────────────────────────────────────┐  │
//!                 │  │ config · observability · resilience ·       │  │
//!                 │  │ lifecycle                                   │  │
//!                 │  └─────────────────────────────────────────────┘  │
//!                 └───────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use policy_engine::config::{load_config, EngineConfig};
use policy_engine::lifecycle::{wait_for_signal, Engine};
use policy_engine::observability::{logging, metrics};
use policy_engine::policy::PolicyRegistry;

#[derive(Parser)]
#[command(name = "policy-engine")]
#[command(about = "Policy engine kernel driven by configuration discovery", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!("policy-engine v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        server = %config.discovery.server_address,
        node_id = %config.discovery.node_id,
        discovery_enabled = config.discovery.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Policies are compiled into the binary that embeds this engine; the
    // standalone binary ships none and drops every route that references one.
    let registry = Arc::new(PolicyRegistry::empty());

    let engine = Engine::start(config, registry)?;
    wait_for_signal().await;

    engine.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
