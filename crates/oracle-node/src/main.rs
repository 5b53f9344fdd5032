#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Process entry point: loads configuration, establishes this peer's
//! identity, joins the gossip topic, connects to the store, and spawns the
//! Publisher and Subscriber loops for the lifetime of the process.
//!
//! Mirrors `cmd/oracle/main.go`: random startup delay, collaborator
//! construction, two long-lived tasks, graceful shutdown on signal.

use anyhow::Context;
use clap::Parser;
use oracle_config::Config;
use oracle_core::{PublisherConfig, SubscriberConfig};
use oracle_crypto::Signer;
use oracle_feed::{HttpPriceTicker, MockPriceTicker, PriceTicker};
use oracle_network::{Libp2pTransport, Transport};
use oracle_storage::PostgresRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "oracle-node",
    version,
    about = "A peer in the ETH/USD gossip-aggregation price oracle fleet."
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "ORACLE_CONFIG_PATH", default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config).context("loading configuration")?;

    oracle_telemetry::init_tracing(&config.log_level).context("initializing telemetry")?;

    // Anti-thundering-herd measure for fleet-wide restarts, not an accident.
    let startup_delay = Duration::from_secs_f64(rand::random::<f64>() * 10.0);
    tracing::info!(delay_secs = startup_delay.as_secs_f64(), "startup delay");
    tokio::time::sleep(startup_delay).await;

    let signer = Arc::new(Signer::generate());
    tracing::info!(node_id = %signer.node_id(), "peer identity established");

    let shutdown = CancellationToken::new();

    let transport: Arc<dyn Transport> = Arc::new(
        Libp2pTransport::join(
            &config.pubsub.topic,
            config.pubsub.port,
            signer.keypair().clone(),
            Duration::from_secs(config.pubsub.discover_peers_interval_secs),
            shutdown.clone(),
        )
        .await
        .context("joining gossip transport")?,
    );

    let repository = Arc::new(
        PostgresRepository::connect(&config.database.url)
            .await
            .context("connecting to store")?,
    );

    let ticker: Arc<dyn PriceTicker> = if config.price_ticker.mock {
        Arc::new(MockPriceTicker)
    } else {
        Arc::new(HttpPriceTicker::new(config.price_ticker.url.clone()))
    };

    let publisher = tokio::spawn(oracle_core::run_publisher(
        signer.clone(),
        ticker,
        transport.clone(),
        PublisherConfig {
            fetch_price_interval: Duration::from_secs(config.pubsub.fetch_price_interval_secs),
        },
        shutdown.clone(),
    ));

    let subscriber = tokio::spawn(oracle_core::run_subscriber(
        signer.clone(),
        transport.clone(),
        repository,
        SubscriberConfig {
            min_signatures_to_write: config.pubsub.min_signatures_to_write,
            min_interval_between_writes: Duration::from_secs(
                config.pubsub.min_interval_between_writes_secs,
            ),
        },
        shutdown.clone(),
    ));

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping loops");
    shutdown.cancel();

    let _ = tokio::join!(publisher, subscriber);
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler, falling back to ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
