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

//! Global `tracing` subscriber initialization.
//!
//! Same `EnvFilter` construction and `LogTracer` bridge (for any dependency
//! still emitting through the `log` facade) as a JSON-logging kernel node
//! would use, but with compact, human-readable output instead: this is a
//! single small service an operator reads on a terminal, not a node
//! shipping logs into an aggregation pipeline.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Initializes the global `tracing` subscriber. `log_level` seeds the
/// filter when `RUST_LOG` is not set in the environment.
pub fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let subscriber = Registry::default().with(filter).with(fmt_layer);

    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
