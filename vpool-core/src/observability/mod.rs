//! Observability infrastructure: tracing and metrics.
//!
//! Call [`init`] once at startup. Metrics go through the `metrics` facade;
//! installing an exporter is left to the embedding process.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Initialize the global tracing subscriber and describe core metrics.
///
/// `RUST_LOG` wins over `default_level` when set. Fails if a global
/// subscriber is already installed.
pub fn init(default_level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::try_from_default_env()?,
        Err(_) => EnvFilter::try_new(default_level)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()?;

    metrics::register_core_metrics();
    tracing::info!(level = default_level, "Observability initialized");
    Ok(())
}
