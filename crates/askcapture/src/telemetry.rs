//! Tracing subscriber setup.

use anyhow::{Context, Result};
use askconf::TelemetryConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber: an `EnvFilter` from `telemetry.log_level`
/// (already overridden by `RUST_LOG` during config loading) and a fmt layer.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid log filter: {}", config.log_level))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(config.ansi)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("tracing subscriber already installed")?;

    tracing::debug!(filter = %config.log_level, "Tracing initialized");
    Ok(())
}
