//! Logging and metrics export.
//!
//! Logging goes through a `tracing-subscriber` registry filtered by
//! `RUST_LOG` when set, otherwise by the configured filter. Metrics live on
//! registries owned by the caller; [`encode_metrics`] renders one in the
//! Prometheus text format.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("failed to encode metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Configuration for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directives used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Include the event target in each line.
    pub with_target: bool,
    pub with_thread_ids: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
        }
    }
}

/// Filter from `RUST_LOG`, falling back to the configured directives.
pub fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(&config.log_filter)?),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids);

    let subscriber = Registry::default()
        .with(env_filter(config)?)
        .with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    info!(filter = %config.log_filter, "Telemetry initialized");
    Ok(())
}

/// Render `registry` in the Prometheus text exposition format.
pub fn encode_metrics(registry: &prometheus::Registry) -> Result<String, TelemetryError> {
    let encoder = prometheus::TextEncoder::new();
    Ok(encoder.encode_to_string(&registry.gather())?)
}
