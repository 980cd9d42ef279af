//! Production plumbing for a consensus node.
//!
//! - [`config`]: the TOML node configuration with one section per component.
//! - [`telemetry`]: global `tracing` subscriber and Prometheus text export.
//! - [`antiflood`]: the token-bucket gate in front of the consensus worker.

pub mod antiflood;
pub mod config;
pub mod telemetry;

pub use antiflood::{AntifloodConfig, TokenBucketAntiflood};
pub use config::{ConfigError, NodeConfig};
pub use telemetry::{encode_metrics, env_filter, init_telemetry, TelemetryConfig, TelemetryError};
