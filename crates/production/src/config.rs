//! Node configuration file.
//!
//! ```toml
//! [consensus]
//! chain_id = "1"
//! consensus_group_size = 63
//! round_duration_ms = 6000
//!
//! [broadcast]
//! validator_delay_per_order_ms = 1000
//!
//! [telemetry]
//! log_filter = "info,spos_broadcast=debug"
//!
//! [antiflood]
//! unknown_peer_burst = 20
//! ```
//!
//! Every section and field is optional and falls back to its default.

use crate::antiflood::AntifloodConfig;
use crate::telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use spos_broadcast::{BroadcastConfig, BroadcastError};
use spos_consensus::{ConsensusConfig, ConsensusError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid consensus section: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("invalid broadcast section: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("invalid antiflood section: {0}")]
    Antiflood(String),
}

/// Full configuration of a consensus node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub consensus: ConsensusConfig,
    pub broadcast: BroadcastConfig,
    pub telemetry: TelemetryConfig,
    pub antiflood: AntifloodConfig,
}

impl NodeConfig {
    /// Read, parse and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents)?;
        info!(
            path = %path.display(),
            chain_id = %config.consensus.chain_id,
            group_size = config.consensus.consensus_group_size,
            "Loaded node configuration"
        );
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consensus.validate()?;
        self.broadcast.validate()?;
        self.antiflood.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = NodeConfig::from_toml("").unwrap();
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_partial_sections_override_defaults() {
        let config = NodeConfig::from_toml(
            r#"
            [consensus]
            chain_id = "testnet"
            round_duration_ms = 4000

            [broadcast]
            validator_delay_per_order_ms = 250
            leader_cache_size = 3

            [telemetry]
            log_filter = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.consensus.chain_id, "testnet");
        assert_eq!(config.consensus.round_duration(), Duration::from_secs(4));
        assert_eq!(
            config.consensus.public_key_size,
            ConsensusConfig::default().public_key_size
        );
        assert_eq!(
            config.broadcast.validator_delay_per_order(),
            Duration::from_millis(250)
        );
        assert_eq!(config.broadcast.leader_cache_size, 3);
        assert_eq!(config.broadcast.validator_cache_size, 10);
        assert_eq!(config.telemetry.log_filter, "debug");
        assert_eq!(config.antiflood, AntifloodConfig::default());
    }

    #[test]
    fn test_invalid_broadcast_section_rejected() {
        let result = NodeConfig::from_toml("[broadcast]\nvalidator_cache_size = 0\n");
        assert!(matches!(result, Err(ConfigError::Broadcast(_))));
    }

    #[test]
    fn test_invalid_antiflood_section_rejected() {
        let result = NodeConfig::from_toml("[antiflood]\nvalidator_burst = 0\n");
        assert!(matches!(result, Err(ConfigError::Antiflood(_))));
    }

    #[test]
    fn test_malformed_document_rejected() {
        let result = NodeConfig::from_toml("[consensus\nchain_id = 1");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[consensus]\nconsensus_group_size = 21").unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.consensus.consensus_group_size, 21);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let err = NodeConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_serialized_config_parses_back() {
        let mut config = NodeConfig::default();
        config.consensus = config.consensus.with_chain_id("devnet");
        config.broadcast = config.broadcast.with_cache_sizes(4, 6);

        let text = toml::to_string(&config).unwrap();
        assert_eq!(NodeConfig::from_toml(&text).unwrap(), config);
    }
}
