//! Mesh configuration, loadable from JSON.

use crate::simulation::SimulationConfig;
use serde::{Deserialize, Serialize};
use soulmesh_emergence::PredictorConfig;
use soulmesh_merge::MergeConfig;
use soulmesh_metrics::MetricsConfig;
use soulmesh_snapshot::SnapshotConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "SOULMESH_CONFIG";

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings for every component a [`MeshNode`](crate::node::MeshNode) owns.
/// Missing keys fall back to their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Component whose replicated state the gates guard.
    pub component: String,
    pub merge: MergeConfig,
    pub metrics: MetricsConfig,
    pub predictor: PredictorConfig,
    pub snapshot: SnapshotConfig,
    /// Alerts kept in the in-process feed.
    pub alert_feed_size: usize,
    /// Buffer of the observer broadcast channel.
    pub alert_channel_capacity: usize,
    pub simulation: SimulationConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            component: "memory.consciousness".to_string(),
            merge: MergeConfig::default(),
            metrics: MetricsConfig::default(),
            predictor: PredictorConfig::default(),
            snapshot: SnapshotConfig::default(),
            alert_feed_size: soulmesh_emergence::DEFAULT_FEED_SIZE,
            alert_channel_capacity: 64,
            simulation: SimulationConfig::default(),
        }
    }
}

impl MeshConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Load from the file named by `SOULMESH_CONFIG`, or use defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soulmesh_merge::ResolutionStrategy;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = MeshConfig::from_json(
            r#"{"merge": {"strategy": "timestamp_priority"}, "predictor": {"cascade_threshold": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.merge.strategy, ResolutionStrategy::TimestampPriority);
        assert_eq!(config.merge.max_checkpoints, 8);
        assert_eq!(config.predictor.cascade_threshold, 5);
        assert_eq!(config.predictor.divergence_threshold, 1000);
        assert_eq!(config.component, "memory.consciousness");
    }

    #[test]
    fn test_round_trip() {
        let config = MeshConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(MeshConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            MeshConfig::load("/nonexistent/soulmesh.json"),
            Err(ConfigError::Io { .. })
        ));
        assert!(matches!(
            MeshConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
