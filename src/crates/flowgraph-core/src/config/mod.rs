//! Orchestrator configuration
//!
//! [`OrchestratorConfig`] can be built in code, read from YAML, and overridden
//! from the environment. Sources combine through [`ConfigBuilder::merge`].
//!
//! | Field | Env variable | Default |
//! |-------|--------------|---------|
//! | `max_parallelism` | `FLOWGRAPH_MAX_PARALLELISM` | unbounded |
//! | `default_node_timeout_ms` | `FLOWGRAPH_DEFAULT_NODE_TIMEOUT_MS` | none |
//! | `fingerprint_seed` | `FLOWGRAPH_FINGERPRINT_SEED` | `""` |
//! | `checkpoint_frequency` | `FLOWGRAPH_CHECKPOINT_FREQUENCY` | `every_layer` |
//! | `write_behind` | `FLOWGRAPH_WRITE_BEHIND` | `false` |
//! | `max_subgraph_depth` | `FLOWGRAPH_MAX_SUBGRAPH_DEPTH` | `16` |
//!
//! # Example
//!
//! ```rust
//! use flowgraph_core::config::{CheckpointFrequency, ConfigBuilder, OrchestratorConfig};
//!
//! let mut config = OrchestratorConfig::from_yaml_str(
//!     "max_parallelism: 4\ncheckpoint_frequency: on_suspend\n",
//! ).unwrap();
//! config.merge(OrchestratorConfig {
//!     write_behind: true,
//!     ..OrchestratorConfig::default()
//! });
//!
//! assert_eq!(config.max_parallelism, Some(4));
//! assert_eq!(config.checkpoint_frequency, CheckpointFrequency::OnSuspend);
//! assert!(config.write_behind);
//! assert!(config.validate().is_ok());
//! ```

mod builder;
mod env;

pub use builder::ConfigBuilder;
pub use env::{build_env_key, get_env, get_env_bool, get_env_parse, get_env_parse_or};

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment prefix used by [`OrchestratorConfig::from_default_env`]
pub const ENV_PREFIX: &str = "FLOWGRAPH_";

/// When the orchestrator persists checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointFrequency {
    /// After every layer and on suspension
    #[default]
    EveryLayer,
    /// Only when a node suspends the run
    OnSuspend,
    /// Never
    Never,
}

impl FromStr for CheckpointFrequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "every_layer" => Ok(Self::EveryLayer),
            "on_suspend" => Ok(Self::OnSuspend),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unknown checkpoint frequency '{}' (expected every_layer, on_suspend or never)",
                other
            )),
        }
    }
}

impl fmt::Display for CheckpointFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EveryLayer => "every_layer",
            Self::OnSuspend => "on_suspend",
            Self::Never => "never",
        })
    }
}

/// Tuning knobs of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrently running nodes per layer
    pub max_parallelism: Option<usize>,
    /// Timeout for nodes that do not set their own
    pub default_node_timeout_ms: Option<u64>,
    /// Global fingerprint seed; changing it invalidates every cache entry
    pub fingerprint_seed: String,
    /// When checkpoints are written
    pub checkpoint_frequency: CheckpointFrequency,
    /// Spawn cache and checkpoint writes instead of awaiting them
    pub write_behind: bool,
    /// Maximum sub-graph nesting
    pub max_subgraph_depth: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: None,
            default_node_timeout_ms: None,
            fingerprint_seed: String::new(),
            checkpoint_frequency: CheckpointFrequency::EveryLayer,
            write_behind: false,
            max_subgraph_depth: 16,
        }
    }
}

impl OrchestratorConfig {
    /// Default node timeout as a `Duration`
    pub fn default_node_timeout(&self) -> Option<Duration> {
        self.default_node_timeout_ms.map(Duration::from_millis)
    }

    /// Parse a YAML document; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Defaults overlaid with `FLOWGRAPH_*` variables
    pub fn from_default_env() -> Result<Self> {
        Self::from_env_validated(ENV_PREFIX)
    }
}

impl ConfigBuilder for OrchestratorConfig {
    fn validate(&self) -> Result<()> {
        if self.max_parallelism == Some(0) {
            return Err(GraphError::Configuration(
                "max_parallelism must be at least 1".into(),
            ));
        }
        if self.default_node_timeout_ms == Some(0) {
            return Err(GraphError::Configuration(
                "default_node_timeout_ms must be positive".into(),
            ));
        }
        if self.max_subgraph_depth == 0 {
            return Err(GraphError::Configuration(
                "max_subgraph_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn from_env(prefix: &str) -> Result<Self> {
        let key = |name: &str| build_env_key(prefix, name);
        let defaults = Self::default();
        Ok(Self {
            max_parallelism: get_env_parse(&key("max_parallelism"))?,
            default_node_timeout_ms: get_env_parse(&key("default_node_timeout_ms"))?,
            fingerprint_seed: get_env(&key("fingerprint_seed"))?.unwrap_or(defaults.fingerprint_seed),
            checkpoint_frequency: get_env_parse_or(
                &key("checkpoint_frequency"),
                defaults.checkpoint_frequency,
            )?,
            write_behind: get_env_bool(&key("write_behind"))?.unwrap_or(defaults.write_behind),
            max_subgraph_depth: get_env_parse_or(&key("max_subgraph_depth"), defaults.max_subgraph_depth)?,
        })
    }

    fn merge(&mut self, other: Self) -> &mut Self {
        let defaults = Self::default();
        if other.max_parallelism.is_some() {
            self.max_parallelism = other.max_parallelism;
        }
        if other.default_node_timeout_ms.is_some() {
            self.default_node_timeout_ms = other.default_node_timeout_ms;
        }
        if other.fingerprint_seed != defaults.fingerprint_seed {
            self.fingerprint_seed = other.fingerprint_seed;
        }
        if other.checkpoint_frequency != defaults.checkpoint_frequency {
            self.checkpoint_frequency = other.checkpoint_frequency;
        }
        if other.write_behind != defaults.write_behind {
            self.write_behind = other.write_behind;
        }
        if other.max_subgraph_depth != defaults.max_subgraph_depth {
            self.max_subgraph_depth = other.max_subgraph_depth;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::build().unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert!(config.default_node_timeout().is_none());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let bad = OrchestratorConfig {
            max_parallelism: Some(0),
            ..Default::default()
        };
        assert!(bad.validate().unwrap_err().is_configuration());

        let bad = OrchestratorConfig {
            max_subgraph_depth: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_yaml() {
        let config = OrchestratorConfig::from_yaml_str(
            "default_node_timeout_ms: 250\nfingerprint_seed: v2\nwrite_behind: true\n",
        )
        .unwrap();
        assert_eq!(config.default_node_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.fingerprint_seed, "v2");
        assert!(config.write_behind);
        assert_eq!(config.max_subgraph_depth, 16);

        assert!(OrchestratorConfig::from_yaml_str("max_parallelism: 0\n").is_err());
        assert!(OrchestratorConfig::from_yaml_str("checkpoint_frequency: hourly\n").is_err());
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowgraph.yaml");
        std::fs::write(&path, "checkpoint_frequency: never\n").unwrap();
        let config = OrchestratorConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.checkpoint_frequency, CheckpointFrequency::Never);
    }

    #[test]
    fn test_from_env() {
        let prefix = "FGTEST_ENV_";
        std::env::set_var("FGTEST_ENV_MAX_PARALLELISM", "3");
        std::env::set_var("FGTEST_ENV_CHECKPOINT_FREQUENCY", "on-suspend");
        std::env::set_var("FGTEST_ENV_WRITE_BEHIND", "yes");

        let config = OrchestratorConfig::from_env_validated(prefix).unwrap();
        assert_eq!(config.max_parallelism, Some(3));
        assert_eq!(config.checkpoint_frequency, CheckpointFrequency::OnSuspend);
        assert!(config.write_behind);
        assert_eq!(config.max_subgraph_depth, 16);

        std::env::remove_var("FGTEST_ENV_MAX_PARALLELISM");
        std::env::remove_var("FGTEST_ENV_CHECKPOINT_FREQUENCY");
        std::env::remove_var("FGTEST_ENV_WRITE_BEHIND");
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        std::env::set_var("FGTEST_BAD_MAX_SUBGRAPH_DEPTH", "deep");
        assert!(OrchestratorConfig::from_env("FGTEST_BAD_").is_err());
        std::env::remove_var("FGTEST_BAD_MAX_SUBGRAPH_DEPTH");
    }

    #[test]
    fn test_merge_overlays_non_default_fields() {
        let mut base = OrchestratorConfig {
            max_parallelism: Some(8),
            fingerprint_seed: "base".into(),
            ..Default::default()
        };
        base.merge(OrchestratorConfig {
            default_node_timeout_ms: Some(100),
            checkpoint_frequency: CheckpointFrequency::Never,
            ..Default::default()
        });
        assert_eq!(base.max_parallelism, Some(8));
        assert_eq!(base.fingerprint_seed, "base");
        assert_eq!(base.default_node_timeout_ms, Some(100));
        assert_eq!(base.checkpoint_frequency, CheckpointFrequency::Never);
    }

    #[test]
    fn test_frequency_display_roundtrip() {
        for f in [
            CheckpointFrequency::EveryLayer,
            CheckpointFrequency::OnSuspend,
            CheckpointFrequency::Never,
        ] {
            assert_eq!(f.to_string().parse::<CheckpointFrequency>().unwrap(), f);
        }
    }
}
