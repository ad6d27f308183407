//! Extensible checkpoint storage trait for custom backend implementations
//!
//! [`CheckpointStore`] is the seam between the orchestrator and durable
//! storage. The orchestrator saves a [`GraphCheckpoint`] after layers (per its
//! configured frequency) and whenever a run suspends; resume and crash
//! recovery call [`CheckpointStore::load_latest`].
//!
//! # Core Types
//!
//! - [`CheckpointStore`] - async storage trait
//! - [`RetentionPolicy`] - how much history a store keeps per execution
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │       Orchestrator       │
//! │  save() after each layer │
//! │  load_latest() on resume │
//! └────────────┬─────────────┘
//!              │ Arc<dyn CheckpointStore>
//!      ┌───────┴────────┐
//!      ▼                ▼
//! ┌──────────┐   ┌─────────────┐
//! │ InMemory │   │ File (JSON) │   ... SQL, Redis, S3 backends
//! └──────────┘   └─────────────┘
//! ```
//!
//! # Implementing a Backend
//!
//! ```rust,ignore
//! use flowgraph_checkpoint::{CheckpointStore, CheckpointSummary, GraphCheckpoint, Result};
//! use async_trait::async_trait;
//!
//! struct RedisCheckpointStore { client: redis::Client }
//!
//! #[async_trait]
//! impl CheckpointStore for RedisCheckpointStore {
//!     async fn save(&self, checkpoint: GraphCheckpoint) -> Result<()> {
//!         let payload = serde_json::to_string(&checkpoint)?;
//!         // ZADD flowgraph:{execution_id} {sequence} {payload}
//!         Ok(())
//!     }
//!     // load_latest, load, list_checkpoints, delete_all ...
//! }
//! ```
//!
//! Each checkpoint is written under its own immutable id, so a lost write can
//! never corrupt an earlier checkpoint.

use crate::checkpoint::{CheckpointSummary, GraphCheckpoint};
use crate::error::{CheckpointError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How much checkpoint history a store keeps per execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Each save replaces the previous checkpoint
    LatestOnly,
    /// Keep an ordered series, optionally pruned to the newest N
    FullHistory {
        /// Maximum number of checkpoints to keep; `None` keeps everything
        keep_latest: Option<usize>,
    },
}

impl RetentionPolicy {
    /// Number of checkpoints to retain, if bounded
    pub fn keep_count(&self) -> Option<usize> {
        match self {
            RetentionPolicy::LatestOnly => Some(1),
            RetentionPolicy::FullHistory { keep_latest } => *keep_latest,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::FullHistory { keep_latest: None }
    }
}

/// Durable storage for execution checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint
    async fn save(&self, checkpoint: GraphCheckpoint) -> Result<()>;

    /// Most recent checkpoint (highest sequence) of an execution
    async fn load_latest(&self, execution_id: &str) -> Result<Option<GraphCheckpoint>>;

    /// A specific checkpoint
    async fn load(&self, execution_id: &str, checkpoint_id: &str) -> Result<Option<GraphCheckpoint>>;

    /// Summaries ordered oldest first
    async fn list_checkpoints(&self, execution_id: &str) -> Result<Vec<CheckpointSummary>>;

    /// Remove every checkpoint of an execution
    async fn delete_all(&self, execution_id: &str) -> Result<()>;

    /// Keep only the newest `keep_latest` checkpoints; returns how many were removed
    async fn prune(&self, execution_id: &str, keep_latest: usize) -> Result<usize> {
        let _ = (execution_id, keep_latest);
        Err(CheckpointError::unsupported("checkpoint-store", "prune"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_keep_count() {
        assert_eq!(RetentionPolicy::LatestOnly.keep_count(), Some(1));
        assert_eq!(RetentionPolicy::default().keep_count(), None);
        assert_eq!(
            RetentionPolicy::FullHistory { keep_latest: Some(5) }.keep_count(),
            Some(5)
        );
    }

    #[test]
    fn test_retention_serde() {
        let policy: RetentionPolicy =
            serde_json::from_str(r#"{"kind":"full_history","keep_latest":3}"#).unwrap();
        assert_eq!(policy, RetentionPolicy::FullHistory { keep_latest: Some(3) });
    }
}
