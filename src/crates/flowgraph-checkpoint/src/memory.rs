//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointStore`] keeps every execution's history in a
//! `Arc<RwLock<HashMap>>`, ordered by sequence. Data is lost when the process
//! exits, which makes it a good fit for tests and single-process runs that
//! only need suspend/resume, not crash recovery.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Arc<RwLock<HashMap<exec_id, Vec<..>>>>  │
//! │    "run-1" ─ [seq 0] [seq 1] [seq 2]     │
//! │    "run-2" ─ [seq 0]                     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The [`RetentionPolicy`] is applied on every save.

use crate::checkpoint::{CheckpointSummary, GraphCheckpoint};
use crate::error::Result;
use crate::traits::{CheckpointStore, RetentionPolicy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<GraphCheckpoint>>>>;

/// In-memory [`CheckpointStore`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: CheckpointStorage,
    retention: RetentionPolicy,
}

impl InMemoryCheckpointStore {
    /// Create a store that keeps full history
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with an explicit retention policy
    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            storage: Arc::default(),
            retention,
        }
    }

    /// Retention policy in effect
    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Number of executions with at least one checkpoint
    pub async fn execution_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of stored checkpoints
    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.values().map(Vec::len).sum()
    }

    /// Remove everything (test isolation)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

fn trim(history: &mut Vec<GraphCheckpoint>, keep: usize) -> usize {
    let excess = history.len().saturating_sub(keep);
    history.drain(..excess);
    excess
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: GraphCheckpoint) -> Result<()> {
        checkpoint.validate()?;
        let mut storage = self.storage.write().await;
        let history = storage.entry(checkpoint.execution_id.clone()).or_default();
        tracing::debug!(
            execution_id = %checkpoint.execution_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            sequence = checkpoint.sequence,
            "Saving checkpoint in memory"
        );
        history.push(checkpoint);
        // stable: equal sequences keep insertion order
        history.sort_by_key(|c| c.sequence);
        if let Some(keep) = self.retention.keep_count() {
            trim(history, keep);
        }
        Ok(())
    }

    async fn load_latest(&self, execution_id: &str) -> Result<Option<GraphCheckpoint>> {
        let storage = self.storage.read().await;
        Ok(storage.get(execution_id).and_then(|h| h.last().cloned()))
    }

    async fn load(&self, execution_id: &str, checkpoint_id: &str) -> Result<Option<GraphCheckpoint>> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(execution_id)
            .and_then(|h| h.iter().find(|c| c.checkpoint_id == checkpoint_id).cloned()))
    }

    async fn list_checkpoints(&self, execution_id: &str) -> Result<Vec<CheckpointSummary>> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(execution_id)
            .map(|h| h.iter().map(GraphCheckpoint::summary).collect())
            .unwrap_or_default())
    }

    async fn delete_all(&self, execution_id: &str) -> Result<()> {
        self.storage.write().await.remove(execution_id);
        Ok(())
    }

    async fn prune(&self, execution_id: &str, keep_latest: usize) -> Result<usize> {
        let mut storage = self.storage.write().await;
        Ok(storage
            .get_mut(execution_id)
            .map(|h| trim(h, keep_latest))
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::NodeOutputs;
    use serde_json::json;

    fn checkpoint(exec: &str, seq: u64) -> GraphCheckpoint {
        let outputs: NodeOutputs = [("seq".to_string(), json!(seq))].into_iter().collect();
        GraphCheckpoint::new(exec)
            .with_sequence(seq)
            .with_node_output(format!("node-{}", seq), outputs)
    }

    #[tokio::test]
    async fn test_save_and_load_latest() {
        let store = InMemoryCheckpointStore::new();
        store.save(checkpoint("run", 0)).await.unwrap();
        store.save(checkpoint("run", 1)).await.unwrap();

        let latest = store.load_latest("run").await.unwrap().unwrap();
        assert_eq!(latest.sequence, 1);
        assert!(store.load_latest("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_by_id_and_list() {
        let store = InMemoryCheckpointStore::new();
        let first = checkpoint("run", 0);
        let first_id = first.checkpoint_id.clone();
        store.save(first).await.unwrap();
        store.save(checkpoint("run", 1)).await.unwrap();

        let loaded = store.load("run", &first_id).await.unwrap().unwrap();
        assert_eq!(loaded.sequence, 0);

        let list = store.list_checkpoints("run").await.unwrap();
        assert_eq!(list.iter().map(|s| s.sequence).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_out_of_order_saves_sorted_by_sequence() {
        let store = InMemoryCheckpointStore::new();
        store.save(checkpoint("run", 2)).await.unwrap();
        store.save(checkpoint("run", 1)).await.unwrap();
        assert_eq!(store.load_latest("run").await.unwrap().unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_latest_only_retention() {
        let store = InMemoryCheckpointStore::with_retention(RetentionPolicy::LatestOnly);
        for seq in 0..4 {
            store.save(checkpoint("run", seq)).await.unwrap();
        }
        assert_eq!(store.checkpoint_count().await, 1);
        assert_eq!(store.load_latest("run").await.unwrap().unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn test_full_history_keep_latest_and_prune() {
        let store = InMemoryCheckpointStore::with_retention(RetentionPolicy::FullHistory {
            keep_latest: Some(3),
        });
        for seq in 0..5 {
            store.save(checkpoint("run", seq)).await.unwrap();
        }
        assert_eq!(store.list_checkpoints("run").await.unwrap().len(), 3);

        let removed = store.prune("run", 1).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.load_latest("run").await.unwrap().unwrap().sequence, 4);
    }

    #[tokio::test]
    async fn test_delete_all_isolated_per_execution() {
        let store = InMemoryCheckpointStore::new();
        store.save(checkpoint("a", 0)).await.unwrap();
        store.save(checkpoint("b", 0)).await.unwrap();
        store.delete_all("a").await.unwrap();

        assert!(store.load_latest("a").await.unwrap().is_none());
        assert!(store.load_latest("b").await.unwrap().is_some());
        assert_eq!(store.execution_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejects_invalid_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.save(GraphCheckpoint::new("")).await.is_err());
    }
}
