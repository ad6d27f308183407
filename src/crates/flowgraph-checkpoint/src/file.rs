//! File-backed checkpoint storage
//!
//! Each execution gets a directory under the store root; each checkpoint is a
//! pretty-printed JSON file named `<sequence>-<checkpoint_id>.json`, with the
//! sequence zero-padded so lexical order equals history order:
//!
//! ```text
//! <root>/
//!   run-42/
//!     00000000000000000000-6f1c...json
//!     00000000000000000001-a03e...json
//!   parent%3A%3Asub/          (ids are escaped to be path-safe)
//! ```
//!
//! Writes go to a temporary file first and are renamed into place, so a crash
//! mid-write never leaves a truncated checkpoint behind.

use crate::checkpoint::{CheckpointSummary, GraphCheckpoint};
use crate::error::{CheckpointError, Result};
use crate::traits::{CheckpointStore, RetentionPolicy};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const EXTENSION: &str = "json";

/// [`CheckpointStore`] persisting JSON files on the local filesystem
#[derive(Debug)]
pub struct FileCheckpointStore {
    root: PathBuf,
    retention: RetentionPolicy,
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    /// Create a store rooted at `root` (created lazily on first save)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_retention(root, RetentionPolicy::default())
    }

    /// Create a store with an explicit retention policy
    pub fn with_retention(root: impl Into<PathBuf>, retention: RetentionPolicy) -> Self {
        Self {
            root: root.into(),
            retention,
            write_lock: Mutex::new(()),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn execution_dir(&self, execution_id: &str) -> PathBuf {
        self.root.join(escape_id(execution_id))
    }

    /// Checkpoint files of an execution, oldest first
    async fn entries(&self, execution_id: &str) -> Result<Vec<PathBuf>> {
        let dir = self.execution_dir(execution_id);
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read(path: &Path) -> Result<GraphCheckpoint> {
        let bytes = tokio::fs::read(path).await?;
        let checkpoint: GraphCheckpoint = serde_json::from_slice(&bytes)?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    async fn remove_oldest(files: &[PathBuf], keep: usize) -> Result<usize> {
        let excess = files.len().saturating_sub(keep);
        for path in &files[..excess] {
            tokio::fs::remove_file(path).await?;
        }
        Ok(excess)
    }
}

/// Escape everything except `[A-Za-z0-9._-]` as `%XX`.
fn escape_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => out.push(byte as char),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    if out.starts_with('.') {
        out.replace_range(..1, "%2E");
    }
    out
}

fn file_name(checkpoint: &GraphCheckpoint) -> String {
    format!(
        "{:020}-{}.{}",
        checkpoint.sequence,
        escape_id(&checkpoint.checkpoint_id),
        EXTENSION
    )
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: GraphCheckpoint) -> Result<()> {
        checkpoint.validate()?;
        let _guard = self.write_lock.lock().await;

        let dir = self.execution_dir(&checkpoint.execution_id);
        tokio::fs::create_dir_all(&dir).await?;

        let target = dir.join(file_name(&checkpoint));
        let tmp = target.with_extension("tmp");
        let payload = serde_json::to_vec_pretty(&checkpoint)?;
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &target).await?;

        tracing::debug!(
            execution_id = %checkpoint.execution_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            path = %target.display(),
            "Checkpoint written"
        );

        if let Some(keep) = self.retention.keep_count() {
            let files = self.entries(&checkpoint.execution_id).await?;
            Self::remove_oldest(&files, keep).await?;
        }
        Ok(())
    }

    async fn load_latest(&self, execution_id: &str) -> Result<Option<GraphCheckpoint>> {
        match self.entries(execution_id).await?.last() {
            Some(path) => Ok(Some(Self::read(path).await?)),
            None => Ok(None),
        }
    }

    async fn load(&self, execution_id: &str, checkpoint_id: &str) -> Result<Option<GraphCheckpoint>> {
        let suffix = format!("-{}.{}", escape_id(checkpoint_id), EXTENSION);
        for path in self.entries(execution_id).await? {
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&suffix))
                .unwrap_or(false);
            if matches {
                return Ok(Some(Self::read(&path).await?));
            }
        }
        Ok(None)
    }

    async fn list_checkpoints(&self, execution_id: &str) -> Result<Vec<CheckpointSummary>> {
        let mut summaries = Vec::new();
        for path in self.entries(execution_id).await? {
            summaries.push(Self::read(&path).await?.summary());
        }
        Ok(summaries)
    }

    async fn delete_all(&self, execution_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_dir_all(self.execution_dir(execution_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::Storage(format!(
                "failed to delete checkpoints of '{}': {}",
                execution_id, e
            ))),
        }
    }

    async fn prune(&self, execution_id: &str, keep_latest: usize) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let files = self.entries(execution_id).await?;
        Self::remove_oldest(&files, keep_latest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{NodeOutputs, SuspendState};
    use serde_json::json;

    fn checkpoint(exec: &str, seq: u64) -> GraphCheckpoint {
        let outputs: NodeOutputs = [("v".to_string(), json!(seq))].into_iter().collect();
        GraphCheckpoint::new(exec)
            .with_sequence(seq)
            .with_node_output("A", outputs)
    }

    #[test]
    fn test_escape_id() {
        assert_eq!(escape_id("run-1_a.b"), "run-1_a.b");
        assert_eq!(escape_id("parent::sub"), "parent%3A%3Asub");
        assert_eq!(escape_id("../x"), "%2E.%2Fx");
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let cp = checkpoint("run", 0).with_suspension(SuspendState::new("B", "tok"));
        let id = cp.checkpoint_id.clone();
        store.save(cp).await.unwrap();
        store.save(checkpoint("run", 1)).await.unwrap();

        let latest = store.load_latest("run").await.unwrap().unwrap();
        assert_eq!(latest.sequence, 1);

        let first = store.load("run", &id).await.unwrap().unwrap();
        assert_eq!(first.suspension.unwrap().token, "tok");
        assert_eq!(first.node_outputs["A"]["v"], json!(0));
    }

    #[tokio::test]
    async fn test_missing_execution_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nested"));
        assert!(store.load_latest("nope").await.unwrap().is_none());
        assert!(store.list_checkpoints("nope").await.unwrap().is_empty());
        store.delete_all("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_retention_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::with_retention(
            dir.path(),
            RetentionPolicy::FullHistory { keep_latest: Some(2) },
        );
        for seq in 0..4 {
            store.save(checkpoint("a::b", seq)).await.unwrap();
        }
        let list = store.list_checkpoints("a::b").await.unwrap();
        assert_eq!(list.iter().map(|s| s.sequence).collect::<Vec<_>>(), vec![2, 3]);

        assert_eq!(store.prune("a::b", 1).await.unwrap(), 1);
        store.delete_all("a::b").await.unwrap();
        assert!(store.load_latest("a::b").await.unwrap().is_none());
    }
}
