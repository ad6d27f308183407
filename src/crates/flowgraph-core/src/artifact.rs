//! Artifact lineage registry
//!
//! Artifacts are named, versioned outputs tracked independently of the node
//! cache. The registry is append-only: versions are registered once and never
//! rewritten; the "latest version" pointer per key+partition moves forward on
//! every registration.
//!
//! ```text
//! ArtifactKey{path: "tables/users", partition: "2024-06-01"}
//!   versions:  v1 ── v2 ── v3   (latest → v3)
//!   v3 lineage: { tables/raw_users@2024-06-01 → "r7" }
//!   producers:  ["etl::load_users", "load_users"]
//! ```
//!
//! When several nodes produce the same artifact, [`ArtifactRegistry::get_producing_node_ids`]
//! ranks producers by the depth of the execution id that registered them
//! (sub-graph executions use `parent::child` ids, so deeper means more
//! specific), then alphabetically by node id.

use crate::error::{GraphError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Separator between parent and child execution ids
pub const EXECUTION_ID_SEPARATOR: &str = "::";

/// Artifact identity: a path plus an optional partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Logical path
    pub path: String,
    /// Optional partition (date, shard, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

impl ArtifactKey {
    /// Unpartitioned key
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            partition: None,
        }
    }

    /// Partitioned key
    pub fn partitioned(path: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            partition: Some(partition.into()),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partition {
            Some(p) => write!(f, "{}@{}", self.path, p),
            None => write!(f, "{}", self.path),
        }
    }
}

/// Metadata recorded with each artifact version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Node that produced the version
    pub produced_by_node_id: String,
    /// Execution that produced the version
    pub execution_id: String,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Input artifact versions consumed to produce this one
    #[serde(default, with = "lineage_serde")]
    pub lineage: HashMap<ArtifactKey, String>,
}

impl ArtifactMetadata {
    /// Metadata with empty lineage, stamped now
    pub fn new(produced_by_node_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            produced_by_node_id: produced_by_node_id.into(),
            execution_id: execution_id.into(),
            created_at: Utc::now(),
            lineage: HashMap::new(),
        }
    }

    /// Record a consumed input version
    pub fn with_input(mut self, key: ArtifactKey, version: impl Into<String>) -> Self {
        self.lineage.insert(key, version.into());
        self
    }
}

/// JSON objects need string keys, so lineage is stored as a list of pairs.
mod lineage_serde {
    use super::ArtifactKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(map: &HashMap<ArtifactKey, String>, s: S) -> Result<S::Ok, S::Error> {
        let mut pairs: Vec<(&ArtifactKey, &String)> = map.iter().collect();
        pairs.sort();
        pairs.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<HashMap<ArtifactKey, String>, D::Error> {
        let pairs: Vec<(ArtifactKey, String)> = Vec::deserialize(d)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Held while an artifact is being materialized; dropping it releases the lock
pub struct MaterializationLock {
    key: ArtifactKey,
    _guard: OwnedMutexGuard<()>,
}

impl MaterializationLock {
    /// Locked key
    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }
}

impl fmt::Debug for MaterializationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializationLock").field("key", &self.key).finish()
    }
}

/// Metadata index of artifact versions and their producers
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Register a new version; fails if this exact version already exists
    async fn register(&self, key: &ArtifactKey, version: &str, metadata: ArtifactMetadata) -> Result<()>;

    /// Latest registered version
    async fn latest_version(&self, key: &ArtifactKey) -> Result<Option<String>>;

    /// Metadata of one version
    async fn get_metadata(&self, key: &ArtifactKey, version: &str) -> Result<Option<ArtifactMetadata>>;

    /// Producing node ids, most specific first
    async fn get_producing_node_ids(&self, key: &ArtifactKey) -> Result<Vec<String>>;

    /// Input artifact versions consumed by one version
    async fn get_lineage(&self, key: &ArtifactKey, version: &str) -> Result<HashMap<ArtifactKey, String>>;

    /// Try to take the materialization lock of `key`; `None` if held elsewhere
    async fn try_acquire_materialization_lock(&self, key: &ArtifactKey) -> Result<Option<MaterializationLock>>;
}

#[derive(Debug, Default)]
struct RegistryState {
    versions: HashMap<ArtifactKey, HashMap<String, ArtifactMetadata>>,
    latest: HashMap<ArtifactKey, String>,
    /// key -> (execution depth, node id) of every producer
    producers: HashMap<ArtifactKey, BTreeSet<(usize, String)>>,
}

/// Single-process [`ArtifactRegistry`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactRegistry {
    state: Arc<RwLock<RegistryState>>,
    locks: Arc<parking_lot::Mutex<HashMap<ArtifactKey, Arc<Mutex<()>>>>>,
}

impl InMemoryArtifactRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered versions across all keys
    pub async fn version_count(&self) -> usize {
        self.state.read().await.versions.values().map(HashMap::len).sum()
    }
}

fn execution_depth(execution_id: &str) -> usize {
    execution_id.matches(EXECUTION_ID_SEPARATOR).count()
}

#[async_trait]
impl ArtifactRegistry for InMemoryArtifactRegistry {
    async fn register(&self, key: &ArtifactKey, version: &str, metadata: ArtifactMetadata) -> Result<()> {
        let mut state = self.state.write().await;
        let versions = state.versions.entry(key.clone()).or_default();
        if versions.contains_key(version) {
            return Err(GraphError::Custom(format!(
                "artifact {} version '{}' is already registered",
                key, version
            )));
        }
        let producer = (
            execution_depth(&metadata.execution_id),
            metadata.produced_by_node_id.clone(),
        );
        versions.insert(version.to_string(), metadata);
        state.latest.insert(key.clone(), version.to_string());
        state.producers.entry(key.clone()).or_default().insert(producer);
        tracing::debug!(artifact = %key, version, "Registered artifact version");
        Ok(())
    }

    async fn latest_version(&self, key: &ArtifactKey) -> Result<Option<String>> {
        Ok(self.state.read().await.latest.get(key).cloned())
    }

    async fn get_metadata(&self, key: &ArtifactKey, version: &str) -> Result<Option<ArtifactMetadata>> {
        Ok(self
            .state
            .read()
            .await
            .versions
            .get(key)
            .and_then(|v| v.get(version))
            .cloned())
    }

    async fn get_producing_node_ids(&self, key: &ArtifactKey) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let Some(producers) = state.producers.get(key) else {
            return Ok(Vec::new());
        };
        let mut ranked: Vec<&(usize, String)> = producers.iter().collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let mut ids: Vec<String> = Vec::with_capacity(ranked.len());
        for (_, node_id) in ranked {
            if !ids.contains(node_id) {
                ids.push(node_id.clone());
            }
        }
        Ok(ids)
    }

    async fn get_lineage(&self, key: &ArtifactKey, version: &str) -> Result<HashMap<ArtifactKey, String>> {
        Ok(self
            .get_metadata(key, version)
            .await?
            .map(|m| m.lineage)
            .unwrap_or_default())
    }

    async fn try_acquire_materialization_lock(&self, key: &ArtifactKey) -> Result<Option<MaterializationLock>> {
        let mutex = self
            .locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Ok(mutex.try_lock_owned().ok().map(|guard| MaterializationLock {
            key: key.clone(),
            _guard: guard,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_latest() {
        let registry = InMemoryArtifactRegistry::new();
        let key = ArtifactKey::partitioned("tables/users", "2024-06-01");

        registry
            .register(&key, "v1", ArtifactMetadata::new("load", "run-1"))
            .await
            .unwrap();
        registry
            .register(&key, "v2", ArtifactMetadata::new("load", "run-2"))
            .await
            .unwrap();

        assert_eq!(registry.latest_version(&key).await.unwrap().as_deref(), Some("v2"));
        let meta = registry.get_metadata(&key, "v1").await.unwrap().unwrap();
        assert_eq!(meta.execution_id, "run-1");
        assert_eq!(registry.version_count().await, 2);
    }

    #[tokio::test]
    async fn test_versions_are_append_only() {
        let registry = InMemoryArtifactRegistry::new();
        let key = ArtifactKey::new("model");
        registry
            .register(&key, "v1", ArtifactMetadata::new("train", "run"))
            .await
            .unwrap();
        assert!(registry
            .register(&key, "v1", ArtifactMetadata::new("other", "run"))
            .await
            .is_err());
        let meta = registry.get_metadata(&key, "v1").await.unwrap().unwrap();
        assert_eq!(meta.produced_by_node_id, "train");
    }

    #[tokio::test]
    async fn test_partitions_are_independent() {
        let registry = InMemoryArtifactRegistry::new();
        let day1 = ArtifactKey::partitioned("t", "d1");
        let day2 = ArtifactKey::partitioned("t", "d2");
        registry
            .register(&day1, "a", ArtifactMetadata::new("n", "run"))
            .await
            .unwrap();
        assert!(registry.latest_version(&day2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_producer_ranking_prefers_deeper_execution() {
        let registry = InMemoryArtifactRegistry::new();
        let key = ArtifactKey::new("report");
        registry
            .register(&key, "1", ArtifactMetadata::new("zeta", "run"))
            .await
            .unwrap();
        registry
            .register(&key, "2", ArtifactMetadata::new("alpha", "run"))
            .await
            .unwrap();
        registry
            .register(&key, "3", ArtifactMetadata::new("nested", "run::sub::inner"))
            .await
            .unwrap();

        let ids = registry.get_producing_node_ids(&key).await.unwrap();
        assert_eq!(ids, vec!["nested", "alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_lineage() {
        let registry = InMemoryArtifactRegistry::new();
        let raw = ArtifactKey::new("raw");
        let clean = ArtifactKey::new("clean");
        registry
            .register(
                &clean,
                "c1",
                ArtifactMetadata::new("clean", "run").with_input(raw.clone(), "r7"),
            )
            .await
            .unwrap();

        let lineage = registry.get_lineage(&clean, "c1").await.unwrap();
        assert_eq!(lineage.get(&raw).map(String::as_str), Some("r7"));
        assert!(registry.get_lineage(&clean, "missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_materialization_lock_is_exclusive() {
        let registry = InMemoryArtifactRegistry::new();
        let key = ArtifactKey::partitioned("t", "p");

        let held = registry.try_acquire_materialization_lock(&key).await.unwrap();
        assert!(held.is_some());
        assert!(registry
            .try_acquire_materialization_lock(&key)
            .await
            .unwrap()
            .is_none());

        let other = ArtifactKey::partitioned("t", "q");
        assert!(registry
            .try_acquire_materialization_lock(&other)
            .await
            .unwrap()
            .is_some());

        drop(held);
        assert!(registry
            .try_acquire_materialization_lock(&key)
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_metadata_serde_with_lineage() {
        let meta = ArtifactMetadata::new("n", "run").with_input(ArtifactKey::new("in"), "v9");
        let json = serde_json::to_string(&meta).unwrap();
        let back: ArtifactMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
