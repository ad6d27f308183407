//! Content-addressable node cache
//!
//! Node results are cached under their fingerprint (see
//! [`fingerprint`](crate::fingerprint)). A fingerprint, once associated with a
//! [`CachedNodeResult`], is treated as content-immutable: the same fingerprint
//! always stands for the same outputs, so entries are written once and read
//! many times.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ Orchestrator                               │
//! │  fingerprint = hash(node, inputs, ...)     │
//! │  get(fp) ── hit ──► adopt outputs          │
//! │          └─ miss ─► run handler, set(fp)   │
//! └───────────────┬────────────────────────────┘
//!                 │ Arc<dyn NodeCacheStore>
//!                 ▼
//! ┌────────────────────────────────────────────┐
//! │ InMemoryNodeCache                          │
//! │  Arc<RwLock<HashMap<fp, CacheEntry>>>      │
//! │  max_size + LRU / LFU / FIFO / TTL         │
//! │  hits / misses / evictions metrics         │
//! └────────────────────────────────────────────┘
//! ```
//!
//! | Policy | Evicts |
//! |--------|--------|
//! | **LRU** | least recently read entry |
//! | **LFU** | least frequently read entry |
//! | **FIFO** | oldest entry |
//! | **TTL** | an expired entry if any, else the oldest |
//!
//! Persistent stores (Redis, SQL, object storage) implement
//! [`NodeCacheStore`] directly.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowgraph_checkpoint::NodeOutputs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Outputs of one node execution, keyed by fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedNodeResult {
    /// Fingerprint the outputs belong to
    pub fingerprint: String,
    /// Node outputs
    pub outputs: NodeOutputs,
    /// When the entry was written
    pub cached_at: DateTime<Utc>,
    /// Extra information (producing node, duration, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl CachedNodeResult {
    /// Entry stamped now
    pub fn new(fingerprint: impl Into<String>, outputs: NodeOutputs) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            outputs,
            cached_at: Utc::now(),
            metadata: None,
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

/// Key-value store of node results keyed by fingerprint
#[async_trait]
pub trait NodeCacheStore: Send + Sync {
    /// Cached result for a fingerprint
    async fn get(&self, fingerprint: &str) -> Result<Option<CachedNodeResult>>;

    /// Store a result
    async fn set(&self, fingerprint: &str, result: CachedNodeResult) -> Result<()>;

    /// Store a result that expires after `ttl`; stores without expiry support ignore it
    async fn set_with_ttl(&self, fingerprint: &str, result: CachedNodeResult, ttl: Option<Duration>) -> Result<()> {
        let _ = ttl;
        self.set(fingerprint, result).await
    }

    /// Whether a result exists
    async fn exists(&self, fingerprint: &str) -> Result<bool>;

    /// Remove one result
    async fn delete(&self, fingerprint: &str) -> Result<()>;

    /// Remove every result
    async fn clear_all(&self) -> Result<()>;
}

/// Cache entry with access metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The cached value
    pub value: T,
    /// When the entry was created
    pub created_at: Instant,
    /// When the entry was last accessed
    pub last_accessed: Instant,
    /// Number of times this entry has been accessed
    pub access_count: usize,
    /// Optional expiration time
    pub expires_at: Option<Instant>,
}

impl<T> CacheEntry<T> {
    /// Create a new cache entry
    pub fn new(value: T, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            // A TTL past the clock's range never expires
            expires_at: ttl.and_then(|duration| now.checked_add(duration)),
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expiry| Instant::now() > expiry)
            .unwrap_or(false)
    }

    /// Update access metadata
    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}

/// Cache eviction policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least Recently Used
    LRU,
    /// Least Frequently Used
    LFU,
    /// First In First Out
    FIFO,
    /// Expired entries first, then oldest
    TTL,
}

/// In-memory cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub max_size: usize,
    /// Default time-to-live for entries (`None` = never expire)
    pub default_ttl: Option<Duration>,
    /// Eviction policy
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            default_ttl: None,
            eviction_policy: EvictionPolicy::LRU,
        }
    }
}

/// Cache metrics
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Total number of cache hits
    pub hits: usize,
    /// Total number of cache misses
    pub misses: usize,
    /// Total number of evictions
    pub evictions: usize,
    /// Current number of entries
    pub entries: usize,
}

impl CacheMetrics {
    /// Calculate hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

type Storage = HashMap<String, CacheEntry<CachedNodeResult>>;

/// Bounded in-memory [`NodeCacheStore`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryNodeCache {
    storage: Arc<RwLock<Storage>>,
    config: CacheConfig,
    metrics: Arc<RwLock<CacheMetrics>>,
}

impl InMemoryNodeCache {
    /// Cache with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache with explicit configuration
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Snapshot of the metrics
    pub async fn metrics(&self) -> CacheMetrics {
        self.metrics.read().await.clone()
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Whether the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.storage.read().await.is_empty()
    }

    fn victim(&self, storage: &Storage) -> Option<String> {
        let pick = |f: fn(&CacheEntry<CachedNodeResult>) -> Instant| {
            storage
                .iter()
                .min_by_key(|(_, entry)| f(entry))
                .map(|(k, _)| k.clone())
        };
        match self.config.eviction_policy {
            EvictionPolicy::LRU => pick(|e| e.last_accessed),
            EvictionPolicy::FIFO => pick(|e| e.created_at),
            EvictionPolicy::LFU => storage
                .iter()
                .min_by_key(|(_, entry)| (entry.access_count, entry.last_accessed))
                .map(|(k, _)| k.clone()),
            EvictionPolicy::TTL => storage
                .iter()
                .filter(|(_, entry)| entry.is_expired())
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(k, _)| k.clone())
                .or_else(|| pick(|e| e.created_at)),
        }
    }

    async fn insert(&self, fingerprint: &str, result: CachedNodeResult, ttl: Option<Duration>) {
        let mut storage = self.storage.write().await;
        let mut evicted = 0;
        if self.config.max_size > 0 {
            while storage.len() >= self.config.max_size && !storage.contains_key(fingerprint) {
                match self.victim(&storage) {
                    Some(key) => {
                        storage.remove(&key);
                        evicted += 1;
                    }
                    None => break,
                }
            }
        }
        storage.insert(fingerprint.to_string(), CacheEntry::new(result, ttl));

        let mut metrics = self.metrics.write().await;
        metrics.evictions += evicted;
        metrics.entries = storage.len();
    }
}

#[async_trait]
impl NodeCacheStore for InMemoryNodeCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<CachedNodeResult>> {
        let mut storage = self.storage.write().await;
        let found = match storage.get_mut(fingerprint) {
            Some(entry) if entry.is_expired() => {
                storage.remove(fingerprint);
                None
            }
            Some(entry) => {
                entry.touch();
                Some(entry.value.clone())
            }
            None => None,
        };

        let mut metrics = self.metrics.write().await;
        if found.is_some() {
            metrics.hits += 1;
        } else {
            metrics.misses += 1;
        }
        metrics.entries = storage.len();
        Ok(found)
    }

    async fn set(&self, fingerprint: &str, result: CachedNodeResult) -> Result<()> {
        self.insert(fingerprint, result, self.config.default_ttl).await;
        Ok(())
    }

    async fn set_with_ttl(&self, fingerprint: &str, result: CachedNodeResult, ttl: Option<Duration>) -> Result<()> {
        self.insert(fingerprint, result, ttl.or(self.config.default_ttl)).await;
        Ok(())
    }

    async fn exists(&self, fingerprint: &str) -> Result<bool> {
        Ok(self
            .storage
            .read()
            .await
            .get(fingerprint)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false))
    }

    async fn delete(&self, fingerprint: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.remove(fingerprint);
        self.metrics.write().await.entries = storage.len();
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.storage.write().await.clear();
        self.metrics.write().await.entries = 0;
        Ok(())
    }
}
