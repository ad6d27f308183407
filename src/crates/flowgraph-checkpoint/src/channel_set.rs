//! Namespaced collections of channels (state scopes)
//!
//! A [`ChannelSet`] is the state store of one scope: the root run, or one
//! nested sub-graph invocation. Cloning a `ChannelSet` clones the *handle*
//! (both clones see the same channels); [`ChannelSet::fork`] produces an
//! isolated deep copy for a parallel task, and [`ChannelSet::merge`] folds a
//! fork back using each channel's own semantics.
//!
//! Indexed access default-creates a [`LastValueChannel`], so handlers can
//! write `set("answer", ..)` without declaring the channel first.
//!
//! # Namespaces
//!
//! ```text
//! root                 (run scope)
//! root/summarize       (sub-graph node "summarize")
//! root/summarize/inner (sub-graph nested inside it)
//! ```
//!
//! Channels prefixed with `input:` and `output:` carry data across scope
//! boundaries; see [`INPUT_PREFIX`] and [`OUTPUT_PREFIX`].

use crate::channels::{AppendChannel, Channel, ChannelSnapshot, LastValueChannel, UpdateSemantics};
use crate::channels_ext::{BarrierChannel, EphemeralChannel};
use crate::error::{CheckpointError, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Namespace of the top-level scope
pub const ROOT_NAMESPACE: &str = "root";

/// Prefix of channels seeded into a child scope from its parent
pub const INPUT_PREFIX: &str = "input:";

/// Prefix of channels copied out of a child scope into the parent node's outputs
pub const OUTPUT_PREFIX: &str = "output:";

type ChannelMap = HashMap<String, Box<dyn Channel>>;

/// Thread-safe, namespaced collection of channels
#[derive(Clone)]
pub struct ChannelSet {
    namespace: String,
    inner: Arc<RwLock<ChannelMap>>,
}

impl ChannelSet {
    /// Create an empty root scope
    pub fn new() -> Self {
        Self::with_namespace(ROOT_NAMESPACE)
    }

    /// Create an empty scope with the given namespace
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Namespace of this scope
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create an empty nested scope named `<namespace>/<segment>`
    pub fn child_scope(&self, segment: &str) -> ChannelSet {
        Self::with_namespace(format!("{}/{}", self.namespace, segment))
    }

    /// Register a channel, replacing any channel with the same name
    pub fn register(&self, channel: Box<dyn Channel>) {
        let name = channel.name().to_string();
        self.inner.write().insert(name, channel);
    }

    /// Register an empty channel of the given semantics.
    ///
    /// Reducer channels need a reduce function and must be registered with
    /// [`ChannelSet::register`]. Barriers need a contribution count and are
    /// declared with [`ChannelSet::declare_barrier`].
    pub fn declare(&self, name: &str, semantics: UpdateSemantics) -> Result<()> {
        if semantics == UpdateSemantics::Barrier {
            return Err(CheckpointError::Invalid(format!(
                "barrier channel '{}' needs a required count; use declare_barrier",
                name
            )));
        }
        let channel = Self::empty_channel(name, semantics)?;
        self.register(channel);
        Ok(())
    }

    /// Register a barrier that opens after `required_count` contributions
    pub fn declare_barrier(&self, name: &str, required_count: usize) -> Result<()> {
        if required_count == 0 {
            return Err(CheckpointError::Invalid(format!(
                "barrier channel '{}' must require at least one contribution",
                name
            )));
        }
        self.register(Box::new(BarrierChannel::new(name, required_count)));
        Ok(())
    }

    /// Placeholder channel whose state is filled in by `from_checkpoint`
    fn empty_channel(name: &str, semantics: UpdateSemantics) -> Result<Box<dyn Channel>> {
        let channel: Box<dyn Channel> = match semantics {
            UpdateSemantics::LastValue => Box::new(LastValueChannel::new(name)),
            UpdateSemantics::Append => Box::new(AppendChannel::new(name)),
            UpdateSemantics::Barrier => Box::new(BarrierChannel::new(name, 0)),
            UpdateSemantics::Ephemeral => Box::new(EphemeralChannel::new(name)),
            UpdateSemantics::Reducer => {
                return Err(CheckpointError::Invalid(format!(
                    "reducer channel '{}' cannot be created without a reduce function",
                    name
                )))
            }
        };
        Ok(channel)
    }

    /// Run `f` against the named channel, default-creating a last-value channel
    pub fn with_channel<R>(&self, name: &str, f: impl FnOnce(&mut dyn Channel) -> R) -> R {
        let mut guard = self.inner.write();
        let channel = guard
            .entry(name.to_string())
            .or_insert_with(|| Box::new(LastValueChannel::new(name)) as Box<dyn Channel>);
        f(channel.as_mut())
    }

    /// Make sure a channel exists (default: last-value)
    pub fn ensure(&self, name: &str) {
        self.with_channel(name, |_| ());
    }

    /// Read a channel value, default-creating it when absent
    pub fn get(&self, name: &str) -> Result<Value> {
        if let Some(channel) = self.inner.read().get(name) {
            return channel.get();
        }
        self.with_channel(name, |c| c.get())
    }

    /// Read a channel value without creating it
    pub fn try_get(&self, name: &str) -> Option<Value> {
        self.inner
            .read()
            .get(name)
            .filter(|c| c.is_available())
            .and_then(|c| c.get().ok())
    }

    /// `set` on the named channel
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        self.with_channel(name, |c| c.set(value))
    }

    /// `update` on the named channel
    pub fn update(&self, name: &str, delta: Value) -> Result<()> {
        self.with_channel(name, |c| c.update(delta))
    }

    /// Clear the named channel if it exists
    pub fn clear(&self, name: &str) {
        if let Some(channel) = self.inner.write().get_mut(name) {
            channel.clear();
        }
    }

    /// Whether a channel with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    /// Version of the named channel
    pub fn version(&self, name: &str) -> Option<u64> {
        self.inner.read().get(name).map(|c| c.version())
    }

    /// Update discipline of the named channel
    pub fn semantics(&self, name: &str) -> Option<UpdateSemantics> {
        self.inner.read().get(name).map(|c| c.semantics())
    }

    /// Sorted channel names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True if the scope has no channels
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Values of every readable channel
    pub fn values(&self) -> HashMap<String, Value> {
        self.inner
            .read()
            .iter()
            .filter(|(_, c)| c.is_available())
            .filter_map(|(name, c)| c.get().ok().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Readable channels whose name starts with `prefix`, keyed without it
    pub fn values_with_prefix(&self, prefix: &str) -> HashMap<String, Value> {
        self.values()
            .into_iter()
            .filter_map(|(name, v)| name.strip_prefix(prefix).map(|k| (k.to_string(), v)))
            .collect()
    }

    /// Drop the value of every ephemeral channel
    pub fn clear_ephemeral(&self) {
        for channel in self.inner.write().values_mut() {
            if channel.semantics() == UpdateSemantics::Ephemeral {
                channel.clear();
            }
        }
    }

    /// Isolated deep copy with empty write journals
    pub fn fork(&self) -> ChannelSet {
        let copies = self
            .inner
            .read()
            .iter()
            .map(|(name, c)| (name.clone(), c.fork()))
            .collect();
        Self {
            namespace: self.namespace.clone(),
            inner: Arc::new(RwLock::new(copies)),
        }
    }

    /// Fold a fork's writes back into this scope.
    ///
    /// Channels that only exist in `other` are adopted as-is.
    pub fn merge(&self, other: &ChannelSet) -> Result<()> {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return Ok(());
        }
        let theirs = other.inner.read();
        let mut ours = self.inner.write();
        for (name, channel) in theirs.iter() {
            match ours.get_mut(name) {
                Some(existing) => existing.absorb(channel.as_ref())?,
                None => {
                    ours.insert(name.clone(), channel.fork());
                }
            }
        }
        Ok(())
    }

    /// Serializable state of every channel
    pub fn snapshot(&self) -> Result<HashMap<String, ChannelSnapshot>> {
        self.inner
            .read()
            .iter()
            .map(|(name, c)| Ok((name.clone(), c.snapshot()?)))
            .collect()
    }

    /// Restore channels from a snapshot.
    ///
    /// Existing channels are restored in place. Missing channels are created
    /// from their semantics; reducer channels that were not registered up
    /// front are skipped since their reduce function is not serializable.
    pub fn restore(&self, snapshot: HashMap<String, ChannelSnapshot>) -> Result<()> {
        let mut ours = self.inner.write();
        for (name, snap) in snapshot {
            if let Some(existing) = ours.get_mut(&name) {
                existing.from_checkpoint(snap.state, snap.version)?;
                continue;
            }
            if snap.semantics == UpdateSemantics::Reducer {
                tracing::warn!(
                    channel = %name,
                    namespace = %self.namespace,
                    "Skipping restore of unregistered reducer channel"
                );
                continue;
            }
            let mut channel = Self::empty_channel(&name, snap.semantics)?;
            channel.from_checkpoint(snap.state, snap.version)?;
            ours.insert(name, channel);
        }
        Ok(())
    }
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSet")
            .field("namespace", &self.namespace)
            .field("channels", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ReducerChannel;
    use serde_json::json;

    #[test]
    fn test_default_creates_last_value() {
        let set = ChannelSet::new();
        assert!(matches!(set.get("missing"), Err(CheckpointError::EmptyChannel(_))));
        assert!(set.contains("missing"));
        assert_eq!(set.semantics("missing"), Some(UpdateSemantics::LastValue));

        set.set("answer", json!(42)).unwrap();
        assert_eq!(set.get("answer").unwrap(), json!(42));
    }

    #[test]
    fn test_try_get_does_not_create() {
        let set = ChannelSet::new();
        assert!(set.try_get("ghost").is_none());
        assert!(!set.contains("ghost"));
    }

    #[test]
    fn test_clone_shares_fork_isolates() {
        let set = ChannelSet::new();
        let handle = set.clone();
        let fork = set.fork();

        handle.set("x", json!(1)).unwrap();
        assert_eq!(set.get("x").unwrap(), json!(1));
        assert!(fork.try_get("x").is_none());
    }

    #[test]
    fn test_merge_uses_channel_semantics() {
        let parent = ChannelSet::new();
        parent.declare("log", UpdateSemantics::Append).unwrap();
        parent.register(Box::new(ReducerChannel::sum("total")));
        parent.set("status", json!("start")).unwrap();

        let a = parent.fork();
        let b = parent.fork();
        a.update("log", json!("a")).unwrap();
        a.update("total", json!(2)).unwrap();
        b.update("log", json!("b")).unwrap();
        b.update("total", json!(3)).unwrap();
        b.set("status", json!("b-done")).unwrap();
        a.set("only_a", json!(true)).unwrap();

        parent.merge(&a).unwrap();
        parent.merge(&b).unwrap();

        assert_eq!(parent.get("log").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(parent.get("total").unwrap(), json!(5));
        assert_eq!(parent.get("status").unwrap(), json!("b-done"));
        assert_eq!(parent.get("only_a").unwrap(), json!(true));
    }

    #[test]
    fn test_merge_with_own_handle_is_noop() {
        let set = ChannelSet::new();
        set.set("x", json!(1)).unwrap();
        set.merge(&set.clone()).unwrap();
        assert_eq!(set.version("x"), Some(1));
    }

    #[test]
    fn test_clear_ephemeral_only() {
        let set = ChannelSet::new();
        set.declare("route", UpdateSemantics::Ephemeral).unwrap();
        set.set("route", json!("left")).unwrap();
        set.set("keep", json!(1)).unwrap();

        set.clear_ephemeral();
        assert!(set.try_get("route").is_none());
        assert_eq!(set.try_get("keep"), Some(json!(1)));
    }

    #[test]
    fn test_prefix_values_and_child_scope() {
        let set = ChannelSet::new();
        set.set("input:query", json!("rust")).unwrap();
        set.set("output:answer", json!("ok")).unwrap();

        let inputs = set.values_with_prefix(INPUT_PREFIX);
        assert_eq!(inputs.get("query"), Some(&json!("rust")));
        assert_eq!(inputs.len(), 1);

        let child = set.child_scope("summarize");
        assert_eq!(child.namespace(), "root/summarize");
        assert!(child.is_empty());
    }

    #[test]
    fn test_snapshot_restore() {
        let set = ChannelSet::new();
        set.declare("log", UpdateSemantics::Append).unwrap();
        set.update("log", json!([1, 2])).unwrap();
        set.set("status", json!("done")).unwrap();
        set.register(Box::new(ReducerChannel::sum("total")));
        set.update("total", json!(7)).unwrap();

        let snapshot = set.snapshot().unwrap();
        let restored = ChannelSet::new();
        restored.restore(snapshot.clone()).unwrap();
        assert_eq!(restored.get("log").unwrap(), json!([1, 2]));
        assert_eq!(restored.version("log"), Some(2));
        assert_eq!(restored.get("status").unwrap(), json!("done"));
        assert!(!restored.contains("total"));

        let with_reducer = ChannelSet::new();
        with_reducer.register(Box::new(ReducerChannel::sum("total")));
        with_reducer.restore(snapshot).unwrap();
        assert_eq!(with_reducer.get("total").unwrap(), json!(7));
    }

    #[test]
    fn test_declare_reducer_rejected() {
        let set = ChannelSet::new();
        assert!(set.declare("total", UpdateSemantics::Reducer).is_err());
    }

    #[test]
    fn test_barrier_requires_a_count() {
        let set = ChannelSet::new();
        assert!(set.declare("joined", UpdateSemantics::Barrier).is_err());
        assert!(!set.contains("joined"));
        assert!(set.declare_barrier("joined", 0).is_err());

        set.declare_barrier("joined", 2).unwrap();
        assert_eq!(set.semantics("joined"), Some(UpdateSemantics::Barrier));
        set.set("joined", json!("a")).unwrap();
        assert!(set.get("joined").is_err());
        set.set("joined", json!("b")).unwrap();
        assert_eq!(set.get("joined").unwrap(), json!(["a", "b"]));

        let restored = ChannelSet::new();
        restored.restore(set.snapshot().unwrap()).unwrap();
        assert_eq!(restored.get("joined").unwrap(), json!(["a", "b"]));
    }
}
