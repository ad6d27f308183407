//! Channel abstractions for state management
//!
//! A channel is a single named piece of mutable state with a fixed update
//! discipline. Every successful write bumps the channel's `version`, which is
//! what the merge step uses to pick a winner between parallel writers.
//!
//! Channels keep a small journal of the writes made since they were last
//! [forked](Channel::fork). When a layer fans out, each task works on a fork,
//! and the parent later [absorbs](Channel::absorb) every fork's journal using
//! the channel's own semantics:
//!
//! ```text
//!   parent ──fork──► copy A ──writes──┐
//!          ──fork──► copy B ──writes──┤
//!                                     ▼
//!   parent.absorb(A); parent.absorb(B)
//!     LastValue : highest version wins (ties: absorb order)
//!     Append    : concatenation of all journals
//!     Reducer   : every journaled delta re-applied through reduce_fn
//!     Barrier   : union of contributions
//!     Ephemeral : last present value
//! ```
//!
//! The core disciplines live here; [`crate::channels_ext`] holds the barrier
//! and ephemeral channels.

use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// Update discipline of a channel, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSemantics {
    /// `set` overwrites, `update` is rejected
    LastValue,
    /// `set` seeds a one-element list, `update` appends
    Append,
    /// Only `update`, folded through a reduce function
    Reducer,
    /// Collects values until a required count is reached
    Barrier,
    /// At most one value, cleared at the start of each step
    Ephemeral,
}

/// Serializable state of one channel, as stored in a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Update discipline of the channel
    pub semantics: UpdateSemantics,
    /// Version at snapshot time
    pub version: u64,
    /// Channel-specific state payload
    pub state: Value,
}

/// Base trait for all channels
///
/// Implementations are not internally synchronized; the owning
/// [`ChannelSet`](crate::ChannelSet) guards them with a lock.
pub trait Channel: Send + Sync + Debug {
    /// Channel name
    fn name(&self) -> &str;

    /// Update discipline
    fn semantics(&self) -> UpdateSemantics;

    /// Number of writes applied so far (monotonic)
    fn version(&self) -> u64;

    /// Get the current value of the channel
    ///
    /// # Errors
    ///
    /// Returns `EmptyChannel` if a last-value channel has never been written,
    /// or `InvalidState` for an unsatisfied barrier.
    fn get(&self) -> Result<Value>;

    /// Replace the channel value
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` for reducer channels.
    fn set(&mut self, value: Value) -> Result<()>;

    /// Apply a delta to the channel
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` for last-value channels.
    fn update(&mut self, delta: Value) -> Result<()>;

    /// Check if `get` would currently succeed
    fn is_available(&self) -> bool {
        self.get().is_ok()
    }

    /// Drop the held value(s)
    fn clear(&mut self);

    /// Writes recorded since this channel was forked (or created)
    fn pending(&self) -> &[Value];

    /// Copy this channel with an empty write journal
    fn fork(&self) -> Box<dyn Channel>;

    /// Fold the journaled writes of a forked copy into this channel
    fn absorb(&mut self, other: &dyn Channel) -> Result<()>;

    /// Create a serializable representation of the channel state
    fn checkpoint(&self) -> Result<Value>;

    /// Restore the channel from a checkpoint payload and version
    fn from_checkpoint(&mut self, checkpoint: Value, version: u64) -> Result<()>;

    /// Snapshot including semantics and version
    fn snapshot(&self) -> Result<ChannelSnapshot> {
        Ok(ChannelSnapshot {
            semantics: self.semantics(),
            version: self.version(),
            state: self.checkpoint()?,
        })
    }
}

/// Fails unless both channels share the same discipline.
pub(crate) fn ensure_same_semantics(this: &dyn Channel, other: &dyn Channel) -> Result<()> {
    if this.semantics() != other.semantics() {
        return Err(CheckpointError::Invalid(format!(
            "cannot merge channel '{}' ({:?}) with {:?}",
            this.name(),
            this.semantics(),
            other.semantics()
        )));
    }
    Ok(())
}

/// `{"value": v}` when present, `{}` otherwise, so a stored `null` survives.
pub(crate) fn optional_state(value: &Option<Value>) -> Value {
    match value {
        Some(v) => serde_json::json!({ "value": v }),
        None => Value::Object(serde_json::Map::new()),
    }
}

pub(crate) fn read_optional_state(name: &str, checkpoint: Value) -> Result<Option<Value>> {
    match checkpoint {
        Value::Object(mut map) => Ok(map.remove("value")),
        other => Err(CheckpointError::Invalid(format!(
            "channel '{}' checkpoint must be an object, got {}",
            name, other
        ))),
    }
}

/// LastValue channel - stores only the latest value
#[derive(Debug, Clone)]
pub struct LastValueChannel {
    name: String,
    value: Option<Value>,
    version: u64,
    journal: Vec<Value>,
}

impl LastValueChannel {
    /// Create a new, empty LastValue channel
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            version: 0,
            journal: Vec::new(),
        }
    }

    /// Create a new LastValue channel holding an initial value
    pub fn with_value(name: impl Into<String>, value: Value) -> Self {
        let mut channel = Self::new(name);
        channel.value = Some(value);
        channel.version = 1;
        channel
    }
}

impl Channel for LastValueChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn semantics(&self) -> UpdateSemantics {
        UpdateSemantics::LastValue
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn get(&self) -> Result<Value> {
        self.value
            .clone()
            .ok_or_else(|| CheckpointError::EmptyChannel(self.name.clone()))
    }

    fn set(&mut self, value: Value) -> Result<()> {
        self.journal.push(value.clone());
        self.value = Some(value);
        self.version += 1;
        Ok(())
    }

    fn update(&mut self, _delta: Value) -> Result<()> {
        Err(CheckpointError::unsupported(&self.name, "update"))
    }

    fn is_available(&self) -> bool {
        self.value.is_some()
    }

    fn clear(&mut self) {
        self.value = None;
    }

    fn pending(&self) -> &[Value] {
        &self.journal
    }

    fn fork(&self) -> Box<dyn Channel> {
        let mut copy = self.clone();
        copy.journal.clear();
        Box::new(copy)
    }

    fn absorb(&mut self, other: &dyn Channel) -> Result<()> {
        ensure_same_semantics(self, other)?;
        let Some(last) = other.pending().last() else {
            return Ok(());
        };
        if other.version() >= self.version {
            self.value = Some(last.clone());
            self.journal.push(last.clone());
            self.version = other.version();
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<Value> {
        Ok(optional_state(&self.value))
    }

    fn from_checkpoint(&mut self, checkpoint: Value, version: u64) -> Result<()> {
        self.value = read_optional_state(&self.name, checkpoint)?;
        self.version = version;
        self.journal.clear();
        Ok(())
    }
}

/// Append channel - ordered list of every value written
#[derive(Debug, Clone)]
pub struct AppendChannel {
    name: String,
    values: Vec<Value>,
    version: u64,
    journal: Vec<Value>,
}

impl AppendChannel {
    /// Create a new, empty Append channel
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            version: 0,
            journal: Vec::new(),
        }
    }

    /// Borrow the accumulated items
    pub fn items(&self) -> &[Value] {
        &self.values
    }

    fn push(&mut self, item: Value) {
        self.journal.push(item.clone());
        self.values.push(item);
        self.version += 1;
    }
}

impl Channel for AppendChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn semantics(&self) -> UpdateSemantics {
        UpdateSemantics::Append
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn get(&self) -> Result<Value> {
        Ok(Value::Array(self.values.clone()))
    }

    fn set(&mut self, value: Value) -> Result<()> {
        self.values.clear();
        self.push(value);
        Ok(())
    }

    fn update(&mut self, delta: Value) -> Result<()> {
        match delta {
            Value::Array(items) => {
                for item in items {
                    self.push(item);
                }
            }
            item => self.push(item),
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        !self.values.is_empty()
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    fn pending(&self) -> &[Value] {
        &self.journal
    }

    fn fork(&self) -> Box<dyn Channel> {
        let mut copy = self.clone();
        copy.journal.clear();
        Box::new(copy)
    }

    fn absorb(&mut self, other: &dyn Channel) -> Result<()> {
        ensure_same_semantics(self, other)?;
        for item in other.pending() {
            self.push(item.clone());
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<Value> {
        Ok(Value::Array(self.values.clone()))
    }

    fn from_checkpoint(&mut self, checkpoint: Value, version: u64) -> Result<()> {
        match checkpoint {
            Value::Array(items) => {
                self.values = items;
                self.version = version;
                self.journal.clear();
                Ok(())
            }
            _ => Err(CheckpointError::Invalid(format!(
                "append channel '{}' checkpoint must be an array",
                self.name
            ))),
        }
    }
}

/// Reduce function type for [`ReducerChannel`]
pub type ReduceFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Reducer channel - folds every delta into the current value
#[derive(Clone)]
pub struct ReducerChannel {
    name: String,
    current: Value,
    reduce: ReduceFn,
    version: u64,
    journal: Vec<Value>,
}

impl ReducerChannel {
    /// Create a reducer channel from an initial value and a reduce function
    pub fn new<F>(name: impl Into<String>, initial: Value, reduce: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            current: initial,
            reduce: Arc::new(reduce),
            version: 0,
            journal: Vec::new(),
        }
    }

    /// Numeric sum starting at zero
    pub fn sum(name: impl Into<String>) -> Self {
        Self::new(name, serde_json::json!(0), |acc, delta| {
            match (acc.as_i64(), delta.as_i64()) {
                (Some(a), Some(b)) => serde_json::json!(a + b),
                _ => serde_json::json!(acc.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0)),
            }
        })
    }

    /// Shallow object merge starting at `{}`; later keys overwrite earlier ones
    pub fn merge_objects(name: impl Into<String>) -> Self {
        Self::new(name, serde_json::json!({}), |acc, delta| {
            let mut merged = acc.as_object().cloned().unwrap_or_default();
            if let Some(patch) = delta.as_object() {
                for (k, v) in patch {
                    merged.insert(k.clone(), v.clone());
                }
            }
            Value::Object(merged)
        })
    }

    fn apply(&mut self, delta: Value) {
        self.current = (self.reduce)(&self.current, &delta);
        self.journal.push(delta);
        self.version += 1;
    }
}

impl Debug for ReducerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerChannel")
            .field("name", &self.name)
            .field("current", &self.current)
            .field("version", &self.version)
            .field("reduce", &"<function>")
            .finish()
    }
}

impl Channel for ReducerChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn semantics(&self) -> UpdateSemantics {
        UpdateSemantics::Reducer
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn get(&self) -> Result<Value> {
        Ok(self.current.clone())
    }

    fn set(&mut self, _value: Value) -> Result<()> {
        Err(CheckpointError::unsupported(&self.name, "set"))
    }

    fn update(&mut self, delta: Value) -> Result<()> {
        self.apply(delta);
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn clear(&mut self) {
        // Reducers have no notion of "absent"; nothing to drop.
    }

    fn pending(&self) -> &[Value] {
        &self.journal
    }

    fn fork(&self) -> Box<dyn Channel> {
        let mut copy = self.clone();
        copy.journal.clear();
        Box::new(copy)
    }

    fn absorb(&mut self, other: &dyn Channel) -> Result<()> {
        ensure_same_semantics(self, other)?;
        for delta in other.pending() {
            self.apply(delta.clone());
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<Value> {
        Ok(self.current.clone())
    }

    fn from_checkpoint(&mut self, checkpoint: Value, version: u64) -> Result<()> {
        self.current = checkpoint;
        self.version = version;
        self.journal.clear();
        Ok(())
    }
}
