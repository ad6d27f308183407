//! Coordination channels: barrier and ephemeral.
//!
//! - [`BarrierChannel`] collects contributions until `required_count` is reached
//! - [`EphemeralChannel`] holds a transient routing signal for a single step

use crate::channels::{
    ensure_same_semantics, optional_state, read_optional_state, Channel, UpdateSemantics,
};
use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Barrier channel - readable only once enough values were contributed.
///
/// `set` contributes exactly one value; `update` contributes every element of
/// an array (or the single value otherwise). Reading before the barrier is
/// satisfied fails with `InvalidState`.
#[derive(Debug, Clone)]
pub struct BarrierChannel {
    name: String,
    required_count: usize,
    values: Vec<Value>,
    version: u64,
    journal: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
struct BarrierState {
    required_count: usize,
    values: Vec<Value>,
}

impl BarrierChannel {
    /// Create a barrier that opens after `required_count` contributions
    pub fn new(name: impl Into<String>, required_count: usize) -> Self {
        Self {
            name: name.into(),
            required_count,
            values: Vec::new(),
            version: 0,
            journal: Vec::new(),
        }
    }

    /// Number of contributions required
    pub fn required_count(&self) -> usize {
        self.required_count
    }

    /// Number of contributions collected so far
    pub fn current_count(&self) -> usize {
        self.values.len()
    }

    /// True once `current_count() >= required_count()`
    pub fn is_satisfied(&self) -> bool {
        self.values.len() >= self.required_count
    }

    /// Clear collected values and count
    pub fn reset(&mut self) {
        self.values.clear();
    }

    fn contribute(&mut self, value: Value) {
        self.journal.push(value.clone());
        self.values.push(value);
        self.version += 1;
    }
}

impl Channel for BarrierChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn semantics(&self) -> UpdateSemantics {
        UpdateSemantics::Barrier
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn get(&self) -> Result<Value> {
        if !self.is_satisfied() {
            return Err(CheckpointError::InvalidState {
                channel: self.name.clone(),
                reason: format!(
                    "barrier has {} of {} required values",
                    self.values.len(),
                    self.required_count
                ),
            });
        }
        Ok(Value::Array(self.values.clone()))
    }

    fn set(&mut self, value: Value) -> Result<()> {
        self.contribute(value);
        Ok(())
    }

    fn update(&mut self, delta: Value) -> Result<()> {
        match delta {
            Value::Array(items) => items.into_iter().for_each(|item| self.contribute(item)),
            single => self.contribute(single),
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.is_satisfied()
    }

    fn clear(&mut self) {
        self.reset();
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
        for value in other.pending() {
            self.contribute(value.clone());
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<Value> {
        Ok(serde_json::to_value(BarrierState {
            required_count: self.required_count,
            values: self.values.clone(),
        })?)
    }

    fn from_checkpoint(&mut self, checkpoint: Value, version: u64) -> Result<()> {
        let state: BarrierState = serde_json::from_value(checkpoint)?;
        self.required_count = state.required_count;
        self.values = state.values;
        self.version = version;
        self.journal.clear();
        Ok(())
    }
}

/// Ephemeral channel - at most one value, dropped at the next step boundary
#[derive(Debug, Clone)]
pub struct EphemeralChannel {
    name: String,
    value: Option<Value>,
    version: u64,
    journal: Vec<Value>,
}

impl EphemeralChannel {
    /// Create an empty ephemeral channel
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            version: 0,
            journal: Vec::new(),
        }
    }

    /// Whether a value is currently present
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

impl Channel for EphemeralChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn semantics(&self) -> UpdateSemantics {
        UpdateSemantics::Ephemeral
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

    fn update(&mut self, delta: Value) -> Result<()> {
        self.set(delta)
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
        if let Some(last) = other.pending().last() {
            self.set(last.clone())?;
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
