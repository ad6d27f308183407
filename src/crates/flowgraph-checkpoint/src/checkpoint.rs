//! Checkpoint data structures
//!
//! A [`GraphCheckpoint`] captures enough of a run to resume it without
//! re-running completed nodes: the completed-node set, each node's outputs,
//! per-node fingerprints, channel state, execution counts, and a pending
//! suspension if the run paused for external input.
//!
//! Checkpoints are immutable once written. Each one carries a unique
//! `checkpoint_id` plus a per-execution `sequence` used to order history.
//!
//! ```text
//! execution "run-7"
//!   seq 0  completed {}          (run started)
//!   seq 1  completed {A}         (after layer 0)
//!   seq 2  completed {A,B,C}     (after layer 1)
//!   seq 3  completed {A,B,C}     suspension: node D, token "approve"
//! ```

use crate::channels::ChannelSnapshot;
use crate::error::{CheckpointError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Schema version written by this crate
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Checkpoint identifier
pub type CheckpointId = String;

/// Outputs of a single node, keyed by output name
pub type NodeOutputs = HashMap<String, Value>;

/// A pending human-in-the-loop pause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendState {
    /// Node that requested the suspension
    pub node_id: String,
    /// Token the caller must present to resume
    pub token: String,
    /// Partial value supplied by the node when it suspended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_value: Option<Value>,
    /// State of the nested run when `node_id` is a sub-graph node that
    /// suspended because one of its own nodes did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<GraphCheckpoint>>,
}

impl SuspendState {
    /// Create a suspension record
    pub fn new(node_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            token: token.into(),
            resume_value: None,
            nested: None,
        }
    }

    /// Attach the partial value produced at suspension time
    pub fn with_resume_value(mut self, value: Value) -> Self {
        self.resume_value = Some(value);
        self
    }

    /// Attach the suspended nested run
    pub fn with_nested(mut self, checkpoint: GraphCheckpoint) -> Self {
        self.nested = Some(Box::new(checkpoint));
        self
    }

    /// Node ids from this run down to the node that actually suspended
    pub fn path(&self) -> Vec<&str> {
        let mut path = vec![self.node_id.as_str()];
        let mut current = self;
        while let Some(inner) = current.nested.as_ref().and_then(|cp| cp.suspension.as_ref()) {
            path.push(inner.node_id.as_str());
            current = inner;
        }
        path
    }
}

/// Durable snapshot of an execution's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphCheckpoint {
    /// Execution this checkpoint belongs to
    pub execution_id: String,

    /// Unique checkpoint id
    pub checkpoint_id: CheckpointId,

    /// Monotonic position within the execution's history
    pub sequence: u64,

    /// Schema version of this payload
    pub schema_version: u32,

    /// Nodes that finished successfully (or were served from cache)
    pub completed_nodes: BTreeSet<String>,

    /// Nodes skipped by an inactive edge or a failed upstream node
    #[serde(default)]
    pub skipped_nodes: BTreeSet<String>,

    /// Outputs of completed nodes
    pub node_outputs: HashMap<String, NodeOutputs>,

    /// Fingerprints computed for completed nodes
    #[serde(default)]
    pub node_fingerprints: HashMap<String, String>,

    /// Channel state of the root scope
    #[serde(default)]
    pub channel_values: HashMap<String, ChannelSnapshot>,

    /// Per-node execution counts
    #[serde(default)]
    pub execution_counts: HashMap<String, u32>,

    /// Pending suspension, if the run paused
    #[serde(default)]
    pub suspension: Option<SuspendState>,

    /// Creation time
    pub timestamp: DateTime<Utc>,

    /// Free-form metadata (layer index, status, ...)
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl GraphCheckpoint {
    /// Create an empty checkpoint for an execution
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            checkpoint_id: Uuid::new_v4().to_string(),
            sequence: 0,
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            completed_nodes: BTreeSet::new(),
            skipped_nodes: BTreeSet::new(),
            node_outputs: HashMap::new(),
            node_fingerprints: HashMap::new(),
            channel_values: HashMap::new(),
            execution_counts: HashMap::new(),
            suspension: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Set the sequence number
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Mark a node complete and record its outputs
    pub fn with_node_output(mut self, node_id: impl Into<String>, outputs: NodeOutputs) -> Self {
        let node_id = node_id.into();
        self.completed_nodes.insert(node_id.clone());
        self.node_outputs.insert(node_id, outputs);
        self
    }

    /// Record a node fingerprint
    pub fn with_fingerprint(mut self, node_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        self.node_fingerprints.insert(node_id.into(), fingerprint.into());
        self
    }

    /// Attach a pending suspension
    pub fn with_suspension(mut self, suspension: SuspendState) -> Self {
        self.suspension = Some(suspension);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the execution was paused when this checkpoint was taken
    pub fn is_suspended(&self) -> bool {
        self.suspension.is_some()
    }

    /// Reject payloads this crate cannot interpret
    pub fn validate(&self) -> Result<()> {
        if self.execution_id.is_empty() {
            return Err(CheckpointError::Invalid("execution_id is empty".to_string()));
        }
        if self.schema_version > CHECKPOINT_SCHEMA_VERSION {
            return Err(CheckpointError::Invalid(format!(
                "unsupported schema version {} (max {})",
                self.schema_version, CHECKPOINT_SCHEMA_VERSION
            )));
        }
        Ok(())
    }

    /// Lightweight listing entry
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            execution_id: self.execution_id.clone(),
            checkpoint_id: self.checkpoint_id.clone(),
            sequence: self.sequence,
            timestamp: self.timestamp,
            completed_count: self.completed_nodes.len(),
            suspended: self.is_suspended(),
        }
    }
}

/// Listing entry returned by `list_checkpoints`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// Execution id
    pub execution_id: String,
    /// Checkpoint id
    pub checkpoint_id: CheckpointId,
    /// Sequence number
    pub sequence: u64,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Number of completed nodes
    pub completed_count: usize,
    /// Whether a suspension was pending
    pub suspended: bool,
}
