//! Per-run execution context
//!
//! An [`ExecutionContext`] is the mutable record of one orchestration run:
//! which nodes completed or were skipped, how often each ran, the run log,
//! tags, progress counters, metrics, node outputs and fingerprints, and the
//! channel state.
//!
//! # Parallel Layers
//!
//! ```text
//!                 parent context
//!          ┌───────────┼───────────┐
//!        fork()      fork()      fork()      isolated copies
//!          │           │           │         (shared Arc<Graph>)
//!        node B      node C      node D      run concurrently
//!          │           │           │
//!          └───────────┼───────────┘
//!                merge(copy) × 3             semantics-aware fold
//! ```
//!
//! A fork shares the immutable graph and deep-copies everything mutable. Merge
//! unions completed/skipped sets, takes the max of execution counts,
//! concatenates logs in timestamp order, unions tags per key, adds metric
//! deltas, and folds channels through [`ChannelSet::merge`].

use crate::error::Result;
use crate::graph::Graph;
use chrono::{DateTime, Utc};
use flowgraph_checkpoint::{ChannelSet, GraphCheckpoint, NodeOutputs, SuspendState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Severity of a run log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One entry of the per-run log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
}

/// Snapshot of run progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    /// Completed work nodes
    pub completed: usize,
    /// Skipped work nodes
    pub skipped: usize,
    /// Work nodes in the graph (Start/End excluded)
    pub total: usize,
    /// Index of the layer being executed
    pub current_layer_index: usize,
    /// Number of layers
    pub total_layers: usize,
}

impl ExecutionProgress {
    /// Fraction of resolved work nodes in `[0, 1]`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            ((self.completed + self.skipped) as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Mutable state of one orchestration run
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    execution_id: String,
    graph: Arc<Graph>,
    channels: ChannelSet,
    completed_nodes: BTreeSet<String>,
    skipped_nodes: BTreeSet<String>,
    execution_counts: HashMap<String, u32>,
    log_entries: Vec<LogEntry>,
    tags: HashMap<String, Vec<String>>,
    current_node_id: Option<String>,
    current_layer_index: usize,
    total_layers: usize,
    metrics: HashMap<String, f64>,
    metrics_baseline: HashMap<String, f64>,
    node_outputs: HashMap<String, NodeOutputs>,
    node_fingerprints: HashMap<String, String>,
    suspension: Option<SuspendState>,
    pending_resumes: HashMap<String, PendingResume>,
    cancellation: CancellationToken,
    depth: usize,
}

/// Resume value waiting for a suspended sub-graph node to run again
#[derive(Debug, Clone)]
pub(crate) struct PendingResume {
    pub value: Value,
    pub checkpoint: GraphCheckpoint,
}

impl ExecutionContext {
    /// Fresh root context with a generated execution id
    pub fn for_graph(graph: Arc<Graph>) -> Self {
        Self::new(Uuid::new_v4().to_string(), graph)
    }

    /// Fresh root context
    pub fn new(execution_id: impl Into<String>, graph: Arc<Graph>) -> Self {
        Self::with_channels(execution_id, graph, ChannelSet::new())
    }

    /// Fresh context over an existing channel scope
    pub fn with_channels(execution_id: impl Into<String>, graph: Arc<Graph>, channels: ChannelSet) -> Self {
        Self {
            execution_id: execution_id.into(),
            graph,
            channels,
            completed_nodes: BTreeSet::new(),
            skipped_nodes: BTreeSet::new(),
            execution_counts: HashMap::new(),
            log_entries: Vec::new(),
            tags: HashMap::new(),
            current_node_id: None,
            current_layer_index: 0,
            total_layers: 0,
            metrics: HashMap::new(),
            metrics_baseline: HashMap::new(),
            node_outputs: HashMap::new(),
            node_fingerprints: HashMap::new(),
            suspension: None,
            pending_resumes: HashMap::new(),
            cancellation: CancellationToken::new(),
            depth: 0,
        }
    }

    /// Context for the nested graph of sub-graph node `node_id`.
    ///
    /// The child gets execution id `<parent>::<node>`, an empty channel scope
    /// `<namespace>/<node>`, and depth + 1.
    pub fn child(&self, node_id: &str, graph: Arc<Graph>) -> Self {
        let mut child = Self::with_channels(
            format!(
                "{}{}{}",
                self.execution_id,
                crate::artifact::EXECUTION_ID_SEPARATOR,
                node_id
            ),
            graph,
            self.channels.child_scope(node_id),
        );
        child.depth = self.depth + 1;
        child.cancellation = self.cancellation.clone();
        child
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Nesting depth (0 for the root run)
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_completed(&self, node_id: &str) -> bool {
        self.completed_nodes.contains(node_id)
    }

    pub fn is_skipped(&self, node_id: &str) -> bool {
        self.skipped_nodes.contains(node_id)
    }

    pub fn completed_nodes(&self) -> &BTreeSet<String> {
        &self.completed_nodes
    }

    pub fn skipped_nodes(&self) -> &BTreeSet<String> {
        &self.skipped_nodes
    }

    /// Record a node as completed with its outputs
    pub fn mark_completed(&mut self, node_id: &str, outputs: NodeOutputs) {
        self.skipped_nodes.remove(node_id);
        self.completed_nodes.insert(node_id.to_string());
        self.node_outputs.insert(node_id.to_string(), outputs);
    }

    pub fn mark_skipped(&mut self, node_id: &str) {
        if !self.completed_nodes.contains(node_id) {
            self.skipped_nodes.insert(node_id.to_string());
        }
    }

    /// Increment and return the execution count of a node
    pub fn record_execution(&mut self, node_id: &str) -> u32 {
        let count = self.execution_counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn execution_count(&self, node_id: &str) -> u32 {
        self.execution_counts.get(node_id).copied().unwrap_or(0)
    }

    /// Outputs recorded for a node
    pub fn node_output(&self, node_id: &str) -> Option<&NodeOutputs> {
        self.node_outputs.get(node_id)
    }

    pub fn node_outputs(&self) -> &HashMap<String, NodeOutputs> {
        &self.node_outputs
    }

    /// Record outputs without completing the node (used for the Start node)
    pub fn set_node_output(&mut self, node_id: &str, outputs: NodeOutputs) {
        self.node_outputs.insert(node_id.to_string(), outputs);
    }

    pub fn fingerprint(&self, node_id: &str) -> Option<&str> {
        self.node_fingerprints.get(node_id).map(String::as_str)
    }

    pub fn node_fingerprints(&self) -> &HashMap<String, String> {
        &self.node_fingerprints
    }

    pub fn set_fingerprint(&mut self, node_id: &str, fingerprint: impl Into<String>) {
        self.node_fingerprints
            .insert(node_id.to_string(), fingerprint.into());
    }

    pub fn suspension(&self) -> Option<&SuspendState> {
        self.suspension.as_ref()
    }

    pub fn set_suspension(&mut self, suspension: Option<SuspendState>) {
        self.suspension = suspension;
    }

    /// Token of the run this context belongs to
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub(crate) fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    pub(crate) fn set_pending_resume(&mut self, node_id: &str, pending: PendingResume) {
        self.pending_resumes.insert(node_id.to_string(), pending);
    }

    pub(crate) fn take_pending_resume(&mut self, node_id: &str) -> Option<PendingResume> {
        self.pending_resumes.remove(node_id)
    }

    pub(crate) fn has_pending_resume(&self, node_id: &str) -> bool {
        self.pending_resumes.contains_key(node_id)
    }

    /// Append a log entry stamped now
    pub fn log(&mut self, level: LogLevel, node_id: Option<&str>, message: impl Into<String>) {
        self.log_entries.push(LogEntry {
            timestamp: Utc::now(),
            level,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        &self.log_entries
    }

    /// Add `value` under tag `key` unless already present
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let values = self.tags.entry(key.into()).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    pub fn tags(&self) -> &HashMap<String, Vec<String>> {
        &self.tags
    }

    pub fn increment_metric(&mut self, name: &str, delta: f64) {
        *self.metrics.entry(name.to_string()).or_insert(0.0) += delta;
    }

    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }

    pub fn metrics(&self) -> &HashMap<String, f64> {
        &self.metrics
    }

    pub fn current_node_id(&self) -> Option<&str> {
        self.current_node_id.as_deref()
    }

    pub fn set_current_node(&mut self, node_id: Option<&str>) {
        self.current_node_id = node_id.map(str::to_string);
    }

    /// Record the layer about to run
    pub fn enter_layer(&mut self, index: usize, total_layers: usize) {
        self.current_layer_index = index;
        self.total_layers = total_layers;
    }

    pub fn progress(&self) -> ExecutionProgress {
        let work: BTreeSet<&str> = self
            .graph
            .nodes()
            .iter()
            .filter(|n| !n.is_boundary())
            .map(|n| n.id.as_str())
            .collect();
        ExecutionProgress {
            completed: self
                .completed_nodes
                .iter()
                .filter(|id| work.contains(id.as_str()))
                .count(),
            skipped: self
                .skipped_nodes
                .iter()
                .filter(|id| work.contains(id.as_str()))
                .count(),
            total: work.len(),
            current_layer_index: self.current_layer_index,
            total_layers: self.total_layers,
        }
    }

    /// Start a new execution step: ephemeral channels lose their values
    pub fn begin_step(&mut self) {
        self.channels.clear_ephemeral();
    }

    /// Isolated copy for one parallel task
    pub fn fork(&self) -> Self {
        Self {
            execution_id: self.execution_id.clone(),
            graph: Arc::clone(&self.graph),
            channels: self.channels.fork(),
            completed_nodes: self.completed_nodes.clone(),
            skipped_nodes: self.skipped_nodes.clone(),
            execution_counts: self.execution_counts.clone(),
            log_entries: Vec::new(),
            tags: self.tags.clone(),
            current_node_id: self.current_node_id.clone(),
            current_layer_index: self.current_layer_index,
            total_layers: self.total_layers,
            metrics: self.metrics.clone(),
            metrics_baseline: self.metrics.clone(),
            node_outputs: self.node_outputs.clone(),
            node_fingerprints: self.node_fingerprints.clone(),
            suspension: self.suspension.clone(),
            pending_resumes: HashMap::new(),
            cancellation: self.cancellation.clone(),
            depth: self.depth,
        }
    }

    /// Fold a fork back into this context
    pub fn merge(&mut self, other: Self) -> Result<()> {
        self.channels.merge(&other.channels)?;

        self.completed_nodes.extend(other.completed_nodes);
        for id in other.skipped_nodes {
            if !self.completed_nodes.contains(&id) {
                self.skipped_nodes.insert(id);
            }
        }
        let completed = &self.completed_nodes;
        self.skipped_nodes.retain(|id| !completed.contains(id));

        for (id, count) in other.execution_counts {
            let ours = self.execution_counts.entry(id).or_insert(0);
            *ours = (*ours).max(count);
        }

        self.log_entries.extend(other.log_entries);
        self.log_entries.sort_by_key(|entry| entry.timestamp);

        for (key, values) in other.tags {
            for value in values {
                self.add_tag(key.clone(), value);
            }
        }

        for (name, value) in other.metrics {
            let base = other.metrics_baseline.get(&name).copied().unwrap_or(0.0);
            let delta = value - base;
            if delta != 0.0 {
                self.increment_metric(&name, delta);
            }
        }

        self.node_outputs.extend(other.node_outputs);
        self.node_fingerprints.extend(other.node_fingerprints);
        if self.suspension.is_none() {
            self.suspension = other.suspension;
        }
        Ok(())
    }

    /// Capture a checkpoint of the current state
    pub fn to_checkpoint(&self, sequence: u64) -> Result<GraphCheckpoint> {
        let mut checkpoint = GraphCheckpoint::new(self.execution_id.clone()).with_sequence(sequence);
        checkpoint.completed_nodes = self.completed_nodes.clone();
        checkpoint.skipped_nodes = self.skipped_nodes.clone();
        checkpoint.node_outputs = self.node_outputs.clone();
        checkpoint.node_fingerprints = self.node_fingerprints.clone();
        checkpoint.channel_values = self.channels.snapshot()?;
        checkpoint.execution_counts = self.execution_counts.clone();
        checkpoint.suspension = self.suspension.clone();
        checkpoint.metadata.insert("depth".into(), Value::from(self.depth));
        checkpoint
            .metadata
            .insert("layer_index".into(), Value::from(self.current_layer_index));
        checkpoint
            .metadata
            .insert("metrics".into(), serde_json::to_value(&self.metrics)?);
        checkpoint
            .metadata
            .insert("tags".into(), serde_json::to_value(&self.tags)?);
        Ok(checkpoint)
    }

    /// Rehydrate a fresh context from a checkpoint.
    ///
    /// `channels` must already carry any reducer channels the graph relies on.
    pub fn from_checkpoint(graph: Arc<Graph>, checkpoint: GraphCheckpoint, channels: ChannelSet) -> Result<Self> {
        checkpoint.validate()?;
        channels.restore(checkpoint.channel_values)?;

        let mut ctx = Self::with_channels(checkpoint.execution_id, graph, channels);
        ctx.completed_nodes = checkpoint.completed_nodes;
        ctx.skipped_nodes = checkpoint.skipped_nodes;
        ctx.node_outputs = checkpoint.node_outputs;
        ctx.node_fingerprints = checkpoint.node_fingerprints;
        ctx.execution_counts = checkpoint.execution_counts;
        ctx.suspension = checkpoint.suspension;

        if let Some(depth) = checkpoint.metadata.get("depth").and_then(Value::as_u64) {
            ctx.depth = depth as usize;
        }
        if let Some(metrics) = checkpoint.metadata.get("metrics") {
            ctx.metrics = serde_json::from_value(metrics.clone())?;
        }
        if let Some(tags) = checkpoint.metadata.get("tags") {
            ctx.tags = serde_json::from_value(tags.clone())?;
        }
        Ok(ctx)
    }
}
