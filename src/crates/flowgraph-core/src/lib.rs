//! # flowgraph-core - Incremental DAG Workflow Execution
//!
//! **A layered workflow engine** that runs directed acyclic graphs of async
//! handlers with content-addressed caching, crash recovery and
//! human-in-the-loop suspension.
//!
//! ## Overview
//!
//! `flowgraph-core` provides:
//!
//! - **Graph model** - [`Graph`], [`Node`], [`Edge`] and conditional edges built with [`GraphBuilder`]
//! - **Validation** - structural checks with stable issue codes ([`GraphValidator`])
//! - **Layered execution** - independent nodes run concurrently on tokio tasks ([`Orchestrator`])
//! - **Incremental runs** - SHA-256 node fingerprints key a result cache ([`NodeCacheStore`])
//! - **Crash recovery** - checkpoints after each layer, restored with [`Orchestrator::recover`]
//! - **Suspension** - a node returns `Suspended`; the run continues with [`Orchestrator::resume`]
//! - **Sub-graphs** - a node can run a whole nested graph in its own channel scope
//! - **Artifacts** - versioned outputs with lineage ([`ArtifactRegistry`])
//!
//! ## Core Concepts
//!
//! ### 1. Graphs
//!
//! Every graph has exactly one entry (`__start__`) and one exit (`__end__`)
//! boundary node. The entry node's outputs are the run inputs; the exit
//! node's inputs are the run outputs. A node's inputs are the union of the
//! outputs of its upstream nodes whose edges are active.
//!
//! ### 2. Layers
//!
//! [`Graph::execution_layers`] groups nodes by longest distance from the
//! entry. Every node in a layer depends only on earlier layers, so a layer
//! runs concurrently and layers run in order.
//!
//! ### 3. Fingerprints
//!
//! A node's fingerprint hashes its id, its canonical inputs, the
//! fingerprints of its upstream nodes and a global seed
//! ([`FingerprintCalculator`]). An unchanged fingerprint means an unchanged
//! result, so a cached result is reused instead of calling the handler.
//! [`AffectedNodeDetector`] compares two runs' [`GraphSnapshot`]s to tell
//! which nodes will re-execute.
//!
//! ### 4. Shared State
//!
//! Nodes share state through the [`ChannelSet`] of their
//! [`ExecutionContext`]. Each parallel node works on a fork that is merged
//! back according to each channel's [`UpdateSemantics`].
//!
//! ## Quick Start
//!
//! ```rust
//! use flowgraph_core::{
//!     GraphBuilder, HandlerRegistry, InMemoryNodeCache, Node, NodeExecutionResult, Orchestrator,
//!     END, START,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut handlers = HandlerRegistry::new();
//! handlers.register_fn("double", |inputs, _ctx| async move {
//!     let x = inputs.get("x").and_then(|v| v.as_i64()).unwrap_or(0);
//!     NodeExecutionResult::success([("x".to_string(), json!(x * 2))])
//! });
//!
//! let graph = GraphBuilder::new()
//!     .add_node(Node::handler("double", "double"))
//!     .chain(&[START, "double", END])
//!     .build_validated()
//!     .unwrap();
//!
//! let orchestrator = Orchestrator::new(handlers).with_cache(Arc::new(InMemoryNodeCache::new()));
//! let inputs = [("x".to_string(), json!(21))].into_iter().collect();
//!
//! let first = orchestrator.execute(graph.clone(), inputs).await.unwrap();
//! assert_eq!(first.outputs["x"], json!(42));
//!
//! // Same inputs: served from the cache
//! let inputs = [("x".to_string(), json!(21))].into_iter().collect();
//! let second = orchestrator.execute(graph, inputs).await.unwrap();
//! assert_eq!(second.context.metric("cache_hits"), 1.0);
//! # });
//! ```
//!
//! ## Configuration
//!
//! [`OrchestratorConfig`] is read from YAML or from `FLOWGRAPH_*`
//! environment variables; see the [`config`] module.
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and spans (`graph_run`) and never
//! installs a subscriber. Applications choose one, e.g.
//! `tracing_subscriber::fmt().with_env_filter("flowgraph_core=debug")`.
//!
//! ## See Also
//!
//! - [`flowgraph_checkpoint`] - channels, checkpoints and checkpoint stores

pub mod affected;
pub mod artifact;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod handler;
pub mod node_result;
pub mod orchestrator;
pub mod retry;
pub mod validator;

// Re-export main types
pub use affected::{AffectedNodeDetector, GraphSnapshot};
pub use artifact::{
    ArtifactKey, ArtifactMetadata, ArtifactRegistry, InMemoryArtifactRegistry, MaterializationLock,
};
pub use cache::{
    CacheConfig, CacheEntry, CacheMetrics, CachedNodeResult, EvictionPolicy, InMemoryNodeCache,
    NodeCacheStore,
};
pub use config::{CheckpointFrequency, ConfigBuilder, OrchestratorConfig};
pub use context::{ExecutionContext, ExecutionProgress, LogEntry, LogLevel};
pub use error::{GraphError, Result};
pub use fingerprint::FingerprintCalculator;
pub use graph::{
    CacheOptions, Edge, EdgeCondition, Graph, GraphBuilder, Node, NodeId, NodeType, END, START,
};
pub use handler::{HandlerRegistry, NodeContext, NodeHandler, Services};
pub use node_result::{FailureSeverity, NodeExecutionResult};
pub use orchestrator::{NodeFailure, Orchestrator, RunOutcome, RunStatus};
pub use retry::{BackoffStrategy, RetryPolicy, RetryState};
pub use validator::{GraphValidator, Severity, ValidationIssue, ValidationReport};

pub use flowgraph_checkpoint::{
    ChannelSet, CheckpointStore, FileCheckpointStore, GraphCheckpoint, InMemoryCheckpointStore,
    NodeOutputs, SuspendState, UpdateSemantics,
};
