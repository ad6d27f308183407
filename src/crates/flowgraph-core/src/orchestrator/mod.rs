//! Layered graph orchestrator
//!
//! The [`Orchestrator`] runs a [`Graph`] layer by layer. Nodes inside a layer
//! run concurrently, each on an isolated fork of the [`ExecutionContext`];
//! layers are strictly ordered.
//!
//! # Run State Machine
//!
//! ```text
//!  Pending ──► Running ──┬──► Completed
//!                        ├──► Failed
//!                        ├──► Cancelled
//!                        └──► Suspended ──resume()──► Running
//! ```
//!
//! Every run gets its own cancellation token, a child of the orchestrator's
//! root token. [`Orchestrator::cancel`] fires the root, which reaches the runs
//! in flight; the next run starts under a fresh root.
//!
//! # Nested Suspension
//!
//! ```text
//! root run                         sub-graph "review"
//!   review ── suspended ◄───────────  ask ── suspended (token "t")
//!     nested: checkpoint of review      process (not run yet)
//!
//! resume("t", value)
//!   review re-runs ──► restore nested ──► ask completes with value
//!                                         process runs
//!   review completes with the nested End inputs + output:*
//! ```
//!
//! # Per Layer
//!
//! ```text
//! ┌─ for each node not yet completed ──────────────────────────────┐
//! │ 1. resolve inputs along active edges      (none → Skipped)     │
//! │ 2. fingerprint; cache hit → adopt outputs (cache_hits += 1)    │
//! └────────────────────────────────────────────────────────────────┘
//!   3. clear ephemeral channels
//!   4. spawn one task per remaining node on a context fork
//!        handler ─► timeout / cancellation ─► retry transient failures
//!   5. merge forks, store outputs under `node:<id>`, write cache,
//!      register artifacts
//!   6. checkpoint (per CheckpointFrequency)
//!   7. stop on Failure / Suspended / Cancelled
//! ```
//!
//! Before any node runs, the graph is validated, layered strictly (a cycle
//! is an error), and every handler name is resolved. All three failures are
//! returned as [`GraphError`]s.
//!
//! # Example
//!
//! ```rust
//! use flowgraph_core::{
//!     GraphBuilder, HandlerRegistry, Node, NodeExecutionResult, Orchestrator, RunStatus, END, START,
//! };
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let mut handlers = HandlerRegistry::new();
//! handlers.register_fn("inc", |inputs, _ctx| async move {
//!     let n = inputs.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
//!     NodeExecutionResult::success([("n".to_string(), json!(n + 1))])
//! });
//!
//! let graph = GraphBuilder::new()
//!     .add_node(Node::handler("a", "inc"))
//!     .add_node(Node::handler("b", "inc"))
//!     .chain(&[START, "a", "b", END])
//!     .build();
//!
//! let orchestrator = Orchestrator::new(handlers);
//! let outcome = orchestrator
//!     .execute(graph, [("n".to_string(), json!(1))].into_iter().collect())
//!     .await
//!     .unwrap();
//!
//! assert_eq!(outcome.status, RunStatus::Completed);
//! assert_eq!(outcome.outputs["n"], json!(3));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

mod execution;
mod inputs;
mod subgraph;

use crate::affected::GraphSnapshot;
use crate::artifact::{ArtifactMetadata, ArtifactRegistry};
use crate::cache::{CachedNodeResult, NodeCacheStore};
use crate::config::{CheckpointFrequency, ConfigBuilder, OrchestratorConfig};
use crate::context::{ExecutionContext, LogLevel, PendingResume};
use crate::error::{GraphError, Result};
use crate::fingerprint::FingerprintCalculator;
use crate::graph::{Graph, Node, NodeId};
use crate::handler::{HandlerRegistry, NodeHandler, Services};
use crate::node_result::NodeExecutionResult;
use crate::validator::GraphValidator;
use flowgraph_checkpoint::{ChannelSet, CheckpointStore, NodeOutputs, SuspendState};
use futures::future::{join_all, BoxFuture, FutureExt};
use inputs::{resolve_inputs, resolve_outputs, Resolution};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Handlers resolved for one run, keyed by handler name
pub(crate) type HandlerMap = Arc<HashMap<String, Arc<dyn NodeHandler>>>;

/// Prefix of the per-node output channels
pub const NODE_CHANNEL_PREFIX: &str = "node:";

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Suspended,
    Cancelled,
}

impl RunStatus {
    /// Completed, Failed and Cancelled cannot continue; Suspended can be resumed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The node failure that stopped a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node_id: String,
    pub error: String,
}

/// Result of `execute`, `resume` or `recover`
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Execution id of the run
    pub execution_id: String,
    /// Final status
    pub status: RunStatus,
    /// Inputs of the exit node (empty unless completed)
    pub outputs: NodeOutputs,
    /// Results of the nodes processed by this call
    pub node_results: HashMap<String, NodeExecutionResult>,
    /// Set when the run is suspended
    pub suspension: Option<SuspendState>,
    /// Set when the run failed
    pub failure: Option<NodeFailure>,
    /// Fingerprints of this run, the baseline for affected-node detection
    pub snapshot: GraphSnapshot,
    /// Final context
    pub context: ExecutionContext,
    next_sequence: u64,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Result of one node in this call
    pub fn node_result(&self, node_id: &str) -> Option<&NodeExecutionResult> {
        self.node_results.get(node_id)
    }
}

/// A suspended root run kept in memory for [`Orchestrator::resume`]
struct SuspendedRun {
    context: ExecutionContext,
    next_sequence: u64,
}

/// Runs graphs against a handler registry and optional storage backends
#[derive(Clone)]
pub struct Orchestrator {
    handlers: Arc<HandlerRegistry>,
    cache: Option<Arc<dyn NodeCacheStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    artifacts: Option<Arc<dyn ArtifactRegistry>>,
    services: Option<Services>,
    config: OrchestratorConfig,
    fingerprints: FingerprintCalculator,
    cancellation: Arc<parking_lot::Mutex<CancellationToken>>,
    suspended: Arc<parking_lot::Mutex<HashMap<String, SuspendedRun>>>,
}

impl Orchestrator {
    /// Orchestrator with default configuration and no storage backends
    pub fn new(handlers: HandlerRegistry) -> Self {
        let config = OrchestratorConfig::default();
        Self {
            handlers: Arc::new(handlers),
            cache: None,
            checkpoints: None,
            artifacts: None,
            services: None,
            fingerprints: FingerprintCalculator::new(config.fingerprint_seed.clone()),
            config,
            cancellation: Arc::new(parking_lot::Mutex::new(CancellationToken::new())),
            suspended: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    /// Replace the configuration; invalid values are rejected
    pub fn with_config(mut self, config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        self.fingerprints = FingerprintCalculator::new(config.fingerprint_seed.clone());
        self.config = config;
        Ok(self)
    }

    pub fn with_cache(mut self, cache: Arc<dyn NodeCacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_artifact_registry(mut self, registry: Arc<dyn ArtifactRegistry>) -> Self {
        self.artifacts = Some(registry);
        self
    }

    /// Opaque services handed to every handler
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = Some(services);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Root token of the runs currently in flight.
    ///
    /// Cancelling it is the same as [`Orchestrator::cancel`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.lock().clone()
    }

    /// Cancel the runs currently in flight.
    ///
    /// Running nodes observe `Cancelled` and no further layer starts. Runs
    /// started afterwards are not affected.
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.cancellation.lock().cancel();
    }

    /// Token for a new run, replacing a root that was already cancelled
    fn run_token(&self) -> CancellationToken {
        let mut root = self.cancellation.lock();
        if root.is_cancelled() {
            *root = CancellationToken::new();
        }
        root.child_token()
    }

    /// Execution ids of the suspended runs held in memory
    pub fn suspended_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.suspended.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop a suspended run that will never be resumed.
    ///
    /// Returns false when no such run is held. Checkpoints already written
    /// stay in the store.
    pub fn abandon(&self, execution_id: &str) -> bool {
        let removed = self.suspended.lock().remove(execution_id).is_some();
        if removed {
            tracing::info!(execution_id = %execution_id, "Abandoned suspended run");
        }
        removed
    }

    /// Run a graph with the given run inputs under a fresh execution id
    pub async fn execute(&self, graph: impl Into<Arc<Graph>>, inputs: NodeOutputs) -> Result<RunOutcome> {
        let mut ctx = ExecutionContext::for_graph(graph.into());
        let entry = ctx.graph().entry_node_id().to_string();
        ctx.set_node_output(&entry, inputs);
        self.execute_with_context(ctx).await
    }

    /// Run a prepared context (pre-seeded channels, custom execution id, ...).
    ///
    /// Nodes already completed in the context are not run again.
    pub async fn execute_with_context(&self, mut ctx: ExecutionContext) -> Result<RunOutcome> {
        let entry = ctx.graph().entry_node_id().to_string();
        if ctx.node_output(&entry).is_none() {
            ctx.set_node_output(&entry, NodeOutputs::new());
        }
        self.run_prepared(ctx, 0).await
    }

    /// Resume a run suspended by this orchestrator instance
    pub async fn resume(&self, execution_id: &str, token: &str, value: Value) -> Result<RunOutcome> {
        let run = {
            let mut suspended = self.suspended.lock();
            let run = suspended.remove(execution_id).ok_or_else(|| {
                GraphError::InvalidResume(format!("no suspended run with id '{}'", execution_id))
            })?;
            if let Err(e) = check_token(&run.context, token) {
                suspended.insert(execution_id.to_string(), run);
                return Err(e);
            }
            run
        };
        self.continue_suspended(run.context, value, run.next_sequence).await
    }

    /// Resume a suspended run from the latest checkpoint in the store
    pub async fn resume_with_graph(
        &self,
        graph: impl Into<Arc<Graph>>,
        execution_id: &str,
        token: &str,
        value: Value,
    ) -> Result<RunOutcome> {
        let (ctx, next_sequence) = self.load_context(graph.into(), execution_id).await?;
        check_token(&ctx, token)?;
        self.suspended.lock().remove(execution_id);
        self.continue_suspended(ctx, value, next_sequence).await
    }

    /// Continue a crashed or failed run from its latest checkpoint.
    ///
    /// Completed nodes are skipped; everything else runs again.
    pub async fn recover(&self, graph: impl Into<Arc<Graph>>, execution_id: &str) -> Result<RunOutcome> {
        let (ctx, next_sequence) = self.load_context(graph.into(), execution_id).await?;
        if let Some(suspension) = ctx.suspension() {
            return Err(GraphError::InvalidResume(format!(
                "execution '{}' is suspended at node '{}'; resume it with its token",
                execution_id, suspension.node_id
            )));
        }
        tracing::info!(
            execution_id = %execution_id,
            completed = ctx.completed_nodes().len(),
            "Recovering run from checkpoint"
        );
        self.run_prepared(ctx, next_sequence).await
    }

    async fn load_context(&self, graph: Arc<Graph>, execution_id: &str) -> Result<(ExecutionContext, u64)> {
        let store = self.checkpoints.as_ref().ok_or_else(|| {
            GraphError::Configuration("no checkpoint store configured".into())
        })?;
        let checkpoint = store.load_latest(execution_id).await?.ok_or_else(|| {
            GraphError::InvalidResume(format!("no checkpoint for execution '{}'", execution_id))
        })?;
        let next_sequence = checkpoint.sequence + 1;
        let ctx = ExecutionContext::from_checkpoint(graph, checkpoint, ChannelSet::new())?;
        Ok((ctx, next_sequence))
    }

    async fn continue_suspended(&self, mut ctx: ExecutionContext, value: Value, next_sequence: u64) -> Result<RunOutcome> {
        let suspension = apply_resume(&mut ctx, value)?;
        tracing::info!(
            execution_id = %ctx.execution_id(),
            path = %suspension.path().join("/"),
            "Resuming suspended run"
        );

        let mut outcome = self.run_prepared(ctx, next_sequence).await?;
        if suspension.nested.is_none() {
            if let Some(outputs) = outcome.context.node_output(&suspension.node_id).cloned() {
                outcome
                    .node_results
                    .entry(suspension.node_id)
                    .or_insert_with(|| NodeExecutionResult::from_outputs(outputs));
            }
        }
        Ok(outcome)
    }

    async fn run_prepared(&self, mut ctx: ExecutionContext, start_sequence: u64) -> Result<RunOutcome> {
        let graph = Arc::clone(ctx.graph());
        let (layers, handlers) = self.preflight(&graph)?;
        ctx.set_cancellation(self.run_token());

        let span = tracing::info_span!(
            "graph_run",
            execution_id = %ctx.execution_id(),
            nodes = graph.nodes().len(),
            layers = layers.len()
        );
        let outcome = self
            .clone()
            .run_layers(ctx, layers, handlers, start_sequence)
            .instrument(span)
            .await?;

        if outcome.status == RunStatus::Suspended && outcome.context.depth() == 0 {
            self.suspended.lock().insert(
                outcome.execution_id.clone(),
                SuspendedRun {
                    context: outcome.context.clone(),
                    next_sequence: outcome.next_sequence,
                },
            );
        }
        Ok(outcome)
    }

    /// Validate, layer and resolve handlers before anything runs
    fn preflight(&self, graph: &Graph) -> Result<(Vec<Vec<NodeId>>, HandlerMap)> {
        GraphValidator::validate(graph).into_result()?;
        let mut handlers = HashMap::new();
        let layers = self.check_graph(graph, 0, &mut handlers)?;
        Ok((layers, Arc::new(handlers)))
    }

    fn check_graph(
        &self,
        graph: &Graph,
        depth: usize,
        handlers: &mut HashMap<String, Arc<dyn NodeHandler>>,
    ) -> Result<Vec<Vec<NodeId>>> {
        if depth > self.config.max_subgraph_depth {
            return Err(GraphError::Configuration(format!(
                "sub-graph nesting exceeds max_subgraph_depth {}",
                self.config.max_subgraph_depth
            )));
        }
        let layers = graph.try_execution_layers()?;
        for node in graph.nodes() {
            if let Some(name) = node.handler_name.as_deref().filter(|n| !n.is_empty()) {
                if !handlers.contains_key(name) {
                    handlers.insert(name.to_string(), self.handlers.resolve(name)?);
                }
            }
            if let Some(sub) = &node.sub_graph {
                self.check_graph(sub, depth + 1, handlers)?;
            }
        }
        Ok(layers)
    }

    /// The layer loop; boxed so sub-graph nodes can recurse into it
    pub(crate) fn run_layers(
        self,
        mut ctx: ExecutionContext,
        layers: Vec<Vec<NodeId>>,
        handlers: HandlerMap,
        start_sequence: u64,
    ) -> BoxFuture<'static, Result<RunOutcome>> {
        async move {
            let graph = Arc::clone(ctx.graph());
            let total_layers = layers.len();
            let mut sequence = start_sequence;
            let mut status = RunStatus::Running;
            let mut failure: Option<NodeFailure> = None;
            let mut node_results: HashMap<String, NodeExecutionResult> = HashMap::new();

            tracing::info!(
                execution_id = %ctx.execution_id(),
                depth = ctx.depth(),
                layers = total_layers,
                already_completed = ctx.completed_nodes().len(),
                "Starting graph run"
            );

            for (index, layer) in layers.iter().enumerate() {
                if ctx.cancellation().is_cancelled() {
                    status = RunStatus::Cancelled;
                    break;
                }
                ctx.enter_layer(index, total_layers);

                let mut pending: Vec<(Node, NodeOutputs, String)> = Vec::new();
                let mut resumed: HashSet<String> = HashSet::new();
                let mut progressed = false;
                for node_id in layer {
                    if ctx.is_completed(node_id) {
                        continue;
                    }
                    progressed = true;
                    let Some(node) = graph.node(node_id) else {
                        continue;
                    };
                    let inputs = match resolve_inputs(&graph, &ctx, node) {
                        Resolution::Ready(inputs) => inputs,
                        Resolution::Skip(reason) => {
                            tracing::debug!(node = %node_id, reason = %reason, "Skipping node");
                            ctx.mark_skipped(node_id);
                            ctx.increment_metric("nodes_skipped", 1.0);
                            ctx.log(LogLevel::Info, Some(node_id), format!("skipped: {}", reason));
                            node_results.insert(node_id.clone(), NodeExecutionResult::skipped(reason));
                            continue;
                        }
                    };

                    let upstream = FingerprintCalculator::upstream_of(&graph, node_id, ctx.node_fingerprints());
                    let fingerprint = self.fingerprints.compute_scoped(
                        ctx.channels().namespace(),
                        node_id,
                        node.handler_name.as_deref(),
                        &inputs,
                        &upstream,
                    );
                    ctx.set_fingerprint(node_id, fingerprint.clone());

                    // Resumed sub-graph nodes bypass the cache
                    if ctx.has_pending_resume(node_id) {
                        resumed.insert(node_id.clone());
                    } else if let Some(outputs) = self.cache_lookup(node, &fingerprint).await {
                        tracing::debug!(node = %node_id, fingerprint = %fingerprint, "Cache hit");
                        ctx.increment_metric("cache_hits", 1.0);
                        ctx.log(LogLevel::Info, Some(node_id), "served from cache");
                        store_node_outputs(&mut ctx, node_id, &outputs);
                        node_results.insert(
                            node_id.clone(),
                            NodeExecutionResult::from_outputs(outputs).with_metadata("cache_hit", Value::Bool(true)),
                        );
                        continue;
                    }
                    pending.push((node.clone(), inputs, fingerprint));
                }

                ctx.begin_step();

                let semaphore = self.config.max_parallelism.map(|n| Arc::new(Semaphore::new(n)));
                let mut ids = Vec::with_capacity(pending.len());
                let mut tasks = Vec::with_capacity(pending.len());
                let mut meta: HashMap<String, (Node, String)> = HashMap::new();
                for (node, inputs, fingerprint) in pending {
                    let this = self.clone();
                    let handlers = Arc::clone(&handlers);
                    let semaphore = semaphore.clone();
                    let mut fork = ctx.fork();
                    if let Some(pending_resume) = ctx.take_pending_resume(&node.id) {
                        fork.set_pending_resume(&node.id, pending_resume);
                    }
                    let task_node = node.clone();
                    ids.push(node.id.clone());
                    meta.insert(node.id.clone(), (node, fingerprint));
                    tasks.push(tokio::spawn(async move {
                        let _permit = match semaphore {
                            Some(s) => s.acquire_owned().await.ok(),
                            None => None,
                        };
                        let result = this.execute_node(&mut fork, &task_node, inputs, &handlers).await;
                        (fork, result)
                    }));
                }

                let joined = join_all(tasks).await;
                let mut failed_nodes = Vec::new();

                for (node_id, joined) in ids.into_iter().zip(joined) {
                    let result = match joined {
                        Ok((fork, result)) => {
                            ctx.merge(fork)?;
                            result
                        }
                        Err(e) => {
                            tracing::error!(node = %node_id, error = %e, "Node task panicked");
                            NodeExecutionResult::failure(format!("node task panicked: {}", e))
                        }
                    };
                    let Some((node, fingerprint)) = meta.remove(&node_id) else {
                        continue;
                    };

                    match &result {
                        NodeExecutionResult::Success { outputs, .. } => {
                            ctx.increment_metric("nodes_executed", 1.0);
                            store_node_outputs(&mut ctx, &node_id, outputs);
                            if !resumed.contains(&node_id) {
                                self.cache_store(&node, &fingerprint, outputs).await;
                            }
                            self.register_artifact(&ctx, &node, &fingerprint).await;
                        }
                        NodeExecutionResult::Failure { error, .. } => {
                            tracing::warn!(node = %node_id, error = %error, "Node failed");
                            ctx.increment_metric("nodes_failed", 1.0);
                            if failure.is_none() {
                                failure = Some(NodeFailure {
                                    node_id: node_id.clone(),
                                    error: error.clone(),
                                });
                            }
                            failed_nodes.push(node_id.clone());
                            status = RunStatus::Failed;
                        }
                        NodeExecutionResult::Suspended { token, resume_value } => {
                            tracing::info!(node = %node_id, "Node suspended the run");
                            let mut suspension = SuspendState::new(node_id.clone(), token.clone());
                            if let Some(value) = resume_value {
                                suspension = suspension.with_resume_value(value.clone());
                            }
                            if ctx.suspension().is_none() {
                                ctx.set_suspension(Some(suspension));
                            }
                            if status != RunStatus::Failed {
                                status = RunStatus::Suspended;
                            }
                        }
                        NodeExecutionResult::Cancelled { reason } => {
                            tracing::info!(node = %node_id, reason = %reason, "Node cancelled");
                            if status == RunStatus::Running {
                                status = RunStatus::Cancelled;
                            }
                        }
                        NodeExecutionResult::Skipped { .. } => {
                            ctx.mark_skipped(&node_id);
                            ctx.increment_metric("nodes_skipped", 1.0);
                        }
                    }
                    node_results.insert(node_id, result);
                }

                for failed in &failed_nodes {
                    for downstream in graph.downstream_closure([failed.as_str()]) {
                        let is_work = graph.node(&downstream).map(|n| !n.is_boundary()).unwrap_or(false);
                        if !is_work || ctx.is_completed(&downstream) || node_results.contains_key(&downstream) {
                            continue;
                        }
                        ctx.mark_skipped(&downstream);
                        node_results.insert(
                            downstream.clone(),
                            NodeExecutionResult::Skipped {
                                reason: format!("upstream node '{}' failed", failed),
                                upstream_failed_node: Some(failed.clone()),
                            },
                        );
                    }
                }

                let persist = match self.config.checkpoint_frequency {
                    CheckpointFrequency::EveryLayer => true,
                    CheckpointFrequency::OnSuspend => status == RunStatus::Suspended,
                    CheckpointFrequency::Never => false,
                };
                if persist && progressed {
                    self.save_checkpoint(&ctx, &mut sequence).await;
                }

                if status != RunStatus::Running {
                    break;
                }
            }

            if status == RunStatus::Running {
                status = RunStatus::Completed;
            }
            let outputs = if status == RunStatus::Completed {
                let outputs = resolve_outputs(&graph, &ctx);
                ctx.set_node_output(graph.exit_node_id(), outputs.clone());
                outputs
            } else {
                NodeOutputs::new()
            };

            tracing::info!(
                execution_id = %ctx.execution_id(),
                status = ?status,
                completed = ctx.completed_nodes().len(),
                cache_hits = ctx.metric("cache_hits"),
                "Graph run finished"
            );

            Ok(RunOutcome {
                execution_id: ctx.execution_id().to_string(),
                status,
                outputs,
                node_results,
                suspension: ctx.suspension().cloned(),
                failure,
                snapshot: GraphSnapshot::new(&graph, ctx.node_fingerprints().clone()),
                context: ctx,
                next_sequence: sequence,
            })
        }
        .boxed()
    }

    async fn cache_lookup(&self, node: &Node, fingerprint: &str) -> Option<NodeOutputs> {
        let cache = self.cache.as_ref()?;
        if !node.is_cacheable() {
            return None;
        }
        match cache.get(fingerprint).await {
            Ok(hit) => hit.map(|cached| cached.outputs),
            Err(e) => {
                tracing::warn!(node = %node.id, error = %e, "Cache lookup failed, executing node");
                None
            }
        }
    }

    async fn cache_store(&self, node: &Node, fingerprint: &str, outputs: &NodeOutputs) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        if !node.is_cacheable() {
            return;
        }
        let ttl = node.cache_options.and_then(|o| o.ttl);
        let entry = CachedNodeResult::new(fingerprint, outputs.clone())
            .with_metadata("node_id", Value::String(node.id.clone()));
        let fingerprint = fingerprint.to_string();
        let node_id = node.id.clone();
        let write = async move {
            if let Err(e) = cache.set_with_ttl(&fingerprint, entry, ttl).await {
                tracing::warn!(node = %node_id, error = %e, "Cache write failed");
            }
        };
        if self.config.write_behind {
            tokio::spawn(write);
        } else {
            write.await;
        }
    }

    async fn register_artifact(&self, ctx: &ExecutionContext, node: &Node, fingerprint: &str) {
        let (Some(registry), Some(key)) = (self.artifacts.as_ref(), node.produces_artifact.as_ref()) else {
            return;
        };
        let mut metadata = ArtifactMetadata::new(node.id.clone(), ctx.execution_id());
        for required in &node.requires_artifacts {
            match registry.latest_version(required).await {
                Ok(Some(version)) => metadata = metadata.with_input(required.clone(), version),
                Ok(None) => {}
                Err(e) => tracing::warn!(node = %node.id, artifact = %required, error = %e, "Lineage lookup failed"),
            }
        }
        if let Ok(Some(latest)) = registry.latest_version(key).await {
            if latest == fingerprint {
                return;
            }
        }
        if let Err(e) = registry.register(key, fingerprint, metadata).await {
            tracing::warn!(node = %node.id, artifact = %key, error = %e, "Artifact registration failed");
        }
    }

    async fn save_checkpoint(&self, ctx: &ExecutionContext, sequence: &mut u64) {
        let Some(store) = self.checkpoints.clone() else {
            return;
        };
        if ctx.depth() > 0 {
            return;
        }
        let checkpoint = match ctx.to_checkpoint(*sequence) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!(execution_id = %ctx.execution_id(), error = %e, "Failed to capture checkpoint");
                return;
            }
        };
        *sequence += 1;

        let execution_id = ctx.execution_id().to_string();
        let write = async move {
            match store.save(checkpoint).await {
                Ok(()) => tracing::debug!(execution_id = %execution_id, "Checkpoint saved"),
                Err(e) => tracing::warn!(execution_id = %execution_id, error = %e, "Checkpoint save failed"),
            }
        };
        if self.config.write_behind {
            tokio::spawn(write);
        } else {
            write.await;
        }
    }
}

fn node_channel(node_id: &str) -> String {
    format!("{}{}", NODE_CHANNEL_PREFIX, node_id)
}

fn store_node_outputs(ctx: &mut ExecutionContext, node_id: &str, outputs: &NodeOutputs) {
    ctx.mark_completed(node_id, outputs.clone());
    let value = Value::Object(outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
    if let Err(e) = ctx.channels().set(&node_channel(node_id), value) {
        tracing::warn!(node = %node_id, error = %e, "Failed to write node output channel");
    }
}

/// Hand a resume value to the suspended node of `ctx`.
///
/// A leaf node completes with the value as its outputs: an object is used
/// as-is, anything else becomes `{"value": ...}`. A sub-graph node stays
/// pending with the value and its nested state, so the next pass over its
/// layer re-enters the nested run at the node that actually suspended.
pub(crate) fn apply_resume(ctx: &mut ExecutionContext, value: Value) -> Result<SuspendState> {
    let suspension = ctx.suspension().cloned().ok_or_else(|| {
        GraphError::InvalidResume(format!("execution '{}' is not suspended", ctx.execution_id()))
    })?;
    ctx.set_suspension(None);

    match suspension.nested.as_deref() {
        Some(nested) => ctx.set_pending_resume(
            &suspension.node_id,
            PendingResume {
                value,
                checkpoint: nested.clone(),
            },
        ),
        None => {
            let outputs: NodeOutputs = match value {
                Value::Object(map) => map.into_iter().collect(),
                other => [("value".to_string(), other)].into_iter().collect(),
            };
            store_node_outputs(ctx, &suspension.node_id, &outputs);
        }
    }
    ctx.log(LogLevel::Info, Some(&suspension.node_id), "resumed with supplied value");
    Ok(suspension)
}

fn check_token(ctx: &ExecutionContext, token: &str) -> Result<()> {
    match ctx.suspension() {
        Some(suspension) if suspension.token == token => Ok(()),
        Some(_) => Err(GraphError::InvalidResume(format!(
            "resume token does not match suspended execution '{}'",
            ctx.execution_id()
        ))),
        None => Err(GraphError::InvalidResume(format!(
            "execution '{}' is not suspended",
            ctx.execution_id()
        ))),
    }
}
