//! Sub-graph execution
//!
//! ```text
//! parent scope "root"                      child scope "root/enrich"
//! ┌────────────────────────┐               ┌──────────────────────────┐
//! │ input:region = "eu"    │ ── copied ──► │ input:region = "eu"      │
//! │ resolved node inputs   │ ── input:* ─► │ input:<key> = value      │
//! │                        │               │ __start__ out = inputs   │
//! │                        │               │   ... child graph ...    │
//! │ node outputs           │ ◄── End inputs + output:* (prefix strip) │
//! └────────────────────────┘               └──────────────────────────┘
//! ```
//!
//! The child run shares the handler map, cache, artifact registry and
//! services of its parent. It never writes checkpoints of its own; the parent
//! checkpoint records the sub-graph node's outputs once it completes.
//!
//! When a node of the child suspends, the child's state is captured as a
//! checkpoint nested in the parent's [`SuspendState`]. Resuming restores that
//! state, hands the value to the suspended inner node and runs the rest of
//! the child graph.

use super::{apply_resume, HandlerMap, Orchestrator, RunStatus};
use crate::context::{ExecutionContext, LogLevel, PendingResume};
use crate::graph::{Graph, Node};
use crate::node_result::NodeExecutionResult;
use flowgraph_checkpoint::{NodeOutputs, SuspendState, INPUT_PREFIX, OUTPUT_PREFIX};
use std::collections::HashMap;
use std::sync::Arc;

impl Orchestrator {
    pub(crate) async fn execute_subgraph(
        &self,
        ctx: &mut ExecutionContext,
        node: &Node,
        inputs: NodeOutputs,
        handlers: &HandlerMap,
    ) -> NodeExecutionResult {
        ctx.record_execution(&node.id);
        let Some(graph) = node.sub_graph.as_ref().map(Arc::clone) else {
            return NodeExecutionResult::failure(format!("sub-graph node '{}' has no nested graph", node.id));
        };
        if ctx.depth() + 1 > self.config.max_subgraph_depth {
            return NodeExecutionResult::failure(format!(
                "sub-graph node '{}' exceeds max_subgraph_depth {}",
                node.id, self.config.max_subgraph_depth
            ));
        }
        let layers = match graph.try_execution_layers() {
            Ok(layers) => layers,
            Err(e) => return NodeExecutionResult::failure(e.to_string()),
        };

        let child = match ctx.take_pending_resume(&node.id) {
            Some(pending) => match resume_child(ctx, &node.id, Arc::clone(&graph), pending) {
                Ok(child) => child,
                Err(e) => return NodeExecutionResult::failure(format!("failed to resume sub-graph: {}", e)),
            },
            None => {
                let mut child = ctx.child(&node.id, Arc::clone(&graph));
                if let Err(e) = seed_child(ctx, &child, &inputs) {
                    return NodeExecutionResult::failure(format!("failed to seed sub-graph inputs: {}", e));
                }
                child.set_node_output(graph.entry_node_id(), inputs);
                child
            }
        };
        let baseline: HashMap<String, f64> = child.metrics().clone();

        tracing::debug!(
            node = %node.id,
            child_execution_id = %child.execution_id(),
            layers = layers.len(),
            "Entering sub-graph"
        );

        let outcome = match self
            .clone()
            .run_layers(child, layers, Arc::clone(handlers), 0)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return NodeExecutionResult::failure(e.to_string()),
        };

        for (name, value) in outcome.context.metrics() {
            let delta = value - baseline.get(name).copied().unwrap_or(0.0);
            if delta != 0.0 {
                ctx.increment_metric(name, delta);
            }
        }

        match outcome.status {
            RunStatus::Completed => {
                let mut outputs = outcome.outputs;
                outputs.extend(
                    outcome
                        .context
                        .channels()
                        .values_with_prefix(OUTPUT_PREFIX),
                );
                ctx.log(LogLevel::Info, Some(&node.id), "sub-graph completed");
                NodeExecutionResult::from_outputs(outputs)
            }
            RunStatus::Suspended => match outcome.suspension {
                Some(inner) => {
                    let nested = match outcome.context.to_checkpoint(0) {
                        Ok(nested) => nested,
                        Err(e) => {
                            return NodeExecutionResult::failure(format!(
                                "failed to capture suspended sub-graph '{}': {}",
                                node.id, e
                            ))
                        }
                    };
                    let mut suspension = SuspendState::new(node.id.clone(), inner.token.clone()).with_nested(nested);
                    let mut result = NodeExecutionResult::suspended(inner.token);
                    if let Some(value) = inner.resume_value {
                        suspension = suspension.with_resume_value(value.clone());
                        result = result.with_partial(value);
                    }
                    ctx.set_suspension(Some(suspension));
                    ctx.log(LogLevel::Info, Some(&node.id), format!("sub-graph suspended at '{}'", inner.node_id));
                    result
                }
                None => NodeExecutionResult::failure("sub-graph suspended without a token"),
            },
            RunStatus::Cancelled => NodeExecutionResult::cancelled("sub-graph cancelled"),
            _ => {
                let error = outcome
                    .failure
                    .map(|f| format!("node '{}' failed: {}", f.node_id, f.error))
                    .unwrap_or_else(|| "sub-graph did not complete".to_string());
                NodeExecutionResult::failure(format!("sub-graph '{}': {}", node.id, error))
            }
        }
    }
}

/// Rebuild a suspended child run and hand it the resume value
fn resume_child(
    parent: &ExecutionContext,
    node_id: &str,
    graph: Arc<Graph>,
    pending: PendingResume,
) -> crate::error::Result<ExecutionContext> {
    let mut child = ExecutionContext::from_checkpoint(graph, pending.checkpoint, parent.channels().child_scope(node_id))?;
    child.set_cancellation(parent.cancellation().clone());
    let suspension = apply_resume(&mut child, pending.value)?;
    tracing::debug!(
        node = %node_id,
        inner = %suspension.node_id,
        "Resuming inside sub-graph"
    );
    Ok(child)
}

/// Copy the parent's `input:*` channels and the resolved inputs into the child scope
fn seed_child(parent: &ExecutionContext, child: &ExecutionContext, inputs: &NodeOutputs) -> crate::error::Result<()> {
    let inherited = parent.channels().values_with_prefix(INPUT_PREFIX);
    let resolved = inputs.iter().map(|(k, v)| (k.clone(), v.clone()));
    for (key, value) in inherited.into_iter().chain(resolved) {
        child
            .channels()
            .set(&format!("{}{}", INPUT_PREFIX, key), value)?;
    }
    Ok(())
}
