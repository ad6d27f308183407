//! Single node execution: retry, timeout and cancellation

use super::{HandlerMap, Orchestrator};
use crate::context::{ExecutionContext, LogLevel};
use crate::graph::{Node, NodeType};
use crate::handler::{NodeContext, NodeHandler};
use crate::node_result::NodeExecutionResult;
use crate::retry::{RetryPolicy, RetryState};
use flowgraph_checkpoint::NodeOutputs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

impl Orchestrator {
    /// Run one node against an isolated context copy
    pub(crate) async fn execute_node(
        &self,
        ctx: &mut ExecutionContext,
        node: &Node,
        inputs: NodeOutputs,
        handlers: &HandlerMap,
    ) -> NodeExecutionResult {
        ctx.set_current_node(Some(&node.id));
        let result = match (node.node_type, node.handler_name.as_deref()) {
            (NodeType::SubGraph, _) => self.execute_subgraph(ctx, node, inputs, handlers).await,
            (NodeType::Router, None) => {
                ctx.record_execution(&node.id);
                NodeExecutionResult::from_outputs(inputs)
            }
            (NodeType::Handler | NodeType::Router, Some(name)) => match handlers.get(name) {
                Some(handler) => {
                    let handler = Arc::clone(handler);
                    self.execute_with_retry(ctx, node, handler, inputs).await
                }
                None => NodeExecutionResult::failure(format!("handler '{}' is not registered", name)),
            },
            (NodeType::Handler, None) => {
                NodeExecutionResult::failure(format!("node '{}' has no handler name", node.id))
            }
            (NodeType::Start | NodeType::End, _) => NodeExecutionResult::from_outputs(inputs),
        };
        ctx.set_current_node(None);
        result
    }

    async fn execute_with_retry(
        &self,
        ctx: &mut ExecutionContext,
        node: &Node,
        handler: Arc<dyn NodeHandler>,
        inputs: NodeOutputs,
    ) -> NodeExecutionResult {
        let policy = node.retry_policy.clone();
        let max_attempts = policy.as_ref().map(|p| p.max_attempts).unwrap_or(1);
        let timeout = node.timeout.or_else(|| self.config.default_node_timeout());
        let run_token = ctx.cancellation().clone();
        let mut state = RetryState::new();

        loop {
            ctx.record_execution(&node.id);
            let attempt = state.attempts + 1;
            let started = Instant::now();

            tracing::debug!(
                execution_id = %ctx.execution_id(),
                node = %node.id,
                attempt = attempt,
                max_attempts = max_attempts,
                "Executing node"
            );

            let token = run_token.child_token();
            let node_ctx = NodeContext {
                execution_id: ctx.execution_id().to_string(),
                node_id: node.id.clone(),
                attempt,
                cancellation: token.clone(),
                channels: ctx.channels().clone(),
                services: self.services.clone(),
            };
            let result = invoke(handler.as_ref(), inputs.clone(), node_ctx, token, timeout, &node.id).await;

            match result {
                NodeExecutionResult::Failure {
                    ref error,
                    is_transient,
                    ..
                } => {
                    state.record_attempt(Some(error.clone()));
                    let retry = is_transient
                        && policy
                            .as_ref()
                            .map(|p| p.should_retry(state.attempts))
                            .unwrap_or(false);
                    if !retry {
                        if state.attempts > 1 {
                            tracing::error!(
                                node = %node.id,
                                attempts = state.attempts,
                                error = %error,
                                "Node failed after all retry attempts"
                            );
                        }
                        ctx.log(
                            LogLevel::Error,
                            Some(&node.id),
                            format!("attempt {} failed: {}", state.attempts, error),
                        );
                        return result;
                    }

                    let delay = policy
                        .as_ref()
                        .map(|p: &RetryPolicy| p.get_delay(state.attempts))
                        .unwrap_or(Duration::ZERO);
                    tracing::warn!(
                        node = %node.id,
                        attempt = state.attempts,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient node failure, retrying"
                    );
                    ctx.log(
                        LogLevel::Warn,
                        Some(&node.id),
                        format!("attempt {} failed, retrying in {:?}: {}", state.attempts, delay, error),
                    );
                    ctx.increment_metric("retries", 1.0);
                    state.record_delay(delay);

                    tokio::select! {
                        _ = run_token.cancelled() => {
                            return NodeExecutionResult::cancelled("run cancelled during retry backoff");
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                NodeExecutionResult::Success { .. } => {
                    state.record_attempt(None);
                    if state.attempts > 1 {
                        tracing::info!(
                            node = %node.id,
                            attempts = state.attempts,
                            total_delay_ms = state.total_delay.as_millis() as u64,
                            "Node succeeded after retry"
                        );
                    }
                    ctx.log(LogLevel::Info, Some(&node.id), "completed");
                    return result.with_duration(started.elapsed());
                }
                other => {
                    ctx.log(
                        LogLevel::Info,
                        Some(&node.id),
                        format!("finished with status {}", other.status_label()),
                    );
                    return other;
                }
            }
        }
    }
}

/// Await the handler under the node's token and optional timeout.
///
/// A fired token yields `Cancelled`; an elapsed timeout cancels the token and
/// yields a transient failure.
async fn invoke(
    handler: &dyn NodeHandler,
    inputs: NodeOutputs,
    node_ctx: NodeContext,
    token: CancellationToken,
    timeout: Option<Duration>,
    node_id: &str,
) -> NodeExecutionResult {
    let guarded = async {
        tokio::select! {
            biased;
            _ = token.cancelled() => NodeExecutionResult::cancelled("run cancelled"),
            result = handler.execute(inputs, node_ctx) => result,
        }
    };

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => {
                token.cancel();
                tracing::warn!(node = %node_id, timeout_ms = limit.as_millis() as u64, "Node timed out");
                NodeExecutionResult::transient_failure(format!(
                    "node '{}' timed out after {}ms",
                    node_id,
                    limit.as_millis()
                ))
            }
        },
        None => guarded.await,
    }
}
