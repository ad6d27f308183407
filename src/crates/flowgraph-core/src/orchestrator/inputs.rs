//! Input resolution along active edges

use crate::context::ExecutionContext;
use crate::graph::{Graph, Node};
use flowgraph_checkpoint::NodeOutputs;

/// How a node's inputs resolved
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resolution {
    /// At least one incoming edge is active
    Ready(NodeOutputs),
    /// No incoming edge is active
    Skip(String),
}

/// Union of the outputs of every upstream node whose edge is active.
///
/// An edge is active when its source produced outputs (the entry node's
/// outputs are the run inputs) and its condition, if any, holds. Inactive
/// edges contribute nothing. Bound inputs are merged last.
pub(crate) fn resolve_inputs(graph: &Graph, ctx: &ExecutionContext, node: &Node) -> Resolution {
    let mut inputs = NodeOutputs::new();
    let mut active = 0usize;
    let mut incoming = 0usize;

    for edge in graph.incoming(&node.id) {
        incoming += 1;
        let upstream = if edge.from == graph.entry_node_id() || ctx.is_completed(&edge.from) {
            ctx.node_output(&edge.from)
        } else {
            None
        };
        let Some(upstream) = upstream else {
            continue;
        };
        if let Some(condition) = &edge.condition {
            if !condition.evaluate(upstream, ctx.channels()) {
                tracing::debug!(
                    node = %node.id,
                    from = %edge.from,
                    condition = condition.description(),
                    "Edge condition is false"
                );
                continue;
            }
        }
        active += 1;
        inputs.extend(upstream.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    if active == 0 {
        let reason = if incoming == 0 {
            "no incoming edges".to_string()
        } else {
            "no active incoming edge".to_string()
        };
        return Resolution::Skip(reason);
    }

    inputs.extend(node.bound_inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
    Resolution::Ready(inputs)
}

/// Inputs of the exit node, i.e. the run outputs; empty when nothing reached it
pub(crate) fn resolve_outputs(graph: &Graph, ctx: &ExecutionContext) -> NodeOutputs {
    match graph.node(graph.exit_node_id()) {
        Some(exit) => match resolve_inputs(graph, ctx, exit) {
            Resolution::Ready(outputs) => outputs,
            Resolution::Skip(_) => NodeOutputs::new(),
        },
        None => NodeOutputs::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeCondition, GraphBuilder, END, START};
    use serde_json::json;
    use std::sync::Arc;

    fn outputs(pairs: &[(&str, serde_json::Value)]) -> NodeOutputs {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn graph() -> Arc<Graph> {
        Arc::new(
            GraphBuilder::new()
                .add_node(Node::handler("A", "h"))
                .add_node(Node::handler("B", "h"))
                .add_node(Node::handler("C", "h").with_input("mode", json!("fast")))
                .add_edge(START, "A")
                .add_edge(START, "B")
                .add_edge("A", "C")
                .add_conditional_edge("B", "C", EdgeCondition::output_is_true("ok"))
                .add_edge("C", END)
                .build(),
        )
    }

    #[test]
    fn test_false_condition_contributes_nothing() {
        let graph = graph();
        let mut ctx = ExecutionContext::new("run", Arc::clone(&graph));
        ctx.mark_completed("A", outputs(&[("a", json!(1))]));
        ctx.mark_completed("B", outputs(&[("ok", json!(false)), ("b", json!(2))]));

        let node = graph.node("C").unwrap();
        match resolve_inputs(&graph, &ctx, node) {
            Resolution::Ready(inputs) => {
                assert_eq!(inputs.get("a"), Some(&json!(1)));
                assert_eq!(inputs.get("mode"), Some(&json!("fast")));
                assert!(!inputs.contains_key("b"));
                assert!(!inputs.contains_key("ok"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_true_condition_merges_outputs() {
        let graph = graph();
        let mut ctx = ExecutionContext::new("run", Arc::clone(&graph));
        ctx.mark_completed("A", outputs(&[("a", json!(1))]));
        ctx.mark_completed("B", outputs(&[("ok", json!(true)), ("b", json!(2))]));

        let Resolution::Ready(inputs) = resolve_inputs(&graph, &ctx, graph.node("C").unwrap()) else {
            panic!("expected inputs");
        };
        assert_eq!(inputs.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_skipped_sources_mean_skip() {
        let graph = graph();
        let mut ctx = ExecutionContext::new("run", Arc::clone(&graph));
        ctx.mark_skipped("A");
        ctx.mark_completed("B", outputs(&[("ok", json!(false))]));
        assert!(matches!(
            resolve_inputs(&graph, &ctx, graph.node("C").unwrap()),
            Resolution::Skip(_)
        ));
    }

    #[test]
    fn test_entry_outputs_are_run_inputs() {
        let graph = graph();
        let mut ctx = ExecutionContext::new("run", Arc::clone(&graph));
        ctx.set_node_output(START, outputs(&[("seed", json!(7))]));
        let Resolution::Ready(inputs) = resolve_inputs(&graph, &ctx, graph.node("A").unwrap()) else {
            panic!("expected inputs");
        };
        assert_eq!(inputs.get("seed"), Some(&json!(7)));
    }
}
