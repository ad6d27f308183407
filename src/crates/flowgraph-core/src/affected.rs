//! Affected-node detection for incremental re-execution
//!
//! Compares the fingerprints of a previous run against freshly computed ones.
//! A node is *affected* when it has no prior fingerprint, when its fingerprint
//! changed, or when anything upstream of it is affected. Affectedness flows
//! forward along every edge, including edges through Start and End.
//!
//! ```text
//!   previous        current
//!   A: f1           A: f1        unchanged
//!   B: f2    ──►    B: f9        changed ─┐
//!   C: f3           C: f3                 ├─► affected = {B, C, __end__}
//!   (C depends on B)                    ──┘
//! ```
//!
//! A changed structural graph hash, or no previous snapshot at all, marks
//! every node affected.

use crate::graph::{Graph, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Fingerprints of a graph run, used as the baseline of the next one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Fingerprint per node id
    pub node_fingerprints: HashMap<NodeId, String>,
    /// Structural hash of the graph the fingerprints belong to
    pub graph_hash: String,
}

impl GraphSnapshot {
    /// Snapshot of `graph` with the given fingerprints
    pub fn new(graph: &Graph, node_fingerprints: HashMap<NodeId, String>) -> Self {
        Self {
            node_fingerprints,
            graph_hash: graph.graph_hash(),
        }
    }
}

/// Finds the nodes that must re-execute
pub struct AffectedNodeDetector;

impl AffectedNodeDetector {
    /// Affected node ids of `graph`, given an optional previous snapshot and the current one
    pub fn detect(
        graph: &Graph,
        previous: Option<&GraphSnapshot>,
        current: &GraphSnapshot,
    ) -> BTreeSet<NodeId> {
        let all = || graph.nodes().iter().map(|n| n.id.clone()).collect();
        let previous = match previous {
            Some(p) if p.graph_hash == current.graph_hash => p,
            _ => return all(),
        };

        let seeds: Vec<&str> = graph
            .nodes()
            .iter()
            .filter(|node| {
                match (
                    previous.node_fingerprints.get(&node.id),
                    current.node_fingerprints.get(&node.id),
                ) {
                    (Some(before), Some(now)) => before != now,
                    (None, _) => !node.is_boundary() || current.node_fingerprints.contains_key(&node.id),
                    (Some(_), None) => true,
                }
            })
            .map(|node| node.id.as_str())
            .collect();

        let mut affected: BTreeSet<NodeId> = seeds.iter().map(|s| s.to_string()).collect();
        affected.extend(graph.downstream_closure(seeds));
        affected
    }
}
