//! Core graph data structures and topological layering
//!
//! A [`Graph`] is an immutable set of [`Node`]s connected by [`Edge`]s, with
//! one Start node (the entry) and one End node (the exit). Graphs are built
//! with [`GraphBuilder`] and shared read-only via `Arc<Graph>` across parallel
//! executions of the same definition.
//!
//! # Graph Structure
//!
//! ```text
//!            __start__
//!                │
//!                ▼
//!           ┌─────────┐
//!           │ extract │            Handler node
//!           └────┬────┘
//!          ┌─────┴─────┐
//!          ▼           ▼
//!     ┌─────────┐ ┌─────────┐
//!     │ clean   │ │ enrich  │      same layer: run in parallel
//!     └────┬────┘ └────┬────┘
//!          └─────┬─────┘ [cond]    conditional edge
//!                ▼
//!           ┌─────────┐
//!           │  load   │
//!           └────┬────┘
//!                ▼
//!             __end__
//! ```
//!
//! # Execution Layers
//!
//! [`Graph::execution_layers`] peels zero in-degree nodes (Kahn's algorithm)
//! over the non-Start/End nodes, O(V+E). Each layer is sorted by node id. The
//! diagram above layers as `[[extract], [clean, enrich], [load]]`.
//!
//! On a residual cycle `execution_layers` returns the layers computed so far,
//! while [`Graph::try_execution_layers`] fails with [`GraphError::Cycle`]. The
//! orchestrator always uses the strict variant.
//!
//! # Example
//!
//! ```rust
//! use flowgraph_core::{GraphBuilder, Node, START, END};
//!
//! let graph = GraphBuilder::new()
//!     .add_node(Node::handler("a", "step"))
//!     .add_node(Node::handler("b", "step"))
//!     .add_edge(START, "a")
//!     .add_edge("a", "b")
//!     .add_edge("b", END)
//!     .build();
//!
//! assert_eq!(
//!     graph.execution_layers(),
//!     vec![vec!["a".to_string()], vec!["b".to_string()]]
//! );
//! ```

use crate::artifact::ArtifactKey;
use crate::error::{GraphError, Result};
use crate::fingerprint::canonical_json;
use crate::retry::RetryPolicy;
use flowgraph_checkpoint::{ChannelSet, NodeOutputs};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Conventional id of the Start node
pub const START: &str = "__start__";

/// Conventional id of the End node
pub const END: &str = "__end__";

/// Node identifier
pub type NodeId = String;

/// Kind of node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Graph entry; its outputs are the run inputs
    Start,
    /// Graph exit; its resolved inputs are the run outputs
    End,
    /// Runs a registered handler
    Handler,
    /// Routing node; passes inputs through unless a handler is set
    Router,
    /// Runs a nested graph
    SubGraph,
}

/// Per-node caching options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Whether results of this node may be cached
    pub enabled: bool,
    /// Optional time-to-live of cached results
    #[serde(default)]
    pub ttl: Option<Duration>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: None,
        }
    }
}

impl CacheOptions {
    /// Caching switched off for this node
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ttl: None,
        }
    }
}

/// A unit of work in the graph
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique id within the graph
    pub id: NodeId,
    /// Display name
    pub name: String,
    /// Node kind
    pub node_type: NodeType,
    /// Registered handler to invoke
    pub handler_name: Option<String>,
    /// Retry policy for transient failures
    pub retry_policy: Option<RetryPolicy>,
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
    /// Caching options (defaults apply when `None`)
    pub cache_options: Option<CacheOptions>,
    /// Artifact registered after each success
    pub produces_artifact: Option<ArtifactKey>,
    /// Artifacts whose latest versions form the lineage of the produced artifact
    pub requires_artifacts: Vec<ArtifactKey>,
    /// Nested graph of a SubGraph node
    pub sub_graph: Option<Arc<Graph>>,
    /// Constant inputs merged over the resolved upstream inputs
    pub bound_inputs: NodeOutputs,
}

impl Node {
    /// Create a node of the given type with no handler
    pub fn new(id: impl Into<NodeId>, node_type: NodeType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            node_type,
            handler_name: None,
            retry_policy: None,
            timeout: None,
            cache_options: None,
            produces_artifact: None,
            requires_artifacts: Vec::new(),
            sub_graph: None,
            bound_inputs: NodeOutputs::new(),
        }
    }

    /// Start node
    pub fn start(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeType::Start)
    }

    /// End node
    pub fn end(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeType::End)
    }

    /// Handler node bound to a registered handler name
    pub fn handler(id: impl Into<NodeId>, handler_name: impl Into<String>) -> Self {
        let mut node = Self::new(id, NodeType::Handler);
        node.handler_name = Some(handler_name.into());
        node
    }

    /// Pass-through router node
    pub fn router(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeType::Router)
    }

    /// Sub-graph node
    pub fn sub_graph(id: impl Into<NodeId>, graph: Graph) -> Self {
        let mut node = Self::new(id, NodeType::SubGraph);
        node.sub_graph = Some(Arc::new(graph));
        node
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the handler name
    pub fn with_handler(mut self, handler_name: impl Into<String>) -> Self {
        self.handler_name = Some(handler_name.into());
        self
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set caching options
    pub fn with_cache_options(mut self, options: CacheOptions) -> Self {
        self.cache_options = Some(options);
        self
    }

    /// Declare the artifact this node produces
    pub fn produces(mut self, key: ArtifactKey) -> Self {
        self.produces_artifact = Some(key);
        self
    }

    /// Declare an artifact this node consumes
    pub fn requires(mut self, key: ArtifactKey) -> Self {
        self.requires_artifacts.push(key);
        self
    }

    /// Bind a constant input
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.bound_inputs.insert(key.into(), value);
        self
    }

    /// Start or End
    pub fn is_boundary(&self) -> bool {
        matches!(self.node_type, NodeType::Start | NodeType::End)
    }

    /// Whether results of this node may be served from cache
    pub fn is_cacheable(&self) -> bool {
        self.cache_options.map(|o| o.enabled).unwrap_or(true)
    }
}

/// Predicate deciding whether an edge is active
pub type ConditionFn = Arc<dyn Fn(&NodeOutputs, &ChannelSet) -> bool + Send + Sync>;

/// Condition attached to an edge, evaluated against the upstream node's
/// outputs and the current channel state
#[derive(Clone)]
pub struct EdgeCondition {
    description: String,
    predicate: ConditionFn,
}

impl EdgeCondition {
    /// Create a condition from a predicate
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&NodeOutputs, &ChannelSet) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Active when the upstream output `key` equals `expected`
    pub fn output_equals(key: impl Into<String>, expected: Value) -> Self {
        let key = key.into();
        let description = format!("output[{}] == {}", key, expected);
        Self::new(description, move |outputs, _| outputs.get(&key) == Some(&expected))
    }

    /// Active when the upstream output `key` is `true`
    pub fn output_is_true(key: impl Into<String>) -> Self {
        Self::output_equals(key, Value::Bool(true))
    }

    /// Active when channel `name` currently holds `expected`
    pub fn channel_equals(name: impl Into<String>, expected: Value) -> Self {
        let name = name.into();
        let description = format!("channel[{}] == {}", name, expected);
        Self::new(description, move |_, channels| {
            channels.try_get(&name).as_ref() == Some(&expected)
        })
    }

    /// Human readable description (part of the graph hash)
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Evaluate the condition
    pub fn evaluate(&self, upstream_outputs: &NodeOutputs, channels: &ChannelSet) -> bool {
        (self.predicate)(upstream_outputs, channels)
    }
}

impl fmt::Debug for EdgeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeCondition")
            .field("description", &self.description)
            .finish()
    }
}

/// Directed data edge
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source node id
    pub from: NodeId,
    /// Target node id
    pub to: NodeId,
    /// Optional activation condition
    pub condition: Option<EdgeCondition>,
}

impl Edge {
    /// Unconditional edge
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    /// Conditional edge
    pub fn conditional(from: impl Into<NodeId>, to: impl Into<NodeId>, condition: EdgeCondition) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: Some(condition),
        }
    }

    /// Whether the edge carries a condition
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

/// Immutable graph of nodes and edges
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    entry_node_id: NodeId,
    exit_node_id: NodeId,
}

impl Graph {
    /// Assemble a graph; duplicate ids are kept for the validator to report
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>, entry: impl Into<NodeId>, exit: impl Into<NodeId>) -> Self {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            index.entry(node.id.clone()).or_insert(i);
        }
        Self {
            nodes,
            index,
            edges,
            entry_node_id: entry.into(),
            exit_node_id: exit.into(),
        }
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All edges
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Node by id (first one if ids are duplicated)
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Whether a node with this id exists
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Entry (Start) node id
    pub fn entry_node_id(&self) -> &str {
        &self.entry_node_id
    }

    /// Exit (End) node id
    pub fn exit_node_id(&self) -> &str {
        &self.exit_node_id
    }

    /// Edges ending at `id`
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Edges starting at `id`
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Sorted, de-duplicated upstream node ids
    pub fn predecessors(&self, id: &str) -> Vec<NodeId> {
        let set: BTreeSet<NodeId> = self.incoming(id).map(|e| e.from.clone()).collect();
        set.into_iter().collect()
    }

    /// Sorted, de-duplicated downstream node ids
    pub fn successors(&self, id: &str) -> Vec<NodeId> {
        let set: BTreeSet<NodeId> = self.outgoing(id).map(|e| e.to.clone()).collect();
        set.into_iter().collect()
    }

    /// Every node transitively downstream of `seeds` (seeds excluded unless
    /// reachable from another seed)
    pub fn downstream_closure<'a>(&self, seeds: impl IntoIterator<Item = &'a str>) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = seeds.into_iter().map(str::to_string).collect();
        while let Some(current) = queue.pop_front() {
            for edge in self.outgoing(&current) {
                if seen.insert(edge.to.clone()) {
                    queue.push_back(edge.to.clone());
                }
            }
        }
        seen
    }

    /// Layering that silently stops at a residual cycle
    pub fn execution_layers(&self) -> Vec<Vec<NodeId>> {
        self.layering().0
    }

    /// Layering that fails with [`GraphError::Cycle`] when nodes remain
    pub fn try_execution_layers(&self) -> Result<Vec<Vec<NodeId>>> {
        let (layers, remaining) = self.layering();
        if remaining.is_empty() {
            Ok(layers)
        } else {
            Err(GraphError::Cycle { remaining })
        }
    }

    fn layering(&self) -> (Vec<Vec<NodeId>>, Vec<NodeId>) {
        let work: Vec<&str> = self
            .index
            .iter()
            .filter(|&(_, &i)| !self.nodes[i].is_boundary())
            .map(|(id, _)| id.as_str())
            .collect();
        let members: BTreeSet<&str> = work.iter().copied().collect();

        let mut in_degree: HashMap<&str, usize> = work.iter().map(|id| (*id, 0)).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            let (from, to) = (edge.from.as_str(), edge.to.as_str());
            if members.contains(from) && members.contains(to) {
                adjacency.entry(from).or_default().push(to);
                if let Some(d) = in_degree.get_mut(to) {
                    *d += 1;
                }
            }
        }

        let mut layers = Vec::new();
        let mut current: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut placed = 0usize;

        while !current.is_empty() {
            current.sort_unstable();
            let mut next = Vec::new();
            for id in &current {
                for target in adjacency.get(id).into_iter().flatten() {
                    if let Some(d) = in_degree.get_mut(target) {
                        *d -= 1;
                        if *d == 0 {
                            next.push(*target);
                        }
                    }
                }
            }
            placed += current.len();
            layers.push(current.iter().map(|s| s.to_string()).collect());
            current = next;
        }

        let remaining = if placed == work.len() {
            Vec::new()
        } else {
            let mut rest: Vec<NodeId> = in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            rest.sort();
            rest
        };
        (layers, remaining)
    }

    /// Structural hash: node ids, types, handlers, bound inputs, nested graphs
    /// and edges (with condition descriptions). Used to invalidate snapshots.
    pub fn graph_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut nodes: Vec<&Node> = self.nodes.iter().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        for node in nodes {
            hasher.update(node.id.as_bytes());
            hasher.update(format!("{:?}", node.node_type).as_bytes());
            hasher.update(node.handler_name.as_deref().unwrap_or("").as_bytes());
            let bound: serde_json::Map<String, Value> = node
                .bound_inputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            hasher.update(canonical_json(&Value::Object(bound)).as_bytes());
            if let Some(sub) = &node.sub_graph {
                hasher.update(sub.graph_hash().as_bytes());
            }
            hasher.update([0u8]);
        }
        let mut edges: Vec<String> = self
            .edges
            .iter()
            .map(|e| {
                format!(
                    "{}->{}[{}]",
                    e.from,
                    e.to,
                    e.condition.as_ref().map(|c| c.description()).unwrap_or("")
                )
            })
            .collect();
        edges.sort();
        for edge in edges {
            hasher.update(edge.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.entry_node_id.as_bytes());
        hasher.update(self.exit_node_id.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Fluent builder for [`Graph`]
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    entry: NodeId,
    exit: NodeId,
}

impl GraphBuilder {
    /// Builder pre-populated with [`START`] and [`END`] boundary nodes
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::start(START), Node::end(END)],
            edges: Vec::new(),
            entry: START.to_string(),
            exit: END.to_string(),
        }
    }

    /// Builder with no nodes at all; set entry and exit explicitly
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: START.to_string(),
            exit: END.to_string(),
        }
    }

    /// Set the entry node id
    pub fn entry(mut self, id: impl Into<NodeId>) -> Self {
        self.entry = id.into();
        self
    }

    /// Set the exit node id
    pub fn exit(mut self, id: impl Into<NodeId>) -> Self {
        self.exit = id.into();
        self
    }

    /// Add a node
    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add an unconditional edge
    pub fn add_edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    /// Add a conditional edge
    pub fn add_conditional_edge(
        mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        condition: EdgeCondition,
    ) -> Self {
        self.edges.push(Edge::conditional(from, to, condition));
        self
    }

    /// Connect consecutive ids with unconditional edges
    pub fn chain(mut self, ids: &[&str]) -> Self {
        for pair in ids.windows(2) {
            self.edges.push(Edge::new(pair[0], pair[1]));
        }
        self
    }

    /// Assemble the graph without validating it
    pub fn build(self) -> Graph {
        Graph::new(self.nodes, self.edges, self.entry, self.exit)
    }

    /// Assemble the graph and reject it if the validator reports errors
    pub fn build_validated(self) -> Result<Graph> {
        let graph = self.build();
        crate::validator::GraphValidator::validate(&graph).into_result()?;
        Ok(graph)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear() -> Graph {
        GraphBuilder::new()
            .add_node(Node::handler("A", "h"))
            .add_node(Node::handler("B", "h"))
            .add_node(Node::handler("C", "h"))
            .chain(&[START, "A", "B", "C", END])
            .build()
    }

    fn diamond() -> Graph {
        GraphBuilder::new()
            .add_node(Node::handler("A", "h"))
            .add_node(Node::handler("B", "h"))
            .add_node(Node::handler("C", "h"))
            .add_node(Node::handler("D", "h"))
            .add_edge(START, "A")
            .add_edge("A", "B")
            .add_edge("A", "C")
            .add_edge("B", "D")
            .add_edge("C", "D")
            .add_edge("D", END)
            .build()
    }

    fn layers(expected: &[&[&str]]) -> Vec<Vec<String>> {
        expected
            .iter()
            .map(|layer| layer.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_linear_layers() {
        assert_eq!(linear().execution_layers(), layers(&[&["A"], &["B"], &["C"]]));
    }

    #[test]
    fn test_diamond_layers() {
        assert_eq!(
            diamond().execution_layers(),
            layers(&[&["A"], &["B", "C"], &["D"]])
        );
    }

    #[test]
    fn test_boundary_only_graph_has_no_layers() {
        let graph = GraphBuilder::new().add_edge(START, END).build();
        assert!(graph.execution_layers().is_empty());
        assert!(graph.try_execution_layers().unwrap().is_empty());
    }

    #[test]
    fn test_cycle_truncates_or_errors() {
        let graph = GraphBuilder::new()
            .add_node(Node::handler("A", "h"))
            .add_node(Node::handler("B", "h"))
            .add_node(Node::handler("C", "h"))
            .chain(&[START, "A", "B", "C", END])
            .add_edge("C", "B")
            .build();

        assert_eq!(graph.execution_layers(), layers(&[&["A"]]));
        match graph.try_execution_layers() {
            Err(GraphError::Cycle { remaining }) => assert_eq!(remaining, vec!["B", "C"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let graph = GraphBuilder::new()
            .add_node(Node::handler("A", "h"))
            .chain(&[START, "A", END])
            .add_edge("A", "A")
            .build();
        assert!(graph.try_execution_layers().is_err());
    }

    #[test]
    fn test_predecessors_and_closure() {
        let graph = diamond();
        assert_eq!(graph.predecessors("D"), vec!["B", "C"]);
        assert_eq!(graph.successors("A"), vec!["B", "C"]);

        let closure = graph.downstream_closure(["B"]);
        assert_eq!(closure.into_iter().collect::<Vec<_>>(), vec!["D", END]);
    }

    #[test]
    fn test_graph_hash_stable_and_sensitive() {
        assert_eq!(linear().graph_hash(), linear().graph_hash());
        assert_ne!(linear().graph_hash(), diamond().graph_hash());

        let bound = GraphBuilder::new()
            .add_node(Node::handler("A", "h").with_input("k", json!(1)))
            .chain(&[START, "A", END])
            .build();
        let bound2 = GraphBuilder::new()
            .add_node(Node::handler("A", "h").with_input("k", json!(2)))
            .chain(&[START, "A", END])
            .build();
        assert_ne!(bound.graph_hash(), bound2.graph_hash());
    }

    #[test]
    fn test_edge_conditions() {
        let channels = ChannelSet::new();
        let mut outputs = NodeOutputs::new();
        outputs.insert("approved".into(), json!(true));

        assert!(EdgeCondition::output_is_true("approved").evaluate(&outputs, &channels));
        assert!(!EdgeCondition::output_equals("approved", json!(false)).evaluate(&outputs, &channels));

        let by_channel = EdgeCondition::channel_equals("route", json!("left"));
        assert!(!by_channel.evaluate(&outputs, &channels));
        channels.set("route", json!("left")).unwrap();
        assert!(by_channel.evaluate(&outputs, &channels));
    }

    #[test]
    fn test_node_builders() {
        let node = Node::handler("n", "fetch")
            .with_name("Fetch")
            .with_timeout(Duration::from_secs(1))
            .with_cache_options(CacheOptions::disabled());
        assert_eq!(node.name, "Fetch");
        assert!(!node.is_cacheable());
        assert!(!node.is_boundary());
        assert!(Node::start("s").is_boundary());
    }
}
