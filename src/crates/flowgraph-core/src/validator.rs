//! Structural graph validation
//!
//! [`GraphValidator::validate`] runs every check independently and collects
//! the findings into a [`ValidationReport`]. Errors block execution; warnings
//! are informational.
//!
//! | Code | Severity | Meaning |
//! |------|----------|---------|
//! | `MISSING_START` | error | entry node id not present |
//! | `INVALID_START_NODE` | error | entry node is not of type Start |
//! | `MISSING_END` | error | exit node id not present |
//! | `INVALID_END_NODE` | error | exit node is not of type End |
//! | `DUPLICATE_NODE_ID` | error | two nodes share an id |
//! | `UNKNOWN_EDGE_SOURCE` | error | edge starts at an unknown node |
//! | `UNKNOWN_EDGE_TARGET` | error | edge ends at an unknown node |
//! | `CYCLE_DETECTED` | warning | cycle among non-Start/End nodes |
//! | `END_UNREACHABLE` | error | exit not reachable from entry |
//! | `UNREACHABLE_NODE` | warning | node not reachable from entry |
//! | `ORPHANED_NODE` | warning | node with no edges at all |
//! | `MISSING_HANDLER_NAME` | warning | Handler node without a handler name |
//! | `DEAD_END_NODE` | error | reachable node that cannot reach exit |
//! | `MISSING_SUBGRAPH` | error | SubGraph node without a nested graph |
//!
//! Cycles are only a warning here; the orchestrator refuses to run a graph
//! whose layering leaves nodes behind.
//!
//! Nested graphs are validated recursively and their issues are reported with
//! node ids prefixed by `<subgraph node id>/`.
//!
//! # Example
//!
//! ```rust
//! use flowgraph_core::{GraphBuilder, GraphValidator, Node, START, END};
//!
//! let graph = GraphBuilder::new()
//!     .add_node(Node::handler("a", "step"))
//!     .chain(&[START, "a", END])
//!     .add_edge("a", "a")
//!     .build();
//!
//! let report = GraphValidator::validate(&graph);
//! assert!(report.is_valid());
//! assert!(report.has_code("CYCLE_DETECTED"));
//! ```

use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeType};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Issue codes reported by the validator
pub mod codes {
    pub const MISSING_START: &str = "MISSING_START";
    pub const INVALID_START_NODE: &str = "INVALID_START_NODE";
    pub const MISSING_END: &str = "MISSING_END";
    pub const INVALID_END_NODE: &str = "INVALID_END_NODE";
    pub const DUPLICATE_NODE_ID: &str = "DUPLICATE_NODE_ID";
    pub const UNKNOWN_EDGE_SOURCE: &str = "UNKNOWN_EDGE_SOURCE";
    pub const UNKNOWN_EDGE_TARGET: &str = "UNKNOWN_EDGE_TARGET";
    pub const CYCLE_DETECTED: &str = "CYCLE_DETECTED";
    pub const END_UNREACHABLE: &str = "END_UNREACHABLE";
    pub const UNREACHABLE_NODE: &str = "UNREACHABLE_NODE";
    pub const ORPHANED_NODE: &str = "ORPHANED_NODE";
    pub const MISSING_HANDLER_NAME: &str = "MISSING_HANDLER_NAME";
    pub const DEAD_END_NODE: &str = "DEAD_END_NODE";
    pub const MISSING_SUBGRAPH: &str = "MISSING_SUBGRAPH";
}

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks execution
    Error,
    /// Informational
    Warning,
}

/// A single validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl ValidationIssue {
    fn error(code: &str, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Error,
            message: message.into(),
            node_id: node_id.map(str::to_string),
        }
    }

    fn warning(code: &str, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message, node_id)
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "[{}] {} (node '{}')", self.code, self.message, id),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// All findings for one graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// False iff any error was reported
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// Whether an issue with `code` was reported
    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    /// `Err(GraphError::Validation)` listing every error, `Ok` otherwise
    pub fn into_result(self) -> Result<Self> {
        if self.is_valid() {
            return Ok(self);
        }
        let message = self
            .errors()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(GraphError::Validation(message))
    }
}

/// Runs structural checks over a [`Graph`]
pub struct GraphValidator;

impl GraphValidator {
    /// Validate a graph and every nested sub-graph
    pub fn validate(graph: &Graph) -> ValidationReport {
        let mut report = ValidationReport::default();
        Self::validate_into(graph, "", &mut report);
        report
    }

    fn validate_into(graph: &Graph, prefix: &str, report: &mut ValidationReport) {
        let mut checks = Checks {
            graph,
            prefix,
            issues: Vec::new(),
        };
        checks.boundaries();
        checks.duplicates();
        checks.edges();
        checks.cycles();
        checks.reachability();
        checks.orphans();
        checks.node_kinds();
        report.issues.append(&mut checks.issues);

        for node in graph.nodes() {
            if let Some(sub) = &node.sub_graph {
                let nested = format!("{}{}/", prefix, node.id);
                Self::validate_into(sub, &nested, report);
            }
        }
    }
}

struct Checks<'g> {
    graph: &'g Graph,
    prefix: &'g str,
    issues: Vec<ValidationIssue>,
}

impl<'g> Checks<'g> {
    fn id(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    fn error(&mut self, code: &str, message: String, node_id: Option<&str>) {
        let node_id = node_id.map(|id| self.id(id));
        self.issues
            .push(ValidationIssue::error(code, message, node_id.as_deref()));
    }

    fn warning(&mut self, code: &str, message: String, node_id: Option<&str>) {
        let node_id = node_id.map(|id| self.id(id));
        self.issues
            .push(ValidationIssue::warning(code, message, node_id.as_deref()));
    }

    fn boundaries(&mut self) {
        let entry = self.graph.entry_node_id();
        match self.graph.node(entry).map(|n| n.node_type) {
            None => self.error(
                codes::MISSING_START,
                format!("entry node '{}' does not exist", entry),
                None,
            ),
            Some(NodeType::Start) => {}
            Some(other) => self.error(
                codes::INVALID_START_NODE,
                format!("entry node is {:?}, expected Start", other),
                Some(entry),
            ),
        }

        let exit = self.graph.exit_node_id();
        match self.graph.node(exit).map(|n| n.node_type) {
            None => self.error(
                codes::MISSING_END,
                format!("exit node '{}' does not exist", exit),
                None,
            ),
            Some(NodeType::End) => {}
            Some(other) => self.error(
                codes::INVALID_END_NODE,
                format!("exit node is {:?}, expected End", other),
                Some(exit),
            ),
        }
    }

    fn duplicates(&mut self) {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for node in self.graph.nodes() {
            if !seen.insert(node.id.as_str()) && reported.insert(node.id.as_str()) {
                self.error(
                    codes::DUPLICATE_NODE_ID,
                    format!("node id '{}' is used more than once", node.id),
                    Some(&node.id),
                );
            }
        }
    }

    fn edges(&mut self) {
        for edge in self.graph.edges() {
            if !self.graph.contains(&edge.from) {
                self.error(
                    codes::UNKNOWN_EDGE_SOURCE,
                    format!("edge {} -> {} starts at an unknown node", edge.from, edge.to),
                    Some(&edge.from),
                );
            }
            if !self.graph.contains(&edge.to) {
                self.error(
                    codes::UNKNOWN_EDGE_TARGET,
                    format!("edge {} -> {} ends at an unknown node", edge.from, edge.to),
                    Some(&edge.to),
                );
            }
        }
    }

    fn is_work_node(&self, id: &str) -> bool {
        self.graph
            .node(id)
            .map(|n| !n.is_boundary())
            .unwrap_or(false)
    }

    /// Depth-first search with a recursion stack over non-boundary nodes
    fn cycles(&mut self) {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in self.graph.edges() {
            if self.is_work_node(&edge.from) && self.is_work_node(&edge.to) {
                adjacency
                    .entry(edge.from.as_str())
                    .or_default()
                    .push(edge.to.as_str());
            }
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        let mut found: Vec<(String, String)> = Vec::new();

        for node in self.graph.nodes() {
            if node.is_boundary() || visited.contains(node.id.as_str()) {
                continue;
            }
            // (node, next child index)
            let mut stack: Vec<(&str, usize)> = vec![(node.id.as_str(), 0)];
            visited.insert(node.id.as_str());
            on_stack.insert(node.id.as_str());

            while let Some((current, child)) = stack.last_mut() {
                let children = adjacency.get(*current).map(Vec::as_slice).unwrap_or(&[]);
                if let Some(&next) = children.get(*child) {
                    *child += 1;
                    if on_stack.contains(next) {
                        found.push((current.to_string(), next.to_string()));
                    } else if visited.insert(next) {
                        on_stack.insert(next);
                        stack.push((next, 0));
                    }
                } else {
                    on_stack.remove(*current);
                    stack.pop();
                }
            }
        }

        for (from, to) in found {
            self.warning(
                codes::CYCLE_DETECTED,
                format!("cycle closed by edge {} -> {}", from, to),
                Some(&to),
            );
        }
    }

    fn reach(&self, start: &str, forward: bool) -> HashSet<String> {
        let mut seen = HashSet::new();
        if !self.graph.contains(start) {
            return seen;
        }
        let mut queue = VecDeque::from([start.to_string()]);
        seen.insert(start.to_string());
        while let Some(current) = queue.pop_front() {
            let next = if forward {
                self.graph.successors(&current)
            } else {
                self.graph.predecessors(&current)
            };
            for id in next {
                if self.graph.contains(&id) && seen.insert(id.clone()) {
                    queue.push_back(id);
                }
            }
        }
        seen
    }

    fn reachability(&mut self) {
        let entry = self.graph.entry_node_id().to_string();
        let exit = self.graph.exit_node_id().to_string();
        if !self.graph.contains(&entry) || !self.graph.contains(&exit) {
            return;
        }

        let from_entry = self.reach(&entry, true);
        if !from_entry.contains(&exit) {
            self.error(
                codes::END_UNREACHABLE,
                format!("exit '{}' is not reachable from entry '{}'", exit, entry),
                Some(&exit),
            );
        }

        let to_exit = self.reach(&exit, false);
        let mut unreachable = Vec::new();
        let mut dead_ends = Vec::new();
        for node in self.graph.nodes() {
            if node.id == entry || node.id == exit || node.is_boundary() {
                continue;
            }
            if !from_entry.contains(&node.id) {
                unreachable.push(node.id.clone());
            } else if !to_exit.contains(&node.id) {
                dead_ends.push(node.id.clone());
            }
        }

        for id in unreachable {
            self.warning(
                codes::UNREACHABLE_NODE,
                format!("node '{}' is not reachable from entry", id),
                Some(&id),
            );
        }
        for id in dead_ends {
            self.error(
                codes::DEAD_END_NODE,
                format!("node '{}' cannot reach exit", id),
                Some(&id),
            );
        }
    }

    fn orphans(&mut self) {
        let mut connected: HashSet<&str> = HashSet::new();
        for edge in self.graph.edges() {
            connected.insert(&edge.from);
            connected.insert(&edge.to);
        }
        let orphans: Vec<String> = self
            .graph
            .nodes()
            .iter()
            .filter(|n| !n.is_boundary() && !connected.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();
        for id in orphans {
            self.warning(
                codes::ORPHANED_NODE,
                format!("node '{}' has no incoming or outgoing edges", id),
                Some(&id),
            );
        }
    }

    fn node_kinds(&mut self) {
        for node in self.graph.nodes() {
            match node.node_type {
                NodeType::Handler if node.handler_name.as_deref().map_or(true, str::is_empty) => {
                    self.warning(
                        codes::MISSING_HANDLER_NAME,
                        format!("handler node '{}' has no handler name", node.id),
                        Some(&node.id),
                    )
                }
                NodeType::SubGraph if node.sub_graph.is_none() => self.error(
                    codes::MISSING_SUBGRAPH,
                    format!("sub-graph node '{}' has no nested graph", node.id),
                    Some(&node.id),
                ),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, Node, END, START};

    fn codes_of(report: &ValidationReport) -> Vec<&str> {
        report.issues.iter().map(|i| i.code.as_str()).collect()
    }

    #[test]
    fn test_valid_linear_graph() {
        let graph = GraphBuilder::new()
            .add_node(Node::handler("A", "h"))
            .add_node(Node::handler("B", "h"))
            .chain(&[START, "A", "B", END])
            .build();
        let report = GraphValidator::validate(&graph);
        assert!(report.is_valid(), "{:?}", report);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_missing_end() {
        let graph = GraphBuilder::empty()
            .add_node(Node::start(START))
            .add_node(Node::handler("A", "h"))
            .chain(&[START, "A"])
            .build();
        let report = GraphValidator::validate(&graph);
        assert!(!report.is_valid());
        assert!(report.has_code(codes::MISSING_END));
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_invalid_boundary_types() {
        let graph = GraphBuilder::empty()
            .add_node(Node::handler(START, "h"))
            .add_node(Node::router(END))
            .add_edge(START, END)
            .build();
        let report = GraphValidator::validate(&graph);
        assert!(report.has_code(codes::INVALID_START_NODE));
        assert!(report.has_code(codes::INVALID_END_NODE));
    }

    #[test]
    fn test_self_loop_is_warning_only() {
        let graph = GraphBuilder::new()
            .add_node(Node::handler("A", "h"))
            .chain(&[START, "A", END])
            .add_edge("A", "A")
            .build();
        let report = GraphValidator::validate(&graph);
        assert!(report.is_valid());
        assert_eq!(codes_of(&report), vec![codes::CYCLE_DETECTED]);
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_duplicates_and_unknown_edges() {
        let graph = GraphBuilder::new()
            .add_node(Node::handler("A", "h"))
            .add_node(Node::handler("A", "h"))
            .chain(&[START, "A", END])
            .add_edge("ghost", "A")
            .add_edge("A", "phantom")
            .build();
        let report = GraphValidator::validate(&graph);
        assert!(report.has_code(codes::DUPLICATE_NODE_ID));
        assert!(report.has_code(codes::UNKNOWN_EDGE_SOURCE));
        assert!(report.has_code(codes::UNKNOWN_EDGE_TARGET));
        assert_eq!(
            report
                .issues
                .iter()
                .filter(|i| i.code == codes::DUPLICATE_NODE_ID)
                .count(),
            1
        );
    }

    #[test]
    fn test_reachability_checks() {
        let graph = GraphBuilder::new()
            .add_node(Node::handler("A", "h"))
            .add_node(Node::handler("dead", "h"))
            .add_node(Node::handler("island", "h"))
            .add_node(Node::handler("lonely", "h"))
            .chain(&[START, "A", END])
            .add_edge("A", "dead")
            .add_edge("island", END)
            .build();
        let report = GraphValidator::validate(&graph);
        assert!(!report.is_valid());
        assert!(report.has_code(codes::DEAD_END_NODE));
        assert!(report.has_code(codes::UNREACHABLE_NODE));
        assert!(report.has_code(codes::ORPHANED_NODE));
        assert!(!report.has_code(codes::END_UNREACHABLE));
    }

    #[test]
    fn test_end_unreachable() {
        let graph = GraphBuilder::new()
            .add_node(Node::handler("A", "h"))
            .chain(&[START, "A"])
            .build();
        let report = GraphValidator::validate(&graph);
        assert!(report.has_code(codes::END_UNREACHABLE));
        assert!(report.has_code(codes::DEAD_END_NODE));
    }

    #[test]
    fn test_node_kind_checks_and_nested_prefix() {
        let mut nameless = Node::handler("nameless", "x");
        nameless.handler_name = None;
        let inner = GraphBuilder::new()
            .add_node(nameless)
            .chain(&[START, "nameless", END])
            .build();

        let graph = GraphBuilder::new()
            .add_node(Node::sub_graph("child", inner))
            .add_node(Node::new("hollow", NodeType::SubGraph))
            .chain(&[START, "child", "hollow", END])
            .build();
        let report = GraphValidator::validate(&graph);
        assert!(report.has_code(codes::MISSING_SUBGRAPH));

        let nested = report
            .issues
            .iter()
            .find(|i| i.code == codes::MISSING_HANDLER_NAME)
            .unwrap();
        assert_eq!(nested.node_id.as_deref(), Some("child/nameless"));
    }
}
