//! Error types for graph construction, validation and orchestration
//!
//! `GraphError` covers everything that stops a run *before* it starts or that
//! breaks the orchestrator itself. Node-level failures are not errors: they
//! travel as [`NodeExecutionResult::Failure`](crate::NodeExecutionResult)
//! values, and suspension and cancellation are terminal run statuses.
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Validation      - Graph structure rejected by the validator
//! ├── Configuration   - Unknown handler, bad config value, depth exceeded
//! ├── Cycle           - Layering could not linearize the graph
//! ├── NodeExecution   - Orchestrator-level failure tied to one node
//! ├── InvalidResume   - Resume called with a wrong execution id or token
//! ├── Checkpoint      - Persistence errors (from flowgraph-checkpoint)
//! ├── Serialization   - JSON errors
//! ├── Yaml            - Config file parsing errors
//! ├── Io              - File system errors
//! ├── Timeout         - Operation timeouts
//! └── Custom          - Application-defined errors
//! ```
//!
//! # Matching Specific Errors
//!
//! ```rust
//! use flowgraph_core::error::GraphError;
//!
//! fn describe(err: &GraphError) -> &'static str {
//!     match err {
//!         GraphError::Validation(_) | GraphError::Configuration(_) => "fix the graph",
//!         GraphError::Cycle { .. } => "remove the cycle",
//!         GraphError::InvalidResume(_) => "check the resume token",
//!         _ => "unexpected",
//!     }
//! }
//!
//! let err = GraphError::Configuration("handler 'fetch' is not registered".into());
//! assert_eq!(describe(&err), "fix the graph");
//! ```

use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by graph construction, validation and orchestration
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph validation failed
    ///
    /// Raised when the validator reports at least one error-severity issue.
    /// The message lists the offending issue codes.
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// Configuration is invalid
    ///
    /// **Common causes**:
    /// - A node references a handler name that is not registered
    /// - `max_parallelism` set to zero
    /// - Sub-graph nesting deeper than `max_subgraph_depth`
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Topological layering left nodes that are part of a cycle
    #[error("Graph contains a cycle involving: {}", remaining.join(", "))]
    Cycle {
        /// Node ids that could not be placed in any layer, sorted
        remaining: Vec<String>,
    },

    /// Orchestrator-level failure tied to a node
    ///
    /// # Example
    ///
    /// ```rust
    /// use flowgraph_core::error::GraphError;
    ///
    /// let err = GraphError::node_execution("fetch", "task panicked");
    /// assert_eq!(format!("{}", err), "Node 'fetch' execution failed: task panicked");
    /// ```
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Node id
        node: String,
        /// Error message
        error: String,
    },

    /// Resume request does not match the suspended run
    #[error("Invalid resume request: {0}")]
    InvalidResume(String),

    /// Checkpoint or channel error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] flowgraph_checkpoint::CheckpointError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// What was running
        operation: String,
        /// Timeout that elapsed
        duration_ms: u64,
    },

    /// Application-defined error
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    /// Create a node execution error with context
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Whether this error was detected before any node ran
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Configuration(_) | Self::Cycle { .. }
        )
    }
}
