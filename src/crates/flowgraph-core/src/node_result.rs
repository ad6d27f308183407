//! Node execution result types
//!
//! Handlers report their outcome as a [`NodeExecutionResult`] value. Failure,
//! suspension and cancellation are ordinary return values; the orchestrator
//! reads the tag and decides whether to retry, pause or stop the run.
//!
//! # Example: Success
//!
//! ```rust
//! use flowgraph_core::NodeExecutionResult;
//! use serde_json::json;
//!
//! let result = NodeExecutionResult::success([("count".to_string(), json!(42))]);
//! assert!(result.is_success());
//! assert_eq!(result.outputs().unwrap()["count"], json!(42));
//! ```
//!
//! # Example: Transient Failure
//!
//! ```rust
//! use flowgraph_core::{NodeExecutionResult, FailureSeverity};
//!
//! let result = NodeExecutionResult::transient_failure("upstream returned 503");
//! assert!(result.is_retryable());
//! ```

use flowgraph_checkpoint::NodeOutputs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Operator-facing severity of a node failure (informational only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSeverity {
    /// Run-breaking problem
    #[default]
    High,
    /// Degraded result
    Medium,
    /// Cosmetic or expected failure
    Low,
}

/// Outcome of a single node attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeExecutionResult {
    /// The node produced outputs
    Success {
        /// Named outputs
        outputs: NodeOutputs,
        /// Wall-clock duration of the attempt
        duration: Duration,
        /// Extra information (e.g. `cache_hit`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, Value>>,
    },
    /// The node failed
    Failure {
        /// Error message
        error: String,
        /// Severity for operators
        severity: FailureSeverity,
        /// Only transient failures are retried
        is_transient: bool,
        /// Outputs produced before the failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_outputs: Option<NodeOutputs>,
    },
    /// The node was not run
    Skipped {
        /// Why it was skipped
        reason: String,
        /// Upstream node whose failure caused the skip
        #[serde(default, skip_serializing_if = "Option::is_none")]
        upstream_failed_node: Option<String>,
    },
    /// The node paused the run awaiting external input
    Suspended {
        /// Token required to resume
        token: String,
        /// Partial value to persist with the suspension
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_value: Option<Value>,
    },
    /// The node was cancelled (run cancellation or timeout race lost)
    Cancelled {
        /// Why it was cancelled
        reason: String,
    },
}

impl NodeExecutionResult {
    /// Successful result with zero duration; the orchestrator stamps the real duration
    pub fn success(outputs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self::Success {
            outputs: outputs.into_iter().collect(),
            duration: Duration::ZERO,
            metadata: None,
        }
    }

    /// Successful result from an already-built output map
    pub fn from_outputs(outputs: NodeOutputs) -> Self {
        Self::success(outputs)
    }

    /// Permanent failure (never retried)
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            severity: FailureSeverity::High,
            is_transient: false,
            partial_outputs: None,
        }
    }

    /// Transient failure (eligible for retry)
    pub fn transient_failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            severity: FailureSeverity::Medium,
            is_transient: true,
            partial_outputs: None,
        }
    }

    /// Suspension with a resume token
    pub fn suspended(token: impl Into<String>) -> Self {
        Self::Suspended {
            token: token.into(),
            resume_value: None,
        }
    }

    /// Skip with a reason
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
            upstream_failed_node: None,
        }
    }

    /// Cancellation with a reason
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Override the severity of a failure; other variants are returned unchanged
    pub fn with_severity(mut self, new_severity: FailureSeverity) -> Self {
        if let Self::Failure { severity, .. } = &mut self {
            *severity = new_severity;
        }
        self
    }

    /// Attach partial outputs to a failure, or a resume value to a suspension
    pub fn with_partial(mut self, value: Value) -> Self {
        match &mut self {
            Self::Failure {
                partial_outputs, ..
            } => {
                if let Value::Object(map) = value {
                    *partial_outputs = Some(map.into_iter().collect());
                }
            }
            Self::Suspended { resume_value, .. } => *resume_value = Some(value),
            _ => {}
        }
        self
    }

    /// Add a metadata entry to a success
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        if let Self::Success { metadata, .. } = &mut self {
            metadata
                .get_or_insert_with(HashMap::new)
                .insert(key.into(), value);
        }
        self
    }

    /// Stamp the duration of a success
    pub(crate) fn with_duration(mut self, elapsed: Duration) -> Self {
        if let Self::Success { duration, .. } = &mut self {
            *duration = elapsed;
        }
        self
    }

    /// True for `Success`
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// True for a transient `Failure`
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failure { is_transient: true, .. })
    }

    /// True for `Failure`, `Suspended` and `Cancelled`, which stop the run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failure { .. } | Self::Suspended { .. } | Self::Cancelled { .. }
        )
    }

    /// Outputs of a success
    pub fn outputs(&self) -> Option<&NodeOutputs> {
        match self {
            Self::Success { outputs, .. } => Some(outputs),
            _ => None,
        }
    }

    /// Short status label used in logs and metrics
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Skipped { .. } => "skipped",
            Self::Suspended { .. } => "suspended",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}
