//! Error types for channel and checkpoint operations

use thiserror::Error;

/// Result type for channel and checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while reading or writing channels and checkpoints
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Checkpoint not found
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid checkpoint or channel payload
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// The channel's update discipline does not allow this operation
    #[error("Unsupported operation '{operation}' on channel '{channel}'")]
    UnsupportedOperation {
        /// Channel name
        channel: String,
        /// Operation that was attempted (`set`, `update`, ...)
        operation: &'static str,
    },

    /// The channel exists but is not in a readable state (e.g. unsatisfied barrier)
    #[error("Channel '{channel}' is in an invalid state: {reason}")]
    InvalidState {
        /// Channel name
        channel: String,
        /// Human readable reason
        reason: String,
    },

    /// The channel has never been written
    #[error("Channel '{0}' is empty")]
    EmptyChannel(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    /// Shorthand for [`CheckpointError::UnsupportedOperation`]
    pub fn unsupported(channel: impl Into<String>, operation: &'static str) -> Self {
        Self::UnsupportedOperation {
            channel: channel.into(),
            operation,
        }
    }
}
