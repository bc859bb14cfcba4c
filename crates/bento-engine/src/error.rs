//! Error types for the bento engine

use thiserror::Error;

use crate::expression::ExpressionError;
use crate::validation::{PreflightError, ValidationError};

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while validating or executing a bento
#[derive(Debug, Error)]
pub enum EngineError {
    /// The definition is structurally invalid
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// An environment preflight check failed
    #[error("Preflight failed: {0}")]
    Preflight(#[from] PreflightError),

    /// A node failed; annotated with the node where the failure originated
    #[error("Node '{node_id}' failed: {source}")]
    NodeFailed {
        node_id: String,
        #[source]
        source: Box<EngineError>,
    },

    /// A node reported a failure that has not been attributed to a node yet
    #[error("{0}")]
    ExecutionFailed(String),

    /// A required parameter is missing or has the wrong shape at execution time
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// No executable is registered for the requested type
    #[error("No executable registered for node type '{0}'")]
    UnknownNodeType(String),

    /// Expression compilation or evaluation failed
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Nesting went deeper than the configured limit
    #[error("Node '{node_id}' exceeds maximum nesting depth of {max_depth}")]
    MaxDepthExceeded { node_id: String, max_depth: usize },

    /// The run was cancelled by the caller
    #[error("Execution cancelled")]
    Cancelled,

    /// The run deadline elapsed
    #[error("Execution deadline exceeded")]
    DeadlineExceeded,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error (or the error it annotates) is a cancellation
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled | Self::DeadlineExceeded => true,
            Self::NodeFailed { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Attach the originating node id.
    ///
    /// Cancellations and errors that already carry a node id pass through
    /// untouched, so nested failures are annotated exactly once.
    pub fn at_node(self, node_id: &str) -> Self {
        match self {
            Self::NodeFailed { .. } | Self::Cancelled | Self::DeadlineExceeded => self,
            other => Self::NodeFailed {
                node_id: node_id.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The id of the node where the failure originated, if known
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeFailed { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_node_annotates_once() {
        let err = EngineError::failed("boom").at_node("inner").at_node("outer");
        assert_eq!(err.node_id(), Some("inner"));
        assert_eq!(err.to_string(), "Node 'inner' failed: boom");
    }

    #[test]
    fn test_cancellation_is_never_annotated() {
        let err = EngineError::Cancelled.at_node("n1");
        assert!(matches!(err, EngineError::Cancelled));
        assert!(err.is_cancellation());
        assert!(EngineError::DeadlineExceeded.is_cancellation());
        assert!(!EngineError::failed("x").is_cancellation());
    }
}
