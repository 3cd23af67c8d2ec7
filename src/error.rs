//! Error types for the analyst pipeline

use crate::workflow::NodeId;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Workflow Errors
    // =============================

    #[error("Workflow configuration error: {0}")]
    WorkflowConfiguration(String),

    #[error("Schema validation failed for {schema}: {}", .issues.join("; "))]
    SchemaValidation {
        schema: &'static str,
        issues: Vec<String>,
    },

    #[error("Node {node} failed: {source}")]
    NodeFailed {
        node: NodeId,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Run cancelled while {node} was active")]
    Cancelled { node: NodeId },

    // =============================
    // Collaborator Errors
    // =============================

    #[error("Tool provider unavailable: {0}")]
    ToolProviderUnavailable(String),

    #[error("Upstream data unavailable: {0}")]
    UpstreamDataUnavailable(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("LLM refused to answer: {0}")]
    LlmRefusal(String),

    #[error("Timed out after {seconds}s waiting for {operation}")]
    Timeout {
        operation: String,
        seconds: u64,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    /// The node a fatal error was raised in, if it was raised inside one.
    pub fn failed_node(&self) -> Option<NodeId> {
        match self {
            PipelineError::NodeFailed { node, .. } | PipelineError::Cancelled { node } => {
                Some(*node)
            }
            _ => None,
        }
    }

    /// Configuration problems are never retried and are reported as caller errors.
    pub fn is_configuration(&self) -> bool {
        match self {
            PipelineError::WorkflowConfiguration(_) | PipelineError::Config(_) => true,
            PipelineError::NodeFailed { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}
