// Error types for the workflow engine

use thiserror::Error;

use crate::status::NodeStatus;

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors that can occur across the engine
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Workflow spec has no nodes
    #[error("workflow must contain at least one node")]
    EmptyWorkflow,

    /// Two nodes share an id
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    /// A dependency points at a node that does not exist
    #[error("node '{node_id}' references missing dependency '{missing_dependency}'")]
    InvalidNodeReference {
        node_id: String,
        missing_dependency: String,
    },

    /// The dependency graph contains a cycle
    #[error("cyclic dependency detected involving nodes: {0:?}")]
    CyclicDependency(Vec<String>),

    /// Node status change outside the legal transition relation
    #[error("invalid status transition for node '{node_id}' from '{from}' to '{to}'")]
    InvalidTransition {
        node_id: String,
        from: NodeStatus,
        to: NodeStatus,
    },

    /// Execution id does not resolve
    #[error("execution '{0}' not found")]
    ExecutionNotFound(String),

    /// Workflow definition missing or malformed
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// Handler failed while processing a task
    #[error("handler error: {0}")]
    Handler(String),

    /// Hot state store error
    #[error("state store error: {0}")]
    Store(String),

    /// Message broker error
    #[error("message broker error: {0}")]
    Broker(String),

    /// Cold store error
    #[error("repository error: {0}")]
    Repository(String),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Create a handler error
    pub fn handler(msg: impl Into<String>) -> Self {
        WorkflowError::Handler(msg.into())
    }

    /// Create a state store error
    pub fn store(msg: impl std::fmt::Display) -> Self {
        WorkflowError::Store(msg.to_string())
    }

    /// Create a message broker error
    pub fn broker(msg: impl std::fmt::Display) -> Self {
        WorkflowError::Broker(msg.to_string())
    }

    /// Create a cold store error
    pub fn repository(msg: impl std::fmt::Display) -> Self {
        WorkflowError::Repository(msg.to_string())
    }

    /// Stable machine-readable code, carried across API boundaries and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            WorkflowError::EmptyWorkflow => "EMPTY_WORKFLOW",
            WorkflowError::DuplicateNodeId(_) => "DUPLICATE_NODE_ID",
            WorkflowError::InvalidNodeReference { .. } => "INVALID_NODE_REFERENCE",
            WorkflowError::CyclicDependency(_) => "CYCLIC_DEPENDENCY",
            WorkflowError::InvalidTransition { .. } => "INVALID_STATUS_TRANSITION",
            WorkflowError::ExecutionNotFound(_) => "EXECUTION_NOT_FOUND",
            WorkflowError::InvalidWorkflow(_) => "INVALID_WORKFLOW",
            WorkflowError::Handler(_) => "HANDLER_ERROR",
            WorkflowError::Store(_) => "STATE_STORE_ERROR",
            WorkflowError::Broker(_) => "BROKER_ERROR",
            WorkflowError::Repository(_) => "REPOSITORY_ERROR",
            WorkflowError::Serialization(_) => "SERIALIZATION_ERROR",
            WorkflowError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
