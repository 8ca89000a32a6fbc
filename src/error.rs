//! Error types for the agent-flow engine.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Task scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid task: {reason}")]
    InvalidTask { reason: String },

    #[error("Task {id} not found")]
    NotFound { id: String },

    #[error("Task {id} is {from}, cannot transition to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Task {id} reached the retry limit ({max})")]
    RetryLimitExceeded { id: String, max: u32 },
}

/// Workflow graph and execution errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow {id} not found")]
    NotFound { id: String },

    #[error("Node {node_id} not found in workflow {workflow_id}")]
    NodeNotFound {
        workflow_id: String,
        node_id: String,
    },

    #[error("Node id {node_id} already exists in workflow {workflow_id}")]
    DuplicateNodeId {
        workflow_id: String,
        node_id: String,
    },

    #[error("Connection {source_node}:{source_port} -> {target_node}:{target_port} already exists")]
    DuplicateConnection {
        source_node: String,
        source_port: String,
        target_node: String,
        target_port: String,
    },

    #[error("Invalid connection: {reason}")]
    InvalidConnection { reason: String },

    #[error("Circular dependency detected in workflow {workflow_id}")]
    CircularDependency { workflow_id: String },

    #[error("Workflow {id} is invalid: {errors}")]
    InvalidWorkflow { id: String, errors: String },

    #[error("Workflow {id} is running")]
    Busy { id: String },

    #[error("Node {node_id} failed: {source}")]
    NodeExecutionFailed {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("Workflow {id} was deleted during execution")]
    Cancelled { id: String },

    #[error("Failed to import workflow: {0}")]
    Import(String),
}

impl WorkflowError {
    /// Whether re-running the same workflow unchanged can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Busy { .. } => true,
            Self::NodeExecutionFailed { source, .. } => {
                matches!(source, NodeError::TaskFailed { .. })
            }
            _ => false,
        }
    }
}

/// Failures raised while executing a single node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("missing required {field} in node {node_id} config")]
    MissingConfiguration { node_id: String, field: String },

    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    #[error("task {task_id} vanished from the scheduler")]
    TaskVanished { task_id: String },

    #[error("stopped while waiting on task {task_id}")]
    Cancelled { task_id: String },

    #[error("scheduler rejected task: {0}")]
    Scheduler(#[from] TaskError),
}

/// Agent pool and runner errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent {id} not found")]
    NotFound { id: String },

    #[error("Agent {id} is {status}, not idle")]
    NotIdle { id: String, status: String },

    #[error("Agent {agent_id} failed: {reason}")]
    ExecutionFailed { agent_id: String, reason: String },
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },
}
