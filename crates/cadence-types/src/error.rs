use thiserror::Error;
use uuid::Uuid;

/// Errors returned synchronously by the engine's inbound API.
///
/// Step-level failures never surface here: once an execution is admitted its
/// outcome is only observable through the execution record and lifecycle
/// events.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The definition violates a structural rule.
    #[error("validation error: {0}")]
    Validation(String),

    /// The dependency graph contains a cycle through the named step.
    #[error("cycle detected involving step '{step_id}'")]
    Cycle { step_id: String },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("step '{step_id}' not found in execution {execution_id}")]
    StepNotFound { execution_id: Uuid, step_id: String },

    /// The scheduler is already running its maximum number of executions.
    #[error("maximum concurrent executions reached ({limit})")]
    Capacity { limit: usize },

    /// A definition file could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkflowError {
    /// True for the "unknown workflow/execution/step" family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            WorkflowError::WorkflowNotFound(_)
                | WorkflowError::ExecutionNotFound(_)
                | WorkflowError::StepNotFound { .. }
        )
    }
}

/// Errors reported by outbound collaborators (directories, messenger).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator rejected request: {0}")]
    Rejected(String),
}
