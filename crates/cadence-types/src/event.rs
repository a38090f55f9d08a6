//! Lifecycle events emitted by the workflow engine.
//!
//! `WorkflowEvent` is the single typed event broadcast on every definition
//! and execution state transition. All variants are Clone + Send + Sync for
//! use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::ExecutionStatus;

/// Events emitted during workflow definition management and execution.
///
/// Consumed by observers (logging, persistence, UIs). Durable storage of
/// executions is expected to subscribe to these rather than live in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    // -- Definitions --
    WorkflowCreated {
        workflow_id: String,
        name: String,
    },

    WorkflowUpdated {
        workflow_id: String,
    },

    WorkflowDeleted {
        workflow_id: String,
        /// Executions cancelled by the cascade.
        cancelled_executions: Vec<Uuid>,
    },

    // -- Executions --
    /// An execution was admitted and created in `pending`.
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: String,
        triggered_by: String,
    },

    /// The driver began advancing the execution (`pending` -> `running`).
    ExecutionRunning {
        execution_id: Uuid,
    },

    /// A human approval step paused the execution.
    ExecutionPaused {
        execution_id: Uuid,
        step_id: String,
    },

    /// A paused execution was approved and continues.
    ExecutionResumed {
        execution_id: Uuid,
        step_id: String,
    },

    ExecutionCompleted {
        execution_id: Uuid,
        workflow_id: String,
        duration_ms: u64,
        steps_completed: u32,
    },

    ExecutionFailed {
        execution_id: Uuid,
        workflow_id: String,
        failed_step: Option<String>,
        error: String,
    },

    ExecutionCancelled {
        execution_id: Uuid,
        workflow_id: String,
        reason: String,
    },

    // -- Steps --
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        step_type: String,
    },

    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },

    StepSkipped {
        execution_id: Uuid,
        step_id: String,
    },

    /// An attempt failed and the step will be retried after `delay_ms`.
    StepRetrying {
        execution_id: Uuid,
        step_id: String,
        retry: u32,
        delay_ms: u64,
        error: String,
    },

    StepFailed {
        execution_id: Uuid,
        step_id: String,
        error: String,
    },
}

impl WorkflowEvent {
    /// Execution this event belongs to, if any.
    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            WorkflowEvent::WorkflowCreated { .. }
            | WorkflowEvent::WorkflowUpdated { .. }
            | WorkflowEvent::WorkflowDeleted { .. } => None,
            WorkflowEvent::ExecutionStarted { execution_id, .. }
            | WorkflowEvent::ExecutionRunning { execution_id }
            | WorkflowEvent::ExecutionPaused { execution_id, .. }
            | WorkflowEvent::ExecutionResumed { execution_id, .. }
            | WorkflowEvent::ExecutionCompleted { execution_id, .. }
            | WorkflowEvent::ExecutionFailed { execution_id, .. }
            | WorkflowEvent::ExecutionCancelled { execution_id, .. }
            | WorkflowEvent::StepStarted { execution_id, .. }
            | WorkflowEvent::StepCompleted { execution_id, .. }
            | WorkflowEvent::StepSkipped { execution_id, .. }
            | WorkflowEvent::StepRetrying { execution_id, .. }
            | WorkflowEvent::StepFailed { execution_id, .. } => Some(*execution_id),
        }
    }

    /// The terminal status this event announces, if it is a terminal event.
    pub fn terminal_status(&self) -> Option<ExecutionStatus> {
        match self {
            WorkflowEvent::ExecutionCompleted { .. } => Some(ExecutionStatus::Completed),
            WorkflowEvent::ExecutionFailed { .. } => Some(ExecutionStatus::Failed),
            WorkflowEvent::ExecutionCancelled { .. } => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}
