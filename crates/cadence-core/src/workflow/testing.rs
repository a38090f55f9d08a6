//! Shared test fixtures for the workflow modules.

use std::sync::atomic::{AtomicU32, Ordering};

use cadence_types::error::CollaboratorError;
use cadence_types::workflow::{StepType, Variables, WorkflowStep};
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::collaborator::{CollaboratorResult, TaskAssignment};

/// Unwrap a `json!` object literal into a `Variables` map.
pub fn object(value: Value) -> Variables {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn step_with_config(id: &str, step_type: StepType, config: Value) -> WorkflowStep {
    let mut step = WorkflowStep::new(id, step_type);
    step.config = object(config);
    step
}

/// Task assignment that fails its first `fail_first` calls and counts every call.
#[derive(Default)]
pub struct FailingTaskAssignment {
    fail_first: Option<u32>,
    calls: AtomicU32,
}

impl FailingTaskAssignment {
    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_first: Some(n),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TaskAssignment for FailingTaskAssignment {
    fn assign<'a>(
        &'a self,
        agent_id: &'a str,
        task_id: &'a str,
        _priority: i64,
    ) -> BoxFuture<'a, CollaboratorResult<String>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fail_first {
                Some(n) if call > n => Ok(format!("assignment_{agent_id}_{task_id}")),
                _ => Err(CollaboratorError::Unavailable(format!(
                    "assignment service down (call {call})"
                ))),
            }
        })
    }
}
