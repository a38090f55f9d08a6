//! `WorkflowEngine`: the inbound API.
//!
//! One engine owns one registry, one scheduler, and one event sink. Engines
//! share nothing, so several can run side by side in the same process (tests
//! do exactly that).

use std::sync::Arc;

use cadence_types::config::EngineConfig;
use cadence_types::error::WorkflowError;
use cadence_types::event::WorkflowEvent;
use cadence_types::workflow::{
    EngineStats, ExecutionStatus, Variables, WorkflowDefinition, WorkflowExecution, WorkflowPatch,
};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::collaborator::Collaborators;
use crate::event::{EventSink, ExecutionObserver};

use super::builtin::builtin_workflows;
use super::registry::WorkflowRegistry;
use super::scheduler::ExecutionScheduler;

/// Reason recorded on executions cancelled through `cancel_execution`.
pub const CANCELLED_BY_REQUEST: &str = "cancelled by request";

pub struct WorkflowEngine {
    config: EngineConfig,
    registry: Arc<WorkflowRegistry>,
    scheduler: ExecutionScheduler,
    events: EventSink,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let registry = Arc::new(WorkflowRegistry::new());
        let events = EventSink::new(config.event_capacity);
        let scheduler = ExecutionScheduler::new(
            Arc::clone(&registry),
            collaborators,
            &config,
            events.clone(),
        );
        let engine = Self {
            config,
            registry,
            scheduler,
            events,
        };
        engine.seed_builtins();
        tracing::info!(
            max_concurrent = engine.config.max_concurrent_executions,
            workflows = engine.registry.len(),
            "workflow engine ready"
        );
        engine
    }

    pub fn with_observer(self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.add_observer(observer);
        self
    }

    pub fn add_observer(&self, observer: Arc<dyn ExecutionObserver>) {
        self.events.add_observer(observer);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn seed_builtins(&self) {
        if !self.config.seed_builtin_workflows {
            return;
        }
        match builtin_workflows() {
            Ok(defs) => {
                for def in defs {
                    let id = def.id.clone();
                    if let Err(e) = self.registry.create(def) {
                        tracing::error!(workflow_id = %id, error = %e, "failed to seed built-in workflow");
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "built-in workflows are invalid"),
        }
    }

    // -- Definitions --

    /// Validate and register a workflow, returning its ID.
    pub fn create_workflow(&self, definition: WorkflowDefinition) -> Result<String, WorkflowError> {
        let stored = self.registry.create(definition)?;
        tracing::info!(workflow_id = %stored.id, name = %stored.name, steps = stored.steps.len(), "workflow created");
        self.events.emit(WorkflowEvent::WorkflowCreated {
            workflow_id: stored.id.clone(),
            name: stored.name.clone(),
        });
        Ok(stored.id.clone())
    }

    /// Patch a workflow. `Ok(false)` when the ID is unknown.
    ///
    /// Running executions keep the definition they started with.
    pub fn update_workflow(&self, workflow_id: &str, patch: WorkflowPatch) -> Result<bool, WorkflowError> {
        let Some(updated) = self.registry.update(workflow_id, patch)? else {
            return Ok(false);
        };
        tracing::info!(workflow_id = %updated.id, "workflow updated");
        self.events.emit(WorkflowEvent::WorkflowUpdated {
            workflow_id: updated.id.clone(),
        });
        Ok(true)
    }

    /// Remove a workflow and cancel its active executions.
    ///
    /// The definition leaves the registry before anything is cancelled, so no
    /// new execution of it can be admitted in between.
    pub fn delete_workflow(&self, workflow_id: &str) -> bool {
        if self.registry.remove(workflow_id).is_none() {
            return false;
        }
        let cancelled = self
            .scheduler
            .cancel_for_workflow(workflow_id, "workflow deleted");
        tracing::info!(workflow_id, cancelled = cancelled.len(), "workflow deleted");
        self.events.emit(WorkflowEvent::WorkflowDeleted {
            workflow_id: workflow_id.to_string(),
            cancelled_executions: cancelled,
        });
        true
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.registry.get(workflow_id)
    }

    pub fn list_workflows(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.registry.list()
    }

    // -- Executions --

    /// Start an execution. Returns as soon as the execution is admitted.
    pub fn execute_workflow(
        &self,
        workflow_id: &str,
        variables: Variables,
        triggered_by: &str,
    ) -> Result<Uuid, WorkflowError> {
        self.scheduler.execute(workflow_id, variables, triggered_by)
    }

    pub fn resume_human_approval(
        &self,
        execution_id: Uuid,
        step_id: &str,
        approved: bool,
    ) -> Result<bool, WorkflowError> {
        self.scheduler
            .resume_human_approval(execution_id, step_id, approved)
    }

    /// `Ok(false)` when the execution already finished.
    pub fn cancel_execution(&self, execution_id: Uuid) -> Result<bool, WorkflowError> {
        self.scheduler.cancel(execution_id, CANCELLED_BY_REQUEST)
    }

    pub fn get_execution(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        self.scheduler.get(execution_id)
    }

    pub fn list_executions(&self, workflow_id: Option<&str>) -> Vec<WorkflowExecution> {
        self.scheduler.list(workflow_id)
    }

    pub fn active_executions(&self) -> Vec<WorkflowExecution> {
        self.scheduler.list_active()
    }

    /// Wait for an execution to reach a terminal status.
    pub async fn wait_for_completion(&self, execution_id: Uuid) -> Result<WorkflowExecution, WorkflowError> {
        self.scheduler.wait_for_terminal(execution_id).await
    }

    pub async fn wait_for_status(
        &self,
        execution_id: Uuid,
        predicate: impl FnMut(ExecutionStatus) -> bool,
    ) -> Result<ExecutionStatus, WorkflowError> {
        self.scheduler.wait_for_status(execution_id, predicate).await
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            total_workflows: self.registry.len(),
            ..self.scheduler.stats()
        }
    }

    // -- Lifecycle --

    /// Cancel everything, drop all definitions and executions, and reseed
    /// the built-in workflows.
    pub fn clear(&self) {
        self.scheduler.clear();
        self.registry.clear();
        self.seed_builtins();
        tracing::info!("workflow engine cleared");
    }

    /// Cancel every active execution. Records stay readable.
    pub fn shutdown(&self) -> Vec<Uuid> {
        let cancelled = self.scheduler.cancel_all("engine shutdown");
        tracing::info!(cancelled = cancelled.len(), "workflow engine shut down");
        cancelled
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("workflows", &self.registry.len())
            .field("scheduler", &self.scheduler)
            .field("events", &self.events)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
