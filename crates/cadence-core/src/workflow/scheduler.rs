//! Execution scheduler: admission, per-execution driver tasks, and the
//! execution record store.
//!
//! Every admitted execution gets one spawned driver task that walks the
//! resolved step order. Only that task advances the execution; everyone
//! else reads snapshots from the `DashMap` or waits on the execution's
//! `watch` channel. No map guard is ever held across an `.await` or while
//! events are emitted.
//!
//! # Driver loop
//!
//! For each step in order:
//! 1. Stop if the execution already reached a terminal status.
//! 2. Check that every dependency settled as completed or skipped.
//! 3. Evaluate the guard; a false guard skips the step.
//! 4. Bind the config against the current variables and run the step
//!    (or pause for approval).
//! 5. On success merge the result into the variables and run `on_success`;
//!    on failure run `on_failure` and fail the execution.
//!
//! The terminal transition is exactly-once: `finish` is the only place that
//! sets a terminal status, and it releases the admission slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cadence_types::config::EngineConfig;
use cadence_types::error::WorkflowError;
use cadence_types::event::WorkflowEvent;
use cadence_types::workflow::{
    EngineStats, ExecutionStatus, StepExecution, StepStatus, StepType, Variables,
    WorkflowDefinition, WorkflowExecution, WorkflowStep,
};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::collaborator::Collaborators;
use crate::event::EventSink;

use super::actions::ActionDispatcher;
use super::binder;
use super::condition;
use super::dag;
use super::registry::WorkflowRegistry;
use super::step_runner::{RunnerSettings, StepError, StepOutput, StepRunner};

/// Metadata key holding the reason a cancelled execution was stopped.
pub const CANCELLATION_REASON_KEY: &str = "cancellation_reason";

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

struct ExecutionSlot {
    record: WorkflowExecution,
    definition: Arc<WorkflowDefinition>,
    cancel: CancellationToken,
    status_tx: watch::Sender<ExecutionStatus>,
    /// Approval steps currently waiting for a decision, by step ID.
    approvals: HashMap<String, oneshot::Sender<bool>>,
}

impl ExecutionSlot {
    fn set_status(&mut self, status: ExecutionStatus) {
        self.record.status = status;
        self.status_tx.send_replace(status);
    }
}

/// How an execution ended.
#[derive(Debug, Clone)]
enum Termination {
    Completed,
    Failed {
        error: String,
        step_id: Option<String>,
    },
    Cancelled {
        reason: String,
    },
}

impl Termination {
    fn status(&self) -> ExecutionStatus {
        match self {
            Termination::Completed => ExecutionStatus::Completed,
            Termination::Failed { .. } => ExecutionStatus::Failed,
            Termination::Cancelled { .. } => ExecutionStatus::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionScheduler
// ---------------------------------------------------------------------------

/// Admits executions and drives each one on its own Tokio task.
///
/// Cheap to clone; clones share the same executions.
#[derive(Clone)]
pub struct ExecutionScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    registry: Arc<WorkflowRegistry>,
    runner: StepRunner,
    actions: ActionDispatcher,
    events: EventSink,
    max_concurrent: usize,
    slots: DashMap<Uuid, ExecutionSlot>,
    active: AtomicUsize,
}

impl ExecutionScheduler {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        collaborators: Collaborators,
        config: &EngineConfig,
        events: EventSink,
    ) -> Self {
        let actions = ActionDispatcher::new(collaborators.messenger.clone());
        Self {
            inner: Arc::new(SchedulerInner {
                registry,
                runner: StepRunner::new(collaborators, RunnerSettings::from(config)),
                actions,
                events,
                max_concurrent: config.max_concurrent_executions,
                slots: DashMap::new(),
                active: AtomicUsize::new(0),
            }),
        }
    }

    /// Admit and start an execution of `workflow_id`.
    ///
    /// `variables` are layered over the workflow's default variables. Step
    /// failures never surface here; they end up on the execution record.
    /// Must be called from within a Tokio runtime.
    pub fn execute(
        &self,
        workflow_id: &str,
        variables: Variables,
        triggered_by: &str,
    ) -> Result<Uuid, WorkflowError> {
        let inner = &self.inner;
        let definition = inner
            .registry
            .get(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
        let order = dag::resolve_order(&definition.steps)?;
        inner.admit()?;

        let mut initial = definition.variables.clone();
        initial.extend(variables);
        let record = WorkflowExecution::new(definition.id.clone(), initial, triggered_by.to_string());
        let execution_id = record.id;
        let (status_tx, _) = watch::channel(record.status);

        inner.slots.insert(
            execution_id,
            ExecutionSlot {
                record,
                definition: Arc::clone(&definition),
                cancel: CancellationToken::new(),
                status_tx,
                approvals: HashMap::new(),
            },
        );

        tracing::info!(
            execution_id = %execution_id,
            workflow_id = %definition.id,
            triggered_by,
            steps = order.len(),
            "execution admitted"
        );
        inner.events.emit(WorkflowEvent::ExecutionStarted {
            execution_id,
            workflow_id: definition.id.clone(),
            triggered_by: triggered_by.to_string(),
        });

        let driver = tokio::spawn(Arc::clone(inner).drive(execution_id, definition, order));
        let supervisor = Arc::clone(inner);
        tokio::spawn(async move {
            if let Err(e) = driver.await {
                if e.is_panic() {
                    tracing::error!(execution_id = %execution_id, "execution driver panicked");
                    supervisor.finish(
                        execution_id,
                        Termination::Failed {
                            error: "execution driver panicked".to_string(),
                            step_id: None,
                        },
                    );
                }
            }
        });

        Ok(execution_id)
    }

    /// Cancel a non-terminal execution.
    ///
    /// Returns `Ok(false)` if the execution already finished. A step handler
    /// that is mid-flight is not preempted; its result is discarded.
    pub fn cancel(&self, execution_id: Uuid, reason: &str) -> Result<bool, WorkflowError> {
        if !self.inner.slots.contains_key(&execution_id) {
            return Err(WorkflowError::ExecutionNotFound(execution_id));
        }
        Ok(self.inner.finish(
            execution_id,
            Termination::Cancelled {
                reason: reason.to_string(),
            },
        ))
    }

    /// Deliver a decision to a waiting approval step.
    ///
    /// Returns `Ok(false)` when the step exists but is not currently waiting.
    pub fn resume_human_approval(
        &self,
        execution_id: Uuid,
        step_id: &str,
        approved: bool,
    ) -> Result<bool, WorkflowError> {
        let sender = {
            let mut slot = self
                .inner
                .slots
                .get_mut(&execution_id)
                .ok_or(WorkflowError::ExecutionNotFound(execution_id))?;
            if slot.definition.step(step_id).is_none() {
                return Err(WorkflowError::StepNotFound {
                    execution_id,
                    step_id: step_id.to_string(),
                });
            }
            slot.approvals.remove(step_id)
        };

        let delivered = sender.is_some_and(|tx| tx.send(approved).is_ok());
        tracing::info!(
            execution_id = %execution_id,
            step_id,
            approved,
            delivered,
            "approval decision received"
        );
        Ok(delivered)
    }

    /// Snapshot of an execution record.
    pub fn get(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        self.inner
            .slots
            .get(&execution_id)
            .map(|slot| slot.record.clone())
    }

    /// Executions in start order, optionally restricted to one workflow.
    pub fn list(&self, workflow_id: Option<&str>) -> Vec<WorkflowExecution> {
        let mut records: Vec<WorkflowExecution> = self
            .inner
            .slots
            .iter()
            .filter(|slot| workflow_id.is_none_or(|id| slot.record.workflow_id == id))
            .map(|slot| slot.record.clone())
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Non-terminal executions in start order.
    pub fn list_active(&self) -> Vec<WorkflowExecution> {
        let mut records: Vec<WorkflowExecution> = self
            .inner
            .slots
            .iter()
            .filter(|slot| !slot.record.status.is_terminal())
            .map(|slot| slot.record.clone())
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Number of admitted, non-terminal executions.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn watch_status(&self, execution_id: Uuid) -> Option<watch::Receiver<ExecutionStatus>> {
        self.inner
            .slots
            .get(&execution_id)
            .map(|slot| slot.status_tx.subscribe())
    }

    /// Wait until the execution's status satisfies `predicate`.
    pub async fn wait_for_status(
        &self,
        execution_id: Uuid,
        mut predicate: impl FnMut(ExecutionStatus) -> bool,
    ) -> Result<ExecutionStatus, WorkflowError> {
        let mut rx = self
            .watch_status(execution_id)
            .ok_or(WorkflowError::ExecutionNotFound(execution_id))?;
        let status = rx
            .wait_for(|status| predicate(*status))
            .await
            .map_err(|_| WorkflowError::ExecutionNotFound(execution_id))?;
        Ok(*status)
    }

    /// Wait for the execution to finish and return its final record.
    pub async fn wait_for_terminal(&self, execution_id: Uuid) -> Result<WorkflowExecution, WorkflowError> {
        self.wait_for_status(execution_id, |s| s.is_terminal()).await?;
        self.get(execution_id)
            .ok_or(WorkflowError::ExecutionNotFound(execution_id))
    }

    /// Execution counters. `total_workflows` is left at zero for the caller.
    pub fn stats(&self) -> EngineStats {
        let mut stats = EngineStats {
            active_executions: self.active(),
            ..EngineStats::default()
        };
        for slot in self.inner.slots.iter() {
            stats.total_executions += 1;
            match slot.record.status {
                ExecutionStatus::Completed => stats.completed_executions += 1,
                ExecutionStatus::Failed => stats.failed_executions += 1,
                ExecutionStatus::Cancelled => stats.cancelled_executions += 1,
                _ => {}
            }
        }
        stats
    }

    /// Cancel every non-terminal execution, returning the IDs cancelled.
    pub fn cancel_all(&self, reason: &str) -> Vec<Uuid> {
        self.cancel_matching(reason, |_| true)
    }

    /// Cancel every non-terminal execution of `workflow_id`.
    pub fn cancel_for_workflow(&self, workflow_id: &str, reason: &str) -> Vec<Uuid> {
        self.cancel_matching(reason, |record| record.workflow_id == workflow_id)
    }

    /// Cancel everything and drop all execution records.
    pub fn clear(&self) {
        self.cancel_all("engine cleared");
        self.inner.slots.clear();
    }

    fn cancel_matching(
        &self,
        reason: &str,
        matches: impl Fn(&WorkflowExecution) -> bool,
    ) -> Vec<Uuid> {
        let ids: Vec<Uuid> = self
            .inner
            .slots
            .iter()
            .filter(|slot| !slot.record.status.is_terminal() && matches(&slot.record))
            .map(|slot| *slot.key())
            .collect();

        ids.into_iter()
            .filter(|id| {
                self.inner.finish(
                    *id,
                    Termination::Cancelled {
                        reason: reason.to_string(),
                    },
                )
            })
            .collect()
    }
}

impl std::fmt::Debug for ExecutionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionScheduler")
            .field("executions", &self.inner.slots.len())
            .field("active", &self.active())
            .field("max_concurrent", &self.inner.max_concurrent)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

impl SchedulerInner {
    fn admit(&self) -> Result<(), WorkflowError> {
        let limit = self.max_concurrent;
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| WorkflowError::Capacity { limit })
    }

    fn release(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    /// Run `f` against the live record. `None` once the slot is gone.
    fn with_slot<R>(&self, execution_id: Uuid, f: impl FnOnce(&mut ExecutionSlot) -> R) -> Option<R> {
        self.slots.get_mut(&execution_id).map(|mut slot| f(slot.value_mut()))
    }

    fn is_live(&self, execution_id: Uuid) -> bool {
        self.slots
            .get(&execution_id)
            .is_some_and(|slot| !slot.record.status.is_terminal())
    }

    async fn drive(
        self: Arc<Self>,
        execution_id: Uuid,
        definition: Arc<WorkflowDefinition>,
        order: Vec<String>,
    ) {
        let started = self.with_slot(execution_id, |slot| {
            if slot.record.status.is_terminal() {
                return None;
            }
            slot.set_status(ExecutionStatus::Running);
            Some((slot.record.variables.clone(), slot.cancel.clone()))
        });
        let Some((mut variables, cancel)) = started.flatten() else {
            return;
        };
        self.events.emit(WorkflowEvent::ExecutionRunning { execution_id });

        for step_id in &order {
            if cancel.is_cancelled() || !self.is_live(execution_id) {
                return;
            }
            let Some(step) = definition.step(step_id) else {
                continue;
            };

            if let Some(dep) = self.unsettled_dependency(execution_id, step) {
                self.finish(
                    execution_id,
                    Termination::Failed {
                        error: format!("dependency '{dep}' did not complete"),
                        step_id: Some(step.id.clone()),
                    },
                );
                return;
            }

            self.with_slot(execution_id, |slot| {
                slot.record.current_step = Some(step.id.clone());
                slot.record
                    .step_executions
                    .insert(step.id.clone(), StepExecution::pending(&step.id));
            });

            if let Some(expr) = &step.condition {
                if !condition::evaluate(expr, &variables) {
                    self.update_step(execution_id, &step.id, |se| {
                        se.status = StepStatus::Skipped;
                        se.completed_at = Some(Utc::now());
                    });
                    tracing::debug!(execution_id = %execution_id, step_id = %step.id, "step skipped by guard");
                    self.events.emit(WorkflowEvent::StepSkipped {
                        execution_id,
                        step_id: step.id.clone(),
                    });
                    continue;
                }
            }

            if !self.run_step(execution_id, step, &mut variables, &cancel).await {
                return;
            }
        }

        self.finish(execution_id, Termination::Completed);
    }

    /// First dependency of `step` that is not completed or skipped.
    fn unsettled_dependency(&self, execution_id: Uuid, step: &WorkflowStep) -> Option<String> {
        let slot = self.slots.get(&execution_id)?;
        step.dependencies
            .iter()
            .find(|dep| {
                !matches!(
                    slot.record.step(dep).map(|se| se.status),
                    Some(StepStatus::Completed | StepStatus::Skipped)
                )
            })
            .cloned()
    }

    /// Run one step and apply its outcome. Returns whether the driver
    /// should continue with the next step.
    async fn run_step(
        &self,
        execution_id: Uuid,
        step: &WorkflowStep,
        variables: &mut Variables,
        cancel: &CancellationToken,
    ) -> bool {
        let config = binder::bind(&step.config, variables);
        self.update_step(execution_id, &step.id, |se| {
            se.status = StepStatus::Running;
            se.started_at = Some(Utc::now());
        });
        tracing::debug!(
            execution_id = %execution_id,
            step_id = %step.id,
            step_type = %step.step_type,
            "step started"
        );
        self.events.emit(WorkflowEvent::StepStarted {
            execution_id,
            step_id: step.id.clone(),
            step_type: step.step_type.to_string(),
        });

        let clock = Instant::now();
        let (outcome, retries) = if step.step_type == StepType::HumanApproval {
            (self.await_approval(execution_id, step, cancel).await, 0)
        } else {
            let on_retry = |retry: u32, delay: Duration, error: &StepError| {
                self.update_step(execution_id, &step.id, |se| se.retry_count = retry);
                tracing::warn!(
                    execution_id = %execution_id,
                    step_id = %step.id,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "step attempt failed; retrying"
                );
                self.events.emit(WorkflowEvent::StepRetrying {
                    execution_id,
                    step_id: step.id.clone(),
                    retry,
                    delay_ms: delay.as_millis() as u64,
                    error: error.to_string(),
                });
            };
            let run = self
                .runner
                .run(step, &config, variables, cancel, &on_retry)
                .await;
            (run.outcome, run.retries)
        };

        self.settle_step(execution_id, &step.id, &outcome, retries);
        if !self.is_live(execution_id) {
            tracing::debug!(execution_id = %execution_id, step_id = %step.id, "execution ended while step was in flight");
            return false;
        }

        match outcome {
            Ok(output) => {
                binder::merge(variables, &output.value);
                self.events.emit(WorkflowEvent::StepCompleted {
                    execution_id,
                    step_id: step.id.clone(),
                    duration_ms: clock.elapsed().as_millis() as u64,
                });
                self.actions
                    .dispatch(&step.on_success, execution_id, &step.id, variables)
                    .await;
                self.publish_variables(execution_id, variables);
                true
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(execution_id = %execution_id, step_id = %step.id, retries, error = %error, "step failed");
                self.events.emit(WorkflowEvent::StepFailed {
                    execution_id,
                    step_id: step.id.clone(),
                    error: error.clone(),
                });
                self.actions
                    .dispatch(&step.on_failure, execution_id, &step.id, variables)
                    .await;
                self.publish_variables(execution_id, variables);
                self.finish(
                    execution_id,
                    Termination::Failed {
                        error,
                        step_id: Some(step.id.clone()),
                    },
                );
                false
            }
        }
    }

    async fn await_approval(
        &self,
        execution_id: Uuid,
        step: &WorkflowStep,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepError> {
        let (tx, rx) = oneshot::channel();
        let paused = self
            .with_slot(execution_id, |slot| {
                if slot.record.status.is_terminal() {
                    return false;
                }
                slot.approvals.insert(step.id.clone(), tx);
                slot.set_status(ExecutionStatus::Paused);
                true
            })
            .unwrap_or(false);
        if !paused {
            return Err(StepError::Cancelled);
        }

        tracing::info!(execution_id = %execution_id, step_id = %step.id, "execution paused for approval");
        self.events.emit(WorkflowEvent::ExecutionPaused {
            execution_id,
            step_id: step.id.clone(),
        });

        let result = self.runner.await_approval(step, rx, cancel).await;

        let resumed = self
            .with_slot(execution_id, |slot| {
                slot.approvals.remove(&step.id);
                if result.is_ok() && slot.record.status == ExecutionStatus::Paused {
                    slot.set_status(ExecutionStatus::Running);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if resumed {
            self.events.emit(WorkflowEvent::ExecutionResumed {
                execution_id,
                step_id: step.id.clone(),
            });
        }
        result
    }

    fn update_step(&self, execution_id: Uuid, step_id: &str, f: impl FnOnce(&mut StepExecution)) {
        self.with_slot(execution_id, |slot| {
            if let Some(se) = slot.record.step_executions.get_mut(step_id) {
                f(se);
            }
        });
    }

    fn settle_step(
        &self,
        execution_id: Uuid,
        step_id: &str,
        outcome: &Result<StepOutput, StepError>,
        retries: u32,
    ) {
        self.update_step(execution_id, step_id, |se| {
            se.completed_at = Some(Utc::now());
            se.retry_count = retries;
            match outcome {
                Ok(output) => {
                    se.status = StepStatus::Completed;
                    se.result = Some(output.value.clone());
                    se.assigned_to = output.assigned_to.clone();
                }
                Err(e) => {
                    se.status = StepStatus::Failed;
                    se.error = Some(e.to_string());
                }
            }
        });
    }

    fn publish_variables(&self, execution_id: Uuid, variables: &Variables) {
        self.with_slot(execution_id, |slot| {
            slot.record.variables = variables.clone();
        });
    }

    /// Move the execution to a terminal status. Returns false if it was
    /// already terminal (or gone), in which case nothing happens.
    fn finish(&self, execution_id: Uuid, termination: Termination) -> bool {
        let status = termination.status();
        let finished = self.with_slot(execution_id, |slot| {
            if slot.record.status.is_terminal() {
                return None;
            }
            let now = Utc::now();
            let record = &mut slot.record;
            record.completed_at = Some(now);
            match &termination {
                Termination::Completed => record.current_step = None,
                Termination::Failed { error, step_id } => {
                    record.error = Some(error.clone());
                    record.failed_step = step_id.clone();
                }
                Termination::Cancelled { reason } => {
                    record
                        .metadata
                        .insert(CANCELLATION_REASON_KEY.to_string(), Value::String(reason.clone()));
                }
            }
            let duration_ms = (now - record.started_at).num_milliseconds().max(0) as u64;
            let steps_completed = record.count_steps(StepStatus::Completed) as u32;
            let workflow_id = record.workflow_id.clone();

            slot.approvals.clear();
            slot.set_status(status);
            slot.cancel.cancel();
            Some((workflow_id, duration_ms, steps_completed))
        });
        let Some((workflow_id, duration_ms, steps_completed)) = finished.flatten() else {
            return false;
        };
        self.release();

        let event = match termination {
            Termination::Completed => {
                tracing::info!(execution_id = %execution_id, workflow_id = %workflow_id, duration_ms, steps_completed, "execution completed");
                WorkflowEvent::ExecutionCompleted {
                    execution_id,
                    workflow_id,
                    duration_ms,
                    steps_completed,
                }
            }
            Termination::Failed { error, step_id } => {
                tracing::warn!(execution_id = %execution_id, workflow_id = %workflow_id, failed_step = ?step_id, error = %error, "execution failed");
                WorkflowEvent::ExecutionFailed {
                    execution_id,
                    workflow_id,
                    failed_step: step_id,
                    error,
                }
            }
            Termination::Cancelled { reason } => {
                tracing::info!(execution_id = %execution_id, workflow_id = %workflow_id, reason = %reason, "execution cancelled");
                WorkflowEvent::ExecutionCancelled {
                    execution_id,
                    workflow_id,
                    reason,
                }
            }
        };
        self.events.emit(event);
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
