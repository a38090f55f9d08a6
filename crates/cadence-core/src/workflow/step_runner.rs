//! Step runner for all six workflow step types.
//!
//! `StepRunner` dispatches a step to the handler for its `StepType`, applies
//! the per-attempt timeout, and drives the retry loop described by the
//! step's `RetryPolicy`. Handlers receive a config that has already been
//! bound against the execution's variables (see `binder`), so any value
//! that came from a `${...}` token arrives as a string. Numeric, boolean,
//! and list parameters therefore accept their textual forms too.
//!
//! Step types: task, decision, parallel, wait, notification, human_approval.
//! `human_approval` is the odd one out: it never runs through `run`; the
//! scheduler pauses the execution and calls `await_approval` instead.

use std::future::Future;
use std::time::Duration;

use cadence_types::config::EngineConfig;
use cadence_types::error::CollaboratorError;
use cadence_types::workflow::{StepStatus, StepType, Variables, WorkflowStep};
use futures_util::stream;
use futures_util::{FutureExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::collaborator::{AgentProfile, Collaborators, TaskSpec};

use super::binder;
use super::condition;
use super::definition;
use super::retry::RetryHandler;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Wait step delay when `delay` is not configured.
pub const DEFAULT_WAIT_MS: u64 = 1_000;

/// Sender used for notification steps that do not name one.
pub const DEFAULT_SENDER: &str = "system";

// ---------------------------------------------------------------------------
// StepOutput / StepRun
// ---------------------------------------------------------------------------

/// What a successful step produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// Result recorded on the step; object results are merged into variables.
    pub value: Value,
    /// Agent the step's work went to, if any.
    pub assigned_to: Option<String>,
}

impl StepOutput {
    fn plain(value: Value) -> Self {
        Self {
            value,
            assigned_to: None,
        }
    }

    fn assigned(value: Value, agent_id: String) -> Self {
        Self {
            value,
            assigned_to: Some(agent_id),
        }
    }
}

/// Final outcome of a step after all retries.
#[derive(Debug)]
pub struct StepRun {
    pub outcome: Result<StepOutput, StepError>,
    /// Retries performed (0 when the first attempt settled the step).
    pub retries: u32,
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors that can occur during step execution.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The handler ran and failed.
    #[error("{0}")]
    Handler(String),

    /// The step's config is missing a required key or has a malformed value.
    #[error("invalid step config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// A single attempt exceeded the step timeout.
    #[error("step timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("approval was rejected")]
    ApprovalRejected,

    #[error("approval timed out")]
    ApprovalTimeout,

    #[error("execution was cancelled")]
    Cancelled,
}

impl StepError {
    /// Cancellation and approval outcomes are final; everything else may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StepError::Cancelled | StepError::ApprovalRejected | StepError::ApprovalTimeout
        )
    }
}

// ---------------------------------------------------------------------------
// Parallel sub-step reports
// ---------------------------------------------------------------------------

/// Per-sub-step entry in a parallel step's `results` list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubStepReport {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Engine-level knobs the runner needs.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub default_timeout_ms: Option<u64>,
    pub max_parallelism: usize,
    pub max_backoff_delay_ms: u64,
}

impl From<&EngineConfig> for RunnerSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            default_timeout_ms: config.default_step_timeout_ms,
            max_parallelism: config.max_parallelism,
            max_backoff_delay_ms: config.max_backoff_delay_ms,
        }
    }
}

/// Called before each retry with the retry number, the backoff delay, and
/// the error that caused it.
pub type RetryHook<'a> = &'a (dyn Fn(u32, Duration, &StepError) + Send + Sync);

/// Executes individual workflow steps by dispatching to type-specific handlers.
pub struct StepRunner {
    collaborators: Collaborators,
    settings: RunnerSettings,
}

impl StepRunner {
    pub fn new(collaborators: Collaborators, settings: RunnerSettings) -> Self {
        Self {
            collaborators,
            settings,
        }
    }

    /// Run a step to completion, including timeouts and retries.
    ///
    /// `config` is the step config already bound against `variables`;
    /// `variables` is only consulted by parallel steps, whose sub-steps are
    /// guarded and bound individually.
    pub async fn run(
        &self,
        step: &WorkflowStep,
        config: &Variables,
        variables: &Variables,
        cancel: &CancellationToken,
        on_retry: RetryHook<'_>,
    ) -> StepRun {
        self.with_retries(step, cancel, on_retry, || {
            self.timed(step, self.dispatch(step, config, variables, cancel))
        })
        .await
    }

    /// Wait for a human decision on an approval step.
    ///
    /// Only the step's own `timeout_ms` applies; the engine default step
    /// timeout does not. A dropped sender means the execution ended while
    /// waiting and is reported as cancellation.
    pub async fn await_approval(
        &self,
        step: &WorkflowStep,
        decision: oneshot::Receiver<bool>,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepError> {
        let wait = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(StepError::Cancelled),
                decision = decision => match decision {
                    Ok(true) => Ok(StepOutput::plain(json!({ "approved": true }))),
                    Ok(false) => Err(StepError::ApprovalRejected),
                    Err(_) => Err(StepError::Cancelled),
                },
            }
        };
        match step.timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), wait)
                .await
                .unwrap_or(Err(StepError::ApprovalTimeout)),
            None => wait.await,
        }
    }

    // -- Attempt loop --

    async fn with_retries<F, Fut>(
        &self,
        step: &WorkflowStep,
        cancel: &CancellationToken,
        on_retry: RetryHook<'_>,
        mut attempt: F,
    ) -> StepRun
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<StepOutput, StepError>>,
    {
        let mut retries = 0;
        loop {
            let error = match attempt().await {
                Ok(output) => {
                    return StepRun {
                        outcome: Ok(output),
                        retries,
                    };
                }
                Err(e) => e,
            };

            let policy = match step.retry.as_ref() {
                Some(policy) if RetryHandler::should_retry(Some(policy), retries, &error) => policy,
                _ => {
                    return StepRun {
                        outcome: Err(error),
                        retries,
                    };
                }
            };

            retries += 1;
            let delay = RetryHandler::delay_for(policy, retries, self.settings.max_backoff_delay_ms);
            on_retry(retries, delay, &error);

            tokio::select! {
                _ = cancel.cancelled() => {
                    return StepRun {
                        outcome: Err(StepError::Cancelled),
                        retries,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn timed<Fut>(&self, step: &WorkflowStep, fut: Fut) -> Result<StepOutput, StepError>
    where
        Fut: Future<Output = Result<StepOutput, StepError>>,
    {
        match step.timeout_ms.or(self.settings.default_timeout_ms) {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), fut)
                .await
                .unwrap_or(Err(StepError::Timeout { timeout_ms: ms })),
            None => fut.await,
        }
    }

    // -- Dispatch --

    async fn dispatch(
        &self,
        step: &WorkflowStep,
        config: &Variables,
        variables: &Variables,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepError> {
        match step.step_type {
            StepType::Parallel => self.run_parallel(step, config, variables, cancel).await,
            _ => self.dispatch_leaf(step, config, variables).await,
        }
    }

    /// Dispatch for every type that cannot contain other steps.
    async fn dispatch_leaf(
        &self,
        step: &WorkflowStep,
        config: &Variables,
        variables: &Variables,
    ) -> Result<StepOutput, StepError> {
        tracing::debug!(step_id = %step.id, step_type = %step.step_type, "running step handler");
        let params = BoundConfig {
            raw: &step.config,
            bound: config,
            variables,
        };
        match step.step_type {
            StepType::Task => self.run_task(&params).await,
            StepType::Decision => self.run_decision(config).await,
            StepType::Wait => self.run_wait(config).await,
            StepType::Notification => self.run_notification(&params).await,
            StepType::Parallel => Err(StepError::InvalidConfig(format!(
                "parallel step '{}' cannot be nested",
                step.id
            ))),
            StepType::HumanApproval => Err(StepError::InvalidConfig(format!(
                "human_approval step '{}' must be resolved by the scheduler",
                step.id
            ))),
        }
    }

    // -- Task --

    async fn run_task(&self, params: &BoundConfig<'_>) -> Result<StepOutput, StepError> {
        let config = params.bound;
        let action = required_text(config, "action")?;
        match action.as_str() {
            "assign_to_agent" => {
                let service = self.collaborators.task_assignment.as_ref().ok_or_else(|| {
                    StepError::Handler("no task assignment service configured".to_string())
                })?;
                let agent_id = params.identifier("agentId")?;
                let task_id = params.identifier("taskId")?;
                let priority = param_i64(config, "priority")?.unwrap_or(1);

                let assignment_id = service.assign(&agent_id, &task_id, priority).await?;
                Ok(StepOutput::assigned(
                    json!({
                        "assignmentId": assignment_id,
                        "agentId": agent_id,
                        "taskId": task_id,
                    }),
                    agent_id,
                ))
            }
            "create_task" => {
                let directory = self.collaborators.team_directory.as_ref().ok_or_else(|| {
                    StepError::Handler("no team directory configured".to_string())
                })?;
                let spec = TaskSpec {
                    title: required_text(config, "title")?,
                    description: optional_text(config, "description")?,
                    priority: optional_text(config, "priority")?
                        .unwrap_or_else(|| "medium".to_string()),
                    assignee: optional_text(config, "assignee")?,
                };
                let assignee = spec.assignee.clone();

                let task_id = directory.create_task(spec).await?;
                Ok(StepOutput {
                    value: json!({ "taskId": task_id }),
                    assigned_to: assignee,
                })
            }
            "find_agents" => {
                let capabilities = param_list(config, "capabilities")?;
                let agents: Vec<AgentProfile> = self
                    .available_agents()
                    .await?
                    .into_iter()
                    .filter(|a| a.has_all(&capabilities))
                    .collect();
                let total = agents.len();
                Ok(StepOutput::plain(json!({
                    "agents": agents,
                    "totalFound": total,
                })))
            }
            other => Err(StepError::Handler(format!("unknown task action '{other}'"))),
        }
    }

    // -- Decision --

    async fn run_decision(&self, config: &Variables) -> Result<StepOutput, StepError> {
        let strategy = required_text(config, "strategy")?;
        let agents = match strategy.as_str() {
            "best_match" | "first_available" => self.available_agents().await?,
            other => {
                return Err(StepError::Handler(format!(
                    "unknown decision strategy '{other}'"
                )));
            }
        };
        if agents.is_empty() {
            return Err(StepError::Handler(
                "no candidate agents available".to_string(),
            ));
        }

        let (selected, confidence) = if strategy == "best_match" {
            let required = param_list(config, "requiredSkills")?;
            best_match(&agents, &required)
        } else {
            (&agents[0], 1.0)
        };

        tracing::debug!(strategy = %strategy, selected = %selected.id, confidence, "decision made");
        Ok(StepOutput::assigned(
            json!({ "selected": selected.id, "confidence": confidence }),
            selected.id.clone(),
        ))
    }

    async fn available_agents(&self) -> Result<Vec<AgentProfile>, StepError> {
        let directory = self
            .collaborators
            .agent_directory
            .as_ref()
            .ok_or_else(|| StepError::Handler("no agent directory configured".to_string()))?;
        Ok(directory.list_available().await?)
    }

    // -- Parallel --

    async fn run_parallel(
        &self,
        step: &WorkflowStep,
        config: &Variables,
        variables: &Variables,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepError> {
        // Sub-steps come from the unbound config: their guards and configs
        // are bound one by one below.
        let substeps = definition::parallel_substeps(&step.config)
            .map_err(|e| StepError::InvalidConfig(e.to_string()))?;
        let limit = param_u64(config, "maxParallelism")?
            .map_or(self.settings.max_parallelism, |n| n as usize)
            .max(1);
        let require_all = param_bool(config, "requireAll")?.unwrap_or(false);

        tracing::debug!(
            step_id = %step.id,
            substeps = substeps.len(),
            limit,
            require_all,
            "running parallel step"
        );

        let runs: Vec<_> = substeps
            .iter()
            .map(|sub| self.run_substep(&step.id, sub, variables, cancel).boxed())
            .collect();
        let reports: Vec<SubStepReport> = stream::iter(runs).buffered(limit).collect().await;

        let succeeded = reports.iter().filter(|r| r.status == StepStatus::Completed).count();
        let failed: Vec<&SubStepReport> = reports
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
            .collect();

        if require_all && !failed.is_empty() {
            let first = failed
                .first()
                .and_then(|r| r.error.as_deref())
                .unwrap_or("unknown error");
            return Err(StepError::Handler(format!(
                "{} of {} parallel sub-steps failed (first: {first})",
                failed.len(),
                reports.len()
            )));
        }

        let mut merged = Variables::new();
        for report in reports.iter().filter(|r| r.status == StepStatus::Completed) {
            if let Some(result) = &report.result {
                binder::merge(&mut merged, result);
            }
        }
        merged.insert("succeeded".to_string(), json!(succeeded));
        merged.insert("failed".to_string(), json!(failed.len()));
        merged.insert(
            "results".to_string(),
            serde_json::to_value(&reports).unwrap_or(Value::Null),
        );
        Ok(StepOutput::plain(Value::Object(merged)))
    }

    async fn run_substep(
        &self,
        parent_id: &str,
        sub: &WorkflowStep,
        variables: &Variables,
        cancel: &CancellationToken,
    ) -> SubStepReport {
        let mut report = SubStepReport {
            step_id: sub.id.clone(),
            status: StepStatus::Skipped,
            result: None,
            error: None,
            retry_count: 0,
        };

        if let Some(expr) = &sub.condition {
            if !condition::evaluate(expr, variables) {
                tracing::debug!(parent = parent_id, step_id = %sub.id, "parallel sub-step skipped by guard");
                return report;
            }
        }

        let config = binder::bind(&sub.config, variables);
        let on_retry = |retry: u32, delay: Duration, error: &StepError| {
            tracing::debug!(
                parent = parent_id,
                step_id = %sub.id,
                retry,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying parallel sub-step"
            );
        };
        let run = self
            .with_retries(sub, cancel, &on_retry, || {
                self.timed(sub, self.dispatch_leaf(sub, &config, variables))
            })
            .await;

        report.retry_count = run.retries;
        match run.outcome {
            Ok(output) => {
                report.status = StepStatus::Completed;
                report.result = Some(output.value);
            }
            Err(e) => {
                report.status = StepStatus::Failed;
                report.error = Some(e.to_string());
            }
        }
        report
    }

    // -- Wait --

    async fn run_wait(&self, config: &Variables) -> Result<StepOutput, StepError> {
        let delay = param_u64(config, "delay")?.unwrap_or(DEFAULT_WAIT_MS);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(StepOutput::plain(json!({ "waited": delay })))
    }

    // -- Notification --

    async fn run_notification(&self, params: &BoundConfig<'_>) -> Result<StepOutput, StepError> {
        let config = params.bound;
        let messenger = self
            .collaborators
            .messenger
            .as_ref()
            .ok_or_else(|| StepError::Handler("no messenger configured".to_string()))?;
        let recipient = params.identifier("recipient")?;
        let message = optional_text(config, "message")?.unwrap_or_default();
        let from = optional_text(config, "from")?.unwrap_or_else(|| DEFAULT_SENDER.to_string());

        let message_id = messenger
            .send(&from, &recipient, "notification", &message)
            .await?;
        Ok(StepOutput::plain(json!({ "messageId": message_id })))
    }
}

// ---------------------------------------------------------------------------
// Candidate scoring
// ---------------------------------------------------------------------------

/// Highest fraction of `required` skills covered; ties go to the earliest agent.
fn best_match<'a>(agents: &'a [AgentProfile], required: &[String]) -> (&'a AgentProfile, f64) {
    let score = |agent: &AgentProfile| {
        if required.is_empty() {
            1.0
        } else {
            let matched = required.iter().filter(|r| agent.has_skill(r)).count();
            matched as f64 / required.len() as f64
        }
    };

    let mut best = (&agents[0], score(&agents[0]));
    for agent in &agents[1..] {
        let s = score(agent);
        if s > best.1 {
            best = (agent, s);
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Config parameter helpers
// ---------------------------------------------------------------------------

fn is_absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// A leaf step's config after binding, with the unbound original and the
/// variables it was bound against.
struct BoundConfig<'a> {
    raw: &'a Variables,
    bound: &'a Variables,
    variables: &'a Variables,
}

impl BoundConfig<'_> {
    /// A required identifier such as an agent or task ID.
    ///
    /// Fails when a `${...}` token in the unbound value names a path missing
    /// from the variables. Bound text is not rescanned, so a resolved value
    /// may itself contain `${`.
    fn identifier(&self, key: &str) -> Result<String, StepError> {
        if let Some(Value::String(raw)) = self.raw.get(key) {
            let missing = binder::referenced_paths(raw)
                .into_iter()
                .find(|path| binder::lookup(self.variables, path).is_none());
            if let Some(path) = missing {
                return Err(StepError::InvalidConfig(format!(
                    "'{key}' references unresolved variable '{path}'"
                )));
            }
        }
        required_text(self.bound, key)
    }
}

/// A required scalar rendered as text.
fn required_text(config: &Variables, key: &str) -> Result<String, StepError> {
    optional_text(config, key)?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| StepError::InvalidConfig(format!("missing required '{key}'")))
}

fn optional_text(config: &Variables, key: &str) -> Result<Option<String>, StepError> {
    let value = config.get(key);
    if is_absent(value) {
        return Ok(None);
    }
    let text = match value {
        Some(Value::String(s)) => s.clone(),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
        _ => {
            return Err(StepError::InvalidConfig(format!(
                "'{key}' must be a scalar"
            )));
        }
    };
    Ok(Some(text))
}

fn param_u64(config: &Variables, key: &str) -> Result<Option<u64>, StepError> {
    let value = config.get(key);
    if is_absent(value) {
        return Ok(None);
    }
    let parsed = match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.map(Some).ok_or_else(|| {
        StepError::InvalidConfig(format!("'{key}' must be a non-negative integer"))
    })
}

fn param_i64(config: &Variables, key: &str) -> Result<Option<i64>, StepError> {
    let value = config.get(key);
    if is_absent(value) {
        return Ok(None);
    }
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| StepError::InvalidConfig(format!("'{key}' must be an integer")))
}

fn param_bool(config: &Variables, key: &str) -> Result<Option<bool>, StepError> {
    let value = config.get(key);
    if is_absent(value) {
        return Ok(None);
    }
    let parsed = match value {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => s.trim().parse::<bool>().ok(),
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| StepError::InvalidConfig(format!("'{key}' must be a boolean")))
}

/// A list of strings. Accepts a JSON array, a JSON-encoded array string (the
/// shape a bound `${list}` token takes), or a comma-separated string. An
/// unresolved `${...}` token counts as no list at all.
fn param_list(config: &Variables, key: &str) -> Result<Vec<String>, StepError> {
    let invalid = || StepError::InvalidConfig(format!("'{key}' must be a list of strings"));
    match config.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.iter().map(binder::stringify).collect()),
        Some(Value::String(s)) => {
            let s = s.trim();
            if !binder::referenced_paths(s).is_empty() {
                tracing::debug!(key, value = s, "list parameter is unresolved; treating as empty");
                return Ok(Vec::new());
            }
            if s.starts_with('[') {
                let items: Vec<Value> = serde_json::from_str(s).map_err(|_| invalid())?;
                return Ok(items.iter().map(binder::stringify).collect());
            }
            Ok(s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect())
        }
        Some(_) => Err(invalid()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use crate::collaborator::memory::{
        InMemoryAgentDirectory, InMemoryTeamDirectory, RecordingMessenger,
        RecordingTaskAssignment,
    };
    use crate::workflow::testing::{FailingTaskAssignment, object, step_with_config};
    use cadence_types::workflow::{BackoffStrategy, RetryPolicy};

    fn settings() -> RunnerSettings {
        RunnerSettings {
            default_timeout_ms: Some(5_000),
            max_parallelism: 4,
            max_backoff_delay_ms: 1_000,
        }
    }

    fn agents() -> Arc<InMemoryAgentDirectory> {
        Arc::new(InMemoryAgentDirectory::new(vec![
            AgentProfile::new("agent_1", &["analysis", "development"]),
            AgentProfile::new("agent_2", &["testing", "documentation"]),
            AgentProfile::new("agent_3", &["testing", "development"]),
        ]))
    }

    fn no_retry_hook() -> impl Fn(u32, Duration, &StepError) + Send + Sync {
        |_, _, _| {}
    }

    async fn run_once(runner: &StepRunner, step: &WorkflowStep) -> StepRun {
        let vars = Variables::new();
        let config = binder::bind(&step.config, &vars);
        runner
            .run(step, &config, &vars, &CancellationToken::new(), &no_retry_hook())
            .await
    }

    // -----------------------------------------------------------------------
    // Task
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn assign_to_agent_records_assignment() {
        let service = Arc::new(RecordingTaskAssignment::default());
        let runner = StepRunner::new(
            Collaborators::new().with_task_assignment(service.clone()),
            settings(),
        );
        let step = step_with_config(
            "assign",
            StepType::Task,
            json!({ "action": "assign_to_agent", "agentId": "agent_1", "taskId": "t-9", "priority": "3" }),
        );

        let output = run_once(&runner, &step).await.outcome.unwrap();
        assert_eq!(output.assigned_to.as_deref(), Some("agent_1"));
        assert_eq!(output.value["taskId"], "t-9");
        assert_eq!(service.assignments()[0].priority, 3);
    }

    #[tokio::test]
    async fn assign_without_service_is_handler_error() {
        let runner = StepRunner::new(Collaborators::new(), settings());
        let step = step_with_config(
            "assign",
            StepType::Task,
            json!({ "action": "assign_to_agent", "agentId": "a", "taskId": "t" }),
        );
        let err = run_once(&runner, &step).await.outcome.unwrap_err();
        assert!(matches!(err, StepError::Handler(_)));
    }

    #[tokio::test]
    async fn unresolved_identifier_is_rejected() {
        let runner = StepRunner::new(
            Collaborators::new().with_task_assignment(Arc::new(RecordingTaskAssignment::default())),
            settings(),
        );
        let step = step_with_config(
            "assign",
            StepType::Task,
            json!({ "action": "assign_to_agent", "agentId": "${selected}", "taskId": "t" }),
        );
        let err = run_once(&runner, &step).await.outcome.unwrap_err();
        assert!(err.to_string().contains("unresolved variable 'selected'"));
    }

    #[tokio::test]
    async fn create_task_defaults_priority() {
        let directory = Arc::new(InMemoryTeamDirectory::default());
        let runner = StepRunner::new(
            Collaborators::new().with_team_directory(directory.clone()),
            settings(),
        );
        let step = step_with_config(
            "create",
            StepType::Task,
            json!({ "action": "create_task", "title": "Write docs" }),
        );
        let output = run_once(&runner, &step).await.outcome.unwrap();
        assert_eq!(output.value["taskId"], "task_1");
        assert_eq!(directory.tasks()[0].1.priority, "medium");
    }

    #[tokio::test]
    async fn find_agents_filters_by_capabilities() {
        let runner = StepRunner::new(
            Collaborators::new().with_agent_directory(agents()),
            settings(),
        );
        let step = step_with_config(
            "find",
            StepType::Task,
            json!({ "action": "find_agents", "capabilities": "[\"development\"]" }),
        );
        let output = run_once(&runner, &step).await.outcome.unwrap();
        assert_eq!(output.value["totalFound"], 2);
        assert_eq!(output.value["agents"][1]["id"], "agent_3");
    }

    #[tokio::test]
    async fn unknown_task_action_fails() {
        let runner = StepRunner::new(Collaborators::new(), settings());
        let step = step_with_config("t", StepType::Task, json!({ "action": "teleport" }));
        let err = run_once(&runner, &step).await.outcome.unwrap_err();
        assert_eq!(err.to_string(), "unknown task action 'teleport'");
    }

    // -----------------------------------------------------------------------
    // Decision
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn best_match_prefers_highest_skill_coverage() {
        let runner = StepRunner::new(
            Collaborators::new().with_agent_directory(agents()),
            settings(),
        );
        let step = step_with_config(
            "pick",
            StepType::Decision,
            json!({ "strategy": "best_match", "requiredSkills": "testing, development" }),
        );
        let output = run_once(&runner, &step).await.outcome.unwrap();
        assert_eq!(output.value["selected"], "agent_3");
        assert_eq!(output.value["confidence"], 1.0);
        assert_eq!(output.assigned_to.as_deref(), Some("agent_3"));
    }

    #[tokio::test]
    async fn best_match_ties_go_to_directory_order() {
        let runner = StepRunner::new(
            Collaborators::new().with_agent_directory(agents()),
            settings(),
        );
        let step = step_with_config("pick", StepType::Decision, json!({ "strategy": "best_match" }));
        let output = run_once(&runner, &step).await.outcome.unwrap();
        assert_eq!(output.value["selected"], "agent_1");
    }

    #[tokio::test]
    async fn decision_without_candidates_fails() {
        let runner = StepRunner::new(
            Collaborators::new().with_agent_directory(Arc::new(InMemoryAgentDirectory::default())),
            settings(),
        );
        let step = step_with_config("pick", StepType::Decision, json!({ "strategy": "best_match" }));
        let err = run_once(&runner, &step).await.outcome.unwrap_err();
        assert!(err.to_string().contains("no candidate agents"));
    }

    // -----------------------------------------------------------------------
    // Wait / notification
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn wait_sleeps_for_delay() {
        let runner = StepRunner::new(Collaborators::new(), settings());
        let step = step_with_config("w", StepType::Wait, json!({ "delay": 30 }));
        let started = Instant::now();
        let output = run_once(&runner, &step).await.outcome.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(output.value, json!({ "waited": 30 }));
    }

    #[tokio::test]
    async fn notification_sends_from_system() {
        let messenger = Arc::new(RecordingMessenger::default());
        let runner = StepRunner::new(
            Collaborators::new().with_messenger(messenger.clone()),
            settings(),
        );
        let step = step_with_config(
            "n",
            StepType::Notification,
            json!({ "recipient": "ops", "message": "deploy done" }),
        );
        let output = run_once(&runner, &step).await.outcome.unwrap();
        assert_eq!(output.value["messageId"], "msg_1");
        let sent = messenger.sent();
        assert_eq!(sent[0].from, "system");
        assert_eq!(sent[0].message_type, "notification");
        assert_eq!(sent[0].content, "deploy done");
    }

    #[tokio::test]
    async fn free_text_keeps_dollar_braces() {
        let messenger = Arc::new(RecordingMessenger::default());
        let runner = StepRunner::new(
            Collaborators::new().with_messenger(messenger.clone()),
            settings(),
        );
        let vars = object(json!({ "title": "Fix ${HOME} expansion bug", "lead": "ops" }));
        let step = step_with_config(
            "n",
            StepType::Notification,
            json!({
                "recipient": "${lead}",
                "message": "Deploy ${release} finished: ${title}",
            }),
        );
        let config = binder::bind(&step.config, &vars);
        let output = runner
            .run(&step, &config, &vars, &CancellationToken::new(), &no_retry_hook())
            .await
            .outcome
            .unwrap();

        assert_eq!(output.value["messageId"], "msg_1");
        let sent = messenger.sent();
        assert_eq!(sent[0].to, "ops");
        assert_eq!(
            sent[0].content,
            "Deploy ${release} finished: Fix ${HOME} expansion bug"
        );
    }

    #[tokio::test]
    async fn resolved_identifier_may_contain_dollar_braces() {
        let assignments = Arc::new(RecordingTaskAssignment::default());
        let runner = StepRunner::new(
            Collaborators::new().with_task_assignment(assignments.clone()),
            settings(),
        );
        let vars = object(json!({ "task": { "id": "t-${1}" } }));
        let step = step_with_config(
            "assign",
            StepType::Task,
            json!({ "action": "assign_to_agent", "agentId": "agent_1", "taskId": "${task.id}" }),
        );
        let config = binder::bind(&step.config, &vars);
        let output = runner
            .run(&step, &config, &vars, &CancellationToken::new(), &no_retry_hook())
            .await
            .outcome
            .unwrap();
        assert_eq!(output.value["taskId"], "t-${1}");
    }

    // -----------------------------------------------------------------------
    // Timeout and retry
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn timeout_is_distinct_error() {
        let runner = StepRunner::new(Collaborators::new(), settings());
        let mut step = step_with_config("w", StepType::Wait, json!({ "delay": 500 }));
        step.timeout_ms = Some(20);
        let err = run_once(&runner, &step).await.outcome.unwrap_err();
        assert!(matches!(err, StepError::Timeout { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn retries_exhaust_after_max_attempts_plus_one() {
        let service = Arc::new(FailingTaskAssignment::default());
        let runner = StepRunner::new(
            Collaborators::new().with_task_assignment(service.clone()),
            settings(),
        );
        let mut step = step_with_config(
            "assign",
            StepType::Task,
            json!({ "action": "assign_to_agent", "agentId": "a", "taskId": "t" }),
        );
        step.retry = Some(RetryPolicy {
            max_attempts: 2,
            backoff: BackoffStrategy::Fixed,
            base_delay_ms: 5,
            max_delay_ms: None,
        });

        let hook_calls = AtomicU32::new(0);
        let hook = |retry: u32, _: Duration, _: &StepError| {
            hook_calls.fetch_add(1, Ordering::SeqCst);
            assert!(retry >= 1);
        };
        let vars = Variables::new();
        let run = runner
            .run(&step, &step.config, &vars, &CancellationToken::new(), &hook)
            .await;

        assert!(run.outcome.is_err());
        assert_eq!(run.retries, 2);
        assert_eq!(service.calls(), 3);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_recovers_after_transient_failures() {
        let service = Arc::new(FailingTaskAssignment::failing_first(1));
        let runner = StepRunner::new(
            Collaborators::new().with_task_assignment(service.clone()),
            settings(),
        );
        let mut step = step_with_config(
            "assign",
            StepType::Task,
            json!({ "action": "assign_to_agent", "agentId": "a", "taskId": "t" }),
        );
        step.retry = Some(RetryPolicy {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            base_delay_ms: 1,
            max_delay_ms: Some(10),
        });
        let run = run_once(&runner, &step).await;
        assert!(run.outcome.is_ok());
        assert_eq!(run.retries, 1);
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let service = Arc::new(FailingTaskAssignment::default());
        let runner = StepRunner::new(
            Collaborators::new().with_task_assignment(service.clone()),
            settings(),
        );
        let mut step = step_with_config(
            "assign",
            StepType::Task,
            json!({ "action": "assign_to_agent", "agentId": "a", "taskId": "t" }),
        );
        step.retry = Some(RetryPolicy {
            max_attempts: 5,
            backoff: BackoffStrategy::Fixed,
            base_delay_ms: 10_000,
            max_delay_ms: None,
        });
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let vars = Variables::new();
        let run = runner
            .run(&step, &step.config, &vars, &cancel, &no_retry_hook())
            .await;
        assert!(matches!(run.outcome, Err(StepError::Cancelled)));
        assert_eq!(service.calls(), 1);
    }

    // -----------------------------------------------------------------------
    // Parallel
    // -----------------------------------------------------------------------

    fn parallel(substeps: Value, extra: Value) -> WorkflowStep {
        let mut config = object(extra);
        config.insert("steps".to_string(), substeps);
        let mut step = WorkflowStep::new("fan", StepType::Parallel);
        step.config = config;
        step
    }

    #[tokio::test]
    async fn parallel_collects_all_results_without_short_circuit() {
        let messenger = Arc::new(RecordingMessenger::default());
        let runner = StepRunner::new(
            Collaborators::new().with_messenger(messenger.clone()),
            settings(),
        );
        let step = parallel(
            json!([
                { "id": "bad", "type": "task", "config": { "action": "nope" } },
                { "id": "w", "type": "wait", "config": { "delay": 5 } },
                { "id": "n", "type": "notification", "config": { "recipient": "${who}", "message": "hi" } },
                { "id": "skip", "type": "wait", "condition": "missing == 1" }
            ]),
            json!({}),
        );
        let vars = object(json!({ "who": "ops" }));
        let config = binder::bind(&step.config, &vars);
        let output = runner
            .run(&step, &config, &vars, &CancellationToken::new(), &no_retry_hook())
            .await
            .outcome
            .unwrap();

        assert_eq!(output.value["succeeded"], 2);
        assert_eq!(output.value["failed"], 1);
        assert_eq!(output.value["waited"], 5);
        assert_eq!(output.value["messageId"], "msg_1");
        let results = output.value["results"].as_array().unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r["stepId"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["bad", "w", "n", "skip"]);
        assert_eq!(results[0]["status"], "failed");
        assert_eq!(results[3]["status"], "skipped");
        assert_eq!(messenger.sent()[0].to, "ops");
    }

    #[tokio::test]
    async fn parallel_require_all_fails_on_any_failure() {
        let runner = StepRunner::new(Collaborators::new(), settings());
        let step = parallel(
            json!([
                { "id": "bad", "type": "task", "config": { "action": "nope" } },
                { "id": "w", "type": "wait", "config": { "delay": 1 } }
            ]),
            json!({ "requireAll": true }),
        );
        let err = run_once(&runner, &step).await.outcome.unwrap_err();
        assert!(err.to_string().contains("1 of 2 parallel sub-steps failed"));
    }

    #[tokio::test]
    async fn parallel_respects_max_parallelism() {
        let runner = StepRunner::new(Collaborators::new(), settings());
        let waits: Vec<Value> = (0..4)
            .map(|i| json!({ "id": format!("w{i}"), "type": "wait", "config": { "delay": 40 } }))
            .collect();

        let serial = parallel(Value::Array(waits.clone()), json!({ "maxParallelism": 1 }));
        let started = Instant::now();
        run_once(&runner, &serial).await.outcome.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(160));

        let wide = parallel(Value::Array(waits), json!({ "maxParallelism": "4" }));
        let started = Instant::now();
        run_once(&runner, &wide).await.outcome.unwrap();
        assert!(started.elapsed() < Duration::from_millis(160));
    }

    // -----------------------------------------------------------------------
    // Approval
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn approval_outcomes() {
        let runner = StepRunner::new(Collaborators::new(), settings());
        let step = WorkflowStep::new("review", StepType::HumanApproval);
        let cancel = CancellationToken::new();

        let (tx, rx) = oneshot::channel();
        tx.send(true).unwrap();
        let output = runner.await_approval(&step, rx, &cancel).await.unwrap();
        assert_eq!(output.value, json!({ "approved": true }));

        let (tx, rx) = oneshot::channel();
        tx.send(false).unwrap();
        assert!(matches!(
            runner.await_approval(&step, rx, &cancel).await,
            Err(StepError::ApprovalRejected)
        ));

        let mut timed = step.clone();
        timed.timeout_ms = Some(10);
        let (_tx, rx) = oneshot::channel::<bool>();
        assert!(matches!(
            runner.await_approval(&timed, rx, &cancel).await,
            Err(StepError::ApprovalTimeout)
        ));

        cancel.cancel();
        let (_tx, rx) = oneshot::channel::<bool>();
        assert!(matches!(
            runner.await_approval(&step, rx, &cancel).await,
            Err(StepError::Cancelled)
        ));
    }

    // -----------------------------------------------------------------------
    // Parameter helpers
    // -----------------------------------------------------------------------

    #[test]
    fn list_parameter_shapes() {
        let config = object(json!({
            "array": ["a", 1],
            "encoded": "[\"x\",\"y\"]",
            "csv": "p, q,,r",
            "unresolved": "${caps}",
            "number": 5
        }));
        assert_eq!(param_list(&config, "array").unwrap(), vec!["a", "1"]);
        assert_eq!(param_list(&config, "encoded").unwrap(), vec!["x", "y"]);
        assert_eq!(param_list(&config, "csv").unwrap(), vec!["p", "q", "r"]);
        assert!(param_list(&config, "unresolved").unwrap().is_empty());
        assert!(param_list(&config, "missing").unwrap().is_empty());
        assert!(param_list(&config, "number").is_err());
    }

    #[test]
    fn numeric_and_bool_parameters_accept_text() {
        let config = object(json!({ "n": "42", "b": "true", "bad": "x" }));
        assert_eq!(param_u64(&config, "n").unwrap(), Some(42));
        assert_eq!(param_bool(&config, "b").unwrap(), Some(true));
        assert!(param_u64(&config, "bad").is_err());
        assert_eq!(param_i64(&config, "missing").unwrap(), None);
    }
}
