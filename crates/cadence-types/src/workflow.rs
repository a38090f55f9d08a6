//! Workflow domain types for Cadence.
//!
//! Defines the canonical representation of a workflow (`WorkflowDefinition`
//! and its `WorkflowStep`s) together with the execution tracking types
//! (`WorkflowExecution`, `StepExecution`) that make every run auditable.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Variable map shared by an execution's steps.
pub type Variables = Map<String, Value>;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A stored workflow: a graph of typed steps plus default variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Assigned by the registry when empty on creation.
    #[serde(default)]
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Version string (e.g. "1.0.0").
    #[serde(default = "default_version")]
    pub version: String,
    /// Steps in declaration order. Declaration order breaks ordering ties.
    pub steps: Vec<WorkflowStep>,
    /// Trigger configurations. Stored and validated, fired by callers.
    #[serde(default)]
    pub triggers: Vec<WorkflowTrigger>,
    /// Default variables every execution starts from.
    #[serde(default)]
    pub variables: Variables,
    /// Extensible metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkflowDefinition {
    /// Look up a step by ID.
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

/// Partial update applied by `update_workflow`. `None` fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<WorkflowStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Vec<WorkflowTrigger>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Variables>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single step in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// User-defined step ID. Unique within a workflow.
    pub id: String,
    /// Human-readable step name.
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The kind of step.
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Handler configuration. String scalars may contain `${path}` tokens.
    #[serde(default)]
    pub config: Variables,
    /// Step IDs this step depends on (DAG edges).
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Guard expression; the step is skipped when it evaluates false.
    #[serde(default, alias = "guard", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<WorkflowAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<WorkflowAction>,
}

impl WorkflowStep {
    /// Create a step with an empty config and no dependencies.
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            step_type,
            config: Variables::new(),
            dependencies: Vec::new(),
            condition: None,
            timeout_ms: None,
            retry: None,
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }
}

/// The kind of step in a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Task,
    Decision,
    Parallel,
    Wait,
    Notification,
    HumanApproval,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Task => "task",
            StepType::Decision => "decision",
            StepType::Parallel => "parallel",
            StepType::Wait => "wait",
            StepType::Notification => "notification",
            StepType::HumanApproval => "human_approval",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Retry configuration for a workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    pub max_attempts: u32,
    #[serde(default, rename = "backoff_strategy")]
    pub backoff: BackoffStrategy,
    /// Base delay in milliseconds.
    #[serde(default)]
    pub base_delay_ms: u64,
    /// Upper bound for exponential backoff, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

/// How the delay grows between retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Side-effect run after a step succeeds or fails.
///
/// Mirrors the `{ type, config }` shape used in definition files:
/// ```yaml
/// on_success:
///   - type: send_notification
///     config:
///       recipient: "${selected}"
///       message: "New task assigned"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub config: Variables,
}

impl WorkflowAction {
    /// `set_variable` action writing `value` under `name`.
    pub fn set_variable(name: &str, value: Value) -> Self {
        let mut config = Variables::new();
        config.insert("name".to_string(), Value::String(name.to_string()));
        config.insert("value".to_string(), value);
        Self {
            action_type: ActionType::SetVariable,
            config,
        }
    }

    /// `send_notification` action.
    pub fn send_notification(recipient: &str, message: &str) -> Self {
        let mut config = Variables::new();
        config.insert("recipient".to_string(), Value::String(recipient.to_string()));
        config.insert("message".to_string(), Value::String(message.to_string()));
        Self {
            action_type: ActionType::SendNotification,
            config,
        }
    }
}

/// Known action kinds. Unknown names are kept so they can be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    SetVariable,
    SendNotification,
    Other(String),
}

impl From<String> for ActionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "set_variable" => ActionType::SetVariable,
            "send_notification" => ActionType::SendNotification,
            _ => ActionType::Other(value),
        }
    }
}

impl From<ActionType> for String {
    fn from(value: ActionType) -> Self {
        match value {
            ActionType::SetVariable => "set_variable".to_string(),
            ActionType::SendNotification => "send_notification".to_string(),
            ActionType::Other(name) => name,
        }
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// How a workflow may be started. Cadence stores triggers; callers fire them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    pub id: String,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub config: Variables,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Event,
    Webhook,
}

// ---------------------------------------------------------------------------
// Execution Status
// ---------------------------------------------------------------------------

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Completed, failed, and cancelled executions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an individual step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// One run of a workflow definition against a private variable context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 execution ID.
    pub id: Uuid,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    /// Definition defaults overlaid with caller-supplied variables and step results.
    pub variables: Variables,
    /// Step records, created when each step becomes eligible.
    pub step_executions: HashMap<String, StepExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub triggered_by: String,
    /// Human-readable failure or cancellation reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// ID of the step whose failure failed the execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl WorkflowExecution {
    /// Create a pending execution.
    pub fn new(workflow_id: String, variables: Variables, triggered_by: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            status: ExecutionStatus::Pending,
            variables,
            step_executions: HashMap::new(),
            current_step: None,
            started_at: Utc::now(),
            completed_at: None,
            triggered_by,
            error: None,
            failed_step: None,
            metadata: HashMap::new(),
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepExecution> {
        self.step_executions.get(step_id)
    }

    /// Number of step records in the given status.
    pub fn count_steps(&self, status: StepStatus) -> usize {
        self.step_executions
            .values()
            .filter(|s| s.status == status)
            .count()
    }
}

/// Audit record for one step within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Retries performed so far (0 on the first attempt).
    pub retry_count: u32,
    /// Agent the step's work was assigned to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

impl StepExecution {
    pub fn pending(step_id: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            assigned_to: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Aggregate counters returned by `get_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_workflows: usize,
    pub total_executions: usize,
    pub active_executions: usize,
    pub completed_executions: usize,
    pub failed_executions: usize,
    pub cancelled_executions: usize,
}
