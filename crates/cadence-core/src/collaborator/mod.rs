//! Outbound collaborator interfaces.
//!
//! The engine never assigns work, stores tasks, looks up agents, or delivers
//! messages itself. Step handlers and actions call these traits instead.
//! Each trait is object-safe (boxed futures) so implementations can be
//! injected as `Arc<dyn _>` and swapped per engine instance.

pub mod memory;

use std::sync::Arc;

use cadence_types::error::CollaboratorError;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Result type returned by every collaborator call.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

// ---------------------------------------------------------------------------
// Data passed across the boundary
// ---------------------------------------------------------------------------

/// An agent that can receive work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, skills: &[&str]) -> Self {
        Self {
            id: id.into(),
            name: None,
            skills: skills.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// True when the agent has every skill in `required` (case-insensitive).
    pub fn has_all(&self, required: &[String]) -> bool {
        required.iter().all(|r| self.has_skill(r))
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.iter().any(|s| s.eq_ignore_ascii_case(skill))
    }
}

/// A task to be created in the team's task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Assigns an existing task to an agent.
pub trait TaskAssignment: Send + Sync {
    /// Returns the assignment ID.
    fn assign<'a>(
        &'a self,
        agent_id: &'a str,
        task_id: &'a str,
        priority: i64,
    ) -> BoxFuture<'a, CollaboratorResult<String>>;
}

/// Creates tasks in the team's task store.
pub trait TeamDirectory: Send + Sync {
    /// Returns the new task's ID.
    fn create_task(&self, spec: TaskSpec) -> BoxFuture<'_, CollaboratorResult<String>>;
}

/// Lists agents currently able to take work, in directory order.
pub trait AgentDirectory: Send + Sync {
    fn list_available(&self) -> BoxFuture<'_, CollaboratorResult<Vec<AgentProfile>>>;
}

/// Delivers messages to agents or people.
pub trait Messenger: Send + Sync {
    /// Returns the message ID.
    fn send<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
        message_type: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, CollaboratorResult<String>>;
}

// ---------------------------------------------------------------------------
// Collaborators bundle
// ---------------------------------------------------------------------------

/// The set of collaborators wired into one engine.
///
/// Every slot is optional. A step that needs a missing collaborator fails
/// with a handler error instead of silently succeeding.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub task_assignment: Option<Arc<dyn TaskAssignment>>,
    pub team_directory: Option<Arc<dyn TeamDirectory>>,
    pub agent_directory: Option<Arc<dyn AgentDirectory>>,
    pub messenger: Option<Arc<dyn Messenger>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_assignment(mut self, service: Arc<dyn TaskAssignment>) -> Self {
        self.task_assignment = Some(service);
        self
    }

    pub fn with_team_directory(mut self, directory: Arc<dyn TeamDirectory>) -> Self {
        self.team_directory = Some(directory);
        self
    }

    pub fn with_agent_directory(mut self, directory: Arc<dyn AgentDirectory>) -> Self {
        self.agent_directory = Some(directory);
        self
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn Messenger>) -> Self {
        self.messenger = Some(messenger);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("task_assignment", &self.task_assignment.is_some())
            .field("team_directory", &self.team_directory.is_some())
            .field("agent_directory", &self.agent_directory.is_some())
            .field("messenger", &self.messenger.is_some())
            .finish()
    }
}
