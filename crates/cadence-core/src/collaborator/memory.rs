//! In-memory collaborator implementations.
//!
//! Used by the `cadence` binary for local runs and by tests. They keep
//! everything they receive so callers can inspect what the engine did.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use cadence_types::config::AgentConfig;
use cadence_types::error::CollaboratorError;
use futures_util::future::BoxFuture;

use super::{
    AgentDirectory, AgentProfile, CollaboratorResult, Messenger, TaskAssignment, TaskSpec,
    TeamDirectory,
};

fn next_id(counter: &AtomicU64, prefix: &str) -> String {
    let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{prefix}_{n}")
}

// ---------------------------------------------------------------------------
// Agent directory
// ---------------------------------------------------------------------------

/// Fixed list of available agents.
#[derive(Debug, Default)]
pub struct InMemoryAgentDirectory {
    agents: Mutex<Vec<AgentProfile>>,
}

impl InMemoryAgentDirectory {
    pub fn new(agents: Vec<AgentProfile>) -> Self {
        Self {
            agents: Mutex::new(agents),
        }
    }

    pub fn from_config(agents: &[AgentConfig]) -> Self {
        Self::new(
            agents
                .iter()
                .map(|a| AgentProfile {
                    id: a.id.clone(),
                    name: a.name.clone(),
                    skills: a.skills.clone(),
                })
                .collect(),
        )
    }

    /// Replace the available agents.
    pub fn set_agents(&self, agents: Vec<AgentProfile>) {
        *self.agents.lock().unwrap_or_else(PoisonError::into_inner) = agents;
    }
}

impl AgentDirectory for InMemoryAgentDirectory {
    fn list_available(&self) -> BoxFuture<'_, CollaboratorResult<Vec<AgentProfile>>> {
        let agents = self
            .agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::pin(async move { Ok(agents) })
    }
}

// ---------------------------------------------------------------------------
// Team directory
// ---------------------------------------------------------------------------

/// Stores created tasks in a vector.
#[derive(Debug, Default)]
pub struct InMemoryTeamDirectory {
    counter: AtomicU64,
    tasks: Mutex<Vec<(String, TaskSpec)>>,
}

impl InMemoryTeamDirectory {
    /// Tasks created so far, with their assigned IDs.
    pub fn tasks(&self) -> Vec<(String, TaskSpec)> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TeamDirectory for InMemoryTeamDirectory {
    fn create_task(&self, spec: TaskSpec) -> BoxFuture<'_, CollaboratorResult<String>> {
        Box::pin(async move {
            if spec.title.trim().is_empty() {
                return Err(CollaboratorError::Rejected(
                    "task title must not be empty".to_string(),
                ));
            }
            let id = next_id(&self.counter, "task");
            tracing::info!(task_id = %id, title = %spec.title, "task created");
            self.tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((id.clone(), spec));
            Ok(id)
        })
    }
}

// ---------------------------------------------------------------------------
// Task assignment
// ---------------------------------------------------------------------------

/// A recorded `assign` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub assignment_id: String,
    pub agent_id: String,
    pub task_id: String,
    pub priority: i64,
}

/// Accepts every assignment and records it.
#[derive(Debug, Default)]
pub struct RecordingTaskAssignment {
    counter: AtomicU64,
    assignments: Mutex<Vec<Assignment>>,
}

impl RecordingTaskAssignment {
    pub fn assignments(&self) -> Vec<Assignment> {
        self.assignments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TaskAssignment for RecordingTaskAssignment {
    fn assign<'a>(
        &'a self,
        agent_id: &'a str,
        task_id: &'a str,
        priority: i64,
    ) -> BoxFuture<'a, CollaboratorResult<String>> {
        Box::pin(async move {
            let assignment_id = next_id(&self.counter, "assignment");
            tracing::info!(agent_id, task_id, priority, "task assigned");
            self.assignments
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Assignment {
                    assignment_id: assignment_id.clone(),
                    agent_id: agent_id.to_string(),
                    task_id: task_id.to_string(),
                    priority,
                });
            Ok(assignment_id)
        })
    }
}

// ---------------------------------------------------------------------------
// Messenger
// ---------------------------------------------------------------------------

/// A recorded `send` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub message_type: String,
    pub content: String,
}

/// Logs every message and keeps a copy.
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    counter: AtomicU64,
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Messenger for RecordingMessenger {
    fn send<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
        message_type: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, CollaboratorResult<String>> {
        Box::pin(async move {
            let id = next_id(&self.counter, "msg");
            tracing::info!(from, to, message_type, content, "message sent");
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(SentMessage {
                    id: id.clone(),
                    from: from.to_string(),
                    to: to.to_string(),
                    message_type: message_type.to_string(),
                    content: content.to_string(),
                });
            Ok(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messenger_records_and_numbers_messages() {
        let messenger = RecordingMessenger::default();
        let first = messenger.send("system", "ops", "notification", "hi").await.unwrap();
        let second = messenger.send("system", "dev", "notification", "yo").await.unwrap();
        assert_eq!(first, "msg_1");
        assert_eq!(second, "msg_2");
        assert_eq!(messenger.sent()[1].to, "dev");
    }

    #[tokio::test]
    async fn team_directory_rejects_blank_title() {
        let directory = InMemoryTeamDirectory::default();
        let spec = TaskSpec {
            title: "  ".to_string(),
            description: None,
            priority: "medium".to_string(),
            assignee: None,
        };
        let err = directory.create_task(spec).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected(_)));
        assert!(directory.tasks().is_empty());
    }

    #[tokio::test]
    async fn agent_directory_from_config() {
        let directory = InMemoryAgentDirectory::from_config(&[AgentConfig {
            id: "agent-1".to_string(),
            name: Some("Ada".to_string()),
            skills: vec!["analysis".to_string()],
        }]);
        let agents = directory.list_available().await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name.as_deref(), Some("Ada"));

        directory.set_agents(vec![]);
        assert!(directory.list_available().await.unwrap().is_empty());
    }
}
