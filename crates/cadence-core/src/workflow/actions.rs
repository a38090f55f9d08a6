//! Post-step actions (`on_success` / `on_failure`).
//!
//! Actions are best-effort side effects. Each one runs on its own: a failure
//! is logged and the rest of the list still runs, and the step outcome never
//! changes because of an action.

use std::sync::Arc;

use cadence_types::workflow::{ActionType, Variables, WorkflowAction};
use serde_json::Value;
use uuid::Uuid;

use crate::collaborator::Messenger;

use super::binder;
use super::step_runner::DEFAULT_SENDER;

#[derive(Debug, thiserror::Error)]
enum ActionError {
    #[error("missing required '{0}'")]
    Missing(&'static str),

    #[error("no messenger configured")]
    NoMessenger,

    #[error(transparent)]
    Collaborator(#[from] cadence_types::error::CollaboratorError),
}

/// Runs workflow actions against an execution's variables.
#[derive(Clone, Default)]
pub struct ActionDispatcher {
    messenger: Option<Arc<dyn Messenger>>,
}

impl ActionDispatcher {
    pub fn new(messenger: Option<Arc<dyn Messenger>>) -> Self {
        Self { messenger }
    }

    /// Run `actions` in order. Configs are bound against `variables` as they
    /// stand when each action starts, so a `set_variable` is visible to the
    /// actions after it. Returns how many actions succeeded.
    pub async fn dispatch(
        &self,
        actions: &[WorkflowAction],
        execution_id: Uuid,
        step_id: &str,
        variables: &mut Variables,
    ) -> usize {
        let mut succeeded = 0;
        for action in actions {
            let action_type = String::from(action.action_type.clone());
            let config = binder::bind(&action.config, variables);
            let result = match &action.action_type {
                ActionType::SetVariable => set_variable(&config, variables),
                ActionType::SendNotification => self.send_notification(&config).await,
                ActionType::Other(name) => {
                    tracing::warn!(
                        execution_id = %execution_id,
                        step_id,
                        action_type = %name,
                        "unsupported action type; skipping"
                    );
                    continue;
                }
            };

            match result {
                Ok(()) => {
                    succeeded += 1;
                    tracing::debug!(execution_id = %execution_id, step_id, action_type = %action_type, "action completed");
                }
                Err(e) => {
                    tracing::error!(
                        execution_id = %execution_id,
                        step_id,
                        action_type = %action_type,
                        error = %e,
                        "action failed"
                    );
                }
            }
        }
        succeeded
    }

    async fn send_notification(&self, config: &Variables) -> Result<(), ActionError> {
        let messenger = self.messenger.as_ref().ok_or(ActionError::NoMessenger)?;
        let recipient = text(config, "recipient").ok_or(ActionError::Missing("recipient"))?;
        let message = text(config, "message").unwrap_or_default();
        let from = text(config, "from").unwrap_or_else(|| DEFAULT_SENDER.to_string());
        messenger
            .send(&from, &recipient, "notification", &message)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("messenger", &self.messenger.is_some())
            .finish()
    }
}

fn set_variable(config: &Variables, variables: &mut Variables) -> Result<(), ActionError> {
    let name = text(config, "name").ok_or(ActionError::Missing("name"))?;
    let value = config.get("value").cloned().unwrap_or(Value::Null);
    variables.insert(name, value);
    Ok(())
}

fn text(config: &Variables, key: &str) -> Option<String> {
    match config.get(key)? {
        Value::Null => None,
        value => Some(binder::stringify(value)).filter(|s| !s.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::memory::RecordingMessenger;
    use crate::workflow::testing::object;
    use serde_json::json;

    fn action(action_type: &str, config: Value) -> WorkflowAction {
        WorkflowAction {
            action_type: ActionType::from(action_type.to_string()),
            config: object(config),
        }
    }

    #[tokio::test]
    async fn set_variable_binds_and_writes() {
        let dispatcher = ActionDispatcher::default();
        let mut vars = object(json!({ "user": { "name": "ada" } }));
        let actions = vec![
            WorkflowAction::set_variable("greeting", json!("hello ${user.name}")),
            WorkflowAction::set_variable("echo", json!("${greeting}!")),
        ];
        let ok = dispatcher
            .dispatch(&actions, Uuid::now_v7(), "s1", &mut vars)
            .await;
        assert_eq!(ok, 2);
        assert_eq!(vars["greeting"], "hello ada");
        assert_eq!(vars["echo"], "hello ada!");
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_list() {
        let messenger = Arc::new(RecordingMessenger::default());
        let dispatcher = ActionDispatcher::new(Some(messenger.clone()));
        let mut vars = object(json!({ "who": "ops" }));
        let actions = vec![
            action("set_variable", json!({ "value": 1 })),
            action("launch_rocket", json!({})),
            WorkflowAction::send_notification("${who}", "step done"),
        ];
        let ok = dispatcher
            .dispatch(&actions, Uuid::now_v7(), "s1", &mut vars)
            .await;
        assert_eq!(ok, 1);
        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ops");
        assert_eq!(sent[0].from, "system");
    }

    #[tokio::test]
    async fn notification_without_messenger_is_logged_not_fatal() {
        let dispatcher = ActionDispatcher::default();
        let mut vars = Variables::new();
        let actions = vec![
            WorkflowAction::send_notification("ops", "hi"),
            WorkflowAction::set_variable("after", json!(true)),
        ];
        let ok = dispatcher
            .dispatch(&actions, Uuid::now_v7(), "s1", &mut vars)
            .await;
        assert_eq!(ok, 1);
        assert_eq!(vars["after"], true);
    }
}
