//! Workflows seeded into every engine when `seed_builtin_workflows` is on.

use cadence_types::error::WorkflowError;
use cadence_types::workflow::WorkflowDefinition;

use super::definition::parse_workflow_yaml;

pub const TASK_ASSIGNMENT_ID: &str = "task_assignment";

/// Find agents with the required capabilities, pick the best match, assign
/// the task to them, and tell them about it.
///
/// Expects `task.id` and `task.title`; `required_capabilities` is optional
/// (a list or comma-separated string). When no agent qualifies, the select
/// and assign steps are skipped and the execution still completes.
const TASK_ASSIGNMENT_YAML: &str = r#"
id: task_assignment
name: Intelligent Task Assignment
description: Automatically assign tasks to the best available team members
version: "1.0.0"
metadata:
  category: task_management
triggers:
  - id: task_created
    type: event
    config:
      eventType: "task:created"
      condition: "task.assignedTo === null"
steps:
  - id: find_candidates
    name: Find Suitable Candidates
    type: task
    timeout_ms: 15000
    config:
      action: find_agents
      capabilities: "${required_capabilities}"
  - id: select_assignee
    name: Select Best Assignee
    type: decision
    dependencies: [find_candidates]
    condition: "totalFound > 0"
    config:
      strategy: best_match
      requiredSkills: "${required_capabilities}"
  - id: assign_task
    name: Assign Task
    type: task
    dependencies: [select_assignee]
    condition: "totalFound > 0"
    config:
      action: assign_to_agent
      agentId: "${selected}"
      taskId: "${task.id}"
    on_success:
      - type: send_notification
        config:
          recipient: "${selected}"
          message: "New task assigned: ${task.title}"
"#;

/// Every built-in definition, parsed and validated.
pub fn builtin_workflows() -> Result<Vec<WorkflowDefinition>, WorkflowError> {
    Ok(vec![parse_workflow_yaml(TASK_ASSIGNMENT_YAML)?])
}
