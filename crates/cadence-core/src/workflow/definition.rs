//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML/JSON documents and `WorkflowDefinition`, and checks
//! every structural rule a definition must satisfy before the registry will
//! store it: unique step IDs, resolvable acyclic dependencies, parseable
//! guards, and well-formed parallel sub-steps.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use cadence_types::error::WorkflowError;
use cadence_types::workflow::{
    ActionType, StepType, Variables, WorkflowDefinition, WorkflowStep,
};

use super::condition::Guard;
use super::dag;

/// Config key holding a parallel step's inline sub-steps.
pub const PARALLEL_STEPS_KEY: &str = "steps";

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Parse a JSON string into a validated `WorkflowDefinition`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Decode the inline sub-steps of a parallel step.
///
/// A missing `steps` key yields an empty list.
pub fn parallel_substeps(config: &Variables) -> Result<Vec<WorkflowStep>, WorkflowError> {
    match config.get(PARALLEL_STEPS_KEY) {
        None => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            WorkflowError::Validation(format!("invalid parallel sub-steps: {e}"))
        }),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty and at least one step exists
/// - Step IDs are non-empty and unique
/// - Dependencies reference existing steps and form no cycle
/// - Guards parse, timeouts are > 0
/// - Parallel sub-steps decode, are uniquely named, and are neither
///   `parallel` nor `human_approval`
/// - Trigger IDs are non-empty and unique
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }

    if def.steps.is_empty() {
        return Err(WorkflowError::Validation(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        validate_step(step)?;
        if !seen_ids.insert(step.id.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    dag::validate_dag(&def.steps)?;

    for step in def.steps.iter().filter(|s| s.step_type == StepType::Parallel) {
        validate_parallel(step)?;
    }

    let mut trigger_ids = HashSet::new();
    for trigger in &def.triggers {
        if trigger.id.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "trigger ID must not be empty".to_string(),
            ));
        }
        if !trigger_ids.insert(trigger.id.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "duplicate trigger ID: '{}'",
                trigger.id
            )));
        }
    }

    Ok(())
}

fn validate_step(step: &WorkflowStep) -> Result<(), WorkflowError> {
    if step.id.trim().is_empty() {
        return Err(WorkflowError::Validation(
            "step ID must not be empty".to_string(),
        ));
    }

    if let Some(condition) = &step.condition {
        Guard::parse(condition).map_err(|e| {
            WorkflowError::Validation(format!(
                "step '{}' has an invalid condition: {e}",
                step.id
            ))
        })?;
    }

    if step.timeout_ms == Some(0) {
        return Err(WorkflowError::Validation(format!(
            "step '{}': timeout must be > 0",
            step.id
        )));
    }

    for action in step.on_success.iter().chain(step.on_failure.iter()) {
        if let ActionType::Other(name) = &action.action_type {
            tracing::warn!(step_id = %step.id, action = %name, "unsupported action type will be ignored");
        }
    }

    Ok(())
}

fn validate_parallel(step: &WorkflowStep) -> Result<(), WorkflowError> {
    let substeps = parallel_substeps(&step.config)?;

    let mut seen = HashSet::new();
    for sub in &substeps {
        if matches!(sub.step_type, StepType::Parallel | StepType::HumanApproval) {
            return Err(WorkflowError::Validation(format!(
                "parallel step '{}' cannot contain {} sub-step '{}'",
                step.id, sub.step_type, sub.id
            )));
        }
        validate_step(sub)?;
        if !seen.insert(sub.id.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "parallel step '{}' has duplicate sub-step ID '{}'",
                step.id, sub.id
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a file.
///
/// `.json` files are parsed as JSON; everything else as YAML.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_workflow_json(&content),
        _ => parse_workflow_yaml(&content),
    }
}

/// Discover all workflow files under `base_dir`.
///
/// Scans for `.yaml`, `.yml`, and `.json` files recursively. Files that fail
/// to parse or validate are skipped with a warning.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }
        let is_workflow_file = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json"));
        if !is_workflow_file {
            continue;
        }
        match load_workflow_file(&path) {
            Ok(def) => results.push((path, def)),
            Err(e) => tracing::warn!(?path, error = %e, "skipping invalid workflow file"),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
