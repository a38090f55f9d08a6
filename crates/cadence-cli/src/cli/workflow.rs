//! Workflow subcommands: validate, list, run.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use cadence_core::WorkflowEngine;
use cadence_core::collaborator::Collaborators;
use cadence_core::collaborator::memory::{
    InMemoryAgentDirectory, InMemoryTeamDirectory, RecordingMessenger, RecordingTaskAssignment,
};
use cadence_core::workflow::dag::{execution_stages, resolve_order, transitive_dependencies};
use cadence_core::workflow::definition::{discover_workflows, load_workflow_file};
use cadence_types::config::AppConfig;
use cadence_types::event::WorkflowEvent;
use cadence_types::workflow::{
    ExecutionStatus, StepStatus, Variables, WorkflowDefinition, WorkflowExecution,
};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn validate(file: &Path, json: bool) -> Result<()> {
    let def = load(file)?;
    let order = resolve_order(&def.steps)?;
    let stages = execution_stages(&def.steps)?;
    let upstream = upstream(&def, &order);

    if json {
        let upstream: serde_json::Map<String, Value> = upstream
            .into_iter()
            .map(|(id, deps)| (id, Value::from(deps)))
            .collect();
        let out = serde_json::json!({
            "id": def.id,
            "name": def.name,
            "valid": true,
            "order": order,
            "stages": stages,
            "upstream": upstream,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} '{}' is valid",
        style("*").green().bold(),
        style(&def.name).cyan()
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Type"),
            Cell::new("Depends on"),
            Cell::new("Upstream"),
            Cell::new("Stage"),
            Cell::new("Guard"),
        ]);
    for (position, (step_id, all_deps)) in upstream.iter().enumerate() {
        let Some(step) = def.step(step_id) else {
            continue;
        };
        let stage = stages
            .iter()
            .position(|s| s.contains(step_id))
            .map_or_else(String::new, |n| n.to_string());
        table.add_row(vec![
            Cell::new(position + 1),
            Cell::new(&step.id),
            Cell::new(step.step_type),
            Cell::new(step.dependencies.join(", ")),
            Cell::new(all_deps.join(", ")),
            Cell::new(stage),
            Cell::new(step.condition.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}

/// Every step in run order, paired with all the steps it waits on directly
/// or through other steps.
fn upstream(def: &WorkflowDefinition, order: &[String]) -> Vec<(String, Vec<String>)> {
    order
        .iter()
        .map(|id| {
            let deps = transitive_dependencies(id, &def.steps)
                .into_iter()
                .map(str::to_string)
                .collect();
            (id.clone(), deps)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub fn list(dir: &Path, json: bool) -> Result<()> {
    let found = discover_workflows(dir)
        .with_context(|| format!("failed to scan {}", dir.display()))?;

    if json {
        let out: Vec<_> = found
            .iter()
            .map(|(path, def)| {
                serde_json::json!({
                    "path": path.display().to_string(),
                    "id": def.id,
                    "name": def.name,
                    "version": def.version,
                    "steps": def.steps.len(),
                    "triggers": def.triggers.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if found.is_empty() {
        println!();
        println!("  No workflow files under {}.", dir.display());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Version"),
            Cell::new("Steps"),
            Cell::new("Triggers"),
            Cell::new("File"),
        ]);
    for (path, def) in &found {
        table.add_row(vec![
            Cell::new(&def.name),
            Cell::new(&def.version),
            Cell::new(def.steps.len()),
            Cell::new(def.triggers.len()),
            Cell::new(path.display()),
        ]);
    }
    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub struct RunOptions {
    pub vars: Vec<String>,
    pub triggered_by: String,
    /// Answer for approval steps; `None` stops at the first one.
    pub decision: Option<bool>,
    pub json: bool,
}

pub async fn run(file: &Path, config: &AppConfig, options: RunOptions) -> Result<()> {
    let def = load(file)?;
    let variables = parse_vars(&options.vars)?;

    let assignments = Arc::new(RecordingTaskAssignment::default());
    let tasks = Arc::new(InMemoryTeamDirectory::default());
    let messenger = Arc::new(RecordingMessenger::default());
    let collaborators = Collaborators::new()
        .with_agent_directory(Arc::new(InMemoryAgentDirectory::from_config(&config.agents)))
        .with_team_directory(tasks.clone())
        .with_task_assignment(assignments.clone())
        .with_messenger(messenger.clone());

    let engine = WorkflowEngine::new(config.engine.clone(), collaborators);
    let workflow_id = engine
        .create_workflow(def)
        .context("workflow rejected by engine")?;
    // Subscribe first so the execution's first pause cannot be missed.
    let mut events = engine.subscribe();
    let execution_id = engine
        .execute_workflow(&workflow_id, variables, &options.triggered_by)
        .context("failed to start execution")?;
    tracing::info!(%execution_id, %workflow_id, "execution started");

    // Pauses are taken from events, not from the status channel: two approval
    // steps in a row can go Paused -> Running -> Paused between polls.
    let mut answered = HashSet::new();
    loop {
        let step_id = match events.recv().await {
            Ok(WorkflowEvent::ExecutionPaused {
                execution_id: id,
                step_id,
            }) if id == execution_id => step_id,
            Ok(event) => {
                if event.execution_id() == Some(execution_id) && event.terminal_status().is_some() {
                    break;
                }
                continue;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event stream lagged; checking execution state");
                match engine.get_execution(execution_id) {
                    Some(e) if e.status.is_terminal() => break,
                    Some(e) if e.status == ExecutionStatus::Paused => match e.current_step {
                        Some(step_id) => step_id,
                        None => continue,
                    },
                    _ => continue,
                }
            }
            Err(RecvError::Closed) => break,
        };
        if !answered.insert(step_id.clone()) {
            continue;
        }

        let Some(approved) = options.decision else {
            engine.cancel_execution(execution_id)?;
            bail!("paused at approval step '{step_id}'; rerun with --approve or --reject");
        };
        if !options.json {
            println!(
                "  {} {} approval step '{}'",
                style("?").yellow().bold(),
                if approved { "Approving" } else { "Rejecting" },
                style(&step_id).cyan()
            );
        }
        engine.resume_human_approval(execution_id, &step_id, approved)?;
    }

    let execution = engine
        .wait_for_completion(execution_id)
        .await
        .context("execution record disappeared")?;

    if options.json {
        let out = serde_json::json!({
            "execution": execution,
            "tasks_created": tasks.tasks().len(),
            "assignments": assignments.assignments().len(),
            "messages": messenger.sent().len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_execution(&execution);
        for message in messenger.sent() {
            println!(
                "  {} {} -> {}: {}",
                style("@").dim(),
                message.from,
                style(&message.to).cyan(),
                message.content
            );
        }
        for assignment in assignments.assignments() {
            println!(
                "  {} task {} assigned to {}",
                style("+").dim(),
                assignment.task_id,
                style(&assignment.agent_id).cyan()
            );
        }
        println!();
    }

    match execution.status {
        ExecutionStatus::Completed => Ok(()),
        status => bail!(
            "execution {status}: {}",
            execution.error.as_deref().unwrap_or("no error recorded")
        ),
    }
}

fn print_execution(execution: &WorkflowExecution) {
    let status = match execution.status {
        ExecutionStatus::Completed => style(execution.status.to_string()).green(),
        ExecutionStatus::Failed => style(execution.status.to_string()).red(),
        _ => style(execution.status.to_string()).yellow(),
    };
    println!();
    println!("  Execution {} {}", execution.id, status.bold());
    if let Some(error) = &execution.error {
        println!("  Error: {error}");
    }
    println!();

    let mut steps: Vec<_> = execution.step_executions.values().collect();
    steps.sort_by_key(|s| s.started_at.or(s.completed_at));

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Retries"),
            Cell::new("Assigned to"),
            Cell::new("Error"),
        ]);
    for step in steps {
        let color = match step.status {
            StepStatus::Completed => Color::Green,
            StepStatus::Failed => Color::Red,
            _ => Color::Yellow,
        };
        table.add_row(vec![
            Cell::new(&step.step_id),
            Cell::new(format!("{:?}", step.status).to_lowercase()).fg(color),
            Cell::new(step.retry_count),
            Cell::new(step.assigned_to.as_deref().unwrap_or("")),
            Cell::new(step.error.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
    println!();
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load(file: &Path) -> Result<WorkflowDefinition> {
    load_workflow_file(file).with_context(|| format!("failed to load workflow {}", file.display()))
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type;
/// anything else is taken as a plain string.
fn parse_vars(pairs: &[String]) -> Result<Variables> {
    let mut vars = Variables::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("invalid --var '{pair}': expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("invalid --var '{pair}': empty key");
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}
