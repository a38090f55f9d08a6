//! Dependency ordering and cycle detection.
//!
//! `resolve_order` produces the single deterministic order in which an
//! execution visits its steps: a depth-first post-order walk in which each
//! step's dependencies are visited (in declared order) before the step
//! itself, and root walks start in declaration order. The same definition
//! always yields the same order.

use std::collections::{HashMap, HashSet};

use cadence_types::error::WorkflowError;
use cadence_types::workflow::WorkflowStep;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// Topologically order `steps`, returning step IDs.
///
/// Errors:
/// - `Validation` for duplicate step IDs or a dependency on an unknown step
/// - `Cycle` naming the step at which the cycle was closed
pub fn resolve_order(steps: &[WorkflowStep]) -> Result<Vec<String>, WorkflowError> {
    let mut by_id: HashMap<&str, &WorkflowStep> = HashMap::with_capacity(steps.len());
    for step in steps {
        if by_id.insert(step.id.as_str(), step).is_some() {
            return Err(WorkflowError::Validation(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }
    for step in steps {
        for dep in &step.dependencies {
            if !by_id.contains_key(dep.as_str()) {
                return Err(WorkflowError::Validation(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }
    }

    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(steps.len());
    let mut order = Vec::with_capacity(steps.len());
    for step in steps {
        visit(step.id.as_str(), &by_id, &mut marks, &mut order)?;
    }
    Ok(order)
}

fn visit<'a>(
    step_id: &'a str,
    by_id: &HashMap<&'a str, &'a WorkflowStep>,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<String>,
) -> Result<(), WorkflowError> {
    match marks.get(step_id) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => {
            return Err(WorkflowError::Cycle {
                step_id: step_id.to_string(),
            });
        }
        None => {}
    }

    marks.insert(step_id, Mark::InProgress);
    if let Some(&step) = by_id.get(step_id) {
        for dep in &step.dependencies {
            visit(dep.as_str(), by_id, marks, order)?;
        }
    }
    marks.insert(step_id, Mark::Done);
    order.push(step_id.to_string());
    Ok(())
}

/// Check that `steps` form a DAG with resolvable dependencies.
pub fn validate_dag(steps: &[WorkflowStep]) -> Result<(), WorkflowError> {
    resolve_order(steps).map(|_| ())
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Group steps by dependency depth: stage 0 holds roots, stage `n` holds
/// steps whose deepest dependency sits in stage `n - 1`. Within a stage,
/// steps keep their position in the resolved order.
pub fn execution_stages(steps: &[WorkflowStep]) -> Result<Vec<Vec<String>>, WorkflowError> {
    let order = resolve_order(steps)?;
    let by_id: HashMap<&str, &WorkflowStep> = steps.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut depths: HashMap<&str, usize> = HashMap::with_capacity(order.len());
    let mut stages: Vec<Vec<String>> = Vec::new();
    for step_id in &order {
        let depth = by_id
            .get(step_id.as_str())
            .map(|step| {
                step.dependencies
                    .iter()
                    .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        depths.insert(step_id.as_str(), depth);
        if stages.len() <= depth {
            stages.resize_with(depth + 1, Vec::new);
        }
        stages[depth].push(step_id.clone());
    }
    Ok(stages)
}

// ---------------------------------------------------------------------------
// Transitive dependency closure
// ---------------------------------------------------------------------------

/// All steps `step_id` depends on, directly or indirectly, sorted by ID.
///
/// If `step_id` is not found, returns an empty vec.
pub fn transitive_dependencies<'a>(step_id: &str, steps: &'a [WorkflowStep]) -> Vec<&'a str> {
    let by_id: HashMap<&str, &WorkflowStep> = steps.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut visited: HashSet<&'a str> = HashSet::new();
    let mut stack: Vec<&'a WorkflowStep> = by_id.get(step_id).copied().into_iter().collect();

    while let Some(current) = stack.pop() {
        for dep in &current.dependencies {
            if visited.insert(dep.as_str()) {
                if let Some(&next) = by_id.get(dep.as_str()) {
                    stack.push(next);
                }
            }
        }
    }

    let mut deps: Vec<&str> = visited.into_iter().collect();
    deps.sort_unstable();
    deps
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::workflow::StepType;

    /// Helper: build a task step with given ID and dependencies.
    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        let mut s = WorkflowStep::new(id, StepType::Task);
        s.dependencies = deps.iter().map(|d| d.to_string()).collect();
        s
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|s| s == id).unwrap()
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    #[test]
    fn test_fan_out_keeps_declaration_order() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["a"])];
        assert_eq!(resolve_order(&steps).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dependencies_visited_before_dependents() {
        // Declared out of order on purpose.
        let steps = vec![
            step("report", &["merge"]),
            step("merge", &["left", "right"]),
            step("right", &["fetch"]),
            step("left", &["fetch"]),
            step("fetch", &[]),
        ];
        let order = resolve_order(&steps).unwrap();
        assert_eq!(order, vec!["fetch", "left", "right", "merge", "report"]);
        for s in &steps {
            for dep in &s.dependencies {
                assert!(position(&order, dep) < position(&order, &s.id));
            }
        }
    }

    #[test]
    fn test_order_is_deterministic() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &[]),
            step("d", &["c", "b"]),
        ];
        let first = resolve_order(&steps).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve_order(&steps).unwrap(), first);
        }
    }

    #[test]
    fn test_empty_steps() {
        assert!(resolve_order(&[]).unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn test_two_step_cycle_detected() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        let err = resolve_order(&steps).unwrap_err();
        assert!(matches!(err, WorkflowError::Cycle { ref step_id } if step_id == "a"));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let steps = vec![step("a", &["a"])];
        assert!(matches!(
            validate_dag(&steps),
            Err(WorkflowError::Cycle { .. })
        ));
    }

    #[test]
    fn test_three_step_cycle_detected() {
        let steps = vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])];
        let err = validate_dag(&steps).unwrap_err();
        assert!(err.to_string().contains("cycle detected"));
    }

    #[test]
    fn test_unknown_dependency() {
        let steps = vec![step("a", &["missing"])];
        let err = validate_dag(&steps).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
        assert!(err.to_string().contains("unknown step 'missing'"));
    }

    #[test]
    fn test_duplicate_ids() {
        let steps = vec![step("a", &[]), step("a", &[])];
        assert!(matches!(
            resolve_order(&steps),
            Err(WorkflowError::Validation(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    #[test]
    fn test_diamond_three_stages() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ];
        let stages = execution_stages(&steps).unwrap();
        assert_eq!(stages, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_uneven_fork_join_stages() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &[]),
            step("d", &["b", "c"]),
        ];
        let stages = execution_stages(&steps).unwrap();
        assert_eq!(stages, vec![vec!["a", "c"], vec!["b"], vec!["d"]]);
    }

    // -----------------------------------------------------------------------
    // Transitive dependencies
    // -----------------------------------------------------------------------

    #[test]
    fn test_transitive_dependencies() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["b"]),
            step("d", &["c", "a"]),
        ];
        assert_eq!(transitive_dependencies("d", &steps), vec!["a", "b", "c"]);
        assert!(transitive_dependencies("a", &steps).is_empty());
        assert!(transitive_dependencies("nonexistent", &steps).is_empty());
    }
}
