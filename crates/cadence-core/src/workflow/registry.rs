//! Workflow definition registry.
//!
//! Definitions are validated on the way in and stored behind `Arc`, so an
//! execution keeps the exact definition it started with even if the
//! workflow is updated or deleted while it runs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use cadence_types::error::WorkflowError;
use cadence_types::workflow::{WorkflowDefinition, WorkflowPatch};
use chrono::Utc;
use uuid::Uuid;

use super::definition::validate_definition;

/// Registry of workflow definitions, indexed by workflow ID.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a new definition, returning its ID.
    ///
    /// An empty `id` is replaced with a generated `workflow_<uuid>`. Nothing
    /// is stored when validation fails or the ID is already taken.
    pub fn create(&self, mut def: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        if def.id.trim().is_empty() {
            def.id = format!("workflow_{}", Uuid::now_v7().simple());
        }
        validate_definition(&def)?;

        let now = Utc::now();
        def.created_at = now;
        def.updated_at = now;

        let mut workflows = self.workflows.write().unwrap_or_else(PoisonError::into_inner);
        if workflows.contains_key(&def.id) {
            return Err(WorkflowError::Validation(format!(
                "workflow '{}' already exists",
                def.id
            )));
        }
        let def = Arc::new(def);
        workflows.insert(def.id.clone(), Arc::clone(&def));
        Ok(def)
    }

    /// Apply `patch` to an existing definition.
    ///
    /// Returns `Ok(None)` when the workflow is unknown. The patched
    /// definition is re-validated and only replaces the stored one if valid.
    pub fn update(
        &self,
        id: &str,
        patch: WorkflowPatch,
    ) -> Result<Option<Arc<WorkflowDefinition>>, WorkflowError> {
        let mut workflows = self.workflows.write().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = workflows.get(id) else {
            return Ok(None);
        };

        let mut def = WorkflowDefinition::clone(current);
        if let Some(name) = patch.name {
            def.name = name;
        }
        if let Some(description) = patch.description {
            def.description = Some(description);
        }
        if let Some(version) = patch.version {
            def.version = version;
        }
        if let Some(steps) = patch.steps {
            def.steps = steps;
        }
        if let Some(triggers) = patch.triggers {
            def.triggers = triggers;
        }
        if let Some(variables) = patch.variables {
            def.variables = variables;
        }
        if let Some(metadata) = patch.metadata {
            def.metadata = metadata;
        }
        validate_definition(&def)?;
        def.updated_at = Utc::now();

        let def = Arc::new(def);
        workflows.insert(id.to_string(), Arc::clone(&def));
        Ok(Some(def))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All definitions, sorted by ID.
    pub fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut defs: Vec<_> = self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    pub fn len(&self) -> usize {
        self.workflows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::workflow::{StepType, WorkflowStep};

    fn def(id: &str, steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        serde_json::from_value(serde_json::json!({ "id": id, "name": "test", "steps": [] }))
            .map(|mut d: WorkflowDefinition| {
                d.steps = steps;
                d
            })
            .unwrap()
    }

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        let mut s = WorkflowStep::new(id, StepType::Wait);
        s.dependencies = deps.iter().map(|d| d.to_string()).collect();
        s
    }

    #[test]
    fn create_generates_id_when_empty() {
        let registry = WorkflowRegistry::new();
        let stored = registry.create(def("", vec![step("a", &[])])).unwrap();
        assert!(stored.id.starts_with("workflow_"));
        assert!(registry.get(&stored.id).is_some());
    }

    #[test]
    fn cyclic_definition_is_not_stored() {
        let registry = WorkflowRegistry::new();
        let err = registry
            .create(def("wf", vec![step("a", &["b"]), step("b", &["a"])]))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Cycle { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_id_rejected() {
        let registry = WorkflowRegistry::new();
        registry.create(def("wf", vec![step("a", &[])])).unwrap();
        let msg = registry
            .create(def("wf", vec![step("a", &[])]))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("already exists"), "got: {msg}");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn update_revalidates_and_keeps_old_on_error() {
        let registry = WorkflowRegistry::new();
        registry.create(def("wf", vec![step("a", &[])])).unwrap();

        let bad = WorkflowPatch {
            steps: Some(vec![step("a", &["a"])]),
            ..Default::default()
        };
        assert!(registry.update("wf", bad).is_err());
        assert!(registry.get("wf").unwrap().steps[0].dependencies.is_empty());

        let rename = WorkflowPatch {
            name: Some("renamed".to_string()),
            ..Default::default()
        };
        let updated = registry.update("wf", rename).unwrap().unwrap();
        assert_eq!(updated.name, "renamed");
        assert!(updated.updated_at >= updated.created_at);

        assert!(registry.update("missing", WorkflowPatch::default()).unwrap().is_none());
    }

    #[test]
    fn list_is_sorted_and_clear_empties() {
        let registry = WorkflowRegistry::new();
        registry.create(def("b", vec![step("x", &[])])).unwrap();
        registry.create(def("a", vec![step("x", &[])])).unwrap();
        let ids: Vec<String> = registry.list().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        registry.clear();
        assert!(registry.is_empty());
    }
}
