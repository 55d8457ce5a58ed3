//! Definition registry: stores and retrieves workflow definitions
//!
//! Definitions are validated on the way in and treated as immutable once
//! registered. To change a workflow, register a new definition carrying a
//! bumped version; running instances keep the version they started with.

use std::collections::HashMap;
use std::sync::RwLock;

use baton_types::{
    TenantId, WorkflowDefinition, WorkflowDefinitionId, WorkflowError, WorkflowResult,
};
use tracing::info;

/// Read access to registered definitions.
///
/// The engine resolves definitions through this trait so deployments can
/// serve them from a database or config service instead of the in-process
/// [`DefinitionRegistry`].
pub trait DefinitionReader: Send + Sync {
    fn get(&self, id: &WorkflowDefinitionId) -> WorkflowResult<WorkflowDefinition>;

    fn list_for_tenant(&self, tenant: &TenantId) -> WorkflowResult<Vec<WorkflowDefinition>>;
}

/// In-process registry of workflow definitions.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: RwLock<HashMap<WorkflowDefinitionId, WorkflowDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow definition.
    ///
    /// Validates the definition before storing and returns its id.
    pub fn register(&self, definition: WorkflowDefinition) -> WorkflowResult<WorkflowDefinitionId> {
        definition.validate()?;
        let id = definition.id.clone();
        info!(
            definition_id = %id,
            name = %definition.name,
            version = definition.version,
            steps = definition.step_count(),
            "Workflow definition registered"
        );
        self.definitions
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .insert(id.clone(), definition);
        Ok(id)
    }

    /// Mark a definition inactive. New instances can no longer be created
    /// from it; running instances are unaffected.
    pub fn deactivate(&self, id: &WorkflowDefinitionId) -> WorkflowResult<()> {
        let mut definitions = self
            .definitions
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        let definition = definitions
            .get_mut(id)
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.clone()))?;
        definition.active = false;
        info!(definition_id = %id, "Workflow definition deactivated");
        Ok(())
    }

    pub fn contains(&self, id: &WorkflowDefinitionId) -> bool {
        self.definitions
            .read()
            .map(|definitions| definitions.contains_key(id))
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.definitions
            .read()
            .map(|definitions| definitions.len())
            .unwrap_or(0)
    }
}

impl DefinitionReader for DefinitionRegistry {
    fn get(&self, id: &WorkflowDefinitionId) -> WorkflowResult<WorkflowDefinition> {
        self.definitions
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.clone()))
    }

    fn list_for_tenant(&self, tenant: &TenantId) -> WorkflowResult<Vec<WorkflowDefinition>> {
        let definitions = self
            .definitions
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        let mut found: Vec<WorkflowDefinition> = definitions
            .values()
            .filter(|definition| &definition.tenant_id == tenant)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_types::{StepKind, StepSpec};

    fn make_definition(tenant: &str) -> WorkflowDefinition {
        WorkflowDefinition::new("access-review", TenantId::new(tenant))
            .with_step(StepSpec::new(0, "prepare", StepKind::DataEntry))
            .with_step(StepSpec::new(1, "review", StepKind::Review))
    }

    #[test]
    fn register_and_get_round_trip() {
        let registry = DefinitionRegistry::new();
        let id = registry.register(make_definition("t1")).unwrap();

        assert!(registry.contains(&id));
        let fetched = registry.get(&id).unwrap();
        assert_eq!(fetched.name, "access-review");
        assert_eq!(fetched.step_count(), 2);
    }

    #[test]
    fn register_rejects_invalid_definition() {
        let registry = DefinitionRegistry::new();
        // Step indexes must be contiguous from zero.
        let definition = WorkflowDefinition::new("broken", TenantId::new("t1"))
            .with_step(StepSpec::new(1, "late start", StepKind::Review));

        let err = registry.register(definition).unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(_)));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn get_missing_is_definition_not_found() {
        let registry = DefinitionRegistry::new();
        let id = WorkflowDefinitionId::generate();

        let err = registry.get(&id).unwrap_err();
        assert!(matches!(err, WorkflowError::DefinitionNotFound(missing) if missing == id));
    }

    #[test]
    fn list_for_tenant_filters_and_sorts() {
        let registry = DefinitionRegistry::new();
        registry.register(make_definition("t1")).unwrap();
        registry.register(make_definition("t2")).unwrap();
        registry
            .register(
                WorkflowDefinition::new("incident-close", TenantId::new("t1"))
                    .with_step(StepSpec::new(0, "confirm", StepKind::Review)),
            )
            .unwrap();

        let names: Vec<String> = registry
            .list_for_tenant(&TenantId::new("t1"))
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["access-review", "incident-close"]);
    }

    #[test]
    fn deactivate_flips_active_flag() {
        let registry = DefinitionRegistry::new();
        let id = registry.register(make_definition("t1")).unwrap();

        registry.deactivate(&id).unwrap();
        assert!(!registry.get(&id).unwrap().active);
    }
}
