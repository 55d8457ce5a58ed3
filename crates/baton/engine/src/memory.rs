//! In-memory store: the default [`WorkflowStore`] and [`AuditStore`]
//!
//! Backs the engine with `RwLock`-guarded maps. The compare-and-set
//! replaces take the write lock for the whole check-then-insert, so two
//! writers racing on the same row serialize there and the loser sees a
//! status conflict instead of silently clobbering the winner.

use std::collections::HashMap;
use std::sync::RwLock;

use baton_types::{
    AuditEntry, EscalationRecord, EscalationRecordId, InstanceStatus, TaskStatus, TenantId,
    WorkflowError, WorkflowInstance, WorkflowInstanceId, WorkflowResult, WorkflowTask,
    WorkflowTaskId,
};

use crate::store::{AuditQuery, AuditStore, WorkflowStore};

/// Process-local store. Cheap to construct, shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    instances: RwLock<HashMap<WorkflowInstanceId, WorkflowInstance>>,
    instances_by_tenant: RwLock<HashMap<TenantId, Vec<WorkflowInstanceId>>>,
    tasks: RwLock<HashMap<WorkflowTaskId, WorkflowTask>>,
    tasks_by_instance: RwLock<HashMap<WorkflowInstanceId, Vec<WorkflowTaskId>>>,
    escalations: RwLock<HashMap<EscalationRecordId, EscalationRecord>>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowStore for InMemoryStore {
    fn insert_instance(&self, instance: WorkflowInstance) -> WorkflowResult<()> {
        let mut instances = self
            .instances
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        let mut by_tenant = self
            .instances_by_tenant
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        let id = instance.id.clone();
        let tenant = instance.tenant_id.clone();
        if instances.insert(id.clone(), instance).is_none() {
            by_tenant.entry(tenant).or_default().push(id);
        }
        Ok(())
    }

    fn get_instance(&self, id: &WorkflowInstanceId) -> WorkflowResult<WorkflowInstance> {
        self.instances
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::InstanceNotFound(id.clone()))
    }

    fn replace_instance(
        &self,
        expected: InstanceStatus,
        updated: WorkflowInstance,
    ) -> WorkflowResult<()> {
        let mut instances = self
            .instances
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        let current = instances
            .get(&updated.id)
            .ok_or_else(|| WorkflowError::InstanceNotFound(updated.id.clone()))?;
        if current.status != expected {
            return Err(WorkflowError::InstanceStatusConflict {
                instance: updated.id.clone(),
                expected,
                actual: current.status,
            });
        }
        instances.insert(updated.id.clone(), updated);
        Ok(())
    }

    fn instances_for_tenant(&self, tenant: &TenantId) -> WorkflowResult<Vec<WorkflowInstance>> {
        let instances = self
            .instances
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        let by_tenant = self
            .instances_by_tenant
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        Ok(by_tenant
            .get(tenant)
            .map(|ids| ids.iter().filter_map(|id| instances.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    fn insert_task(&self, task: WorkflowTask) -> WorkflowResult<()> {
        let mut tasks = self.tasks.write().map_err(|_| WorkflowError::LockPoisoned)?;
        let mut by_instance = self
            .tasks_by_instance
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        let id = task.id.clone();
        let instance = task.instance_id.clone();
        if tasks.insert(id.clone(), task).is_none() {
            by_instance.entry(instance).or_default().push(id);
        }
        Ok(())
    }

    fn get_task(&self, id: &WorkflowTaskId) -> WorkflowResult<WorkflowTask> {
        self.tasks
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::TaskNotFound(id.clone()))
    }

    fn replace_task(&self, expected: TaskStatus, updated: WorkflowTask) -> WorkflowResult<()> {
        let mut tasks = self.tasks.write().map_err(|_| WorkflowError::LockPoisoned)?;
        let current = tasks
            .get(&updated.id)
            .ok_or_else(|| WorkflowError::TaskNotFound(updated.id.clone()))?;
        if current.status != expected {
            return Err(WorkflowError::TaskStatusConflict {
                task: updated.id.clone(),
                expected,
                actual: current.status,
            });
        }
        tasks.insert(updated.id.clone(), updated);
        Ok(())
    }

    fn tasks_for_instance(
        &self,
        instance: &WorkflowInstanceId,
    ) -> WorkflowResult<Vec<WorkflowTask>> {
        let tasks = self.tasks.read().map_err(|_| WorkflowError::LockPoisoned)?;
        let by_instance = self
            .tasks_by_instance
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        let mut found: Vec<WorkflowTask> = by_instance
            .get(instance)
            .map(|ids| ids.iter().filter_map(|id| tasks.get(id).cloned()).collect())
            .unwrap_or_default();
        found.sort_by_key(|task| task.step_index);
        Ok(found)
    }

    fn open_tasks_for_tenant(&self, tenant: &TenantId) -> WorkflowResult<Vec<WorkflowTask>> {
        let tasks = self.tasks.read().map_err(|_| WorkflowError::LockPoisoned)?;
        let mut open: Vec<WorkflowTask> = tasks
            .values()
            .filter(|task| &task.tenant_id == tenant && task.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|task| task.due_by);
        Ok(open)
    }

    fn insert_escalation(&self, record: EscalationRecord) -> WorkflowResult<()> {
        self.escalations
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .insert(record.id.clone(), record);
        Ok(())
    }

    fn get_escalation(&self, id: &EscalationRecordId) -> WorkflowResult<EscalationRecord> {
        self.escalations
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::EscalationNotFound(id.clone()))
    }

    fn update_escalation(&self, record: EscalationRecord) -> WorkflowResult<()> {
        let mut escalations = self
            .escalations
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        if !escalations.contains_key(&record.id) {
            return Err(WorkflowError::EscalationNotFound(record.id.clone()));
        }
        escalations.insert(record.id.clone(), record);
        Ok(())
    }

    fn open_escalations_for_task(
        &self,
        task: &WorkflowTaskId,
    ) -> WorkflowResult<Vec<EscalationRecord>> {
        let escalations = self
            .escalations
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        let mut open: Vec<EscalationRecord> = escalations
            .values()
            .filter(|record| &record.task_id == task && record.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|record| record.raised_at);
        Ok(open)
    }

    fn escalations_for_tenant(&self, tenant: &TenantId) -> WorkflowResult<Vec<EscalationRecord>> {
        let escalations = self
            .escalations
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        let mut found: Vec<EscalationRecord> = escalations
            .values()
            .filter(|record| &record.tenant_id == tenant)
            .cloned()
            .collect();
        found.sort_by_key(|record| record.raised_at);
        Ok(found)
    }
}

impl AuditStore for InMemoryStore {
    fn append(&self, entry: AuditEntry) -> WorkflowResult<()> {
        self.audit
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .push(entry);
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> WorkflowResult<Vec<AuditEntry>> {
        let log = self.audit.read().map_err(|_| WorkflowError::LockPoisoned)?;
        let mut matched: Vec<AuditEntry> = log
            .iter()
            .filter(|entry| {
                query.tenant.as_ref().map_or(true, |t| &entry.tenant_id == t)
                    && query.subject.as_ref().map_or(true, |s| &entry.subject == s)
                    && query.event.map_or(true, |e| entry.event == e)
                    && query.after.map_or(true, |a| entry.at >= a)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.at.cmp(&a.at));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_types::{
        ActorId, AuditEvent, AuditSubject, StepKind, StepSpec, WorkflowDefinitionId,
    };
    use chrono::Utc;

    fn make_instance(tenant: &TenantId) -> WorkflowInstance {
        WorkflowInstance::new(
            WorkflowDefinitionId::generate(),
            1,
            tenant.clone(),
            ActorId::new("creator"),
        )
    }

    fn make_task(instance: &WorkflowInstance, index: u32) -> WorkflowTask {
        let step = StepSpec::new(index, format!("step-{index}"), StepKind::Review);
        WorkflowTask::from_step(
            instance.id.clone(),
            instance.tenant_id.clone(),
            &step,
            Utc::now(),
        )
    }

    #[test]
    fn get_missing_instance_is_not_found() {
        let store = InMemoryStore::new();
        let id = WorkflowInstanceId::generate();

        let err = store.get_instance(&id).unwrap_err();
        assert!(matches!(err, WorkflowError::InstanceNotFound(missing) if missing == id));
    }

    #[test]
    fn replace_instance_rejects_stale_status() {
        let store = InMemoryStore::new();
        let tenant = TenantId::new("t1");
        let instance = make_instance(&tenant);
        store.insert_instance(instance.clone()).unwrap();

        let mut moved = instance.clone();
        moved.transition_to(InstanceStatus::Active).unwrap();
        store
            .replace_instance(InstanceStatus::Draft, moved.clone())
            .unwrap();

        // A second writer still holding the Draft read loses.
        let err = store
            .replace_instance(InstanceStatus::Draft, instance)
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InstanceStatusConflict {
                expected: InstanceStatus::Draft,
                actual: InstanceStatus::Active,
                ..
            }
        ));
    }

    #[test]
    fn replace_task_rejects_stale_status() {
        let store = InMemoryStore::new();
        let tenant = TenantId::new("t1");
        let instance = make_instance(&tenant);
        let task = make_task(&instance, 0);
        store.insert_task(task.clone()).unwrap();

        let mut skipped = task.clone();
        skipped.transition_to(TaskStatus::Skipped).unwrap();
        store.replace_task(TaskStatus::Pending, skipped).unwrap();

        let mut cancelled = task;
        cancelled.transition_to(TaskStatus::Cancelled).unwrap();
        let err = store
            .replace_task(TaskStatus::Pending, cancelled)
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::TaskStatusConflict {
                actual: TaskStatus::Skipped,
                ..
            }
        ));
    }

    #[test]
    fn tasks_for_instance_ordered_by_step_index() {
        let store = InMemoryStore::new();
        let tenant = TenantId::new("t1");
        let instance = make_instance(&tenant);
        store.insert_task(make_task(&instance, 2)).unwrap();
        store.insert_task(make_task(&instance, 0)).unwrap();
        store.insert_task(make_task(&instance, 1)).unwrap();

        let tasks = store.tasks_for_instance(&instance.id).unwrap();
        let indexes: Vec<u32> = tasks.iter().map(|t| t.step_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn open_tasks_exclude_closed_and_other_tenants() {
        let store = InMemoryStore::new();
        let tenant = TenantId::new("t1");
        let other = TenantId::new("t2");
        let instance = make_instance(&tenant);
        let foreign = make_instance(&other);

        let mut done = make_task(&instance, 0);
        done.transition_to(TaskStatus::Skipped).unwrap();
        store.insert_task(done).unwrap();
        store.insert_task(make_task(&instance, 1)).unwrap();
        store.insert_task(make_task(&foreign, 0)).unwrap();

        let open = store.open_tasks_for_tenant(&tenant).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].step_index, 1);
    }

    #[test]
    fn audit_query_filters_and_limits() {
        let store = InMemoryStore::new();
        let tenant = TenantId::new("t1");
        let instance_id = WorkflowInstanceId::generate();
        let actor = ActorId::new("auditor");

        for event in [
            AuditEvent::InstanceCreated,
            AuditEvent::InstanceStarted,
            AuditEvent::InstanceCompleted,
        ] {
            store
                .append(AuditEntry::new(
                    tenant.clone(),
                    AuditSubject::Instance(instance_id.clone()),
                    event,
                    actor.clone(),
                ))
                .unwrap();
        }

        let all = store
            .query(&AuditQuery::for_tenant(tenant.clone()))
            .unwrap();
        assert_eq!(all.len(), 3);

        let started = store
            .query(&AuditQuery::for_tenant(tenant.clone()).for_event(AuditEvent::InstanceStarted))
            .unwrap();
        assert_eq!(started.len(), 1);

        let capped = store
            .query(&AuditQuery::for_tenant(tenant).with_limit(2))
            .unwrap();
        assert_eq!(capped.len(), 2);
    }
}
