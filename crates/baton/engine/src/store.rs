//! Storage traits: workflow state and the audit log
//!
//! The engine reads and writes through these traits so a database-backed
//! store can replace [`InMemoryStore`](crate::InMemoryStore) without
//! touching engine code. Every status-changing write goes through a
//! compare-and-set replace: the caller names the status it read, and the
//! store rejects the write if another caller got there first. That check
//! is what turns a lost update into a typed conflict error.

use baton_types::{
    AuditEntry, AuditEvent, AuditSubject, EscalationRecord, EscalationRecordId, InstanceStatus,
    TaskStatus, TenantId, WorkflowInstance, WorkflowInstanceId, WorkflowResult, WorkflowTask,
    WorkflowTaskId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persistence for instances, tasks, and escalation records.
///
/// `get_*` returns the matching `*NotFound` error for a missing row.
/// `replace_*` compares the stored row's status against `expected` under
/// the write lock and returns `InstanceStatusConflict`/`TaskStatusConflict`
/// when they differ. The replacement row may keep the same status (a field
/// update) or carry the already-validated transition.
pub trait WorkflowStore: Send + Sync {
    // ── Instances ────────────────────────────────────────────────────

    fn insert_instance(&self, instance: WorkflowInstance) -> WorkflowResult<()>;

    fn get_instance(&self, id: &WorkflowInstanceId) -> WorkflowResult<WorkflowInstance>;

    /// Compare-and-set replace of an instance row.
    fn replace_instance(
        &self,
        expected: InstanceStatus,
        updated: WorkflowInstance,
    ) -> WorkflowResult<()>;

    fn instances_for_tenant(&self, tenant: &TenantId) -> WorkflowResult<Vec<WorkflowInstance>>;

    // ── Tasks ────────────────────────────────────────────────────────

    fn insert_task(&self, task: WorkflowTask) -> WorkflowResult<()>;

    fn get_task(&self, id: &WorkflowTaskId) -> WorkflowResult<WorkflowTask>;

    /// Compare-and-set replace of a task row.
    fn replace_task(&self, expected: TaskStatus, updated: WorkflowTask) -> WorkflowResult<()>;

    /// All tasks of an instance, ordered by step index.
    fn tasks_for_instance(
        &self,
        instance: &WorkflowInstanceId,
    ) -> WorkflowResult<Vec<WorkflowTask>>;

    /// Every task in the tenant that is not yet closed.
    fn open_tasks_for_tenant(&self, tenant: &TenantId) -> WorkflowResult<Vec<WorkflowTask>>;

    // ── Escalation records ───────────────────────────────────────────

    fn insert_escalation(&self, record: EscalationRecord) -> WorkflowResult<()>;

    fn get_escalation(&self, id: &EscalationRecordId) -> WorkflowResult<EscalationRecord>;

    fn update_escalation(&self, record: EscalationRecord) -> WorkflowResult<()>;

    /// Escalation records for a task that have not been resolved yet.
    fn open_escalations_for_task(
        &self,
        task: &WorkflowTaskId,
    ) -> WorkflowResult<Vec<EscalationRecord>>;

    fn escalations_for_tenant(&self, tenant: &TenantId) -> WorkflowResult<Vec<EscalationRecord>>;
}

/// Append-only sink for audit entries.
///
/// `append` must never rewrite an existing entry. Failures are retried by
/// the [`AuditRecorder`](crate::AuditRecorder), not by the store.
pub trait AuditStore: Send + Sync {
    fn append(&self, entry: AuditEntry) -> WorkflowResult<()>;

    /// Entries matching the filter, newest first.
    fn query(&self, query: &AuditQuery) -> WorkflowResult<Vec<AuditEntry>>;
}

/// Filter for audit queries. Unset fields match everything.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub tenant: Option<TenantId>,
    pub subject: Option<AuditSubject>,
    pub event: Option<AuditEvent>,
    /// Only entries recorded at or after this time
    pub after: Option<DateTime<Utc>>,
    /// Cap on returned entries (applied after newest-first ordering)
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn for_tenant(tenant: TenantId) -> Self {
        Self {
            tenant: Some(tenant),
            ..Self::default()
        }
    }

    pub fn for_subject(mut self, subject: AuditSubject) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn for_event(mut self, event: AuditEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn since(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
