//! Audit entries: the append-only record of every state change
//!
//! One entry per status transition, written before the transition is
//! reported durable. Entries are never updated or deleted; they are the
//! sole source of truth for "what happened when".

use crate::{ActorId, TenantId, WorkflowInstanceId, WorkflowTaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for an audit entry
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditEntryId(pub String);

impl AuditEntryId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for AuditEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Subject ──────────────────────────────────────────────────────────

/// What an audit entry is about
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditSubject {
    Instance(WorkflowInstanceId),
    Task(WorkflowTaskId),
}

impl AuditSubject {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Instance(_) => "Instance",
            Self::Task(_) => "Task",
        }
    }

    pub fn id_str(&self) -> &str {
        match self {
            Self::Instance(id) => &id.0,
            Self::Task(id) => &id.0,
        }
    }
}

impl std::fmt::Display for AuditSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id_str())
    }
}

// ── Event vocabulary ─────────────────────────────────────────────────

/// What happened. The vocabulary is closed so consumers can match on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEvent {
    InstanceCreated,
    InstanceStarted,
    SubmittedForApproval,
    ApprovalGranted,
    ApprovalRejected,
    ReturnedForRework,
    InstanceCompleted,
    InstanceCancelled,
    TaskCreated,
    TaskStarted,
    TaskCompleted,
    TaskSkipped,
    TaskCancelled,
    TaskReassigned,
    TaskReopened,
    TaskEscalated,
    EscalationDismissed,
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ── Audit entry ──────────────────────────────────────────────────────

/// One immutable entry in the audit trail
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier
    pub id: AuditEntryId,
    /// The tenant this entry belongs to
    pub tenant_id: TenantId,
    /// The instance or task the entry is about
    pub subject: AuditSubject,
    /// What happened
    pub event: AuditEvent,
    /// Status before the event, when the event is a transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<String>,
    /// Status after the event, when the event is a transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,
    /// Human-readable description
    pub description: String,
    /// Who caused the event
    pub actor: ActorId,
    /// When the event occurred
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: TenantId,
        subject: AuditSubject,
        event: AuditEvent,
        actor: ActorId,
    ) -> Self {
        Self {
            id: AuditEntryId::generate(),
            tenant_id,
            subject,
            event,
            old_status: None,
            new_status: None,
            description: String::new(),
            actor,
            at: Utc::now(),
        }
    }

    /// Record the transition this entry mirrors
    pub fn with_statuses(
        mut self,
        old: impl std::fmt::Display,
        new: impl std::fmt::Display,
    ) -> Self {
        self.old_status = Some(old.to_string());
        self.new_status = Some(new.to_string());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstanceStatus, TaskStatus};

    #[test]
    fn test_entry_builder() {
        let entry = AuditEntry::new(
            TenantId::new("tenant-1"),
            AuditSubject::Instance(WorkflowInstanceId::new("inst-1")),
            AuditEvent::InstanceStarted,
            ActorId::new("actor-1"),
        )
        .with_statuses(InstanceStatus::Draft, InstanceStatus::Active)
        .with_description("Started with 3 tasks");

        assert_eq!(entry.subject.kind(), "Instance");
        assert_eq!(entry.old_status.as_deref(), Some("Draft"));
        assert_eq!(entry.new_status.as_deref(), Some("Active"));
    }

    #[test]
    fn test_task_subject_display() {
        let entry = AuditEntry::new(
            TenantId::new("tenant-1"),
            AuditSubject::Task(WorkflowTaskId::new("task-1")),
            AuditEvent::TaskCompleted,
            ActorId::new("actor-1"),
        )
        .with_statuses(TaskStatus::Assigned, TaskStatus::Completed);

        assert_eq!(entry.subject.to_string(), "Task:task-1");
        assert_eq!(entry.event.to_string(), "TaskCompleted");
    }
}
