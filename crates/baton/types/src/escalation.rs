//! Escalation records: the durable trail of SLA breaches
//!
//! One record per level raise. A record stays open until the underlying
//! task closes or an operator dismisses it; the time between raise and
//! close feeds the mean-time-to-resolve statistic.

use crate::{
    AssigneeRef, RoleCode, TenantId, WorkflowDefinitionId, WorkflowInstanceId, WorkflowTaskId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for an escalation record
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscalationRecordId(pub String);

impl EscalationRecordId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for EscalationRecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Escalation record ────────────────────────────────────────────────

/// A single level raise on an overdue task
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// Unique identifier
    pub id: EscalationRecordId,
    /// The tenant this record belongs to
    pub tenant_id: TenantId,
    /// The task that breached its SLA
    pub task_id: WorkflowTaskId,
    /// The task's instance
    pub instance_id: WorkflowInstanceId,
    /// The instance's definition, for per-workflow statistics
    pub definition_id: WorkflowDefinitionId,
    /// The level the task was raised to
    pub level: u32,
    /// Why the raise happened (threshold breach or operator action)
    pub reason: String,
    /// Role the task was re-routed to, when the rule names one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated_to_role: Option<RoleCode>,
    /// Primary target the raise routed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<AssigneeRef>,
    /// When the raise happened
    pub raised_at: DateTime<Utc>,
    /// When the record was closed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// How it was closed ("task completed", "dismissed: ...", ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl EscalationRecord {
    pub fn new(
        tenant_id: TenantId,
        task_id: WorkflowTaskId,
        instance_id: WorkflowInstanceId,
        definition_id: WorkflowDefinitionId,
        level: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: EscalationRecordId::generate(),
            tenant_id,
            task_id,
            instance_id,
            definition_id,
            level,
            reason: reason.into(),
            escalated_to_role: None,
            target: None,
            raised_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn with_role(mut self, role: RoleCode) -> Self {
        self.escalated_to_role = Some(role);
        self
    }

    pub fn with_target(mut self, target: AssigneeRef) -> Self {
        self.target = Some(target);
        self
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Close the record because the underlying task closed
    pub fn resolve(&mut self, note: impl Into<String>) {
        self.resolved_at = Some(Utc::now());
        self.resolution = Some(note.into());
    }

    /// Close the record by operator decision
    pub fn dismiss(&mut self, note: impl Into<String>) {
        self.resolved_at = Some(Utc::now());
        self.resolution = Some(format!("dismissed: {}", note.into()));
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Hours from raise to close, for the mean-time-to-resolve statistic
    pub fn hours_to_resolve(&self) -> Option<f64> {
        self.resolved_at.map(|resolved| {
            resolved.signed_duration_since(self.raised_at).num_seconds() as f64 / 3600.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record() -> EscalationRecord {
        EscalationRecord::new(
            TenantId::new("tenant-1"),
            WorkflowTaskId::new("task-1"),
            WorkflowInstanceId::new("inst-1"),
            WorkflowDefinitionId::new("def-1"),
            1,
            "24 hours overdue",
        )
    }

    #[test]
    fn test_new_record_is_open() {
        let record = make_record();
        assert!(record.is_open());
        assert!(record.hours_to_resolve().is_none());
    }

    #[test]
    fn test_resolve_closes_record() {
        let mut record = make_record();
        record.resolve("task completed");
        assert!(!record.is_open());
        assert!(record.hours_to_resolve().is_some());
        assert_eq!(record.resolution.as_deref(), Some("task completed"));
    }

    #[test]
    fn test_dismiss_prefixes_note() {
        let mut record = make_record();
        record.dismiss("duplicate alert");
        assert!(!record.is_open());
        assert_eq!(record.resolution.as_deref(), Some("dismissed: duplicate alert"));
    }
}
