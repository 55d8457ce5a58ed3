//! Workflow instances: one running execution of a definition
//!
//! An instance owns nothing but its own status and routing context; the
//! work lives in its tasks. Status changes are validated against a fixed
//! transition table and applied by the engine through a status
//! compare-and-set, so two racing operations cannot both win.

use crate::{ActorId, TeamId, TenantId, WorkflowDefinitionId, WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for a workflow instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowInstanceId(pub String);

impl WorkflowInstanceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for WorkflowInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Subject scope ────────────────────────────────────────────────────

/// The record a workflow runs against, named by a scope dimension and an
/// identifier within it (e.g. framework "SOC2", control "CC-6.1"). Used by
/// the RACI resolution tier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeRef {
    pub scope_type: String,
    pub scope_id: String,
}

impl ScopeRef {
    pub fn new(scope_type: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self {
            scope_type: scope_type.into(),
            scope_id: scope_id.into(),
        }
    }
}

impl std::fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scope_type, self.scope_id)
    }
}

// ── Workflow instance ────────────────────────────────────────────────

/// A running execution of a workflow definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique identifier
    pub id: WorkflowInstanceId,
    /// The tenant this instance belongs to
    pub tenant_id: TenantId,
    /// The definition this instance executes
    pub definition_id: WorkflowDefinitionId,
    /// Definition version captured at creation
    pub definition_version: u32,
    /// Current lifecycle status
    pub status: InstanceStatus,
    /// Scheduling priority
    pub priority: Priority,
    /// Scope of the record under process, for RACI routing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<ScopeRef>,
    /// Owner of the record under process, for direct-owner routing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_user: Option<ActorId>,
    /// Owning team of the record under process, for team-role routing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_team: Option<TeamId>,
    /// Who created the instance
    pub created_by: ActorId,
    /// Who started it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<ActorId>,
    /// Reason attached to the closing decision (approve/reject/cancel)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    /// Input variables supplied at start
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, String>,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// When it left Draft
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    pub fn new(
        definition_id: WorkflowDefinitionId,
        definition_version: u32,
        tenant_id: TenantId,
        created_by: ActorId,
    ) -> Self {
        Self {
            id: WorkflowInstanceId::generate(),
            tenant_id,
            definition_id,
            definition_version,
            status: InstanceStatus::default(),
            priority: Priority::default(),
            subject: None,
            owner_user: None,
            owner_team: None,
            created_by,
            initiated_by: None,
            decision_reason: None,
            variables: HashMap::new(),
            created_at: Utc::now(),
            started_at: None,
            closed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_subject(mut self, subject: ScopeRef) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn with_owner_user(mut self, owner: ActorId) -> Self {
        self.owner_user = Some(owner);
        self
    }

    pub fn with_owner_team(mut self, team: TeamId) -> Self {
        self.owner_team = Some(team);
        self
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Apply a status transition after validating it against the fixed
    /// table. Stamps `started_at` on Draft -> Active and `closed_at` when
    /// entering a terminal status.
    pub fn transition_to(&mut self, status: InstanceStatus) -> WorkflowResult<()> {
        if !self.status.can_transition_to(status) {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        if self.status == InstanceStatus::Draft && status == InstanceStatus::Active {
            self.started_at = Some(Utc::now());
        }
        self.status = status;
        if status.is_terminal() {
            self.closed_at = Some(Utc::now());
        }
        Ok(())
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Hours from creation to close, for completion statistics
    pub fn completion_hours(&self) -> Option<f64> {
        self.closed_at.map(|closed| {
            closed.signed_duration_since(self.created_at).num_seconds() as f64 / 3600.0
        })
    }
}

// ── Priority ─────────────────────────────────────────────────────────

/// Scheduling priority of an instance. Informational for dashboards and
/// worker ordering; the engine itself treats all instances alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

// ── Instance status ──────────────────────────────────────────────────

/// The lifecycle status of a workflow instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InstanceStatus {
    /// Created but not yet started
    #[default]
    Draft,
    /// Work in progress
    Active,
    /// Waiting on an approval gate
    PendingApproval,
    /// All approvals granted; completion pending
    Approved,
    /// Terminally rejected at a gate
    Rejected,
    /// All mandatory work done
    Completed,
    /// Cancelled by an authorized actor
    Cancelled,
}

impl InstanceStatus {
    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    /// The fixed transition table. `Active -> Completed` covers
    /// definitions without approval steps.
    pub fn valid_transitions(&self) -> &'static [InstanceStatus] {
        match self {
            Self::Draft => &[Self::Active, Self::Cancelled],
            Self::Active => &[Self::PendingApproval, Self::Completed, Self::Cancelled],
            Self::PendingApproval => &[
                Self::Active,
                Self::Approved,
                Self::Rejected,
                Self::Cancelled,
            ],
            Self::Approved => &[Self::Completed, Self::Cancelled],
            Self::Rejected | Self::Completed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, to: InstanceStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Draft => "Draft",
            Self::Active => "Active",
            Self::PendingApproval => "PendingApproval",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_instance() -> WorkflowInstance {
        WorkflowInstance::new(
            WorkflowDefinitionId::new("def-1"),
            1,
            TenantId::new("tenant-1"),
            ActorId::new("creator-1"),
        )
    }

    #[test]
    fn test_new_instance_is_draft() {
        let inst = make_instance();
        assert_eq!(inst.status, InstanceStatus::Draft);
        assert!(!inst.is_terminal());
        assert!(inst.started_at.is_none());
        assert!(inst.closed_at.is_none());
    }

    #[test]
    fn test_transition_table() {
        use InstanceStatus::*;
        assert!(Draft.can_transition_to(Active));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(!Draft.can_transition_to(Completed));
        assert!(Active.can_transition_to(PendingApproval));
        assert!(Active.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Approved));
        assert!(PendingApproval.can_transition_to(Active));
        assert!(PendingApproval.can_transition_to(Approved));
        assert!(PendingApproval.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Completed));
        assert!(!Approved.can_transition_to(Rejected));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use InstanceStatus::*;
        for terminal in [Completed, Rejected, Cancelled] {
            assert!(terminal.is_terminal());
            assert!(terminal.valid_transitions().is_empty());
        }
    }

    #[test]
    fn test_lifecycle_stamps_timestamps() {
        let mut inst = make_instance();
        inst.transition_to(InstanceStatus::Active).unwrap();
        assert!(inst.started_at.is_some());
        assert!(inst.closed_at.is_none());

        inst.transition_to(InstanceStatus::Completed).unwrap();
        assert!(inst.closed_at.is_some());
        assert!(inst.completion_hours().is_some());
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut inst = make_instance();
        let err = inst.transition_to(InstanceStatus::Approved);
        assert!(matches!(
            err,
            Err(WorkflowError::InvalidTransition {
                from: InstanceStatus::Draft,
                to: InstanceStatus::Approved,
            })
        ));
        assert_eq!(inst.status, InstanceStatus::Draft);
    }

    #[test]
    fn test_no_transition_out_of_cancelled() {
        let mut inst = make_instance();
        inst.transition_to(InstanceStatus::Cancelled).unwrap();
        assert!(inst.transition_to(InstanceStatus::Active).is_err());
    }
}
