//! Workflow tasks: the discrete units of work an instance expands into
//!
//! One task per definition step, carrying a snapshot of the step fields
//! and of its resolved assignee set. Escalation is orthogonal to normal
//! progress: an escalated task keeps its level, stays completable, and its
//! level never goes back down.

use crate::{
    ActorId, AssigneeRef, AssigneeResolution, RoleCode, StepKind, StepSpec, TenantId,
    WorkflowError, WorkflowInstanceId, WorkflowResult,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for a workflow task
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowTaskId(pub String);

impl WorkflowTaskId {
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

impl std::fmt::Display for WorkflowTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow task ────────────────────────────────────────────────────

/// A unit of work created from one definition step
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Unique identifier
    pub id: WorkflowTaskId,
    /// The instance this task belongs to
    pub instance_id: WorkflowInstanceId,
    /// The tenant this task belongs to
    pub tenant_id: TenantId,
    /// Position of the originating step
    pub step_index: u32,
    /// Step name snapshot
    pub name: String,
    /// Step kind snapshot
    pub kind: StepKind,
    /// Role required to act on the task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_code: Option<RoleCode>,
    /// Mandatory tasks block instance completion until closed
    pub mandatory: bool,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// SLA deadline
    pub due_by: DateTime<Utc>,
    /// Escalation level; never decreases
    pub escalation_level: u32,
    /// Resolved assignee snapshot (not a live directory query)
    pub assignees: Vec<AssigneeResolution>,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When it was completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Who completed it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<ActorId>,
    /// Output captured at completion
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub output_data: HashMap<String, String>,
    /// Free-text notes from completion or skip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl WorkflowTask {
    /// Create a task from a definition step. Due-by is `now` plus the
    /// step's SLA hours.
    pub fn from_step(
        instance_id: WorkflowInstanceId,
        tenant_id: TenantId,
        step: &StepSpec,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WorkflowTaskId::generate(),
            instance_id,
            tenant_id,
            step_index: step.index,
            name: step.name.clone(),
            kind: step.kind,
            role_code: step.role_code.clone(),
            mandatory: step.mandatory,
            status: TaskStatus::default(),
            due_by: now + Duration::hours(step.sla_hours),
            escalation_level: 0,
            assignees: Vec::new(),
            created_at: now,
            completed_at: None,
            completed_by: None,
            output_data: HashMap::new(),
            notes: None,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Apply a status transition after validating it against the fixed
    /// table.
    pub fn transition_to(&mut self, status: TaskStatus) -> WorkflowResult<()> {
        if !self.status.can_transition_to(status) {
            return Err(WorkflowError::InvalidTaskTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        Ok(())
    }

    /// Replace the assignee snapshot. A Pending task becomes Assigned;
    /// any other open task keeps its status (reassignment). Closed tasks
    /// cannot be assigned.
    pub fn assign(&mut self, assignees: Vec<AssigneeResolution>) -> WorkflowResult<()> {
        if self.status.is_closed() {
            return Err(WorkflowError::InvalidTaskState {
                task: self.id.clone(),
                status: self.status,
            });
        }
        self.assignees = assignees;
        if self.status == TaskStatus::Pending && !self.assignees.is_empty() {
            self.status = TaskStatus::Assigned;
        }
        Ok(())
    }

    /// Complete the task, stamping actor, output, and notes
    pub fn complete(
        &mut self,
        actor: ActorId,
        output_data: HashMap<String, String>,
        notes: Option<String>,
    ) -> WorkflowResult<()> {
        self.transition_to(TaskStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.completed_by = Some(actor);
        self.output_data = output_data;
        self.notes = notes;
        Ok(())
    }

    /// Raise the escalation level. Levels are monotonic; equal or lower
    /// targets are rejected so repeated scans stay idempotent.
    pub fn escalate_to(&mut self, level: u32) -> WorkflowResult<()> {
        if level <= self.escalation_level {
            return Err(WorkflowError::ValidationError(format!(
                "Escalation level cannot go from {} to {}",
                self.escalation_level, level
            )));
        }
        self.transition_to(TaskStatus::Escalated)?;
        self.escalation_level = level;
        Ok(())
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn is_open(&self) -> bool {
        !self.status.is_closed()
    }

    /// Open and past its due-by
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.due_by < now
    }

    /// Whole hours past due-by (floor); negative when not yet due
    pub fn hours_overdue(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.due_by).num_hours()
    }

    /// The single primary assignee, if resolution produced one
    pub fn primary_assignee(&self) -> Option<&AssigneeResolution> {
        self.assignees.iter().find(|a| a.is_primary)
    }

    /// Whether an actor appears as a direct user assignee. Team
    /// assignments need a directory membership check on top.
    pub fn has_assignee_user(&self, actor: &ActorId) -> bool {
        self.assignees
            .iter()
            .any(|a| matches!(&a.assignee, AssigneeRef::User(u) if u == actor))
    }

    /// Teams in the assignee snapshot
    pub fn assigned_teams(&self) -> Vec<&crate::TeamId> {
        self.assignees
            .iter()
            .filter_map(|a| match &a.assignee {
                AssigneeRef::Team(t) => Some(t),
                AssigneeRef::User(_) => None,
            })
            .collect()
    }
}

// ── Task status ──────────────────────────────────────────────────────

/// The lifecycle status of a workflow task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskStatus {
    /// Created but unassigned (resolution failed or not yet run)
    #[default]
    Pending,
    /// Assignee snapshot resolved
    Assigned,
    /// An assignee acknowledged and is working
    InProgress,
    /// Work done
    Completed,
    /// Raised to a higher authority; still completable
    Escalated,
    /// Skipped (optional steps only)
    Skipped,
    /// Closed by instance cancellation or terminal rejection
    Cancelled,
}

impl TaskStatus {
    /// Closed tasks accept no further transitions
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Cancelled)
    }

    /// The fixed transition table. `Escalated -> Escalated` models a
    /// further level raise; skipping is only reachable from Pending.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[
                Self::Assigned,
                Self::Skipped,
                Self::Cancelled,
                Self::Escalated,
            ],
            Self::Assigned => &[
                Self::InProgress,
                Self::Completed,
                Self::Cancelled,
                Self::Escalated,
            ],
            Self::InProgress => &[Self::Completed, Self::Cancelled, Self::Escalated],
            Self::Escalated => &[
                Self::InProgress,
                Self::Completed,
                Self::Cancelled,
                Self::Escalated,
            ],
            Self::Completed | Self::Skipped | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Statuses from which an actor may complete the task
    pub fn is_completable(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress | Self::Escalated)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::Assigned => "Assigned",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Escalated => "Escalated",
            Self::Skipped => "Skipped",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AssigneeSource;

    fn make_task() -> WorkflowTask {
        let step = StepSpec::new(0, "Review evidence", StepKind::Review)
            .with_role(RoleCode::new("Reviewer"))
            .with_sla_hours(24);
        WorkflowTask::from_step(
            WorkflowInstanceId::new("inst-1"),
            TenantId::new("tenant-1"),
            &step,
            Utc::now(),
        )
    }

    fn single_assignee(actor: &str) -> Vec<AssigneeResolution> {
        vec![AssigneeResolution::new(
            AssigneeRef::User(ActorId::new(actor)),
            AssigneeSource::TeamRole,
        )
        .primary()]
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = make_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.is_open());
        assert_eq!(task.escalation_level, 0);
        assert!(!task.is_overdue(Utc::now()));
    }

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Assigned));
        assert!(Pending.can_transition_to(Skipped));
        assert!(!Pending.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Assigned.can_transition_to(InProgress));
        assert!(Assigned.can_transition_to(Completed));
        assert!(!Assigned.can_transition_to(Skipped));
        assert!(Escalated.can_transition_to(Completed));
        assert!(Escalated.can_transition_to(Escalated));
        for closed in [Completed, Skipped, Cancelled] {
            assert!(closed.is_closed());
            assert!(closed.valid_transitions().is_empty());
        }
    }

    #[test]
    fn test_assign_moves_pending_to_assigned() {
        let mut task = make_task();
        task.assign(single_assignee("actor-1")).unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert!(task.has_assignee_user(&ActorId::new("actor-1")));
        assert!(task.primary_assignee().is_some());
    }

    #[test]
    fn test_reassign_keeps_status() {
        let mut task = make_task();
        task.assign(single_assignee("actor-1")).unwrap();
        task.transition_to(TaskStatus::InProgress).unwrap();
        task.assign(single_assignee("actor-2")).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.has_assignee_user(&ActorId::new("actor-2")));
    }

    #[test]
    fn test_complete_stamps_fields() {
        let mut task = make_task();
        task.assign(single_assignee("actor-1")).unwrap();
        task.complete(ActorId::new("actor-1"), HashMap::new(), Some("done".into()))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert_eq!(task.completed_by, Some(ActorId::new("actor-1")));
    }

    #[test]
    fn test_completed_task_rejects_assignment() {
        let mut task = make_task();
        task.assign(single_assignee("actor-1")).unwrap();
        task.complete(ActorId::new("actor-1"), HashMap::new(), None)
            .unwrap();
        assert!(matches!(
            task.assign(single_assignee("actor-2")),
            Err(WorkflowError::InvalidTaskState { .. })
        ));
    }

    #[test]
    fn test_escalation_is_monotonic() {
        let mut task = make_task();
        task.assign(single_assignee("actor-1")).unwrap();

        task.escalate_to(2).unwrap();
        assert_eq!(task.status, TaskStatus::Escalated);
        assert_eq!(task.escalation_level, 2);

        // Same or lower level is refused
        assert!(task.escalate_to(2).is_err());
        assert!(task.escalate_to(1).is_err());
        assert_eq!(task.escalation_level, 2);

        // Higher level is fine
        task.escalate_to(3).unwrap();
        assert_eq!(task.escalation_level, 3);
    }

    #[test]
    fn test_escalated_task_is_completable() {
        let mut task = make_task();
        task.assign(single_assignee("actor-1")).unwrap();
        task.escalate_to(1).unwrap();
        assert!(task.status.is_completable());
        task.complete(ActorId::new("manager-1"), HashMap::new(), None)
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_hours_overdue_is_floor() {
        let mut task = make_task();
        let due = task.due_by;
        assert_eq!(task.hours_overdue(due + Duration::minutes(90)), 1);
        assert_eq!(task.hours_overdue(due + Duration::hours(48)), 48);
        assert!(task.hours_overdue(due - Duration::hours(2)) < 0);
        task.status = TaskStatus::Assigned;
        assert!(task.is_overdue(due + Duration::minutes(1)));
    }
}
