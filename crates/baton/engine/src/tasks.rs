//! Task operations: start, complete, skip, reassign
//!
//! Task-level actions check the caller against the task's resolved
//! assignee snapshot first. A direct user assignment matches on actor
//! id; a team assignment matches any active member of the team at call
//! time; `CompleteAnyTask` (or admin) bypasses the check. Writes go
//! through the store's compare-and-set replace so two actors racing on
//! the same task produce exactly one completion.

use std::collections::HashMap;

use baton_types::{
    AssigneeRef, AssigneeResolution, AssigneeSource, AuditEntry, AuditEvent, AuditSubject,
    AuthorizationContext, Capability, TaskStatus, WorkflowError, WorkflowResult, WorkflowTask,
    WorkflowTaskId,
};
use tracing::info;

use crate::engine::WorkflowEngine;

impl WorkflowEngine {
    // ── Task lifecycle ───────────────────────────────────────────────

    /// Mark an assigned task as being worked on.
    pub fn start_task(
        &self,
        ctx: &AuthorizationContext,
        task_id: &WorkflowTaskId,
    ) -> WorkflowResult<WorkflowTask> {
        let task = self.task_scoped(ctx, task_id)?;
        self.require_assignee(ctx, &task)?;

        let previous = task.status;
        let mut updated = task;
        updated.transition_to(TaskStatus::InProgress)?;
        self.replace_task_checked(previous, updated.clone())?;
        self.audit.record(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                AuditSubject::Task(updated.id.clone()),
                AuditEvent::TaskStarted,
                ctx.actor_id.clone(),
            )
            .with_statuses(previous, TaskStatus::InProgress),
        );
        Ok(updated)
    }

    /// Complete a task and advance its instance.
    pub fn complete_task(
        &self,
        ctx: &AuthorizationContext,
        task_id: &WorkflowTaskId,
        output_data: HashMap<String, String>,
        notes: Option<String>,
    ) -> WorkflowResult<WorkflowTask> {
        let task = self.task_scoped(ctx, task_id)?;
        if task.status == TaskStatus::Completed {
            return Err(WorkflowError::AlreadyCompleted(task.id.clone()));
        }
        if !task.status.is_completable() {
            return Err(WorkflowError::InvalidTaskState {
                task: task.id.clone(),
                status: task.status,
            });
        }
        self.require_assignee(ctx, &task)?;

        let previous = task.status;
        let mut updated = task;
        updated.complete(ctx.actor_id.clone(), output_data, notes)?;
        self.replace_task_checked(previous, updated.clone())?;
        self.audit.record(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                AuditSubject::Task(updated.id.clone()),
                AuditEvent::TaskCompleted,
                ctx.actor_id.clone(),
            )
            .with_statuses(previous, TaskStatus::Completed)
            .with_description(format!("Step {} '{}' completed", updated.step_index, updated.name)),
        );
        info!(
            task_id = %updated.id,
            instance_id = %updated.instance_id,
            actor = %ctx.actor_id,
            "Task completed"
        );
        self.close_escalations_for(&updated.id, "task completed")?;
        self.advance(ctx, &updated.instance_id)?;
        self.store.get_task(task_id)
    }

    /// Skip an optional task that was never assigned.
    ///
    /// Only Pending allows the Skipped exit; an optional task someone
    /// already holds is completed or cancelled, not skipped.
    pub fn skip_task(
        &self,
        ctx: &AuthorizationContext,
        task_id: &WorkflowTaskId,
        reason: impl Into<String>,
    ) -> WorkflowResult<WorkflowTask> {
        let reason = reason.into();
        let task = self.task_scoped(ctx, task_id)?;
        if task.mandatory {
            return Err(WorkflowError::ValidationError(format!(
                "Mandatory task {} cannot be skipped",
                task.id
            )));
        }
        self.require_assignee(ctx, &task)?;

        let previous = task.status;
        let mut updated = task;
        updated.transition_to(TaskStatus::Skipped)?;
        updated.notes = Some(reason.clone());
        self.replace_task_checked(previous, updated.clone())?;
        self.audit.record(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                AuditSubject::Task(updated.id.clone()),
                AuditEvent::TaskSkipped,
                ctx.actor_id.clone(),
            )
            .with_statuses(previous, TaskStatus::Skipped)
            .with_description(reason),
        );
        self.advance(ctx, &updated.instance_id)?;
        self.store.get_task(task_id)
    }

    /// Replace a task's assignees with one hand-picked target.
    ///
    /// An operator override outside the resolution chain, so it takes
    /// `CompleteAnyTask`. The task keeps its status; a Pending task
    /// becomes Assigned.
    pub fn reassign_task(
        &self,
        ctx: &AuthorizationContext,
        task_id: &WorkflowTaskId,
        new_assignee: AssigneeRef,
        reason: impl Into<String>,
    ) -> WorkflowResult<WorkflowTask> {
        ctx.require(Capability::CompleteAnyTask, "reassign task")?;
        let reason = reason.into();
        let task = self.task_scoped(ctx, task_id)?;
        if !task.is_open() {
            return Err(WorkflowError::InvalidTaskState {
                task: task.id.clone(),
                status: task.status,
            });
        }

        let mut resolution =
            AssigneeResolution::new(new_assignee.clone(), AssigneeSource::Manual).primary();
        if let Some(role) = task.role_code.clone() {
            resolution = resolution.with_role(role);
        }
        let previous = task.status;
        let mut updated = task;
        updated.assign(vec![resolution])?;
        self.replace_task_checked(previous, updated.clone())?;
        self.audit.record(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                AuditSubject::Task(updated.id.clone()),
                AuditEvent::TaskReassigned,
                ctx.actor_id.clone(),
            )
            .with_statuses(previous, updated.status)
            .with_description(format!("Reassigned to {new_assignee}: {reason}")),
        );
        info!(
            task_id = %updated.id,
            assignee = %new_assignee,
            "Task reassigned"
        );
        self.notify_assigned(&updated);
        Ok(updated)
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// The caller must hold the task: capability bypass, direct user
    /// assignment, or active membership in an assigned team.
    pub(crate) fn require_assignee(
        &self,
        ctx: &AuthorizationContext,
        task: &WorkflowTask,
    ) -> WorkflowResult<()> {
        if ctx.can(Capability::CompleteAnyTask) {
            return Ok(());
        }
        if task.has_assignee_user(&ctx.actor_id) {
            return Ok(());
        }
        for team in task.assigned_teams() {
            if self
                .directory
                .is_active_member(&ctx.tenant_id, team, &ctx.actor_id)?
            {
                return Ok(());
            }
        }
        Err(WorkflowError::NotAssigned {
            task: task.id.clone(),
            actor: ctx.actor_id.clone(),
        })
    }

    /// Compare-and-set write with lost-race conflicts mapped to the
    /// caller's vocabulary: a winner who completed the task first means
    /// AlreadyCompleted, anything else InvalidTaskState.
    pub(crate) fn replace_task_checked(
        &self,
        expected: TaskStatus,
        updated: WorkflowTask,
    ) -> WorkflowResult<()> {
        match self.store.replace_task(expected, updated) {
            Ok(()) => Ok(()),
            Err(WorkflowError::TaskStatusConflict { task, actual, .. }) => {
                if actual == TaskStatus::Completed {
                    Err(WorkflowError::AlreadyCompleted(task))
                } else {
                    Err(WorkflowError::InvalidTaskState {
                        task,
                        status: actual,
                    })
                }
            }
            Err(err) => Err(err),
        }
    }
}
