//! Workflow engine: instance lifecycle and approval gates
//!
//! The engine owns every status transition. Callers hand it an
//! [`AuthorizationContext`] and a target; it validates the transition
//! against the state tables in `baton-types`, writes through the store's
//! compare-and-set replaces, records the audit entry, and only then
//! reports success. Routing goes through the [`AssigneeResolver`] and
//! outbound messages through the [`Notifier`](crate::Notifier); both are
//! injected so deployments can swap them.
//!
//! After every closing task event the engine re-reads the instance's
//! tasks and advances: all mandatory work closed means completion (by
//! way of Approved when a gate is waiting), and an approval step at the
//! front of the remaining work parks the instance in PendingApproval.

use std::collections::HashMap;
use std::sync::Arc;

use baton_types::{
    ActorId, AssigneeRef, AssigneeResolution, AuditEntry, AuditEvent, AuditSubject,
    AuthorizationContext, InstanceStatus, NotificationKind, NotificationRequest, Priority,
    RejectionBehavior, ScopeRef, StepKind, TaskStatus, TeamId, TenantId, WorkflowDefinitionId,
    WorkflowError, WorkflowInstance, WorkflowInstanceId, WorkflowResult, WorkflowStatistics,
    WorkflowTask, WorkflowTaskId,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::AuditRecorder;
use crate::directory::Directory;
use crate::monitor::EscalationMonitor;
use crate::notify::Notifier;
use crate::registry::DefinitionReader;
use crate::resolver::{AssigneeResolver, ResolutionRequest};
use crate::store::{AuditQuery, AuditStore, WorkflowStore};

/// Fallback SLA window when a task's definition step cannot be found.
const DEFAULT_SLA_HOURS: i64 = 24;

/// Request to create a workflow instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateInstance {
    pub definition_id: WorkflowDefinitionId,
    pub priority: Priority,
    /// Governance record the workflow is about
    pub subject: Option<ScopeRef>,
    pub owner_user: Option<ActorId>,
    pub owner_team: Option<TeamId>,
}

impl CreateInstance {
    pub fn new(definition_id: WorkflowDefinitionId) -> Self {
        Self {
            definition_id,
            priority: Priority::default(),
            subject: None,
            owner_user: None,
            owner_team: None,
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
}

/// The execution engine. Cheap to share behind an `Arc`; every method
/// takes `&self` and serializes conflicting writers through the store's
/// compare-and-set replaces.
pub struct WorkflowEngine {
    pub(crate) store: Arc<dyn WorkflowStore>,
    pub(crate) definitions: Arc<dyn DefinitionReader>,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) resolver: AssigneeResolver,
    pub(crate) audit: Arc<AuditRecorder>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        audit_store: Arc<dyn AuditStore>,
        definitions: Arc<dyn DefinitionReader>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            resolver: AssigneeResolver::new(directory.clone()),
            audit: Arc::new(AuditRecorder::new(audit_store)),
            store,
            definitions,
            directory,
            notifier,
        }
    }

    /// An escalation monitor sharing this engine's collaborators.
    pub fn monitor(&self) -> EscalationMonitor {
        EscalationMonitor::new(
            self.store.clone(),
            self.definitions.clone(),
            self.directory.clone(),
            self.notifier.clone(),
            self.audit.clone(),
        )
    }

    /// The audit recorder, for queries and dead-letter draining.
    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    // ── Instance Lifecycle ───────────────────────────────────────────

    /// Create a Draft instance from an active definition.
    pub fn create_instance(
        &self,
        ctx: &AuthorizationContext,
        request: CreateInstance,
    ) -> WorkflowResult<WorkflowInstance> {
        let definition = self.definitions.get(&request.definition_id)?;
        if definition.tenant_id != ctx.tenant_id {
            return Err(WorkflowError::DefinitionNotFound(request.definition_id));
        }
        if !definition.active {
            return Err(WorkflowError::DefinitionInactive(definition.id.clone()));
        }
        definition.validate()?;
        if definition.rejection == RejectionBehavior::Rework {
            for gate in definition.steps.iter().filter(|step| step.kind.is_gate()) {
                if !definition.has_rework_surface(gate.index) {
                    warn!(
                        definition_id = %definition.id,
                        step = gate.index,
                        "Rework rejection configured but the approval step has nothing to reopen"
                    );
                }
            }
        }

        let mut instance = WorkflowInstance::new(
            definition.id.clone(),
            definition.version,
            ctx.tenant_id.clone(),
            ctx.actor_id.clone(),
        )
        .with_priority(request.priority);
        if let Some(subject) = request.subject {
            instance = instance.with_subject(subject);
        }
        if let Some(owner) = request.owner_user {
            instance = instance.with_owner_user(owner);
        }
        if let Some(team) = request.owner_team {
            instance = instance.with_owner_team(team);
        }

        self.store.insert_instance(instance.clone())?;
        self.audit.record(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                AuditSubject::Instance(instance.id.clone()),
                AuditEvent::InstanceCreated,
                ctx.actor_id.clone(),
            )
            .with_description(format!(
                "Created from '{}' v{}",
                definition.name, definition.version
            )),
        );
        info!(
            instance_id = %instance.id,
            definition_id = %definition.id,
            "Workflow instance created"
        );
        Ok(instance)
    }

    /// Start a Draft instance: expand its steps into tasks, resolve
    /// assignees, and evaluate the first advance.
    ///
    /// A step nobody can be found for leaves its task Pending rather
    /// than failing the start; the gap is logged and surfaces again on
    /// the escalation scan once the task is overdue.
    pub fn start(
        &self,
        ctx: &AuthorizationContext,
        instance_id: &WorkflowInstanceId,
        variables: HashMap<String, String>,
    ) -> WorkflowResult<WorkflowInstance> {
        let mut instance = self.instance_scoped(ctx, instance_id)?;
        if instance.status != InstanceStatus::Draft {
            return Err(WorkflowError::AlreadyStarted(instance.id.clone()));
        }
        let definition = self.definitions.get(&instance.definition_id)?;

        instance.initiated_by = Some(ctx.actor_id.clone());
        instance.variables = variables;
        instance.transition_to(InstanceStatus::Active)?;
        self.store
            .replace_instance(InstanceStatus::Draft, instance.clone())?;
        self.audit.record(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                AuditSubject::Instance(instance.id.clone()),
                AuditEvent::InstanceStarted,
                ctx.actor_id.clone(),
            )
            .with_statuses(InstanceStatus::Draft, InstanceStatus::Active)
            .with_description(format!(
                "Started '{}' v{} with {} steps",
                definition.name,
                definition.version,
                definition.step_count()
            )),
        );
        info!(
            instance_id = %instance.id,
            definition = %definition.name,
            steps = definition.step_count(),
            "Workflow instance started"
        );

        let now = Utc::now();
        let mut steps: Vec<_> = definition.steps.iter().collect();
        steps.sort_by_key(|step| step.index);
        for step in steps {
            let mut task = WorkflowTask::from_step(
                instance.id.clone(),
                instance.tenant_id.clone(),
                step,
                now,
            );
            let request = ResolutionRequest::for_instance(&instance, step.role_code.clone());
            match self.resolver.resolve(&request) {
                Ok(assignees) => task.assign(assignees)?,
                Err(WorkflowError::NoAssigneeFound { .. }) => {
                    warn!(
                        instance_id = %instance.id,
                        step = step.index,
                        role = ?step.role_code,
                        "No assignee resolved; task left pending"
                    );
                }
                Err(err) => return Err(err),
            }
            self.store.insert_task(task.clone())?;
            self.audit.record(
                AuditEntry::new(
                    ctx.tenant_id.clone(),
                    AuditSubject::Task(task.id.clone()),
                    AuditEvent::TaskCreated,
                    ctx.actor_id.clone(),
                )
                .with_description(format!(
                    "Step {} '{}' created as {}",
                    step.index, task.name, task.status
                )),
            );

            if step.kind == StepKind::Notification && task.status.is_completable() {
                self.dispatch_notification_step(ctx, &task)?;
            } else if task.status == TaskStatus::Assigned {
                self.notify_assigned(&task);
            }
        }

        self.advance(ctx, &instance.id)?;
        self.store.get_instance(&instance.id)
    }

    /// Grant the pending approval.
    ///
    /// Completes the open gate task, stamps the decision reason, and
    /// advances: completion when nothing mandatory remains, Active when
    /// work remains, PendingApproval when the next step is another gate.
    pub fn approve(
        &self,
        ctx: &AuthorizationContext,
        instance_id: &WorkflowInstanceId,
        reason: impl Into<String>,
    ) -> WorkflowResult<WorkflowInstance> {
        let reason = reason.into();
        let instance = self.instance_scoped(ctx, instance_id)?;
        if instance.status != InstanceStatus::PendingApproval {
            return Err(WorkflowError::InvalidTransition {
                from: instance.status,
                to: InstanceStatus::Approved,
            });
        }
        let tasks = self.store.tasks_for_instance(instance_id)?;
        let gate = tasks
            .iter()
            .filter(|task| task.is_open() && task.kind.is_gate())
            .min_by_key(|task| task.step_index)
            .ok_or_else(|| {
                WorkflowError::ValidationError(
                    "Instance is pending approval without an open approval task".to_string(),
                )
            })?;
        self.require_assignee(ctx, gate)?;

        let previous = gate.status;
        let mut gate_task = gate.clone();
        gate_task.complete(ctx.actor_id.clone(), HashMap::new(), Some(reason.clone()))?;
        self.replace_task_checked(previous, gate_task.clone())?;
        self.audit.record(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                AuditSubject::Task(gate_task.id.clone()),
                AuditEvent::TaskCompleted,
                ctx.actor_id.clone(),
            )
            .with_statuses(previous, TaskStatus::Completed)
            .with_description(format!("Approval granted: {reason}")),
        );
        info!(
            instance_id = %instance.id,
            task_id = %gate_task.id,
            "Approval granted"
        );
        self.close_escalations_for(&gate_task.id, "approval granted")?;

        let mut updated = self.store.get_instance(instance_id)?;
        updated.decision_reason = Some(reason);
        self.store
            .replace_instance(InstanceStatus::PendingApproval, updated)?;

        self.advance(ctx, instance_id)?;
        let after = self.store.get_instance(instance_id)?;
        if after.status == InstanceStatus::PendingApproval {
            // Consecutive gate: its approvers have not heard yet.
            let tasks = self.store.tasks_for_instance(instance_id)?;
            if let Some(next_gate) = tasks
                .iter()
                .filter(|task| task.is_open() && task.kind.is_gate())
                .min_by_key(|task| task.step_index)
            {
                self.notify_approval_requested(next_gate);
            }
        }
        Ok(after)
    }

    /// Reject the pending approval.
    ///
    /// `Terminal` definitions end the instance as Rejected and cancel
    /// everything still open. `Rework` definitions send the instance
    /// back to Active, refresh the gate's deadline, and reopen the
    /// nearest completed mandatory step before the gate so the rework
    /// has a surface.
    pub fn reject(
        &self,
        ctx: &AuthorizationContext,
        instance_id: &WorkflowInstanceId,
        reason: impl Into<String>,
    ) -> WorkflowResult<WorkflowInstance> {
        let reason = reason.into();
        let instance = self.instance_scoped(ctx, instance_id)?;
        if instance.status != InstanceStatus::PendingApproval {
            return Err(WorkflowError::InvalidTransition {
                from: instance.status,
                to: InstanceStatus::Rejected,
            });
        }
        let tasks = self.store.tasks_for_instance(instance_id)?;
        let gate = tasks
            .iter()
            .filter(|task| task.is_open() && task.kind.is_gate())
            .min_by_key(|task| task.step_index)
            .ok_or_else(|| {
                WorkflowError::ValidationError(
                    "Instance is pending approval without an open approval task".to_string(),
                )
            })?;
        self.require_assignee(ctx, gate)?;
        let definition = self.definitions.get(&instance.definition_id)?;

        match definition.rejection {
            RejectionBehavior::Terminal => {
                let mut updated = instance.clone();
                updated.decision_reason = Some(reason.clone());
                updated.transition_to(InstanceStatus::Rejected)?;
                self.store
                    .replace_instance(InstanceStatus::PendingApproval, updated)?;
                self.audit.record(
                    AuditEntry::new(
                        ctx.tenant_id.clone(),
                        AuditSubject::Instance(instance.id.clone()),
                        AuditEvent::ApprovalRejected,
                        ctx.actor_id.clone(),
                    )
                    .with_statuses(InstanceStatus::PendingApproval, InstanceStatus::Rejected)
                    .with_description(format!("Rejected: {reason}")),
                );
                info!(instance_id = %instance.id, "Approval rejected; instance closed");

                for task in tasks.into_iter().filter(|task| task.is_open()) {
                    self.cancel_task_internal(ctx, task, "Instance rejected")?;
                }
                let recipient = instance
                    .initiated_by
                    .clone()
                    .unwrap_or_else(|| instance.created_by.clone());
                self.notifier.notify(
                    NotificationRequest::new(
                        instance.tenant_id.clone(),
                        NotificationKind::InstanceRejected,
                        format!("Workflow rejected: {}", instance.id.short()),
                    )
                    .with_body(reason)
                    .with_recipient(AssigneeRef::User(recipient))
                    .for_instance(instance.id.clone()),
                );
            }
            RejectionBehavior::Rework => {
                let mut updated = instance.clone();
                updated.decision_reason = Some(reason.clone());
                updated.transition_to(InstanceStatus::Active)?;
                self.store
                    .replace_instance(InstanceStatus::PendingApproval, updated)?;
                self.audit.record(
                    AuditEntry::new(
                        ctx.tenant_id.clone(),
                        AuditSubject::Instance(instance.id.clone()),
                        AuditEvent::ReturnedForRework,
                        ctx.actor_id.clone(),
                    )
                    .with_statuses(InstanceStatus::PendingApproval, InstanceStatus::Active)
                    .with_description(format!("Returned for rework: {reason}")),
                );
                info!(instance_id = %instance.id, "Approval rejected; returned for rework");

                let now = Utc::now();
                // The gate gets a fresh window for the resubmission.
                let gate_sla = definition
                    .step(gate.step_index)
                    .map(|step| step.sla_hours)
                    .unwrap_or(DEFAULT_SLA_HOURS);
                let mut refreshed = gate.clone();
                refreshed.due_by = now + Duration::hours(gate_sla);
                self.store.replace_task(gate.status, refreshed)?;

                // Reopen the nearest completed mandatory step before the
                // gate by issuing a successor task; the completed row
                // stays as history.
                let surface = tasks
                    .iter()
                    .filter(|task| {
                        task.step_index < gate.step_index
                            && task.mandatory
                            && !task.kind.is_gate()
                            && task.status == TaskStatus::Completed
                    })
                    .max_by_key(|task| task.step_index);
                match surface {
                    Some(surface) => {
                        let sla = definition
                            .step(surface.step_index)
                            .map(|step| step.sla_hours)
                            .unwrap_or(DEFAULT_SLA_HOURS);
                        let mut reopened = surface.clone();
                        reopened.id = WorkflowTaskId::generate();
                        reopened.status = TaskStatus::Pending;
                        reopened.escalation_level = 0;
                        reopened.completed_at = None;
                        reopened.completed_by = None;
                        reopened.output_data = HashMap::new();
                        reopened.notes = None;
                        reopened.created_at = now;
                        reopened.due_by = now + Duration::hours(sla);
                        reopened.assign(surface.assignees.clone())?;
                        self.store.insert_task(reopened.clone())?;
                        self.audit.record(
                            AuditEntry::new(
                                ctx.tenant_id.clone(),
                                AuditSubject::Task(reopened.id.clone()),
                                AuditEvent::TaskReopened,
                                ctx.actor_id.clone(),
                            )
                            .with_statuses(TaskStatus::Completed, reopened.status)
                            .with_description(format!(
                                "Step {} '{}' reopened for rework",
                                reopened.step_index, reopened.name
                            )),
                        );
                        self.notify_assigned(&reopened);
                    }
                    None => {
                        warn!(
                            instance_id = %instance.id,
                            "Rework rejection with no completed step to reopen"
                        );
                    }
                }
            }
        }
        self.store.get_instance(instance_id)
    }

    /// Explicitly complete an Active or Approved instance.
    ///
    /// Normally the advance evaluation completes instances on its own;
    /// this is the remediation path when a crash left every mandatory
    /// task closed without the final transition.
    pub fn complete(
        &self,
        ctx: &AuthorizationContext,
        instance_id: &WorkflowInstanceId,
    ) -> WorkflowResult<WorkflowInstance> {
        let instance = self.instance_scoped(ctx, instance_id)?;
        if !matches!(
            instance.status,
            InstanceStatus::Active | InstanceStatus::Approved
        ) {
            return Err(WorkflowError::InvalidTransition {
                from: instance.status,
                to: InstanceStatus::Completed,
            });
        }
        let tasks = self.store.tasks_for_instance(instance_id)?;
        let blocking: Vec<WorkflowTaskId> = tasks
            .iter()
            .filter(|task| {
                task.mandatory
                    && !matches!(task.status, TaskStatus::Completed | TaskStatus::Skipped)
            })
            .map(|task| task.id.clone())
            .collect();
        if !blocking.is_empty() {
            return Err(WorkflowError::IncompleteTasks(blocking));
        }
        self.complete_internal(ctx, instance, &tasks)?;
        self.store.get_instance(instance_id)
    }

    /// Cancel a non-terminal instance and everything still open under
    /// it. Cancelling an already-cancelled instance is a no-op.
    pub fn cancel(
        &self,
        ctx: &AuthorizationContext,
        instance_id: &WorkflowInstanceId,
        reason: impl Into<String>,
    ) -> WorkflowResult<WorkflowInstance> {
        let reason = reason.into();
        let instance = self.instance_scoped(ctx, instance_id)?;
        if instance.status == InstanceStatus::Cancelled {
            return Ok(instance);
        }
        let previous = instance.status;
        let mut updated = instance;
        updated.decision_reason = Some(reason.clone());
        updated.transition_to(InstanceStatus::Cancelled)?;
        self.store.replace_instance(previous, updated.clone())?;
        self.audit.record(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                AuditSubject::Instance(updated.id.clone()),
                AuditEvent::InstanceCancelled,
                ctx.actor_id.clone(),
            )
            .with_statuses(previous, InstanceStatus::Cancelled)
            .with_description(format!("Cancelled: {reason}")),
        );
        info!(instance_id = %updated.id, "Workflow instance cancelled");

        for task in self
            .store
            .tasks_for_instance(instance_id)?
            .into_iter()
            .filter(|task| task.is_open())
        {
            self.cancel_task_internal(ctx, task, "Instance cancelled")?;
        }
        let recipient = updated
            .initiated_by
            .clone()
            .unwrap_or_else(|| updated.created_by.clone());
        self.notifier.notify(
            NotificationRequest::new(
                updated.tenant_id.clone(),
                NotificationKind::InstanceCancelled,
                format!("Workflow cancelled: {}", updated.id.short()),
            )
            .with_body(reason)
            .with_recipient(AssigneeRef::User(recipient))
            .for_instance(updated.id.clone()),
        );
        self.store.get_instance(instance_id)
    }

    // ── Query ────────────────────────────────────────────────────────

    pub fn get_instance(
        &self,
        ctx: &AuthorizationContext,
        instance_id: &WorkflowInstanceId,
    ) -> WorkflowResult<WorkflowInstance> {
        self.instance_scoped(ctx, instance_id)
    }

    pub fn get_task(
        &self,
        ctx: &AuthorizationContext,
        task_id: &WorkflowTaskId,
    ) -> WorkflowResult<WorkflowTask> {
        self.task_scoped(ctx, task_id)
    }

    pub fn tasks_for_instance(
        &self,
        ctx: &AuthorizationContext,
        instance_id: &WorkflowInstanceId,
    ) -> WorkflowResult<Vec<WorkflowTask>> {
        self.instance_scoped(ctx, instance_id)?;
        self.store.tasks_for_instance(instance_id)
    }

    pub fn audit_entries(&self, query: &AuditQuery) -> WorkflowResult<Vec<AuditEntry>> {
        self.audit.query(query)
    }

    /// Run the resolution chain outside any task, for previewing who a
    /// step would route to.
    pub fn resolve_assignees(
        &self,
        request: &ResolutionRequest,
    ) -> WorkflowResult<Vec<AssigneeResolution>> {
        self.resolver.resolve(request)
    }

    /// Aggregate counts for a tenant's dashboard.
    pub fn statistics(&self, tenant: &TenantId) -> WorkflowResult<WorkflowStatistics> {
        let instances = self.store.instances_for_tenant(tenant)?;
        let mut stats = WorkflowStatistics::default();
        let mut completion_hours = Vec::new();
        for instance in &instances {
            stats.total_instances += 1;
            match instance.status {
                InstanceStatus::Active => stats.active_instances += 1,
                InstanceStatus::PendingApproval => stats.pending_approval_instances += 1,
                InstanceStatus::Completed => {
                    stats.completed_instances += 1;
                    if let Some(hours) = instance.completion_hours() {
                        completion_hours.push(hours);
                    }
                }
                InstanceStatus::Rejected => stats.rejected_instances += 1,
                InstanceStatus::Cancelled => stats.cancelled_instances += 1,
                InstanceStatus::Draft | InstanceStatus::Approved => {}
            }
        }
        if !completion_hours.is_empty() {
            stats.avg_completion_hours =
                Some(completion_hours.iter().sum::<f64>() / completion_hours.len() as f64);
        }
        for task in self.store.open_tasks_for_tenant(tenant)? {
            if task.escalation_level > 0 {
                *stats
                    .escalations_by_level
                    .entry(task.escalation_level)
                    .or_insert(0) += 1;
            }
        }
        Ok(stats)
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Re-read the instance's tasks and move the instance forward.
    ///
    /// Runs after start and after every task-closing event except
    /// rejection, which deliberately leaves the instance where the
    /// rework put it.
    pub(crate) fn advance(
        &self,
        ctx: &AuthorizationContext,
        instance_id: &WorkflowInstanceId,
    ) -> WorkflowResult<()> {
        let instance = self.store.get_instance(instance_id)?;
        if instance.status == InstanceStatus::Draft || instance.is_terminal() {
            return Ok(());
        }
        let tasks = self.store.tasks_for_instance(instance_id)?;
        let next_open = tasks
            .iter()
            .filter(|task| task.mandatory && task.is_open())
            .min_by_key(|task| task.step_index);

        let Some(next) = next_open else {
            return self.complete_internal(ctx, instance, &tasks);
        };

        if next.kind.is_gate() {
            let predecessors_closed = tasks
                .iter()
                .filter(|task| task.step_index < next.step_index)
                .all(|task| !task.is_open());
            if predecessors_closed && instance.status == InstanceStatus::Active {
                let mut updated = instance.clone();
                updated.transition_to(InstanceStatus::PendingApproval)?;
                self.store
                    .replace_instance(InstanceStatus::Active, updated)?;
                self.audit.record(
                    AuditEntry::new(
                        ctx.tenant_id.clone(),
                        AuditSubject::Instance(instance.id.clone()),
                        AuditEvent::SubmittedForApproval,
                        ctx.actor_id.clone(),
                    )
                    .with_statuses(InstanceStatus::Active, InstanceStatus::PendingApproval)
                    .with_description(format!(
                        "Awaiting approval at step {} '{}'",
                        next.step_index, next.name
                    )),
                );
                info!(
                    instance_id = %instance.id,
                    step = next.step_index,
                    "Instance submitted for approval"
                );
                self.notify_approval_requested(next);
            }
            return Ok(());
        }

        // The gate released but mandatory work remains.
        if instance.status == InstanceStatus::PendingApproval {
            let mut updated = instance.clone();
            updated.transition_to(InstanceStatus::Active)?;
            self.store
                .replace_instance(InstanceStatus::PendingApproval, updated)?;
            self.audit.record(
                AuditEntry::new(
                    ctx.tenant_id.clone(),
                    AuditSubject::Instance(instance.id.clone()),
                    AuditEvent::ApprovalGranted,
                    ctx.actor_id.clone(),
                )
                .with_statuses(InstanceStatus::PendingApproval, InstanceStatus::Active)
                .with_description("Approval granted; remaining work resumes"),
            );
            info!(instance_id = %instance.id, "Approval granted; instance active again");
        }
        Ok(())
    }

    /// Complete the instance, cancelling whatever optional work is
    /// still open. A waiting gate is honored by passing through
    /// Approved first.
    fn complete_internal(
        &self,
        ctx: &AuthorizationContext,
        instance: WorkflowInstance,
        tasks: &[WorkflowTask],
    ) -> WorkflowResult<()> {
        for task in tasks.iter().filter(|task| task.is_open()) {
            self.cancel_task_internal(ctx, task.clone(), "Cancelled at instance completion")?;
        }
        let mut instance = instance;
        if instance.status == InstanceStatus::PendingApproval {
            instance.transition_to(InstanceStatus::Approved)?;
            self.store
                .replace_instance(InstanceStatus::PendingApproval, instance.clone())?;
            self.audit.record(
                AuditEntry::new(
                    ctx.tenant_id.clone(),
                    AuditSubject::Instance(instance.id.clone()),
                    AuditEvent::ApprovalGranted,
                    ctx.actor_id.clone(),
                )
                .with_statuses(InstanceStatus::PendingApproval, InstanceStatus::Approved)
                .with_description("All approvals granted"),
            );
            info!(instance_id = %instance.id, "Instance approved");
        }
        let previous = instance.status;
        instance.transition_to(InstanceStatus::Completed)?;
        self.store.replace_instance(previous, instance.clone())?;
        self.audit.record(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                AuditSubject::Instance(instance.id.clone()),
                AuditEvent::InstanceCompleted,
                ctx.actor_id.clone(),
            )
            .with_statuses(previous, InstanceStatus::Completed)
            .with_description("All mandatory tasks closed"),
        );
        info!(instance_id = %instance.id, "Workflow instance completed");

        let recipient = instance
            .initiated_by
            .clone()
            .unwrap_or_else(|| instance.created_by.clone());
        self.notifier.notify(
            NotificationRequest::new(
                instance.tenant_id.clone(),
                NotificationKind::InstanceCompleted,
                format!("Workflow completed: {}", instance.id.short()),
            )
            .with_recipient(AssigneeRef::User(recipient))
            .for_instance(instance.id.clone()),
        );
        Ok(())
    }

    /// Cancel one task and resolve its open escalations. Used by the
    /// terminal cascades, never exposed as a caller operation.
    pub(crate) fn cancel_task_internal(
        &self,
        ctx: &AuthorizationContext,
        task: WorkflowTask,
        note: &str,
    ) -> WorkflowResult<()> {
        let previous = task.status;
        let mut updated = task;
        updated.transition_to(TaskStatus::Cancelled)?;
        updated.notes = Some(note.to_string());
        self.store.replace_task(previous, updated.clone())?;
        self.audit.record(
            AuditEntry::new(
                updated.tenant_id.clone(),
                AuditSubject::Task(updated.id.clone()),
                AuditEvent::TaskCancelled,
                ctx.actor_id.clone(),
            )
            .with_statuses(previous, TaskStatus::Cancelled)
            .with_description(note),
        );
        self.close_escalations_for(&updated.id, "task cancelled")?;
        Ok(())
    }

    /// Resolve every open escalation record for a task.
    pub(crate) fn close_escalations_for(
        &self,
        task_id: &WorkflowTaskId,
        note: &str,
    ) -> WorkflowResult<()> {
        for mut record in self.store.open_escalations_for_task(task_id)? {
            record.resolve(note);
            self.store.update_escalation(record)?;
        }
        Ok(())
    }

    pub(crate) fn notify_assigned(&self, task: &WorkflowTask) {
        let recipients: Vec<AssigneeRef> = task
            .assignees
            .iter()
            .map(|assignee| assignee.assignee.clone())
            .collect();
        if recipients.is_empty() {
            return;
        }
        self.notifier.notify(
            NotificationRequest::new(
                task.tenant_id.clone(),
                NotificationKind::TaskAssigned,
                format!("Task assigned: {}", task.name),
            )
            .with_body(format!(
                "Due by {}",
                task.due_by.format("%Y-%m-%d %H:%M UTC")
            ))
            .with_recipients(recipients)
            .for_instance(task.instance_id.clone())
            .for_task(task.id.clone()),
        );
    }

    pub(crate) fn notify_approval_requested(&self, gate: &WorkflowTask) {
        let recipients: Vec<AssigneeRef> = gate
            .assignees
            .iter()
            .map(|assignee| assignee.assignee.clone())
            .collect();
        if recipients.is_empty() {
            return;
        }
        self.notifier.notify(
            NotificationRequest::new(
                gate.tenant_id.clone(),
                NotificationKind::ApprovalRequested,
                format!("Approval required: {}", gate.name),
            )
            .with_recipients(recipients)
            .for_instance(gate.instance_id.clone())
            .for_task(gate.id.clone()),
        );
    }

    /// Dispatch a Notification step's message and close its task.
    fn dispatch_notification_step(
        &self,
        ctx: &AuthorizationContext,
        task: &WorkflowTask,
    ) -> WorkflowResult<()> {
        let recipients: Vec<AssigneeRef> = task
            .assignees
            .iter()
            .map(|assignee| assignee.assignee.clone())
            .collect();
        self.notifier.notify(
            NotificationRequest::new(
                task.tenant_id.clone(),
                NotificationKind::StepNotice,
                task.name.clone(),
            )
            .with_recipients(recipients)
            .for_instance(task.instance_id.clone())
            .for_task(task.id.clone()),
        );
        let previous = task.status;
        let mut done = task.clone();
        done.complete(
            ctx.actor_id.clone(),
            HashMap::new(),
            Some("Notification dispatched".to_string()),
        )?;
        self.store.replace_task(previous, done.clone())?;
        self.audit.record(
            AuditEntry::new(
                task.tenant_id.clone(),
                AuditSubject::Task(task.id.clone()),
                AuditEvent::TaskCompleted,
                ctx.actor_id.clone(),
            )
            .with_statuses(previous, done.status)
            .with_description("Notification step auto-completed"),
        );
        Ok(())
    }

    /// Fetch an instance, hiding rows from other tenants.
    pub(crate) fn instance_scoped(
        &self,
        ctx: &AuthorizationContext,
        instance_id: &WorkflowInstanceId,
    ) -> WorkflowResult<WorkflowInstance> {
        let instance = self.store.get_instance(instance_id)?;
        if instance.tenant_id != ctx.tenant_id {
            return Err(WorkflowError::InstanceNotFound(instance_id.clone()));
        }
        Ok(instance)
    }

    /// Fetch a task, hiding rows from other tenants.
    pub(crate) fn task_scoped(
        &self,
        ctx: &AuthorizationContext,
        task_id: &WorkflowTaskId,
    ) -> WorkflowResult<WorkflowTask> {
        let task = self.store.get_task(task_id)?;
        if task.tenant_id != ctx.tenant_id {
            return Err(WorkflowError::TaskNotFound(task_id.clone()));
        }
        Ok(task)
    }
}
