//! SLA escalation monitor
//!
//! The periodic scan walks a tenant's open tasks and raises every
//! overdue one to the level its definition's ladder calls for: the
//! highest rung whose threshold the overdue hours have reached, a floor
//! lookup rather than an exact match. Levels only ever go up, so a
//! rescan over already-raised tasks is a no-op and the scan can run on
//! any schedule without double-raising.
//!
//! Each raise re-routes the task to the rung's escalation role (falling
//! back to the task's own role), writes a durable [`EscalationRecord`],
//! audits the transition, and notifies the new assignees. Records stay
//! open until the task closes or an operator dismisses them.

use std::sync::Arc;

use baton_types::{
    ActorId, AssigneeRef, AuditEntry, AuditEvent, AuditSubject, AuthorizationContext, Capability,
    EscalationRecord, EscalationRecordId, EscalationStats, NotificationKind, NotificationRequest,
    TaskStatus, TenantId, WorkflowDefinition, WorkflowError, WorkflowInstance, WorkflowResult,
    WorkflowTask, WorkflowTaskId,
};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::audit::AuditRecorder;
use crate::directory::Directory;
use crate::notify::Notifier;
use crate::registry::DefinitionReader;
use crate::resolver::{AssigneeResolver, ResolutionRequest};
use crate::store::WorkflowStore;

/// Scans for SLA breaches and manages escalation records.
///
/// Usually obtained from [`WorkflowEngine::monitor`](crate::WorkflowEngine::monitor)
/// so it shares the engine's store and audit trail.
pub struct EscalationMonitor {
    store: Arc<dyn WorkflowStore>,
    definitions: Arc<dyn DefinitionReader>,
    resolver: AssigneeResolver,
    notifier: Arc<dyn Notifier>,
    audit: Arc<AuditRecorder>,
}

impl EscalationMonitor {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        definitions: Arc<dyn DefinitionReader>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<AuditRecorder>,
    ) -> Self {
        Self {
            resolver: AssigneeResolver::new(directory),
            store,
            definitions,
            notifier,
            audit,
        }
    }

    // ── Periodic scan ────────────────────────────────────────────────

    /// Raise every overdue open task in the tenant to its ladder level.
    /// Returns how many tasks were raised.
    pub fn process_escalations(&self, tenant: &TenantId) -> WorkflowResult<usize> {
        let now = Utc::now();
        let actor = ActorId::new("system");
        let mut raised = 0usize;
        for task in self.store.open_tasks_for_tenant(tenant)? {
            if !task.is_overdue(now) {
                continue;
            }
            let instance = match self.store.get_instance(&task.instance_id) {
                Ok(instance) => instance,
                Err(WorkflowError::InstanceNotFound(_)) => {
                    warn!(task_id = %task.id, "Open task without an instance; skipping");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if instance.is_terminal() {
                continue;
            }
            let definition = self.definitions.get(&instance.definition_id)?;
            let policy = &definition.escalation;
            if task.escalation_level >= policy.max_level {
                continue;
            }
            let hours = task.hours_overdue(now);
            let Some(target) = policy.target_level(hours) else {
                continue;
            };
            if target <= task.escalation_level {
                continue;
            }
            let reason = format!("{hours} hours overdue");
            self.raise(task, &instance, &definition, target, &reason, &actor)?;
            raised += 1;
        }
        if raised > 0 {
            info!(tenant = %tenant, raised, "Escalation scan raised overdue tasks");
        }
        Ok(raised)
    }

    // ── Operator actions ─────────────────────────────────────────────

    /// Raise a task one level by hand, regardless of how overdue it is.
    /// Manual raises ignore the ladder's thresholds and its cap.
    pub fn escalate_task(
        &self,
        ctx: &AuthorizationContext,
        task_id: &WorkflowTaskId,
        reason: impl Into<String>,
    ) -> WorkflowResult<WorkflowTask> {
        ctx.require(Capability::ManageEscalations, "escalate task")?;
        let reason = reason.into();
        let task = self.store.get_task(task_id)?;
        if task.tenant_id != ctx.tenant_id {
            return Err(WorkflowError::TaskNotFound(task_id.clone()));
        }
        if !task.is_open() {
            return Err(WorkflowError::InvalidTaskState {
                task: task.id.clone(),
                status: task.status,
            });
        }
        let instance = self.store.get_instance(&task.instance_id)?;
        let definition = self.definitions.get(&instance.definition_id)?;
        let level = task.escalation_level + 1;
        self.raise(task, &instance, &definition, level, &reason, &ctx.actor_id)?;
        self.store.get_task(task_id)
    }

    /// Close an open escalation record without touching the task.
    pub fn dismiss_escalation(
        &self,
        ctx: &AuthorizationContext,
        record_id: &EscalationRecordId,
        note: impl Into<String>,
    ) -> WorkflowResult<EscalationRecord> {
        ctx.require(Capability::ManageEscalations, "dismiss escalation")?;
        let note = note.into();
        let record = self.store.get_escalation(record_id)?;
        if record.tenant_id != ctx.tenant_id {
            return Err(WorkflowError::EscalationNotFound(record_id.clone()));
        }
        if !record.is_open() {
            return Err(WorkflowError::ValidationError(format!(
                "Escalation record {} is already closed",
                record.id
            )));
        }
        let mut updated = record;
        updated.dismiss(&note);
        self.store.update_escalation(updated.clone())?;
        self.audit.record(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                AuditSubject::Task(updated.task_id.clone()),
                AuditEvent::EscalationDismissed,
                ctx.actor_id.clone(),
            )
            .with_description(format!("Escalation L{} dismissed: {note}", updated.level)),
        );
        Ok(updated)
    }

    // ── Query ────────────────────────────────────────────────────────

    pub fn escalations_for_tenant(
        &self,
        tenant: &TenantId,
    ) -> WorkflowResult<Vec<EscalationRecord>> {
        self.store.escalations_for_tenant(tenant)
    }

    /// Aggregate counts over a tenant's escalation records.
    pub fn escalation_stats(&self, tenant: &TenantId) -> WorkflowResult<EscalationStats> {
        let records = self.store.escalations_for_tenant(tenant)?;
        let mut stats = EscalationStats::default();
        let mut resolve_hours = Vec::new();
        for record in &records {
            stats.total += 1;
            if record.is_open() {
                stats.active += 1;
            } else {
                stats.resolved += 1;
            }
            *stats.by_level.entry(record.level).or_insert(0) += 1;
            *stats
                .by_definition
                .entry(record.definition_id.0.clone())
                .or_insert(0) += 1;
            if let Some(hours) = record.hours_to_resolve() {
                resolve_hours.push(hours);
            }
        }
        if !resolve_hours.is_empty() {
            stats.avg_hours_to_resolve =
                Some(resolve_hours.iter().sum::<f64>() / resolve_hours.len() as f64);
        }
        Ok(stats)
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Raise one task: re-route, bump the level, write the record,
    /// audit, notify. A task that changed status mid-flight loses the
    /// raise silently; the next scan picks it up again.
    fn raise(
        &self,
        task: WorkflowTask,
        instance: &WorkflowInstance,
        definition: &WorkflowDefinition,
        level: u32,
        reason: &str,
        actor: &ActorId,
    ) -> WorkflowResult<()> {
        let role = definition
            .escalation
            .rule_for_level(level)
            .and_then(|rule| rule.escalate_to_role.clone())
            .or_else(|| task.role_code.clone());

        let previous = task.status;
        let mut updated = task;
        let request = ResolutionRequest::for_instance(instance, role.clone());
        match self.resolver.resolve(&request) {
            Ok(assignees) => updated.assign(assignees)?,
            Err(WorkflowError::NoAssigneeFound { .. }) => {
                warn!(
                    task_id = %updated.id,
                    role = ?role,
                    "No escalation assignee resolved; keeping current assignees"
                );
            }
            Err(err) => return Err(err),
        }
        updated.escalate_to(level)?;
        match self.store.replace_task(previous, updated.clone()) {
            Ok(()) => {}
            Err(WorkflowError::TaskStatusConflict { .. }) => {
                debug!(task_id = %updated.id, "Task changed during escalation; raise dropped");
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        let mut record = EscalationRecord::new(
            updated.tenant_id.clone(),
            updated.id.clone(),
            updated.instance_id.clone(),
            instance.definition_id.clone(),
            level,
            reason,
        );
        if let Some(role) = role {
            record = record.with_role(role);
        }
        if let Some(primary) = updated.primary_assignee() {
            record = record.with_target(primary.assignee.clone());
        }
        self.store.insert_escalation(record)?;
        self.audit.record(
            AuditEntry::new(
                updated.tenant_id.clone(),
                AuditSubject::Task(updated.id.clone()),
                AuditEvent::TaskEscalated,
                actor.clone(),
            )
            .with_statuses(previous, TaskStatus::Escalated)
            .with_description(format!("[ESCALATION L{level}] {reason}")),
        );
        warn!(
            task_id = %updated.id,
            instance_id = %updated.instance_id,
            level,
            "Task escalated"
        );

        let recipients: Vec<AssigneeRef> = updated
            .assignees
            .iter()
            .map(|assignee| assignee.assignee.clone())
            .collect();
        if !recipients.is_empty() {
            self.notifier.notify(
                NotificationRequest::new(
                    updated.tenant_id.clone(),
                    NotificationKind::TaskEscalated,
                    format!("[ESCALATION L{level}] {}", updated.name),
                )
                .with_body(reason.to_string())
                .with_recipients(recipients)
                .for_instance(updated.instance_id.clone())
                .for_task(updated.id.clone()),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::engine::{CreateInstance, WorkflowEngine};
    use crate::memory::InMemoryStore;
    use crate::notify::RecordingNotifier;
    use crate::registry::DefinitionRegistry;
    use baton_types::{
        EscalationPolicy, EscalationRule, InstanceStatus, RoleCode, StepKind, StepSpec, TeamId,
        WorkflowDefinition,
    };
    use chrono::Duration;
    use proptest::prelude::*;
    use std::collections::HashMap;

    struct Fixture {
        engine: WorkflowEngine,
        monitor: EscalationMonitor,
        registry: Arc<DefinitionRegistry>,
        directory: Arc<InMemoryDirectory>,
        notifier: Arc<RecordingNotifier>,
        store: Arc<InMemoryStore>,
        tenant: TenantId,
    }

    fn setup() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(DefinitionRegistry::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = WorkflowEngine::new(
            store.clone(),
            store.clone(),
            registry.clone(),
            directory.clone(),
            notifier.clone(),
        );
        let monitor = engine.monitor();
        Fixture {
            engine,
            monitor,
            registry,
            directory,
            notifier,
            store,
            tenant: TenantId::new("tenant-1"),
        }
    }

    impl Fixture {
        fn admin(&self) -> AuthorizationContext {
            AuthorizationContext::admin(self.tenant.clone(), ActorId::new("admin"))
        }

        fn started(&self, definition: WorkflowDefinition) -> WorkflowInstance {
            self.directory
                .set_fallback_team(&self.tenant, TeamId::new("ops"))
                .unwrap();
            let id = self.registry.register(definition).unwrap();
            let ctx = self.admin();
            let instance = self
                .engine
                .create_instance(&ctx, CreateInstance::new(id))
                .unwrap();
            self.engine
                .start(&ctx, &instance.id, HashMap::new())
                .unwrap()
        }

        fn open_task(&self, instance: &WorkflowInstance) -> WorkflowTask {
            self.engine
                .tasks_for_instance(&self.admin(), &instance.id)
                .unwrap()
                .into_iter()
                .find(|task| task.is_open())
                .expect("open task")
        }

        /// Push a task's deadline into the past in place.
        fn make_overdue(&self, task_id: &WorkflowTaskId, hours: i64) {
            let task = self.store.get_task(task_id).unwrap();
            let mut overdue = task.clone();
            overdue.due_by = Utc::now() - Duration::hours(hours);
            self.store.replace_task(task.status, overdue).unwrap();
        }

        fn records_for(&self, task_id: &WorkflowTaskId) -> Vec<EscalationRecord> {
            self.store
                .escalations_for_tenant(&self.tenant)
                .unwrap()
                .into_iter()
                .filter(|record| &record.task_id == task_id)
                .collect()
        }
    }

    fn escalating_review(tenant: &TenantId) -> WorkflowDefinition {
        WorkflowDefinition::new("sla-review", tenant.clone())
            .with_step(
                StepSpec::new(0, "review evidence", StepKind::Review)
                    .with_role(RoleCode::new("reviewer")),
            )
            .with_escalation(
                EscalationPolicy::new(3)
                    .with_rule(EscalationRule::new(1, 24))
                    .with_rule(
                        EscalationRule::new(2, 72)
                            .with_role(RoleCode::new("compliance-manager")),
                    ),
            )
    }

    #[test]
    fn scan_raises_overdue_task_to_its_floor_level() {
        let fixture = setup();
        let instance = fixture.started(escalating_review(&fixture.tenant));
        let task = fixture.open_task(&instance);
        fixture.make_overdue(&task.id, 48);

        let raised = fixture.monitor.process_escalations(&fixture.tenant).unwrap();
        assert_eq!(raised, 1);

        let escalated = fixture.store.get_task(&task.id).unwrap();
        assert_eq!(escalated.status, TaskStatus::Escalated);
        assert_eq!(escalated.escalation_level, 1);

        let records = fixture.records_for(&task.id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, 1);
        assert!(records[0].is_open());
        // L1 has no escalation role; the task's own role is recorded.
        assert_eq!(records[0].escalated_to_role, Some(RoleCode::new("reviewer")));
        assert_eq!(
            records[0].target,
            Some(AssigneeRef::Team(TeamId::new("ops")))
        );
        assert_eq!(
            fixture
                .notifier
                .of_kind(NotificationKind::TaskEscalated)
                .len(),
            1
        );
    }

    #[test]
    fn rescan_does_not_raise_again() {
        let fixture = setup();
        let instance = fixture.started(escalating_review(&fixture.tenant));
        let task = fixture.open_task(&instance);
        fixture.make_overdue(&task.id, 48);

        assert_eq!(
            fixture.monitor.process_escalations(&fixture.tenant).unwrap(),
            1
        );
        assert_eq!(
            fixture.monitor.process_escalations(&fixture.tenant).unwrap(),
            0
        );
        assert_eq!(
            fixture.store.get_task(&task.id).unwrap().escalation_level,
            1
        );
        assert_eq!(fixture.records_for(&task.id).len(), 1);
    }

    #[test]
    fn deeper_overdue_climbs_to_the_next_rung() {
        let fixture = setup();
        let instance = fixture.started(escalating_review(&fixture.tenant));
        let task = fixture.open_task(&instance);
        fixture.make_overdue(&task.id, 48);
        fixture.monitor.process_escalations(&fixture.tenant).unwrap();

        fixture.make_overdue(&task.id, 100);
        assert_eq!(
            fixture.monitor.process_escalations(&fixture.tenant).unwrap(),
            1
        );
        let escalated = fixture.store.get_task(&task.id).unwrap();
        assert_eq!(escalated.escalation_level, 2);

        let records = fixture.records_for(&task.id);
        assert_eq!(records.len(), 2);
        // The L2 rung names its own role.
        let l2 = records.iter().find(|r| r.level == 2).unwrap();
        assert_eq!(
            l2.escalated_to_role,
            Some(RoleCode::new("compliance-manager"))
        );
    }

    #[test]
    fn scan_never_raises_past_the_cap() {
        let fixture = setup();
        let definition = WorkflowDefinition::new("capped", fixture.tenant.clone())
            .with_step(StepSpec::new(0, "review", StepKind::Review))
            .with_escalation(EscalationPolicy::new(1).with_rule(EscalationRule::new(1, 0)));
        let instance = fixture.started(definition);
        let task = fixture.open_task(&instance);
        fixture.make_overdue(&task.id, 48);

        assert_eq!(
            fixture.monitor.process_escalations(&fixture.tenant).unwrap(),
            1
        );
        // At max_level now; however far overdue it gets, the scan stops.
        fixture.make_overdue(&task.id, 500);
        assert_eq!(
            fixture.monitor.process_escalations(&fixture.tenant).unwrap(),
            0
        );
        assert_eq!(
            fixture.store.get_task(&task.id).unwrap().escalation_level,
            1
        );
    }

    #[test]
    fn tasks_of_terminal_instances_are_left_alone() {
        let fixture = setup();
        let instance = fixture.started(escalating_review(&fixture.tenant));
        let task = fixture.open_task(&instance);
        fixture.make_overdue(&task.id, 48);

        // Cancel the instance row directly, leaving the task open, as a
        // crash between the two cascade writes would.
        let mut cancelled = fixture.store.get_instance(&instance.id).unwrap();
        cancelled.transition_to(InstanceStatus::Cancelled).unwrap();
        fixture
            .store
            .replace_instance(InstanceStatus::Active, cancelled)
            .unwrap();

        assert_eq!(
            fixture.monitor.process_escalations(&fixture.tenant).unwrap(),
            0
        );
    }

    #[test]
    fn completing_the_task_resolves_its_records() {
        let fixture = setup();
        let instance = fixture.started(escalating_review(&fixture.tenant));
        let task = fixture.open_task(&instance);
        fixture.make_overdue(&task.id, 48);
        fixture.monitor.process_escalations(&fixture.tenant).unwrap();

        fixture
            .engine
            .complete_task(&fixture.admin(), &task.id, HashMap::new(), None)
            .unwrap();

        let records = fixture.records_for(&task.id);
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_open());
        assert_eq!(records[0].resolution.as_deref(), Some("task completed"));
        assert!(fixture
            .store
            .open_escalations_for_task(&task.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn manual_escalation_ignores_thresholds_and_cap() {
        let fixture = setup();
        let definition = WorkflowDefinition::new("capped", fixture.tenant.clone())
            .with_step(StepSpec::new(0, "review", StepKind::Review))
            .with_escalation(EscalationPolicy::new(1).with_rule(EscalationRule::new(1, 24)));
        let instance = fixture.started(definition);
        let task = fixture.open_task(&instance);
        // Not overdue at all.

        let plain = AuthorizationContext::new(fixture.tenant.clone(), ActorId::new("alice"));
        let err = fixture
            .monitor
            .escalate_task(&plain, &task.id, "hurry up")
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAuthorized { .. }));

        let manager = AuthorizationContext::new(fixture.tenant.clone(), ActorId::new("manager"))
            .with_capability(Capability::ManageEscalations);
        let once = fixture
            .monitor
            .escalate_task(&manager, &task.id, "board visibility")
            .unwrap();
        assert_eq!(once.escalation_level, 1);
        let twice = fixture
            .monitor
            .escalate_task(&manager, &task.id, "still stuck")
            .unwrap();
        // Past the ladder's cap of 1; manual raises are not bounded.
        assert_eq!(twice.escalation_level, 2);
        assert_eq!(fixture.records_for(&task.id).len(), 2);
    }

    #[test]
    fn manual_escalation_of_closed_task_is_invalid() {
        let fixture = setup();
        let instance = fixture.started(escalating_review(&fixture.tenant));
        let task = fixture.open_task(&instance);
        fixture
            .engine
            .complete_task(&fixture.admin(), &task.id, HashMap::new(), None)
            .unwrap();

        let err = fixture
            .monitor
            .escalate_task(&fixture.admin(), &task.id, "too late")
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTaskState { .. }));
    }

    #[test]
    fn dismiss_closes_the_record_once() {
        let fixture = setup();
        let instance = fixture.started(escalating_review(&fixture.tenant));
        let task = fixture.open_task(&instance);
        fixture
            .monitor
            .escalate_task(&fixture.admin(), &task.id, "manual")
            .unwrap();
        let record = fixture.records_for(&task.id).remove(0);

        let plain = AuthorizationContext::new(fixture.tenant.clone(), ActorId::new("alice"));
        let err = fixture
            .monitor
            .dismiss_escalation(&plain, &record.id, "noise")
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAuthorized { .. }));

        let dismissed = fixture
            .monitor
            .dismiss_escalation(&fixture.admin(), &record.id, "duplicate alert")
            .unwrap();
        assert!(!dismissed.is_open());
        assert_eq!(
            dismissed.resolution.as_deref(),
            Some("dismissed: duplicate alert")
        );

        let err = fixture
            .monitor
            .dismiss_escalation(&fixture.admin(), &record.id, "again")
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(_)));

        // The task itself is untouched.
        assert_eq!(
            fixture.store.get_task(&task.id).unwrap().status,
            TaskStatus::Escalated
        );
    }

    #[test]
    fn stats_aggregate_records_by_level_and_definition() {
        let fixture = setup();
        let instance = fixture.started(escalating_review(&fixture.tenant));
        let task = fixture.open_task(&instance);
        fixture
            .monitor
            .escalate_task(&fixture.admin(), &task.id, "first")
            .unwrap();
        fixture
            .monitor
            .escalate_task(&fixture.admin(), &task.id, "second")
            .unwrap();
        fixture
            .engine
            .complete_task(&fixture.admin(), &task.id, HashMap::new(), None)
            .unwrap();

        let stats = fixture.monitor.escalation_stats(&fixture.tenant).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.resolved, 2);
        assert_eq!(stats.by_level.get(&1), Some(&1));
        assert_eq!(stats.by_level.get(&2), Some(&1));
        assert_eq!(
            stats.by_definition.get(&instance.definition_id.0),
            Some(&2)
        );
        assert!(stats.avg_hours_to_resolve.is_some());
    }

    proptest! {
        #[test]
        fn floor_rule_is_capped_and_monotonic(
            thresholds in proptest::collection::vec(0i64..200, 1..5),
            h1 in -10i64..400,
            h2 in -10i64..400,
        ) {
            let mut sorted = thresholds;
            sorted.sort_unstable();
            sorted.dedup();
            let mut policy = EscalationPolicy::new(sorted.len() as u32);
            for (i, threshold) in sorted.iter().enumerate() {
                policy = policy.with_rule(EscalationRule::new(i as u32 + 1, *threshold));
            }
            let (lo, hi) = if h1 <= h2 { (h1, h2) } else { (h2, h1) };
            let at_lo = policy.target_level(lo);
            let at_hi = policy.target_level(hi);
            prop_assert!(at_lo.unwrap_or(0) <= at_hi.unwrap_or(0));
            if let Some(level) = at_hi {
                prop_assert!(level >= 1 && level <= policy.max_level);
            }
        }

        #[test]
        fn escalation_level_never_decreases(levels in proptest::collection::vec(1u32..6, 1..8)) {
            let step = StepSpec::new(0, "review", StepKind::Review);
            let mut task = WorkflowTask::from_step(
                baton_types::WorkflowInstanceId::generate(),
                TenantId::new("t1"),
                &step,
                Utc::now(),
            );
            for level in levels {
                let before = task.escalation_level;
                match task.escalate_to(level) {
                    Ok(()) => {
                        prop_assert_eq!(task.escalation_level, level);
                        prop_assert!(level > before);
                    }
                    Err(_) => prop_assert_eq!(task.escalation_level, before),
                }
            }
        }
    }
}
