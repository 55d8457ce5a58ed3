//! Workflow definitions: the read-only template a process runs from
//!
//! A definition is an ordered list of step specifications plus the policies
//! that govern rejection and escalation. The engine only reads definitions;
//! authoring and storage belong to an external collaborator. To change a
//! definition, publish a new version.

use crate::{RoleCode, TenantId, WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowDefinitionId(pub String);

impl WorkflowDefinitionId {
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

impl std::fmt::Display for WorkflowDefinitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Step specification ───────────────────────────────────────────────

/// What kind of work a step demands. The engine matches on this tag:
/// Approval steps gate the instance, Notification steps auto-complete
/// after dispatching their request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StepKind {
    /// A sign-off gate; the instance waits in PendingApproval on it
    Approval,
    /// A review work item completed by an assignee
    #[default]
    Review,
    /// A data-entry work item completed by an assignee
    DataEntry,
    /// An outbound notification; dispatched and auto-completed
    Notification,
}

impl StepKind {
    /// Approval steps gate instance progress
    pub fn is_gate(&self) -> bool {
        matches!(self, Self::Approval)
    }
}

/// One step of a definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepSpec {
    /// Zero-based position in the step order
    pub index: u32,
    /// Human-readable step name
    pub name: String,
    /// What kind of work this step is
    pub kind: StepKind,
    /// Role required to act on the step; None means any assignee qualifies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_code: Option<RoleCode>,
    /// SLA in hours; the task's due-by is creation time plus this
    pub sla_hours: i64,
    /// Mandatory steps block instance completion until closed
    pub mandatory: bool,
}

impl StepSpec {
    pub fn new(index: u32, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
            role_code: None,
            sla_hours: 24,
            mandatory: true,
        }
    }

    pub fn with_role(mut self, role: RoleCode) -> Self {
        self.role_code = Some(role);
        self
    }

    pub fn with_sla_hours(mut self, hours: i64) -> Self {
        self.sla_hours = hours;
        self
    }

    /// Mark the step optional; optional steps may be skipped and never
    /// block completion
    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }
}

// ── Rejection behavior ───────────────────────────────────────────────

/// What a rejection at an approval gate does to the instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RejectionBehavior {
    /// The instance terminates in Rejected
    #[default]
    Terminal,
    /// The instance returns to Active for rework
    Rework,
}

// ── Escalation policy ────────────────────────────────────────────────

/// One rung of the escalation ladder. A task whose overdue hours reach
/// `hours_overdue` (and no higher rung) is raised to `level`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscalationRule {
    /// Target escalation level
    pub level: u32,
    /// Overdue-hours threshold at which this level applies
    pub hours_overdue: i64,
    /// Role the task is re-routed to; None keeps the task's own role
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalate_to_role: Option<RoleCode>,
}

impl EscalationRule {
    pub fn new(level: u32, hours_overdue: i64) -> Self {
        Self {
            level,
            hours_overdue,
            escalate_to_role: None,
        }
    }

    pub fn with_role(mut self, role: RoleCode) -> Self {
        self.escalate_to_role = Some(role);
        self
    }
}

/// Per-definition escalation ladder, ordered by threshold ascending
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// The periodic scan never raises a task past this level
    pub max_level: u32,
    /// Rungs ordered by `hours_overdue` ascending
    pub rules: Vec<EscalationRule>,
}

impl EscalationPolicy {
    pub fn new(max_level: u32) -> Self {
        Self {
            max_level,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: EscalationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The level an overdue task should sit at: the highest rung whose
    /// threshold does not exceed `hours_overdue`. A floor lookup, not an
    /// exact match.
    pub fn target_level(&self, hours_overdue: i64) -> Option<u32> {
        self.rules
            .iter()
            .filter(|r| r.hours_overdue <= hours_overdue)
            .map(|r| r.level)
            .max()
            .map(|level| level.min(self.max_level))
    }

    /// The rung for a given level, if one is configured
    pub fn rule_for_level(&self, level: u32) -> Option<&EscalationRule> {
        self.rules.iter().find(|r| r.level == level)
    }
}

impl Default for EscalationPolicy {
    /// The standard day-step ladder: overdue at all is level 1, then one
    /// level per further 24 hours, capped at 4.
    fn default() -> Self {
        Self {
            max_level: 4,
            rules: vec![
                EscalationRule::new(1, 0),
                EscalationRule::new(2, 24),
                EscalationRule::new(3, 48),
                EscalationRule::new(4, 72),
            ],
        }
    }
}

// ── Workflow definition ──────────────────────────────────────────────

/// A workflow definition, the template an instance executes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier
    pub id: WorkflowDefinitionId,
    /// The tenant this definition belongs to
    pub tenant_id: TenantId,
    /// Human-readable name
    pub name: String,
    /// Description of the process
    pub description: String,
    /// Version, bumped on every published change
    pub version: u32,
    /// Inactive definitions cannot spawn new instances
    pub active: bool,
    /// Ordered step specifications
    pub steps: Vec<StepSpec>,
    /// What a rejection does to the instance
    pub rejection: RejectionBehavior,
    /// Escalation ladder for overdue tasks
    pub escalation: EscalationPolicy,
    /// When this definition was created
    pub created_at: DateTime<Utc>,
    /// Metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, tenant_id: TenantId) -> Self {
        Self {
            id: WorkflowDefinitionId::generate(),
            tenant_id,
            name: name.into(),
            description: String::new(),
            version: 1,
            active: true,
            steps: Vec::new(),
            rejection: RejectionBehavior::default(),
            escalation: EscalationPolicy::default(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_rejection(mut self, rejection: RejectionBehavior) -> Self {
        self.rejection = rejection;
        self
    }

    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn step(&self, index: u32) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.index == index)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Whether any step is an approval gate
    pub fn has_approval_steps(&self) -> bool {
        self.steps.iter().any(|s| s.kind.is_gate())
    }

    /// Whether an approval gate at `index` has a preceding mandatory
    /// non-approval step that rework can reopen
    pub fn has_rework_surface(&self, index: u32) -> bool {
        self.steps
            .iter()
            .any(|s| s.index < index && s.mandatory && !s.kind.is_gate())
    }

    // ── Validation ───────────────────────────────────────────────────

    /// Validate the definition for structural correctness
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.steps.is_empty() {
            return Err(WorkflowError::ValidationError(
                "Definition must have at least one step".into(),
            ));
        }

        // Step indexes must be unique and contiguous from zero
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.index) {
                return Err(WorkflowError::ValidationError(format!(
                    "Duplicate step index: {}",
                    step.index
                )));
            }
            if step.sla_hours <= 0 {
                return Err(WorkflowError::ValidationError(format!(
                    "Step {} has a non-positive SLA",
                    step.index
                )));
            }
        }
        for expected in 0..self.steps.len() as u32 {
            if !seen.contains(&expected) {
                return Err(WorkflowError::ValidationError(format!(
                    "Step indexes are not contiguous: missing {}",
                    expected
                )));
            }
        }

        // Approval gates must be mandatory; an optional gate could be
        // skipped and would never release the instance
        if let Some(gate) = self.steps.iter().find(|s| s.kind.is_gate() && !s.mandatory) {
            return Err(WorkflowError::ValidationError(format!(
                "Approval step {} must be mandatory",
                gate.index
            )));
        }

        // Escalation rungs must ascend in both threshold and level
        let rules = &self.escalation.rules;
        for pair in rules.windows(2) {
            if pair[1].hours_overdue <= pair[0].hours_overdue || pair[1].level <= pair[0].level {
                return Err(WorkflowError::ValidationError(
                    "Escalation rules must ascend by threshold and level".into(),
                ));
            }
        }
        if let Some(top) = rules.last() {
            if top.level > self.escalation.max_level {
                return Err(WorkflowError::ValidationError(format!(
                    "Escalation rule level {} exceeds max level {}",
                    top.level, self.escalation.max_level
                )));
            }
        }

        Ok(())
    }
}
