//! Notification requests: what the engine hands the external notifier
//!
//! The engine never delivers anything itself. It builds a request and
//! hands it to the notifier collaborator, fire-and-forget; delivery
//! failures never revert a state transition.

use crate::{AssigneeRef, TenantId, WorkflowInstanceId, WorkflowTaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a notification is being requested
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    TaskAssigned,
    ApprovalRequested,
    TaskEscalated,
    InstanceCompleted,
    InstanceRejected,
    InstanceCancelled,
    /// A `Notification`-kind step delivering its own message
    StepNotice,
}

/// A delivery request for the external notifier
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// The tenant the recipients belong to
    pub tenant_id: TenantId,
    /// Why this is being sent
    pub kind: NotificationKind,
    /// Users or teams to deliver to
    pub recipients: Vec<AssigneeRef>,
    /// Subject line
    pub subject: String,
    /// Body text
    pub body: String,
    /// Related instance, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<WorkflowInstanceId>,
    /// Related task, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<WorkflowTaskId>,
    /// When the request was created
    pub created_at: DateTime<Utc>,
}

impl NotificationRequest {
    pub fn new(tenant_id: TenantId, kind: NotificationKind, subject: impl Into<String>) -> Self {
        Self {
            tenant_id,
            kind,
            recipients: Vec::new(),
            subject: subject.into(),
            body: String::new(),
            instance_id: None,
            task_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_recipient(mut self, recipient: AssigneeRef) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn with_recipients(mut self, recipients: impl IntoIterator<Item = AssigneeRef>) -> Self {
        self.recipients.extend(recipients);
        self
    }

    pub fn for_instance(mut self, instance_id: WorkflowInstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn for_task(mut self, task_id: WorkflowTaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}
