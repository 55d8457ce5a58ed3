//! Error types for the workflow engine

use crate::{
    ActorId, EscalationRecordId, InstanceStatus, RoleCode, TaskStatus, TenantId,
    WorkflowDefinitionId, WorkflowInstanceId, WorkflowTaskId,
};

/// Errors that can occur in workflow operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(WorkflowDefinitionId),

    #[error("Workflow definition is inactive: {0}")]
    DefinitionInactive(WorkflowDefinitionId),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(WorkflowInstanceId),

    #[error("Workflow task not found: {0}")]
    TaskNotFound(WorkflowTaskId),

    #[error("Escalation record not found: {0}")]
    EscalationNotFound(EscalationRecordId),

    #[error("Workflow instance already started: {0}")]
    AlreadyStarted(WorkflowInstanceId),

    #[error("Invalid instance transition: {from} -> {to}")]
    InvalidTransition {
        from: InstanceStatus,
        to: InstanceStatus,
    },

    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTaskTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task already completed: {0}")]
    AlreadyCompleted(WorkflowTaskId),

    #[error("Task {task} cannot be acted on from {status}")]
    InvalidTaskState {
        task: WorkflowTaskId,
        status: TaskStatus,
    },

    #[error("Instance has incomplete mandatory tasks: {0:?}")]
    IncompleteTasks(Vec<WorkflowTaskId>),

    #[error("Actor {actor} is not an assignee of task {task}")]
    NotAssigned {
        task: WorkflowTaskId,
        actor: ActorId,
    },

    #[error("No assignee found for tenant {tenant}, role {role:?}")]
    NoAssigneeFound {
        tenant: TenantId,
        role: Option<RoleCode>,
    },

    #[error("Actor {actor} is not authorized to {action}")]
    NotAuthorized { actor: ActorId, action: String },

    #[error("Instance {instance} status changed concurrently: expected {expected}, found {actual}")]
    InstanceStatusConflict {
        instance: WorkflowInstanceId,
        expected: InstanceStatus,
        actual: InstanceStatus,
    },

    #[error("Task {task} status changed concurrently: expected {expected}, found {actual}")]
    TaskStatusConflict {
        task: WorkflowTaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
