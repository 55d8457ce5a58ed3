//! Workflow Domain Types for Baton
//!
//! Baton workflows are **linear approval programs**: ordered step
//! sequences with role-routed tasks, approval gates, and SLA-driven
//! escalation.
//!
//! # Key Concepts
//!
//! - **WorkflowDefinition**: A blueprint of ordered steps. Each step
//!   names a kind (approval, review, data entry, notification), an
//!   optional role requirement, and an SLA window.
//! - **WorkflowInstance**: A running execution of a definition, tracking
//!   lifecycle status from draft through completion or rejection.
//! - **WorkflowTask**: One unit of routed work, materialized from a step
//!   when the instance starts and carried through its own state machine.
//! - **AssigneeResolution**: The outcome of routing a task to people,
//!   recording who was chosen, from which tier, and at what priority.
//! - **EscalationRecord**: An open item raised when a task breaches its
//!   SLA, leveled by how far overdue the task has become.
//! - **AuditEntry**: An append-only record of every state transition,
//!   written before the transition is reported as successful.
//!
//! # Design Principles
//!
//! 1. Every status change goes through an explicit transition table.
//!    No implicit state changes.
//! 2. Task routing is tiered and deterministic: the first tier that
//!    yields candidates wins, and exactly one candidate is primary.
//! 3. Escalation levels only move upward. Re-scanning an overdue task
//!    never repeats or lowers a level.
//! 4. The audit trail is complete by construction: transitions are
//!    recorded synchronously, not best-effort.

#![deny(unsafe_code)]

mod assignee;
mod audit;
mod auth;
mod definition;
mod errors;
mod escalation;
mod ids;
mod instance;
mod notification;
mod stats;
mod task;

pub use assignee::*;
pub use audit::*;
pub use auth::*;
pub use definition::*;
pub use errors::*;
pub use escalation::*;
pub use ids::*;
pub use instance::*;
pub use notification::*;
pub use stats::*;
pub use task::*;
