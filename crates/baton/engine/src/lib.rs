//! Workflow execution engine for Baton
//!
//! The engine runs approval and review processes: it expands a workflow
//! definition into tasks, routes each task through the assignee
//! resolution chain, walks instances through their status tables, and
//! keeps an append-only audit trail of every transition.
//!
//! # Key Principle
//!
//! **The engine never trusts a caller's view of state.**
//!
//! Every operation re-reads the row and validates the transition
//! against the fixed tables in `baton-types`. Writes carry the status
//! the caller read as a guard, so two actors racing on the same row
//! produce one winner and one typed conflict, never a double
//! transition. Each transition lands in the audit trail before the
//! operation reports success.
//!
//! # Architecture
//!
//! The [`WorkflowEngine`] composes pluggable collaborators:
//!
//! - [`WorkflowStore`] / [`AuditStore`] - persistence seams, with
//!   [`InMemoryStore`] as the in-process implementation
//! - [`DefinitionReader`] - access to published definitions, served by
//!   [`DefinitionRegistry`]
//! - [`Directory`] - org data (roles, teams, RACI, fallback team) that
//!   the [`AssigneeResolver`] walks tier by tier
//! - [`Notifier`] - outbound messages; [`LogNotifier`] for logs,
//!   [`RecordingNotifier`] for tests
//! - [`EscalationMonitor`] - the SLA scan, raising overdue tasks along
//!   their definition's escalation ladder
//! - [`AuditRecorder`] - retrying append wrapper around the audit store
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use baton_engine::{
//!     CreateInstance, DefinitionRegistry, InMemoryDirectory, InMemoryStore, LogNotifier,
//!     WorkflowEngine,
//! };
//! use baton_types::{
//!     ActorId, AuthorizationContext, InstanceStatus, StepKind, StepSpec, TeamId, TenantId,
//!     WorkflowDefinition,
//! };
//!
//! let store = Arc::new(InMemoryStore::new());
//! let registry = Arc::new(DefinitionRegistry::new());
//! let directory = Arc::new(InMemoryDirectory::new());
//! let engine = WorkflowEngine::new(
//!     store.clone(),
//!     store,
//!     registry.clone(),
//!     directory.clone(),
//!     Arc::new(LogNotifier::new()),
//! );
//!
//! let tenant = TenantId::new("acme");
//! directory.set_fallback_team(&tenant, TeamId::new("ops")).unwrap();
//! let definition = WorkflowDefinition::new("access-review", tenant.clone())
//!     .with_step(StepSpec::new(0, "review access", StepKind::Review));
//! let definition_id = registry.register(definition).unwrap();
//!
//! let ctx = AuthorizationContext::admin(tenant, ActorId::new("admin"));
//! let instance = engine
//!     .create_instance(&ctx, CreateInstance::new(definition_id))
//!     .unwrap();
//! let instance = engine.start(&ctx, &instance.id, HashMap::new()).unwrap();
//! assert_eq!(instance.status, InstanceStatus::Active);
//!
//! let tasks = engine.tasks_for_instance(&ctx, &instance.id).unwrap();
//! engine
//!     .complete_task(&ctx, &tasks[0].id, HashMap::new(), None)
//!     .unwrap();
//! assert_eq!(
//!     engine.get_instance(&ctx, &instance.id).unwrap().status,
//!     InstanceStatus::Completed
//! );
//! ```

#![deny(unsafe_code)]

pub mod audit;
pub mod directory;
pub mod engine;
pub mod memory;
pub mod monitor;
pub mod notify;
pub mod registry;
pub mod resolver;
pub mod store;
mod tasks;

// Re-export main types
pub use audit::AuditRecorder;
pub use directory::{Directory, InMemoryDirectory};
pub use engine::{CreateInstance, WorkflowEngine};
pub use memory::InMemoryStore;
pub use monitor::EscalationMonitor;
pub use notify::{LogNotifier, Notifier, RecordingNotifier};
pub use registry::{DefinitionReader, DefinitionRegistry};
pub use resolver::{AssigneeResolver, ResolutionRequest};
pub use store::{AuditQuery, AuditStore, WorkflowStore};
