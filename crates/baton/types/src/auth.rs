//! Authorization context: explicit capability checks, no ambient session
//!
//! Every engine operation takes an `AuthorizationContext` naming the
//! tenant, the acting actor, and the capabilities the caller has granted
//! them. Checks are pure functions over the capability set.

use crate::{ActorId, TenantId, WorkflowError, WorkflowResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ── Capabilities ─────────────────────────────────────────────────────

/// Privileged operations beyond ordinary assignee actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Full control: implies every other capability
    WorkflowAdmin,
    /// Complete or approve tasks without being in the assignee set
    CompleteAnyTask,
    /// Manually escalate tasks and dismiss escalation records
    ManageEscalations,
}

// ── Authorization context ────────────────────────────────────────────

/// Who is calling, for which tenant, and with what capabilities
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationContext {
    pub tenant_id: TenantId,
    pub actor_id: ActorId,
    pub capabilities: HashSet<Capability>,
}

impl AuthorizationContext {
    /// A plain actor with no extra capabilities
    pub fn new(tenant_id: TenantId, actor_id: ActorId) -> Self {
        Self {
            tenant_id,
            actor_id,
            capabilities: HashSet::new(),
        }
    }

    /// An administrator for the tenant
    pub fn admin(tenant_id: TenantId, actor_id: ActorId) -> Self {
        Self::new(tenant_id, actor_id).with_capability(Capability::WorkflowAdmin)
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Check a capability; admins hold all of them
    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
            || self.capabilities.contains(&Capability::WorkflowAdmin)
    }

    /// Require a capability, describing the attempted action on failure
    pub fn require(&self, capability: Capability, action: &str) -> WorkflowResult<()> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(WorkflowError::NotAuthorized {
                actor: self.actor_id.clone(),
                action: action.to_string(),
            })
        }
    }
}
