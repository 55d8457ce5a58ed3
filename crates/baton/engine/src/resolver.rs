//! Assignee resolver: who should work a task
//!
//! Walks a fixed precedence chain and stops at the first tier that
//! produces candidates:
//!
//! 1. **DirectOwner**: the record owner, when they hold the required role
//! 2. **TeamRole**: active members of the owning team holding the role
//! 3. **RACI**: Responsible (and Accountable) parties on the subject scope
//! 4. **Fallback**: the tenant's default team
//!
//! A non-empty result always carries exactly one primary assignee. When
//! every tier comes up empty the resolver returns `NoAssigneeFound`; the
//! caller decides whether that is an error or a task left pending.

use std::sync::Arc;

use baton_types::{
    ActorId, AssigneeRef, AssigneeResolution, AssigneeSource, RaciRole, RoleCode, ScopeRef, TeamId,
    TenantId, WorkflowError, WorkflowInstance, WorkflowResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directory::Directory;

/// Priority given to fallback-team assignments.
const FALLBACK_PRIORITY: u8 = 10;

/// Routing context for one resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolutionRequest {
    pub tenant_id: TenantId,
    /// Role the step requires, if any
    pub role_code: Option<RoleCode>,
    /// Governance scope of the instance subject
    pub scope: Option<ScopeRef>,
    pub owner_user: Option<ActorId>,
    pub owner_team: Option<TeamId>,
}

impl ResolutionRequest {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            role_code: None,
            scope: None,
            owner_user: None,
            owner_team: None,
        }
    }

    /// Build the request for a task of `instance` requiring `role_code`.
    pub fn for_instance(instance: &WorkflowInstance, role_code: Option<RoleCode>) -> Self {
        Self {
            tenant_id: instance.tenant_id.clone(),
            role_code,
            scope: instance.subject.clone(),
            owner_user: instance.owner_user.clone(),
            owner_team: instance.owner_team.clone(),
        }
    }

    pub fn with_role(mut self, role: RoleCode) -> Self {
        self.role_code = Some(role);
        self
    }

    pub fn with_scope(mut self, scope: ScopeRef) -> Self {
        self.scope = Some(scope);
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

/// The precedence-chain resolver.
#[derive(Clone)]
pub struct AssigneeResolver {
    directory: Arc<dyn Directory>,
}

impl AssigneeResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Resolve assignees for a request.
    ///
    /// Deterministic for a given directory state: candidate order inside
    /// a tier is fixed by assignment date and actor id.
    pub fn resolve(&self, request: &ResolutionRequest) -> WorkflowResult<Vec<AssigneeResolution>> {
        debug!(
            tenant = %request.tenant_id,
            role = ?request.role_code,
            "Resolving assignees"
        );

        if let Some(candidates) = self.try_direct_owner(request)? {
            debug!(source = ?AssigneeSource::DirectOwner, candidates = candidates.len(), "Assignees resolved");
            return Ok(candidates);
        }
        if let Some(candidates) = self.try_team_role(request)? {
            debug!(source = ?AssigneeSource::TeamRole, candidates = candidates.len(), "Assignees resolved");
            return Ok(candidates);
        }
        if let Some(candidates) = self.try_raci(request)? {
            debug!(source = ?AssigneeSource::Raci, candidates = candidates.len(), "Assignees resolved");
            return Ok(candidates);
        }
        if let Some(candidates) = self.try_fallback(request)? {
            debug!(source = ?AssigneeSource::Fallback, candidates = candidates.len(), "Assignees resolved");
            return Ok(candidates);
        }

        Err(WorkflowError::NoAssigneeFound {
            tenant: request.tenant_id.clone(),
            role: request.role_code.clone(),
        })
    }

    /// Tier 1: the record owner, if they qualify for the required role.
    /// A step with no role requirement routes straight to the owner.
    fn try_direct_owner(
        &self,
        request: &ResolutionRequest,
    ) -> WorkflowResult<Option<Vec<AssigneeResolution>>> {
        let Some(owner) = &request.owner_user else {
            return Ok(None);
        };
        if let Some(role) = &request.role_code {
            let holds_role = self
                .directory
                .user_roles(&request.tenant_id, owner)?
                .iter()
                .any(|assignment| &assignment.role_code == role);
            if !holds_role {
                debug!(owner = %owner, role = %role, "Owner lacks required role");
                return Ok(None);
            }
        }
        let mut resolution =
            AssigneeResolution::new(AssigneeRef::User(owner.clone()), AssigneeSource::DirectOwner)
                .primary();
        if let Some(role) = &request.role_code {
            resolution = resolution.with_role(role.clone());
        }
        Ok(Some(vec![resolution]))
    }

    /// Tier 2: active members of the owning team holding the role.
    /// Every holder becomes a candidate so any of them can pick the task
    /// up; the longest-standing holder is primary.
    fn try_team_role(
        &self,
        request: &ResolutionRequest,
    ) -> WorkflowResult<Option<Vec<AssigneeResolution>>> {
        let Some(team) = &request.owner_team else {
            return Ok(None);
        };
        let members = self.directory.team_members(&request.tenant_id, team)?;

        let mut holders: Vec<(DateTime<Utc>, ActorId)> = Vec::new();
        for member in members.iter().filter(|member| member.active) {
            match &request.role_code {
                Some(role) => {
                    if let Some(assignment) = member.role(role) {
                        holders.push((assignment.assigned_at, member.actor.clone()));
                    }
                }
                None => {
                    let assigned_at = member
                        .earliest_assignment()
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    holders.push((assigned_at, member.actor.clone()));
                }
            }
        }
        if holders.is_empty() {
            return Ok(None);
        }
        holders.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| (a.1).0.cmp(&(b.1).0)));

        let mut candidates = Vec::with_capacity(holders.len());
        for (position, (_, actor)) in holders.into_iter().enumerate() {
            let mut resolution =
                AssigneeResolution::new(AssigneeRef::User(actor), AssigneeSource::TeamRole);
            if let Some(role) = &request.role_code {
                resolution = resolution.with_role(role.clone());
            }
            if position == 0 {
                resolution = resolution.primary();
            }
            candidates.push(resolution);
        }
        Ok(Some(candidates))
    }

    /// Tier 3: RACI parties on the subject scope. Requires at least one
    /// Responsible party; Accountable parties ride along for visibility.
    fn try_raci(
        &self,
        request: &ResolutionRequest,
    ) -> WorkflowResult<Option<Vec<AssigneeResolution>>> {
        let Some(scope) = &request.scope else {
            return Ok(None);
        };
        let assignments = self.directory.raci_for_scope(&request.tenant_id, scope)?;

        let mut responsible: Vec<ActorId> = assignments
            .iter()
            .filter(|a| a.raci == RaciRole::Responsible)
            .map(|a| a.actor.clone())
            .collect();
        if responsible.is_empty() {
            return Ok(None);
        }
        responsible.sort_by(|a, b| a.0.cmp(&b.0));

        let mut accountable: Vec<ActorId> = assignments
            .iter()
            .filter(|a| a.raci == RaciRole::Accountable)
            .map(|a| a.actor.clone())
            .collect();
        accountable.sort_by(|a, b| a.0.cmp(&b.0));

        let mut candidates = Vec::with_capacity(responsible.len() + accountable.len());
        for (position, actor) in responsible.into_iter().enumerate() {
            let mut resolution =
                AssigneeResolution::new(AssigneeRef::User(actor), AssigneeSource::Raci);
            if position == 0 {
                resolution = resolution.primary();
            }
            candidates.push(resolution);
        }
        for actor in accountable {
            candidates.push(AssigneeResolution::new(
                AssigneeRef::User(actor),
                AssigneeSource::Raci,
            ));
        }
        Ok(Some(candidates))
    }

    /// Tier 4: the tenant's default team, as a team-typed assignment.
    fn try_fallback(
        &self,
        request: &ResolutionRequest,
    ) -> WorkflowResult<Option<Vec<AssigneeResolution>>> {
        let Some(team) = self.directory.fallback_team(&request.tenant_id)? else {
            return Ok(None);
        };
        Ok(Some(vec![AssigneeResolution::new(
            AssigneeRef::Team(team),
            AssigneeSource::Fallback,
        )
        .primary()
        .with_priority(FALLBACK_PRIORITY)]))
    }
}
