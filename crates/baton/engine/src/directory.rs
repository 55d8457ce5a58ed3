//! Directory: org data the assignee resolution chain walks
//!
//! Role grants, team rosters, RACI assignments, and the tenant fallback
//! team live outside the engine in most deployments. This trait is the
//! seam; [`InMemoryDirectory`] is the in-process implementation used by
//! tests and single-node setups.

use std::collections::HashMap;
use std::sync::RwLock;

use baton_types::{
    ActorId, RaciAssignment, RoleAssignment, RoleCode, ScopeRef, TeamId, TeamMember, TenantId,
    WorkflowError, WorkflowResult,
};
use chrono::{DateTime, Utc};

/// Lookups the resolver and authorization checks need.
pub trait Directory: Send + Sync {
    /// Roles granted to a user in a tenant.
    fn user_roles(&self, tenant: &TenantId, actor: &ActorId) -> WorkflowResult<Vec<RoleAssignment>>;

    /// Full roster of a team, including inactive members.
    fn team_members(&self, tenant: &TenantId, team: &TeamId) -> WorkflowResult<Vec<TeamMember>>;

    /// RACI assignments recorded against a governance scope.
    fn raci_for_scope(
        &self,
        tenant: &TenantId,
        scope: &ScopeRef,
    ) -> WorkflowResult<Vec<RaciAssignment>>;

    /// The tenant's default team for otherwise unroutable work.
    fn fallback_team(&self, tenant: &TenantId) -> WorkflowResult<Option<TeamId>>;

    /// Whether the actor is an active member of the team.
    fn is_active_member(
        &self,
        tenant: &TenantId,
        team: &TeamId,
        actor: &ActorId,
    ) -> WorkflowResult<bool> {
        Ok(self
            .team_members(tenant, team)?
            .iter()
            .any(|member| member.active && &member.actor == actor))
    }
}

/// Process-local directory backed by `RwLock`-guarded maps.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    user_roles: RwLock<HashMap<(TenantId, ActorId), Vec<RoleAssignment>>>,
    teams: RwLock<HashMap<(TenantId, TeamId), Vec<TeamMember>>>,
    raci: RwLock<HashMap<(TenantId, ScopeRef), Vec<RaciAssignment>>>,
    fallback: RwLock<HashMap<TenantId, TeamId>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a role to a user.
    pub fn grant_role(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        role: RoleCode,
        assigned_at: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        self.user_roles
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .entry((tenant.clone(), actor.clone()))
            .or_default()
            .push(RoleAssignment::new(role, assigned_at));
        Ok(())
    }

    /// Add a member to a team roster.
    pub fn add_team_member(
        &self,
        tenant: &TenantId,
        team: &TeamId,
        member: TeamMember,
    ) -> WorkflowResult<()> {
        self.teams
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .entry((tenant.clone(), team.clone()))
            .or_default()
            .push(member);
        Ok(())
    }

    /// Record a RACI assignment against a scope.
    pub fn add_raci(
        &self,
        tenant: &TenantId,
        scope: &ScopeRef,
        assignment: RaciAssignment,
    ) -> WorkflowResult<()> {
        self.raci
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .entry((tenant.clone(), scope.clone()))
            .or_default()
            .push(assignment);
        Ok(())
    }

    /// Set the tenant's default team.
    pub fn set_fallback_team(&self, tenant: &TenantId, team: TeamId) -> WorkflowResult<()> {
        self.fallback
            .write()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .insert(tenant.clone(), team);
        Ok(())
    }
}

impl Directory for InMemoryDirectory {
    fn user_roles(&self, tenant: &TenantId, actor: &ActorId) -> WorkflowResult<Vec<RoleAssignment>> {
        Ok(self
            .user_roles
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .get(&(tenant.clone(), actor.clone()))
            .cloned()
            .unwrap_or_default())
    }

    fn team_members(&self, tenant: &TenantId, team: &TeamId) -> WorkflowResult<Vec<TeamMember>> {
        Ok(self
            .teams
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .get(&(tenant.clone(), team.clone()))
            .cloned()
            .unwrap_or_default())
    }

    fn raci_for_scope(
        &self,
        tenant: &TenantId,
        scope: &ScopeRef,
    ) -> WorkflowResult<Vec<RaciAssignment>> {
        Ok(self
            .raci
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .get(&(tenant.clone(), scope.clone()))
            .cloned()
            .unwrap_or_default())
    }

    fn fallback_team(&self, tenant: &TenantId) -> WorkflowResult<Option<TeamId>> {
        Ok(self
            .fallback
            .read()
            .map_err(|_| WorkflowError::LockPoisoned)?
            .get(tenant)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_types::RaciRole;

    #[test]
    fn roles_scoped_per_tenant_and_user() {
        let directory = InMemoryDirectory::new();
        let tenant = TenantId::new("t1");
        let alice = ActorId::new("alice");
        directory
            .grant_role(&tenant, &alice, RoleCode::new("reviewer"), Utc::now())
            .unwrap();

        let roles = directory.user_roles(&tenant, &alice).unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role_code, RoleCode::new("reviewer"));

        let other = directory
            .user_roles(&TenantId::new("t2"), &alice)
            .unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn active_membership_check_ignores_inactive_members() {
        let directory = InMemoryDirectory::new();
        let tenant = TenantId::new("t1");
        let team = TeamId::new("grc");
        let bob = ActorId::new("bob");
        let carol = ActorId::new("carol");
        directory
            .add_team_member(&tenant, &team, TeamMember::new(bob.clone()))
            .unwrap();
        directory
            .add_team_member(&tenant, &team, TeamMember::new(carol.clone()).inactive())
            .unwrap();

        assert!(directory.is_active_member(&tenant, &team, &bob).unwrap());
        assert!(!directory.is_active_member(&tenant, &team, &carol).unwrap());
    }

    #[test]
    fn raci_keyed_by_scope() {
        let directory = InMemoryDirectory::new();
        let tenant = TenantId::new("t1");
        let scope = ScopeRef::new("risk", "r-42");
        directory
            .add_raci(
                &tenant,
                &scope,
                RaciAssignment::new(ActorId::new("dana"), RaciRole::Responsible),
            )
            .unwrap();

        assert_eq!(directory.raci_for_scope(&tenant, &scope).unwrap().len(), 1);
        assert!(directory
            .raci_for_scope(&tenant, &ScopeRef::new("risk", "r-43"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn fallback_team_is_optional() {
        let directory = InMemoryDirectory::new();
        let tenant = TenantId::new("t1");
        assert!(directory.fallback_team(&tenant).unwrap().is_none());

        directory
            .set_fallback_team(&tenant, TeamId::new("ops"))
            .unwrap();
        assert_eq!(
            directory.fallback_team(&tenant).unwrap(),
            Some(TeamId::new("ops"))
        );
    }
}
