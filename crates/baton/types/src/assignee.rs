//! Assignee resolution values and directory snapshot records
//!
//! `AssigneeResolution` is what the routing chain returns: who should act,
//! which tier produced the answer, and where the candidate ranks. The
//! snapshot records (`TeamMember`, `RaciAssignment`, ...) are what the
//! directory collaborator hands the resolver; they are read-only for the
//! duration of one resolution call.

use crate::{ActorId, RoleCode, TeamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Assignee reference ───────────────────────────────────────────────

/// The target of an assignment: a specific user, or a whole team (the
/// fallback tier assigns the team itself rather than its members)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssigneeRef {
    User(ActorId),
    Team(TeamId),
}

impl AssigneeRef {
    pub fn as_user(&self) -> Option<&ActorId> {
        match self {
            Self::User(actor) => Some(actor),
            Self::Team(_) => None,
        }
    }

    pub fn as_team(&self) -> Option<&TeamId> {
        match self {
            Self::User(_) => None,
            Self::Team(team) => Some(team),
        }
    }
}

impl std::fmt::Display for AssigneeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(actor) => write!(f, "user:{}", actor),
            Self::Team(team) => write!(f, "team:{}", team),
        }
    }
}

// ── Resolution source ────────────────────────────────────────────────

/// Which tier of the precedence chain produced a candidate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssigneeSource {
    /// The record's owner holds the required role
    DirectOwner,
    /// A member of the record's owning team holds the required role
    TeamRole,
    /// A Responsible/Accountable assignment for the record's scope
    Raci,
    /// The tenant's default team for unresolved routing
    Fallback,
    /// An operator reassignment outside the precedence chain
    Manual,
}

// ── Assignee resolution ──────────────────────────────────────────────

/// One candidate produced by the resolution chain
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssigneeResolution {
    /// Who should act
    pub assignee: AssigneeRef,
    /// The role the candidate was matched on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_code: Option<RoleCode>,
    /// The tier that produced this candidate
    pub source: AssigneeSource,
    /// Exactly one candidate of a resolution is primary
    pub is_primary: bool,
    /// Rank ordinal; lower acts first (1 primary, 5 secondary, 10 fallback)
    pub priority: u8,
}

impl AssigneeResolution {
    pub fn new(assignee: AssigneeRef, source: AssigneeSource) -> Self {
        Self {
            assignee,
            role_code: None,
            source,
            is_primary: false,
            priority: 5,
        }
    }

    pub fn with_role(mut self, role: RoleCode) -> Self {
        self.role_code = Some(role);
        self
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.priority = 1;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

// ── Directory snapshots ──────────────────────────────────────────────

/// A role held by a user, with the date it was granted (the TeamRole
/// tie-break orders by this, earliest first)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role_code: RoleCode,
    pub assigned_at: DateTime<Utc>,
}

impl RoleAssignment {
    pub fn new(role_code: RoleCode, assigned_at: DateTime<Utc>) -> Self {
        Self {
            role_code,
            assigned_at,
        }
    }
}

/// A member of a team as reported by the directory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamMember {
    pub actor: ActorId,
    /// Inactive members never receive assignments
    pub active: bool,
    pub roles: Vec<RoleAssignment>,
}

impl TeamMember {
    pub fn new(actor: ActorId) -> Self {
        Self {
            actor,
            active: true,
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role_code: RoleCode, assigned_at: DateTime<Utc>) -> Self {
        self.roles.push(RoleAssignment::new(role_code, assigned_at));
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// The member's assignment for a role, if held
    pub fn role(&self, code: &RoleCode) -> Option<&RoleAssignment> {
        self.roles.iter().find(|r| &r.role_code == code)
    }

    /// Earliest assignment date across held roles
    pub fn earliest_assignment(&self) -> Option<DateTime<Utc>> {
        self.roles.iter().map(|r| r.assigned_at).min()
    }
}

/// Responsible/Accountable/Consulted/Informed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaciRole {
    Responsible,
    Accountable,
    Consulted,
    Informed,
}

/// One RACI entry for a scope
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RaciAssignment {
    pub actor: ActorId,
    pub raci: RaciRole,
}

impl RaciAssignment {
    pub fn new(actor: ActorId, raci: RaciRole) -> Self {
        Self { actor, raci }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_member_role_lookup() {
        let when = Utc::now();
        let member = TeamMember::new(ActorId::new("actor-1"))
            .with_role(RoleCode::new("Reviewer"), when)
            .with_role(RoleCode::new("Analyst"), when - chrono::Duration::days(30));

        assert!(member.role(&RoleCode::new("Reviewer")).is_some());
        assert!(member.role(&RoleCode::new("Admin")).is_none());
        assert_eq!(
            member.earliest_assignment(),
            Some(when - chrono::Duration::days(30))
        );
    }

    #[test]
    fn test_primary_builder_sets_rank() {
        let res = AssigneeResolution::new(
            AssigneeRef::User(ActorId::new("actor-1")),
            AssigneeSource::DirectOwner,
        )
        .primary();
        assert!(res.is_primary);
        assert_eq!(res.priority, 1);
    }
}
