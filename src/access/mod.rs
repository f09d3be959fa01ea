//! Access control for workspaces and boards.
//!
//! [`policy`] holds the rule table as pure predicates. This module adds the
//! two things request handlers need on top of it: an [`Action`] value naming
//! what is being attempted (so denials can be reported and logged), and
//! [`resolve_board_role`] which folds board-scoped guest access into the
//! workspace role.

pub mod policy;
pub mod role;

pub use role::Role;

use crate::errors::BoardError;

/// An operation guarded by the policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    DeleteMember { target: Role },
    ManageGuests,
    CreateBoard,
    UpdateBoard,
    ManageBoardContent,
    AddMember,
    DeleteWorkspace,
    UpdateWorkspace,
    RevokeAdminPermission { target: Role },
    GrantAdminPermission { target: Role },
    ManageStatuses,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeleteMember { .. } => "delete_member",
            Self::ManageGuests => "manage_guests",
            Self::CreateBoard => "create_board",
            Self::UpdateBoard => "update_board",
            Self::ManageBoardContent => "manage_board_content",
            Self::AddMember => "add_member",
            Self::DeleteWorkspace => "delete_workspace",
            Self::UpdateWorkspace => "update_workspace",
            Self::RevokeAdminPermission { .. } => "revoke_admin_permission",
            Self::GrantAdminPermission { .. } => "grant_admin_permission",
            Self::ManageStatuses => "manage_statuses",
        }
    }

    pub fn is_permitted(&self, actor: Role) -> bool {
        match *self {
            Self::DeleteMember { target } => policy::can_delete_member(actor, target),
            Self::ManageGuests => policy::can_manage_guests(actor),
            Self::CreateBoard => policy::can_create_board(actor),
            Self::UpdateBoard => policy::can_update_board(actor),
            Self::ManageBoardContent => policy::can_manage_board_content(actor),
            Self::AddMember => policy::can_add_member(actor),
            Self::DeleteWorkspace => policy::can_delete_workspace(actor),
            Self::UpdateWorkspace => policy::can_update_workspace(actor),
            Self::RevokeAdminPermission { target } => {
                policy::can_revoke_admin_permission(actor, target)
            }
            Self::GrantAdminPermission { target } => {
                policy::can_grant_admin_permission(actor, target)
            }
            Self::ManageStatuses => policy::can_manage_statuses(actor),
        }
    }
}

/// Enforce `action` for `actor`, logging and returning `Forbidden` on denial.
pub fn authorize(actor: Role, action: Action) -> Result<(), BoardError> {
    if action.is_permitted(actor) {
        return Ok(());
    }
    tracing::warn!(role = %actor, action = action.name(), "access denied");
    Err(BoardError::Forbidden {
        action: action.name(),
        role: actor,
    })
}

/// Effective role of a user on one board.
///
/// Non-members get `None`. Guests only reach boards they hold an access
/// grant for; every other role sees all boards of the workspace.
pub fn resolve_board_role(membership: Option<Role>, has_guest_access: bool) -> Option<Role> {
    match membership {
        Some(Role::Guest) if !has_guest_access => None,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_allows_permitted_action() {
        assert!(authorize(Role::Owner, Action::DeleteWorkspace).is_ok());
        assert!(authorize(Role::Member, Action::ManageBoardContent).is_ok());
    }

    #[test]
    fn test_authorize_reports_denied_action() {
        let err = authorize(Role::Guest, Action::ManageStatuses).unwrap_err();
        match err {
            BoardError::Forbidden { action, role } => {
                assert_eq!(action, "manage_statuses");
                assert_eq!(role, Role::Guest);
            }
            other => panic!("Expected Forbidden, got {other:?}"),
        }
    }

    #[test]
    fn test_action_targets_flow_into_policy() {
        let grant = Action::GrantAdminPermission {
            target: Role::Member,
        };
        let regrant = Action::GrantAdminPermission {
            target: Role::Admin,
        };
        assert!(grant.is_permitted(Role::Owner));
        assert!(!regrant.is_permitted(Role::Owner));
    }

    #[test]
    fn test_resolve_board_role() {
        assert_eq!(resolve_board_role(None, true), None);
        assert_eq!(resolve_board_role(Some(Role::Guest), false), None);
        assert_eq!(resolve_board_role(Some(Role::Guest), true), Some(Role::Guest));
        assert_eq!(resolve_board_role(Some(Role::Member), false), Some(Role::Member));
        assert_eq!(resolve_board_role(Some(Role::Owner), false), Some(Role::Owner));
    }
}
