//! Role-based permission rules.
//!
//! Every rule is a pure predicate over the actor's role (and the target's
//! role where one is involved). No rule performs I/O or fails; absence of a
//! membership is handled by callers before a role ever reaches this module.

use super::role::Role;

/// Owners may remove anyone but another owner; admins may remove members
/// and guests.
pub fn can_delete_member(actor: Role, target: Role) -> bool {
    match actor {
        Role::Owner => target != Role::Owner,
        Role::Admin => matches!(target, Role::Member | Role::Guest),
        Role::Member | Role::Guest => false,
    }
}

pub fn can_manage_guests(actor: Role) -> bool {
    matches!(actor, Role::Owner | Role::Admin)
}

pub fn can_create_board(actor: Role) -> bool {
    matches!(actor, Role::Owner | Role::Admin)
}

pub fn can_update_board(actor: Role) -> bool {
    matches!(actor, Role::Owner | Role::Admin)
}

/// Tasks, tags and attachments.
pub fn can_manage_board_content(actor: Role) -> bool {
    actor != Role::Guest
}

pub fn can_add_member(actor: Role) -> bool {
    matches!(actor, Role::Owner | Role::Admin)
}

pub fn can_delete_workspace(actor: Role) -> bool {
    actor == Role::Owner
}

pub fn can_update_workspace(actor: Role) -> bool {
    actor == Role::Owner
}

pub fn can_revoke_admin_permission(actor: Role, target: Role) -> bool {
    actor == Role::Owner && target == Role::Admin
}

pub fn can_grant_admin_permission(actor: Role, target: Role) -> bool {
    actor == Role::Owner && target == Role::Member
}

pub fn can_manage_statuses(actor: Role) -> bool {
    actor != Role::Guest
}
