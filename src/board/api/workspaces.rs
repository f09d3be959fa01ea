use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::{ApiError, SharedState, optional_required, required};
use crate::access::{Action, Role, authorize};
use crate::board::auth::AuthUser;
use crate::board::db::AttachmentScope;
use crate::board::models::WorkspaceSummary;
use crate::board::ws::{WsMessage, broadcast_message};
use crate::errors::BoardError;

#[derive(Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateWorkspaceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    pub role: Option<Role>,
}

pub(super) async fn list_workspaces(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let workspaces = state
        .db
        .call(move |db| db.list_workspaces_for_user(user_id))
        .await?;
    Ok(Json(workspaces))
}

pub(super) async fn create_workspace(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = required("name", &req.name)?;
    let description = req.description.unwrap_or_default();
    let user_id = user.id();
    let workspace = state
        .db
        .call(move |db| db.create_workspace(user_id, &name, &description))
        .await?;
    tracing::info!(workspace_id = workspace.id, user_id, "workspace created");
    Ok((
        StatusCode::CREATED,
        Json(WorkspaceSummary {
            workspace,
            role: Role::Owner,
        }),
    ))
}

pub(super) async fn get_workspace(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let (workspace, role) = state
        .db
        .call(move |db| db.workspace_access(id, user_id))
        .await?;
    Ok(Json(WorkspaceSummary { workspace, role }))
}

pub(super) async fn update_workspace(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateWorkspaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = optional_required("name", req.name)?;
    let description = req.description;
    let user_id = user.id();
    let workspace = state
        .db
        .call(move |db| {
            let (_, role) = db.workspace_access(id, user_id)?;
            authorize(role, Action::UpdateWorkspace)?;
            db.update_workspace(id, name.as_deref(), description.as_deref())
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::WorkspaceUpdated {
            workspace_id: id,
            workspace: workspace.clone(),
        },
    );
    Ok(Json(workspace))
}

pub(super) async fn delete_workspace(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let (keys, member_ids) = state
        .db
        .call(move |db| {
            let (_, role) = db.workspace_access(id, user_id)?;
            authorize(role, Action::DeleteWorkspace)?;
            let keys = db.attachment_keys(AttachmentScope::Workspace(id))?;
            let member_ids = db.list_members(id)?.into_iter().map(|m| m.user_id).collect::<Vec<_>>();
            db.delete_workspace(id)?;
            Ok((keys, member_ids))
        })
        .await?;
    state.attachments.remove_all(&keys).await;
    tracing::info!(workspace_id = id, user_id, "workspace deleted");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::WorkspaceDeleted {
            workspace_id: id,
            member_ids,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

// ── Members ───────────────────────────────────────────────────────────

pub(super) async fn list_members(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let members = state
        .db
        .call(move |db| {
            let (_, role) = db.workspace_access(id, user_id)?;
            if role == Role::Guest {
                return Err(BoardError::Forbidden {
                    action: "list_members",
                    role,
                }
                .into());
            }
            db.list_members(id)
        })
        .await?;
    Ok(Json(members))
}

/// Add a registered user by email. New members join as `member`; joining
/// as `admin` additionally requires the right to grant admin.
pub(super) async fn add_member(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new_role = req.role.unwrap_or(Role::Member);
    if matches!(new_role, Role::Owner | Role::Guest) {
        return Err(ApiError::BadRequest(format!(
            "Members cannot be added as {}; guests are invited per board",
            new_role
        )));
    }
    let email = req.email;
    let user_id = user.id();
    let member = state
        .db
        .call(move |db| {
            let (_, role) = db.workspace_access(id, user_id)?;
            authorize(role, Action::AddMember)?;
            if new_role == Role::Admin {
                authorize(
                    role,
                    Action::GrantAdminPermission {
                        target: Role::Member,
                    },
                )?;
            }
            let invitee = db
                .find_user_by_email(&email)?
                .ok_or_else(|| BoardError::UserNotFound { email: email.clone() })?;
            db.add_member(id, invitee.id, new_role)
        })
        .await?;
    tracing::info!(workspace_id = id, member_id = member.user_id, role = %member.role, "member added");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::MemberAdded {
            workspace_id: id,
            member: member.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(member)))
}

/// Remove a member. Anyone but the owner may leave on their own; removing
/// someone else is subject to the delete-member rule.
pub(super) async fn remove_member(
    State(state): State<SharedState>,
    user: AuthUser,
    Path((id, member_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    state
        .db
        .call(move |db| {
            let (_, role) = db.workspace_access(id, user_id)?;
            let target = db
                .member_role(id, member_id)?
                .ok_or(BoardError::MemberNotFound {
                    workspace_id: id,
                    user_id: member_id,
                })?;
            let leaving = member_id == user_id && role != Role::Owner;
            if !leaving {
                authorize(role, Action::DeleteMember { target })?;
            }
            db.remove_member(id, member_id)
        })
        .await?;
    tracing::info!(workspace_id = id, member_id, by = user_id, "member removed");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::MemberRemoved {
            workspace_id: id,
            user_id: member_id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn change_admin(
    state: SharedState,
    user: AuthUser,
    id: i64,
    member_id: i64,
    grant: bool,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let member = state
        .db
        .call(move |db| {
            let (_, role) = db.workspace_access(id, user_id)?;
            let target = db
                .member_role(id, member_id)?
                .ok_or(BoardError::MemberNotFound {
                    workspace_id: id,
                    user_id: member_id,
                })?;
            let (action, new_role) = if grant {
                (Action::GrantAdminPermission { target }, Role::Admin)
            } else {
                (Action::RevokeAdminPermission { target }, Role::Member)
            };
            authorize(role, action)?;
            db.set_member_role(id, member_id, new_role)
        })
        .await?;
    tracing::info!(workspace_id = id, member_id, role = %member.role, by = user_id, "member role changed");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::MemberUpdated {
            workspace_id: id,
            member: member.clone(),
        },
    );
    Ok(Json(member))
}

pub(super) async fn grant_admin(
    State(state): State<SharedState>,
    user: AuthUser,
    Path((id, member_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    change_admin(state, user, id, member_id, true).await
}

pub(super) async fn revoke_admin(
    State(state): State<SharedState>,
    user: AuthUser,
    Path((id, member_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    change_admin(state, user, id, member_id, false).await
}
