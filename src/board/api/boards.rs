use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::{ApiError, SharedState, optional_required, required};
use crate::access::{Action, authorize};
use crate::board::auth::AuthUser;
use crate::board::db::AttachmentScope;
use crate::board::ws::{WsMessage, broadcast_message};
use crate::errors::BoardError;
use crate::ordering::Position;

const DEFAULT_TAG_COLOR: &str = "#9e9e9e";

#[derive(Deserialize)]
pub struct CreateBoardRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateBoardRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct GuestRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct MoveStatusRequest {
    pub position: Position<i64>,
}

/// Full ordering of a parent's children, first to last.
#[derive(Deserialize)]
pub struct ReorderRequest {
    pub ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
    pub color: Option<String>,
}

// ── Boards ────────────────────────────────────────────────────────────

pub(super) async fn list_boards(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(workspace_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let boards = state
        .db
        .call(move |db| {
            let (_, role) = db.workspace_access(workspace_id, user_id)?;
            db.list_boards(workspace_id, user_id, role)
        })
        .await?;
    Ok(Json(boards))
}

pub(super) async fn create_board(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(workspace_id): Path<i64>,
    Json(req): Json<CreateBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = required("name", &req.name)?;
    let description = req.description.unwrap_or_default();
    let user_id = user.id();
    let board = state
        .db
        .call(move |db| {
            let (_, role) = db.workspace_access(workspace_id, user_id)?;
            authorize(role, Action::CreateBoard)?;
            db.create_board(workspace_id, &name, &description)
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::BoardCreated {
            workspace_id,
            board_id: board.id,
            board: board.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(board)))
}

pub(super) async fn get_board(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let view = state
        .db
        .call(move |db| {
            let (board, role) = db.board_access(id, user_id)?;
            db.board_view(board, role)
        })
        .await?;
    Ok(Json(view))
}

pub(super) async fn update_board(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = optional_required("name", req.name)?;
    let description = req.description;
    let user_id = user.id();
    let board = state
        .db
        .call(move |db| {
            let (_, role) = db.board_access(id, user_id)?;
            authorize(role, Action::UpdateBoard)?;
            db.update_board(id, name.as_deref(), description.as_deref())
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::BoardUpdated {
            workspace_id: board.workspace_id,
            board_id: board.id,
            board: board.clone(),
        },
    );
    Ok(Json(board))
}

pub(super) async fn delete_board(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let (workspace_id, keys) = state
        .db
        .call(move |db| {
            let (board, role) = db.board_access(id, user_id)?;
            authorize(role, Action::UpdateBoard)?;
            let keys = db.attachment_keys(AttachmentScope::Board(id))?;
            db.delete_board(id)?;
            Ok((board.workspace_id, keys))
        })
        .await?;
    state.attachments.remove_all(&keys).await;
    tracing::info!(board_id = id, user_id, "board deleted");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::BoardDeleted {
            workspace_id,
            board_id: id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

// ── Guests ────────────────────────────────────────────────────────────

pub(super) async fn list_guests(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let guests = state
        .db
        .call(move |db| {
            let (_, role) = db.board_access(id, user_id)?;
            authorize(role, Action::ManageGuests)?;
            db.list_board_guests(id)
        })
        .await?;
    Ok(Json(guests))
}

pub(super) async fn add_guest(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<GuestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let email = req.email;
    let (workspace_id, member) = state
        .db
        .call(move |db| {
            let (board, role) = db.board_access(id, user_id)?;
            authorize(role, Action::ManageGuests)?;
            let invitee = db
                .find_user_by_email(&email)?
                .ok_or_else(|| BoardError::UserNotFound { email: email.clone() })?;
            let member = db.add_board_guest(board.workspace_id, id, invitee.id)?;
            Ok((board.workspace_id, member))
        })
        .await?;
    tracing::info!(board_id = id, guest_id = member.user_id, by = user_id, "guest invited");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::GuestAdded {
            workspace_id,
            board_id: id,
            member: member.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(member)))
}

pub(super) async fn remove_guest(
    State(state): State<SharedState>,
    user: AuthUser,
    Path((id, guest_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let workspace_id = state
        .db
        .call(move |db| {
            let (board, role) = db.board_access(id, user_id)?;
            authorize(role, Action::ManageGuests)?;
            if !db.remove_board_guest(board.workspace_id, id, guest_id)? {
                return Err(BoardError::MemberNotFound {
                    workspace_id: board.workspace_id,
                    user_id: guest_id,
                }
                .into());
            }
            Ok(board.workspace_id)
        })
        .await?;
    tracing::info!(board_id = id, guest_id, by = user_id, "guest removed");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::GuestRemoved {
            workspace_id,
            board_id: id,
            user_id: guest_id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

// ── Statuses ──────────────────────────────────────────────────────────

pub(super) async fn create_status(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(board_id): Path<i64>,
    Json(req): Json<NameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = required("name", &req.name)?;
    let user_id = user.id();
    let ordering = state.ordering;
    let (workspace_id, status) = state
        .db
        .call(move |db| {
            let (board, role) = db.board_access(board_id, user_id)?;
            authorize(role, Action::ManageStatuses)?;
            let status = db.create_status(&ordering, board_id, &name)?;
            Ok((board.workspace_id, status))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::StatusCreated {
            workspace_id,
            board_id,
            status: status.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(status)))
}

pub(super) async fn reorder_statuses(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(board_id): Path<i64>,
    Json(req): Json<ReorderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let ordering = state.ordering;
    let (workspace_id, statuses) = state
        .db
        .call(move |db| {
            let (board, role) = db.board_access(board_id, user_id)?;
            authorize(role, Action::ManageStatuses)?;
            let statuses = db.reorder_statuses(&ordering, board_id, &req.ids)?;
            Ok((board.workspace_id, statuses))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::StatusesReordered {
            workspace_id,
            board_id,
            statuses: statuses.clone(),
        },
    );
    Ok(Json(statuses))
}

pub(super) async fn rename_status(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<NameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = required("name", &req.name)?;
    let user_id = user.id();
    let (workspace_id, status) = state
        .db
        .call(move |db| {
            let (_, board, role) = db.status_access(id, user_id)?;
            authorize(role, Action::ManageStatuses)?;
            let status = db.rename_status(id, &name)?;
            Ok((board.workspace_id, status))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::StatusUpdated {
            workspace_id,
            board_id: status.board_id,
            status: status.clone(),
        },
    );
    Ok(Json(status))
}

pub(super) async fn delete_status(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let (workspace_id, board_id, keys) = state
        .db
        .call(move |db| {
            let (_, board, role) = db.status_access(id, user_id)?;
            authorize(role, Action::ManageStatuses)?;
            let keys = db.attachment_keys(AttachmentScope::Status(id))?;
            db.delete_status(id)?;
            Ok((board.workspace_id, board.id, keys))
        })
        .await?;
    state.attachments.remove_all(&keys).await;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::StatusDeleted {
            workspace_id,
            board_id,
            status_id: id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn move_status(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<MoveStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let ordering = state.ordering;
    let (workspace_id, status) = state
        .db
        .call(move |db| {
            let (_, board, role) = db.status_access(id, user_id)?;
            authorize(role, Action::ManageStatuses)?;
            let status = db.move_status(&ordering, id, &req.position)?;
            Ok((board.workspace_id, status))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::StatusMoved {
            workspace_id,
            board_id: status.board_id,
            status: status.clone(),
        },
    );
    Ok(Json(status))
}

// ── Tags ──────────────────────────────────────────────────────────────

pub(super) async fn list_tags(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(board_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let tags = state
        .db
        .call(move |db| {
            db.board_access(board_id, user_id)?;
            db.list_tags(board_id)
        })
        .await?;
    Ok(Json(tags))
}

pub(super) async fn create_tag(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(board_id): Path<i64>,
    Json(req): Json<CreateTagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = required("name", &req.name)?;
    let color = match req.color {
        Some(color) => required("color", &color)?,
        None => DEFAULT_TAG_COLOR.to_string(),
    };
    let user_id = user.id();
    let (workspace_id, tag) = state
        .db
        .call(move |db| {
            let (board, role) = db.board_access(board_id, user_id)?;
            authorize(role, Action::ManageBoardContent)?;
            let tag = db.create_tag(board_id, &name, &color)?;
            Ok((board.workspace_id, tag))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TagCreated {
            workspace_id,
            board_id,
            tag: tag.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(tag)))
}

pub(super) async fn delete_tag(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let board = state
        .db
        .call(move |db| {
            let (_, board, role) = db.tag_access(id, user_id)?;
            authorize(role, Action::ManageBoardContent)?;
            db.delete_tag(id)?;
            Ok(board)
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TagDeleted {
            workspace_id: board.workspace_id,
            board_id: board.id,
            tag_id: id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}
