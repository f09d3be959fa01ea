use anyhow::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::NaiveDate;
use serde::Deserialize;

use super::boards::ReorderRequest;
use super::{ApiError, SharedState, optional_required, required};
use crate::access::{Action, authorize};
use crate::board::auth::AuthUser;
use crate::board::db::{AttachmentScope, BoardDb};
use crate::board::models::{Board, TaskUpdate};
use crate::board::ws::{WsMessage, broadcast_message};
use crate::errors::BoardError;
use crate::ordering::Position;

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Option<i64>,
    pub due_date: Option<String>,
}

/// `status_id` moves the task to another status of the same board; when
/// omitted the task is repositioned within its current status.
#[derive(Deserialize)]
pub struct MoveTaskRequest {
    pub status_id: Option<i64>,
    pub position: Position<i64>,
}

/// Due dates are calendar days, `YYYY-MM-DD`.
fn parse_due_date(value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| date.format("%Y-%m-%d").to_string())
        .map_err(|_| ApiError::BadRequest(format!("Invalid due date '{}', expected YYYY-MM-DD", value)))
}

/// Assignees must be able to see the board.
fn check_assignee(db: &BoardDb, board: &Board, assignee_id: Option<i64>) -> Result<()> {
    if let Some(assignee_id) = assignee_id {
        if db
            .effective_board_role(board.workspace_id, board.id, assignee_id)?
            .is_none()
        {
            return Err(BoardError::BadRequest(format!(
                "User {} has no access to board {}",
                assignee_id, board.id
            ))
            .into());
        }
    }
    Ok(())
}

pub(super) async fn create_task(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(status_id): Path<i64>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = required("title", &req.title)?;
    let description = req.description.unwrap_or_default();
    let due_date = req.due_date.as_deref().map(parse_due_date).transpose()?;
    let assignee_id = req.assignee_id;
    let user_id = user.id();
    let ordering = state.ordering;
    let (workspace_id, task) = state
        .db
        .call(move |db| {
            let (_, board, role) = db.status_access(status_id, user_id)?;
            authorize(role, Action::ManageBoardContent)?;
            check_assignee(db, &board, assignee_id)?;
            let task = db.create_task(
                &ordering,
                status_id,
                &title,
                &description,
                assignee_id,
                due_date.as_deref(),
            )?;
            Ok((board.workspace_id, task))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TaskCreated {
            workspace_id,
            board_id: task.board_id,
            task: task.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(task)))
}

pub(super) async fn reorder_tasks(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(status_id): Path<i64>,
    Json(req): Json<ReorderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let ordering = state.ordering;
    let (board, tasks) = state
        .db
        .call(move |db| {
            let (_, board, role) = db.status_access(status_id, user_id)?;
            authorize(role, Action::ManageBoardContent)?;
            let tasks = db.reorder_tasks(&ordering, status_id, &req.ids)?;
            Ok((board, tasks))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TasksReordered {
            workspace_id: board.workspace_id,
            board_id: board.id,
            status_id,
            tasks: tasks.clone(),
        },
    );
    Ok(Json(tasks))
}

pub(super) async fn get_task(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let (task, _, _) = state
        .db
        .call(move |db| db.task_access(id, user_id))
        .await?;
    Ok(Json(task))
}

pub(super) async fn update_task(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(mut update): Json<TaskUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    update.title = optional_required("title", update.title)?;
    update.due_date = match update.due_date.take() {
        Some(Some(due)) => Some(Some(parse_due_date(&due)?)),
        other => other,
    };
    let user_id = user.id();
    let (workspace_id, task) = state
        .db
        .call(move |db| {
            let (_, board, role) = db.task_access(id, user_id)?;
            authorize(role, Action::ManageBoardContent)?;
            if let Some(assignee_id) = update.assignee_id {
                check_assignee(db, &board, assignee_id)?;
            }
            let task = db.update_task(id, &update)?;
            Ok((board.workspace_id, task))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TaskUpdated {
            workspace_id,
            board_id: task.board_id,
            task: task.clone(),
        },
    );
    Ok(Json(task))
}

pub(super) async fn delete_task(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let (board, keys) = state
        .db
        .call(move |db| {
            let (_, board, role) = db.task_access(id, user_id)?;
            authorize(role, Action::ManageBoardContent)?;
            let keys = db.attachment_keys(AttachmentScope::Task(id))?;
            db.delete_task(id)?;
            Ok((board, keys))
        })
        .await?;
    state.attachments.remove_all(&keys).await;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TaskDeleted {
            workspace_id: board.workspace_id,
            board_id: board.id,
            task_id: id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn move_task(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<MoveTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let ordering = state.ordering;
    let (workspace_id, task, from_status_id) = state
        .db
        .call(move |db| {
            let (_, board, role) = db.task_access(id, user_id)?;
            authorize(role, Action::ManageBoardContent)?;
            let (task, from_status_id) = db.move_task(&ordering, id, req.status_id, &req.position)?;
            Ok((board.workspace_id, task, from_status_id))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TaskMoved {
            workspace_id,
            board_id: task.board_id,
            from_status_id,
            task: task.clone(),
        },
    );
    Ok(Json(task))
}

// ── Task tags ─────────────────────────────────────────────────────────

async fn change_task_tag(
    state: SharedState,
    user: AuthUser,
    id: i64,
    tag_id: i64,
    attach: bool,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let (workspace_id, task) = state
        .db
        .call(move |db| {
            let (_, board, role) = db.task_access(id, user_id)?;
            authorize(role, Action::ManageBoardContent)?;
            let task = if attach {
                db.add_task_tag(id, tag_id)?
            } else {
                db.remove_task_tag(id, tag_id)?;
                db.get_task(id)?.ok_or(BoardError::TaskNotFound { id })?
            };
            Ok((board.workspace_id, task))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TaskUpdated {
            workspace_id,
            board_id: task.board_id,
            task: task.clone(),
        },
    );
    Ok(Json(task))
}

pub(super) async fn add_task_tag(
    State(state): State<SharedState>,
    user: AuthUser,
    Path((id, tag_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    change_task_tag(state, user, id, tag_id, true).await
}

pub(super) async fn remove_task_tag(
    State(state): State<SharedState>,
    user: AuthUser,
    Path((id, tag_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    change_task_tag(state, user, id, tag_id, false).await
}
