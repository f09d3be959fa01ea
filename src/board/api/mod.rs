//! HTTP/JSON API.
//!
//! Handlers authenticate through the [`AuthUser`](super::auth::AuthUser)
//! extractor, resolve the caller's role and check it against the access
//! policy inside the same `DbHandle::call` that performs the write, then
//! broadcast a [`WsMessage`](super::ws::WsMessage) on success.

mod attachments;
mod auth;
mod boards;
mod tasks;
mod workspaces;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
};
use tokio::sync::broadcast;

use super::attachments::AttachmentStore;
use super::db::DbHandle;
use crate::config::AuthSection;
use crate::errors::BoardError;
use crate::ordering::WeightedOrdering;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<String>,
    pub ordering: WeightedOrdering,
    pub attachments: AttachmentStore,
    pub auth: AuthSection,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn internal(err: &anyhow::Error) -> Self {
        tracing::error!("request failed: {:#}", err);
        ApiError::Internal("Internal server error".into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::Conflict(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::Internal(msg) => msg,
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        let message = err.to_string();
        match err {
            BoardError::WorkspaceNotFound { .. }
            | BoardError::BoardNotFound { .. }
            | BoardError::StatusNotFound { .. }
            | BoardError::TaskNotFound { .. }
            | BoardError::TagNotFound { .. }
            | BoardError::AttachmentNotFound { .. }
            | BoardError::MemberNotFound { .. }
            | BoardError::UserNotFound { .. } => ApiError::NotFound(message),
            BoardError::Forbidden { .. } => ApiError::Forbidden(message),
            BoardError::Conflict(_) => ApiError::Conflict(message),
            BoardError::BadRequest(_) => ApiError::BadRequest(message),
            BoardError::InvalidCredentials | BoardError::InvalidToken => {
                ApiError::Unauthorized(message)
            }
            BoardError::PayloadTooLarge { .. } => ApiError::PayloadTooLarge(message),
            BoardError::LockPoisoned => ApiError::internal(&anyhow::anyhow!(message)),
            BoardError::Other(inner) => ApiError::internal(&inner),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<BoardError>() {
            Ok(board_err) => board_err.into(),
            Err(err) => ApiError::internal(&err),
        }
    }
}

/// Trimmed, non-empty value of a required text field.
pub(crate) fn required(field: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(value.to_string())
}

/// Like [`required`] for fields that may be omitted from a patch.
pub(crate) fn optional_required(field: &str, value: Option<String>) -> Result<Option<String>, ApiError> {
    value.map(|v| required(field, &v)).transpose()
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route("/api/me", get(auth::me))
        .route(
            "/api/workspaces",
            get(workspaces::list_workspaces).post(workspaces::create_workspace),
        )
        .route(
            "/api/workspaces/{id}",
            get(workspaces::get_workspace)
                .patch(workspaces::update_workspace)
                .delete(workspaces::delete_workspace),
        )
        .route(
            "/api/workspaces/{id}/members",
            get(workspaces::list_members).post(workspaces::add_member),
        )
        .route(
            "/api/workspaces/{id}/members/{user_id}",
            delete(workspaces::remove_member),
        )
        .route(
            "/api/workspaces/{id}/members/{user_id}/admin",
            post(workspaces::grant_admin).delete(workspaces::revoke_admin),
        )
        .route(
            "/api/workspaces/{id}/boards",
            get(boards::list_boards).post(boards::create_board),
        )
        .route(
            "/api/boards/{id}",
            get(boards::get_board)
                .patch(boards::update_board)
                .delete(boards::delete_board),
        )
        .route(
            "/api/boards/{id}/guests",
            get(boards::list_guests).post(boards::add_guest),
        )
        .route(
            "/api/boards/{id}/guests/{user_id}",
            delete(boards::remove_guest),
        )
        .route("/api/boards/{id}/statuses", post(boards::create_status))
        .route("/api/boards/{id}/statuses/order", put(boards::reorder_statuses))
        .route(
            "/api/statuses/{id}",
            patch(boards::rename_status).delete(boards::delete_status),
        )
        .route("/api/statuses/{id}/move", patch(boards::move_status))
        .route(
            "/api/boards/{id}/tags",
            get(boards::list_tags).post(boards::create_tag),
        )
        .route("/api/tags/{id}", delete(boards::delete_tag))
        .route("/api/statuses/{id}/tasks", post(tasks::create_task))
        .route("/api/statuses/{id}/tasks/order", put(tasks::reorder_tasks))
        .route(
            "/api/tasks/{id}",
            get(tasks::get_task)
                .patch(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/api/tasks/{id}/move", patch(tasks::move_task))
        .route(
            "/api/tasks/{id}/tags/{tag_id}",
            put(tasks::add_task_tag).delete(tasks::remove_task_tag),
        )
        .route(
            "/api/tasks/{id}/attachments",
            get(attachments::list_attachments).post(attachments::upload_attachment),
        )
        .route(
            "/api/attachments/{id}",
            get(attachments::download_attachment).delete(attachments::delete_attachment),
        )
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_health_check() {
        let t = test_app();
        let response = t.send("GET", "/health", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_missing_or_bad_token_is_unauthorized() {
        let t = test_app();
        let response = t.send("GET", "/api/workspaces", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = t.send("GET", "/api/workspaces", Some("tb_nope"), None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("token"));
    }

    #[test]
    fn test_board_errors_map_to_status_codes() {
        let cases: Vec<(anyhow::Error, StatusCode)> = vec![
            (BoardError::BoardNotFound { id: 1 }.into(), StatusCode::NOT_FOUND),
            (
                BoardError::Forbidden {
                    action: "create_board",
                    role: crate::access::Role::Member,
                }
                .into(),
                StatusCode::FORBIDDEN,
            ),
            (BoardError::Conflict("dup".into()).into(), StatusCode::CONFLICT),
            (BoardError::BadRequest("bad".into()).into(), StatusCode::BAD_REQUEST),
            (BoardError::InvalidToken.into(), StatusCode::UNAUTHORIZED),
            (
                BoardError::PayloadTooLarge { size: 2, limit: 1 }.into(),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (anyhow::anyhow!("disk on fire"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_context_does_not_hide_board_error() {
        let err = anyhow::Error::from(BoardError::TaskNotFound { id: 3 }).context("Failed to move task");
        assert_eq!(ApiError::from(err).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_internal_errors_do_not_leak_details() {
        let err = ApiError::from(anyhow::anyhow!("SQLITE_CORRUPT at /secret/path"));
        match err {
            ApiError::Internal(msg) => assert!(!msg.contains("secret")),
            other => panic!("Expected Internal, got {other:?}"),
        }
    }

    #[test]
    fn test_required_trims_and_rejects_blank() {
        assert_eq!(required("name", "  Roadmap ").unwrap(), "Roadmap");
        assert!(matches!(required("name", "   "), Err(ApiError::BadRequest(_))));
        assert_eq!(optional_required("name", None).unwrap(), None);
    }
}
