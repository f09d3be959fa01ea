use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::{ApiError, SharedState};
use crate::access::{Action, authorize};
use crate::board::attachments::{content_type_for, sanitize_file_name};
use crate::board::auth::AuthUser;
use crate::board::ws::{WsMessage, broadcast_message};

#[derive(Deserialize)]
pub struct UploadParams {
    pub file_name: String,
}

pub(super) async fn list_attachments(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let attachments = state
        .db
        .call(move |db| {
            db.task_access(task_id, user_id)?;
            db.list_attachments(task_id)
        })
        .await?;
    Ok(Json(attachments))
}

/// Raw request body upload. The file name comes from `?file_name=`, the
/// content type from the request header or the file extension.
///
/// The file is written before the access check so that the check and the
/// row insert share one database call; a rejected upload removes its file.
pub(super) async fn upload_attachment(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = sanitize_file_name(&params.file_name);
    let declared = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let content_type = content_type_for(&file_name, declared);
    state.attachments.check_size(body.len())?;

    let user_id = user.id();
    let storage_key = state.attachments.save(&body).await?;
    let size = body.len() as i64;
    let key = storage_key.clone();
    let created = state
        .db
        .call(move |db| {
            let (_, board, role) = db.task_access(task_id, user_id)?;
            authorize(role, Action::ManageBoardContent)?;
            let attachment =
                db.create_attachment(task_id, &file_name, &content_type, size, &key, user_id)?;
            Ok((attachment, board))
        })
        .await;
    let (attachment, board) = match created {
        Ok(created) => created,
        Err(e) => {
            state.attachments.remove_all(&[storage_key]).await;
            return Err(e.into());
        }
    };
    tracing::info!(
        attachment_id = attachment.id,
        task_id,
        size = attachment.size,
        "attachment uploaded"
    );
    broadcast_message(
        &state.ws_tx,
        &WsMessage::AttachmentAdded {
            workspace_id: board.workspace_id,
            board_id: board.id,
            attachment: attachment.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(attachment)))
}

pub(super) async fn download_attachment(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let user_id = user.id();
    let (attachment, _, _, _) = state
        .db
        .call(move |db| db.attachment_access(id, user_id))
        .await?;
    let bytes = state.attachments.read(&attachment.storage_key).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_file_name(&attachment.file_name)
    );
    Response::builder()
        .header(header::CONTENT_TYPE, attachment.content_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from(bytes))
        .map_err(|e| ApiError::from(anyhow::Error::new(e)))
}

pub(super) async fn delete_attachment(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let (attachment, board) = state
        .db
        .call(move |db| {
            let (attachment, _, board, role) = db.attachment_access(id, user_id)?;
            authorize(role, Action::ManageBoardContent)?;
            db.delete_attachment(id)?;
            Ok((attachment, board))
        })
        .await?;
    state
        .attachments
        .remove_all(std::slice::from_ref(&attachment.storage_key))
        .await;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::AttachmentDeleted {
            workspace_id: board.workspace_id,
            board_id: board.id,
            task_id: attachment.task_id,
            attachment_id: id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::access::Role;
    use crate::board::models::Task;

    fn seeded_task(t: &TestApp, seeded: &Seeded) -> Task {
        let db = t.state.db.lock_sync().unwrap();
        db.create_task(&t.state.ordering, seeded.todo.id, "Spec", "", None, None)
            .unwrap()
    }

    async fn upload(t: &TestApp, token: &str, task_id: i64, name: &str, bytes: &[u8]) -> Response {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/tasks/{}/attachments?file_name={}", task_id, name))
            .header("authorization", format!("Bearer {}", token))
            .body(Body::from(bytes.to_vec()))
            .unwrap();
        t.app.clone().oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_upload_download_delete() {
        let t = test_app();
        let seeded = t.workspace();
        let task = seeded_task(&t, &seeded);

        let response = upload(&t, &seeded.token, task.id, "notes.txt", b"hello board").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let attachment: Value = body_json(response).await;
        assert_eq!(attachment["file_name"], "notes.txt");
        assert_eq!(attachment["content_type"], "text/plain");
        assert_eq!(attachment["size"], 11);
        assert!(attachment.get("storage_key").is_none());

        let uri = format!("/api/attachments/{}", attachment["id"]);
        let response = t.send("GET", &uri, Some(&seeded.token), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"notes.txt\""
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello board");

        let response = t
            .send("GET", &format!("/api/tasks/{}/attachments", task.id), Some(&seeded.token), None)
            .await;
        let listed: Vec<Value> = body_json(response).await;
        assert_eq!(listed.len(), 1);

        let response = t.send("DELETE", &uri, Some(&seeded.token), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = t.send("GET", &uri, Some(&seeded.token), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_limits() {
        let t = test_app();
        let seeded = t.workspace();
        let task = seeded_task(&t, &seeded);

        let response = upload(&t, &seeded.token, task.id, "big.bin", &[0u8; 65]).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let response = upload(&t, &seeded.token, task.id, "empty.txt", b"").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    fn stored_files(t: &TestApp) -> usize {
        std::fs::read_dir(t.state.attachments.dir()).unwrap().count()
    }

    #[tokio::test]
    async fn test_rejected_upload_leaves_no_file() {
        let t = test_app();
        let seeded = t.workspace();
        let task = seeded_task(&t, &seeded);
        let (member, member_token) =
            t.member(seeded.workspace.id, "member@example.com", Role::Member);

        let response = upload(&t, &member_token, task.id, "draft.txt", b"first").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(stored_files(&t), 1);

        {
            let db = t.state.db.lock_sync().unwrap();
            db.set_member_role(seeded.workspace.id, member.id, Role::Guest)
                .unwrap();
            db.add_board_guest(seeded.workspace.id, seeded.board.id, member.id)
                .unwrap();
        }
        let response = upload(&t, &member_token, task.id, "draft.txt", b"second").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(stored_files(&t), 1);

        {
            let db = t.state.db.lock_sync().unwrap();
            assert!(db.remove_member(seeded.workspace.id, member.id).unwrap());
        }
        let response = upload(&t, &member_token, task.id, "draft.txt", b"third").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(stored_files(&t), 1);

        let response = t
            .send("GET", &format!("/api/tasks/{}/attachments", task.id), Some(&seeded.token), None)
            .await;
        let listed: Vec<Value> = body_json(response).await;
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_guest_can_download_but_not_upload() {
        let t = test_app();
        let seeded = t.workspace();
        let task = seeded_task(&t, &seeded);
        let response = upload(&t, &seeded.token, task.id, "plan.md", b"# Plan").await;
        let attachment: Value = body_json(response).await;

        let (guest, guest_token) = t.user("guest@example.com");
        {
            let db = t.state.db.lock_sync().unwrap();
            db.add_board_guest(seeded.workspace.id, seeded.board.id, guest.id)
                .unwrap();
        }

        let response = upload(&t, &guest_token, task.id, "evil.sh", b"rm -rf").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let uri = format!("/api/attachments/{}", attachment["id"]);
        let response = t.send("GET", &uri, Some(&guest_token), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = t.send("DELETE", &uri, Some(&guest_token), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let (_, member_token) = t.member(seeded.workspace.id, "member@example.com", Role::Member);
        let response = t.send("DELETE", &uri, Some(&member_token), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
