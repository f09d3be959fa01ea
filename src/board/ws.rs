use std::collections::HashMap;
use std::time::Duration;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::api::{ApiError, SharedState};
use super::auth::{authenticate, bearer_token};
use super::db::DbHandle;
use super::models::*;
use crate::access::Role;
use crate::errors::BoardError;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    WorkspaceUpdated {
        workspace_id: i64,
        workspace: Workspace,
    },
    WorkspaceDeleted {
        workspace_id: i64,
        member_ids: Vec<i64>,
    },
    MemberAdded {
        workspace_id: i64,
        member: Member,
    },
    MemberUpdated {
        workspace_id: i64,
        member: Member,
    },
    MemberRemoved {
        workspace_id: i64,
        user_id: i64,
    },
    BoardCreated {
        workspace_id: i64,
        board_id: i64,
        board: Board,
    },
    BoardUpdated {
        workspace_id: i64,
        board_id: i64,
        board: Board,
    },
    BoardDeleted {
        workspace_id: i64,
        board_id: i64,
    },
    GuestAdded {
        workspace_id: i64,
        board_id: i64,
        member: Member,
    },
    GuestRemoved {
        workspace_id: i64,
        board_id: i64,
        user_id: i64,
    },
    StatusCreated {
        workspace_id: i64,
        board_id: i64,
        status: Status,
    },
    StatusUpdated {
        workspace_id: i64,
        board_id: i64,
        status: Status,
    },
    StatusMoved {
        workspace_id: i64,
        board_id: i64,
        status: Status,
    },
    StatusesReordered {
        workspace_id: i64,
        board_id: i64,
        statuses: Vec<Status>,
    },
    StatusDeleted {
        workspace_id: i64,
        board_id: i64,
        status_id: i64,
    },
    TaskCreated {
        workspace_id: i64,
        board_id: i64,
        task: Task,
    },
    TaskUpdated {
        workspace_id: i64,
        board_id: i64,
        task: Task,
    },
    TaskMoved {
        workspace_id: i64,
        board_id: i64,
        from_status_id: i64,
        task: Task,
    },
    TasksReordered {
        workspace_id: i64,
        board_id: i64,
        status_id: i64,
        tasks: Vec<Task>,
    },
    TaskDeleted {
        workspace_id: i64,
        board_id: i64,
        task_id: i64,
    },
    TagCreated {
        workspace_id: i64,
        board_id: i64,
        tag: Tag,
    },
    TagDeleted {
        workspace_id: i64,
        board_id: i64,
        tag_id: i64,
    },
    AttachmentAdded {
        workspace_id: i64,
        board_id: i64,
        attachment: Attachment,
    },
    AttachmentDeleted {
        workspace_id: i64,
        board_id: i64,
        task_id: i64,
        attachment_id: i64,
    },
}

/// Which subscribers may see a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    /// Non-guest members of the workspace.
    Workspace(i64),
    /// Everyone with access to the board, guests with a grant included.
    Board { workspace_id: i64, board_id: i64 },
}

impl WsMessage {
    pub fn audience(&self) -> Audience {
        use WsMessage::*;
        match *self {
            WorkspaceUpdated { workspace_id, .. }
            | WorkspaceDeleted { workspace_id, .. }
            | MemberAdded { workspace_id, .. }
            | MemberUpdated { workspace_id, .. }
            | MemberRemoved { workspace_id, .. } => Audience::Workspace(workspace_id),
            BoardCreated { workspace_id, board_id, .. }
            | BoardUpdated { workspace_id, board_id, .. }
            | BoardDeleted { workspace_id, board_id }
            | GuestAdded { workspace_id, board_id, .. }
            | GuestRemoved { workspace_id, board_id, .. }
            | StatusCreated { workspace_id, board_id, .. }
            | StatusUpdated { workspace_id, board_id, .. }
            | StatusMoved { workspace_id, board_id, .. }
            | StatusesReordered { workspace_id, board_id, .. }
            | StatusDeleted { workspace_id, board_id, .. }
            | TaskCreated { workspace_id, board_id, .. }
            | TaskUpdated { workspace_id, board_id, .. }
            | TaskMoved { workspace_id, board_id, .. }
            | TasksReordered { workspace_id, board_id, .. }
            | TaskDeleted { workspace_id, board_id, .. }
            | TagCreated { workspace_id, board_id, .. }
            | TagDeleted { workspace_id, board_id, .. }
            | AttachmentAdded { workspace_id, board_id, .. }
            | AttachmentDeleted { workspace_id, board_id, .. } => Audience::Board {
                workspace_id,
                board_id,
            },
        }
    }

    /// Messages meant for one user regardless of their current access,
    /// which the change itself may just have revoked.
    fn addressed_to(&self, user_id: i64) -> bool {
        match self {
            WsMessage::WorkspaceDeleted { member_ids, .. } => member_ids.contains(&user_id),
            WsMessage::MemberRemoved { user_id: removed, .. }
            | WsMessage::GuestRemoved { user_id: removed, .. } => *removed == user_id,
            _ => false,
        }
    }

    /// Messages after which cached visibility decisions may be stale.
    fn changes_access(&self) -> bool {
        matches!(
            self,
            WsMessage::WorkspaceDeleted { .. }
                | WsMessage::MemberAdded { .. }
                | WsMessage::MemberUpdated { .. }
                | WsMessage::MemberRemoved { .. }
                | WsMessage::BoardDeleted { .. }
                | WsMessage::GuestAdded { .. }
                | WsMessage::GuestRemoved { .. }
        )
    }
}

// ── Per-connection filtering ─────────────────────────────────────────

/// Decides which broadcasts one subscriber receives, caching the answer
/// per audience until a membership change goes by.
struct Visibility {
    db: DbHandle,
    user_id: i64,
    cache: HashMap<Audience, bool>,
}

impl Visibility {
    fn new(db: DbHandle, user_id: i64) -> Self {
        Self {
            db,
            user_id,
            cache: HashMap::new(),
        }
    }

    async fn allows(&mut self, raw: &str) -> bool {
        let msg: WsMessage = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable broadcast");
                return false;
            }
        };
        if msg.changes_access() {
            self.cache.clear();
        }
        if msg.addressed_to(self.user_id) {
            return true;
        }
        let audience = msg.audience();
        if let Some(visible) = self.cache.get(&audience) {
            return *visible;
        }
        let visible = self.lookup(audience).await;
        self.cache.insert(audience, visible);
        visible
    }

    async fn lookup(&self, audience: Audience) -> bool {
        let user_id = self.user_id;
        let result = self
            .db
            .call(move |db| match audience {
                Audience::Workspace(workspace_id) => Ok(matches!(
                    db.member_role(workspace_id, user_id)?,
                    Some(role) if role != Role::Guest
                )),
                Audience::Board {
                    workspace_id,
                    board_id,
                } => Ok(db
                    .effective_board_role(workspace_id, board_id, user_id)?
                    .is_some()),
            })
            .await;
        match result {
            Ok(visible) => visible,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "visibility lookup failed");
                false
            }
        }
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the access
/// token may come from `?token=` as well as `Authorization`.
fn socket_token(params: &WsParams, headers: &HeaderMap) -> Option<String> {
    params.token.clone().filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string)
    })
}

async fn socket_user(state: &SharedState, token: Option<String>) -> Result<User, ApiError> {
    let token = token.ok_or_else(|| ApiError::Unauthorized("Missing access token".into()))?;
    let user = state.db.call(move |db| authenticate(db, &token)).await?;
    Ok(user)
}

pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let token = socket_token(&params, &headers);
    let user = socket_user(&state, token.clone()).await?;
    let token = token.unwrap_or_default();
    tracing::debug!(user_id = user.id, "websocket connected");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user.id, token)))
}

async fn handle_socket(socket: WebSocket, state: SharedState, user_id: i64, access_token: String) {
    let (sender, receiver) = socket.split();
    let rx = state.ws_tx.subscribe();
    let visibility = Visibility::new(state.db.clone(), user_id);
    run_socket_loop(sender, receiver, rx, visibility, access_token).await;
    tracing::debug!(user_id, "websocket closed");
}

/// Whether `access_token` still names a live session of `user_id`.
async fn session_live(db: &DbHandle, user_id: i64, access_token: &str) -> bool {
    let token = access_token.to_string();
    match db.call(move |db| authenticate(db, &token)).await {
        Ok(user) => user.id == user_id,
        Err(e) => {
            if !matches!(e.downcast_ref::<BoardError>(), Some(BoardError::InvalidToken)) {
                tracing::warn!(user_id, error = %e, "websocket session check failed");
            }
            false
        }
    }
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards the broadcasts this subscriber may see, answers client frames,
/// and pings every [`PING_INTERVAL`]. If no Pong arrives within
/// [`PONG_TIMEOUT`] the connection is considered dead and the loop exits.
/// Each ping first re-checks the access token, so a socket does not outlive
/// its session.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
    mut visibility: Visibility,
    access_token: String,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(user_id = visibility.user_id, "websocket pong timeout");
                    break;
                }
                if !session_live(&visibility.db, visibility.user_id, &access_token).await {
                    tracing::debug!(user_id = visibility.user_id, "websocket session ended");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if !visibility.allows(&msg).await {
                            continue;
                        }
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "websocket subscriber lagged");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to all connected WebSocket clients.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize WsMessage");
        }
    }
}
