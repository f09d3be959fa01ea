use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use chrono::Utc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::attachments::AttachmentStore;
use super::db::{BoardDb, DbHandle};
use super::ws;
use crate::config::BoardConfig;

/// Floor for the request body limit so JSON requests are unaffected by a
/// small attachment limit.
const JSON_BODY_LIMIT: usize = 2 * 1024 * 1024;

const BROADCAST_CAPACITY: usize = 256;

const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.attachments.max_bytes().max(JSON_BODY_LIMIT);

    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the database and attachment directory named by `config`.
pub async fn build_state(config: &BoardConfig) -> Result<SharedState> {
    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = BoardDb::new(&config.database.path).context("Failed to initialize board database")?;

    let attachments = AttachmentStore::new(config.attachments.dir.clone(), config.attachments.max_bytes);
    attachments.ensure_dir().await?;

    let (ws_tx, _rx) = broadcast::channel::<String>(BROADCAST_CAPACITY);
    Ok(Arc::new(AppState {
        db: DbHandle::new(db),
        ws_tx,
        ordering: config.ordering(),
        attachments,
        auth: config.auth.clone(),
    }))
}

/// Start the taskboard server.
pub async fn start_server(config: BoardConfig) -> Result<()> {
    let state = build_state(&config).await?;

    let purged = sweep_expired_tokens(&state).await?;
    tracing::debug!(purged, "expired tokens removed at startup");
    spawn_token_sweeper(state.clone());

    let mut app = build_router(state);
    if config.server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        address = %local_addr,
        database = %config.database.path.display(),
        dev_mode = config.server.dev_mode,
        "taskboard listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn sweep_expired_tokens(state: &SharedState) -> Result<usize> {
    let now = Utc::now().timestamp();
    state.db.call(move |db| db.purge_expired_tokens(now)).await
}

fn spawn_token_sweeper(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TOKEN_SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            match sweep_expired_tokens(&state).await {
                Ok(purged) => tracing::debug!(purged, "expired tokens removed"),
                Err(e) => tracing::warn!(error = %e, "token sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("shutting down");
}
