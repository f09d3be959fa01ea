use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, SharedState};
use crate::board::auth::{self, AuthUser, TokenPair};
use crate::board::models::User;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub user: User,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Serialize)]
pub struct ForgotPasswordResponse {
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
}

pub(super) async fn register(
    State(state): State<SharedState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = auth::register(&state.db, &req.email, &req.name, &req.password).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub(super) async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (user, tokens) = auth::login(&state.db, &state.auth, &req.email, &req.password).await?;
    Ok(Json(SessionResponse { user, tokens }))
}

pub(super) async fn refresh(
    State(state): State<SharedState>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.auth.clone();
    let tokens = state
        .db
        .call(move |db| auth::refresh(db, &settings, &req.refresh_token))
        .await?;
    Ok(Json(tokens))
}

pub(super) async fn logout(
    State(state): State<SharedState>,
    user: AuthUser,
    body: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let refresh_token = body.and_then(|Json(req)| req.refresh_token);
    let user_id = user.id();
    let access_token = user.token;
    state
        .db
        .call(move |db| auth::logout(db, user_id, &access_token, refresh_token.as_deref()))
        .await?;
    tracing::info!(user_id, "logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// Always 202 so the response does not reveal whether the email exists.
pub(super) async fn forgot_password(
    State(state): State<SharedState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.auth.clone();
    let expose = settings.expose_reset_tokens;
    let token = state
        .db
        .call(move |db| auth::request_password_reset(db, &settings, &req.email))
        .await?;
    let body = ForgotPasswordResponse {
        message: "If the address is registered, a reset token has been issued",
        reset_token: token.filter(|_| expose),
    };
    Ok((StatusCode::ACCEPTED, Json(body)))
}

pub(super) async fn reset_password(
    State(state): State<SharedState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::reset_password(&state.db, &req.token, &req.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn me(user: AuthUser) -> Json<User> {
    Json(user.user)
}
