//! Passwords and opaque bearer tokens.
//!
//! Passwords are hashed with argon2. Access, refresh and reset tokens are
//! random strings handed to the client once; only their SHA-256 digest is
//! stored. Refresh tokens rotate on every use and belong to a family rooted
//! at one login: presenting an already-rotated token revokes the family.
//!
//! Token flows are synchronous and work on a `&BoardDb`; handlers run each
//! inside a single `DbHandle::call`. Flows that hash or verify a password
//! are async over the `DbHandle` so argon2 never runs under the database
//! lock.

use std::sync::OnceLock;

use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::api::{ApiError, SharedState};
use super::db::{BoardDb, DbHandle};
use super::models::User;
use crate::config::AuthSection;
use crate::errors::BoardError;

pub const MIN_PASSWORD_LEN: usize = 8;

const ACCESS_PREFIX: &str = "tb_";
const REFRESH_PREFIX: &str = "tr_";
const RESET_PREFIX: &str = "tp_";
const TOKEN_LEN: usize = 40;

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

pub fn generate_token(prefix: &str) -> String {
    let mut token = format!("{}{}{}", prefix, Uuid::new_v4().simple(), Uuid::new_v4().simple());
    token.truncate(TOKEN_LEN);
    token
}

/// Hex SHA-256 of a token; the only form in which tokens are stored.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Run argon2 work on the blocking pool, outside any database call.
async fn off_lock<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Password task panicked")
}

static DUMMY_HASH: OnceLock<String> = OnceLock::new();

/// Hash checked when a login names an unknown email, so that path costs one
/// argon2 verification like any other.
fn dummy_hash() -> Result<&'static str> {
    if let Some(hash) = DUMMY_HASH.get() {
        return Ok(hash);
    }
    let hash = hash_password(&generate_token("dummy_"))?;
    Ok(DUMMY_HASH.get_or_init(|| hash))
}

fn check_password_strength(password: &str) -> Result<(), BoardError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(BoardError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<(), BoardError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(BoardError::BadRequest(format!("Invalid email address: {}", email))),
    }
}

pub async fn register(db: &DbHandle, email: &str, name: &str, password: &str) -> Result<User> {
    check_email(email)?;
    check_password_strength(password)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(BoardError::BadRequest("Name must not be empty".into()).into());
    }
    let password = password.to_string();
    let hash = off_lock(move || hash_password(&password)).await??;
    let (email, name) = (email.to_string(), name.to_string());
    let user = db.call(move |db| db.create_user(&email, &name, &hash)).await?;
    tracing::info!(user_id = user.id, "user registered");
    Ok(user)
}

/// Issue an access token and a refresh token. A `family_id` continues an
/// existing rotation chain; `None` starts a new one.
pub fn issue_token_pair(
    db: &BoardDb,
    settings: &AuthSection,
    user_id: i64,
    family_id: Option<&str>,
) -> Result<TokenPair> {
    let issued_at = now();
    let access_token = generate_token(ACCESS_PREFIX);
    let refresh_token = generate_token(REFRESH_PREFIX);
    let family_id = family_id
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    db.insert_session(
        &hash_token(&access_token),
        user_id,
        issued_at + settings.access_token_ttl_secs,
    )?;
    db.insert_refresh_token(
        &hash_token(&refresh_token),
        user_id,
        &family_id,
        issued_at + settings.refresh_token_ttl_secs,
    )?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer",
        expires_in: settings.access_token_ttl_secs,
    })
}

pub async fn login(
    db: &DbHandle,
    settings: &AuthSection,
    email: &str,
    password: &str,
) -> Result<(User, TokenPair)> {
    let lookup = email.to_string();
    let credentials = db.call(move |db| db.user_credentials(&lookup)).await?;

    let (user, stored_hash) = match credentials {
        Some((user, stored_hash)) => (Some(user), Some(stored_hash)),
        None => (None, None),
    };
    let password = password.to_string();
    let verified = off_lock(move || -> Result<bool> {
        let hash = match &stored_hash {
            Some(hash) => hash.as_str(),
            None => dummy_hash()?,
        };
        Ok(verify_password(&password, hash))
    })
    .await??;

    let Some(user) = user else {
        tracing::info!("login rejected for unknown email");
        return Err(BoardError::InvalidCredentials.into());
    };
    if !verified {
        tracing::info!(user_id = user.id, "login rejected");
        return Err(BoardError::InvalidCredentials.into());
    }

    let settings = settings.clone();
    let user_id = user.id;
    let pair = db
        .call(move |db| issue_token_pair(db, &settings, user_id, None))
        .await?;
    tracing::info!(user_id, "login succeeded");
    Ok((user, pair))
}

/// Rotate a refresh token. Reuse of a revoked token revokes its family.
pub fn refresh(db: &BoardDb, settings: &AuthSection, refresh_token: &str) -> Result<TokenPair> {
    let token_hash = hash_token(refresh_token);
    let record = db
        .find_refresh_token(&token_hash)?
        .ok_or(BoardError::InvalidToken)?;

    if record.revoked {
        let revoked = db.revoke_refresh_family(&record.family_id)?;
        tracing::warn!(
            user_id = record.user_id,
            family_id = %record.family_id,
            revoked,
            "refresh token reuse detected, family revoked"
        );
        return Err(BoardError::InvalidToken.into());
    }
    if record.expires_at <= now() {
        return Err(BoardError::InvalidToken.into());
    }

    db.revoke_refresh_token(&token_hash)?;
    issue_token_pair(db, settings, record.user_id, Some(&record.family_id))
}

/// End the session of `access_token`, and the refresh family of
/// `refresh_token` when one is given and it belongs to `user_id`. A refresh
/// token owned by someone else is left alone.
pub fn logout(db: &BoardDb, user_id: i64, access_token: &str, refresh_token: Option<&str>) -> Result<()> {
    db.delete_session(&hash_token(access_token))?;
    let Some(token) = refresh_token else {
        return Ok(());
    };
    match db.find_refresh_token(&hash_token(token))? {
        Some(record) if record.user_id == user_id => {
            db.revoke_refresh_family(&record.family_id)?;
        }
        Some(record) => {
            tracing::warn!(
                user_id,
                owner_id = record.user_id,
                "logout presented another user's refresh token, ignored"
            );
        }
        None => {}
    }
    Ok(())
}

/// Issue a reset token for a registered email. Unknown emails yield `None`
/// so callers can answer identically either way.
pub fn request_password_reset(db: &BoardDb, settings: &AuthSection, email: &str) -> Result<Option<String>> {
    let Some(user) = db.find_user_by_email(email)? else {
        tracing::info!("password reset requested for unknown email");
        return Ok(None);
    };
    let token = generate_token(RESET_PREFIX);
    db.insert_reset_token(&hash_token(&token), user.id, now() + settings.reset_token_ttl_secs)?;
    tracing::info!(user_id = user.id, "password reset token issued");
    Ok(Some(token))
}

/// Consume a reset token, set the new password and end every session and
/// refresh family of the user.
pub async fn reset_password(db: &DbHandle, token: &str, new_password: &str) -> Result<()> {
    check_password_strength(new_password)?;
    let token_hash = hash_token(token);
    let lookup = token_hash.clone();
    let record = db
        .call(move |db| db.find_reset_token(&lookup))
        .await?
        .ok_or(BoardError::InvalidToken)?;
    if record.used || record.expires_at <= now() {
        return Err(BoardError::InvalidToken.into());
    }

    let password = new_password.to_string();
    let hash = off_lock(move || hash_password(&password)).await??;
    let user_id = record.user_id;
    let (sessions, refresh_tokens) = db
        .call(move |db| db.complete_password_reset(&token_hash, user_id, &hash))
        .await?;
    tracing::info!(
        user_id,
        sessions,
        refresh_tokens,
        "password reset, sessions revoked"
    );
    Ok(())
}

pub fn authenticate(db: &BoardDb, access_token: &str) -> Result<User> {
    db.session_user(&hash_token(access_token), now())?
        .ok_or_else(|| BoardError::InvalidToken.into())
}

/// Pull the bearer token out of an `Authorization` header value.
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl AuthUser {
    pub fn id(&self) -> i64 {
        self.user.id
    }
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

        let lookup = token.clone();
        let user = state
            .db
            .call(move |db| authenticate(db, &lookup))
            .await?;
        Ok(AuthUser { user, token })
    }
}
