//! Typed errors for the board subsystem.
//!
//! Store functions return `anyhow::Result`; domain failures are raised as a
//! [`BoardError`] wrapped in the `anyhow::Error` so the HTTP layer can
//! downcast and pick a status code instead of matching on message text.

use thiserror::Error;

use crate::access::Role;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Workspace {id} not found")]
    WorkspaceNotFound { id: i64 },

    #[error("Board {id} not found")]
    BoardNotFound { id: i64 },

    #[error("Status {id} not found")]
    StatusNotFound { id: i64 },

    #[error("Task {id} not found")]
    TaskNotFound { id: i64 },

    #[error("Tag {id} not found")]
    TagNotFound { id: i64 },

    #[error("Attachment {id} not found")]
    AttachmentNotFound { id: i64 },

    #[error("User {user_id} is not a member of workspace {workspace_id}")]
    MemberNotFound { workspace_id: i64, user_id: i64 },

    #[error("No user registered with email {email}")]
    UserNotFound { email: String },

    #[error("Action '{action}' is not permitted for role {role}")]
    Forbidden { action: &'static str, role: Role },

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Attachment of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
