//! SQLite persistence for the board subsystem.
//!
//! `BoardDb` owns a single `rusqlite::Connection`. Queries are grouped by
//! area into `users`, `workspaces`, `boards` and `tasks`, each adding an
//! `impl BoardDb` block. Domain failures (missing rows, denied access,
//! conflicts) are returned as [`BoardError`] inside the `anyhow::Error`.

mod boards;
mod tasks;
mod users;
mod workspaces;

pub use tasks::AttachmentScope;
pub use users::{RefreshTokenRecord, ResetTokenRecord};

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::errors::BoardError;
use crate::ordering::{Position, Sibling};

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`. One `call` is one critical
/// section: a move reads siblings, computes the weight and writes it without
/// another request interleaving.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup and tests only;
    /// never from a request handler.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|_| BoardError::LockPoisoned.into())
    }
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS workspaces (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS workspace_members (
                    workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    joined_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (workspace_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS boards (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS board_guests (
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    PRIMARY KEY (board_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS statuses (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    weight REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    status_id INTEGER NOT NULL REFERENCES statuses(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    weight REAL NOT NULL,
                    assignee_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    due_date TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tags (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    color TEXT NOT NULL DEFAULT '#808080',
                    UNIQUE(board_id, name)
                );

                CREATE TABLE IF NOT EXISTS task_tags (
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (task_id, tag_id)
                );

                CREATE TABLE IF NOT EXISTS attachments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    file_name TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    storage_key TEXT NOT NULL UNIQUE,
                    uploaded_by INTEGER NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token_hash TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    expires_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS refresh_tokens (
                    token_hash TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    family_id TEXT NOT NULL,
                    expires_at INTEGER NOT NULL,
                    revoked INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS reset_tokens (
                    token_hash TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    expires_at INTEGER NOT NULL,
                    used INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_members_user ON workspace_members(user_id);
                CREATE INDEX IF NOT EXISTS idx_boards_workspace ON boards(workspace_id);
                CREATE INDEX IF NOT EXISTS idx_statuses_board ON statuses(board_id, weight);
                CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status_id, weight);
                CREATE INDEX IF NOT EXISTS idx_tasks_board ON tasks(board_id);
                CREATE INDEX IF NOT EXISTS idx_attachments_task ON attachments(task_id);
                CREATE INDEX IF NOT EXISTS idx_refresh_family ON refresh_tokens(family_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Overwrite weights of several rows of one ordered table.
    /// Callers wrap this in a transaction.
    fn write_weights(&self, table: WeightTable, weights: &[Sibling<i64>]) -> Result<()> {
        let sql = match table {
            WeightTable::Statuses => "UPDATE statuses SET weight = ?1 WHERE id = ?2",
            WeightTable::Tasks => "UPDATE tasks SET weight = ?1 WHERE id = ?2",
        };
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .context("Failed to prepare weight update")?;
        for sibling in weights {
            stmt.execute(params![sibling.weight, sibling.id])
                .with_context(|| format!("Failed to update weight of {}", sibling.id))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum WeightTable {
    Statuses,
    Tasks,
}

/// Anchors must name a sibling at the destination. The moved entity is not
/// among `siblings`, so anchoring on itself is rejected too.
fn check_anchor(siblings: &[Sibling<i64>], position: &Position<i64>, kind: &str) -> Result<()> {
    if let Some(anchor) = position.anchor() {
        if !siblings.iter().any(|sibling| sibling.id == *anchor) {
            return Err(BoardError::BadRequest(format!(
                "{} {} is not a valid anchor at the destination",
                kind, anchor
            ))
            .into());
        }
    }
    Ok(())
}

/// A batch reorder must name every sibling exactly once.
fn check_permutation(current: &[Sibling<i64>], requested: &[i64], kind: &str) -> Result<()> {
    let mut have: Vec<i64> = current.iter().map(|sibling| sibling.id).collect();
    let mut want = requested.to_vec();
    have.sort_unstable();
    want.sort_unstable();
    if have != want {
        return Err(BoardError::BadRequest(format!(
            "Reorder must list every {} of the parent exactly once",
            kind
        ))
        .into());
    }
    Ok(())
}

/// Replace "board not found" with a not-found error for the child entity
/// that was looked up through the board, so access checks on statuses, tasks
/// and tags do not reveal which boards exist. Other errors pass through.
fn hide_board(err: anyhow::Error, replacement: BoardError) -> anyhow::Error {
    match err.downcast_ref::<BoardError>() {
        Some(BoardError::BoardNotFound { .. }) => replacement.into(),
        _ => err,
    }
}

/// Map a UNIQUE constraint violation to a conflict, leave anything else
/// as a database error.
fn conflict_on_unique(err: rusqlite::Error, message: impl Into<String>) -> anyhow::Error {
    match err {
        rusqlite::Error::SqliteFailure(ref inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            BoardError::Conflict(message.into()).into()
        }
        other => anyhow::Error::new(other),
    }
}
