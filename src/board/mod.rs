//! Kanban board back-end.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, body limit, CORS)      │
//! │          │ <─────── │    └─ api/   (route handlers, AppState, ApiError)│
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ AuthUser extractor                     │
//!                       │         v                                        │
//!                       │  auth.rs  (argon2 passwords, opaque tokens)      │
//!                       │         │                                        │
//!                       │         │ access::authorize(role, action)        │
//!                       │         │ WeightedOrdering::place(...)           │
//!                       │         v                                        │
//!                       │  db/  (BoardDb on rusqlite, DbHandle)            │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `models`      | Shared types: `Workspace`, `Board`, `Status`, `Task`    |
//! | `attachments` | Attachment bytes on local disk, keyed by UUID           |
//! | `ws`          | `WsMessage` enum, per-connection visibility filter      |
//!
//! ## Typical Request Flow (move a task)
//!
//! 1. `PATCH /api/tasks/{id}/move` reaches `api::tasks::move_task`.
//! 2. `AuthUser` resolves the bearer token to a user.
//! 3. Inside one `DbHandle::call`: the caller's effective role on the board
//!    is looked up, checked with `authorize(role, Action::ManageBoardContent)`,
//!    the destination siblings are read and `WeightedOrdering::place` picks
//!    the new weight, renumbering the column if precision ran out.
//! 4. The handler broadcasts `WsMessage::TaskMoved`; each socket forwards it
//!    only if its user can see the board.

pub mod api;
pub mod attachments;
pub mod auth;
pub mod db;
pub mod models;
pub mod server;
pub mod ws;
