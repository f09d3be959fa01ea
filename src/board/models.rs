use serde::{Deserialize, Serialize};

use crate::access::Role;
use crate::ordering::Sibling;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: String,
}

/// A workspace as listed for one user, with that user's role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    #[serde(flatten)]
    pub workspace: Workspace,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub joined_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Board {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub description: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Status {
    pub id: i64,
    pub board_id: i64,
    pub name: String,
    pub weight: f64,
}

impl Status {
    pub fn sibling(&self) -> Sibling<i64> {
        Sibling::new(self.id, self.weight)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub board_id: i64,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub board_id: i64,
    pub status_id: i64,
    pub title: String,
    pub description: String,
    pub weight: f64,
    pub assignee_id: Option<i64>,
    pub due_date: Option<String>,
    pub tags: Vec<Tag>,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    pub fn sibling(&self) -> Sibling<i64> {
        Sibling::new(self.id, self.weight)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub id: i64,
    pub task_id: i64,
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    #[serde(skip_serializing, default)]
    pub storage_key: String,
    pub uploaded_by: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub status: Status,
    pub tasks: Vec<Task>,
}

/// Everything needed to render one board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub board: Board,
    pub role: Role,
    pub statuses: Vec<StatusView>,
    pub tags: Vec<Tag>,
}

/// Fields of a task that may be changed in place. `None` leaves a field
/// untouched; `Some(None)` on the optional fields clears them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
}

/// Distinguish an absent field from an explicit `null`.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
