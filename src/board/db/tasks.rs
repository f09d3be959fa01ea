use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::boards::row_to_tag;
use super::{BoardDb, WeightTable, check_anchor, check_permutation, hide_board};
use crate::access::Role;
use crate::board::models::{Attachment, Board, Tag, Task, TaskUpdate};
use crate::errors::BoardError;
use crate::ordering::{Position, Sibling, WeightedOrdering};

/// Which rows' attachment files to collect before a cascading delete.
#[derive(Debug, Clone, Copy)]
pub enum AttachmentScope {
    Workspace(i64),
    Board(i64),
    Status(i64),
    Task(i64),
}

const TASK_COLUMNS: &str = "id, board_id, status_id, title, description, weight, assignee_id, \
                            due_date, created_at, updated_at";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        board_id: row.get(1)?,
        status_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        weight: row.get(5)?,
        assignee_id: row.get(6)?,
        due_date: row.get(7)?,
        tags: Vec::new(),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_attachment(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        task_id: row.get(1)?,
        file_name: row.get(2)?,
        content_type: row.get(3)?,
        size: row.get(4)?,
        storage_key: row.get(5)?,
        uploaded_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl BoardDb {
    // ── Tasks ─────────────────────────────────────────────────────────

    /// Create a task at the bottom of a status.
    pub fn create_task(
        &self,
        ordering: &WeightedOrdering,
        status_id: i64,
        title: &str,
        description: &str,
        assignee_id: Option<i64>,
        due_date: Option<&str>,
    ) -> Result<Task> {
        let status = self
            .get_status(status_id)?
            .ok_or(BoardError::StatusNotFound { id: status_id })?;
        let siblings = self.task_siblings(status_id, None)?;
        let placement = ordering.place(&siblings, &Position::End);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if placement.needs_renumber() {
            self.write_weights(WeightTable::Tasks, &placement.renumbered)?;
        }
        tx.execute(
            "INSERT INTO tasks (board_id, status_id, title, description, weight, assignee_id, due_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                status.board_id,
                status_id,
                title,
                description,
                placement.weight,
                assignee_id,
                due_date
            ],
        )
        .context("Failed to insert task")?;
        let id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit task creation")?;
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let task = self
            .conn
            .query_row(&sql, params![id], row_to_task)
            .optional()
            .context("Failed to query task")?;
        match task {
            Some(mut task) => {
                task.tags = self.tags_for_task(task.id)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Tasks of one status in display order.
    pub fn list_tasks(&self, status_id: i64) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status_id = ?1 ORDER BY weight, id"
        );
        let mut tasks = self.query_tasks(&sql, status_id)?;
        for task in &mut tasks {
            task.tags = self.tags_for_task(task.id)?;
        }
        Ok(tasks)
    }

    /// All tasks of a board, each status's tasks in display order, with tags
    /// loaded in one query.
    pub fn list_board_tasks(&self, board_id: i64) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE board_id = ?1 ORDER BY status_id, weight, id"
        );
        let mut tasks = self.query_tasks(&sql, board_id)?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT tt.task_id, t.id, t.board_id, t.name, t.color
                 FROM task_tags tt JOIN tags t ON t.id = tt.tag_id
                 WHERE t.board_id = ?1 ORDER BY t.name, t.id",
            )
            .context("Failed to prepare board task tags")?;
        let rows = stmt
            .query_map(params![board_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    Tag {
                        id: row.get(1)?,
                        board_id: row.get(2)?,
                        name: row.get(3)?,
                        color: row.get(4)?,
                    },
                ))
            })
            .context("Failed to query board task tags")?;
        let mut tags_by_task: HashMap<i64, Vec<Tag>> = HashMap::new();
        for row in rows {
            let (task_id, tag) = row.context("Failed to read task tag row")?;
            tags_by_task.entry(task_id).or_default().push(tag);
        }
        for task in &mut tasks {
            task.tags = tags_by_task.remove(&task.id).unwrap_or_default();
        }
        Ok(tasks)
    }

    fn query_tasks(&self, sql: &str, parent_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare task query")?;
        let rows = stmt
            .query_map(params![parent_id], row_to_task)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.context("Failed to read task row")?);
        }
        Ok(tasks)
    }

    pub fn task_siblings(&self, status_id: i64, exclude: Option<i64>) -> Result<Vec<Sibling<i64>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, weight FROM tasks WHERE status_id = ?1 ORDER BY weight, id")
            .context("Failed to prepare task_siblings")?;
        let rows = stmt
            .query_map(params![status_id], |row| {
                Ok(Sibling::new(row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })
            .context("Failed to query task siblings")?;
        let mut siblings = Vec::new();
        for row in rows {
            let sibling = row.context("Failed to read task sibling")?;
            if Some(sibling.id) != exclude {
                siblings.push(sibling);
            }
        }
        Ok(siblings)
    }

    pub fn set_task_weight(&self, id: i64, weight: f64) -> Result<()> {
        self.write_weights(WeightTable::Tasks, &[Sibling::new(id, weight)])
    }

    pub fn set_task_weights(&self, weights: &[Sibling<i64>]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        self.write_weights(WeightTable::Tasks, weights)?;
        tx.commit().context("Failed to commit task weights")?;
        Ok(())
    }

    pub fn task_access(&self, id: i64, user_id: i64) -> Result<(Task, Board, Role)> {
        let task = self.get_task(id)?.ok_or(BoardError::TaskNotFound { id })?;
        let (board, role) = self
            .board_access(task.board_id, user_id)
            .map_err(|e| hide_board(e, BoardError::TaskNotFound { id }))?;
        Ok((task, board, role))
    }

    pub fn update_task(&self, id: i64, update: &TaskUpdate) -> Result<Task> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(ref title) = update.title {
            tx.execute(
                "UPDATE tasks SET title = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![title, id],
            )
            .context("Failed to update task title")?;
        }
        if let Some(ref description) = update.description {
            tx.execute(
                "UPDATE tasks SET description = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![description, id],
            )
            .context("Failed to update task description")?;
        }
        if let Some(assignee_id) = update.assignee_id {
            tx.execute(
                "UPDATE tasks SET assignee_id = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![assignee_id, id],
            )
            .context("Failed to update task assignee")?;
        }
        if let Some(ref due_date) = update.due_date {
            tx.execute(
                "UPDATE tasks SET due_date = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![due_date, id],
            )
            .context("Failed to update task due date")?;
        }
        tx.commit().context("Failed to commit task update")?;
        self.get_task(id)?
            .ok_or_else(|| BoardError::TaskNotFound { id }.into())
    }

    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        Ok(count > 0)
    }

    /// Move a task within its status or into another status of the same
    /// board. Returns the task and the status it came from.
    ///
    /// Siblings are read, the weight computed and written inside this one
    /// call, so concurrent moves through the same `DbHandle` serialize.
    pub fn move_task(
        &self,
        ordering: &WeightedOrdering,
        id: i64,
        status_id: Option<i64>,
        position: &Position<i64>,
    ) -> Result<(Task, i64)> {
        let task = self.get_task(id)?.ok_or(BoardError::TaskNotFound { id })?;
        let from_status = task.status_id;
        let to_status = status_id.unwrap_or(from_status);

        if to_status != from_status {
            let destination = self
                .get_status(to_status)?
                .filter(|status| status.board_id == task.board_id)
                .ok_or_else(|| {
                    BoardError::BadRequest(format!(
                        "Status {} does not belong to board {}",
                        to_status, task.board_id
                    ))
                })?;
            tracing::debug!(task_id = id, from = from_status, to = destination.id, "moving task across statuses");
        }

        let siblings = self.task_siblings(to_status, Some(id))?;
        check_anchor(&siblings, position, "Task")?;
        let placement = ordering.place(&siblings, position);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if placement.needs_renumber() {
            tracing::debug!(status_id = to_status, "renumbering task weights");
            self.write_weights(WeightTable::Tasks, &placement.renumbered)?;
        }
        tx.execute(
            "UPDATE tasks SET status_id = ?1, weight = ?2, updated_at = datetime('now') WHERE id = ?3",
            params![to_status, placement.weight, id],
        )
        .context("Failed to move task")?;
        tx.commit().context("Failed to commit task move")?;

        let task = self.get_task(id)?.context("Task not found after move")?;
        Ok((task, from_status))
    }

    /// Assign fresh weights to every task of a status in the given order.
    pub fn reorder_tasks(
        &self,
        ordering: &WeightedOrdering,
        status_id: i64,
        ordered_ids: &[i64],
    ) -> Result<Vec<Task>> {
        let current = self.task_siblings(status_id, None)?;
        check_permutation(&current, ordered_ids, "task")?;
        self.set_task_weights(&ordering.renumber(ordered_ids.iter().copied()))?;
        self.list_tasks(status_id)
    }

    // ── Task tags ─────────────────────────────────────────────────────

    pub fn tags_for_task(&self, task_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.id, t.board_id, t.name, t.color
                 FROM task_tags tt JOIN tags t ON t.id = tt.tag_id
                 WHERE tt.task_id = ?1 ORDER BY t.name, t.id",
            )
            .context("Failed to prepare tags_for_task")?;
        let rows = stmt
            .query_map(params![task_id], row_to_tag)
            .context("Failed to query task tags")?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row.context("Failed to read tag row")?);
        }
        Ok(tags)
    }

    /// Attach a tag of the same board to a task. Idempotent.
    pub fn add_task_tag(&self, task_id: i64, tag_id: i64) -> Result<Task> {
        let task = self
            .get_task(task_id)?
            .ok_or(BoardError::TaskNotFound { id: task_id })?;
        let tag = self
            .get_tag(tag_id)?
            .ok_or(BoardError::TagNotFound { id: tag_id })?;
        if tag.board_id != task.board_id {
            return Err(BoardError::BadRequest(format!(
                "Tag {} belongs to a different board",
                tag_id
            ))
            .into());
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?1, ?2)",
                params![task_id, tag_id],
            )
            .context("Failed to tag task")?;
        self.get_task(task_id)?
            .context("Task not found after tagging")
    }

    pub fn remove_task_tag(&self, task_id: i64, tag_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM task_tags WHERE task_id = ?1 AND tag_id = ?2",
                params![task_id, tag_id],
            )
            .context("Failed to untag task")?;
        Ok(count > 0)
    }

    // ── Attachments ───────────────────────────────────────────────────

    pub fn create_attachment(
        &self,
        task_id: i64,
        file_name: &str,
        content_type: &str,
        size: i64,
        storage_key: &str,
        uploaded_by: i64,
    ) -> Result<Attachment> {
        self.conn
            .execute(
                "INSERT INTO attachments (task_id, file_name, content_type, size, storage_key, uploaded_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![task_id, file_name, content_type, size, storage_key, uploaded_by],
            )
            .context("Failed to insert attachment")?;
        let id = self.conn.last_insert_rowid();
        self.get_attachment(id)?
            .context("Attachment not found after insert")
    }

    pub fn get_attachment(&self, id: i64) -> Result<Option<Attachment>> {
        self.conn
            .query_row(
                "SELECT id, task_id, file_name, content_type, size, storage_key, uploaded_by, created_at
                 FROM attachments WHERE id = ?1",
                params![id],
                row_to_attachment,
            )
            .optional()
            .context("Failed to query attachment")
    }

    pub fn list_attachments(&self, task_id: i64) -> Result<Vec<Attachment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, task_id, file_name, content_type, size, storage_key, uploaded_by, created_at
                 FROM attachments WHERE task_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_attachments")?;
        let rows = stmt
            .query_map(params![task_id], row_to_attachment)
            .context("Failed to query attachments")?;
        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row.context("Failed to read attachment row")?);
        }
        Ok(attachments)
    }

    pub fn attachment_access(&self, id: i64, user_id: i64) -> Result<(Attachment, Task, Board, Role)> {
        let attachment = self
            .get_attachment(id)?
            .ok_or(BoardError::AttachmentNotFound { id })?;
        let (task, board, role) = self
            .task_access(attachment.task_id, user_id)
            .map_err(|e| hide_board(e, BoardError::AttachmentNotFound { id }))?;
        Ok((attachment, task, board, role))
    }

    pub fn delete_attachment(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM attachments WHERE id = ?1", params![id])
            .context("Failed to delete attachment")?;
        Ok(count > 0)
    }

    /// Storage keys of every attachment that a delete of `scope` would
    /// cascade over.
    pub fn attachment_keys(&self, scope: AttachmentScope) -> Result<Vec<String>> {
        let (sql, id) = match scope {
            AttachmentScope::Workspace(id) => (
                "SELECT a.storage_key FROM attachments a
                 JOIN tasks t ON t.id = a.task_id JOIN boards b ON b.id = t.board_id
                 WHERE b.workspace_id = ?1",
                id,
            ),
            AttachmentScope::Board(id) => (
                "SELECT a.storage_key FROM attachments a
                 JOIN tasks t ON t.id = a.task_id WHERE t.board_id = ?1",
                id,
            ),
            AttachmentScope::Status(id) => (
                "SELECT a.storage_key FROM attachments a
                 JOIN tasks t ON t.id = a.task_id WHERE t.status_id = ?1",
                id,
            ),
            AttachmentScope::Task(id) => (
                "SELECT storage_key FROM attachments WHERE task_id = ?1",
                id,
            ),
        };
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare attachment_keys")?;
        let rows = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .context("Failed to query attachment keys")?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.context("Failed to read attachment key")?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::test_support::{add_user, fixture};

    fn titles(tasks: &[Task]) -> Vec<String> {
        tasks.iter().map(|t| t.title.clone()).collect()
    }

    #[test]
    fn test_create_task_appends() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let a = fx.db.create_task(&ordering, fx.todo.id, "A", "", None, None)?;
        let b = fx.db.create_task(&ordering, fx.todo.id, "B", "desc", None, Some("2025-01-31"))?;
        assert_eq!(a.weight, 200.0);
        assert_eq!(b.weight, 400.0);
        assert_eq!(b.board_id, fx.board.id);
        assert_eq!(b.due_date.as_deref(), Some("2025-01-31"));
        Ok(())
    }

    #[test]
    fn test_create_task_in_missing_status() -> Result<()> {
        let fx = fixture()?;
        let err = fx
            .db
            .create_task(&WeightedOrdering::default(), 999, "X", "", None, None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::StatusNotFound { id: 999 })
        ));
        Ok(())
    }

    #[test]
    fn test_move_task_between_siblings_writes_only_moved() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let a = fx.db.create_task(&ordering, fx.todo.id, "A", "", None, None)?;
        let b = fx.db.create_task(&ordering, fx.todo.id, "B", "", None, None)?;
        let c = fx.db.create_task(&ordering, fx.todo.id, "C", "", None, None)?;

        let (moved, from) = fx.db.move_task(&ordering, c.id, None, &Position::After(a.id))?;
        assert_eq!(from, fx.todo.id);
        assert_eq!(moved.weight, 300.0);
        assert_eq!(titles(&fx.db.list_tasks(fx.todo.id)?), ["A", "C", "B"]);
        assert_eq!(fx.db.get_task(b.id)?.map(|t| t.weight), Some(400.0));
        Ok(())
    }

    #[test]
    fn test_move_task_to_other_status() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let a = fx.db.create_task(&ordering, fx.todo.id, "A", "", None, None)?;
        let d = fx.db.create_task(&ordering, fx.done.id, "D", "", None, None)?;

        let (moved, from) =
            fx.db
                .move_task(&ordering, a.id, Some(fx.done.id), &Position::Before(d.id))?;
        assert_eq!(from, fx.todo.id);
        assert_eq!(moved.status_id, fx.done.id);
        assert_eq!(moved.weight, 100.0);
        assert!(fx.db.list_tasks(fx.todo.id)?.is_empty());
        assert_eq!(titles(&fx.db.list_tasks(fx.done.id)?), ["A", "D"]);
        Ok(())
    }

    #[test]
    fn test_move_task_into_empty_status() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let a = fx.db.create_task(&ordering, fx.todo.id, "A", "", None, None)?;
        let (moved, _) = fx.db.move_task(&ordering, a.id, Some(fx.done.id), &Position::Start)?;
        assert_eq!(moved.weight, 200.0);
        Ok(())
    }

    #[test]
    fn test_move_task_rejects_anchor_outside_destination() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let a = fx.db.create_task(&ordering, fx.todo.id, "A", "", None, None)?;
        let b = fx.db.create_task(&ordering, fx.todo.id, "B", "", None, None)?;

        let err = fx
            .db
            .move_task(&ordering, a.id, Some(fx.done.id), &Position::After(b.id))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::BadRequest(_))
        ));
        assert_eq!(fx.db.get_task(a.id)?.map(|t| t.status_id), Some(fx.todo.id));
        Ok(())
    }

    #[test]
    fn test_move_task_rejects_status_of_other_board() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let other = fx.db.create_board(fx.workspace.id, "Other", "")?;
        let foreign = fx.db.create_status(&ordering, other.id, "Foreign")?;
        let a = fx.db.create_task(&ordering, fx.todo.id, "A", "", None, None)?;

        let err = fx
            .db
            .move_task(&ordering, a.id, Some(foreign.id), &Position::End)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::BadRequest(_))
        ));
        Ok(())
    }

    #[test]
    fn test_repeated_moves_renumber_and_keep_order() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let first = fx.db.create_task(&ordering, fx.todo.id, "first", "", None, None)?;
        fx.db.create_task(&ordering, fx.todo.id, "last", "", None, None)?;

        let mut expected = vec!["first".to_string(), "last".to_string()];
        for i in 0..80 {
            let title = format!("t{i}");
            let task = fx.db.create_task(&ordering, fx.todo.id, &title, "", None, None)?;
            fx.db.move_task(&ordering, task.id, None, &Position::After(first.id))?;
            expected.insert(1, title);
        }

        let tasks = fx.db.list_tasks(fx.todo.id)?;
        assert_eq!(titles(&tasks), expected);
        for pair in tasks.windows(2) {
            assert!(pair[0].weight < pair[1].weight, "weights must stay distinct");
        }
        Ok(())
    }

    #[test]
    fn test_equal_weights_list_by_id() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let a = fx.db.create_task(&ordering, fx.todo.id, "A", "", None, None)?;
        let b = fx.db.create_task(&ordering, fx.todo.id, "B", "", None, None)?;
        fx.db.set_task_weight(b.id, 50.0)?;
        fx.db.set_task_weight(a.id, 50.0)?;
        assert_eq!(titles(&fx.db.list_tasks(fx.todo.id)?), ["A", "B"]);
        Ok(())
    }

    #[test]
    fn test_reorder_tasks() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let a = fx.db.create_task(&ordering, fx.todo.id, "A", "", None, None)?;
        let b = fx.db.create_task(&ordering, fx.todo.id, "B", "", None, None)?;
        let tasks = fx.db.reorder_tasks(&ordering, fx.todo.id, &[b.id, a.id])?;
        assert_eq!(titles(&tasks), ["B", "A"]);
        Ok(())
    }

    #[test]
    fn test_update_task_fields() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let task = fx.db.create_task(&ordering, fx.todo.id, "A", "", Some(fx.owner.id), None)?;

        let update = TaskUpdate {
            title: Some("Renamed".to_string()),
            assignee_id: Some(None),
            due_date: Some(Some("2025-03-01".to_string())),
            ..Default::default()
        };
        let updated = fx.db.update_task(task.id, &update)?;
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.assignee_id, None);
        assert_eq!(updated.due_date.as_deref(), Some("2025-03-01"));
        assert_eq!(updated.weight, task.weight);
        Ok(())
    }

    #[test]
    fn test_task_tags() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let task = fx.db.create_task(&ordering, fx.todo.id, "A", "", None, None)?;
        let tag = fx.db.create_tag(fx.board.id, "bug", "#f00")?;

        let tagged = fx.db.add_task_tag(task.id, tag.id)?;
        assert_eq!(tagged.tags.len(), 1);
        fx.db.add_task_tag(task.id, tag.id)?;
        assert_eq!(fx.db.tags_for_task(task.id)?.len(), 1);

        let other = fx.db.create_board(fx.workspace.id, "Other", "")?;
        let foreign = fx.db.create_tag(other.id, "bug", "#f00")?;
        assert!(fx.db.add_task_tag(task.id, foreign.id).is_err());

        assert!(fx.db.remove_task_tag(task.id, tag.id)?);
        assert!(fx.db.tags_for_task(task.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_attachments_and_cascade_keys() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let task = fx.db.create_task(&ordering, fx.todo.id, "A", "", None, None)?;
        let attachment =
            fx.db
                .create_attachment(task.id, "a.txt", "text/plain", 3, "key-1", fx.owner.id)?;
        assert_eq!(fx.db.list_attachments(task.id)?, vec![attachment.clone()]);

        for scope in [
            AttachmentScope::Task(task.id),
            AttachmentScope::Status(fx.todo.id),
            AttachmentScope::Board(fx.board.id),
            AttachmentScope::Workspace(fx.workspace.id),
        ] {
            assert_eq!(fx.db.attachment_keys(scope)?, vec!["key-1".to_string()]);
        }

        assert!(fx.db.delete_task(task.id)?);
        assert!(fx.db.get_attachment(attachment.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_attachment_access_for_guest_without_grant() -> Result<()> {
        let fx = fixture()?;
        let ordering = WeightedOrdering::default();
        let task = fx.db.create_task(&ordering, fx.todo.id, "A", "", None, None)?;
        let attachment =
            fx.db
                .create_attachment(task.id, "a.txt", "text/plain", 3, "key-1", fx.owner.id)?;
        let member = add_user(&fx.db, "m@example.com", fx.workspace.id, Role::Member)?;
        let guest = add_user(&fx.db, "g@example.com", fx.workspace.id, Role::Guest)?;

        assert!(fx.db.attachment_access(attachment.id, member.id).is_ok());
        let err = fx.db.attachment_access(attachment.id, guest.id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::AttachmentNotFound { .. })
        ));
        Ok(())
    }
}
