use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{
    BoardDb, WeightTable, check_anchor, check_permutation, conflict_on_unique, hide_board,
};
use crate::access::Role;
use crate::board::models::{Board, BoardView, Status, StatusView, Tag, Task};
use crate::errors::BoardError;
use crate::ordering::{Position, Sibling, WeightedOrdering};

fn row_to_board(row: &Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_status(row: &Row<'_>) -> rusqlite::Result<Status> {
    Ok(Status {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        weight: row.get(3)?,
    })
}

pub(super) fn row_to_tag(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
    })
}

impl BoardDb {
    // ── Boards ────────────────────────────────────────────────────────

    pub fn create_board(&self, workspace_id: i64, name: &str, description: &str) -> Result<Board> {
        self.conn
            .execute(
                "INSERT INTO boards (workspace_id, name, description) VALUES (?1, ?2, ?3)",
                params![workspace_id, name, description],
            )
            .context("Failed to insert board")?;
        let id = self.conn.last_insert_rowid();
        self.get_board(id)?.context("Board not found after insert")
    }

    pub fn get_board(&self, id: i64) -> Result<Option<Board>> {
        self.conn
            .query_row(
                "SELECT id, workspace_id, name, description, created_at FROM boards WHERE id = ?1",
                params![id],
                row_to_board,
            )
            .optional()
            .context("Failed to query board")
    }

    /// Boards of a workspace visible to a user holding `role`. Guests only
    /// get the boards they hold a grant for.
    pub fn list_boards(&self, workspace_id: i64, user_id: i64, role: Role) -> Result<Vec<Board>> {
        let sql = match role {
            Role::Guest => {
                "SELECT b.id, b.workspace_id, b.name, b.description, b.created_at
                 FROM boards b JOIN board_guests g ON g.board_id = b.id
                 WHERE b.workspace_id = ?1 AND g.user_id = ?2 ORDER BY b.id"
            }
            _ => {
                "SELECT id, workspace_id, name, description, created_at
                 FROM boards WHERE workspace_id = ?1 ORDER BY id"
            }
        };
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare list_boards")?;
        let rows = match role {
            Role::Guest => stmt.query_map(params![workspace_id, user_id], row_to_board),
            _ => stmt.query_map(params![workspace_id], row_to_board),
        }
        .context("Failed to query boards")?;
        let mut boards = Vec::new();
        for row in rows {
            boards.push(row.context("Failed to read board row")?);
        }
        Ok(boards)
    }

    pub fn update_board(&self, id: i64, name: Option<&str>, description: Option<&str>) -> Result<Board> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(n) = name {
            tx.execute("UPDATE boards SET name = ?1 WHERE id = ?2", params![n, id])
                .context("Failed to update board name")?;
        }
        if let Some(d) = description {
            tx.execute(
                "UPDATE boards SET description = ?1 WHERE id = ?2",
                params![d, id],
            )
            .context("Failed to update board description")?;
        }
        tx.commit().context("Failed to commit board update")?;
        self.get_board(id)?
            .ok_or_else(|| BoardError::BoardNotFound { id }.into())
    }

    pub fn delete_board(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM boards WHERE id = ?1", params![id])
            .context("Failed to delete board")?;
        Ok(count > 0)
    }

    /// Board plus the caller's effective role on it. A missing board and a
    /// board the caller cannot see both yield `BoardNotFound`.
    pub fn board_access(&self, id: i64, user_id: i64) -> Result<(Board, Role)> {
        let board = self.get_board(id)?.ok_or(BoardError::BoardNotFound { id })?;
        let role = self
            .effective_board_role(board.workspace_id, id, user_id)?
            .ok_or(BoardError::BoardNotFound { id })?;
        Ok((board, role))
    }

    /// Statuses with their tasks, plus the board's tags, all in display order.
    pub fn board_view(&self, board: Board, role: Role) -> Result<BoardView> {
        let statuses = self.list_statuses(board.id)?;
        let mut tasks_by_status: HashMap<i64, Vec<Task>> = HashMap::new();
        for task in self.list_board_tasks(board.id)? {
            tasks_by_status.entry(task.status_id).or_default().push(task);
        }
        let statuses = statuses
            .into_iter()
            .map(|status| StatusView {
                tasks: tasks_by_status.remove(&status.id).unwrap_or_default(),
                status,
            })
            .collect();
        let tags = self.list_tags(board.id)?;
        Ok(BoardView {
            board,
            role,
            statuses,
            tags,
        })
    }

    // ── Statuses ──────────────────────────────────────────────────────

    /// Create a status at the right end of the board.
    pub fn create_status(&self, ordering: &WeightedOrdering, board_id: i64, name: &str) -> Result<Status> {
        let siblings = self.status_siblings(board_id, None)?;
        let placement = ordering.place(&siblings, &Position::End);
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if placement.needs_renumber() {
            self.write_weights(WeightTable::Statuses, &placement.renumbered)?;
        }
        tx.execute(
            "INSERT INTO statuses (board_id, name, weight) VALUES (?1, ?2, ?3)",
            params![board_id, name, placement.weight],
        )
        .context("Failed to insert status")?;
        let id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit status creation")?;
        self.get_status(id)?.context("Status not found after insert")
    }

    pub fn get_status(&self, id: i64) -> Result<Option<Status>> {
        self.conn
            .query_row(
                "SELECT id, board_id, name, weight FROM statuses WHERE id = ?1",
                params![id],
                row_to_status,
            )
            .optional()
            .context("Failed to query status")
    }

    pub fn list_statuses(&self, board_id: i64) -> Result<Vec<Status>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, board_id, name, weight FROM statuses
                 WHERE board_id = ?1 ORDER BY weight, id",
            )
            .context("Failed to prepare list_statuses")?;
        let rows = stmt
            .query_map(params![board_id], row_to_status)
            .context("Failed to query statuses")?;
        let mut statuses = Vec::new();
        for row in rows {
            statuses.push(row.context("Failed to read status row")?);
        }
        Ok(statuses)
    }

    /// Weights of a board's statuses, optionally leaving one out (the one
    /// being moved).
    pub fn status_siblings(&self, board_id: i64, exclude: Option<i64>) -> Result<Vec<Sibling<i64>>> {
        Ok(self
            .list_statuses(board_id)?
            .into_iter()
            .filter(|status| Some(status.id) != exclude)
            .map(|status| status.sibling())
            .collect())
    }

    pub fn set_status_weight(&self, id: i64, weight: f64) -> Result<()> {
        self.write_weights(WeightTable::Statuses, &[Sibling::new(id, weight)])
    }

    pub fn set_status_weights(&self, weights: &[Sibling<i64>]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        self.write_weights(WeightTable::Statuses, weights)?;
        tx.commit().context("Failed to commit status weights")?;
        Ok(())
    }

    pub fn status_access(&self, id: i64, user_id: i64) -> Result<(Status, Board, Role)> {
        let status = self.get_status(id)?.ok_or(BoardError::StatusNotFound { id })?;
        let (board, role) = self
            .board_access(status.board_id, user_id)
            .map_err(|e| hide_board(e, BoardError::StatusNotFound { id }))?;
        Ok((status, board, role))
    }

    pub fn rename_status(&self, id: i64, name: &str) -> Result<Status> {
        self.conn
            .execute(
                "UPDATE statuses SET name = ?1 WHERE id = ?2",
                params![name, id],
            )
            .context("Failed to rename status")?;
        self.get_status(id)?
            .ok_or_else(|| BoardError::StatusNotFound { id }.into())
    }

    /// Delete a status and, through the cascade, its tasks.
    pub fn delete_status(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM statuses WHERE id = ?1", params![id])
            .context("Failed to delete status")?;
        Ok(count > 0)
    }

    /// Move a status within its board. Only the moved status is written
    /// unless the sibling weights had to be renumbered.
    pub fn move_status(
        &self,
        ordering: &WeightedOrdering,
        id: i64,
        position: &Position<i64>,
    ) -> Result<Status> {
        let status = self.get_status(id)?.ok_or(BoardError::StatusNotFound { id })?;
        let siblings = self.status_siblings(status.board_id, Some(id))?;
        check_anchor(&siblings, position, "Status")?;
        let placement = ordering.place(&siblings, position);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if placement.needs_renumber() {
            tracing::debug!(board_id = status.board_id, "renumbering status weights");
            self.write_weights(WeightTable::Statuses, &placement.renumbered)?;
        }
        self.write_weights(WeightTable::Statuses, &[Sibling::new(id, placement.weight)])?;
        tx.commit().context("Failed to commit status move")?;

        self.get_status(id)?.context("Status not found after move")
    }

    /// Assign fresh weights to every status of a board in the given order.
    pub fn reorder_statuses(
        &self,
        ordering: &WeightedOrdering,
        board_id: i64,
        ordered_ids: &[i64],
    ) -> Result<Vec<Status>> {
        let current = self.status_siblings(board_id, None)?;
        check_permutation(&current, ordered_ids, "status")?;
        self.set_status_weights(&ordering.renumber(ordered_ids.iter().copied()))?;
        self.list_statuses(board_id)
    }

    // ── Tags ──────────────────────────────────────────────────────────

    pub fn create_tag(&self, board_id: i64, name: &str, color: &str) -> Result<Tag> {
        self.conn
            .execute(
                "INSERT INTO tags (board_id, name, color) VALUES (?1, ?2, ?3)",
                params![board_id, name, color],
            )
            .map_err(|e| conflict_on_unique(e, format!("Tag '{}' already exists on this board", name)))?;
        let id = self.conn.last_insert_rowid();
        self.get_tag(id)?.context("Tag not found after insert")
    }

    pub fn get_tag(&self, id: i64) -> Result<Option<Tag>> {
        self.conn
            .query_row(
                "SELECT id, board_id, name, color FROM tags WHERE id = ?1",
                params![id],
                row_to_tag,
            )
            .optional()
            .context("Failed to query tag")
    }

    pub fn list_tags(&self, board_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, board_id, name, color FROM tags WHERE board_id = ?1 ORDER BY name, id")
            .context("Failed to prepare list_tags")?;
        let rows = stmt
            .query_map(params![board_id], row_to_tag)
            .context("Failed to query tags")?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row.context("Failed to read tag row")?);
        }
        Ok(tags)
    }

    pub fn tag_access(&self, id: i64, user_id: i64) -> Result<(Tag, Board, Role)> {
        let tag = self.get_tag(id)?.ok_or(BoardError::TagNotFound { id })?;
        let (board, role) = self
            .board_access(tag.board_id, user_id)
            .map_err(|e| hide_board(e, BoardError::TagNotFound { id }))?;
        Ok((tag, board, role))
    }

    pub fn delete_tag(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM tags WHERE id = ?1", params![id])
            .context("Failed to delete tag")?;
        Ok(count > 0)
    }
}
