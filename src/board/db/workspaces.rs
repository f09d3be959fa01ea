use std::str::FromStr;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::BoardDb;
use crate::access::{Role, resolve_board_role};
use crate::board::models::{Member, Workspace, WorkspaceSummary};
use crate::errors::BoardError;

fn row_to_workspace(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn parse_role(value: &str) -> Result<Role> {
    Role::from_str(value)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Invalid role in database")
}

/// Intermediate row for workspace_members joined with users.
struct MemberRow {
    user_id: i64,
    email: String,
    name: String,
    role: String,
    joined_at: String,
}

impl MemberRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            role: row.get(3)?,
            joined_at: row.get(4)?,
        })
    }

    fn into_member(self) -> Result<Member> {
        Ok(Member {
            user_id: self.user_id,
            email: self.email,
            name: self.name,
            role: parse_role(&self.role)?,
            joined_at: self.joined_at,
        })
    }
}

const MEMBER_COLUMNS: &str = "u.id, u.email, u.name, m.role, m.joined_at";

impl BoardDb {
    // ── Workspaces ────────────────────────────────────────────────────

    /// Create a workspace with `owner_id` as its only member (role Owner).
    pub fn create_workspace(&self, owner_id: i64, name: &str, description: &str) -> Result<Workspace> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO workspaces (name, description) VALUES (?1, ?2)",
            params![name, description],
        )
        .context("Failed to insert workspace")?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO workspace_members (workspace_id, user_id, role) VALUES (?1, ?2, ?3)",
            params![id, owner_id, Role::Owner.as_str()],
        )
        .context("Failed to insert workspace owner")?;
        tx.commit().context("Failed to commit workspace creation")?;
        self.get_workspace(id)?
            .context("Workspace not found after insert")
    }

    pub fn get_workspace(&self, id: i64) -> Result<Option<Workspace>> {
        self.conn
            .query_row(
                "SELECT id, name, description, created_at FROM workspaces WHERE id = ?1",
                params![id],
                row_to_workspace,
            )
            .optional()
            .context("Failed to query workspace")
    }

    pub fn list_workspaces_for_user(&self, user_id: i64) -> Result<Vec<WorkspaceSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT w.id, w.name, w.description, w.created_at, m.role
                 FROM workspaces w JOIN workspace_members m ON m.workspace_id = w.id
                 WHERE m.user_id = ?1 ORDER BY w.id",
            )
            .context("Failed to prepare list_workspaces_for_user")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((row_to_workspace(row)?, row.get::<_, String>(4)?))
            })
            .context("Failed to query workspaces")?;
        let mut summaries = Vec::new();
        for row in rows {
            let (workspace, role) = row.context("Failed to read workspace row")?;
            summaries.push(WorkspaceSummary {
                workspace,
                role: parse_role(&role)?,
            });
        }
        Ok(summaries)
    }

    pub fn update_workspace(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Workspace> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(n) = name {
            tx.execute(
                "UPDATE workspaces SET name = ?1 WHERE id = ?2",
                params![n, id],
            )
            .context("Failed to update workspace name")?;
        }
        if let Some(d) = description {
            tx.execute(
                "UPDATE workspaces SET description = ?1 WHERE id = ?2",
                params![d, id],
            )
            .context("Failed to update workspace description")?;
        }
        tx.commit().context("Failed to commit workspace update")?;
        self.get_workspace(id)?
            .ok_or_else(|| BoardError::WorkspaceNotFound { id }.into())
    }

    pub fn delete_workspace(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM workspaces WHERE id = ?1", params![id])
            .context("Failed to delete workspace")?;
        Ok(count > 0)
    }

    /// Workspace plus the caller's role. Non-members get `WorkspaceNotFound`
    /// so the workspace's existence is not disclosed.
    pub fn workspace_access(&self, id: i64, user_id: i64) -> Result<(Workspace, Role)> {
        let role = self
            .member_role(id, user_id)?
            .ok_or(BoardError::WorkspaceNotFound { id })?;
        let workspace = self
            .get_workspace(id)?
            .ok_or(BoardError::WorkspaceNotFound { id })?;
        Ok((workspace, role))
    }

    // ── Memberships ───────────────────────────────────────────────────

    pub fn member_role(&self, workspace_id: i64, user_id: i64) -> Result<Option<Role>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query member role")?;
        role.map(|r| parse_role(&r)).transpose()
    }

    pub fn get_member(&self, workspace_id: i64, user_id: i64) -> Result<Option<Member>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS}
             FROM workspace_members m JOIN users u ON u.id = m.user_id
             WHERE m.workspace_id = ?1 AND m.user_id = ?2"
        );
        let row = self
            .conn
            .query_row(&sql, params![workspace_id, user_id], MemberRow::from_row)
            .optional()
            .context("Failed to query member")?;
        row.map(MemberRow::into_member).transpose()
    }

    pub fn list_members(&self, workspace_id: i64) -> Result<Vec<Member>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS}
             FROM workspace_members m JOIN users u ON u.id = m.user_id
             WHERE m.workspace_id = ?1 ORDER BY m.joined_at, u.id"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_members")?;
        let rows = stmt
            .query_map(params![workspace_id], MemberRow::from_row)
            .context("Failed to query members")?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row.context("Failed to read member row")?.into_member()?);
        }
        Ok(members)
    }

    pub fn add_member(&self, workspace_id: i64, user_id: i64, role: Role) -> Result<Member> {
        if self.member_role(workspace_id, user_id)?.is_some() {
            return Err(BoardError::Conflict(format!(
                "User {} is already a member of workspace {}",
                user_id, workspace_id
            ))
            .into());
        }
        self.conn
            .execute(
                "INSERT INTO workspace_members (workspace_id, user_id, role) VALUES (?1, ?2, ?3)",
                params![workspace_id, user_id, role.as_str()],
            )
            .context("Failed to insert member")?;
        self.get_member(workspace_id, user_id)?
            .context("Member not found after insert")
    }

    pub fn set_member_role(&self, workspace_id: i64, user_id: i64, role: Role) -> Result<Member> {
        let count = self
            .conn
            .execute(
                "UPDATE workspace_members SET role = ?1 WHERE workspace_id = ?2 AND user_id = ?3",
                params![role.as_str(), workspace_id, user_id],
            )
            .context("Failed to update member role")?;
        if count == 0 {
            return Err(BoardError::MemberNotFound {
                workspace_id,
                user_id,
            }
            .into());
        }
        self.get_member(workspace_id, user_id)?
            .context("Member not found after role update")
    }

    /// Remove a membership together with any board guest grants the user
    /// holds in that workspace.
    pub fn remove_member(&self, workspace_id: i64, user_id: i64) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "DELETE FROM board_guests WHERE user_id = ?1
             AND board_id IN (SELECT id FROM boards WHERE workspace_id = ?2)",
            params![user_id, workspace_id],
        )
        .context("Failed to delete guest grants")?;
        let count = tx
            .execute(
                "DELETE FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace_id, user_id],
            )
            .context("Failed to delete member")?;
        tx.commit().context("Failed to commit member removal")?;
        Ok(count > 0)
    }

    // ── Board guests ──────────────────────────────────────────────────

    pub fn has_guest_access(&self, board_id: i64, user_id: i64) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM board_guests WHERE board_id = ?1 AND user_id = ?2",
                params![board_id, user_id],
                |row| row.get(0),
            )
            .context("Failed to query guest access")
    }

    /// Effective role of `user_id` on a board of `workspace_id`.
    pub fn effective_board_role(
        &self,
        workspace_id: i64,
        board_id: i64,
        user_id: i64,
    ) -> Result<Option<Role>> {
        let membership = self.member_role(workspace_id, user_id)?;
        let has_grant = match membership {
            Some(Role::Guest) => self.has_guest_access(board_id, user_id)?,
            _ => false,
        };
        Ok(resolve_board_role(membership, has_grant))
    }

    /// Grant a user guest access to one board. Users without a membership
    /// become Guest members of the workspace; full members are rejected since
    /// they already see every board.
    pub fn add_board_guest(&self, workspace_id: i64, board_id: i64, user_id: i64) -> Result<Member> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        match self.member_role(workspace_id, user_id)? {
            None => {
                tx.execute(
                    "INSERT INTO workspace_members (workspace_id, user_id, role) VALUES (?1, ?2, ?3)",
                    params![workspace_id, user_id, Role::Guest.as_str()],
                )
                .context("Failed to insert guest membership")?;
            }
            Some(Role::Guest) => {}
            Some(role) => {
                return Err(BoardError::Conflict(format!(
                    "User {} is already a workspace {} and cannot be added as a guest",
                    user_id, role
                ))
                .into());
            }
        }
        tx.execute(
            "INSERT OR IGNORE INTO board_guests (board_id, user_id) VALUES (?1, ?2)",
            params![board_id, user_id],
        )
        .context("Failed to insert guest grant")?;
        tx.commit().context("Failed to commit guest grant")?;
        self.get_member(workspace_id, user_id)?
            .context("Guest membership not found after insert")
    }

    /// Revoke a guest's access to one board. Returns false when the user
    /// held no grant. The Guest membership goes away with the last grant.
    pub fn remove_board_guest(&self, workspace_id: i64, board_id: i64, user_id: i64) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let count = tx
            .execute(
                "DELETE FROM board_guests WHERE board_id = ?1 AND user_id = ?2",
                params![board_id, user_id],
            )
            .context("Failed to delete guest grant")?;
        let remaining: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM board_guests g JOIN boards b ON b.id = g.board_id
                 WHERE g.user_id = ?1 AND b.workspace_id = ?2",
                params![user_id, workspace_id],
                |row| row.get(0),
            )
            .context("Failed to count guest grants")?;
        if remaining == 0 {
            tx.execute(
                "DELETE FROM workspace_members
                 WHERE workspace_id = ?1 AND user_id = ?2 AND role = ?3",
                params![workspace_id, user_id, Role::Guest.as_str()],
            )
            .context("Failed to delete guest membership")?;
        }
        tx.commit().context("Failed to commit guest removal")?;
        Ok(count > 0)
    }

    pub fn list_board_guests(&self, board_id: i64) -> Result<Vec<Member>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS}
             FROM board_guests g
             JOIN boards b ON b.id = g.board_id
             JOIN workspace_members m ON m.workspace_id = b.workspace_id AND m.user_id = g.user_id
             JOIN users u ON u.id = g.user_id
             WHERE g.board_id = ?1 ORDER BY u.id"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_board_guests")?;
        let rows = stmt
            .query_map(params![board_id], MemberRow::from_row)
            .context("Failed to query board guests")?;
        let mut guests = Vec::new();
        for row in rows {
            guests.push(row.context("Failed to read guest row")?.into_member()?);
        }
        Ok(guests)
    }
}
