use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{BoardDb, conflict_on_unique};
use crate::board::models::User;
use crate::errors::BoardError;

/// Stored state of one refresh token.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTokenRecord {
    pub user_id: i64,
    pub family_id: String,
    pub expires_at: i64,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResetTokenRecord {
    pub user_id: i64,
    pub expires_at: i64,
    pub used: bool,
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl BoardDb {
    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(&self, email: &str, name: &str, password_hash: &str) -> Result<User> {
        let email = normalize_email(email);
        self.conn
            .execute(
                "INSERT INTO users (email, name, password_hash) VALUES (?1, ?2, ?3)",
                params![email, name, password_hash],
            )
            .map_err(|e| conflict_on_unique(e, format!("Email {} is already registered", email)))?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE id = ?1",
                params![id],
                row_to_user,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE email = ?1",
                params![normalize_email(email)],
                row_to_user,
            )
            .optional()
            .context("Failed to query user by email")
    }

    /// User together with the stored password hash.
    pub fn user_credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        self.conn
            .query_row(
                "SELECT id, email, name, created_at, password_hash FROM users WHERE email = ?1",
                params![normalize_email(email)],
                |row| Ok((row_to_user(row)?, row.get(4)?)),
            )
            .optional()
            .context("Failed to query user credentials")
    }

    pub fn set_password_hash(&self, user_id: i64, password_hash: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                params![password_hash, user_id],
            )
            .context("Failed to update password hash")?;
        Ok(())
    }

    // ── Access-token sessions ─────────────────────────────────────────

    pub fn insert_session(&self, token_hash: &str, user_id: i64, expires_at: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (token_hash, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token_hash, user_id, expires_at],
            )
            .context("Failed to insert session")?;
        Ok(())
    }

    /// The user owning an unexpired session.
    pub fn session_user(&self, token_hash: &str, now: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT u.id, u.email, u.name, u.created_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token_hash = ?1 AND s.expires_at > ?2",
                params![token_hash, now],
                row_to_user,
            )
            .optional()
            .context("Failed to query session")
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE token_hash = ?1", params![token_hash])
            .context("Failed to delete session")?;
        Ok(count > 0)
    }

    pub fn delete_user_sessions(&self, user_id: i64) -> Result<usize> {
        self.conn
            .execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])
            .context("Failed to delete user sessions")
    }

    pub fn purge_expired_tokens(&self, now: i64) -> Result<usize> {
        let mut removed = 0;
        for sql in [
            "DELETE FROM sessions WHERE expires_at <= ?1",
            "DELETE FROM refresh_tokens WHERE expires_at <= ?1",
            "DELETE FROM reset_tokens WHERE expires_at <= ?1",
        ] {
            removed += self
                .conn
                .execute(sql, params![now])
                .context("Failed to purge expired tokens")?;
        }
        Ok(removed)
    }

    // ── Refresh tokens ────────────────────────────────────────────────

    pub fn insert_refresh_token(
        &self,
        token_hash: &str,
        user_id: i64,
        family_id: &str,
        expires_at: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO refresh_tokens (token_hash, user_id, family_id, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![token_hash, user_id, family_id, expires_at],
            )
            .context("Failed to insert refresh token")?;
        Ok(())
    }

    pub fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        self.conn
            .query_row(
                "SELECT user_id, family_id, expires_at, revoked
                 FROM refresh_tokens WHERE token_hash = ?1",
                params![token_hash],
                |row| {
                    Ok(RefreshTokenRecord {
                        user_id: row.get(0)?,
                        family_id: row.get(1)?,
                        expires_at: row.get(2)?,
                        revoked: row.get::<_, i64>(3)? != 0,
                    })
                },
            )
            .optional()
            .context("Failed to query refresh token")
    }

    pub fn revoke_refresh_token(&self, token_hash: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ?1",
                params![token_hash],
            )
            .context("Failed to revoke refresh token")?;
        Ok(())
    }

    pub fn revoke_refresh_family(&self, family_id: &str) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE refresh_tokens SET revoked = 1 WHERE family_id = ?1 AND revoked = 0",
                params![family_id],
            )
            .context("Failed to revoke refresh token family")
    }

    pub fn revoke_user_refresh_tokens(&self, user_id: i64) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE refresh_tokens SET revoked = 1 WHERE user_id = ?1 AND revoked = 0",
                params![user_id],
            )
            .context("Failed to revoke user refresh tokens")
    }

    // ── Password reset tokens ─────────────────────────────────────────

    pub fn insert_reset_token(&self, token_hash: &str, user_id: i64, expires_at: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO reset_tokens (token_hash, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token_hash, user_id, expires_at],
            )
            .context("Failed to insert reset token")?;
        Ok(())
    }

    pub fn find_reset_token(&self, token_hash: &str) -> Result<Option<ResetTokenRecord>> {
        self.conn
            .query_row(
                "SELECT user_id, expires_at, used FROM reset_tokens WHERE token_hash = ?1",
                params![token_hash],
                |row| {
                    Ok(ResetTokenRecord {
                        user_id: row.get(0)?,
                        expires_at: row.get(1)?,
                        used: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()
            .context("Failed to query reset token")
    }

    /// Consume a reset token and apply the new password hash, revoking every
    /// session and refresh token of the user. All or nothing. Returns the
    /// number of sessions and refresh tokens revoked.
    pub fn complete_password_reset(
        &self,
        token_hash: &str,
        user_id: i64,
        password_hash: &str,
    ) -> Result<(usize, usize)> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let claimed = self
            .conn
            .execute(
                "UPDATE reset_tokens SET used = 1 WHERE token_hash = ?1 AND user_id = ?2 AND used = 0",
                params![token_hash, user_id],
            )
            .context("Failed to mark reset token used")?;
        if claimed == 0 {
            return Err(BoardError::InvalidToken.into());
        }
        self.set_password_hash(user_id, password_hash)?;
        let sessions = self.delete_user_sessions(user_id)?;
        let refresh_tokens = self.revoke_user_refresh_tokens(user_id)?;
        tx.commit().context("Failed to commit password reset")?;
        Ok((sessions, refresh_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_user_normalizes_email() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let user = db.create_user("  Alice@Example.COM ", "Alice", "hash")?;
        assert_eq!(user.email, "alice@example.com");
        assert!(db.find_user_by_email("ALICE@example.com")?.is_some());
        Ok(())
    }

    #[test]
    fn test_duplicate_email_is_conflict() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        db.create_user("bob@example.com", "Bob", "hash")?;
        let err = db.create_user("BOB@example.com", "Bob 2", "hash").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::Conflict(_))
        ));
        Ok(())
    }

    #[test]
    fn test_user_credentials_returns_hash() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let user = db.create_user("c@example.com", "C", "stored-hash")?;
        let (found, hash) = db.user_credentials("c@example.com")?.expect("user exists");
        assert_eq!(found.id, user.id);
        assert_eq!(hash, "stored-hash");

        db.set_password_hash(user.id, "new-hash")?;
        let (_, hash) = db.user_credentials("c@example.com")?.expect("user exists");
        assert_eq!(hash, "new-hash");
        Ok(())
    }

    #[test]
    fn test_session_expiry() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let user = db.create_user("d@example.com", "D", "hash")?;
        db.insert_session("abc", user.id, 1_000)?;
        assert_eq!(db.session_user("abc", 999)?.map(|u| u.id), Some(user.id));
        assert!(db.session_user("abc", 1_000)?.is_none());
        assert!(db.delete_session("abc")?);
        assert!(!db.delete_session("abc")?);
        Ok(())
    }

    #[test]
    fn test_refresh_family_revocation() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let user = db.create_user("e@example.com", "E", "hash")?;
        db.insert_refresh_token("r1", user.id, "fam", 5_000)?;
        db.insert_refresh_token("r2", user.id, "fam", 5_000)?;
        db.insert_refresh_token("other", user.id, "fam2", 5_000)?;

        assert_eq!(db.revoke_refresh_family("fam")?, 2);
        assert!(db.find_refresh_token("r1")?.expect("exists").revoked);
        assert!(db.find_refresh_token("r2")?.expect("exists").revoked);
        assert!(!db.find_refresh_token("other")?.expect("exists").revoked);
        Ok(())
    }

    #[test]
    fn test_purge_expired_tokens() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let user = db.create_user("f@example.com", "F", "hash")?;
        db.insert_session("s-old", user.id, 10)?;
        db.insert_session("s-new", user.id, 100)?;
        db.insert_reset_token("reset-old", user.id, 10)?;
        assert_eq!(db.purge_expired_tokens(50)?, 2);
        assert!(db.session_user("s-new", 50)?.is_some());
        Ok(())
    }

    #[test]
    fn test_complete_password_reset() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let user = db.create_user("g@example.com", "G", "old-hash")?;
        db.insert_session("s1", user.id, 5_000)?;
        db.insert_refresh_token("r1", user.id, "fam", 5_000)?;
        db.insert_reset_token("reset", user.id, 5_000)?;

        assert_eq!(db.complete_password_reset("reset", user.id, "new-hash")?, (1, 1));
        assert!(db.find_reset_token("reset")?.expect("exists").used);
        assert!(db.session_user("s1", 0)?.is_none());
        assert!(db.find_refresh_token("r1")?.expect("exists").revoked);
        let (_, hash) = db.user_credentials("g@example.com")?.expect("user exists");
        assert_eq!(hash, "new-hash");

        let err = db.complete_password_reset("reset", user.id, "other-hash").unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::InvalidToken)));
        let (_, hash) = db.user_credentials("g@example.com")?.expect("user exists");
        assert_eq!(hash, "new-hash");
        Ok(())
    }

    #[test]
    fn test_failed_password_reset_rolls_back() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let user = db.create_user("h@example.com", "H", "old-hash")?;
        db.insert_session("s1", user.id, 5_000)?;
        db.insert_refresh_token("r1", user.id, "fam", 5_000)?;
        db.insert_reset_token("reset", user.id, 5_000)?;
        db.conn.execute_batch(
            "CREATE TEMP TRIGGER block_revoke BEFORE UPDATE ON refresh_tokens
             BEGIN SELECT RAISE(ABORT, 'revocation blocked'); END;",
        )?;

        assert!(db.complete_password_reset("reset", user.id, "new-hash").is_err());
        assert!(!db.find_reset_token("reset")?.expect("exists").used);
        assert!(db.session_user("s1", 0)?.is_some());
        let (_, hash) = db.user_credentials("h@example.com")?.expect("user exists");
        assert_eq!(hash, "old-hash");
        Ok(())
    }
}
