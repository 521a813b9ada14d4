//! Session manager for the Vida Plena server.
//!
//! Sessions are opaque server-side records persisted in the same SQLite
//! database as the credential store, with a 14-day absolute expiry. The
//! token proves a prior successful login; it does not prove the owning
//! account still exists, so callers needing account data must re-fetch
//! it and tolerate absence.

use chrono::{DateTime, Duration, Utc};
use plena_common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::store::Database;

/// Absolute session lifetime: 14 days.
pub const SESSION_TTL_SECS: i64 = 14 * 24 * 60 * 60;

/// A live session record.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque token carried in the cookie
    pub token: String,
    /// Display name of the owning account
    pub user_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Session store backed by the shared SQLite database.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Issue a new session bound to the given identity.
    pub fn create(&self, user_name: &str) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_name: user_name.to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(SESSION_TTL_SECS),
        };

        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO sessions (token, user_name, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                session.token,
                session.user_name,
                session.created_at.to_rfc3339(),
                session.expires_at.to_rfc3339(),
            ],
        )
        .map_err(storage_err)?;

        Ok(session)
    }

    /// Resolve a token to the identity it carries.
    ///
    /// Returns `None` for a missing or expired session. Expiry is checked
    /// passively here; expired rows are removed on sight.
    pub fn resolve(&self, token: &str) -> Result<Option<String>> {
        let conn = self.lock()?;

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT user_name, expires_at FROM sessions WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err)?;

        let Some((user_name, expires_at)) = row else {
            return Ok(None);
        };

        let expired = DateTime::parse_from_rfc3339(&expires_at)
            .map(|dt| dt.with_timezone(&Utc) <= Utc::now())
            .unwrap_or(true);
        if expired {
            conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
                .map_err(storage_err)?;
            return Ok(None);
        }

        Ok(Some(user_name))
    }

    /// Destroy a session. Idempotent; destroying an already-gone session
    /// is not an error.
    pub fn destroy(&self, token: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(storage_err)?;
        Ok(())
    }

    /// Destroy every session owned by an identity (account deletion).
    pub fn destroy_for_user(&self, user_name: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM sessions WHERE user_name = ?1",
            params![user_name],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Repoint live sessions after a profile rename, so the rename and
    /// the session update form one logical operation.
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sessions SET user_name = ?1 WHERE user_name = ?2",
            params![new_name, old_name],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Remove expired rows. Expiry stays a passive check at resolve time;
    /// this only reclaims storage.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![Utc::now().to_rfc3339()],
            )
            .map_err(storage_err)?;
        Ok(rows)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| Error::Storage(format!("database lock poisoned: {e}")))
    }
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_database;
    use tempfile::tempdir;

    fn create_test_store() -> (SessionStore, Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = open_database(&dir.path().join("plena.db")).unwrap();
        (SessionStore::new(db.clone()), db, dir)
    }

    fn insert_expired(db: &Database, token: &str, user: &str) {
        let past = (Utc::now() - Duration::seconds(60)).to_rfc3339();
        let conn = db.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (token, user_name, created_at, expires_at) VALUES (?1, ?2, ?3, ?3)",
            params![token, user, past],
        )
        .unwrap();
    }

    #[test]
    fn test_create_and_resolve() {
        let (sessions, _db, _dir) = create_test_store();

        let session = sessions.create("Maria").unwrap();
        assert_eq!(
            sessions.resolve(&session.token).unwrap().as_deref(),
            Some("Maria")
        );
        assert!(session.expires_at > session.created_at);
    }

    #[test]
    fn test_unknown_token_is_unauthenticated() {
        let (sessions, _db, _dir) = create_test_store();
        assert!(sessions.resolve("no-such-token").unwrap().is_none());
    }

    #[test]
    fn test_expired_session_is_unauthenticated() {
        let (sessions, db, _dir) = create_test_store();
        insert_expired(&db, "old-token", "Maria");

        assert!(sessions.resolve("old-token").unwrap().is_none());
        // The expired row was removed on sight.
        let conn = db.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (sessions, _db, _dir) = create_test_store();

        let session = sessions.create("Maria").unwrap();
        sessions.destroy(&session.token).unwrap();
        assert!(sessions.resolve(&session.token).unwrap().is_none());
        // Destroying again is not an error.
        sessions.destroy(&session.token).unwrap();
    }

    #[test]
    fn test_destroy_for_user() {
        let (sessions, _db, _dir) = create_test_store();

        let a = sessions.create("Maria").unwrap();
        let b = sessions.create("Maria").unwrap();
        let other = sessions.create("Joana").unwrap();

        sessions.destroy_for_user("Maria").unwrap();
        assert!(sessions.resolve(&a.token).unwrap().is_none());
        assert!(sessions.resolve(&b.token).unwrap().is_none());
        assert_eq!(
            sessions.resolve(&other.token).unwrap().as_deref(),
            Some("Joana")
        );
    }

    #[test]
    fn test_rename_repoints_sessions() {
        let (sessions, _db, _dir) = create_test_store();

        let session = sessions.create("Maria").unwrap();
        sessions.rename("Maria", "Maria Clara").unwrap();
        assert_eq!(
            sessions.resolve(&session.token).unwrap().as_deref(),
            Some("Maria Clara")
        );
    }

    #[test]
    fn test_purge_expired() {
        let (sessions, db, _dir) = create_test_store();
        insert_expired(&db, "t1", "Maria");
        insert_expired(&db, "t2", "Joana");
        let live = sessions.create("Ana").unwrap();

        assert_eq!(sessions.purge_expired().unwrap(), 2);
        assert_eq!(
            sessions.resolve(&live.token).unwrap().as_deref(),
            Some("Ana")
        );
    }
}
