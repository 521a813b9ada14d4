//! Credential store for the Vida Plena server.
//!
//! Durable mapping from user identity to hashed credential and profile
//! fields, backed by SQLite. The same database file also holds sessions
//! and newsletter subscriptions.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use plena_common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Minimum accepted password length at registration and password change.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Shared SQLite handle. Users, sessions, and newsletter records all live
/// in the same database file.
pub type Database = Arc<Mutex<Connection>>;

/// Open (or create) the database and run the schema.
pub fn open_database(db_path: &Path) -> Result<Database> {
    let conn = Connection::open(db_path).map_err(storage_err)?;

    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            profile_image TEXT,
            settings TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_name ON users(name);

        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_name);

        CREATE TABLE IF NOT EXISTS newsletter (
            email TEXT PRIMARY KEY,
            user_name TEXT,
            user_email TEXT,
            subscribed_at TEXT NOT NULL
        );
        ",
    )
    .map_err(storage_err)?;

    Ok(Arc::new(Mutex::new(conn)))
}

/// User record.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    /// Unique user ID
    pub id: String,
    /// Display name, the identity carried by sessions
    #[serde(rename = "nome")]
    pub name: String,
    /// Unique email address
    pub email: String,
    /// Argon2 password hash (never exposed in API responses)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Optional profile image reference
    #[serde(rename = "imagemPerfil")]
    pub profile_image: Option<String>,
    /// Account settings
    #[serde(skip_serializing)]
    pub settings: UserSettings,
    /// Creation timestamp
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

/// Account settings. A fixed set of named fields with defaults, not an
/// open map; the JSON names match what the front-end already sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSettings {
    #[serde(rename = "notificacoesEmail", default = "default_true")]
    pub notifications_email: bool,
    #[serde(rename = "notificacoesPush", default)]
    pub notifications_push: bool,
    #[serde(rename = "newsletterSemanal", default = "default_true")]
    pub weekly_newsletter: bool,
    #[serde(rename = "perfilPublico", default)]
    pub public_profile: bool,
    #[serde(rename = "compartilharDados", default = "default_true")]
    pub data_sharing: bool,
    #[serde(rename = "idioma", default = "default_locale")]
    pub locale: String,
    #[serde(rename = "tema", default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_true() -> bool {
    true
}

fn default_locale() -> String {
    "pt-br".to_string()
}

fn default_theme() -> String {
    "light".to_string()
}

fn default_timezone() -> String {
    "America/Sao_Paulo".to_string()
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            notifications_email: true,
            notifications_push: false,
            weekly_newsletter: true,
            public_profile: false,
            data_sharing: true,
            locale: default_locale(),
            theme: default_theme(),
            timezone: default_timezone(),
        }
    }
}

/// Partial profile update. `profile_image` distinguishes "absent" from
/// "explicitly cleared" with the nested `Option`.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub profile_image: Option<Option<String>>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

/// User store backed by the shared SQLite database.
#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a new account.
    ///
    /// The duplicate-email check and the insert are two separate
    /// statements; a concurrent registration can slip between them. That
    /// race is a documented limitation of this design, and the `UNIQUE`
    /// constraint on `email` backstops it by surfacing as a conflict.
    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<User> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("nome é obrigatório".into()));
        }
        if email.trim().is_empty() {
            return Err(Error::InvalidInput("e-mail é obrigatório".into()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(Error::InvalidInput(
                "a senha deve ter pelo menos 6 caracteres".into(),
            ));
        }

        let conn = self.lock()?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        if existing.is_some() {
            return Err(Error::Conflict("e-mail já cadastrado".into()));
        }

        let password_hash = hash_password(password)?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let settings = UserSettings::default();
        let settings_json =
            serde_json::to_string(&settings).map_err(|e| Error::Storage(e.to_string()))?;

        conn.execute(
            r"
            INSERT INTO users (id, name, email, password_hash, profile_image, settings, created_at)
            VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)
            ",
            params![id, name, email, password_hash, settings_json, now.to_rfc3339()],
        )
        .map_err(insert_user_err)?;

        Ok(User {
            id,
            name: name.to_string(),
            email: email.to_string(),
            password_hash,
            profile_image: None,
            settings,
            created_at: now,
        })
    }

    /// Look up an account by email, exact match.
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        get_internal(&conn, "email", email)
    }

    /// Look up an account by the session-carried display name.
    pub fn find_by_name(&self, name: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        get_internal(&conn, "name", name)
    }

    /// Verify a password for login. Returns the account on success,
    /// `None` for an unknown email or a wrong password.
    pub fn verify_login(&self, email: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.find_by_email(email)? else {
            return Ok(None);
        };

        if verify_password(password, &user.password_hash)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    /// Merge a partial profile update into an account.
    ///
    /// Returns the identity name in effect after the update; the caller
    /// must repoint any live session when it differs from `name`.
    pub fn update_profile(&self, name: &str, update: &ProfileUpdate) -> Result<String> {
        let Some(user) = self.find_by_name(name)? else {
            return Err(Error::NotFound("usuário não encontrado".into()));
        };

        // Target email must not belong to another account.
        if let Some(ref new_email) = update.email {
            if *new_email != user.email {
                let taken = self.find_by_email(new_email)?.is_some();
                if taken {
                    return Err(Error::Conflict(
                        "e-mail já está em uso por outro usuário".into(),
                    ));
                }
            }
        }

        // Password change requires the current password to match.
        if let (Some(current), Some(new_password)) =
            (&update.current_password, &update.new_password)
        {
            if !verify_password(current, &user.password_hash)? {
                return Err(Error::InvalidInput("senha atual incorreta".into()));
            }
            if new_password.len() < MIN_PASSWORD_LEN {
                return Err(Error::InvalidInput(
                    "a senha deve ter pelo menos 6 caracteres".into(),
                ));
            }
            let hash = hash_password(new_password)?;
            let conn = self.lock()?;
            conn.execute(
                "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                params![hash, user.id],
            )
            .map_err(storage_err)?;
        }

        let conn = self.lock()?;

        if let Some(ref new_name) = update.name {
            if !new_name.trim().is_empty() {
                conn.execute(
                    "UPDATE users SET name = ?1 WHERE id = ?2",
                    params![new_name, user.id],
                )
                .map_err(storage_err)?;
            }
        }

        if let Some(ref new_email) = update.email {
            if !new_email.trim().is_empty() {
                conn.execute(
                    "UPDATE users SET email = ?1 WHERE id = ?2",
                    params![new_email, user.id],
                )
                .map_err(insert_user_err)?;
            }
        }

        if let Some(ref image) = update.profile_image {
            conn.execute(
                "UPDATE users SET profile_image = ?1 WHERE id = ?2",
                params![image, user.id],
            )
            .map_err(storage_err)?;
        }

        let effective = update
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(name);
        Ok(effective.to_string())
    }

    /// Fetch account settings.
    pub fn settings(&self, name: &str) -> Result<UserSettings> {
        match self.find_by_name(name)? {
            Some(user) => Ok(user.settings),
            None => Err(Error::NotFound("usuário não encontrado".into())),
        }
    }

    /// Replace account settings wholesale.
    pub fn update_settings(&self, name: &str, settings: &UserSettings) -> Result<()> {
        let Some(user) = self.find_by_name(name)? else {
            return Err(Error::NotFound("usuário não encontrado".into()));
        };

        let settings_json =
            serde_json::to_string(settings).map_err(|e| Error::Storage(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE users SET settings = ?1 WHERE id = ?2",
            params![settings_json, user.id],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Delete an account by identity name. The caller is responsible for
    /// destroying any session that references it.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn
            .execute("DELETE FROM users WHERE name = ?1", params![name])
            .map_err(storage_err)?;
        Ok(rows > 0)
    }

    /// Subscribe an email to the newsletter, optionally associated with a
    /// logged-in account. Returns `false` when the email is already
    /// subscribed.
    pub fn subscribe_newsletter(&self, email: &str, user: Option<&User>) -> Result<bool> {
        let conn = self.lock()?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT email FROM newsletter WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        if existing.is_some() {
            return Ok(false);
        }

        conn.execute(
            r"
            INSERT INTO newsletter (email, user_name, user_email, subscribed_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                email,
                user.map(|u| u.name.as_str()),
                user.map(|u| u.email.as_str()),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(storage_err)?;

        Ok(true)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| Error::Storage(format!("database lock poisoned: {e}")))
    }
}

fn get_internal(conn: &Connection, field: &str, value: &str) -> Result<Option<User>> {
    let query = format!(
        "SELECT id, name, email, password_hash, profile_image, settings, created_at
         FROM users WHERE {field} = ?1"
    );

    conn.query_row(&query, params![value], |row| {
        let settings_json: String = row.get(5)?;
        let created_at: String = row.get(6)?;

        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            profile_image: row.get(4)?,
            settings: serde_json::from_str(&settings_json).unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    })
    .optional()
    .map_err(storage_err)
}

/// Hash a password using Argon2 with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Storage(format!("failed to hash password: {e}")))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| Error::Storage(format!("invalid password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Insert/update errors on `users` translate the email uniqueness
/// constraint into a conflict; everything else is a storage failure.
fn insert_user_err(e: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(inner, _) = &e {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation {
            return Error::Conflict("e-mail já cadastrado".into());
        }
    }
    storage_err(e)
}
