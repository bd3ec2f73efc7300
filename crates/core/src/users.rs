//! Registered accounts backing the authentication gate.
//!
//! Users are created once at registration and never mutated. The password verifier is an
//! opaque PHC string produced by the caller; this module never hashes or compares passwords.

use chrono::{DateTime, SubsecRound, Utc};
use filehub_types::NonEmptyText;
use filehub_uuid::UuidService;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("username already taken")]
    UsernameTaken,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("corrupt user {username}: {reason}")]
    Corrupt { username: String, reason: String },
    #[error("user store lock poisoned")]
    LockPoisoned,
}

pub type UserResult<T> = std::result::Result<T, UserError>;

#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: UuidService,
    pub username: NonEmptyText,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A fresh account with a new id, created now.
    pub fn new(username: NonEmptyText, password_hash: String) -> Self {
        Self {
            id: UuidService::new(),
            username,
            password_hash,
            created_at: Utc::now().trunc_subsecs(6),
        }
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

pub trait UserStore: Send + Sync {
    /// Stores a new user.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::UsernameTaken`] if the username is already registered.
    fn create(&self, user: &User) -> UserResult<()>;

    fn find_by_username(&self, username: &str) -> UserResult<Option<User>>;
}

#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for InMemoryUserStore {
    fn create(&self, user: &User) -> UserResult<()> {
        let mut users = self.users.write().map_err(|_| UserError::LockPoisoned)?;
        if users.contains_key(user.username.as_str()) {
            return Err(UserError::UsernameTaken);
        }
        users.insert(user.username.as_str().to_string(), user.clone());
        Ok(())
    }

    fn find_by_username(&self, username: &str) -> UserResult<Option<User>> {
        let users = self.users.read().map_err(|_| UserError::LockPoisoned)?;
        Ok(users.get(username).cloned())
    }
}

pub struct SqliteUserStore {
    conn: Mutex<Connection>,
}

impl SqliteUserStore {
    pub fn open(path: &Path) -> UserResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> UserResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> UserResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> UserResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| UserError::LockPoisoned)
    }
}

impl UserStore for SqliteUserStore {
    fn create(&self, user: &User) -> UserResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id.to_string(),
                user.username.as_str(),
                user.password_hash,
                user.created_at.timestamp_micros(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                UserError::UsernameTaken
            }
            other => UserError::Database(other),
        })?;
        Ok(())
    }

    fn find_by_username(&self, username: &str) -> UserResult<Option<User>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, username, password_hash, created_at FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, password_hash, created_at)) = row else {
            return Ok(None);
        };
        let corrupt = |reason: String| UserError::Corrupt {
            username: name.clone(),
            reason,
        };

        Ok(Some(User {
            id: UuidService::parse(&id).map_err(|e| corrupt(e.to_string()))?,
            username: NonEmptyText::new(&name).map_err(|e| corrupt(e.to_string()))?,
            password_hash,
            created_at: DateTime::<Utc>::from_timestamp_micros(created_at)
                .ok_or_else(|| corrupt(format!("timestamp {} out of range", created_at)))?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user(name: &str) -> User {
        User::new(NonEmptyText::new(name).unwrap(), "$argon2id$stub".into())
    }

    fn exercise_store(store: &dyn UserStore) {
        let alice = user("alice");
        store.create(&alice).unwrap();

        assert!(matches!(
            store.create(&user("alice")),
            Err(UserError::UsernameTaken)
        ));
        assert_eq!(store.find_by_username("alice").unwrap(), Some(alice));
        assert_eq!(store.find_by_username("bob").unwrap(), None);
    }

    #[test]
    fn test_in_memory_user_store() {
        exercise_store(&InMemoryUserStore::new());
    }

    #[test]
    fn test_sqlite_user_store() {
        exercise_store(&SqliteUserStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_user_store_shares_database_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("filehub.db");
        let metadata = crate::metadata::SqliteMetadataStore::open(&path).unwrap();
        let users = SqliteUserStore::open(&path).unwrap();

        users.create(&user("carol")).unwrap();

        assert!(users.find_by_username("carol").unwrap().is_some());
        drop(metadata);
    }

    #[test]
    fn test_debug_redacts_password_hash() {
        let rendered = format!("{:?}", user("dave"));

        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("argon2id"));
    }
}
