//! SQLite persistence for users, sessions, and messages.
//!
//! All writes are keyed by natural keys that include `user_id`, so
//! client-generated identifiers can never cross user boundaries. Sync
//! writes are full-field upserts: replaying the same payload is a no-op,
//! which is what makes client retry loops safe.

use anyhow::{Context as _, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

/// Per-query ceiling; a wedged SQLite call fails instead of holding the
/// request open.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Session id backing the flat `/chats` view. One per user, created on
/// demand; never listed specially, it is an ordinary session row.
pub const PRIMARY_SESSION_ID: &str = "primary";

/// Title given to server-created sessions (the client renames them on the
/// first message).
pub const NEW_CHAT_TITLE: &str = "New Chat";

/// Run a store operation under `QUERY_TIMEOUT`, mapping expiry to an error.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "store query exceeded the {}s limit",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

// ─── Row types ────────────────────────────────────────────────────────────────

/// Message author. Stored as lowercase TEXT; the schema CHECK mirrors this
/// enum so nothing else can reach the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(anyhow::anyhow!("unknown message role: {other}")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    /// Last-activity timestamp, an opaque ordered string.
    pub timestamp: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub content: String,
    pub role: String,
    pub timestamp: String,
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create the store with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds; queries exceeding it
    /// are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("parley.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            use sqlx::ConnectOptions as _;
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap, Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("src/store/migrations")
            .run(pool)
            .await
            .context("failed to apply store migrations")?;
        Ok(())
    }

    // ─── Users ──────────────────────────────────────────────────────────────

    /// Look up a user by email, creating the row on first sight.
    ///
    /// Concurrent first-sight calls are safe: the insert ignores the unique
    /// conflict and both callers read back the same row.
    pub async fn find_or_create_user(&self, email: &str) -> Result<UserRow> {
        with_timeout(async {
            if let Some(user) = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?
            {
                return Ok(user);
            }
            let id = Uuid::new_v4().to_string();
            let now = Utc::now().to_rfc3339();
            sqlx::query(
                "INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)
                 ON CONFLICT(email) DO NOTHING",
            )
            .bind(&id)
            .bind(email)
            .bind(&now)
            .execute(&self.pool)
            .await?;
            sqlx::query_as("SELECT * FROM users WHERE email = ?")
                .bind(email)
                .fetch_one(&self.pool)
                .await
                .context("user row missing after write")
        })
        .await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        with_timeout(async {
            Ok(sqlx::query_as("SELECT * FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?)
        })
        .await
    }

    // ─── Sessions ───────────────────────────────────────────────────────────

    /// Insert or fully overwrite a session by its `(id, user_id)` key.
    pub async fn upsert_session(
        &self,
        user_id: &str,
        id: &str,
        title: &str,
        timestamp: &str,
    ) -> Result<()> {
        with_timeout(async {
            sqlx::query(
                "INSERT INTO sessions (id, user_id, title, timestamp) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id, user_id) DO UPDATE SET
                     title = excluded.title,
                     timestamp = excluded.timestamp",
            )
            .bind(id)
            .bind(user_id)
            .bind(title)
            .bind(timestamp)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Create a session with a server-generated id and current timestamp.
    pub async fn create_session(&self, user_id: &str, title: &str) -> Result<SessionRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.upsert_session(user_id, &id, title, &now).await?;
        self.get_session(user_id, &id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("session row missing after write"))
    }

    /// Fetch the per-user session backing the flat `/chats` view, creating it
    /// on first use. The conflict clause keeps an existing row's title and
    /// timestamp untouched.
    pub async fn ensure_primary_session(&self, user_id: &str) -> Result<SessionRow> {
        with_timeout(async {
            let now = Utc::now().to_rfc3339();
            sqlx::query(
                "INSERT INTO sessions (id, user_id, title, timestamp) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id, user_id) DO NOTHING",
            )
            .bind(PRIMARY_SESSION_ID)
            .bind(user_id)
            .bind(NEW_CHAT_TITLE)
            .bind(&now)
            .execute(&self.pool)
            .await?;
            sqlx::query_as("SELECT * FROM sessions WHERE id = ? AND user_id = ?")
                .bind(PRIMARY_SESSION_ID)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .context("primary session row missing after write")
        })
        .await
    }

    pub async fn get_session(&self, user_id: &str, id: &str) -> Result<Option<SessionRow>> {
        with_timeout(async {
            Ok(
                sqlx::query_as("SELECT * FROM sessions WHERE id = ? AND user_id = ?")
                    .bind(id)
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await?,
            )
        })
        .await
    }

    /// All sessions for a user, most recent activity first. Equal timestamps
    /// fall back to insertion order, newest insert first.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM sessions WHERE user_id = ? ORDER BY timestamp DESC, rowid DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Delete a session owned by `user_id`. Returns false when no such row
    /// exists (wrong id or someone else's session, indistinguishable on
    /// purpose). Messages are not cascaded: the canonical re-read is
    /// session-driven, so orphans never surface, and a later sync carrying
    /// the same session id revives the thread.
    pub async fn delete_session(&self, user_id: &str, id: &str) -> Result<bool> {
        with_timeout(async {
            let result = sqlx::query("DELETE FROM sessions WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    // ─── Messages ───────────────────────────────────────────────────────────

    /// Insert or fully overwrite a message by its `(id, session_id, user_id)`
    /// key. The rowid survives conflict updates, so insertion order remains
    /// the tie-break for equal timestamps.
    pub async fn upsert_message(
        &self,
        user_id: &str,
        session_id: &str,
        id: &str,
        content: &str,
        role: Role,
        timestamp: &str,
    ) -> Result<()> {
        with_timeout(async {
            sqlx::query(
                "INSERT INTO messages (id, session_id, user_id, content, role, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id, session_id, user_id) DO UPDATE SET
                     content = excluded.content,
                     role = excluded.role,
                     timestamp = excluded.timestamp",
            )
            .bind(id)
            .bind(session_id)
            .bind(user_id)
            .bind(content)
            .bind(role.as_str())
            .bind(timestamp)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Append a server-generated message and bump the owning session's
    /// activity timestamp in one transaction.
    pub async fn append_message(
        &self,
        user_id: &str,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<MessageRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        with_timeout(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                "INSERT INTO messages (id, session_id, user_id, content, role, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(session_id)
            .bind(user_id)
            .bind(content)
            .bind(role.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            sqlx::query("UPDATE sessions SET timestamp = ? WHERE id = ? AND user_id = ?")
                .bind(&now)
                .bind(session_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;
        self.get_message(user_id, session_id, &id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("message row missing after write"))
    }

    pub async fn get_message(
        &self,
        user_id: &str,
        session_id: &str,
        id: &str,
    ) -> Result<Option<MessageRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM messages WHERE id = ? AND session_id = ? AND user_id = ?",
            )
            .bind(id)
            .bind(session_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
        })
        .await
    }

    /// All messages of one session, oldest first. Equal timestamps keep
    /// insertion order.
    pub async fn list_messages(&self, user_id: &str, session_id: &str) -> Result<Vec<MessageRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM messages WHERE user_id = ? AND session_id = ?
                 ORDER BY timestamp ASC, rowid ASC",
            )
            .bind(user_id)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// The most recent `limit` messages of a session, presented oldest first
    /// (the shape a completion history wants).
    pub async fn recent_messages(
        &self,
        user_id: &str,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM (
                     SELECT *, rowid FROM messages WHERE user_id = ? AND session_id = ?
                     ORDER BY timestamp DESC, rowid DESC LIMIT ?
                 ) ORDER BY timestamp ASC, rowid ASC",
            )
            .bind(user_id)
            .bind(session_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Delete every message the user owns, across all sessions.
    /// Returns the number of rows removed.
    pub async fn delete_user_messages(&self, user_id: &str) -> Result<u64> {
        with_timeout(async {
            let result = sqlx::query("DELETE FROM messages WHERE user_id = ?")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
