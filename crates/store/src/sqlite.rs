//! SQLite store.
//!
//! Uses a single SQLite database file with five tables:
//! - `sessions`: conversation sessions, active while `ended_at IS NULL`
//! - `messages`: immutable chat lines, tagged with their origin
//! - `usage`: per-user message counter and premium flag
//! - `persona_selection`: which persona each user picked
//! - `relationship_summaries`: long-lived facts about each user
//!
//! Timestamps are stored as fixed-width RFC 3339 text so that lexical order
//! matches chronological order.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use kindred_core::error::StorageError;
use kindred_core::message::{Message, MessageTag, Role};
use kindred_core::session::{Session, SessionType};
use kindred_core::storage::{RelationshipSummary, Storage, UsageRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite store.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StorageError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Every connection to `:memory:` gets its own database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations: creates tables and indexes.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let statements: [(&str, &str); 8] = [
            (
                "sessions table",
                r#"
                CREATE TABLE IF NOT EXISTS sessions (
                    id           TEXT PRIMARY KEY NOT NULL,
                    user_id      TEXT NOT NULL,
                    session_type TEXT NOT NULL,
                    started_at   TEXT NOT NULL,
                    ended_at     TEXT
                )
                "#,
            ),
            (
                "sessions index",
                "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, started_at DESC)",
            ),
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    iid        INTEGER PRIMARY KEY AUTOINCREMENT,
                    id         TEXT UNIQUE NOT NULL,
                    session_id TEXT NOT NULL,
                    user_id    TEXT NOT NULL,
                    role       TEXT NOT NULL,
                    content    TEXT NOT NULL,
                    tag        TEXT NOT NULL DEFAULT 'chat',
                    created_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "messages user index",
                "CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id, created_at DESC)",
            ),
            (
                "messages session index",
                "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at DESC)",
            ),
            (
                "usage table",
                r#"
                CREATE TABLE IF NOT EXISTS usage (
                    user_id       TEXT PRIMARY KEY NOT NULL,
                    message_count INTEGER NOT NULL DEFAULT 0,
                    is_premium    INTEGER NOT NULL DEFAULT 0
                )
                "#,
            ),
            (
                "persona_selection table",
                r#"
                CREATE TABLE IF NOT EXISTS persona_selection (
                    user_id    TEXT PRIMARY KEY NOT NULL,
                    persona_id TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "relationship_summaries table",
                r#"
                CREATE TABLE IF NOT EXISTS relationship_summaries (
                    user_id             TEXT PRIMARY KEY NOT NULL,
                    known_traits        TEXT NOT NULL DEFAULT '[]',
                    love_language       TEXT,
                    communication_style TEXT,
                    summary             TEXT NOT NULL DEFAULT '',
                    updated_at          TEXT NOT NULL
                )
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Parse a `Session` from a SQLite row.
    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, StorageError> {
        let id: String = column(row, "id")?;
        let user_id: String = column(row, "user_id")?;
        let session_type: String = column(row, "session_type")?;
        let started_at: String = column(row, "started_at")?;
        let ended_at: Option<String> = column(row, "ended_at")?;

        Ok(Session {
            id,
            user_id,
            session_type: SessionType::from_str(&session_type).unwrap_or_default(),
            started_at: parse_ts(&started_at)?,
            ended_at: ended_at.as_deref().map(parse_ts).transpose()?,
        })
    }

    /// Parse a `Message` from a SQLite row.
    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StorageError> {
        let role: String = column(row, "role")?;
        let tag: String = column(row, "tag")?;
        let created_at: String = column(row, "created_at")?;

        Ok(Message {
            id: column(row, "id")?,
            session_id: column(row, "session_id")?,
            user_id: column(row, "user_id")?,
            role: Role::from_str(&role).map_err(StorageError::QueryFailed)?,
            content: column(row, "content")?,
            tag: MessageTag::from_str(&tag).unwrap_or_default(),
            created_at: parse_ts(&created_at)?,
        })
    }
}

fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, StorageError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StorageError::QueryFailed(format!("{name} column: {e}")))
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::QueryFailed(format!("bad timestamp {s:?}: {e}")))
}

#[async_trait]
impl Storage for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn active_sessions(&self, user_id: &str) -> Result<Vec<Session>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE user_id = ?1 AND ended_at IS NULL \
             ORDER BY started_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("active sessions: {e}")))?;

        rows.iter().map(Self::row_to_session).collect()
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, session_type, started_at, ended_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.session_type.as_str())
        .bind(format_ts(session.started_at))
        .bind(session.ended_at.map(format_ts))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::WriteFailed(format!("INSERT session failed: {e}")))?;

        debug!(session_id = %session.id, user_id = %session.user_id, "Stored session");
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StorageError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("get session: {e}")))?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn end_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Session>, StorageError> {
        sqlx::query("UPDATE sessions SET ended_at = ?1 WHERE id = ?2 AND ended_at IS NULL")
            .bind(format_ts(ended_at))
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("end session: {e}")))?;

        self.get_session(session_id).await
    }

    async fn recent_sessions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Session>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE user_id = ?1 \
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("recent sessions: {e}")))?;

        rows.iter().map(Self::row_to_session).collect()
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, user_id, role, content, tag, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(&message.user_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.tag.as_str())
        .bind(format_ts(message.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::WriteFailed(format!("INSERT message failed: {e}")))?;

        debug!(message_id = %message.id, tag = message.tag.as_str(), "Stored message");
        Ok(())
    }

    async fn last_message_at(
        &self,
        session_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let row = sqlx::query("SELECT MAX(created_at) AS last FROM messages WHERE session_id = ?1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("last message: {e}")))?;

        let last: Option<String> = column(&row, "last")?;
        last.as_deref().map(parse_ts).transpose()
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE user_id = ?1 \
             ORDER BY created_at DESC, iid DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("recent messages: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn message_counts(
        &self,
        session_ids: &[String],
    ) -> Result<HashMap<String, usize>, StorageError> {
        let mut counts: HashMap<String, usize> =
            session_ids.iter().map(|id| (id.clone(), 0)).collect();
        if session_ids.is_empty() {
            return Ok(counts);
        }

        // One grouped query for the whole batch
        let placeholders = (1..=session_ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT session_id, COUNT(*) AS n FROM messages \
             WHERE session_id IN ({placeholders}) GROUP BY session_id"
        );

        let mut query = sqlx::query(&sql);
        for id in session_ids {
            query = query.bind(id);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("message counts: {e}")))?;

        for row in &rows {
            let session_id: String = column(row, "session_id")?;
            let n: i64 = column(row, "n")?;
            counts.insert(session_id, n.max(0) as usize);
        }

        Ok(counts)
    }

    async fn relationship_summary(
        &self,
        user_id: &str,
    ) -> Result<Option<RelationshipSummary>, StorageError> {
        let row = sqlx::query("SELECT * FROM relationship_summaries WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("relationship summary: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let traits_json: String = column(&row, "known_traits")?;
        let updated_at: String = column(&row, "updated_at")?;

        Ok(Some(RelationshipSummary {
            user_id: column(&row, "user_id")?,
            known_traits: serde_json::from_str(&traits_json).unwrap_or_default(),
            love_language: column(&row, "love_language")?,
            communication_style: column(&row, "communication_style")?,
            summary: column(&row, "summary")?,
            updated_at: parse_ts(&updated_at)?,
        }))
    }

    async fn upsert_summary(&self, summary: &RelationshipSummary) -> Result<(), StorageError> {
        let traits_json = serde_json::to_string(&summary.known_traits)
            .map_err(|e| StorageError::WriteFailed(format!("traits serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO relationship_summaries
                (user_id, known_traits, love_language, communication_style, summary, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
                known_traits = excluded.known_traits,
                love_language = excluded.love_language,
                communication_style = excluded.communication_style,
                summary = excluded.summary,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&summary.user_id)
        .bind(&traits_json)
        .bind(&summary.love_language)
        .bind(&summary.communication_style)
        .bind(&summary.summary)
        .bind(format_ts(summary.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::WriteFailed(format!("upsert summary: {e}")))?;

        Ok(())
    }

    async fn usage(&self, user_id: &str) -> Result<UsageRecord, StorageError> {
        let row = sqlx::query("SELECT message_count, is_premium FROM usage WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("usage: {e}")))?;

        let Some(row) = row else {
            return Ok(UsageRecord {
                user_id: user_id.to_string(),
                ..UsageRecord::default()
            });
        };

        let message_count: i64 = column(&row, "message_count")?;
        let is_premium: bool = column(&row, "is_premium")?;
        Ok(UsageRecord {
            user_id: user_id.to_string(),
            message_count: message_count.max(0) as u64,
            is_premium,
        })
    }

    async fn increment_usage(&self, user_id: &str) -> Result<u64, StorageError> {
        let row = sqlx::query(
            r#"
            INSERT INTO usage (user_id, message_count) VALUES (?1, 1)
            ON CONFLICT(user_id) DO UPDATE SET message_count = message_count + 1
            RETURNING message_count
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::WriteFailed(format!("increment usage: {e}")))?;

        let count: i64 = column(&row, "message_count")?;
        Ok(count.max(0) as u64)
    }

    async fn set_premium(&self, user_id: &str, is_premium: bool) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO usage (user_id, message_count, is_premium) VALUES (?1, 0, ?2)
            ON CONFLICT(user_id) DO UPDATE SET is_premium = excluded.is_premium
            "#,
        )
        .bind(user_id)
        .bind(is_premium)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::WriteFailed(format!("set premium: {e}")))?;

        Ok(())
    }

    async fn persona_selection(&self, user_id: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT persona_id FROM persona_selection WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("persona selection: {e}")))?;

        row.as_ref().map(|r| column(r, "persona_id")).transpose()
    }

    async fn select_persona(&self, user_id: &str, persona_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO persona_selection (user_id, persona_id, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                persona_id = excluded.persona_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(persona_id)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::WriteFailed(format!("select persona: {e}")))?;

        Ok(())
    }
}
