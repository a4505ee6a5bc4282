//! Storage trait: the persistence collaborator.
//!
//! Everything the pipeline reads or writes goes through [`Storage`]: sessions,
//! messages, usage counters, persona selection and relationship summaries.
//!
//! Implementations: SQLite, in-memory (for testing), none (no-op). One is
//! chosen at startup; callers never branch on "is a database configured".

use crate::error::StorageError;
use crate::message::Message;
use crate::session::Session;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Long-lived facts about the person, distilled from past conversations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSummary {
    pub user_id: String,
    #[serde(default)]
    pub known_traits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub love_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communication_style: Option<String>,
    #[serde(default)]
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-user usage counter used by the quota gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub message_count: u64,
    pub is_premium: bool,
}

/// The core Storage trait.
#[async_trait]
pub trait Storage: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory", "none").
    fn name(&self) -> &str;

    // --- Sessions ---

    /// All sessions of the user with no end time, newest first.
    async fn active_sessions(&self, user_id: &str) -> Result<Vec<Session>, StorageError>;

    /// Persist a newly started session.
    async fn insert_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Fetch a session by id.
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StorageError>;

    /// Set `ended_at` on a session that is still open. Returns the stored
    /// session, if it exists; an already ended session keeps its `ended_at`.
    async fn end_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Session>, StorageError>;

    /// The user's most recent sessions (active or not), newest first.
    async fn recent_sessions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Session>, StorageError>;

    // --- Messages ---

    /// Persist a message. Messages are never updated afterwards.
    async fn insert_message(&self, message: &Message) -> Result<(), StorageError>;

    /// Timestamp of the newest message in a session.
    async fn last_message_at(
        &self,
        session_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// The user's most recent messages across all sessions, newest first.
    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;

    /// Message counts for a batch of sessions. Missing ids count as zero.
    async fn message_counts(
        &self,
        session_ids: &[String],
    ) -> Result<HashMap<String, usize>, StorageError>;

    // --- Relationship summary ---

    async fn relationship_summary(
        &self,
        user_id: &str,
    ) -> Result<Option<RelationshipSummary>, StorageError>;

    async fn upsert_summary(&self, summary: &RelationshipSummary) -> Result<(), StorageError>;

    // --- Usage & persona selection ---

    /// The user's usage record; unknown users get a zeroed record.
    async fn usage(&self, user_id: &str) -> Result<UsageRecord, StorageError>;

    /// Add one message to the user's counter. Returns the new count.
    async fn increment_usage(&self, user_id: &str) -> Result<u64, StorageError>;

    async fn set_premium(&self, user_id: &str, is_premium: bool) -> Result<(), StorageError>;

    async fn persona_selection(&self, user_id: &str) -> Result<Option<String>, StorageError>;

    async fn select_persona(&self, user_id: &str, persona_id: &str) -> Result<(), StorageError>;
}
