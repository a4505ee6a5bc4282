//! In-memory store: useful for testing and ephemeral deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kindred_core::error::StorageError;
use kindred_core::message::Message;
use kindred_core::session::Session;
use kindred_core::storage::{RelationshipSummary, Storage, UsageRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    sessions: Vec<Session>,
    messages: Vec<Message>,
    usage: HashMap<String, UsageRecord>,
    personas: HashMap<String, String>,
    summaries: HashMap<String, RelationshipSummary>,
}

/// A store that keeps everything in process memory.
///
/// Reads and writes can be made to fail on demand, which lets tests exercise
/// the degraded paths of the chat pipeline.
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every read return [`StorageError::Unavailable`].
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write return [`StorageError::WriteFailed`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All stored messages in insertion order.
    pub async fn messages(&self) -> Vec<Message> {
        self.tables.read().await.messages.clone()
    }

    /// All stored sessions in insertion order.
    pub async fn sessions(&self) -> Vec<Session> {
        self.tables.read().await.sessions.clone()
    }

    fn check_read(&self) -> Result<(), StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("reads disabled".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("writes disabled".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest-first ordering; later insertions win ties.
fn newest_first<T>(
    items: impl DoubleEndedIterator<Item = T>,
    key: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    let mut out: Vec<T> = items.rev().collect();
    out.sort_by_key(|item| std::cmp::Reverse(key(item)));
    out
}

#[async_trait]
impl Storage for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn active_sessions(&self, user_id: &str) -> Result<Vec<Session>, StorageError> {
        self.check_read()?;
        let tables = self.tables.read().await;
        let active = tables
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active())
            .cloned();
        Ok(newest_first(active, |s| s.started_at))
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StorageError> {
        self.check_write()?;
        self.tables.write().await.sessions.push(session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StorageError> {
        self.check_read()?;
        let tables = self.tables.read().await;
        Ok(tables.sessions.iter().find(|s| s.id == session_id).cloned())
    }

    async fn end_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Session>, StorageError> {
        self.check_write()?;
        let mut tables = self.tables.write().await;
        Ok(tables
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .map(|s| {
                s.ended_at.get_or_insert(ended_at);
                s.clone()
            }))
    }

    async fn recent_sessions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Session>, StorageError> {
        self.check_read()?;
        let tables = self.tables.read().await;
        let owned = tables
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned();
        let mut sessions = newest_first(owned, |s| s.started_at);
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StorageError> {
        self.check_write()?;
        self.tables.write().await.messages.push(message.clone());
        Ok(())
    }

    async fn last_message_at(
        &self,
        session_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.check_read()?;
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .map(|m| m.created_at)
            .max())
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        self.check_read()?;
        let tables = self.tables.read().await;
        let owned = tables
            .messages
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned();
        let mut messages = newest_first(owned, |m| m.created_at);
        messages.truncate(limit);
        Ok(messages)
    }

    async fn message_counts(
        &self,
        session_ids: &[String],
    ) -> Result<HashMap<String, usize>, StorageError> {
        self.check_read()?;
        let tables = self.tables.read().await;
        let mut counts: HashMap<String, usize> =
            session_ids.iter().map(|id| (id.clone(), 0)).collect();
        for message in &tables.messages {
            if let Some(count) = counts.get_mut(&message.session_id) {
                *count += 1;
            }
        }
        Ok(counts)
    }

    async fn relationship_summary(
        &self,
        user_id: &str,
    ) -> Result<Option<RelationshipSummary>, StorageError> {
        self.check_read()?;
        Ok(self.tables.read().await.summaries.get(user_id).cloned())
    }

    async fn upsert_summary(&self, summary: &RelationshipSummary) -> Result<(), StorageError> {
        self.check_write()?;
        self.tables
            .write()
            .await
            .summaries
            .insert(summary.user_id.clone(), summary.clone());
        Ok(())
    }

    async fn usage(&self, user_id: &str) -> Result<UsageRecord, StorageError> {
        self.check_read()?;
        let tables = self.tables.read().await;
        Ok(tables.usage.get(user_id).cloned().unwrap_or_else(|| UsageRecord {
            user_id: user_id.to_string(),
            ..UsageRecord::default()
        }))
    }

    async fn increment_usage(&self, user_id: &str) -> Result<u64, StorageError> {
        self.check_write()?;
        let mut tables = self.tables.write().await;
        let record = tables
            .usage
            .entry(user_id.to_string())
            .or_insert_with(|| UsageRecord {
                user_id: user_id.to_string(),
                ..UsageRecord::default()
            });
        record.message_count += 1;
        Ok(record.message_count)
    }

    async fn set_premium(&self, user_id: &str, is_premium: bool) -> Result<(), StorageError> {
        self.check_write()?;
        let mut tables = self.tables.write().await;
        tables
            .usage
            .entry(user_id.to_string())
            .or_insert_with(|| UsageRecord {
                user_id: user_id.to_string(),
                ..UsageRecord::default()
            })
            .is_premium = is_premium;
        Ok(())
    }

    async fn persona_selection(&self, user_id: &str) -> Result<Option<String>, StorageError> {
        self.check_read()?;
        Ok(self.tables.read().await.personas.get(user_id).cloned())
    }

    async fn select_persona(&self, user_id: &str, persona_id: &str) -> Result<(), StorageError> {
        self.check_write()?;
        self.tables
            .write()
            .await
            .personas
            .insert(user_id.to_string(), persona_id.to_string());
        Ok(())
    }
}
