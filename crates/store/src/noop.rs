//! No-op store: disables persistence entirely.
//!
//! Reads return empty results and writes succeed without effect, so the
//! pipeline behaves as if every user were brand new.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kindred_core::error::StorageError;
use kindred_core::message::Message;
use kindred_core::session::Session;
use kindred_core::storage::{RelationshipSummary, Storage, UsageRecord};
use std::collections::HashMap;

/// A store that keeps nothing.
pub struct NoopStore;

#[async_trait]
impl Storage for NoopStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn active_sessions(&self, _user_id: &str) -> Result<Vec<Session>, StorageError> {
        Ok(Vec::new())
    }

    async fn insert_session(&self, _session: &Session) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get_session(&self, _session_id: &str) -> Result<Option<Session>, StorageError> {
        Ok(None)
    }

    async fn end_session(
        &self,
        _session_id: &str,
        _ended_at: DateTime<Utc>,
    ) -> Result<Option<Session>, StorageError> {
        Ok(None)
    }

    async fn recent_sessions(
        &self,
        _user_id: &str,
        _limit: usize,
    ) -> Result<Vec<Session>, StorageError> {
        Ok(Vec::new())
    }

    async fn insert_message(&self, _message: &Message) -> Result<(), StorageError> {
        Ok(())
    }

    async fn last_message_at(
        &self,
        _session_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(None)
    }

    async fn recent_messages(
        &self,
        _user_id: &str,
        _limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        Ok(Vec::new())
    }

    async fn message_counts(
        &self,
        _session_ids: &[String],
    ) -> Result<HashMap<String, usize>, StorageError> {
        Ok(HashMap::new())
    }

    async fn relationship_summary(
        &self,
        _user_id: &str,
    ) -> Result<Option<RelationshipSummary>, StorageError> {
        Ok(None)
    }

    async fn upsert_summary(&self, _summary: &RelationshipSummary) -> Result<(), StorageError> {
        Ok(())
    }

    async fn usage(&self, user_id: &str) -> Result<UsageRecord, StorageError> {
        Ok(UsageRecord {
            user_id: user_id.to_string(),
            ..UsageRecord::default()
        })
    }

    async fn increment_usage(&self, _user_id: &str) -> Result<u64, StorageError> {
        Ok(0)
    }

    async fn set_premium(&self, _user_id: &str, _is_premium: bool) -> Result<(), StorageError> {
        Ok(())
    }

    async fn persona_selection(&self, _user_id: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    async fn select_persona(&self, _user_id: &str, _persona_id: &str) -> Result<(), StorageError> {
        Ok(())
    }
}
