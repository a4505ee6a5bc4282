//! Session lifecycle.
//!
//! Resolution for a user runs under that user's lock, so two concurrent turns
//! never both create a session. Any extra active sessions found during
//! resolution (e.g. written by another process) are ended, newest kept.

use chrono::{DateTime, Duration, Utc};
use kindred_core::error::StorageError;
use kindred_core::session::{Session, SessionType};
use kindred_core::storage::Storage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A session that was just closed, with its final duration.
#[derive(Debug, Clone, PartialEq)]
pub struct EndedSession {
    pub session: Session,
    pub duration_secs: i64,
}

pub struct SessionManager {
    store: Arc<dyn Storage>,
    timeout: Duration,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Storage>, timeout_minutes: u32) -> Self {
        Self {
            store,
            timeout: Duration::minutes(i64::from(timeout_minutes)),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .user_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop locks nobody is holding or waiting on.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Resume the user's active session or start a new one. Never fails.
    pub async fn get_or_create_session(&self, user_id: &str, session_type: SessionType) -> Session {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let active = match self.store.active_sessions(user_id).await {
            Ok(active) => active,
            Err(e) => {
                warn!(user_id, error = %e, "Active session lookup failed, starting fresh session");
                return self.create(user_id, session_type).await;
            }
        };

        let mut active = active.into_iter();
        let Some(current) = active.next() else {
            return self.create(user_id, session_type).await;
        };

        for extra in active {
            warn!(user_id, session_id = %extra.id, "Ending extra active session");
            self.end_quietly(&extra.id).await;
        }

        if current.session_type != session_type {
            debug!(
                user_id,
                session_id = %current.id,
                from = %current.session_type,
                to = %session_type,
                "Session type changed"
            );
            self.end_quietly(&current.id).await;
            return self.create(user_id, session_type).await;
        }

        let last_activity = match self.store.last_message_at(&current.id).await {
            Ok(last) => last.unwrap_or(current.started_at),
            Err(e) => {
                warn!(session_id = %current.id, error = %e, "Last activity lookup failed, starting fresh session");
                self.end_quietly(&current.id).await;
                return self.create(user_id, session_type).await;
            }
        };

        if self.is_expired(last_activity, Utc::now()) {
            info!(user_id, session_id = %current.id, "Session timed out");
            self.end_quietly(&current.id).await;
            return self.create(user_id, session_type).await;
        }

        debug!(user_id, session_id = %current.id, "Resuming session");
        current
    }

    /// Close a session. `None` when the id is unknown.
    pub async fn end_session(&self, session_id: &str) -> Result<Option<EndedSession>, StorageError> {
        let now = Utc::now();
        let ended = self.store.end_session(session_id, now).await?;
        Ok(ended.map(|session| {
            let duration_secs = session.duration_secs(now);
            info!(session_id, duration_secs, "Session ended");
            EndedSession {
                session,
                duration_secs,
            }
        }))
    }

    fn is_expired(&self, last_activity: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - last_activity > self.timeout
    }

    async fn create(&self, user_id: &str, session_type: SessionType) -> Session {
        let session = Session::start(user_id, session_type);
        match self.store.insert_session(&session).await {
            Ok(()) => info!(user_id, session_id = %session.id, session_type = %session_type, "Session started"),
            Err(e) => warn!(
                user_id,
                session_id = %session.id,
                error = %e,
                "Failed to persist session, continuing with ephemeral session"
            ),
        }
        session
    }

    async fn end_quietly(&self, session_id: &str) {
        if let Err(e) = self.store.end_session(session_id, Utc::now()).await {
            warn!(session_id, error = %e, "Failed to end session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_core::message::Message;
    use kindred_store::InMemoryStore;

    fn manager(store: &Arc<InMemoryStore>) -> SessionManager {
        SessionManager::new(store.clone(), 15)
    }

    fn session_started_ago(user_id: &str, minutes: i64) -> Session {
        let mut session = Session::start(user_id, SessionType::Chat);
        session.started_at = Utc::now() - Duration::minutes(minutes);
        session
    }

    #[tokio::test]
    async fn first_turn_creates_session() {
        let store = Arc::new(InMemoryStore::new());
        let session = manager(&store).get_or_create_session("u1", SessionType::Chat).await;
        assert!(session.is_active());
        assert_eq!(store.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn recent_activity_resumes() {
        let store = Arc::new(InMemoryStore::new());
        let old = session_started_ago("u1", 60);
        store.insert_session(&old).await.unwrap();
        let mut msg = Message::user(&old.id, "u1", "hey");
        msg.created_at = Utc::now() - Duration::minutes(2);
        store.insert_message(&msg).await.unwrap();

        let session = manager(&store).get_or_create_session("u1", SessionType::Chat).await;
        assert_eq!(session.id, old.id);
    }

    #[tokio::test]
    async fn idle_session_is_replaced() {
        let store = Arc::new(InMemoryStore::new());
        let old = session_started_ago("u1", 60);
        store.insert_session(&old).await.unwrap();
        let mut msg = Message::user(&old.id, "u1", "hey");
        msg.created_at = Utc::now() - Duration::minutes(20);
        store.insert_message(&msg).await.unwrap();

        let session = manager(&store).get_or_create_session("u1", SessionType::Chat).await;
        assert_ne!(session.id, old.id);
        let ended = store.get_session(&old.id).await.unwrap().unwrap();
        assert!(!ended.is_active());
    }

    #[tokio::test]
    async fn session_start_counts_when_no_messages() {
        let store = Arc::new(InMemoryStore::new());
        let fresh = session_started_ago("u1", 5);
        store.insert_session(&fresh).await.unwrap();
        let session = manager(&store).get_or_create_session("u1", SessionType::Chat).await;
        assert_eq!(session.id, fresh.id);

        let store = Arc::new(InMemoryStore::new());
        let stale = session_started_ago("u1", 16);
        store.insert_session(&stale).await.unwrap();
        let session = manager(&store).get_or_create_session("u1", SessionType::Chat).await;
        assert_ne!(session.id, stale.id);
    }

    #[tokio::test]
    async fn type_change_starts_new_session() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = manager(&store);
        let chat = mgr.get_or_create_session("u1", SessionType::Chat).await;
        let call = mgr.get_or_create_session("u1", SessionType::Call).await;
        assert_ne!(chat.id, call.id);
        assert_eq!(call.session_type, SessionType::Call);
        assert_eq!(store.active_sessions("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn extra_active_sessions_are_reconciled() {
        let store = Arc::new(InMemoryStore::new());
        let older = session_started_ago("u1", 3);
        let newer = session_started_ago("u1", 1);
        store.insert_session(&older).await.unwrap();
        store.insert_session(&newer).await.unwrap();

        let session = manager(&store).get_or_create_session("u1", SessionType::Chat).await;
        assert_eq!(session.id, newer.id);
        let active = store.active_sessions("u1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, newer.id);
    }

    #[tokio::test]
    async fn concurrent_turns_share_one_session() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = Arc::new(manager(&store));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                tokio::spawn(async move { mgr.get_or_create_session("u1", SessionType::Chat).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.active_sessions("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn read_failure_fails_open() {
        let store = Arc::new(InMemoryStore::new());
        store.set_fail_reads(true);
        let session = manager(&store).get_or_create_session("u1", SessionType::Chat).await;
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn write_failure_returns_ephemeral_session() {
        let store = Arc::new(InMemoryStore::new());
        store.set_fail_writes(true);
        let session = manager(&store).get_or_create_session("u1", SessionType::Chat).await;
        assert_eq!(session.user_id, "u1");
        assert!(store.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn end_session_reports_duration() {
        let store = Arc::new(InMemoryStore::new());
        let session = session_started_ago("u1", 2);
        store.insert_session(&session).await.unwrap();

        let ended = manager(&store).end_session(&session.id).await.unwrap().unwrap();
        assert!(ended.duration_secs >= 120);
        assert!(!ended.session.is_active());
        assert!(manager(&store).end_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ending_an_ended_session_keeps_its_duration() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let mut session = Session::start("u1", SessionType::Chat);
        session.started_at = now - Duration::minutes(60);
        store.insert_session(&session).await.unwrap();
        store
            .end_session(&session.id, now - Duration::minutes(50))
            .await
            .unwrap();

        let ended = manager(&store).end_session(&session.id).await.unwrap().unwrap();
        assert_eq!(ended.duration_secs, 600);
        assert_eq!(ended.session.ended_at, Some(now - Duration::minutes(50)));
    }
}
