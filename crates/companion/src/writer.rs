//! Background writer: persistence off the response path.
//!
//! Messages, usage counters and audit records are queued on a bounded mpsc
//! channel and applied by a single worker task, in submission order.
//! Submitting never waits and never fails the turn; write errors are logged.

use kindred_core::message::Message;
use kindred_core::storage::Storage;
use kindred_safety::audit::{AuditEvent, AuditLogger, AuditOutcome};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 1024;

/// One unit of deferred work.
#[derive(Debug)]
pub enum WriteJob {
    InsertMessage(Message),
    IncrementUsage {
        user_id: String,
    },
    Audit {
        event: AuditEvent,
        actor: String,
        target: String,
        outcome: AuditOutcome,
        details: Option<String>,
    },
    /// Resolves once every job queued before it has been applied.
    Flush(oneshot::Sender<()>),
}

/// Handle for submitting writes. Cheap to clone.
#[derive(Clone)]
pub struct BackgroundWriter {
    tx: mpsc::Sender<WriteJob>,
}

impl BackgroundWriter {
    /// Start the worker task. It exits once every handle has been dropped.
    pub fn spawn(store: Arc<dyn Storage>, audit: Arc<AuditLogger>) -> Self {
        let (tx, mut rx) = mpsc::channel::<WriteJob>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                apply(store.as_ref(), &audit, job).await;
            }
            debug!("Background writer stopped");
        });

        Self { tx }
    }

    fn submit(&self, job: WriteJob) {
        if let Err(e) = self.tx.try_send(job) {
            warn!(error = %e, "Write queue rejected job, dropping it");
        }
    }

    pub fn insert_message(&self, message: Message) {
        self.submit(WriteJob::InsertMessage(message));
    }

    pub fn increment_usage(&self, user_id: &str) {
        self.submit(WriteJob::IncrementUsage {
            user_id: user_id.to_string(),
        });
    }

    pub fn audit(
        &self,
        event: AuditEvent,
        actor: &str,
        target: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        self.submit(WriteJob::Audit {
            event,
            actor: actor.to_string(),
            target: target.to_string(),
            outcome,
            details,
        });
    }

    /// Wait until everything submitted so far has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteJob::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn apply(store: &dyn Storage, audit: &AuditLogger, job: WriteJob) {
    match job {
        WriteJob::InsertMessage(message) => {
            if let Err(e) = store.insert_message(&message).await {
                warn!(
                    message_id = %message.id,
                    session_id = %message.session_id,
                    error = %e,
                    "Failed to persist message"
                );
            }
        }
        WriteJob::IncrementUsage { user_id } => {
            if let Err(e) = store.increment_usage(&user_id).await {
                warn!(user_id = %user_id, error = %e, "Failed to increment usage counter");
            }
        }
        WriteJob::Audit {
            event,
            actor,
            target,
            outcome,
            details,
        } => audit.log(event, &actor, &target, outcome, details),
        WriteJob::Flush(done) => {
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_store::InMemoryStore;

    #[tokio::test]
    async fn jobs_apply_in_order() {
        let store = Arc::new(InMemoryStore::new());
        let writer = BackgroundWriter::spawn(store.clone(), Arc::new(AuditLogger::new()));

        writer.insert_message(Message::user("s1", "u1", "first"));
        writer.insert_message(Message::user("s1", "u1", "second"));
        writer.increment_usage("u1");
        writer.flush().await;

        let contents: Vec<String> = store.messages().await.into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(store.usage("u1").await.unwrap().message_count, 1);
    }

    #[tokio::test]
    async fn write_failures_do_not_stop_the_worker() {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(AuditLogger::new());
        let writer = BackgroundWriter::spawn(store.clone(), audit.clone());

        store.set_fail_writes(true);
        writer.insert_message(Message::user("s1", "u1", "lost"));
        writer.flush().await;
        store.set_fail_writes(false);

        writer.insert_message(Message::user("s1", "u1", "kept"));
        writer.audit(
            AuditEvent::SafetyOverride {
                reason: "crisis".into(),
            },
            "u1",
            "s1",
            AuditOutcome::Success,
            None,
        );
        writer.flush().await;

        assert_eq!(store.messages().await.len(), 1);
        assert_eq!(audit.count(), 1);
    }
}
