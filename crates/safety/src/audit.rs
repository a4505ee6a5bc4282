//! Audit logging: structured records of safety-relevant events.
//!
//! Records are kept in a bounded in-memory buffer and forwarded to sinks.
//! Callers submit records from the background writer, never from the
//! response path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Entries kept in memory before the oldest are dropped.
const MAX_AUDIT_ENTRIES: usize = 1024;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// The user the event concerns
    pub actor: String,
    /// Session or resource the event concerns
    pub target: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The safety layer replaced the LLM reply
    SafetyOverride { reason: String },
    /// A turn was rejected by the quota gate
    QuotaExceeded { limit: u64 },
    /// Every LLM attempt failed and a fallback line was served
    FallbackServed { attempts: u32 },
    /// The LLM stream broke after tokens were forwarded
    StreamInterrupted,
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Audit logger with a bounded in-memory buffer and pluggable sinks.
pub struct AuditLogger {
    entries: Mutex<VecDeque<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            sinks,
        }
    }

    /// Logger that forwards to `tracing`.
    pub fn tracing() -> Self {
        Self::with_sinks(vec![Box::new(TracingSink)])
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an audit event.
    pub fn log(
        &self,
        event: AuditEvent,
        actor: &str,
        target: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target: target.into(),
            outcome,
            details,
        };

        {
            let mut entries = self.buffer();
            if entries.len() == MAX_AUDIT_ENTRIES {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// Get all recorded entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.buffer().iter().cloned().collect()
    }

    /// Get entries filtered by outcome.
    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.buffer()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.buffer().len()
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            actor = %entry.actor,
            target = %entry.target,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}
