//! Safety layer for Kindred: classification, screening and audit logging.
//!
//! Provides:
//! - **Classification**: keyword heuristics behind the `Classifier` trait
//! - **Screening**: crisis / exclusivity / dependency checks that can replace
//!   the LLM reply with a scripted one
//! - **Audit logging**: structured records of every override

pub mod audit;
pub mod classifier;
pub mod screen;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use classifier::KeywordClassifier;
pub use screen::{SafetyReason, SafetyScreen, SafetyVerdict};
