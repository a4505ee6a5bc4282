//! # Kindred Core
//!
//! Domain types, traits, and error definitions for the Kindred companion
//! backend. This crate has **zero framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`Storage`]: sessions, messages, usage counters, summaries
//! - [`Provider`]: streaming chat completions from an LLM
//! - [`Classifier`]: text → tags (crisis, conflict, emotional, ...)
//!
//! Implementations live in their respective crates, so the pipeline can run
//! with a real database, an in-memory store, or none at all.

pub mod classify;
pub mod error;
pub mod message;
pub mod persona;
pub mod provider;
pub mod session;
pub mod storage;

// Re-export key types at crate root for ergonomics
pub use classify::{Classifier, Tag, TagSet};
pub use error::{ProviderError, StorageError, TurnError};
pub use message::{ChatTurn, Message, MessageTag, Role};
pub use persona::{Boundaries, LanguageStyle, MemoryPolicy, PersonaMetrics, PersonaProfile};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use session::{Session, SessionStats, SessionType};
pub use storage::{RelationshipSummary, Storage, UsageRecord};
