//! # Kindred Companion
//!
//! The chat turn pipeline. One turn flows through:
//!
//! 1. [`quota`]: reject users past the free tier
//! 2. [`session`]: resume or start the user's session
//! 3. [`context`]: relationship summary, recent messages, session stats
//! 4. [`memory`]: persona-specific filtering of recent turns
//! 5. safety screening (from `kindred-safety`)
//! 6. [`prompt`]: ordered system/user messages for the LLM
//! 7. [`orchestrator`]: streaming with retries and fallback
//! 8. [`writer`]: persistence off the response path
//!
//! [`pipeline::ChatPipeline`] wires them together and is what the gateway
//! calls.

pub mod context;
pub mod memory;
pub mod orchestrator;
pub mod pipeline;
pub mod prompt;
pub mod quota;
pub mod session;
pub mod stream_event;
pub mod writer;

pub use context::{ContextBuilder, ContextBundle, recent_turns};
pub use memory::adapt_memory;
pub use orchestrator::{ClientSink, Reply, ResponseOrchestrator, RetryPolicy};
pub use pipeline::{ChatPipeline, ChatRequest, TurnHandle, TurnOutcome, TurnState};
pub use prompt::compose_prompt;
pub use quota::{QuotaGate, QuotaState};
pub use session::{EndedSession, SessionManager};
pub use stream_event::{ChatStreamEvent, TurnSummary};
pub use writer::BackgroundWriter;
