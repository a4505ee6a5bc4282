//! Events streamed to the client during one chat turn.
//!
//! Wire format (one JSON object per SSE `data:` line):
//! - chunk: `{"content":"...","done":false}`
//! - terminal: `{"content":"","done":true,"sessionId":"...","messageCount":3,
//!   "messageLimit":20,"isFallback":false}`

use serde::{Deserialize, Serialize};

/// Metadata carried by the terminal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSummary {
    pub session_id: String,
    pub message_count: u64,
    pub message_limit: u64,
    pub is_fallback: bool,
}

/// One event of a chat turn stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStreamEvent {
    /// Partial reply text, forwarded as soon as it arrives.
    Chunk { content: String },

    /// Closes every stream, whatever happened upstream.
    Done(TurnSummary),
}

#[derive(Serialize)]
struct WireEvent<'a> {
    content: &'a str,
    done: bool,
    #[serde(flatten)]
    summary: Option<&'a TurnSummary>,
}

impl ChatStreamEvent {
    pub fn chunk(content: impl Into<String>) -> Self {
        Self::Chunk {
            content: content.into(),
        }
    }

    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Done(_) => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Serialize to the JSON payload sent to clients.
    pub fn to_json(&self) -> String {
        let wire = match self {
            Self::Chunk { content } => WireEvent {
                content,
                done: false,
                summary: None,
            },
            Self::Done(summary) => WireEvent {
                content: "",
                done: true,
                summary: Some(summary),
            },
        };
        serde_json::to_string(&wire).unwrap_or_else(|_| r#"{"content":"","done":true}"#.into())
    }
}
