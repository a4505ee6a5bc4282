//! Message domain types.
//!
//! A [`Message`] is one persisted chat line: the user's turn or the
//! companion's reply. Messages are immutable once stored. [`ChatTurn`] is the
//! lighter role/content pair that is actually sent to an LLM.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The companion
    Assistant,
    /// Instructions (never persisted as a chat line)
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// How a persisted message came to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageTag {
    /// Regular turn (user input or a streamed LLM reply)
    #[default]
    Chat,
    /// Canned reply after the provider failed every retry
    Fallback,
    /// Scripted reply from the safety layer
    Safety,
    /// LLM reply cut short by a mid-stream failure
    Partial,
}

impl MessageTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Fallback => "fallback",
            Self::Safety => "safety",
            Self::Partial => "partial",
        }
    }
}

impl std::str::FromStr for MessageTag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "fallback" => Ok(Self::Fallback),
            "safety" => Ok(Self::Safety),
            "partial" => Ok(Self::Partial),
            other => Err(format!("unknown message tag '{other}'")),
        }
    }
}

/// A single persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Session this message belongs to
    pub session_id: String,

    /// Owner of the conversation
    pub user_id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Origin of the message
    #[serde(default)]
    pub tag: MessageTag,

    /// Timestamp
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        tag: MessageTag,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            role,
            content: content.into(),
            tag,
            created_at: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(session_id, user_id, Role::User, content, MessageTag::Chat)
    }

    /// Create a new assistant message with the given tag.
    pub fn assistant(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
        tag: MessageTag,
    ) -> Self {
        Self::new(session_id, user_id, Role::Assistant, content, tag)
    }

    /// Project this message onto the role/content pair used for LLM calls.
    pub fn to_turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A role/content pair as sent to the LLM provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
