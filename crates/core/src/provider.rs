//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send an ordered list of chat turns to an LLM and
//! get a response back, either complete or as a stream of tokens.

use crate::error::ProviderError;
use crate::message::ChatTurn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// Ordered instructions and turns; the last entry is the user's message
    pub messages: Vec<ChatTurn>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.8
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated text
    pub content: String,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The receiving half of a provider stream.
pub type ChunkReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// The response orchestrator calls `stream()` without knowing which backend
/// is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.content),
                done: false,
                usage: None,
            }))
            .await;
        let _ = tx
            .send(Ok(StreamChunk {
                content: None,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
