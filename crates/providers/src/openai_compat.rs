//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Groq and any
//! endpoint exposing `/chat/completions`.
//!
//! Supports:
//! - Streaming chat completions (SSE)
//! - Health checks against `/models`

use async_trait::async_trait;
use futures::StreamExt;
use kindred_core::error::ProviderError;
use kindred_core::message::ChatTurn;
use kindred_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        // Per-attempt deadlines are enforced by the caller; this only guards
        // against sockets that never connect.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert chat turns to OpenAI API format.
    fn to_api_messages(turns: &[ChatTurn]) -> Vec<ApiMessage> {
        turns
            .iter()
            .map(|t| ApiMessage {
                role: t.role.as_str().to_string(),
                content: Some(t.content.clone()),
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl kindred_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// Runs a streaming request and joins the deltas.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let mut rx = self.stream(request).await?;

        let mut content = String::new();
        let mut usage = None;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(text) = chunk.content {
                content.push_str(&text);
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        Ok(ProviderResponse {
            content,
            usage,
            model,
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post(&body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();
        tokio::spawn(pump_sse(response.bytes_stream(), tx, provider_name));

        Ok(rx)
    }
}

/// Read an SSE byte stream and forward parsed chunks until `[DONE]`.
///
/// Network chunks can end in the middle of a UTF-8 sequence, so bytes are
/// buffered and only complete lines are decoded.
async fn pump_sse<S, B, E>(
    stream: S,
    tx: tokio::sync::mpsc::Sender<Result<StreamChunk, ProviderError>>,
    provider_name: String,
) where
    S: futures::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk_result) = stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };
        buffer.extend_from_slice(bytes.as_ref());

        while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=line_end).collect();
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(e) => {
                    warn!(provider = %provider_name, error = %e, "Dropping non UTF-8 SSE line");
                    continue;
                }
            };

            match parse_sse_line(line.trim_end_matches(['\n', '\r'])) {
                SseLine::Skip => {}
                SseLine::Done => {
                    let _ = tx.send(Ok(done_chunk(None))).await;
                    return;
                }
                SseLine::Chunk(chunk) => {
                    let done = chunk.done;
                    if tx.send(Ok(chunk)).await.is_err() {
                        return; // receiver dropped
                    }
                    if done {
                        return;
                    }
                }
                SseLine::Unparseable(data) => {
                    trace!(
                        provider = %provider_name,
                        data = %data,
                        "Ignoring unparseable SSE chunk"
                    );
                }
            }
        }
    }

    // Stream ended without [DONE]
    let _ = tx.send(Ok(done_chunk(None))).await;
}

/// The meaning of one line of an SSE body.
#[derive(Debug)]
enum SseLine {
    /// Blank line, comment, or a delta with nothing to forward
    Skip,
    /// `data: [DONE]`
    Done,
    Chunk(StreamChunk),
    Unparseable(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }

    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return SseLine::Done;
    }

    let stream_resp = match serde_json::from_str::<StreamResponse>(data) {
        Ok(resp) => resp,
        Err(_) => return SseLine::Unparseable(data.to_string()),
    };

    // Usage arrives in the final chunk when stream_options.include_usage is set
    if let Some(usage) = stream_resp.usage {
        return SseLine::Chunk(done_chunk(Some(usage.into())));
    }

    let content = stream_resp
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|c| !c.is_empty());

    match content {
        Some(text) => SseLine::Chunk(StreamChunk {
            content: Some(text),
            done: false,
            usage: None,
        }),
        None => SseLine::Skip,
    }
}

fn done_chunk(usage: Option<Usage>) -> StreamChunk {
    StreamChunk {
        content: None,
        done: true,
        usage,
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_core::Provider;

    #[test]
    fn trailing_slash_is_trimmed() {
        let provider = OpenAiCompatProvider::new("custom", "http://localhost:8000/v1/", "k");
        assert_eq!(provider.base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn turn_conversion_preserves_order_and_roles() {
        let turns = vec![
            ChatTurn::system("You are warm"),
            ChatTurn::assistant("hey you"),
            ChatTurn::user("Hello"),
        ];
        let api_messages = OpenAiCompatProvider::to_api_messages(&turns);
        assert_eq!(api_messages.len(), 3);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "assistant");
        assert_eq!(api_messages[2].role, "user");
        assert_eq!(api_messages[2].content.as_deref(), Some("Hello"));
    }

    #[test]
    fn streaming_body_requests_usage() {
        let request = ProviderRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatTurn::user("hi")],
            temperature: 0.8,
            max_tokens: Some(256),
            stream: true,
        };
        let body = OpenAiCompatProvider::request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 256);
    }

    fn collect_text(rx: &mut ChunkReceiver) -> String {
        let mut text = String::new();
        while let Ok(chunk) = rx.try_recv() {
            if let Some(content) = chunk.unwrap().content {
                text.push_str(&content);
            }
        }
        text
    }

    #[tokio::test]
    async fn emoji_split_across_network_chunks_survives() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"hi \u{1F60A}\"}}]}\n\ndata: [DONE]\n\n";
        let bytes = line.as_bytes();
        // Cut inside the four-byte emoji.
        let cut = line.find('\u{1F60A}').unwrap() + 2;
        let parts: Vec<Result<Vec<u8>, std::io::Error>> =
            vec![Ok(bytes[..cut].to_vec()), Ok(bytes[cut..].to_vec())];

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        pump_sse(futures::stream::iter(parts), tx, "test".into()).await;

        assert_eq!(collect_text(&mut rx), "hi \u{1F60A}");
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_joined() {
        let parts: Vec<Result<&[u8], std::io::Error>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel".as_slice()),
            Ok(b"lo\"}}]}\r\n\r\ndata: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n".as_slice()),
            Ok(b"\ndata: [DONE]\n\n".as_slice()),
        ];

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        pump_sse(futures::stream::iter(parts), tx, "test".into()).await;

        assert_eq!(collect_text(&mut rx), "Hello there");
    }

    #[tokio::test]
    async fn broken_byte_stream_reports_interruption() {
        let parts: Vec<Result<&[u8], std::io::Error>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n".as_slice()),
            Err(std::io::Error::other("connection reset")),
        ];

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        pump_sse(futures::stream::iter(parts), tx, "test".into()).await;

        assert_eq!(rx.try_recv().unwrap().unwrap().content.as_deref(), Some("Hi"));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ProviderError::StreamInterrupted(_))
        ));
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        match parse_sse_line(line) {
            SseLine::Chunk(chunk) => {
                assert_eq!(chunk.content.as_deref(), Some("Hello"));
                assert!(!chunk.done);
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn finish_chunk_without_content_is_skipped() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert!(matches!(parse_sse_line(line), SseLine::Skip));
    }

    #[test]
    fn parse_stream_usage_marks_done() {
        let line = r#"data: {"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        match parse_sse_line(line) {
            SseLine::Chunk(chunk) => {
                assert!(chunk.done);
                assert_eq!(chunk.usage.unwrap().total_tokens, 15);
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn done_marker_and_comments() {
        assert!(matches!(parse_sse_line("data: [DONE]"), SseLine::Done));
        assert!(matches!(parse_sse_line(": keep-alive"), SseLine::Skip));
        assert!(matches!(parse_sse_line(""), SseLine::Skip));
        assert!(matches!(parse_sse_line("event: ping"), SseLine::Skip));
    }

    #[test]
    fn garbage_data_is_reported_unparseable() {
        assert!(matches!(
            parse_sse_line("data: {not json"),
            SseLine::Unparseable(_)
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let provider = OpenAiCompatProvider::new("dead", "http://127.0.0.1:9", "k");
        let result = provider
            .stream(ProviderRequest {
                model: "m".into(),
                messages: vec![ChatTurn::user("hi")],
                temperature: 0.8,
                max_tokens: None,
                stream: true,
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Network(_))));
    }
}
