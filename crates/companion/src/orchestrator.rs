//! Response orchestrator: streaming, retries and fallback.
//!
//! Each attempt streams from the provider under a timeout. A failure before
//! the first token is retried after a linear backoff; a failure after tokens
//! were forwarded ends the reply as partial. When every attempt fails, a canned
//! line is streamed word by word so the client always gets a reply.

use crate::stream_event::ChatStreamEvent;
use kindred_config::RetryConfig;
use kindred_core::error::ProviderError;
use kindred_core::message::{ChatTurn, MessageTag};
use kindred_core::provider::{Provider, ProviderRequest};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lines served when the provider cannot be reached.
pub const FALLBACK_LINES: &[&str] = &[
    "Sorry, my thoughts got a little tangled just now. Can you say that again?",
    "Hmm, I lost my train of thought for a second. Tell me more?",
    "I'm here, just give me a moment. What were you saying?",
    "Oops, my mind wandered off for a bit. I'm listening now, go on.",
    "Network's being a little moody with me. Can you tell me that once more?",
];

fn pick_fallback_line() -> &'static str {
    let idx = rand::rng().random_range(0..FALLBACK_LINES.len());
    FALLBACK_LINES[idx]
}

/// Retry and pacing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Retry `n` waits `n * backoff_step`.
    pub backoff_step: Duration,
    pub attempt_timeout: Duration,
    /// Pause between fallback words.
    pub word_delay: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_step * retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_step: Duration::from_millis(config.backoff_step_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            word_delay: Duration::from_millis(config.fallback_word_delay_ms),
        }
    }
}

/// The client side of a turn stream.
///
/// Once a send fails the client is considered gone: later sends are skipped,
/// but the caller keeps going so the reply can still be persisted.
pub struct ClientSink {
    tx: mpsc::Sender<ChatStreamEvent>,
    connected: bool,
}

impl ClientSink {
    pub fn new(tx: mpsc::Sender<ChatStreamEvent>) -> Self {
        Self {
            tx,
            connected: true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub async fn send(&mut self, event: ChatStreamEvent) {
        if !self.connected {
            return;
        }
        if self.tx.send(event).await.is_err() {
            debug!("Client disconnected, continuing without forwarding");
            self.connected = false;
        }
    }

    pub async fn send_chunk(&mut self, content: impl Into<String>) {
        self.send(ChatStreamEvent::chunk(content)).await;
    }
}

/// How a reply was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub tag: MessageTag,
    /// Provider attempts made, zero when none were.
    pub attempts: u32,
    pub client_connected: bool,
}

impl Reply {
    pub fn is_fallback(&self) -> bool {
        self.tag == MessageTag::Fallback
    }
}

pub struct ResponseOrchestrator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    policy: RetryPolicy,
}

impl ResponseOrchestrator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.8,
            max_tokens: None,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Stream a reply for `messages` into `sink`.
    pub async fn respond(&self, messages: Vec<ChatTurn>, sink: &mut ClientSink) -> Reply {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        };

        let mut attempts = 0;
        for retry in 0..=self.policy.max_retries {
            if retry > 0 {
                let delay = self.policy.backoff(retry);
                debug!(retry, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }
            attempts += 1;

            let mut text = String::new();
            let result = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.stream_once(&request, &mut text, sink),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "attempt exceeded {}s",
                    self.policy.attempt_timeout.as_secs()
                ))),
            };

            match result {
                Ok(()) => {
                    info!(
                        provider = %self.provider.name(),
                        attempts,
                        chars = text.len(),
                        "Reply streamed"
                    );
                    return Reply {
                        text,
                        tag: MessageTag::Chat,
                        attempts,
                        client_connected: sink.is_connected(),
                    };
                }
                Err(e) if !text.is_empty() => {
                    warn!(
                        provider = %self.provider.name(),
                        error = %e,
                        chars = text.len(),
                        "Stream broke after tokens were sent, keeping partial reply"
                    );
                    return Reply {
                        text,
                        tag: MessageTag::Partial,
                        attempts,
                        client_connected: sink.is_connected(),
                    };
                }
                Err(e) if !e.is_transient() => {
                    warn!(provider = %self.provider.name(), error = %e, "Provider unusable, skipping retries");
                    break;
                }
                Err(e) => {
                    warn!(
                        provider = %self.provider.name(),
                        attempt = attempts,
                        max_attempts = self.policy.max_retries + 1,
                        error = %e,
                        "Provider attempt failed"
                    );
                }
            }
        }

        let text = self.stream_fallback(sink).await;
        warn!(attempts, "All provider attempts failed, served fallback line");
        Reply {
            text,
            tag: MessageTag::Fallback,
            attempts,
            client_connected: sink.is_connected(),
        }
    }

    /// One provider attempt. Tokens go to the client as they arrive and are
    /// appended to `text`.
    async fn stream_once(
        &self,
        request: &ProviderRequest,
        text: &mut String,
        sink: &mut ClientSink,
    ) -> Result<(), ProviderError> {
        let mut rx = self.provider.stream(request.clone()).await?;

        while let Some(item) = rx.recv().await {
            let chunk = item?;
            if let Some(content) = chunk.content
                && !content.is_empty()
            {
                text.push_str(&content);
                sink.send_chunk(content).await;
            }
            if chunk.done {
                return Ok(());
            }
        }

        if text.is_empty() {
            Err(ProviderError::StreamInterrupted(
                "stream closed without content".into(),
            ))
        } else {
            Ok(())
        }
    }

    async fn stream_fallback(&self, sink: &mut ClientSink) -> String {
        let line = pick_fallback_line();
        for (i, word) in line.split_whitespace().enumerate() {
            if i > 0 {
                if sink.is_connected() {
                    tokio::time::sleep(self.policy.word_delay).await;
                }
                sink.send_chunk(format!(" {word}")).await;
            } else {
                sink.send_chunk(word).await;
            }
        }
        line.to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use kindred_core::provider::{ProviderResponse, StreamChunk};
    use kindred_core::ChunkReceiver;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// What one scripted provider call does.
    #[derive(Clone)]
    pub(crate) enum Script {
        Fail(ProviderError),
        Tokens(Vec<&'static str>),
        TokensThenFail(Vec<&'static str>),
        Hang,
    }

    /// Provider that plays back a script, repeating the last entry.
    pub(crate) struct ScriptedProvider {
        scripts: Mutex<VecDeque<Script>>,
        calls: AtomicU32,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                calls: AtomicU32::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn requests(&self) -> Vec<ProviderRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn next_script(&self) -> Script {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.len() > 1 {
                scripts.pop_front().unwrap()
            } else {
                scripts.front().cloned().unwrap_or(Script::Hang)
            }
        }
    }

    fn server_error() -> ProviderError {
        ProviderError::ApiError {
            status_code: 500,
            message: "internal".into(),
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("stream only".into()))
        }

        async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            let script = self.next_script();
            let (tx, rx) = mpsc::channel(16);
            match script {
                Script::Fail(e) => return Err(e),
                Script::Tokens(tokens) => {
                    tokio::spawn(async move {
                        for t in tokens {
                            let _ = tx
                                .send(Ok(StreamChunk { content: Some(t.into()), done: false, usage: None }))
                                .await;
                        }
                        let _ = tx.send(Ok(StreamChunk { content: None, done: true, usage: None })).await;
                    });
                }
                Script::TokensThenFail(tokens) => {
                    tokio::spawn(async move {
                        for t in tokens {
                            let _ = tx
                                .send(Ok(StreamChunk { content: Some(t.into()), done: false, usage: None }))
                                .await;
                        }
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted("connection reset".into())))
                            .await;
                    });
                }
                Script::Hang => {
                    tokio::spawn(async move {
                        tx.closed().await;
                    });
                }
            }
            Ok(rx)
        }
    }

    pub(crate) fn always_500() -> Arc<ScriptedProvider> {
        ScriptedProvider::new(vec![Script::Fail(server_error())])
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> ResponseOrchestrator {
        ResponseOrchestrator::new(provider, "test-model").with_policy(RetryPolicy {
            max_retries: 3,
            backoff_step: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(10),
            word_delay: Duration::from_millis(50),
        })
    }

    async fn collect(mut rx: mpsc::Receiver<ChatStreamEvent>) -> String {
        let mut out = String::new();
        while let Some(ev) = rx.recv().await {
            if let ChatStreamEvent::Chunk { content } = ev {
                out.push_str(&content);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn success_forwards_every_chunk() {
        let provider = ScriptedProvider::new(vec![Script::Tokens(vec!["Hey", " there", "!"])]);
        let (tx, rx) = mpsc::channel(32);
        let mut sink = ClientSink::new(tx);

        let reply = orchestrator(provider.clone())
            .respond(vec![ChatTurn::user("hi")], &mut sink)
            .await;
        drop(sink);

        assert_eq!(reply.text, "Hey there!");
        assert_eq!(reply.tag, MessageTag::Chat);
        assert_eq!(reply.attempts, 1);
        assert_eq!(collect(rx).await, "Hey there!");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let provider = ScriptedProvider::new(vec![
            Script::Fail(server_error()),
            Script::Fail(server_error()),
            Script::Tokens(vec!["ok"]),
        ]);
        let (tx, _rx) = mpsc::channel(32);
        let mut sink = ClientSink::new(tx);

        let started = tokio::time::Instant::now();
        let reply = orchestrator(provider.clone())
            .respond(vec![ChatTurn::user("hi")], &mut sink)
            .await;

        assert_eq!(reply.text, "ok");
        assert_eq!(reply.attempts, 3);
        assert_eq!(provider.calls(), 3);
        // 1s + 2s of backoff
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_stream_fallback_words() {
        let provider = always_500();
        let (tx, rx) = mpsc::channel(64);
        let mut sink = ClientSink::new(tx);

        let started = tokio::time::Instant::now();
        let reply = orchestrator(provider.clone())
            .respond(vec![ChatTurn::user("hi")], &mut sink)
            .await;
        drop(sink);

        assert_eq!(provider.calls(), 4);
        assert_eq!(reply.attempts, 4);
        assert!(reply.is_fallback());
        assert!(FALLBACK_LINES.contains(&reply.text.as_str()));
        // 1s + 2s + 3s of backoff, then 50ms before every word but the first.
        let words = reply.text.split_whitespace().count() as u32;
        let expected = Duration::from_secs(6) + Duration::from_millis(50) * (words - 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= expected, "{elapsed:?} < {expected:?}");
        assert!(elapsed < expected + Duration::from_millis(10), "{elapsed:?} > {expected:?}");

        let mut events = Vec::new();
        let mut rx = rx;
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert_eq!(events.len(), words as usize);
        let joined: String = events
            .into_iter()
            .map(|ev| match ev {
                ChatStreamEvent::Chunk { content } => content,
                ChatStreamEvent::Done(_) => String::new(),
            })
            .collect();
        assert_eq!(joined, reply.text);
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_failure_keeps_partial() {
        let provider = ScriptedProvider::new(vec![Script::TokensThenFail(vec!["I was", " saying"])]);
        let (tx, _rx) = mpsc::channel(32);
        let mut sink = ClientSink::new(tx);

        let reply = orchestrator(provider.clone())
            .respond(vec![ChatTurn::user("hi")], &mut sink)
            .await;

        assert_eq!(reply.text, "I was saying");
        assert_eq!(reply.tag, MessageTag::Partial);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_retries() {
        let provider = ScriptedProvider::new(vec![Script::Hang, Script::Tokens(vec!["back"])]);
        let (tx, _rx) = mpsc::channel(32);
        let mut sink = ClientSink::new(tx);

        let reply = orchestrator(provider.clone())
            .respond(vec![ChatTurn::user("hi")], &mut sink)
            .await;

        assert_eq!(reply.text, "back");
        assert_eq!(reply.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_error_skips_retries() {
        let provider = ScriptedProvider::new(vec![Script::Fail(ProviderError::NotConfigured(
            "no key".into(),
        ))]);
        let (tx, _rx) = mpsc::channel(64);
        let mut sink = ClientSink::new(tx);

        let reply = orchestrator(provider.clone())
            .respond(vec![ChatTurn::user("hi")], &mut sink)
            .await;

        assert_eq!(provider.calls(), 1);
        assert!(reply.is_fallback());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_client_still_gets_full_reply_text() {
        let provider = ScriptedProvider::new(vec![Script::Tokens(vec!["a", "b", "c"])]);
        let (tx, rx) = mpsc::channel(32);
        drop(rx);
        let mut sink = ClientSink::new(tx);

        let reply = orchestrator(provider)
            .respond(vec![ChatTurn::user("hi")], &mut sink)
            .await;

        assert_eq!(reply.text, "abc");
        assert_eq!(reply.tag, MessageTag::Chat);
        assert!(!reply.client_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_pacing_is_skipped_once_client_is_gone() {
        let provider = always_500();
        let (tx, rx) = mpsc::channel(64);
        drop(rx);
        let mut sink = ClientSink::new(tx);

        let started = tokio::time::Instant::now();
        let reply = orchestrator(provider)
            .respond(vec![ChatTurn::user("hi")], &mut sink)
            .await;

        assert!(reply.is_fallback());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6));
        assert!(elapsed < Duration::from_secs(6) + Duration::from_millis(10), "{elapsed:?}");
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(3));
    }
}
