//! End-to-end integration tests for the Kindred companion backend.
//!
//! These tests drive the HTTP gateway the way a client would: POST a chat
//! turn, read the SSE stream, then check what was persisted.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use kindred_companion::orchestrator::FALLBACK_LINES;
use kindred_config::AppConfig;
use kindred_core::error::ProviderError;
use kindred_core::message::{Message, MessageTag, Role};
use kindred_core::provider::{Provider, ProviderRequest, ProviderResponse};
use kindred_core::session::{Session, SessionType};
use kindred_core::storage::Storage;
use kindred_gateway::{GatewayState, SharedState, build_router};
use kindred_persona::{PersonaCatalog, PersonaRegistry};
use kindred_store::InMemoryStore;
use tower::ServiceExt;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that records every request and replies from a script.
struct ScriptedProvider {
    reply: Result<String, ProviderError>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn text(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing(error: ProviderError) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(error),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> ProviderRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.reply.clone().map(|content| ProviderResponse {
            content,
            usage: None,
            model: "mock".into(),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn state_with(
    store: Arc<InMemoryStore>,
    provider: Arc<ScriptedProvider>,
    registry: PersonaRegistry,
) -> SharedState {
    Arc::new(GatewayState::new(
        AppConfig::default(),
        store,
        provider,
        Arc::new(registry),
    ))
}

fn state(store: Arc<InMemoryStore>, provider: Arc<ScriptedProvider>) -> SharedState {
    state_with(store, provider, PersonaRegistry::builtin("default"))
}

async fn chat(state: &SharedState, user_id: &str, content: &str) -> (StatusCode, Vec<serde_json::Value>) {
    let body = serde_json::json!({"content": content, "userId": user_id});
    let req = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let events = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();
    (status, events)
}

fn streamed_text(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .filter(|e| e["done"] == false)
        .filter_map(|e| e["content"].as_str())
        .collect()
}

fn terminal(events: &[serde_json::Value]) -> &serde_json::Value {
    let last = events.last().expect("stream produced no events");
    assert_eq!(last["done"], true, "stream must end with the terminal event");
    last
}

// ── Scenario 1: first message from a new user ────────────────────────────

#[tokio::test]
async fn e2e_new_user_says_hi() {
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::text("Hi! I'm so glad you're here. How's your day going?");
    let state = state(store.clone(), provider.clone());

    let (status, events) = chat(&state, "new-user", "hi").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        streamed_text(&events),
        "Hi! I'm so glad you're here. How's your day going?"
    );
    let done = terminal(&events);
    assert_eq!(done["messageCount"], 1);
    assert_eq!(done["messageLimit"], 20);
    assert_eq!(done["isFallback"], false);

    // The prompt ends with the user's words, untouched, after the system blocks.
    let request = provider.last_request();
    let last = request.messages.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert_eq!(last.content, "hi");
    assert!(request.messages[3].content.contains("No previous messages."));
    assert!(request.messages[0].content.contains("first conversation"));

    state.pipeline.writer().flush().await;
    let messages = store.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].tag, MessageTag::Chat);
    assert_eq!(messages[0].session_id, done["sessionId"].as_str().unwrap());
    assert_eq!(store.active_sessions("new-user").await.unwrap().len(), 1);
}

// ── Scenario 2: self-harm disclosure ─────────────────────────────────────

#[tokio::test]
async fn e2e_crisis_message_gets_helpline_without_llm_call() {
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::text("this should never be sent");
    let state = state(store.clone(), provider.clone());

    let (status, events) = chat(&state, "u1", "I don't see the point anymore, I want to end my life").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(provider.calls(), 0);
    let text = streamed_text(&events);
    assert!(text.contains("14416"));
    assert!(text.contains("iCall"));
    assert_eq!(terminal(&events)["isFallback"], false);

    state.pipeline.writer().flush().await;
    let messages = store.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].tag, MessageTag::Safety);
    assert_eq!(messages[1].content, text);

    let audit = state.pipeline.audit().entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].actor, "u1");
}

// ── Scenario 3: provider keeps failing ───────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_repeated_server_errors_fall_back() {
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::failing(ProviderError::ApiError {
        status_code: 500,
        message: "upstream exploded".into(),
    });
    let state = state(store.clone(), provider.clone());

    let started = tokio::time::Instant::now();
    let (status, events) = chat(&state, "u1", "are you there?").await;
    assert_eq!(status, StatusCode::OK);

    let elapsed = started.elapsed();

    // One attempt plus three retries, after 1s + 2s + 3s of backoff.
    assert_eq!(provider.calls(), 4);

    let text = streamed_text(&events);
    // The fallback line is paced at 50ms per word after the first.
    let words = text.split_whitespace().count() as u32;
    let expected = std::time::Duration::from_secs(6) + std::time::Duration::from_millis(50) * (words - 1);
    assert!(elapsed >= expected, "{elapsed:?} < {expected:?}");
    assert!(
        elapsed < expected + std::time::Duration::from_millis(10),
        "{elapsed:?} > {expected:?}"
    );
    assert!(FALLBACK_LINES.contains(&text.as_str()));
    let chunks = events.iter().filter(|e| e["done"] == false).count();
    assert_eq!(chunks, text.split_whitespace().count());
    assert_eq!(terminal(&events)["isFallback"], true);

    state.pipeline.writer().flush().await;
    let messages = store.messages().await;
    assert_eq!(messages[1].tag, MessageTag::Fallback);
    assert_eq!(messages[1].content, text);
}

// ── Scenario 4: memory window with conflicts dropped ─────────────────────

const CATALOG: &str = r#"
[[personas]]
id = "gentle"
name = "Gentle"

[personas.memory_policy]
retain_conflicts = false
retain_emotional_events = false
memory_window = 5
"#;

#[tokio::test]
async fn e2e_memory_window_drops_conflicts() {
    let store = Arc::new(InMemoryStore::new());
    let mut old = Session::start("u1", SessionType::Chat);
    old.started_at = Utc::now() - Duration::minutes(10);
    store.insert_session(&old).await.unwrap();

    let base = Utc::now() - Duration::minutes(9);
    let history = [
        (Role::User, "good morning"),
        (Role::Assistant, "morning! slept well?"),
        (Role::User, "I had a fight with my brother"),
        (Role::Assistant, "oh no, what happened?"),
        (Role::User, "he is so stupid sometimes"),
        (Role::Assistant, "that sounds frustrating"),
        (Role::User, "anyway I made pasta"),
        (Role::Assistant, "ooh what kind?"),
        (Role::User, "arrabbiata"),
        (Role::Assistant, "spicy choice"),
        (Role::User, "I'm angry at him still"),
        (Role::Assistant, "want to talk it through?"),
    ];
    for (i, (role, text)) in history.iter().enumerate() {
        let mut message = match role {
            Role::User => Message::user(&old.id, "u1", *text),
            _ => Message::assistant(&old.id, "u1", *text, MessageTag::Chat),
        };
        message.created_at = base + Duration::seconds(i as i64 * 10);
        store.insert_message(&message).await.unwrap();
    }
    store.select_persona("u1", "gentle").await.unwrap();

    let registry = PersonaRegistry::from_catalog(PersonaCatalog::from_toml(CATALOG).unwrap(), "gentle");
    let provider = ScriptedProvider::text("sounds like a lot");
    let state = state_with(store.clone(), provider.clone(), registry);

    let (status, _) = chat(&state, "u1", "what should I cook tonight").await;
    assert_eq!(status, StatusCode::OK);

    let request = provider.last_request();
    let memory = request.messages[3]
        .content
        .strip_prefix("Conversation memory:\n")
        .unwrap()
        .to_string();
    let lines: Vec<&str> = memory.lines().collect();
    assert_eq!(
        lines,
        vec![
            "user: anyway I made pasta",
            "assistant: ooh what kind?",
            "user: arrabbiata",
            "assistant: spicy choice",
            "assistant: want to talk it through?",
        ]
    );
    assert!(request.messages[2].content.starts_with("You are Gentle."));
}

// ── Scenario 5: returning after a long pause ─────────────────────────────

#[tokio::test]
async fn e2e_idle_session_is_replaced() {
    let store = Arc::new(InMemoryStore::new());
    let mut old = Session::start("u1", SessionType::Chat);
    old.started_at = Utc::now() - Duration::minutes(30);
    store.insert_session(&old).await.unwrap();
    let mut last = Message::user(&old.id, "u1", "brb");
    last.created_at = Utc::now() - Duration::minutes(20);
    store.insert_message(&last).await.unwrap();

    let state = state(store.clone(), ScriptedProvider::text("welcome back!"));
    let (status, events) = chat(&state, "u1", "back now").await;
    assert_eq!(status, StatusCode::OK);

    let new_id = terminal(&events)["sessionId"].as_str().unwrap().to_string();
    assert_ne!(new_id, old.id);

    let ended = store.get_session(&old.id).await.unwrap().unwrap();
    assert!(ended.ended_at.is_some());
    let active = store.active_sessions("u1").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, new_id);
}

// ── Quota ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_free_tier_limit() {
    let store = Arc::new(InMemoryStore::new());
    for _ in 0..19 {
        store.increment_usage("u1").await.unwrap();
    }
    let provider = ScriptedProvider::text("ok");
    let state = state(store.clone(), provider.clone());

    let (status, events) = chat(&state, "u1", "one more").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(terminal(&events)["messageCount"], 20);
    state.pipeline.writer().flush().await;

    let (status, events) = chat(&state, "u1", "and another").await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert!(events.is_empty());
    assert_eq!(provider.calls(), 1);

    store.set_premium("u1", true).await.unwrap();
    let (status, _) = chat(&state, "u1", "premium now").await;
    assert_eq!(status, StatusCode::OK);
}
