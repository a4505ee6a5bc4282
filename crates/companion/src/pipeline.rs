//! The chat turn pipeline.
//!
//! ```text
//! Received → QuotaChecked → SessionResolved → ContextBuilt → SafetyChecked
//!   → SafetyOverride                                              ┐
//!   → PromptComposed → LlmInvoked → StreamedSuccess               ├→ Persisted
//!                                 → StreamedPartial               │
//!                                 → RetriesExhausted → FallbackStreamed ┘
//! ```
//!
//! Validation and the quota check run before anything is spawned, so a
//! rejected turn never touches sessions or the provider. Everything after
//! runs in its own task and always ends the stream with a terminal event.

use crate::context::{ContextBuilder, recent_turns};
use crate::memory::{adapt_memory, forgets};
use crate::orchestrator::{ClientSink, Reply, ResponseOrchestrator, RetryPolicy};
use crate::prompt::{BASE_PROMPT, compose_prompt};
use crate::quota::{QuotaGate, QuotaState};
use crate::session::SessionManager;
use crate::stream_event::{ChatStreamEvent, TurnSummary};
use crate::writer::BackgroundWriter;
use kindred_config::AppConfig;
use kindred_core::classify::Classifier;
use kindred_core::error::TurnError;
use kindred_core::message::{Message, MessageTag};
use kindred_core::persona::PersonaProfile;
use kindred_core::provider::Provider;
use kindred_core::session::SessionType;
use kindred_core::storage::Storage;
use kindred_persona::PersonaRegistry;
use kindred_safety::{
    AuditEvent, AuditLogger, AuditOutcome, KeywordClassifier, SafetyReason, SafetyScreen,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events buffered between the turn task and the client.
const EVENT_BUFFER: usize = 64;

/// Where a turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Received,
    QuotaChecked,
    SessionResolved,
    ContextBuilt,
    SafetyChecked,
    SafetyOverride,
    PromptComposed,
    LlmInvoked,
    StreamedSuccess,
    StreamedPartial,
    RetriesExhausted,
    FallbackStreamed,
    Persisted,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::QuotaChecked => "quota_checked",
            Self::SessionResolved => "session_resolved",
            Self::ContextBuilt => "context_built",
            Self::SafetyChecked => "safety_checked",
            Self::SafetyOverride => "safety_override",
            Self::PromptComposed => "prompt_composed",
            Self::LlmInvoked => "llm_invoked",
            Self::StreamedSuccess => "streamed_success",
            Self::StreamedPartial => "streamed_partial",
            Self::RetriesExhausted => "retries_exhausted",
            Self::FallbackStreamed => "fallback_streamed",
            Self::Persisted => "persisted",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One incoming chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub user_id: String,
    pub content: String,
    /// The client's idea of the current session. The server decides.
    pub session_id: Option<String>,
    pub session_type: SessionType,
}

impl ChatRequest {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            content: content.into(),
            session_id: None,
            session_type: SessionType::Chat,
        }
    }

    fn validate(&self) -> Result<(), TurnError> {
        if self.user_id.trim().is_empty() {
            return Err(TurnError::Validation("userId is required".into()));
        }
        if self.content.trim().is_empty() {
            return Err(TurnError::Validation("content is required".into()));
        }
        Ok(())
    }
}

/// What happened during a turn, available once the stream has closed.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub session_id: String,
    pub persona_id: String,
    pub final_state: TurnState,
    pub states: Vec<TurnState>,
    pub reply: String,
    pub tag: MessageTag,
    pub message_count: u64,
    pub is_fallback: bool,
    pub safety_reason: SafetyReason,
    pub attempts: u32,
}

/// A running turn: the client event stream plus the eventual outcome.
pub struct TurnHandle {
    pub events: mpsc::Receiver<ChatStreamEvent>,
    pub outcome: JoinHandle<TurnOutcome>,
}

struct StateTrail {
    user_id: String,
    states: Vec<TurnState>,
}

impl StateTrail {
    fn new(user_id: &str) -> Self {
        debug!(user_id, state = %TurnState::Received, "Turn state");
        Self {
            user_id: user_id.to_string(),
            states: vec![TurnState::Received],
        }
    }

    fn advance(&mut self, state: TurnState) {
        debug!(user_id = %self.user_id, state = %state, "Turn state");
        self.states.push(state);
    }

    fn current(&self) -> TurnState {
        self.states.last().copied().unwrap_or(TurnState::Received)
    }
}

/// Wires every stage of a chat turn together.
pub struct ChatPipeline {
    store: Arc<dyn Storage>,
    registry: Arc<PersonaRegistry>,
    sessions: Arc<SessionManager>,
    context: ContextBuilder,
    quota: QuotaGate,
    safety: SafetyScreen,
    classifier: Arc<dyn Classifier>,
    orchestrator: ResponseOrchestrator,
    writer: BackgroundWriter,
    audit: Arc<AuditLogger>,
    base_prompt: String,
}

impl ChatPipeline {
    /// Build the pipeline from configuration. Spawns the background writer,
    /// so it must be called inside a Tokio runtime.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn Storage>,
        provider: Arc<dyn Provider>,
        registry: Arc<PersonaRegistry>,
    ) -> Self {
        let classifier: Arc<dyn Classifier> = Arc::new(KeywordClassifier::new());
        let audit = Arc::new(AuditLogger::tracing());
        let orchestrator = ResponseOrchestrator::new(provider, config.default_model.clone())
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_policy(RetryPolicy::from(&config.retry));

        Self {
            sessions: Arc::new(SessionManager::new(
                store.clone(),
                config.session.timeout_minutes,
            )),
            context: ContextBuilder::new(store.clone(), config.context.clone()),
            quota: QuotaGate::new(store.clone(), config.quota.free_message_limit),
            safety: SafetyScreen::new(classifier.clone()),
            writer: BackgroundWriter::spawn(store.clone(), audit.clone()),
            base_prompt: config
                .persona
                .base_prompt
                .clone()
                .unwrap_or_else(|| BASE_PROMPT.to_string()),
            store,
            registry,
            classifier,
            orchestrator,
            audit,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<PersonaRegistry> {
        &self.registry
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn writer(&self) -> &BackgroundWriter {
        &self.writer
    }

    pub fn free_message_limit(&self) -> u64 {
        self.quota.limit()
    }

    /// Validate and quota-check a turn, then run the rest in the background.
    pub async fn run_turn(self: &Arc<Self>, request: ChatRequest) -> Result<TurnHandle, TurnError> {
        request.validate()?;
        let mut trail = StateTrail::new(&request.user_id);

        let quota = match self.quota.check(&request.user_id).await {
            Ok(quota) => quota,
            Err(e) => {
                if let TurnError::QuotaExceeded { count, limit } = &e {
                    info!(user_id = %request.user_id, count, limit, "Quota exceeded");
                    self.writer.audit(
                        AuditEvent::QuotaExceeded { limit: *limit },
                        &request.user_id,
                        "chat",
                        AuditOutcome::Denied,
                        Some(format!("count {count}")),
                    );
                }
                return Err(e);
            }
        };
        trail.advance(TurnState::QuotaChecked);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let pipeline = Arc::clone(self);
        let outcome = tokio::spawn(async move { pipeline.drive(request, quota, trail, tx).await });

        Ok(TurnHandle {
            events: rx,
            outcome,
        })
    }

    async fn drive(
        &self,
        request: ChatRequest,
        quota: QuotaState,
        mut trail: StateTrail,
        tx: mpsc::Sender<ChatStreamEvent>,
    ) -> TurnOutcome {
        let user_id = request.user_id.as_str();
        let mut sink = ClientSink::new(tx);

        let persona = self.resolve_persona(user_id).await;

        let session = self
            .sessions
            .get_or_create_session(user_id, request.session_type)
            .await;
        trail.advance(TurnState::SessionResolved);
        if let Some(client_session) = &request.session_id
            && client_session != &session.id
        {
            debug!(user_id, client_session = %client_session, session_id = %session.id, "Client session id superseded");
        }

        // Stamped before the reply exists so it sorts first.
        let user_message = Message::user(&session.id, user_id, &request.content);

        let context = self
            .context
            .build_chat_context(user_id, &session.id, |m| {
                forgets(&m.content, &persona, self.classifier.as_ref())
            })
            .await;
        trail.advance(TurnState::ContextBuilt);

        let turns = recent_turns(&context.recent_messages, self.context.config().history_turns);
        let memory = adapt_memory(&turns, &persona, self.classifier.as_ref());

        let verdict = self.safety.check_safety(&request.content, &persona);
        trail.advance(TurnState::SafetyChecked);

        let reply = match verdict.override_response {
            Some(scripted) => {
                trail.advance(TurnState::SafetyOverride);
                info!(user_id, session_id = %session.id, reason = verdict.reason.as_str(), "Safety override");
                sink.send_chunk(scripted.as_str()).await;
                self.writer.audit(
                    AuditEvent::SafetyOverride {
                        reason: verdict.reason.as_str().to_string(),
                    },
                    user_id,
                    &session.id,
                    AuditOutcome::Success,
                    None,
                );
                Reply {
                    text: scripted,
                    tag: MessageTag::Safety,
                    attempts: 0,
                    client_connected: sink.is_connected(),
                }
            }
            None => {
                let base_prompt = format!("{}\n\n{}", self.base_prompt, context.system_prompt);
                let messages = compose_prompt(&persona, &memory, &request.content, &base_prompt);
                trail.advance(TurnState::PromptComposed);

                trail.advance(TurnState::LlmInvoked);
                let reply = self.orchestrator.respond(messages, &mut sink).await;
                self.record_reply(&mut trail, &reply, user_id, &session.id);
                reply
            }
        };

        self.writer.insert_message(user_message);
        self.writer.insert_message(Message::assistant(
            &session.id,
            user_id,
            reply.text.as_str(),
            reply.tag,
        ));
        self.writer.increment_usage(user_id);
        trail.advance(TurnState::Persisted);

        let summary = TurnSummary {
            session_id: session.id.clone(),
            message_count: quota.message_count + 1,
            message_limit: quota.limit,
            is_fallback: reply.is_fallback(),
        };
        sink.send(ChatStreamEvent::Done(summary.clone())).await;

        info!(
            user_id,
            session_id = %session.id,
            persona = %persona.id,
            tag = reply.tag.as_str(),
            attempts = reply.attempts,
            client_connected = sink.is_connected(),
            "Turn complete"
        );

        TurnOutcome {
            session_id: session.id,
            persona_id: persona.id.clone(),
            final_state: trail.current(),
            states: trail.states,
            is_fallback: summary.is_fallback,
            message_count: summary.message_count,
            reply: reply.text,
            tag: reply.tag,
            safety_reason: verdict.reason,
            attempts: reply.attempts,
        }
    }

    fn record_reply(&self, trail: &mut StateTrail, reply: &Reply, user_id: &str, session_id: &str) {
        match reply.tag {
            MessageTag::Fallback => {
                trail.advance(TurnState::RetriesExhausted);
                trail.advance(TurnState::FallbackStreamed);
                self.writer.audit(
                    AuditEvent::FallbackServed {
                        attempts: reply.attempts,
                    },
                    user_id,
                    session_id,
                    AuditOutcome::Failure,
                    None,
                );
            }
            MessageTag::Partial => {
                trail.advance(TurnState::StreamedPartial);
                self.writer.audit(
                    AuditEvent::StreamInterrupted,
                    user_id,
                    session_id,
                    AuditOutcome::Failure,
                    Some(format!("{} chars kept", reply.text.len())),
                );
            }
            MessageTag::Chat | MessageTag::Safety => trail.advance(TurnState::StreamedSuccess),
        }
    }

    /// The user's selected persona, or the default.
    async fn resolve_persona(&self, user_id: &str) -> Arc<PersonaProfile> {
        match self.store.persona_selection(user_id).await {
            Ok(Some(id)) => self.registry.load_persona(&id),
            Ok(None) => self.registry.default_persona(),
            Err(e) => {
                warn!(user_id, error = %e, "Persona selection unavailable, using default");
                self.registry.default_persona()
            }
        }
    }
}
