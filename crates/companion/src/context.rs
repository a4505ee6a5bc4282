//! Context builder.
//!
//! Gathers what the companion knows about the person (relationship summary,
//! recent messages, recent sessions) and renders it as a prose fragment of
//! the system prompt. Every fetch degrades to empty data on failure. The
//! caller decides which messages stay out of the rendered transcript.

use chrono::Utc;
use kindred_config::ContextConfig;
use kindred_core::message::{ChatTurn, Message, Role};
use kindred_core::session::SessionStats;
use kindred_core::storage::{RelationshipSummary, Storage};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Characters kept per transcript line.
const TRANSCRIPT_LINE_CHARS: usize = 200;

/// Everything the prompt needs to know about the relationship so far.
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    pub summary: Option<RelationshipSummary>,
    /// Chronological, oldest first.
    pub recent_messages: Vec<Message>,
    /// Newest session first.
    pub session_stats: Vec<SessionStats>,
    pub system_prompt: String,
}

pub struct ContextBuilder {
    store: Arc<dyn Storage>,
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn Storage>, config: ContextConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Fetch and render the context. Messages for which `hide` returns true
    /// are left out of the transcript but still returned in the bundle.
    pub async fn build_chat_context<F>(&self, user_id: &str, session_id: &str, hide: F) -> ContextBundle
    where
        F: Fn(&Message) -> bool,
    {
        let (summary, recent_messages, session_stats) = tokio::join!(
            self.fetch_summary(user_id),
            self.fetch_recent_messages(user_id),
            self.fetch_session_stats(user_id),
        );

        let system_prompt = render_context(
            summary.as_ref(),
            &recent_messages,
            &hide,
            &session_stats,
            self.config.transcript_lines,
        );

        debug!(
            user_id,
            session_id,
            messages = recent_messages.len(),
            sessions = session_stats.len(),
            has_summary = summary.is_some(),
            "Context built"
        );

        ContextBundle {
            summary,
            recent_messages,
            session_stats,
            system_prompt,
        }
    }

    async fn fetch_summary(&self, user_id: &str) -> Option<RelationshipSummary> {
        self.store
            .relationship_summary(user_id)
            .await
            .unwrap_or_else(|e| {
                warn!(user_id, error = %e, "Relationship summary unavailable");
                None
            })
    }

    async fn fetch_recent_messages(&self, user_id: &str) -> Vec<Message> {
        match self
            .store
            .recent_messages(user_id, self.config.recent_message_limit)
            .await
        {
            Ok(mut messages) => {
                messages.reverse();
                messages
            }
            Err(e) => {
                warn!(user_id, error = %e, "Recent messages unavailable");
                Vec::new()
            }
        }
    }

    async fn fetch_session_stats(&self, user_id: &str) -> Vec<SessionStats> {
        let sessions = match self
            .store
            .recent_sessions(user_id, self.config.session_history_limit)
            .await
        {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(user_id, error = %e, "Session history unavailable");
                return Vec::new();
            }
        };
        if sessions.is_empty() {
            return Vec::new();
        }

        let ids: Vec<String> = sessions.iter().map(|s| s.id.clone()).collect();
        let counts = self.store.message_counts(&ids).await.unwrap_or_else(|e| {
            warn!(user_id, error = %e, "Message counts unavailable");
            Default::default()
        });

        let now = Utc::now();
        sessions
            .into_iter()
            .map(|session| SessionStats {
                message_count: counts.get(&session.id).copied().unwrap_or(0),
                duration_secs: session.duration_secs(now),
                session,
            })
            .collect()
    }
}

/// Map the last `k` messages to chat turns, oldest first.
pub fn recent_turns(messages: &[Message], k: usize) -> Vec<ChatTurn> {
    let start = messages.len().saturating_sub(k);
    messages[start..].iter().map(Message::to_turn).collect()
}

fn render_context(
    summary: Option<&RelationshipSummary>,
    messages: &[Message],
    hide: &dyn Fn(&Message) -> bool,
    stats: &[SessionStats],
    transcript_lines: usize,
) -> String {
    // The current session is already in `stats`, so it alone means nothing.
    if summary.is_none() && messages.is_empty() {
        return "This is your first conversation with this person. Get to know them gently."
            .to_string();
    }

    let mut out = String::new();

    if let Some(summary) = summary {
        out.push_str("What you know about this person:\n");
        if !summary.known_traits.is_empty() {
            let _ = writeln!(out, "- Traits: {}", summary.known_traits.join(", "));
        }
        if let Some(love_language) = &summary.love_language {
            let _ = writeln!(out, "- Love language (best guess): {love_language}");
        }
        if let Some(style) = &summary.communication_style {
            let _ = writeln!(out, "- Communication style: {style}");
        }
        if !summary.summary.trim().is_empty() {
            let _ = writeln!(out, "- Summary: {}", summary.summary.trim());
        }
        out.push('\n');
    }

    if !stats.is_empty() {
        let sessions = stats.len();
        let minutes = stats.iter().map(|s| s.duration_secs).sum::<i64>() / 60;
        let total_messages: usize = stats.iter().map(|s| s.message_count).sum();
        let _ = writeln!(
            out,
            "You have talked {sessions} time{} recently, for about {minutes} minute{} and {total_messages} message{} in total.\n",
            plural(sessions as i64),
            plural(minutes),
            plural(total_messages as i64),
        );
    }

    let visible: Vec<&Message> = messages.iter().filter(|m| !hide(m)).collect();
    if !visible.is_empty() {
        out.push_str("Recent conversation:\n");
        let start = visible.len().saturating_sub(transcript_lines);
        for message in &visible[start..] {
            let speaker = match message.role {
                Role::User => "Them",
                Role::Assistant | Role::System => "You",
            };
            let _ = writeln!(out, "{speaker}: {}", truncate(&message.content, TRANSCRIPT_LINE_CHARS));
        }
    }

    out.trim_end().to_string()
}

fn plural(n: i64) -> &'static str {
    if n == 1 { "" } else { "s" }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use kindred_core::message::MessageTag;
    use kindred_core::session::{Session, SessionType};
    use kindred_store::InMemoryStore;

    fn builder(store: &Arc<InMemoryStore>) -> ContextBuilder {
        ContextBuilder::new(store.clone(), ContextConfig::default())
    }

    #[tokio::test]
    async fn new_user_gets_first_conversation_prompt() {
        let store = Arc::new(InMemoryStore::new());
        let bundle = builder(&store).build_chat_context("u1", "s1", |_| false).await;
        assert!(bundle.summary.is_none());
        assert!(bundle.recent_messages.is_empty());
        assert!(bundle.system_prompt.contains("first conversation"));
    }

    #[tokio::test]
    async fn messages_are_chronological_and_stats_counted() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = Session::start("u1", SessionType::Chat);
        session.started_at = Utc::now() - Duration::minutes(10);
        store.insert_session(&session).await.unwrap();

        let base = Utc::now() - Duration::minutes(5);
        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            let mut m = Message::user(&session.id, "u1", *text);
            m.created_at = base + Duration::seconds(i as i64);
            store.insert_message(&m).await.unwrap();
        }

        let bundle = builder(&store).build_chat_context("u1", &session.id, |_| false).await;
        let contents: Vec<&str> = bundle.recent_messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert_eq!(bundle.session_stats.len(), 1);
        assert_eq!(bundle.session_stats[0].message_count, 3);
        assert!(bundle.system_prompt.contains("Them: three"));
        assert!(bundle.system_prompt.contains("3 messages"));
    }

    #[tokio::test]
    async fn summary_facts_appear_in_prompt() {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_summary(&RelationshipSummary {
                user_id: "u1".into(),
                known_traits: vec!["loves chai".into(), "night owl".into()],
                love_language: Some("words of affirmation".into()),
                communication_style: None,
                summary: "Works in Pune.".into(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let bundle = builder(&store).build_chat_context("u1", "s1", |_| false).await;
        assert!(bundle.system_prompt.contains("loves chai, night owl"));
        assert!(bundle.system_prompt.contains("words of affirmation"));
        assert!(bundle.system_prompt.contains("Works in Pune."));
    }

    #[tokio::test]
    async fn read_failures_degrade_to_empty() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_message(&Message::user("s1", "u1", "hello"))
            .await
            .unwrap();
        store.set_fail_reads(true);

        let bundle = builder(&store).build_chat_context("u1", "s1", |_| false).await;
        assert!(bundle.recent_messages.is_empty());
        assert!(bundle.session_stats.is_empty());
        assert!(bundle.summary.is_none());
    }

    #[test]
    fn transcript_lines_are_truncated() {
        let long = "a".repeat(500);
        let messages = vec![Message::assistant("s1", "u1", long, MessageTag::Chat)];
        let prompt = render_context(None, &messages, &|_: &Message| false, &[], 15);
        let line = prompt.lines().last().unwrap();
        assert!(line.starts_with("You: "));
        assert!(line.ends_with("..."));
        assert_eq!(line.len(), "You: ".len() + TRANSCRIPT_LINE_CHARS + 3);
    }

    #[test]
    fn transcript_keeps_last_lines_only() {
        let messages: Vec<Message> = (0..20)
            .map(|i| Message::user("s1", "u1", format!("msg {i}")))
            .collect();
        let prompt = render_context(None, &messages, &|_: &Message| false, &[], 15);
        assert!(!prompt.contains("msg 4\n"));
        assert!(prompt.contains("Them: msg 5"));
        assert!(prompt.ends_with("Them: msg 19"));
    }

    #[test]
    fn hidden_messages_stay_out_of_transcript() {
        let messages = vec![
            Message::user("s1", "u1", "we had a fight"),
            Message::user("s1", "u1", "made pasta"),
        ];
        let prompt = render_context(None, &messages, &|m: &Message| m.content.contains("fight"), &[], 15);
        assert!(prompt.contains("Them: made pasta"));
        assert!(!prompt.contains("fight"));

        let prompt = render_context(None, &messages, &|_: &Message| true, &[], 15);
        assert!(!prompt.contains("Recent conversation"));
        assert!(!prompt.contains("first conversation"));
    }

    #[test]
    fn recent_turns_takes_last_k() {
        let messages: Vec<Message> = (0..5)
            .map(|i| Message::user("s1", "u1", format!("m{i}")))
            .collect();
        let turns = recent_turns(&messages, 2);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "m3");
        assert_eq!(turns[1].content, "m4");
        assert_eq!(recent_turns(&messages, 10).len(), 5);
    }
}
