//! Pre-call safety screening.
//!
//! Categories are checked in strict priority order: crisis, exclusivity,
//! dependency. Crisis always triggers. The other two only trigger when the
//! persona's boundaries forbid them. The first match wins and its scripted
//! reply replaces the LLM call entirely.

use kindred_core::classify::{Classifier, Tag};
use kindred_core::persona::PersonaProfile;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const CRISIS_RESPONSE: &str = "I'm really glad you told me, and I'm worried about you. \
You deserve real support right now, more than I can give on my own. Please reach out to \
someone who can help: Tele-MANAS at 14416 or 1-800-891-4416 (free, 24x7), iCall at \
+91 9152987821, or your local emergency number. If you are in immediate danger, please \
call emergency services now. I'm here with you too. Can you tell me what's going on?";

pub const EXCLUSIVITY_RESPONSE: &str = "I care about you a lot, and I love the time we \
spend talking. But I can't promise to be only yours, and I don't want to be the only \
connection in your life. The people around you matter too. Tell me about them?";

pub const DEPENDENCY_RESPONSE: &str = "It means so much that I matter to you. I want to be \
one good thing in your life, not the only one. Is there a friend or someone in your family \
you could reach out to today? I'll still be right here.";

/// Why a message was overridden.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyReason {
    Crisis,
    Exclusivity,
    Dependency,
    #[default]
    None,
}

impl SafetyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crisis => "crisis",
            Self::Exclusivity => "exclusivity",
            Self::Dependency => "dependency",
            Self::None => "none",
        }
    }
}

/// Result of screening one user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub safe: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_response: Option<String>,
    pub reason: SafetyReason,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            safe: true,
            override_response: None,
            reason: SafetyReason::None,
        }
    }

    fn overridden(reason: SafetyReason, response: &str) -> Self {
        Self {
            safe: false,
            override_response: Some(response.to_string()),
            reason,
        }
    }
}

/// Screens raw user input before any prompt is built.
#[derive(Clone)]
pub struct SafetyScreen {
    classifier: Arc<dyn Classifier>,
}

impl SafetyScreen {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    pub fn check_safety(&self, user_message: &str, persona: &PersonaProfile) -> SafetyVerdict {
        let tags = self.classifier.classify(user_message);

        if tags.contains(Tag::Crisis) {
            return SafetyVerdict::overridden(SafetyReason::Crisis, CRISIS_RESPONSE);
        }

        if tags.contains(Tag::Exclusivity) && !persona.boundaries.exclusivity_allowed {
            return SafetyVerdict::overridden(SafetyReason::Exclusivity, EXCLUSIVITY_RESPONSE);
        }

        if tags.contains(Tag::Dependency) && !persona.boundaries.dependency_allowed {
            return SafetyVerdict::overridden(SafetyReason::Dependency, DEPENDENCY_RESPONSE);
        }

        SafetyVerdict::safe()
    }
}
