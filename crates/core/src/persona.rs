//! Persona profiles: the data that conditions the companion's tone.
//!
//! A persona is pure data: trait scalars, language style, safety boundaries,
//! ordered response rules, and a memory policy. Profiles are never mutated
//! per user; the registry hands out shared, read-only copies.

use serde::{Deserialize, Serialize};

/// Seven personality scalars, each in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaMetrics {
    pub warmth: f32,
    pub flirtiness: f32,
    pub playfulness: f32,
    pub emotional_depth: f32,
    pub attachment: f32,
    pub assertiveness: f32,
    pub humor: f32,
}

impl Default for PersonaMetrics {
    fn default() -> Self {
        Self {
            warmth: 0.6,
            flirtiness: 0.2,
            playfulness: 0.5,
            emotional_depth: 0.6,
            attachment: 0.4,
            assertiveness: 0.5,
            humor: 0.5,
        }
    }
}

/// How the persona writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageStyle {
    /// Share of Hinglish in replies, 0–100.
    pub hinglish_percent: u8,
    /// How often emojis appear, `[0, 1]`.
    pub emoji_frequency: f32,
    /// Target sentence length in words.
    pub avg_sentence_length: u32,
    /// `[0, 1]`, 0 = slangy, 1 = formal.
    pub formality: f32,
}

impl Default for LanguageStyle {
    fn default() -> Self {
        Self {
            hinglish_percent: 30,
            emoji_frequency: 0.3,
            avg_sentence_length: 12,
            formality: 0.4,
        }
    }
}

/// Relationship boundaries the safety layer enforces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundaries {
    pub exclusivity_allowed: bool,
    pub dependency_allowed: bool,
    pub emotional_intensity_max: f32,
}

impl Default for Boundaries {
    fn default() -> Self {
        Self {
            exclusivity_allowed: false,
            dependency_allowed: false,
            emotional_intensity_max: 0.7,
        }
    }
}

/// Which past turns the persona keeps in view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPolicy {
    pub retain_conflicts: bool,
    pub retain_emotional_events: bool,
    pub memory_window: usize,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            retain_conflicts: true,
            retain_emotional_events: true,
            memory_window: 20,
        }
    }
}

/// A named, data-defined behavioral profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub metrics: PersonaMetrics,
    #[serde(default)]
    pub language_style: LanguageStyle,
    #[serde(default)]
    pub boundaries: Boundaries,
    #[serde(default)]
    pub response_rules: Vec<String>,
    #[serde(default)]
    pub memory_policy: MemoryPolicy,
}

impl PersonaProfile {
    /// The balanced profile used whenever a requested id is unknown.
    pub fn default_profile() -> Self {
        Self {
            id: "default".into(),
            name: "Kindred".into(),
            metrics: PersonaMetrics::default(),
            language_style: LanguageStyle::default(),
            boundaries: Boundaries::default(),
            response_rules: vec![
                "Reply like a close friend texting, not like an assistant".into(),
                "Ask at most one question per reply".into(),
                "Remember and refer back to details the person has shared".into(),
            ],
            memory_policy: MemoryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_has_safe_boundaries() {
        let persona = PersonaProfile::default_profile();
        assert_eq!(persona.id, "default");
        assert!(!persona.boundaries.exclusivity_allowed);
        assert!(!persona.boundaries.dependency_allowed);
    }

    #[test]
    fn partial_toml_profile_fills_defaults() {
        let toml_str = r#"
id = "meera"
name = "Meera"
response_rules = ["Use her name sometimes"]

[memory_policy]
retain_conflicts = false
retain_emotional_events = true
memory_window = 5
"#;
        let persona: PersonaProfile = toml::from_str(toml_str).unwrap();
        assert_eq!(persona.name, "Meera");
        assert_eq!(persona.memory_policy.memory_window, 5);
        assert_eq!(persona.metrics, PersonaMetrics::default());
    }
}
