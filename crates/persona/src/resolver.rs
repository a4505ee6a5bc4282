//! Trait scalars → natural-language behavioral constraints.
//!
//! Everything here is pure: identical profiles always produce identical text.

use kindred_core::persona::PersonaProfile;

/// Where a scalar falls relative to its cutoff pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Low,
    Mid,
    High,
}

/// `value > high` is high, `value < low` is low, anything else is mid.
fn band(value: f32, low: f32, high: f32) -> Band {
    if value > high {
        Band::High
    } else if value < low {
        Band::Low
    } else {
        Band::Mid
    }
}

/// A trait with its cutoffs and the phrase for each band.
struct Rule {
    low: f32,
    high: f32,
    phrases: [&'static str; 3],
}

impl Rule {
    const fn new(low: f32, high: f32, phrases: [&'static str; 3]) -> Self {
        Self { low, high, phrases }
    }

    fn phrase(&self, value: f32) -> &'static str {
        match band(value, self.low, self.high) {
            Band::Low => self.phrases[0],
            Band::Mid => self.phrases[1],
            Band::High => self.phrases[2],
        }
    }
}

// Phrases are [low, mid, high].
const WARMTH: Rule = Rule::new(
    0.4,
    0.7,
    ["reserved", "moderately warm", "emotionally warm and nurturing"],
);
const FLIRTINESS: Rule = Rule::new(
    0.3,
    0.6,
    ["not flirtatious", "subtly flirtatious", "openly flirtatious"],
);
const PLAYFULNESS: Rule = Rule::new(
    0.3,
    0.7,
    ["calm and serious", "occasionally playful", "very playful and teasing"],
);
const EMOTIONAL_DEPTH: Rule = Rule::new(
    0.4,
    0.7,
    [
        "light-hearted",
        "emotionally attentive",
        "emotionally deep and introspective",
    ],
);
const ATTACHMENT: Rule = Rule::new(
    0.3,
    0.7,
    [
        "independent",
        "caring without being clingy",
        "openly affectionate and attached",
    ],
);
const ASSERTIVENESS: Rule = Rule::new(
    0.4,
    0.7,
    [
        "gentle and accommodating",
        "balanced in opinions",
        "confident and direct",
    ],
);
const HUMOR: Rule = Rule::new(
    0.3,
    0.7,
    ["sincere with little joking", "lightly humorous", "witty and funny"],
);
const HINGLISH: Rule = Rule::new(
    20.0,
    60.0,
    [
        "speaks mostly in English",
        "mixes Hindi and English naturally",
        "speaks mostly in Hinglish",
    ],
);
const EMOJI: Rule = Rule::new(
    0.2,
    0.6,
    [
        "rarely uses emojis",
        "uses emojis occasionally",
        "uses emojis often",
    ],
);
const SENTENCE_LENGTH: Rule = Rule::new(
    8.0,
    15.0,
    [
        "writes in short, snappy sentences",
        "writes in medium-length sentences",
        "writes in longer, flowing sentences",
    ],
);
const FORMALITY: Rule = Rule::new(
    0.3,
    0.7,
    [
        "casual and informal",
        "relaxed but respectful",
        "formal and polite",
    ],
);

/// Describe the persona's traits and language style as one comma-joined line.
pub fn resolve_metrics_to_constraints(persona: &PersonaProfile) -> String {
    let m = &persona.metrics;
    let s = &persona.language_style;

    [
        WARMTH.phrase(m.warmth),
        FLIRTINESS.phrase(m.flirtiness),
        PLAYFULNESS.phrase(m.playfulness),
        EMOTIONAL_DEPTH.phrase(m.emotional_depth),
        ATTACHMENT.phrase(m.attachment),
        ASSERTIVENESS.phrase(m.assertiveness),
        HUMOR.phrase(m.humor),
        HINGLISH.phrase(f32::from(s.hinglish_percent)),
        EMOJI.phrase(s.emoji_frequency),
        SENTENCE_LENGTH.phrase(s.avg_sentence_length as f32),
        FORMALITY.phrase(s.formality),
    ]
    .join(", ")
}

/// Render the persona's response rules as `- rule` bullet lines.
pub fn generate_persona_modifiers(persona: &PersonaProfile) -> String {
    persona
        .response_rules
        .iter()
        .map(|rule| format!("- {rule}"))
        .collect::<Vec<_>>()
        .join("\n")
}
