//! Memory adapter: turns recent history into the transcript a persona sees.

use kindred_core::classify::{Classifier, Tag, TagSet};
use kindred_core::message::ChatTurn;
use kindred_core::persona::{MemoryPolicy, PersonaProfile};

/// Returned when there is nothing to remember.
pub const NO_MEMORY: &str = "No previous messages.";

/// Filter, reorder and window `turns` according to the persona's memory policy.
///
/// Conflict turns are dropped unless the persona retains them. Emotional
/// turns are moved to the front (keeping their relative order) when the
/// persona retains emotional events, so chronology is deliberately broken.
/// Only the last `memory_window` entries of the result are kept.
pub fn adapt_memory(
    turns: &[ChatTurn],
    persona: &PersonaProfile,
    classifier: &dyn Classifier,
) -> String {
    let policy = &persona.memory_policy;

    let mut kept: Vec<(&ChatTurn, bool)> = turns
        .iter()
        .filter_map(|turn| {
            let tags = classifier.classify(&turn.content);
            if hidden_by(policy, &tags) {
                return None;
            }
            Some((turn, tags.contains(Tag::Emotional)))
        })
        .collect();

    if policy.retain_emotional_events {
        // Stable sort: emotional first, original order otherwise.
        kept.sort_by_key(|(_, emotional)| !emotional);
    }

    let start = kept.len().saturating_sub(policy.memory_window);
    let lines: Vec<String> = kept[start..]
        .iter()
        .map(|(turn, _)| format!("{}: {}", turn.role.as_str(), turn.content))
        .collect();

    if lines.is_empty() {
        NO_MEMORY.to_string()
    } else {
        lines.join("\n")
    }
}

/// Whether the persona's memory policy keeps `text` out of anything it sees.
pub fn forgets(text: &str, persona: &PersonaProfile, classifier: &dyn Classifier) -> bool {
    hidden_by(&persona.memory_policy, &classifier.classify(text))
}

fn hidden_by(policy: &MemoryPolicy, tags: &TagSet) -> bool {
    !policy.retain_conflicts && tags.contains(Tag::Conflict)
}
