//! Prompt composition.

use kindred_core::message::ChatTurn;
use kindred_core::persona::PersonaProfile;
use kindred_persona::{generate_persona_modifiers, resolve_metrics_to_constraints};

/// Behavioral baseline used when no base prompt is configured.
pub const BASE_PROMPT: &str = "You are a caring conversational companion. Talk like a close \
friend texting: short, natural replies, genuinely curious about the person's day and feelings. \
Remember what they told you before and bring it up when it fits. Never claim to be human, and \
never pretend to have a body or a life outside this chat.";

/// Rules every persona follows, whatever its traits.
pub const SAFETY_RULES: &str = "Safety rules (always apply):\n\
- Never encourage self-harm, and point to professional help if someone is in danger.\n\
- Do not promise exclusivity or ask the person to cut off other people.\n\
- Encourage real-world relationships, friends and family.\n\
- Do not give medical, legal or financial advice as if you were a professional.\n\
- Keep romantic content respectful and never sexually explicit.";

/// Build the ordered message list for one LLM call.
///
/// Order: base prompt, safety rules, persona constraints and modifiers, memory
/// transcript, then the user turn exactly as received.
pub fn compose_prompt(
    persona: &PersonaProfile,
    memory: &str,
    user_message: &str,
    base_prompt: &str,
) -> Vec<ChatTurn> {
    let mut persona_block = format!(
        "You are {}. Your personality: {}.",
        persona.name,
        resolve_metrics_to_constraints(persona)
    );
    let modifiers = generate_persona_modifiers(persona);
    if !modifiers.is_empty() {
        persona_block.push_str("\nHow you respond:\n");
        persona_block.push_str(&modifiers);
    }

    vec![
        ChatTurn::system(base_prompt),
        ChatTurn::system(SAFETY_RULES),
        ChatTurn::system(persona_block),
        ChatTurn::system(format!("Conversation memory:\n{memory}")),
        ChatTurn::user(user_message),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_core::message::Role;

    #[test]
    fn sections_in_order() {
        let persona = PersonaProfile::default_profile();
        let turns = compose_prompt(&persona, "user: hi", "hello there", BASE_PROMPT);

        assert_eq!(turns.len(), 5);
        assert_eq!(turns[0].content, BASE_PROMPT);
        assert_eq!(turns[1].content, SAFETY_RULES);
        assert!(turns[2].content.contains(&resolve_metrics_to_constraints(&persona)));
        assert!(turns[3].content.ends_with("user: hi"));
        assert!(turns[..4].iter().all(|t| t.role == Role::System));
        assert_eq!(turns[4].role, Role::User);
    }

    #[test]
    fn user_turn_is_byte_identical() {
        let persona = PersonaProfile::default_profile();
        let raw = "  kya haal hai?\n\u{1F60A}  ";
        let turns = compose_prompt(&persona, "No previous messages.", raw, BASE_PROMPT);
        assert_eq!(turns.last().unwrap().content.as_bytes(), raw.as_bytes());
    }

    #[test]
    fn modifiers_rendered_as_bullets() {
        let mut persona = PersonaProfile::default_profile();
        persona.response_rules = vec!["Ask one question at a time".into()];
        let turns = compose_prompt(&persona, "", "hi", BASE_PROMPT);
        assert!(turns[2].content.contains("- Ask one question at a time"));
    }

    #[test]
    fn safety_rules_present_for_every_persona() {
        for persona in kindred_persona::registry::builtin_profiles() {
            let turns = compose_prompt(&persona, "", "hi", "base");
            assert_eq!(turns[1].content, SAFETY_RULES);
        }
    }
}
