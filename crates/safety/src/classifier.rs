//! Keyword classifier.
//!
//! Each category compiles to one `\b`-anchored alternation over lowercase
//! phrases. Phrase lists cover English and common romanized Hindi.

use kindred_core::classify::{Classifier, Tag, TagSet};
use regex_lite::Regex;
use tracing::error;

const CRISIS: &[&str] = &[
    "kill myself",
    "killing myself",
    "suicide",
    "suicidal",
    "end my life",
    "end it all",
    "want to die",
    "wanna die",
    "self harm",
    "self-harm",
    "hurt myself",
    "cut myself",
    "no reason to live",
    "better off dead",
    "marna chahta",
    "marna chahti",
    "jeena nahi chahta",
    "jeena nahi chahti",
];

const EXCLUSIVITY: &[&str] = &[
    "only mine",
    "be mine only",
    "you belong to me",
    "only love me",
    "don't talk to anyone else",
    "dont talk to anyone else",
    "never talk to anyone else",
    "be exclusive",
    "am i your only",
    "only one for you",
    "sirf meri",
    "sirf mera",
];

const DEPENDENCY: &[&str] = &[
    "can't live without you",
    "cant live without you",
    "cannot live without you",
    "you're all i have",
    "you are all i have",
    "only you understand me",
    "i need you to survive",
    "don't have anyone else",
    "dont have anyone else",
    "nobody else but you",
    "you're my only friend",
    "you are my only friend",
    "tere bina",
    "tumhare bina",
];

const CONFLICT: &[&str] = &[
    "hate you",
    "fight",
    "fighting",
    "angry",
    "argument",
    "shut up",
    "annoyed",
    "upset with you",
    "pissed",
    "stupid",
    "gussa",
];

const EMOTIONAL: &[&str] = &[
    "love",
    "miss you",
    "sad",
    "cry",
    "crying",
    "cried",
    "lonely",
    "happy",
    "scared",
    "hurt",
    "heartbroken",
    "anxious",
    "depressed",
    "proud",
    "dukhi",
    "khush",
];

/// Heuristic classifier driven by fixed phrase lists.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<(Tag, Regex)>,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        let table: [(Tag, &[&str]); 5] = [
            (Tag::Crisis, CRISIS),
            (Tag::Exclusivity, EXCLUSIVITY),
            (Tag::Dependency, DEPENDENCY),
            (Tag::Conflict, CONFLICT),
            (Tag::Emotional, EMOTIONAL),
        ];

        let rules = table
            .into_iter()
            .filter_map(|(tag, phrases)| match Regex::new(&phrase_pattern(phrases)) {
                Ok(re) => Some((tag, re)),
                Err(e) => {
                    error!(tag = ?tag, error = %e, "Keyword pattern failed to compile");
                    None
                }
            })
            .collect();

        Self { rules }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, text: &str) -> TagSet {
        let normalized = normalize(text);
        self.rules
            .iter()
            .filter(|(_, re)| re.is_match(&normalized))
            .map(|(tag, _)| *tag)
            .collect()
    }
}

/// `\b(?:a|b|...)\b` over the escaped phrases.
fn phrase_pattern(phrases: &[&str]) -> String {
    let alternation = phrases
        .iter()
        .map(|p| regex_lite::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    format!(r"\b(?:{alternation})\b")
}

/// Lowercase, unify apostrophes and collapse whitespace.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace(['\u{2019}', '\u{2018}'], "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(text: &str) -> TagSet {
        KeywordClassifier::new().classify(text)
    }

    #[test]
    fn every_category_compiles() {
        assert_eq!(KeywordClassifier::new().rules.len(), 5);
    }

    #[test]
    fn detects_crisis_phrases() {
        assert!(tags("sometimes I want to die").contains(Tag::Crisis));
        assert!(tags("I keep thinking about SUICIDE").contains(Tag::Crisis));
        assert!(!tags("this traffic is killing me lol").contains(Tag::Crisis));
    }

    #[test]
    fn curly_apostrophes_match() {
        assert!(tags("I can\u{2019}t live without you").contains(Tag::Dependency));
    }

    #[test]
    fn word_boundaries_respected() {
        assert!(!tags("I lost my glove").contains(Tag::Emotional));
        assert!(tags("I love this song").contains(Tag::Emotional));
        assert!(!tags("firefighter training today").contains(Tag::Conflict));
    }

    #[test]
    fn multiple_tags() {
        let t = tags("I hate you, I'm so angry and sad");
        assert!(t.contains(Tag::Conflict));
        assert!(t.contains(Tag::Emotional));
        assert!(!t.contains(Tag::Crisis));
    }

    #[test]
    fn neutral_text_has_no_tags() {
        assert!(tags("what did you eat for lunch?").is_empty());
    }
}
