//! Text classification capability.
//!
//! Safety screening and memory filtering both ask the same question: "what
//! kind of message is this?". They ask it through [`Classifier`] so a keyword
//! heuristic can later be replaced by a model without touching callers.

use serde::{Deserialize, Serialize};

/// A label a classifier can attach to a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    /// Self-harm or suicidal ideation
    Crisis,
    /// Demands for an exclusive romantic bond
    Exclusivity,
    /// Signs of unhealthy emotional reliance
    Dependency,
    /// Arguments, fights, hostility
    Conflict,
    /// Emotionally significant moments
    Emotional,
}

/// The set of tags assigned to one text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(std::collections::BTreeSet<Tag>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: Tag) {
        self.0.insert(tag);
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.0.contains(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Tag> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Assigns tags to free text.
pub trait Classifier: Send + Sync {
    fn classify(&self, text: &str) -> TagSet;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_set_collects_and_dedups() {
        let tags: TagSet = [Tag::Conflict, Tag::Emotional, Tag::Conflict]
            .into_iter()
            .collect();
        assert!(tags.contains(Tag::Conflict));
        assert!(!tags.contains(Tag::Crisis));
        assert_eq!(tags.iter().count(), 2);
    }
}
