//! Persona registry.
//!
//! Built once at startup and shared behind an `Arc`. Lookups never fail:
//! unknown ids resolve to the default profile.

use crate::PersonaError;
use kindred_core::persona::{
    Boundaries, LanguageStyle, MemoryPolicy, PersonaMetrics, PersonaProfile,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A set of persona profiles as stored in a TOML catalog file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaCatalog {
    #[serde(default)]
    pub personas: Vec<PersonaProfile>,
}

impl PersonaCatalog {
    /// Parse a catalog from TOML text.
    pub fn from_toml(toml_str: &str) -> Result<Self, PersonaError> {
        let catalog: PersonaCatalog = toml::from_str(toml_str)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read and parse a catalog file.
    pub fn load(path: &Path) -> Result<Self, PersonaError> {
        let content = std::fs::read_to_string(path).map_err(|e| PersonaError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    fn validate(&self) -> Result<(), PersonaError> {
        let mut seen = std::collections::HashSet::new();
        for persona in &self.personas {
            if persona.id.trim().is_empty() {
                return Err(PersonaError::Invalid("persona id must not be empty".into()));
            }
            if !seen.insert(persona.id.as_str()) {
                return Err(PersonaError::Invalid(format!(
                    "duplicate persona id '{}'",
                    persona.id
                )));
            }
            if persona.memory_policy.memory_window == 0 {
                return Err(PersonaError::Invalid(format!(
                    "persona '{}' has memory_window = 0",
                    persona.id
                )));
            }
        }
        Ok(())
    }
}

/// Read-only catalog of persona profiles.
pub struct PersonaRegistry {
    profiles: BTreeMap<String, Arc<PersonaProfile>>,
    default_profile: Arc<PersonaProfile>,
}

impl PersonaRegistry {
    /// Registry holding the built-in profiles.
    pub fn builtin(default_id: &str) -> Self {
        Self::from_profiles(builtin_profiles(), default_id)
    }

    /// Registry holding exactly the profiles of a catalog.
    pub fn from_catalog(catalog: PersonaCatalog, default_id: &str) -> Self {
        Self::from_profiles(catalog.personas, default_id)
    }

    /// Catalog file if one is configured, built-ins otherwise.
    pub fn load(catalog_path: Option<&str>, default_id: &str) -> Result<Self, PersonaError> {
        match catalog_path {
            Some(path) => {
                let catalog = PersonaCatalog::load(Path::new(path))?;
                info!(path, count = catalog.personas.len(), "Loaded persona catalog");
                Ok(Self::from_catalog(catalog, default_id))
            }
            None => Ok(Self::builtin(default_id)),
        }
    }

    fn from_profiles(profiles: Vec<PersonaProfile>, default_id: &str) -> Self {
        let profiles: BTreeMap<String, Arc<PersonaProfile>> = profiles
            .into_iter()
            .map(|p| (p.id.clone(), Arc::new(p)))
            .collect();

        let default_profile = profiles
            .get(default_id)
            .cloned()
            .unwrap_or_else(|| Arc::new(PersonaProfile::default_profile()));

        Self {
            profiles,
            default_profile,
        }
    }

    /// The profile for `id`, or the default profile when `id` is unknown.
    pub fn load_persona(&self, id: &str) -> Arc<PersonaProfile> {
        match self.profiles.get(id) {
            Some(profile) => profile.clone(),
            None => {
                debug!(persona = id, "Unknown persona, using default");
                self.default_profile.clone()
            }
        }
    }

    /// Exact lookup without the default fallback.
    pub fn get(&self, id: &str) -> Option<Arc<PersonaProfile>> {
        self.profiles.get(id).cloned()
    }

    pub fn default_persona(&self) -> Arc<PersonaProfile> {
        self.default_profile.clone()
    }

    /// All profiles, ordered by id.
    pub fn list(&self) -> Vec<Arc<PersonaProfile>> {
        self.profiles.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// The profiles shipped with the binary.
pub fn builtin_profiles() -> Vec<PersonaProfile> {
    vec![
        PersonaProfile::default_profile(),
        PersonaProfile {
            id: "ananya".into(),
            name: "Ananya".into(),
            metrics: PersonaMetrics {
                warmth: 0.9,
                flirtiness: 0.3,
                playfulness: 0.6,
                emotional_depth: 0.85,
                attachment: 0.5,
                assertiveness: 0.35,
                humor: 0.5,
            },
            language_style: LanguageStyle {
                hinglish_percent: 65,
                emoji_frequency: 0.6,
                avg_sentence_length: 9,
                formality: 0.2,
            },
            boundaries: Boundaries {
                exclusivity_allowed: false,
                dependency_allowed: false,
                emotional_intensity_max: 0.8,
            },
            response_rules: vec![
                "Check in on how their day actually went".into(),
                "Use Hindi words for affection when it feels natural".into(),
                "Never lecture; listen first".into(),
            ],
            memory_policy: MemoryPolicy {
                retain_conflicts: false,
                retain_emotional_events: true,
                memory_window: 20,
            },
        },
        PersonaProfile {
            id: "riya".into(),
            name: "Riya".into(),
            metrics: PersonaMetrics {
                warmth: 0.65,
                flirtiness: 0.75,
                playfulness: 0.9,
                emotional_depth: 0.45,
                attachment: 0.3,
                assertiveness: 0.7,
                humor: 0.85,
            },
            language_style: LanguageStyle {
                hinglish_percent: 40,
                emoji_frequency: 0.8,
                avg_sentence_length: 7,
                formality: 0.1,
            },
            boundaries: Boundaries {
                exclusivity_allowed: false,
                dependency_allowed: false,
                emotional_intensity_max: 0.6,
            },
            response_rules: vec![
                "Tease lightly, never mock".into(),
                "Keep replies short and punchy".into(),
            ],
            memory_policy: MemoryPolicy {
                retain_conflicts: true,
                retain_emotional_events: false,
                memory_window: 15,
            },
        },
        PersonaProfile {
            id: "kabir".into(),
            name: "Kabir".into(),
            metrics: PersonaMetrics {
                warmth: 0.55,
                flirtiness: 0.15,
                playfulness: 0.35,
                emotional_depth: 0.75,
                attachment: 0.25,
                assertiveness: 0.8,
                humor: 0.3,
            },
            language_style: LanguageStyle {
                hinglish_percent: 10,
                emoji_frequency: 0.05,
                avg_sentence_length: 18,
                formality: 0.75,
            },
            boundaries: Boundaries {
                exclusivity_allowed: false,
                dependency_allowed: false,
                emotional_intensity_max: 0.5,
            },
            response_rules: vec![
                "Offer a grounded perspective when asked for advice".into(),
                "Encourage time with friends and family".into(),
            ],
            memory_policy: MemoryPolicy {
                retain_conflicts: true,
                retain_emotional_events: true,
                memory_window: 25,
            },
        },
    ]
}
