//! Persona handling for Kindred.
//!
//! - [`registry`]: the catalog of named profiles, built once at startup
//! - [`resolver`]: pure functions turning trait scalars into prompt text
//! - [`style`]: optional post-processing of a finished reply
//!
//! # Catalog format
//!
//! ```toml
//! [[personas]]
//! id = "meera"
//! name = "Meera"
//! response_rules = ["Call them by name now and then"]
//!
//! [personas.metrics]
//! warmth = 0.9
//! flirtiness = 0.1
//! playfulness = 0.6
//! emotional_depth = 0.8
//! attachment = 0.3
//! assertiveness = 0.4
//! humor = 0.5
//! ```

pub mod registry;
pub mod resolver;
pub mod style;

pub use registry::{PersonaCatalog, PersonaRegistry};
pub use resolver::{generate_persona_modifiers, resolve_metrics_to_constraints};
pub use style::shape_response;

/// Persona catalog errors.
#[derive(Debug, thiserror::Error)]
pub enum PersonaError {
    #[error("Failed to read persona catalog {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid persona catalog: {0}")]
    Invalid(String),
}
