//! `kindred persona`: Inspect the persona catalog.

use kindred_config::AppConfig;
use kindred_persona::{
    PersonaRegistry, generate_persona_modifiers, resolve_metrics_to_constraints, shape_response,
};

fn registry(config: &AppConfig) -> Result<PersonaRegistry, Box<dyn std::error::Error>> {
    Ok(PersonaRegistry::load(
        config.persona.catalog_path.as_deref(),
        &config.persona.default_persona,
    )?)
}

pub fn list(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = registry(config)?;
    let default_id = registry.default_persona().id.clone();

    println!("🎭 Personas ({})", registry.len());
    for persona in registry.list() {
        let marker = if persona.id == default_id { " (default)" } else { "" };
        println!("   {:<12} {}{marker}", persona.id, persona.name);
    }

    Ok(())
}

pub fn show(config: &AppConfig, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let registry = registry(config)?;
    let persona = registry
        .get(id)
        .ok_or_else(|| format!("Unknown persona '{id}'"))?;

    println!("{}", toml::to_string_pretty(persona.as_ref())?);
    println!("# Resolved constraints");
    println!("{}", resolve_metrics_to_constraints(&persona));

    let modifiers = generate_persona_modifiers(&persona);
    if !modifiers.is_empty() {
        println!();
        println!("# Response rules");
        println!("{modifiers}");
    }

    Ok(())
}

pub fn shape(config: &AppConfig, id: &str, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let registry = registry(config)?;
    let persona = registry
        .get(id)
        .ok_or_else(|| format!("Unknown persona '{id}'"))?;

    println!("{}", shape_response(text, &persona.language_style));
    Ok(())
}
