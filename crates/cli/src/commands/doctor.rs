//! `kindred doctor`: Diagnose system health.

use kindred_config::AppConfig;
use kindred_core::message::ChatTurn;
use kindred_core::provider::{Provider, ProviderRequest};
use kindred_persona::PersonaRegistry;
use std::time::Duration;

pub async fn run(config: Result<AppConfig, Box<dyn std::error::Error>>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Kindred Doctor: System Diagnostics");
    println!("======================================\n");

    let mut issues = 0;

    let config = match config {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ {e}");
            println!("\n  ⚠️  Fix the configuration before running other checks.");
            return Ok(());
        }
    };

    // Personas
    match PersonaRegistry::load(
        config.persona.catalog_path.as_deref(),
        &config.persona.default_persona,
    ) {
        Ok(registry) => println!("  ✅ {} personas loaded", registry.len()),
        Err(e) => {
            println!("  ❌ Persona catalog: {e}");
            issues += 1;
        }
    }

    // Storage
    match kindred_store::open(&config.storage).await {
        Ok(store) => println!("  ✅ Storage ready ({})", store.name()),
        Err(e) => {
            println!("  ❌ Storage: {e}");
            issues += 1;
        }
    }

    // Provider
    let providers = kindred_providers::build_from_config(&config);
    match providers.default() {
        Some(provider) => match provider.health_check().await {
            Ok(true) => {
                println!("  ✅ Provider '{}' reachable", provider.name());
                if !check_model(provider.as_ref(), &config).await {
                    issues += 1;
                }
            }
            Ok(false) => {
                println!("  ⚠️  Provider '{}' responded but is not healthy", provider.name());
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Provider '{}': {e}", provider.name());
                issues += 1;
            }
        },
        None => {
            println!(
                "  ⚠️  No API key for '{}': set KINDRED_API_KEY or add api_key to config.toml",
                config.default_provider
            );
            issues += 1;
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

/// One tiny completion, so a wrong model name shows up here instead of as
/// fallback lines in production.
async fn check_model(provider: &dyn Provider, config: &AppConfig) -> bool {
    let request = ProviderRequest {
        model: config.default_model.clone(),
        messages: vec![ChatTurn::user("Reply with the single word: ready")],
        temperature: 0.0,
        max_tokens: Some(5),
        stream: false,
    };
    let limit = Duration::from_secs(config.retry.attempt_timeout_secs);

    match tokio::time::timeout(limit, provider.complete(request)).await {
        Ok(Ok(response)) if !response.content.trim().is_empty() => {
            println!("  ✅ Model '{}' answered", config.default_model);
            true
        }
        Ok(Ok(_)) => {
            println!("  ⚠️  Model '{}' returned an empty reply", config.default_model);
            false
        }
        Ok(Err(e)) => {
            println!("  ❌ Model '{}': {e}", config.default_model);
            false
        }
        Err(_) => {
            println!(
                "  ❌ Model '{}' did not answer within {}s",
                config.default_model, config.retry.attempt_timeout_secs
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kindred_core::error::ProviderError;
    use kindred_core::provider::ProviderResponse;

    struct Canned(Result<&'static str, ProviderError>);

    #[async_trait]
    impl Provider for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.0.clone().map(|text| ProviderResponse {
                content: text.to_string(),
                usage: None,
                model: request.model,
            })
        }
    }

    #[tokio::test]
    async fn model_check_passes_on_a_reply() {
        let config = AppConfig::default();
        assert!(check_model(&Canned(Ok("ready")), &config).await);
    }

    #[tokio::test]
    async fn model_check_fails_on_error_or_silence() {
        let config = AppConfig::default();
        let failing = Canned(Err(ProviderError::ApiError {
            status_code: 404,
            message: "model not found".into(),
        }));
        assert!(!check_model(&failing, &config).await);
        assert!(!check_model(&Canned(Ok("  ")), &config).await);
    }
}
