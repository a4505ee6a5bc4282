//! Provider router: selects the correct LLM provider based on config.
//!
//! Handles provider creation, caching, and routing requests to the right backend.

use crate::openai_compat::OpenAiCompatProvider;
use async_trait::async_trait;
use kindred_core::error::ProviderError;
use kindred_core::provider::{Provider, ProviderRequest, ProviderResponse};
use std::collections::HashMap;
use std::sync::Arc;

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// The default provider, or one that always reports `NotConfigured`.
    ///
    /// The chat pipeline always needs a provider; a missing one simply routes
    /// every turn to the fallback lines.
    pub fn default_or_unconfigured(&self) -> Arc<dyn Provider> {
        self.default()
            .unwrap_or_else(|| Arc::new(UnconfiguredProvider::new(&self.default_provider)))
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// Providers that need an API key are only registered when one is available.
pub fn build_from_config(config: &kindred_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone());

        let Some(api_key) = api_key.or_else(|| keyless(name).then(String::new)) else {
            tracing::warn!(provider = %name, "No API key for provider, skipping");
            continue;
        };

        let Some(base_url) = provider_config
            .api_url
            .clone()
            .or_else(|| default_base_url(name))
        else {
            tracing::warn!(provider = %name, "No api_url for unknown provider, skipping");
            continue;
        };

        router.register(
            name.clone(),
            Arc::new(OpenAiCompatProvider::new(name, &base_url, &api_key)),
        );
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let name = &config.default_provider;
        let api_key = config
            .api_key
            .clone()
            .or_else(|| keyless(name).then(String::new));

        if let (Some(api_key), Some(base_url)) = (api_key, default_base_url(name)) {
            router.register(
                name.clone(),
                Arc::new(OpenAiCompatProvider::new(name, &base_url, &api_key)),
            );
        }
    }

    router
}

/// Local servers that accept any (or no) key.
fn keyless(provider_name: &str) -> bool {
    matches!(provider_name, "ollama" | "vllm" | "llamacpp" | "llama.cpp")
}

/// The base URL for well-known providers. Anything else needs `api_url`.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url.to_string())
}

/// Stand-in used when no provider could be built from configuration.
pub struct UnconfiguredProvider {
    name: String,
}

impl UnconfiguredProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Provider for UnconfiguredProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        _request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "no API key configured for '{}'",
            self.name
        )))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(false)
    }
}
