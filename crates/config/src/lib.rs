//! Configuration loading, validation, and management for Kindred.
//!
//! Loads configuration from `~/.kindred/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.kindred/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Persistence backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Free-tier limits
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Session lifecycle
    #[serde(default)]
    pub session: SessionConfig,

    /// Context building sizes
    #[serde(default)]
    pub context: ContextConfig,

    /// LLM retry and fallback pacing
    #[serde(default)]
    pub retry: RetryConfig,

    /// Persona catalog and prompt settings
    #[serde(default)]
    pub persona: PersonaConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_max_tokens() -> u32 {
    512
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("gateway", &self.gateway)
            .field("storage", &self.storage)
            .field("quota", &self.quota)
            .field("session", &self.session)
            .field("context", &self.context)
            .field("retry", &self.retry)
            .field("persona", &self.persona)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Origins allowed by CORS. Empty = same-origin only.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: vec![],
        }
    }
}

/// Which [`Storage`](https://docs.rs/kindred-core) implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Sqlite,
    Memory,
    None,
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            "none" => Ok(Self::None),
            other => Err(ConfigError::ValidationError(format!(
                "unknown storage backend '{other}' (expected sqlite, memory or none)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// SQLite database path; relative paths resolve against the config dir.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Sqlite
}
fn default_storage_path() -> String {
    "kindred.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

impl StorageConfig {
    /// SQLite connection string for the configured path.
    pub fn sqlite_url(&self) -> String {
        if self.path.starts_with("sqlite:") {
            return self.path.clone();
        }
        let path = Path::new(&self.path);
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            AppConfig::config_dir().join(path)
        };
        format!("sqlite://{}", resolved.display())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Messages a non-premium user may send in total.
    #[serde(default = "default_free_message_limit")]
    pub free_message_limit: u64,
}

fn default_free_message_limit() -> u64 {
    20
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_message_limit: default_free_message_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity after which a session is closed and a new one started.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
}

fn default_timeout_minutes() -> u32 {
    15
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_timeout_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Recent messages fetched across all sessions.
    #[serde(default = "default_recent_message_limit")]
    pub recent_message_limit: usize,

    /// Past sessions summarized in the context.
    #[serde(default = "default_session_history_limit")]
    pub session_history_limit: usize,

    /// Messages quoted in the prose transcript.
    #[serde(default = "default_transcript_lines")]
    pub transcript_lines: usize,

    /// Messages mapped to role/content turns before memory adaptation.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

fn default_recent_message_limit() -> usize {
    30
}
fn default_session_history_limit() -> usize {
    5
}
fn default_transcript_lines() -> usize {
    15
}
fn default_history_turns() -> usize {
    30
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_message_limit: default_recent_message_limit(),
            session_history_limit: default_session_history_limit(),
            transcript_lines: default_transcript_lines(),
            history_turns: default_history_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before retry `n` is `n * backoff_step_ms`.
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    /// Upper bound for one attempt (connect + full stream).
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Pause between words when streaming a fallback line.
    #[serde(default = "default_fallback_word_delay_ms")]
    pub fallback_word_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_step_ms() -> u64 {
    1000
}
fn default_attempt_timeout_secs() -> u64 {
    60
}
fn default_fallback_word_delay_ms() -> u64 {
    50
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_step_ms: default_backoff_step_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            fallback_word_delay_ms: default_fallback_word_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Persona used when the user has not picked one.
    #[serde(default = "default_persona_id")]
    pub default_persona: String,

    /// Optional TOML catalog replacing the built-in personas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<String>,

    /// Override the base behavioral prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_prompt: Option<String>,
}

fn default_persona_id() -> String {
    "default".into()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            default_persona: default_persona_id(),
            catalog_path: None,
            base_prompt: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.kindred/config.toml).
    ///
    /// Also checks environment variables:
    /// - `KINDRED_API_KEY` (highest priority), `OPENROUTER_API_KEY`, `OPENAI_API_KEY`
    /// - `KINDRED_PROVIDER`, `KINDRED_MODEL`
    /// - `KINDRED_FREE_MESSAGE_LIMIT`, `KINDRED_STORAGE`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply the same environment overrides as [`Self::load`].
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            self.api_key = std::env::var("KINDRED_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("KINDRED_PROVIDER") {
            self.default_provider = provider;
        }

        if let Ok(model) = std::env::var("KINDRED_MODEL") {
            self.default_model = model;
        }

        if let Ok(limit) = std::env::var("KINDRED_FREE_MESSAGE_LIMIT") {
            self.quota.free_message_limit = limit.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "KINDRED_FREE_MESSAGE_LIMIT must be a number, got '{limit}'"
                ))
            })?;
        }

        if let Ok(backend) = std::env::var("KINDRED_STORAGE") {
            self.storage.backend = backend.parse()?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kindred")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.session.timeout_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "session.timeout_minutes must be > 0".into(),
            ));
        }

        if self.context.recent_message_limit == 0 {
            return Err(ConfigError::ValidationError(
                "context.recent_message_limit must be > 0".into(),
            ));
        }

        if self.retry.attempt_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "retry.attempt_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some() || self.providers.values().any(|p| p.api_key.is_some())
    }

    /// Render the configuration as TOML with secrets removed.
    pub fn redacted_toml(&self) -> String {
        let mut config = self.clone();
        config.api_key = config.api_key.map(|_| "[REDACTED]".into());
        for provider in config.providers.values_mut() {
            provider.api_key = provider.api_key.take().map(|_| "[REDACTED]".into());
        }
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            gateway: GatewayConfig::default(),
            storage: StorageConfig::default(),
            quota: QuotaConfig::default(),
            session: SessionConfig::default(),
            context: ContextConfig::default(),
            retry: RetryConfig::default(),
            persona: PersonaConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
