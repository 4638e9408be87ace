//! Configuration loading, validation, and management for RepoLens.
//!
//! Loads configuration from `~/.repolens/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.repolens/config.toml`.
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

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Query engine tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Response cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Provider retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Git hosting service used for repository documents
    #[serde(default)]
    pub git: GitConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_true() -> bool {
    true
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
            .field("providers", &self.providers)
            .field("engine", &self.engine)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("git", &self.git)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum provider round-trips spent on tool calls per request
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// Token budget for replayed conversation history
    #[serde(default = "default_history_token_budget")]
    pub history_token_budget: usize,

    /// Maximum characters of an injected repository document
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,

    /// Per provider call timeout
    #[serde(default = "default_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Maximum silence between two streamed chunks
    #[serde(default = "default_timeout_secs")]
    pub stream_idle_timeout_secs: u64,

    /// Per tool execution timeout
    #[serde(default = "default_timeout_secs")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_tokens: Option<u32>,
}

fn default_max_tool_iterations() -> u32 {
    5
}
fn default_history_token_budget() -> usize {
    4000
}
fn default_max_document_chars() -> usize {
    8000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            history_token_budget: default_history_token_budget(),
            max_document_chars: default_max_document_chars(),
            provider_timeout_secs: default_timeout_secs(),
            stream_idle_timeout_secs: default_timeout_secs(),
            tool_timeout_secs: default_timeout_secs(),
            default_temperature: default_temperature(),
            default_max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lifetime of a cached response
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// How often expired entries are swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per provider call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    8000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_git_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_git_ref")]
    pub default_ref: String,
}

fn default_git_api_url() -> String {
    "https://api.github.com".into()
}
fn default_git_ref() -> String {
    "main".into()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            api_url: default_git_api_url(),
            token: None,
            default_ref: default_git_ref(),
        }
    }
}

impl std::fmt::Debug for GitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitConfig")
            .field("api_url", &self.api_url)
            .field("token", &redact(&self.token))
            .field("default_ref", &self.default_ref)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.repolens/config.toml).
    ///
    /// Also checks environment variables:
    /// - `REPOLENS_API_KEY` (highest priority), `OPENAI_API_KEY`, `OPENROUTER_API_KEY`
    /// - `REPOLENS_PROVIDER`, `REPOLENS_MODEL`
    /// - `GITHUB_TOKEN`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
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

    /// Apply environment overrides through a lookup function.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("REPOLENS_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .or_else(|| lookup("OPENROUTER_API_KEY"));
        }
        if let Some(provider) = lookup("REPOLENS_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("REPOLENS_MODEL") {
            self.default_model = model;
        }
        if self.git.token.is_none() {
            self.git.token = lookup("GITHUB_TOKEN");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".repolens")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.engine.default_temperature) {
            return Err(ConfigError::ValidationError(
                "engine.default_temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.engine.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_tool_iterations must be at least 1".into(),
            ));
        }
        if self.engine.history_token_budget == 0 {
            return Err(ConfigError::ValidationError(
                "engine.history_token_budget must be > 0".into(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache.sweep_interval_secs must be > 0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the API key for a provider (provider-specific, then global).
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Resolve the model for a provider (provider default, then global default).
    pub fn model_for(&self, provider: &str) -> String {
        self.providers
            .get(provider)
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            providers: HashMap::new(),
            engine: EngineConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            git: GitConfig::default(),
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
