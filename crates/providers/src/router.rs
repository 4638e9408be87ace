//! Provider router: selects the provider a request names.
//!
//! Handles provider creation from config and resolution of the model to use
//! when a request does not name one.

use std::collections::HashMap;
use std::sync::Arc;

use repolens_core::error::ProviderError;
use repolens_core::provider::Provider;

use crate::openai_compat::OpenAiCompatProvider;

struct RoutedProvider {
    provider: Arc<dyn Provider>,
    default_model: Option<String>,
}

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, RoutedProvider>,
    default_provider: String,
    default_model: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider and model.
    pub fn new(default_provider: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
            default_model: default_model.into(),
        }
    }

    /// Register a provider under a name.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(
            name.into(),
            RoutedProvider {
                provider,
                default_model: None,
            },
        );
    }

    /// Register a provider together with its preferred model.
    pub fn register_with_model(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) {
        self.providers.insert(
            name.into(),
            RoutedProvider {
                provider,
                default_model: Some(model.into()),
            },
        );
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).map(|r| r.provider.clone())
    }

    /// Name of the provider used when a request names none.
    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Resolve `(provider name, provider, model)` for a request.
    ///
    /// An unknown provider name is a non-transient configuration error.
    pub fn resolve(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<(String, Arc<dyn Provider>, String), ProviderError> {
        let name = provider.unwrap_or(&self.default_provider);
        let routed = self.providers.get(name).ok_or_else(|| {
            ProviderError::NotConfigured(format!("no provider registered under '{name}'"))
        })?;
        let model = model
            .map(str::to_string)
            .or_else(|| routed.default_model.clone())
            .unwrap_or_else(|| self.default_model.clone());
        Ok((name.to_string(), routed.provider.clone(), model))
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &repolens_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider, &config.default_model);

    for (name, provider_config) in &config.providers {
        let api_key = config.api_key_for(name).unwrap_or_default();
        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));
        let provider = Arc::new(OpenAiCompatProvider::new(name, &base_url, &api_key));
        router.register_with_model(name.clone(), provider, config.model_for(name));
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        let base_url = default_base_url(&config.default_provider);
        let provider = Arc::new(OpenAiCompatProvider::new(
            &config.default_provider,
            &base_url,
            &api_key,
        ));
        router.register(config.default_provider.clone(), provider);
    }

    router
}

/// Get the default base URL for well-known OpenAI-compatible providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_register_and_lookup() {
        let mut router = ProviderRouter::new("openai", "gpt-4o-mini");
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("sk-test")));

        assert!(router.get("openai").is_some());
        assert!(router.get("nonexistent").is_none());
        assert_eq!(router.list(), vec!["openai"]);
    }

    #[test]
    fn resolve_falls_back_to_defaults() {
        let mut router = ProviderRouter::new("openai", "gpt-4o-mini");
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("sk-test")));
        router.register_with_model(
            "openrouter",
            Arc::new(OpenAiCompatProvider::openrouter("sk-or")),
            "anthropic/claude-sonnet-4",
        );

        let (name, _, model) = router.resolve(None, None).unwrap();
        assert_eq!(name, "openai");
        assert_eq!(model, "gpt-4o-mini");

        let (name, _, model) = router.resolve(Some("openrouter"), None).unwrap();
        assert_eq!(name, "openrouter");
        assert_eq!(model, "anthropic/claude-sonnet-4");

        let (_, _, model) = router.resolve(Some("openrouter"), Some("gpt-4o")).unwrap();
        assert_eq!(model, "gpt-4o");
    }

    #[test]
    fn resolve_unknown_provider_is_not_transient() {
        let router = ProviderRouter::new("openai", "gpt-4o-mini");
        let err = router.resolve(Some("mystery"), None).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config() {
        let config = repolens_config::AppConfig::default();
        let router = build_from_config(&config);
        assert!(router.get("openai").is_some());
        assert_eq!(router.default_provider(), "openai");
    }
}
