//! Name-to-adapter lookup, built once at startup and shared read-only.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    CredentialPool, GeminiAdapter, OpenAiAdapter, OpenAiCompatBackend, ProviderAdapter,
    ProviderKind,
};
use crate::config::{Config, ConfigError, ProviderConfig};
use crate::error::{Error, Result};

/// Registered provider adapters keyed by name.
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Build a registry from ready adapters. A later adapter with the same
    /// name replaces an earlier one.
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.name().to_string(), adapter))
            .collect();
        Self { adapters }
    }

    /// Build adapters for every configured provider.
    ///
    /// A provider without credentials is logged and left out; the rest of
    /// the gateway still starts.
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        let header_timeout = config.gateway.inactivity_timeout();
        let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();

        for provider in &config.providers {
            match build_adapter(provider, client.clone(), header_timeout) {
                Ok(adapter) => {
                    tracing::info!(
                        provider = %provider.name,
                        kind = %adapter.kind(),
                        credentials = provider.api_keys.len(),
                        "Registered provider"
                    );
                    adapters.push(adapter);
                }
                Err(e) => {
                    tracing::error!(provider = %provider.name, error = %e, "Provider disabled");
                }
            }
        }

        Self::new(adapters)
    }

    /// Look up an adapter by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))
    }

    /// All registered adapters, sorted by name.
    pub fn list(&self) -> Vec<Arc<dyn ProviderAdapter>> {
        let mut adapters: Vec<_> = self.adapters.values().cloned().collect();
        adapters.sort_by(|a, b| a.name().cmp(b.name()));
        adapters
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Construct the adapter for one provider entry.
pub fn build_adapter(
    provider: &ProviderConfig,
    client: reqwest::Client,
    header_timeout: std::time::Duration,
) -> std::result::Result<Arc<dyn ProviderAdapter>, ConfigError> {
    let kind = provider.resolved_kind().ok_or_else(|| {
        ConfigError::Validation(format!(
            "Provider '{}' has no kind and its name is not a known backend",
            provider.name
        ))
    })?;
    let endpoint = provider
        .endpoint()
        .unwrap_or_else(|| kind.default_base_url().to_string());

    let pool = CredentialPool::new(provider.name.clone(), provider.api_keys.clone())?;
    let backend = OpenAiCompatBackend::new(
        provider.name.clone(),
        endpoint,
        client,
        pool,
        header_timeout,
    );

    let adapter: Arc<dyn ProviderAdapter> = match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiAdapter::new(backend)),
        ProviderKind::Gemini => Arc::new(GeminiAdapter::new(backend)),
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml: &str) -> Config {
        Config::parse_str(toml).unwrap()
    }

    #[test]
    fn builds_adapters_from_config() {
        let config = config(
            r#"
            [[providers]]
            name = "openai"
            api_keys = ["sk-1", "sk-2"]

            [[providers]]
            name = "gemini-eu"
            kind = "gemini"
            base_url = "http://localhost:9999/v1"
            api_keys = ["g-1"]
        "#,
        );

        let registry = ProviderRegistry::from_config(&config, reqwest::Client::new());
        assert_eq!(registry.len(), 2);

        let openai = registry.get("openai").unwrap();
        assert_eq!(openai.kind(), ProviderKind::OpenAi);
        assert_eq!(openai.credential_status().len(), 2);

        let gemini = registry.get("gemini-eu").unwrap();
        assert_eq!(gemini.kind(), ProviderKind::Gemini);
        assert_eq!(gemini.name(), "gemini-eu");
    }

    #[test]
    fn provider_without_keys_is_skipped() {
        let config = config(
            r#"
            [[providers]]
            name = "openai"

            [[providers]]
            name = "gemini"
            api_keys = ["g-1"]
        "#,
        );

        let registry = ProviderRegistry::from_config(&config, reqwest::Client::new());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("openai").is_err());
        assert!(registry.get("gemini").is_ok());
    }

    #[test]
    fn unknown_provider_lookup() {
        let registry = ProviderRegistry::new(Vec::new());
        assert!(registry.is_empty());
        match registry.get("mistral") {
            Err(Error::UnknownProvider(name)) => assert_eq!(name, "mistral"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected lookup to fail"),
        }
    }

    #[test]
    fn list_is_sorted_by_name() {
        let config = config(
            r#"
            [[providers]]
            name = "openai"
            api_keys = ["sk-1"]

            [[providers]]
            name = "gemini"
            api_keys = ["g-1"]
        "#,
        );

        let registry = ProviderRegistry::from_config(&config, reqwest::Client::new());
        let names: Vec<String> = registry.list().iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, vec!["gemini", "openai"]);
    }
}
