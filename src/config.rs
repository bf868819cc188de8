//! Configuration parsing and validation for chatgate.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::providers::ProviderKind;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Stream timing and admission settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Seconds between synthetic heartbeat frames.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Seconds without an upstream chunk before the stream is cut off.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    /// TCP connect timeout for provider requests.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Upper bound on concurrently served requests.
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: usize,
}

fn default_heartbeat_interval() -> u64 {
    8
}

fn default_inactivity_timeout() -> u64 {
    120
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_concurrent_streams() -> usize {
    256
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_concurrent_streams: default_max_concurrent_streams(),
        }
    }
}

impl GatewayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// The inner `SecretString` ensures the key value is:
/// - Zeroized in memory when dropped
/// - Never exposed via Debug or Display
/// - Only accessible via `.expose_secret()` (grep-auditable)
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl PartialEq for ApiKey {
    fn eq(&self, other: &Self) -> bool {
        self.expose_secret() == other.expose_secret()
    }
}

impl Eq for ApiKey {}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How a provider's API keys were resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Keys were literal strings in config (no ${} references)
    Literal,
    /// At least one key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Keys were auto-discovered from numbered convention env vars (holds var names)
    Convention(Vec<String>),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(vars) => write!(f, "convention ({})", vars.join(", ")),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Identifier clients use in the `provider` request field
    pub name: String,
    /// Backend family; defaults to the provider name when it names a family
    pub kind: Option<ProviderKind>,
    /// Override for the family's fixed endpoint (proxies, test doubles)
    pub base_url: Option<String>,
    /// Credentials rotated by this provider's pool
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

impl ProviderConfig {
    /// Resolve the backend family, falling back to the provider name.
    pub fn resolved_kind(&self) -> Option<ProviderKind> {
        self.kind.or_else(|| self.name.parse().ok())
    }

    /// Endpoint requests are sent to.
    pub fn endpoint(&self) -> Option<String> {
        match &self.base_url {
            Some(url) => Some(url.trim_end_matches('/').to_string()),
            None => self
                .resolved_kind()
                .map(|kind| kind.default_base_url().to_string()),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Keys are taken verbatim; use [`Config::from_file_with_env`] to expand
    /// `${VAR}` references and discover convention env vars.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = read_config_file(path.as_ref())?;
        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            tracing::warn!("No providers configured - gateway will reject all chat requests");
        }

        let gateway = &self.gateway;
        if gateway.heartbeat_interval_secs == 0 || gateway.inactivity_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "heartbeat_interval_secs and inactivity_timeout_secs must be positive".to_string(),
            ));
        }
        if gateway.heartbeat_interval_secs >= gateway.inactivity_timeout_secs {
            return Err(ConfigError::Validation(format!(
                "heartbeat_interval_secs ({}) must be shorter than inactivity_timeout_secs ({})",
                gateway.heartbeat_interval_secs, gateway.inactivity_timeout_secs
            )));
        }
        if gateway.max_concurrent_streams == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent_streams must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Provider with empty name".to_string(),
                ));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' is configured more than once",
                    provider.name
                )));
            }
            if provider.resolved_kind().is_none() {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has no kind and its name is not a known provider kind",
                    provider.name
                )));
            }
            if matches!(&provider.base_url, Some(url) if url.is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has empty base_url",
                    provider.name
                )));
            }
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },

    #[error("No credentials configured for provider '{provider}'")]
    NoCredentials { provider: String },
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Raw provider config deserialized directly from TOML.
/// api_keys are plain strings so they may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawProviderConfig {
    name: String,
    kind: Option<ProviderKind>,
    base_url: Option<String>,
    #[serde(default)]
    api_keys: Vec<String>,
}

/// Raw configuration deserialized directly from TOML.
/// Provider api_keys values may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    gateway: GatewayConfig,
    #[serde(default)]
    providers: Vec<RawProviderConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${PREFIX}-${SUFFIX}`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(
    input: &str,
    provider_name: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            provider: provider_name.to_string(),
            message: "Unclosed '${' in api key reference".to_string(),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            provider: provider_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in provider '{}')",
                var_name, provider_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Expand all `${VAR}` references in a string using real environment variables.
fn expand_env_vars(input: &str, provider_name: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, provider_name, |name| std::env::var(name).ok())
}

/// Derive the convention-based env var prefix for a provider.
///
/// Transforms provider name to `CHATGATE_<UPPER_SNAKE_NAME>_API_KEY`:
/// - "gemini" -> "CHATGATE_GEMINI_API_KEY"
/// - "openai-eu" -> "CHATGATE_OPENAI_EU_API_KEY"
pub fn convention_env_var_name(provider_name: &str) -> String {
    let upper_snake = provider_name.to_uppercase().replace(['-', ' '], "_");
    format!("CHATGATE_{}_API_KEY", upper_snake)
}

/// Collect the numbered convention keys for a provider from `vars`.
///
/// Accepts the bare `CHATGATE_<NAME>_API_KEY` plus any `_<n>` suffixed
/// variant. Results are ordered bare first, then by numeric suffix, so
/// rotation order is stable across restarts. Empty values are skipped.
fn convention_keys_from<I>(provider_name: &str, vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let base = convention_env_var_name(provider_name);
    let mut found: Vec<(u64, String, String)> = vars
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .filter_map(|(name, value)| {
            if name == base {
                return Some((0, name, value));
            }
            let suffix = name.strip_prefix(&base)?.strip_prefix('_')?;
            let index: u64 = suffix.parse().ok()?;
            Some((index.saturating_add(1), name, value))
        })
        .collect();

    found.sort_by_key(|(order, _, _)| *order);
    found
        .into_iter()
        .map(|(_, name, value)| (name, value))
        .collect()
}

/// Drop repeated keys, keeping the first occurrence.
fn dedup_keys(keys: Vec<ApiKey>) -> Vec<ApiKey> {
    let mut unique: Vec<ApiKey> = Vec::with_capacity(keys.len());
    for key in keys {
        if !unique.contains(&key) {
            unique.push(key);
        }
    }
    unique
}

impl Config {
    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// For each provider:
    /// - If any configured key contains `${VAR}`: expand from environment, source = `EnvExpanded`
    /// - If all configured keys are literal: wrap directly, source = `Literal`
    /// - If no keys are configured: collect `CHATGATE_<NAME>_API_KEY[_<n>]`,
    ///   source = `Convention(var_names)` or `KeySource::None`
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        Self::from_raw_with_env(raw, std::env::vars())
    }

    fn from_raw_with_env<I>(
        raw: RawConfig,
        env: I,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: Vec<(String, String)> = env.into_iter().collect();
        let mut providers = Vec::with_capacity(raw.providers.len());
        let mut key_sources = Vec::with_capacity(raw.providers.len());

        for rp in raw.providers {
            let (api_keys, source) = if rp.api_keys.is_empty() {
                let found = convention_keys_from(&rp.name, env.iter().cloned());
                if found.is_empty() {
                    (Vec::new(), KeySource::None)
                } else {
                    let vars = found.iter().map(|(name, _)| name.clone()).collect();
                    let keys = found.into_iter().map(|(_, v)| ApiKey::from(v)).collect();
                    (keys, KeySource::Convention(vars))
                }
            } else {
                let expanded = rp.api_keys.iter().any(|k| k.contains("${"));
                let mut keys = Vec::with_capacity(rp.api_keys.len());
                for raw_key in &rp.api_keys {
                    keys.push(ApiKey::from(expand_env_vars(raw_key, &rp.name)?));
                }
                let source = if expanded {
                    KeySource::EnvExpanded
                } else {
                    KeySource::Literal
                };
                (keys, source)
            };

            let before = api_keys.len();
            let api_keys = dedup_keys(api_keys);
            if api_keys.len() < before {
                tracing::warn!(
                    provider = %rp.name,
                    duplicates = before - api_keys.len(),
                    "Duplicate API keys collapsed"
                );
            }

            key_sources.push((rp.name.clone(), source));

            providers.push(ProviderConfig {
                name: rp.name,
                kind: rp.kind,
                base_url: rp.base_url,
                api_keys,
            });
        }

        let config = Config {
            server: raw.server,
            gateway: raw.gateway,
            providers,
            logging: raw.logging,
        };

        Ok((config, key_sources))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// This is the env-var-aware entry point. It:
    /// 1. Reads the file
    /// 2. Parses as `RawConfig` (api_keys as plain Strings)
    /// 3. Expands `${VAR}` references and applies convention lookup
    /// 4. Validates the resulting config
    ///
    /// Returns the config and per-provider key source information.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = read_config_file(path.as_ref())?;

        let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        let (config, key_sources) = Self::from_raw(raw)?;
        config.validate()?;

        Ok((config, key_sources))
    }
}
