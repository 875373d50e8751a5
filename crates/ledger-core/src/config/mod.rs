use crate::error::{LedgerError, Result};
use crate::model::Currency;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub currency: CurrencyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom path for the SQLite database. Defaults to `~/.config/ledger/ledger.db`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub env_var: Option<String>,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
    /// Pull the Ollama model on startup when it is not installed yet.
    #[serde(default = "default_true")]
    pub auto_pull: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
            base_url: None,
            env_var: None,
            max_tokens: default_llm_max_tokens(),
            auto_pull: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default)]
    pub env_var: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_key: None,
            base_url: None,
            dimensions: None,
            env_var: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Number of historical expenses retrieved as context for a question.
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    #[serde(default = "default_fallback_category")]
    pub fallback_category: String,
    /// Replace categories the model invents with `fallback_category`.
    #[serde(default)]
    pub strict_categories: bool,
    #[serde(default = "default_true")]
    pub persist_messages: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            context_limit: default_context_limit(),
            fallback_category: default_fallback_category(),
            strict_categories: false,
            persist_messages: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyConfig {
    #[serde(default = "default_currency_code")]
    pub code: String,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            code: default_currency_code(),
        }
    }
}

impl CurrencyConfig {
    /// The configured currency, falling back to USD for unknown codes.
    pub fn currency(&self) -> &'static Currency {
        Currency::from_code(&self.code).unwrap_or_else(Currency::default_currency)
    }
}

/// Valid LLM provider names.
pub const VALID_LLM_PROVIDERS: &[&str] = &["ollama", "openai", "anthropic", "claude", "gemini"];

/// Valid embedding provider names.
pub const VALID_PROVIDERS: &[&str] = &["random", "hash", "ollama", "openai"];

// -- Defaults --

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "llama3.2:1b".to_string()
}
fn default_llm_max_tokens() -> usize {
    512
}
fn default_embedding_provider() -> String {
    "random".to_string()
}
fn default_embedding_model() -> String {
    "random-128d".to_string()
}
fn default_context_limit() -> usize {
    5
}
fn default_fallback_category() -> String {
    "Uncategorized".to_string()
}
fn default_currency_code() -> String {
    "USD".to_string()
}
fn default_true() -> bool {
    true
}

impl LedgerConfig {
    /// Load configuration with three-layer TOML merge plus environment:
    /// 1. ~/.config/ledger/config.toml (global)
    /// 2. .ledger/config.toml (project)
    /// 3. .ledger/config.local.toml (local, gitignored)
    /// 4. `LEDGER_*` environment variables (`LEDGER_STORAGE__PATH`)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                builder = builder.add_source(File::from(global_path).required(false));
            }
        }

        if let Some(dir) = project_dir {
            let project_config = dir.join(".ledger").join("config.toml");
            if project_config.exists() {
                builder = builder.add_source(File::from(project_config).required(false));
            }

            let local_config = dir.join(".ledger").join("config.local.toml");
            if local_config.exists() {
                builder = builder.add_source(File::from(local_config).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("LEDGER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| LedgerError::Config(e.to_string()))?;

        let mut cfg: Self = config
            .try_deserialize()
            .map_err(|e| LedgerError::Config(e.to_string()))?;

        cfg.validate();
        Ok(cfg)
    }

    /// Load with defaults only (no files).
    pub fn default_config() -> Self {
        Self {
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            assistant: AssistantConfig::default(),
            currency: CurrencyConfig::default(),
        }
    }

    /// Validate config values, fixing out-of-range values and logging warnings.
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !VALID_LLM_PROVIDERS.contains(&self.llm.provider.as_str()) {
            warnings.push(format!(
                "unknown LLM provider '{}', valid: {}",
                self.llm.provider,
                VALID_LLM_PROVIDERS.join(", ")
            ));
        }

        if !VALID_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            warnings.push(format!(
                "unknown embedding provider '{}', valid: {}",
                self.embedding.provider,
                VALID_PROVIDERS.join(", ")
            ));
        }

        if self.llm.max_tokens == 0 {
            warnings.push("llm.max_tokens = 0, setting to 256".to_string());
            self.llm.max_tokens = 256;
        }

        if self.embedding.dimensions == Some(0) {
            warnings.push("embedding.dimensions = 0, using provider default".to_string());
            self.embedding.dimensions = None;
        }

        if self.assistant.context_limit == 0 {
            warnings.push("assistant.context_limit = 0, setting to 1".to_string());
            self.assistant.context_limit = 1;
        }

        if self.assistant.fallback_category.trim().is_empty() {
            warnings.push("assistant.fallback_category is empty, using 'Uncategorized'".into());
            self.assistant.fallback_category = default_fallback_category();
        }

        if Currency::from_code(&self.currency.code).is_none() {
            warnings.push(format!(
                "unknown currency '{}', falling back to USD",
                self.currency.code
            ));
            self.currency.code = default_currency_code();
        }

        for w in &warnings {
            tracing::warn!("config: {}", w);
        }

        warnings
    }
}

fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("config.toml"))
}

/// `~/.config/ledger`
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ledger"))
}

/// Resolve an API key: check config field first, then environment variable.
/// Used by both embedding and LLM service initialization.
pub fn resolve_api_key(
    api_key: Option<&str>,
    env_var_override: Option<&str>,
    default_env_var: &str,
    provider_name: &str,
    service_kind: &str,
) -> Result<String> {
    if let Some(key) = api_key {
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    let env_var_name = env_var_override.unwrap_or(default_env_var);

    std::env::var(env_var_name).map_err(|_| {
        LedgerError::Config(format!(
            "{provider_name} {service_kind} provider requires an API key \
             (set {service_kind}.api_key or {env_var_name})"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default_config();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "llama3.2:1b");
        assert!(config.llm.auto_pull);
        assert_eq!(config.embedding.provider, "random");
        assert_eq!(config.assistant.context_limit, 5);
        assert_eq!(config.assistant.fallback_category, "Uncategorized");
        assert!(!config.assistant.strict_categories);
        assert_eq!(config.currency.code, "USD");
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn test_load_config_no_files() {
        let config = LedgerConfig::load(Some(Path::new("/nonexistent/path"))).unwrap();
        assert!(config.assistant.context_limit >= 1);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = LedgerConfig::default_config();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: LedgerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.assistant.context_limit, config.assistant.context_limit);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[assistant]
strict_categories = true

[currency]
code = "EUR"
"#;
        let config: LedgerConfig = toml::from_str(toml_str).unwrap();
        assert!(config.assistant.strict_categories);
        assert_eq!(config.assistant.context_limit, 5);
        assert_eq!(config.currency.code, "EUR");
        assert_eq!(config.currency.currency().symbol, "€");
        assert_eq!(config.embedding.provider, "random");
    }

    #[test]
    fn test_validate_default_config_no_warnings() {
        let mut config = LedgerConfig::default_config();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_validate_zero_values() {
        let mut config = LedgerConfig::default_config();
        config.llm.max_tokens = 0;
        config.assistant.context_limit = 0;
        config.embedding.dimensions = Some(0);
        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);
        assert_eq!(config.llm.max_tokens, 256);
        assert_eq!(config.assistant.context_limit, 1);
        assert!(config.embedding.dimensions.is_none());
    }

    #[test]
    fn test_validate_unknown_providers() {
        let mut config = LedgerConfig::default_config();
        config.llm.provider = "banana".into();
        config.embedding.provider = "magic".into();
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("unknown LLM provider")));
        assert!(warnings.iter().any(|w| w.contains("unknown embedding provider")));
    }

    #[test]
    fn test_validate_unknown_currency_falls_back() {
        let mut config = LedgerConfig::default_config();
        config.currency.code = "XYZ".into();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(config.currency.code, "USD");
    }

    #[test]
    fn test_validate_blank_fallback_category() {
        let mut config = LedgerConfig::default_config();
        config.assistant.fallback_category = "  ".into();
        config.validate();
        assert_eq!(config.assistant.fallback_category, "Uncategorized");
    }

    #[test]
    fn test_resolve_api_key_from_config() {
        let key = resolve_api_key(Some("config-key"), None, "OPENAI_API_KEY", "openai", "llm")
            .unwrap();
        assert_eq!(key, "config-key");
    }

    #[test]
    fn test_resolve_api_key_custom_env_var() {
        std::env::set_var("LEDGER_TEST_CUSTOM_KEY", "env-key");
        let key = resolve_api_key(
            None,
            Some("LEDGER_TEST_CUSTOM_KEY"),
            "OPENAI_API_KEY",
            "openai",
            "embedding",
        )
        .unwrap();
        assert_eq!(key, "env-key");
        std::env::remove_var("LEDGER_TEST_CUSTOM_KEY");
    }

    #[test]
    fn test_resolve_api_key_missing() {
        let err = resolve_api_key(
            None,
            Some("LEDGER_TEST_DEFINITELY_UNSET"),
            "OPENAI_API_KEY",
            "openai",
            "llm",
        )
        .unwrap_err();
        assert!(err.to_string().contains("API key"));
    }
}
