//! Configuration models for shopscribe.
//!
//! Every tunable of a run lives here and is resolved once at startup; the
//! values are handed to the client, retry policy and processor at
//! construction.

use crate::models::{ProductField, UpdateMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "shopscribe.toml";

/// Top-level configuration for shopscribe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chat-completion endpoint
    #[serde(default)]
    pub api: ApiConfig,

    /// Retry and backoff
    #[serde(default)]
    pub retry: RetryConfig,

    /// Prompt settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Batch run settings
    #[serde(default)]
    pub run: RunConfig,
}

/// OpenAI-compatible API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key (can also be set via the `api_key_env` variable)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL for the API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model ID
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Pause before a request when the last response reported no remaining
    /// request budget
    #[serde(default = "default_true")]
    pub respect_rate_limit_headers: bool,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-2024-11-20".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_temperature() -> f64 {
    0.8
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_true() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            respect_rate_limit_headers: true,
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per record, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the jitter added to each backoff
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ms() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Prompt configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Output language for generated copy
    #[serde(default = "default_language")]
    pub language: String,

    /// Tone instruction appended to the prompt
    #[serde(default = "default_tone")]
    pub tone: String,

    /// Path to a file overriding the built-in system prompt
    #[serde(default)]
    pub system_prompt: Option<PathBuf>,

    /// Existing description is cut to this many characters in the prompt
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Append hidden schema.org Product markup to new descriptions
    #[serde(default = "default_true")]
    pub schema_markup: bool,

    /// Storefront base URL for the markup's offer link
    #[serde(default)]
    pub store_url: Option<String>,

    /// ISO 4217 currency of the `Variant Price` column
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_language() -> String {
    "English".to_string()
}

fn default_tone() -> String {
    "natural and conversational, like speaking to a curious shopper".to_string()
}

fn default_max_input_chars() -> usize {
    500
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            tone: default_tone(),
            system_prompt: None,
            max_input_chars: default_max_input_chars(),
            schema_markup: true,
            store_url: None,
            currency: default_currency(),
        }
    }
}

/// Batch run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub update_mode: UpdateMode,

    /// Courtesy pause between processed records
    #[serde(default = "default_inter_record_delay_ms")]
    pub inter_record_delay_ms: u64,

    /// Directory holding checkpoint logs
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Only process products that already have a description
    #[serde(default)]
    pub only_with_description: bool,
}

fn default_inter_record_delay_ms() -> u64 {
    2_000
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            update_mode: UpdateMode::default(),
            inter_record_delay_ms: default_inter_record_delay_ms(),
            checkpoint_dir: default_checkpoint_dir(),
            only_with_description: false,
        }
    }
}

impl RunConfig {
    pub fn inter_record_delay(&self) -> Duration {
        Duration::from_millis(self.inter_record_delay_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else from the default file if present,
    /// else fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        if self.generation.schema_markup && self.generation.currency.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "generation.currency must be set when schema_markup is enabled".to_string(),
            ));
        }
        if let UpdateMode::FieldsOnly(fields) = &self.run.update_mode {
            if fields.is_empty() {
                return Err(ConfigError::Invalid(
                    "run.update_mode.fields_only needs at least one field".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Resolve API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.api.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.api.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.api.api_key_env.clone(),
        })
    }

    /// Load the system prompt override, if configured.
    pub fn load_system_prompt(&self) -> Result<Option<String>, ConfigError> {
        self.generation
            .system_prompt
            .as_ref()
            .map(|path| {
                std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
                    path: path.clone(),
                    source: e,
                })
            })
            .transpose()
    }

    /// Override the update mode from CLI flags.
    pub fn set_update_mode(&mut self, mode: UpdateMode) -> Result<(), ConfigError> {
        self.run.update_mode = mode;
        self.validate()
    }

    /// Fields the configured mode writes, for display.
    pub fn target_fields(&self) -> Vec<ProductField> {
        self.run.update_mode.target_fields()
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    static ENV_VAR: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = ENV_VAR.get_or_init(|| {
        regex::Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid")
    });

    re.replace_all(s, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| cap[0].to_string())
    })
    .into_owned()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or api.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
