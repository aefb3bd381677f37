//! Configuration management for the Kokoro companion.
//!
//! The configuration lives at `~/.kokoro/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (KOKORO_* prefix, `OPENAI_API_KEY`)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `KOKORO_DATA_DIR` → storage.data_dir
//! - `KOKORO_STORAGE_BACKEND` → storage.backend
//! - `KOKORO_LLM_BASE_URL` → llm.base_url
//! - `KOKORO_LLM_MODEL` → llm.model
//! - `KOKORO_TTS_ENABLED` → tts.enabled
//! - `KOKORO_LOG_LEVEL` → observability.log_level
//! - `KOKORO_LOG_FORMAT` → observability.log_format
//! - `OPENAI_API_KEY` → llm.api_key (and tts.api_key when unset)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".kokoro"),
        |dirs| dirs.home_dir().join(".kokoro"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Storage Configuration
// ============================================================================

/// Where conversation history, preferences, and audio are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend: "sqlite" (durable) or "memory" (nothing survives exit)
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Data directory. Defaults to `~/.kokoro/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Maximum number of backups kept before the oldest is pruned
    #[serde(default = "default_backup_limit")]
    pub backup_limit: usize,
}

impl StorageConfig {
    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| config_dir().join("data"))
    }

    /// SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("kokoro.db")
    }

    /// Directory that synthesized speech is written to.
    pub fn audio_cache_dir(&self) -> PathBuf {
        self.data_dir().join("audio")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            data_dir: None,
            backup_limit: default_backup_limit(),
        }
    }
}

fn default_storage_backend() -> String {
    "sqlite".into()
}

fn default_backup_limit() -> usize {
    5
}

// ============================================================================
// LLM Configuration
// ============================================================================

/// Dialogue generation endpoint (any OpenAI-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Sampling temperature (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Upper bound on reply length in tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com".into()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f64 {
    0.8
}

fn default_max_tokens() -> u32 {
    300
}

fn default_request_timeout() -> u64 {
    60
}

// ============================================================================
// TTS Configuration
// ============================================================================

/// Speech synthesis endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_tts_model")]
    pub model: String,

    /// Falls back to `llm.api_key` when unset
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_llm_base_url(),
            model: default_tts_model(),
            api_key: None,
        }
    }
}

fn default_tts_model() -> String {
    "tts-1".into()
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Session controller tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Upper bound on one generation call, including the HTTP round trip
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    /// How many trailing messages are sent as history with each request
    #[serde(default = "default_max_history")]
    pub max_history_messages: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            generation_timeout_secs: default_generation_timeout(),
            max_history_messages: default_max_history(),
        }
    }
}

fn default_generation_timeout() -> u64 {
    45
}

fn default_max_history() -> usize {
    40
}

// ============================================================================
// Observability Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    ///
    /// `path` overrides the default config location.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("KOKORO_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(backend) = lookup("KOKORO_STORAGE_BACKEND") {
            self.storage.backend = backend;
        }
        if let Some(url) = lookup("KOKORO_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("KOKORO_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(enabled) = lookup("KOKORO_TTS_ENABLED") {
            if let Ok(flag) = enabled.parse() {
                self.tts.enabled = flag;
            }
        }
        if let Some(level) = lookup("KOKORO_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("KOKORO_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
    }

    /// API key used for speech synthesis.
    pub fn tts_api_key(&self) -> Option<&str> {
        self.tts
            .api_key
            .as_deref()
            .or(self.llm.api_key.as_deref())
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create config directory {}", dir.display())
                })?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(config.tts.enabled);
        assert_eq!(config.session.generation_timeout_secs, 45);
        assert_eq!(config.session.max_history_messages, 40);
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"llm": {"model": "gpt-4o"}, "session": {}}"#).unwrap();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.base_url, "https://api.openai.com");
        assert_eq!(config.session.generation_timeout_secs, 45);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("KOKORO_DATA_DIR", "/tmp/kokoro-test"),
            ("KOKORO_LLM_MODEL", "local-model"),
            ("KOKORO_TTS_ENABLED", "false"),
            ("OPENAI_API_KEY", "sk-test"),
        ]);

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(
            config.storage.database_path(),
            PathBuf::from("/tmp/kokoro-test/kokoro.db")
        );
        assert_eq!(config.llm.model, "local-model");
        assert!(!config.tts.enabled);
        assert_eq!(config.tts_api_key(), Some("sk-test"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.llm.temperature = 0.3;
        config.storage.backend = "memory".into();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!((loaded.llm.temperature - 0.3).abs() < f64::EPSILON);
        assert_eq!(loaded.storage.backend, "memory");
    }

    #[test]
    fn test_load_from_malformed_file_fails_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
