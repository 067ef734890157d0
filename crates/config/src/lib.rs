//! Configuration loading and validation for agentloop.
//!
//! Loads configuration from `~/.agentloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.agentloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model endpoint
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Orchestration loop
    #[serde(default)]
    pub agent: AgentConfig,

    /// Conversation memory
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Knowledge retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Upload splitting
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// OpenAI-compatible model endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name, used in logs
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Base URL up to and including `/v1`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Chat model
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding model; without one the vector store falls back to lexical scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_provider_name() -> String {
    "ollama".into()
}
fn default_base_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_model() -> String {
    "llama3.1".into()
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            embedding_model: None,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// Never print API keys in full.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "***",
        None => "<none>",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Orchestration loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model-call/tool-execution rounds before the fallback answer
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Replaces the built-in ReAct system prompt; `{tools}` is substituted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_iterations() -> usize {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: None,
        }
    }
}

/// Conversation memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Repository tier window size
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Repository tier backend: "memory" or "sqlite"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// SQLite database file, used when `backend = "sqlite"`
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// Score threshold for the archive tag lookup
    #[serde(default = "default_archive_threshold")]
    pub archive_threshold: f64,
}

fn default_max_messages() -> usize {
    20
}
fn default_memory_backend() -> String {
    "memory".into()
}
fn default_sqlite_path() -> PathBuf {
    AppConfig::config_dir().join("memory.db")
}
fn default_archive_threshold() -> f64 {
    0.7
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            backend: default_memory_backend(),
            sqlite_path: default_sqlite_path(),
            archive_threshold: default_archive_threshold(),
        }
    }
}

/// Knowledge retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_similarity_threshold() -> f64 {
    0.8
}
fn default_top_k() -> usize {
    5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            top_k: default_top_k(),
        }
    }
}

/// Token text splitter settings for uploaded files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Target chunk size in tokens
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// A sentence break is only honoured past this many characters
    #[serde(default = "default_min_chunk_size_chars")]
    pub min_chunk_size_chars: usize,

    /// Chunks this short or shorter are dropped
    #[serde(default = "default_min_chunk_length_to_embed")]
    pub min_chunk_length_to_embed: usize,

    #[serde(default = "default_max_num_chunks")]
    pub max_num_chunks: usize,

    #[serde(default = "default_true")]
    pub keep_separator: bool,
}

fn default_chunk_size() -> usize {
    800
}
fn default_min_chunk_size_chars() -> usize {
    350
}
fn default_min_chunk_length_to_embed() -> usize {
    5
}
fn default_max_num_chunks() -> usize {
    10_000
}
fn default_true() -> bool {
    true
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            min_chunk_size_chars: default_min_chunk_size_chars(),
            min_chunk_length_to_embed: default_min_chunk_length_to_embed(),
            max_num_chunks: default_max_num_chunks(),
            keep_separator: true,
        }
    }
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Upper bound on an upload request body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.agentloop/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `AGENTLOOP_API_KEY`
    /// - `AGENTLOOP_BASE_URL`
    /// - `AGENTLOOP_MODEL`
    /// - `AGENTLOOP_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
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

    /// Apply `AGENTLOOP_*` environment overrides on top of the loaded file.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(key) = std::env::var("AGENTLOOP_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("AGENTLOOP_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Ok(model) = std::env::var("AGENTLOOP_MODEL") {
            self.provider.model = model;
        }
        if let Ok(port) = std::env::var("AGENTLOOP_PORT") {
            self.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("AGENTLOOP_PORT is not a port: {port}"))
            })?;
        }
        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "provider.model must not be empty".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }

        if self.memory.max_messages == 0 {
            return Err(ConfigError::ValidationError(
                "memory.max_messages must be > 0".into(),
            ));
        }

        if !matches!(self.memory.backend.as_str(), "memory" | "sqlite") {
            return Err(ConfigError::ValidationError(format!(
                "memory.backend must be \"memory\" or \"sqlite\", got \"{}\"",
                self.memory.backend
            )));
        }

        for (name, value) in [
            ("memory.archive_threshold", self.memory.archive_threshold),
            ("retrieval.similarity_threshold", self.retrieval.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k must be > 0".into(),
            ));
        }

        if self.ingestion.chunk_size == 0 || self.ingestion.max_num_chunks == 0 {
            return Err(ConfigError::ValidationError(
                "ingestion.chunk_size and ingestion.max_num_chunks must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
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

    #[error("Failed to render configuration: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.memory.max_messages, 20);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.ingestion.chunk_size, 800);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.memory.sqlite_path, config.memory.sqlite_path);
    }

    #[test]
    fn zero_window_rejected() {
        let mut config = AppConfig::default();
        config.memory.max_messages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let mut config = AppConfig::default();
        config.retrieval.similarity_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retrieval.similarity_threshold"));
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.memory.backend = "redis".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider.name, "ollama");
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[provider]
model = "qwen2.5"

[memory]
max_messages = 8
backend = "sqlite"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.provider.model, "qwen2.5");
        assert_eq!(config.provider.base_url, "http://localhost:11434/v1");
        assert_eq!(config.memory.max_messages, 8);
        assert_eq!(config.memory.backend, "sqlite");
        assert_eq!(config.agent.max_iterations, 10);
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent]\nmax_iterations = \"many\"").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("***"));
    }
}
