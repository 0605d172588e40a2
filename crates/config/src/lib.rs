//! Configuration loading, validation, and management for Deckhand.
//!
//! Loads configuration from `~/.deckhand/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.deckhand/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reasoning service settings
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Telegram transport settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Flashcard collection settings
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Turn loop and session settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Fragment reassembly settings
    #[serde(default)]
    pub reassembly: ReassemblyConfig,

    /// On-disk locations for the change log, snapshots and sync credentials
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Override for the API base URL (proxies, tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.3
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            base_url: None,
        }
    }
}

impl std::fmt::Debug for ReasoningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Sender ids allowed to talk to the bot. Empty denies everyone; "*" allows all.
    #[serde(default)]
    pub allowed_users: Vec<String>,

    /// Long-poll timeout for getUpdates
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_poll_timeout() -> u64 {
    30
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            allowed_users: vec![],
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("allowed_users", &self.allowed_users)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Collection file. Defaults to `~/.deckhand/collection.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Deck used when a card request names none
    #[serde(default = "default_deck")]
    pub default_deck: String,

    /// Note type for vocabulary cards
    #[serde(default = "default_vocab_note_type")]
    pub vocab_note_type: String,

    /// Tag put on every note the assistant creates
    #[serde(default = "default_assistant_tag")]
    pub assistant_tag: String,

    /// Language tag added to vocabulary cards
    #[serde(default = "default_language_tag")]
    pub language_tag: String,

    /// Tag for vocabulary built entirely from mastered characters
    #[serde(default = "default_known_words_tag")]
    pub known_words_tag: String,
}

fn default_deck() -> String {
    "Knowledge::Languages::Chinese::Vocabulary".into()
}
fn default_vocab_note_type() -> String {
    "ChineseVocabulary".into()
}
fn default_assistant_tag() -> String {
    "claude".into()
}
fn default_language_tag() -> String {
    "chinese".into()
}
fn default_known_words_tag() -> String {
    "hanly".into()
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            path: None,
            default_deck: default_deck(),
            vocab_note_type: default_vocab_note_type(),
            assistant_tag: default_assistant_tag(),
            language_tag: default_language_tag(),
            known_words_tag: default_known_words_tag(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Reasoning rounds per user request before giving up
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Turns of history kept per session
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

fn default_max_rounds() -> usize {
    20
}
fn default_max_history_turns() -> usize {
    40
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

/// Thresholds for recognizing and buffering payloads split across messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassemblyConfig {
    /// A message starting with `{` or `[` must be longer than this to open a buffer
    #[serde(default = "default_min_start_chars")]
    pub min_start_chars: usize,

    /// A message without an opening char must be longer than this to count as a fragment
    #[serde(default = "default_min_fragment_chars")]
    pub min_fragment_chars: usize,

    /// Indicators a fragment must match
    #[serde(default = "default_indicator_threshold")]
    pub indicator_threshold: u32,

    /// Quiet period after the latest fragment before giving up
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_min_start_chars() -> usize {
    100
}
fn default_min_fragment_chars() -> usize {
    200
}
fn default_indicator_threshold() -> u32 {
    3
}
fn default_debounce_ms() -> u64 {
    3000
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            min_start_chars: default_min_start_chars(),
            min_fragment_chars: default_min_fragment_chars(),
            indicator_threshold: default_indicator_threshold(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Append-only change log. Defaults to `~/.deckhand/changelog.jsonl`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<PathBuf>,

    /// Payload snapshots. Defaults to `~/.deckhand/snapshots`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots_dir: Option<PathBuf>,

    /// Sync credentials. Defaults to `~/.deckhand/sync_auth.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_file: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.deckhand/config.toml).
    ///
    /// Environment overrides, highest priority first:
    /// - `DECKHAND_API_KEY`, then `ANTHROPIC_API_KEY`
    /// - `DECKHAND_TELEGRAM_TOKEN`, then `TELEGRAM_BOT_TOKEN`
    /// - `DECKHAND_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
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

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("DECKHAND_API_KEY").or_else(|| var("ANTHROPIC_API_KEY")) {
            self.reasoning.api_key = Some(key);
        }
        if let Some(token) = var("DECKHAND_TELEGRAM_TOKEN").or_else(|| var("TELEGRAM_BOT_TOKEN")) {
            self.telegram.bot_token = Some(token);
        }
        if let Some(model) = var("DECKHAND_MODEL") {
            self.reasoning.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deckhand")
    }

    pub fn collection_path(&self) -> PathBuf {
        self.collection
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("collection.json"))
    }

    pub fn changelog_path(&self) -> PathBuf {
        self.paths
            .changelog
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("changelog.jsonl"))
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.paths
            .snapshots_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("snapshots"))
    }

    pub fn auth_path(&self) -> PathBuf {
        self.paths
            .auth_file
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("sync_auth.json"))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.reasoning.temperature) {
            return Err(ConfigError::ValidationError(
                "reasoning.temperature must be between 0.0 and 1.0".into(),
            ));
        }

        if self.agent.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_rounds must be at least 1".into(),
            ));
        }

        if self.agent.max_history_turns < 2 {
            return Err(ConfigError::ValidationError(
                "agent.max_history_turns must be at least 2".into(),
            ));
        }

        if self.reassembly.debounce_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reassembly.debounce_ms must be > 0".into(),
            ));
        }

        if self.collection.default_deck.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "collection.default_deck must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.reasoning.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_rounds, 20);
        assert_eq!(config.reassembly.debounce_ms, 3000);
        assert_eq!(config.reassembly.indicator_threshold, 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.reasoning.model, config.reasoning.model);
        assert_eq!(parsed.collection.default_deck, config.collection.default_deck);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[agent]\nmax_rounds = 5\n\n[telegram]\nallowed_users = [\"42\"]\n",
        )
        .unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.max_rounds, 5);
        assert_eq!(config.agent.max_history_turns, 40);
        assert_eq!(config.telegram.allowed_users, vec!["42"]);
        assert_eq!(config.telegram.poll_timeout_secs, 30);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.reasoning.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_rounds_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unparsable_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent\nmax_rounds = ").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.reasoning.model, default_model());
    }

    #[test]
    fn env_overrides_prefer_deckhand_names() {
        let env: HashMap<&str, &str> = [
            ("DECKHAND_API_KEY", "sk-deckhand"),
            ("ANTHROPIC_API_KEY", "sk-anthropic"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("DECKHAND_MODEL", "claude-haiku"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.reasoning.api_key.as_deref(), Some("sk-deckhand"));
        assert_eq!(config.telegram.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(config.reasoning.model, "claude-haiku");
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = AppConfig::default();
        config.reasoning.api_key = Some("sk-secret".into());
        config.telegram.bot_token = Some("123:secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("123:secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("max_rounds = 20"));
        assert!(toml_str.contains("ChineseVocabulary"));
    }

    #[test]
    fn derived_paths_live_under_config_dir() {
        let config = AppConfig::default();
        assert!(config.changelog_path().ends_with(".deckhand/changelog.jsonl"));
        assert!(config.snapshots_dir().ends_with(".deckhand/snapshots"));
    }
}
