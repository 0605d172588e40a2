pub mod auth;
pub mod chat;
pub mod log;
pub mod onboard;
pub mod serve;
pub mod status;

use std::sync::Arc;

use deckhand_agent::Assistant;
use deckhand_audit::ChangeLog;
use deckhand_collection::FileStore;
use deckhand_config::AppConfig;
use deckhand_core::channel::Channel;
use deckhand_providers::AnthropicProvider;

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

pub fn open_store(config: &AppConfig) -> FileStore {
    FileStore::new(
        config.collection_path(),
        config.collection.vocab_note_type.as_str(),
    )
}

/// Wire the assistant to `channel` using the configured provider, store and
/// change log.
pub fn build_assistant(
    config: &AppConfig,
    channel: Arc<dyn Channel>,
) -> Result<Arc<Assistant>, Box<dyn std::error::Error>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    DECKHAND_API_KEY=sk-ant-...");
        eprintln!("    ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = AnthropicProvider::from_config(&config.reasoning)?;
    let changes = ChangeLog::open(config.changelog_path());
    Ok(Arc::new(Assistant::new(
        config,
        channel,
        Arc::new(provider),
        Arc::new(open_store(config)),
        Arc::new(changes),
    )))
}
