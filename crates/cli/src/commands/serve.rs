//! `deckhand serve`: the Telegram bot.

use std::sync::Arc;

use deckhand_channels::TelegramChannel;
use tracing::info;

use super::{build_assistant, load_config};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let channel = TelegramChannel::from_config(&config.telegram)?;

    if config.telegram.allowed_users.is_empty() {
        tracing::warn!("telegram.allowed_users is empty; every sender will be ignored");
    }

    println!("Deckhand: starting Telegram bot");
    println!("   Model:      {}", config.reasoning.model);
    println!("   Collection: {}", config.collection_path().display());
    println!("   Allowed:    {} user(s)", config.telegram.allowed_users.len());

    let assistant = build_assistant(&config, Arc::new(channel))?;

    tokio::select! {
        result = assistant.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
