//! `deckhand status`: collection statistics.

use deckhand_collection::load_auth;
use deckhand_config::AppConfig;
use deckhand_core::collection::CollectionGuard;
use deckhand_core::provider::Provider;
use deckhand_providers::AnthropicProvider;

use super::{load_config, open_store};

pub async fn run(check: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    println!("Deckhand Status");
    println!("===============");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Collection:   {}", config.collection_path().display());
    println!("  Model:        {}", config.reasoning.model);
    println!("  Default deck: {}", config.collection.default_deck);
    println!("  Vocab type:   {}", config.collection.vocab_note_type);
    println!(
        "  API key:      {}",
        if config.has_api_key() { "configured" } else { "missing" }
    );
    println!(
        "  Telegram:     {}",
        if config.telegram.bot_token.is_some() { "configured" } else { "missing" }
    );
    println!(
        "  Sync:         {}",
        match load_auth(&config.auth_path())? {
            Some(_) => "logged in",
            None => "not logged in",
        }
    );

    if check {
        let service = if config.has_api_key() {
            let provider = AnthropicProvider::from_config(&config.reasoning)?;
            match provider.health_check().await {
                Ok(true) => "reachable".to_string(),
                Ok(false) => "API key rejected".to_string(),
                Err(e) => format!("unreachable ({e})"),
            }
        } else {
            "skipped (no API key)".to_string()
        };
        println!("  Service:      {service}");
    }

    let store = open_store(&config);
    let collection = CollectionGuard::acquire(&store).await?;
    let stats = collection.stats()?;
    let decks = collection.decks()?;
    collection.close()?;

    println!();
    println!("  Notes:        {}", stats.notes);
    println!("  Cards:        {}", stats.cards);
    println!("  New:          {}", stats.new);
    println!("  Learning:     {}", stats.learning);
    println!("  Review:       {}", stats.review);
    println!("  Due:          {}", stats.due);
    println!("  Suspended:    {}", stats.suspended);

    if !decks.is_empty() {
        println!();
        for deck in &decks {
            println!(
                "  {:<30} {} cards ({} new)",
                deck.name, deck.card_count, deck.new_count
            );
        }
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file, run `deckhand onboard` first");
    }

    Ok(())
}
