//! `deckhand chat`: interactive or single-message terminal mode.

use std::sync::Arc;

use deckhand_channels::CliChannel;

use super::{build_assistant, load_config};

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let assistant = build_assistant(&config, Arc::new(CliChannel::new()))?;

    if let Some(msg) = message {
        let Some(msg) = CliChannel::parse_line(&msg) else {
            return Err("Message is empty.".into());
        };
        assistant.handle(msg).await;
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        Deckhand: Interactive Mode            ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:      {}", config.reasoning.model);
    println!("  Collection: {}", config.collection_path().display());
    println!("  Deck:       {}", config.collection.default_deck);
    println!();
    println!("  Type a word, a fact or a question and press Enter.");
    println!("  `/attach <path> [caption]` sends a photo or JSON file.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    assistant.run().await?;

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}
