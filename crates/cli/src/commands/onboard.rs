//! `deckhand onboard`: first-time setup.

use deckhand_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("Deckhand: First-Time Setup");
    println!("==========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    let defaults = AppConfig::default();
    let snapshots = defaults.snapshots_dir();
    if !snapshots.exists() {
        std::fs::create_dir_all(&snapshots)?;
        println!("✅ Created snapshots directory: {}", snapshots.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Add your reasoning API key and Telegram bot token");
        println!("   2. List your Telegram user id under telegram.allowed_users");
        println!("   3. Run: deckhand auth set --hkey <KEY> to enable sync");
        println!("   4. Run: deckhand serve\n");
    }

    println!("Setup complete. Try `deckhand chat` to test from the terminal.\n");

    Ok(())
}
