//! `deckhand auth`: sync credentials.

use deckhand_collection::{clear_auth, save_auth};
use deckhand_core::collection::SyncAuth;

use super::load_config;

pub async fn set(hkey: String, endpoint: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let hkey = hkey.trim().to_string();
    if hkey.is_empty() {
        return Err("The sync key must not be empty.".into());
    }
    let config = load_config()?;
    let path = config.auth_path();
    save_auth(&path, &SyncAuth { hkey, endpoint })?;
    println!("✅ Sync credentials saved to {}", path.display());
    Ok(())
}

pub async fn clear() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let path = config.auth_path();
    if clear_auth(&path)? {
        println!("Removed sync credentials from {}", path.display());
    } else {
        println!("No sync credentials stored.");
    }
    Ok(())
}
