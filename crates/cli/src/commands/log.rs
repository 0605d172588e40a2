//! `deckhand log`: recent collection changes.

use deckhand_audit::read_tail;

use super::load_config;

pub async fn run(count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let path = config.changelog_path();
    let entries = read_tail(&path, count)?;

    if entries.is_empty() {
        println!("No changes recorded in {}", path.display());
        return Ok(());
    }
    for entry in &entries {
        println!("{}", entry.summary());
    }
    Ok(())
}
