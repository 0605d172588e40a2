//! Sync credentials on disk.
//!
//! The file holds `{"hkey": "...", "endpoint": "..."}` and is only readable
//! by its owner.

use deckhand_core::collection::SyncAuth;
use deckhand_core::error::StoreError;
use std::path::Path;

/// Read credentials. A missing file means "not logged in".
pub fn load_auth(path: &Path) -> Result<Option<SyncAuth>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StoreError::Unavailable(format!(
                "Failed to read {}: {e}",
                path.display()
            )));
        }
    };
    let auth: SyncAuth = serde_json::from_str(&content)
        .map_err(|e| StoreError::Storage(format!("Invalid sync credentials: {e}")))?;
    Ok(Some(auth))
}

/// Write credentials with mode 0600.
pub fn save_auth(path: &Path, auth: &SyncAuth) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Storage(format!("Failed to create directory: {e}")))?;
    }
    let content = serde_json::to_string(auth)
        .map_err(|e| StoreError::Storage(format!("Failed to serialize credentials: {e}")))?;
    std::fs::write(path, content)
        .map_err(|e| StoreError::Storage(format!("Failed to write credentials: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| StoreError::Storage(format!("Failed to restrict credentials: {e}")))?;
    }

    tracing::info!(path = %path.display(), "Sync credentials saved");
    Ok(())
}

/// Remove credentials. Returns whether a file was removed.
pub fn clear_auth(path: &Path) -> Result<bool, StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::Storage(format!("Failed to remove credentials: {e}"))),
    }
}
