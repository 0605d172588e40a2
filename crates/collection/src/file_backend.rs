//! File-based store: the collection as one JSON document on disk.
//!
//! Each `open()` reads the file and each close that changed something
//! rewrites it through a uniquely named temp file and a rename, so a crash
//! never leaves half a file. Opens through one `FileStore` are serialized
//! by its lock; share one store per path.
//!
//! Storage location: `~/.deckhand/collection.json`

use crate::data::{CollectionData, OpenCollection, Persist};
use deckhand_core::collection::{Collection, KnowledgeStore};
use deckhand_core::error::StoreError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub struct FileStore {
    path: PathBuf,
    vocab_note_type: String,
    lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// A store at `path`. A missing file opens as an empty collection
    /// containing the built-in note types.
    pub fn new(path: PathBuf, vocab_note_type: impl Into<String>) -> Self {
        Self {
            path,
            vocab_note_type: vocab_note_type.into(),
            lock: Arc::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<CollectionData, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No collection file yet, starting empty");
                return Ok(CollectionData::with_vocab_type(&self.vocab_note_type));
            }
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&content).map_err(|e| {
            StoreError::Storage(format!("Corrupted collection {}: {e}", self.path.display()))
        })
    }
}

struct WriteFile(PathBuf);

impl Persist for WriteFile {
    fn persist(&mut self, data: &CollectionData) -> Result<(), StoreError> {
        if let Some(parent) = self.0.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Failed to create collection directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(data)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize collection: {e}")))?;

        let tmp = self
            .0
            .with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, content)
            .map_err(|e| StoreError::Storage(format!("Failed to write collection: {e}")))?;
        if let Err(e) = std::fs::rename(&tmp, &self.0) {
            let _ = std::fs::remove_file(&tmp);
            return Err(StoreError::Storage(format!("Failed to replace collection: {e}")));
        }

        debug!(path = %self.0.display(), "Collection flushed");
        Ok(())
    }
}

impl KnowledgeStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    fn lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.lock)
    }

    fn open(&self) -> Result<Box<dyn Collection>, StoreError> {
        let data = self.load()?;
        Ok(Box::new(OpenCollection::new(
            data,
            Box::new(WriteFile(self.path.clone())),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_core::collection::{CollectionGuard, NoteDraft};

    fn vocab(simplified: &str) -> NoteDraft {
        NoteDraft {
            note_type: "ChineseVocabulary".into(),
            deck: "Chinese".into(),
            fields: vec![("Simplified".into(), simplified.into())],
            tags: vec!["claude".into()],
        }
    }

    #[test]
    fn add_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection.json");
        let store = FileStore::new(path.clone(), "ChineseVocabulary");

        let mut col = CollectionGuard::open(&store).unwrap();
        let id = col.add_note(&vocab("猫")).unwrap();
        col.close().unwrap();
        assert!(path.exists());

        let reopened = FileStore::new(path, "ChineseVocabulary");
        let col = CollectionGuard::open(&reopened).unwrap();
        let note = col.note(id).unwrap().unwrap();
        assert_eq!(note.field("Simplified"), Some("猫"));
    }

    #[test]
    fn read_only_operations_do_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection.json");
        let store = FileStore::new(path.clone(), "ChineseVocabulary");
        let col = CollectionGuard::open(&store).unwrap();
        assert_eq!(col.decks().unwrap().len(), 1);
        col.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn uncommitted_changes_never_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection.json");
        let store = FileStore::new(path.clone(), "ChineseVocabulary");
        {
            let mut col = CollectionGuard::open(&store).unwrap();
            col.add_note(&vocab("猫")).unwrap();
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn concurrent_sessions_keep_both_notes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection.json");
        let store = Arc::new(FileStore::new(path.clone(), "ChineseVocabulary"));

        let mut first = CollectionGuard::acquire(store.as_ref()).await.unwrap();
        first.add_note(&vocab("猫")).unwrap();

        let other = Arc::clone(&store);
        let second = tokio::spawn(async move {
            let mut col = CollectionGuard::acquire(other.as_ref()).await.unwrap();
            col.add_note(&vocab("狗")).unwrap();
            col.close().unwrap();
        });
        tokio::task::yield_now().await;

        first.close().unwrap();
        second.await.unwrap();

        let reopened = FileStore::new(path, "ChineseVocabulary");
        let col = CollectionGuard::open(&reopened).unwrap();
        assert_eq!(col.stats().unwrap().notes, 2);
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FileStore::new(path, "ChineseVocabulary");
        assert!(matches!(
            CollectionGuard::open(&store),
            Err(StoreError::Storage(_))
        ));
    }

    #[test]
    fn custom_vocab_type_is_registered() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("c.json"), "Hanzi");
        let col = CollectionGuard::open(&store).unwrap();
        let types = col.note_types().unwrap();
        assert!(types.iter().any(|t| t.name == "Hanzi"));
        assert!(types.iter().any(|t| t.name == "Basic"));
    }
}
