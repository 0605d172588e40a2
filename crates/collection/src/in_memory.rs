//! In-memory store, useful for testing and ephemeral sessions.

use crate::data::{CollectionData, OpenCollection, Persist};
use deckhand_core::collection::{Collection, KnowledgeStore};
use deckhand_core::error::StoreError;
use std::sync::{Arc, Mutex};

/// A store that keeps the collection document in process memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    data: Arc<Mutex<CollectionData>>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: CollectionData) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            lock: Arc::default(),
        }
    }

    /// A copy of the current document.
    pub fn snapshot(&self) -> Result<CollectionData, StoreError> {
        self.data
            .lock()
            .map(|data| data.clone())
            .map_err(|_| StoreError::Unavailable("collection lock poisoned".into()))
    }
}

struct WriteBack(Arc<Mutex<CollectionData>>);

impl Persist for WriteBack {
    fn persist(&mut self, data: &CollectionData) -> Result<(), StoreError> {
        let mut shared = self
            .0
            .lock()
            .map_err(|_| StoreError::Unavailable("collection lock poisoned".into()))?;
        *shared = data.clone();
        Ok(())
    }
}

impl KnowledgeStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.lock)
    }

    fn open(&self) -> Result<Box<dyn Collection>, StoreError> {
        let data = self.snapshot()?;
        Ok(Box::new(OpenCollection::new(
            data,
            Box::new(WriteBack(Arc::clone(&self.data))),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_core::collection::{CollectionGuard, NoteDraft};

    fn basic(front: &str) -> NoteDraft {
        NoteDraft {
            note_type: "Basic".into(),
            deck: "Default".into(),
            fields: vec![("Front".into(), front.into()), ("Back".into(), "b".into())],
            tags: vec![],
        }
    }

    #[test]
    fn changes_are_visible_after_close() {
        let store = InMemoryStore::new();
        let mut col = CollectionGuard::open(&store).unwrap();
        col.add_note(&basic("hello")).unwrap();
        col.close().unwrap();

        let col = CollectionGuard::open(&store).unwrap();
        assert_eq!(col.find_notes("hello").unwrap().len(), 1);
    }

    #[test]
    fn second_open_is_refused_while_one_is_alive() {
        let store = InMemoryStore::new();
        let mut writer = CollectionGuard::open(&store).unwrap();
        writer.add_note(&basic("pending")).unwrap();

        assert!(matches!(
            CollectionGuard::open(&store.clone()),
            Err(StoreError::Busy(_))
        ));

        writer.close().unwrap();
        let reader = CollectionGuard::open(&store).unwrap();
        assert_eq!(reader.find_notes("pending").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_writers_both_land() {
        let store = InMemoryStore::new();
        let mut first = CollectionGuard::acquire(&store).await.unwrap();
        first.add_note(&basic("first")).unwrap();

        let cloned = store.clone();
        let second = tokio::spawn(async move {
            let mut col = CollectionGuard::acquire(&cloned).await.unwrap();
            col.add_note(&basic("second")).unwrap();
            col.close().unwrap();
        });
        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        first.close().unwrap();
        second.await.unwrap();

        let col = CollectionGuard::open(&store).unwrap();
        assert_eq!(col.stats().unwrap().notes, 2);
    }

    #[test]
    fn dropped_guard_discards_changes() {
        let store = InMemoryStore::new();
        let cloned = store.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let mut col = CollectionGuard::open(&cloned).unwrap();
            col.add_note(&basic("before panic")).unwrap();
            panic!("handler blew up");
        }));
        assert!(result.is_err());

        let col = CollectionGuard::open(&store).unwrap();
        assert!(col.find_notes("\"before panic\"").unwrap().is_empty());
    }
}
