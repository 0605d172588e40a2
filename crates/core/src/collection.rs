//! Knowledge store traits for the flashcard collection.
//!
//! A [`KnowledgeStore`] hands out an open [`Collection`] per operation.
//! Only one collection per store is open at a time: [`CollectionGuard`]
//! holds the store's lock for as long as it lives. Changes reach the store
//! only through [`CollectionGuard::close`]; a guard dropped on an error or
//! panic path releases the collection and discards what it changed.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub type NoteId = i64;
pub type CardId = i64;

/// A note: one set of field values that produces one or more cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,

    /// Name of the note type ("Basic", "ChineseVocabulary", ...)
    pub note_type: String,

    /// Field name/value pairs in note type order
    pub fields: Vec<(String, String)>,

    #[serde(default)]
    pub tags: Vec<String>,

    pub modified: DateTime<Utc>,
}

impl Note {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Scheduling state of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardState {
    New,
    Learning,
    Review,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub note_id: NoteId,
    pub deck: String,
    pub state: CardState,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
}

/// Everything needed to add a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteDraft {
    pub note_type: String,
    pub deck: String,
    pub fields: Vec<(String, String)>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckInfo {
    pub name: String,
    pub card_count: usize,
    pub new_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteTypeInfo {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub name: String,
    pub note_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub notes: usize,
    pub cards: usize,
    pub new: usize,
    pub learning: usize,
    pub review: usize,
    pub due: usize,
    pub suspended: usize,
}

/// Credentials for the remote sync service.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAuth {
    pub hkey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for SyncAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAuth")
            .field("hkey", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Outcome of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NoChanges,
    Synced,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::NoChanges => write!(f, "Synced (no changes needed)"),
            SyncStatus::Synced => write!(f, "Synced"),
        }
    }
}

/// Opens collections. One open collection per operation.
pub trait KnowledgeStore: Send + Sync {
    /// The backend name (e.g., "file", "memory").
    fn name(&self) -> &str;

    /// The lock serializing every open of this store. Clones of a store
    /// share it.
    fn lock(&self) -> Arc<Mutex<()>>;

    /// Load the collection. Callers go through [`CollectionGuard`], which
    /// takes [`KnowledgeStore::lock`] first.
    fn open(&self) -> Result<Box<dyn Collection>, StoreError>;
}

/// An open flashcard collection.
///
/// Batch methods take id lists and silently skip ids that do not exist,
/// returning how many items they touched.
pub trait Collection: Send {
    /// Note ids matching a search query, in ascending id order.
    fn find_notes(&self, query: &str) -> Result<Vec<NoteId>, StoreError>;

    /// Card ids matching a search query, in ascending id order.
    fn find_cards(&self, query: &str) -> Result<Vec<CardId>, StoreError>;

    fn note(&self, id: NoteId) -> Result<Option<Note>, StoreError>;

    fn cards_of_note(&self, id: NoteId) -> Result<Vec<Card>, StoreError>;

    fn add_note(&mut self, draft: &NoteDraft) -> Result<NoteId, StoreError>;

    /// Overwrite the named fields of a note; fields not named keep their
    /// value. Field names match case-insensitively.
    fn update_note(&mut self, id: NoteId, fields: &[(String, String)]) -> Result<(), StoreError>;

    fn add_tags(&mut self, notes: &[NoteId], tags: &[String]) -> Result<usize, StoreError>;

    fn remove_tags(&mut self, notes: &[NoteId], tags: &[String]) -> Result<usize, StoreError>;

    fn remove_notes(&mut self, notes: &[NoteId]) -> Result<usize, StoreError>;

    fn set_suspended(&mut self, cards: &[CardId], suspended: bool) -> Result<usize, StoreError>;

    fn move_cards(&mut self, cards: &[CardId], deck: &str) -> Result<usize, StoreError>;

    fn decks(&self) -> Result<Vec<DeckInfo>, StoreError>;

    fn note_types(&self) -> Result<Vec<NoteTypeInfo>, StoreError>;

    /// Every tag in use, ordered case-insensitively, with its note count.
    fn tags(&self) -> Result<Vec<TagInfo>, StoreError>;

    fn stats(&self) -> Result<CollectionStats, StoreError>;

    fn sync(&mut self, auth: &SyncAuth) -> Result<SyncStatus, StoreError>;

    /// Commit changes to the store. Called at most once, by
    /// [`CollectionGuard::close`]. A collection dropped without it keeps
    /// nothing.
    fn close(&mut self) -> Result<(), StoreError>;
}

/// Scoped, exclusive ownership of an open collection.
///
/// The store lock is held until the guard goes away. Dropping the guard
/// without [`CollectionGuard::close`] discards every change, so early
/// returns and unwinding panics never commit half an operation.
pub struct CollectionGuard {
    inner: Box<dyn Collection>,
    closed: bool,
    _lease: OwnedMutexGuard<()>,
}

impl CollectionGuard {
    /// Wait for the store lock, then open.
    pub async fn acquire(store: &dyn KnowledgeStore) -> Result<Self, StoreError> {
        let lease = store.lock().lock_owned().await;
        Self::with_lease(store, lease)
    }

    /// Open without waiting. Fails with [`StoreError::Busy`] while another
    /// guard on the same store is alive.
    pub fn open(store: &dyn KnowledgeStore) -> Result<Self, StoreError> {
        let lease = store
            .lock()
            .try_lock_owned()
            .map_err(|_| StoreError::Busy(store.name().to_string()))?;
        Self::with_lease(store, lease)
    }

    fn with_lease(
        store: &dyn KnowledgeStore,
        lease: OwnedMutexGuard<()>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            inner: store.open()?,
            closed: false,
            _lease: lease,
        })
    }

    /// Commit and release, surfacing any flush error.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.closed = true;
        self.inner.close()
    }
}

impl Deref for CollectionGuard {
    type Target = dyn Collection;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl DerefMut for CollectionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.inner
    }
}

impl Drop for CollectionGuard {
    fn drop(&mut self) {
        if !self.closed {
            tracing::debug!("Collection released without commit");
        }
    }
}
