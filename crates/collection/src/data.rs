//! The collection document shared by every backend.
//!
//! Backends differ only in where the document lives between operations.
//! [`OpenCollection`] works on a private copy and hands it back to its
//! backend on close when anything changed.

use crate::query::Query;
use chrono::{DateTime, Utc};
use deckhand_core::collection::{
    Card, CardId, CardState, Collection, CollectionStats, DeckInfo, Note, NoteDraft, NoteId,
    NoteTypeInfo, SyncAuth, SyncStatus, TagInfo,
};
use deckhand_core::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const BASIC_NOTE_TYPE: &str = "Basic";

/// A note type and how many cards each of its notes produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteTypeSpec {
    pub name: String,
    pub fields: Vec<String>,
    #[serde(default = "default_templates")]
    pub templates: u32,
}

fn default_templates() -> u32 {
    1
}

/// Everything a collection stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionData {
    #[serde(default = "default_next_id")]
    next_id: i64,
    #[serde(default)]
    notes: BTreeMap<NoteId, Note>,
    #[serde(default)]
    cards: BTreeMap<CardId, Card>,
    #[serde(default)]
    decks: BTreeSet<String>,
    #[serde(default)]
    note_types: Vec<NoteTypeSpec>,
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
    #[serde(default)]
    last_sync: Option<DateTime<Utc>>,
}

fn default_next_id() -> i64 {
    1
}

impl Default for CollectionData {
    fn default() -> Self {
        Self::with_vocab_type("ChineseVocabulary")
    }
}

impl CollectionData {
    /// An empty collection with the built-in note types.
    pub fn with_vocab_type(vocab_note_type: &str) -> Self {
        Self {
            next_id: default_next_id(),
            notes: BTreeMap::new(),
            cards: BTreeMap::new(),
            decks: BTreeSet::from(["Default".to_string()]),
            note_types: vec![
                NoteTypeSpec {
                    name: BASIC_NOTE_TYPE.into(),
                    fields: vec!["Front".into(), "Back".into()],
                    templates: 1,
                },
                NoteTypeSpec {
                    name: vocab_note_type.into(),
                    fields: [
                        "Simplified",
                        "Traditional",
                        "Pinyin",
                        "Meaning",
                        "PartOfSpeech",
                        "SentenceSimplified",
                        "SentencePinyin",
                        "SentenceMeaning",
                    ]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                    templates: 2,
                },
            ],
            modified: None,
            last_sync: None,
        }
    }

    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn touch(&mut self) {
        self.modified = Some(Utc::now());
    }

    /// Set a card's scheduling state. Test helper for stats and `is:` queries.
    pub fn set_card_state(&mut self, card: CardId, state: CardState, due: Option<DateTime<Utc>>) {
        if let Some(c) = self.cards.get_mut(&card) {
            c.state = state;
            c.due = due;
        }
    }
}

/// Where a collection goes back to on close.
pub trait Persist: Send {
    fn persist(&mut self, data: &CollectionData) -> Result<(), StoreError>;
}

/// An open collection working on a private copy of the document.
pub struct OpenCollection {
    data: CollectionData,
    dirty: bool,
    sink: Box<dyn Persist>,
}

impl OpenCollection {
    pub fn new(data: CollectionData, sink: Box<dyn Persist>) -> Self {
        Self {
            data,
            dirty: false,
            sink,
        }
    }

    fn matching_cards(&self, query: &str) -> Result<Vec<&Card>, StoreError> {
        let query = Query::parse(query)?;
        let now = Utc::now();
        Ok(self
            .data
            .cards
            .values()
            .filter(|card| {
                self.data
                    .notes
                    .get(&card.note_id)
                    .is_some_and(|note| query.matches(note, card, now))
            })
            .collect())
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.data.touch();
    }
}

impl Collection for OpenCollection {
    fn find_notes(&self, query: &str) -> Result<Vec<NoteId>, StoreError> {
        let ids: BTreeSet<NoteId> = self
            .matching_cards(query)?
            .into_iter()
            .map(|card| card.note_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    fn find_cards(&self, query: &str) -> Result<Vec<CardId>, StoreError> {
        Ok(self
            .matching_cards(query)?
            .into_iter()
            .map(|card| card.id)
            .collect())
    }

    fn note(&self, id: NoteId) -> Result<Option<Note>, StoreError> {
        Ok(self.data.notes.get(&id).cloned())
    }

    fn cards_of_note(&self, id: NoteId) -> Result<Vec<Card>, StoreError> {
        Ok(self
            .data
            .cards
            .values()
            .filter(|card| card.note_id == id)
            .cloned()
            .collect())
    }

    fn add_note(&mut self, draft: &NoteDraft) -> Result<NoteId, StoreError> {
        let note_type = self
            .data
            .note_types
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(&draft.note_type))
            .cloned()
            .ok_or_else(|| StoreError::UnknownNoteType(draft.note_type.clone()))?;

        for (name, _) in &draft.fields {
            if !note_type.fields.iter().any(|f| f.eq_ignore_ascii_case(name)) {
                return Err(StoreError::Storage(format!(
                    "note type '{}' has no field '{name}'",
                    note_type.name
                )));
            }
        }

        let fields = note_type
            .fields
            .iter()
            .map(|field| {
                let value = draft
                    .fields
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(field))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                (field.clone(), value)
            })
            .collect::<Vec<_>>();

        if fields.first().is_none_or(|(_, v)| v.trim().is_empty()) {
            return Err(StoreError::Storage(format!(
                "first field of '{}' must not be empty",
                note_type.name
            )));
        }

        let mut tags: Vec<String> = Vec::new();
        for tag in &draft.tags {
            if !tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                tags.push(tag.clone());
            }
        }

        let note_id = self.data.allocate_id();
        self.data.notes.insert(
            note_id,
            Note {
                id: note_id,
                note_type: note_type.name.clone(),
                fields,
                tags,
                modified: Utc::now(),
            },
        );
        self.data.decks.insert(draft.deck.clone());
        for _ in 0..note_type.templates.max(1) {
            let card_id = self.data.allocate_id();
            self.data.cards.insert(
                card_id,
                Card {
                    id: card_id,
                    note_id,
                    deck: draft.deck.clone(),
                    state: CardState::New,
                    suspended: false,
                    due: None,
                },
            );
        }
        self.mark_dirty();
        Ok(note_id)
    }

    fn update_note(&mut self, id: NoteId, fields: &[(String, String)]) -> Result<(), StoreError> {
        let note = self
            .data
            .notes
            .get_mut(&id)
            .ok_or(StoreError::NoteNotFound(id))?;

        let mut updated = note.fields.clone();
        for (name, value) in fields {
            let Some(slot) = updated.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) else {
                return Err(StoreError::Storage(format!(
                    "note type '{}' has no field '{name}'",
                    note.note_type
                )));
            };
            slot.1 = value.clone();
        }
        if updated.first().is_none_or(|(_, v)| v.trim().is_empty()) {
            return Err(StoreError::Storage(format!(
                "first field of '{}' must not be empty",
                note.note_type
            )));
        }

        note.fields = updated;
        note.modified = Utc::now();
        self.mark_dirty();
        Ok(())
    }

    fn add_tags(&mut self, notes: &[NoteId], tags: &[String]) -> Result<usize, StoreError> {
        let mut touched = 0;
        for id in notes {
            let Some(note) = self.data.notes.get_mut(id) else {
                continue;
            };
            for tag in tags {
                if !note.has_tag(tag) {
                    note.tags.push(tag.clone());
                }
            }
            note.modified = Utc::now();
            touched += 1;
        }
        if touched > 0 {
            self.mark_dirty();
        }
        Ok(touched)
    }

    fn remove_tags(&mut self, notes: &[NoteId], tags: &[String]) -> Result<usize, StoreError> {
        let mut touched = 0;
        for id in notes {
            let Some(note) = self.data.notes.get_mut(id) else {
                continue;
            };
            note.tags
                .retain(|t| !tags.iter().any(|r| r.eq_ignore_ascii_case(t)));
            note.modified = Utc::now();
            touched += 1;
        }
        if touched > 0 {
            self.mark_dirty();
        }
        Ok(touched)
    }

    fn remove_notes(&mut self, notes: &[NoteId]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for id in notes {
            if self.data.notes.remove(id).is_some() {
                self.data.cards.retain(|_, card| card.note_id != *id);
                removed += 1;
            }
        }
        if removed > 0 {
            self.mark_dirty();
        }
        Ok(removed)
    }

    fn set_suspended(&mut self, cards: &[CardId], suspended: bool) -> Result<usize, StoreError> {
        let mut touched = 0;
        for id in cards {
            if let Some(card) = self.data.cards.get_mut(id) {
                card.suspended = suspended;
                touched += 1;
            }
        }
        if touched > 0 {
            self.mark_dirty();
        }
        Ok(touched)
    }

    fn move_cards(&mut self, cards: &[CardId], deck: &str) -> Result<usize, StoreError> {
        if deck.trim().is_empty() {
            return Err(StoreError::Storage("deck name must not be empty".into()));
        }
        let mut touched = 0;
        for id in cards {
            if let Some(card) = self.data.cards.get_mut(id) {
                card.deck = deck.to_string();
                touched += 1;
            }
        }
        if touched > 0 {
            self.data.decks.insert(deck.to_string());
            self.mark_dirty();
        }
        Ok(touched)
    }

    fn decks(&self) -> Result<Vec<DeckInfo>, StoreError> {
        Ok(self
            .data
            .decks
            .iter()
            .map(|name| {
                let cards: Vec<&Card> = self
                    .data
                    .cards
                    .values()
                    .filter(|c| &c.deck == name)
                    .collect();
                DeckInfo {
                    name: name.clone(),
                    card_count: cards.len(),
                    new_count: cards.iter().filter(|c| c.state == CardState::New).count(),
                }
            })
            .collect())
    }

    fn note_types(&self) -> Result<Vec<NoteTypeInfo>, StoreError> {
        Ok(self
            .data
            .note_types
            .iter()
            .map(|t| NoteTypeInfo {
                name: t.name.clone(),
                fields: t.fields.clone(),
            })
            .collect())
    }

    fn tags(&self) -> Result<Vec<TagInfo>, StoreError> {
        let mut seen: BTreeMap<String, TagInfo> = BTreeMap::new();
        for tag in self.data.notes.values().flat_map(|note| &note.tags) {
            seen.entry(tag.to_lowercase())
                .or_insert_with(|| TagInfo {
                    name: tag.clone(),
                    note_count: 0,
                })
                .note_count += 1;
        }
        Ok(seen.into_values().collect())
    }

    fn stats(&self) -> Result<CollectionStats, StoreError> {
        let now = Utc::now();
        let mut stats = CollectionStats {
            notes: self.data.notes.len(),
            cards: self.data.cards.len(),
            ..Default::default()
        };
        for card in self.data.cards.values() {
            if card.suspended {
                stats.suspended += 1;
                continue;
            }
            match card.state {
                CardState::New => stats.new += 1,
                CardState::Learning => stats.learning += 1,
                CardState::Review => stats.review += 1,
            }
            if card.state != CardState::New && card.due.is_some_and(|d| d <= now) {
                stats.due += 1;
            }
        }
        Ok(stats)
    }

    fn sync(&mut self, auth: &SyncAuth) -> Result<SyncStatus, StoreError> {
        if auth.hkey.trim().is_empty() {
            return Err(StoreError::SyncFailed("sync key is empty".into()));
        }
        let changed = match (self.data.modified, self.data.last_sync) {
            (Some(modified), Some(synced)) => modified > synced,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let now = Utc::now();
        self.data.last_sync = Some(now);
        if self.data.modified.is_none() {
            self.data.modified = Some(now);
        }
        self.dirty = true;
        if changed {
            Ok(SyncStatus::Synced)
        } else {
            Ok(SyncStatus::NoChanges)
        }
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        self.sink.persist(&self.data)?;
        self.dirty = false;
        Ok(())
    }
}
