//! Pending actions: operations staged until the user confirms them.
//!
//! A pending action records the exact operation that will run on
//! confirmation (name plus arguments), so committing it is a replay through
//! the gateway with the confirmation flag set.

use crate::collection::NoteId;
use serde::{Deserialize, Serialize};

/// The operation that changes an existing note's fields.
pub const EDIT_NOTE: &str = "edit_note";

/// A staged operation invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedCall {
    pub operation: String,
    pub arguments: serde_json::Value,
}

impl StagedCall {
    pub fn new(operation: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            arguments,
        }
    }

    /// Whether this call changes an existing note rather than adding one.
    pub fn is_edit(&self) -> bool {
        self.operation == EDIT_NOTE
    }
}

/// One word extracted from an image, offered for card creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedWord {
    /// Short human label ("好 (hǎo) good")
    pub label: String,

    /// The add operation for this word
    pub call: StagedCall,

    /// Existing notes that already cover this word
    #[serde(default)]
    pub duplicate_of: Vec<NoteId>,
}

impl ProposedWord {
    pub fn is_duplicate(&self) -> bool {
        !self.duplicate_of.is_empty()
    }
}

/// An action awaiting the user's next reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingAction {
    /// A card preview is shown; the user must approve the add (or the
    /// edit, for [`EDIT_NOTE`] calls).
    CardConfirm { call: StagedCall, preview: String },

    /// The requested card already exists; create anyway, tag the existing
    /// notes, or skip.
    DuplicateConfirm {
        call: StagedCall,
        existing: Vec<NoteId>,
        /// Tags applied to existing notes on "tag"
        tags: Vec<String>,
        preview: String,
    },

    /// Words read from an image; pick all, some by number, or none.
    ImageWordConfirm { words: Vec<ProposedWord> },

    /// A bulk delete waiting for an explicit yes.
    DeleteConfirm { note_ids: Vec<NoteId>, preview: String },

    /// Vocabulary notes built from mastered characters, to be tagged.
    KnownWordsTagConfirm {
        note_ids: Vec<NoteId>,
        tag: String,
        preview: String,
    },
}

impl PendingAction {
    /// Short kind name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PendingAction::CardConfirm { .. } => "card_confirm",
            PendingAction::DuplicateConfirm { .. } => "duplicate_confirm",
            PendingAction::ImageWordConfirm { .. } => "image_word_confirm",
            PendingAction::DeleteConfirm { .. } => "delete_confirm",
            PendingAction::KnownWordsTagConfirm { .. } => "known_words_tag_confirm",
        }
    }

    /// The question shown to the user.
    pub fn prompt(&self) -> String {
        match self {
            PendingAction::CardConfirm { call, preview } if call.is_edit() => {
                format!("{preview}\n\nApply this edit? (yes/no)")
            }
            PendingAction::CardConfirm { preview, .. } => {
                format!("{preview}\n\nAdd this card? (yes/no)")
            }
            PendingAction::DuplicateConfirm {
                preview, existing, ..
            } => format!(
                "{preview}\n\nFound {} existing note(s). Reply \"tag\" to tag them, \
                 \"new\" to create anyway, or \"skip\".",
                existing.len()
            ),
            PendingAction::ImageWordConfirm { words } => {
                let mut lines = vec![format!("Found {} word(s):", words.len())];
                for (i, word) in words.iter().enumerate() {
                    let marker = if word.is_duplicate() { " (already exists)" } else { "" };
                    lines.push(format!("{}. {}{}", i + 1, word.label, marker));
                }
                lines.push(String::new());
                lines.push("Reply \"all\", numbers like \"1,3\", or \"no\".".into());
                lines.join("\n")
            }
            PendingAction::DeleteConfirm { preview, note_ids } => format!(
                "{preview}\n\nDelete {} note(s)? This cannot be undone. (yes/no)",
                note_ids.len()
            ),
            PendingAction::KnownWordsTagConfirm {
                preview,
                note_ids,
                tag,
            } => format!(
                "{preview}\n\nTag {} note(s) with #{tag}? (yes/no)",
                note_ids.len()
            ),
        }
    }
}
