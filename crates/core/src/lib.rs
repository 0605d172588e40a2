//! # Deckhand Core
//!
//! Domain types, traits, and error definitions for the Deckhand flashcard
//! assistant. This crate has **no framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (reasoning service, chat transport,
//! flashcard collection) is a trait here. Implementations live in their
//! respective crates, so tests can swap in scripted stand-ins.

pub mod channel;
pub mod collection;
pub mod error;
pub mod message;
pub mod pending;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use channel::{Attachment, AttachmentKind, Channel, ChannelId, ChannelMessage, chunk_text};
pub use collection::{
    Card, CardId, CardState, Collection, CollectionGuard, CollectionStats, DeckInfo,
    KnowledgeStore, Note, NoteDraft, NoteId, NoteTypeInfo, SyncAuth, SyncStatus,
};
pub use error::{ChannelError, Error, ProviderError, Result, StoreError, ToolError};
pub use message::{ConversationId, History, PairingViolation, Role, Segment, ToolInvocation, Turn};
pub use pending::{PendingAction, ProposedWord, StagedCall};
pub use provider::{Provider, ReasoningRequest, ReasoningResponse, ToolDefinition, Usage};
