//! Flashcard collection backends for Deckhand.

pub mod auth;
pub mod data;
pub mod file_backend;
pub mod in_memory;
pub mod query;

pub use auth::{clear_auth, load_auth, save_auth};
pub use data::{BASIC_NOTE_TYPE, CollectionData};
pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;
pub use query::Query;
