//! Per-conversation state.

use crate::reassembler::FragmentBuffer;
use deckhand_core::message::{ConversationId, History};
use deckhand_core::pending::PendingAction;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Everything remembered about one conversation.
#[derive(Debug, Default)]
pub struct Session {
    pub history: History,
    /// At most one action awaiting the user's reply
    pub pending: Option<PendingAction>,
    pub fragments: FragmentBuffer,
}

impl Session {
    /// Reset the session. Returns the names of the parts that held state.
    pub fn clear(&mut self) -> Vec<&'static str> {
        let mut cleared = Vec::new();
        if self.pending.take().is_some() {
            cleared.push("pending confirmation");
        }
        if self.fragments.clear() {
            cleared.push("fragment buffer");
        }
        if !self.history.is_empty() {
            self.history.clear();
            cleared.push("conversation history");
        }
        cleared
    }
}

/// A session behind its own lock.
pub type SessionHandle = Arc<AsyncMutex<Session>>;

/// Conversation id → session. Sessions are created lazily and never evicted.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<ConversationId, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session for `id`, created on first use.
    ///
    /// The map lock is held only for the lookup; callers lock the returned
    /// handle for the duration of one event.
    pub fn get_or_create(&self, id: &ConversationId) -> SessionHandle {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(id.clone()).or_insert_with(|| {
            debug!(conversation_id = %id, "Creating session");
            Arc::new(AsyncMutex::new(Session::default()))
        }))
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_core::message::Turn;
    use deckhand_core::pending::StagedCall;
    use serde_json::json;

    #[test]
    fn same_id_shares_a_session() {
        let store = SessionStore::new();
        let a = store.get_or_create(&ConversationId::from("42"));
        let b = store.get_or_create(&ConversationId::from("42"));
        let c = store.get_or_create(&ConversationId::from("43"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn clear_reports_what_was_held() {
        let mut session = Session::default();
        assert!(session.clear().is_empty());

        session.history.push(Turn::user_text("hi"));
        session.pending = Some(deckhand_core::pending::PendingAction::CardConfirm {
            call: StagedCall::new("add_basic_card", json!({"front": "a", "back": "b"})),
            preview: "a / b".into(),
        });
        assert_eq!(
            session.clear(),
            vec!["pending confirmation", "conversation history"]
        );
        assert!(session.pending.is_none());
        assert!(session.history.is_empty());
    }
}
