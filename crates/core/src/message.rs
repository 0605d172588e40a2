//! Turn and history domain types.
//!
//! A conversation is an ordered list of [`Turn`]s. Each turn is authored by
//! the user or the assistant and carries one or more [`Segment`]s: plain
//! text, images, operation invocations (assistant side) and their results
//! (user side).
//!
//! The history must keep invocations and results paired: every invocation
//! in an assistant turn is answered, in the very next user turn, by exactly
//! one result carrying the same id, in the same order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One piece of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        #[serde(skip)]
        data: Vec<u8>,
    },
    ToolInvocation(ToolInvocation),
    ToolResult {
        invocation_id: String,
        payload: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text { text: text.into() }
    }

    pub fn image(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Segment::Image {
            media_type: media_type.into(),
            data,
        }
    }
}

/// An operation the reasoning service asked us to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Opaque id assigned by the reasoning service
    pub id: String,

    /// Operation name from the catalog
    pub name: String,

    /// Arguments, expected to match the operation's schema
    pub arguments: serde_json::Value,
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub segments: Vec<Segment>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, segments: Vec<Segment>) -> Self {
        Self {
            role,
            segments,
            timestamp: Utc::now(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Segment::text(text)])
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Segment::text(text)])
    }

    /// All text segments joined with newlines.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.segments.iter().filter_map(|s| match s {
            Segment::ToolInvocation(inv) => Some(inv),
            _ => None,
        })
    }

    /// Ids of the results carried by this turn, in order.
    pub fn result_ids(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::ToolResult { invocation_id, .. } => Some(invocation_id.as_str()),
            _ => None,
        })
    }

    pub fn has_results(&self) -> bool {
        self.result_ids().next().is_some()
    }
}

/// A broken invocation/result pairing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingViolation {
    #[error("turn {turn} has invocations but no following user turn")]
    Unanswered { turn: usize },

    #[error("turn {turn} results {found:?} do not match invocations {expected:?}")]
    Mismatch {
        turn: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("turn {turn} carries results that answer no invocation")]
    Orphaned { turn: usize },
}

/// The ordered turns of one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Drop every turn after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.turns.truncate(len);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Trim leading turns so at most `max` remain.
    ///
    /// The first kept turn is always a user turn without results, so an
    /// invocation is never separated from its answer. When no such cut
    /// point exists inside the window, nothing is trimmed.
    pub fn trim_front(&mut self, max: usize) -> usize {
        if self.turns.len() <= max {
            return 0;
        }
        let earliest = self.turns.len() - max;
        let cut = (earliest..self.turns.len())
            .find(|&i| self.turns[i].role == Role::User && !self.turns[i].has_results());
        match cut {
            Some(cut) => {
                self.turns.drain(..cut);
                cut
            }
            None => 0,
        }
    }

    /// Verify that invocations and results are paired one-to-one, in order.
    pub fn check_pairing(&self) -> Result<(), PairingViolation> {
        for (i, turn) in self.turns.iter().enumerate() {
            let expected: Vec<String> = turn.invocations().map(|inv| inv.id.clone()).collect();

            if turn.role == Role::User && turn.has_results() {
                let answers_previous = i > 0
                    && self.turns[i - 1].role == Role::Assistant
                    && self.turns[i - 1].invocations().next().is_some();
                if !answers_previous {
                    return Err(PairingViolation::Orphaned { turn: i });
                }
            }

            if expected.is_empty() {
                continue;
            }
            let Some(next) = self.turns.get(i + 1) else {
                return Err(PairingViolation::Unanswered { turn: i });
            };
            let found: Vec<String> = next.result_ids().map(str::to_string).collect();
            if next.role != Role::User || found != expected {
                return Err(PairingViolation::Mismatch {
                    turn: i,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }
}
