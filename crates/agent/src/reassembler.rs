//! Reassembly of JSON payloads that arrive split across chat messages.
//!
//! Chat transports cut long pastes into several messages. The reassembler
//! recognizes the start of a payload, buffers the pieces that follow and
//! hands the parsed value off as soon as the concatenation parses. When no
//! fragment has arrived for the debounce period, it gives up and reports
//! where parsing failed.
//!
//! Timer correctness rests on two rules: every (re)arm happens under the
//! session lock and gets a fresh token, and a timer that wakes must take the
//! session lock and find its own token still armed before it acts.

use crate::session::Session;
use async_trait::async_trait;
use deckhand_config::ReassemblyConfig;
use deckhand_core::message::ConversationId;
use regex_lite::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

static KEY_VALUE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""\w+":\s*[{\["\d]"#).ok());

/// How many payload indicators `text` shows.
///
/// One point each for: a `":` sequence, more than six quotes, more than
/// two braces, more than one bracket, and a `"key": value` pair.
pub fn indicator_score(text: &str) -> u32 {
    let quotes = text.matches('"').count();
    let braces = text.chars().filter(|c| matches!(c, '{' | '}')).count();
    let brackets = text.chars().filter(|c| matches!(c, '[' | ']')).count();
    let key_value = KEY_VALUE
        .as_ref()
        .is_some_and(|re| re.is_match(text));

    [
        text.contains("\":"),
        quotes > 6,
        braces > 2,
        brackets > 1,
        key_value,
    ]
    .into_iter()
    .filter(|hit| *hit)
    .count() as u32
}

/// Recognition thresholds.
#[derive(Debug, Clone)]
pub struct ReassemblyRules {
    pub min_start_chars: usize,
    pub min_fragment_chars: usize,
    pub indicator_threshold: u32,
    pub debounce: Duration,
}

impl From<&ReassemblyConfig> for ReassemblyRules {
    fn from(config: &ReassemblyConfig) -> Self {
        Self {
            min_start_chars: config.min_start_chars,
            min_fragment_chars: config.min_fragment_chars,
            indicator_threshold: config.indicator_threshold,
            debounce: Duration::from_millis(config.debounce_ms),
        }
    }
}

impl Default for ReassemblyRules {
    fn default() -> Self {
        Self::from(&ReassemblyConfig::default())
    }
}

impl ReassemblyRules {
    /// A message opening with `{` or `[` long enough to be a payload.
    fn opens_payload(&self, trimmed: &str) -> bool {
        (trimmed.starts_with('{') || trimmed.starts_with('['))
            && trimmed.chars().count() > self.min_start_chars
    }

    /// A long message that looks like a piece of a payload.
    fn looks_like_fragment(&self, trimmed: &str) -> bool {
        trimmed.chars().count() > self.min_fragment_chars
            && indicator_score(trimmed) >= self.indicator_threshold
    }
}

/// Per-session buffer of payload fragments.
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    fragments: Vec<String>,
    /// Token of the live timer; `None` when no timer is armed
    armed: Option<u64>,
    last_token: u64,
    timer: Option<JoinHandle<()>>,
}

impl FragmentBuffer {
    pub fn is_buffering(&self) -> bool {
        !self.fragments.is_empty()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    fn joined(&self) -> String {
        self.fragments.concat()
    }

    /// Drop all fragments and abort the timer. Returns whether anything was buffered.
    pub fn clear(&mut self) -> bool {
        let was_buffering = self.is_buffering();
        self.fragments.clear();
        self.armed = None;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        was_buffering
    }

    /// Whether `token` belongs to the timer that is currently armed.
    fn is_current(&self, token: u64) -> bool {
        self.armed == Some(token) && self.is_buffering()
    }

    /// Called from the firing timer itself: take the fragments without
    /// aborting the running task.
    fn expire(&mut self) -> String {
        let joined = self.joined();
        self.fragments.clear();
        self.armed = None;
        self.timer = None;
        joined
    }
}

/// What became of an incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Intake {
    /// Not part of a payload; process normally.
    PassThrough,
    /// A payload is complete.
    Complete(Value),
    /// Held back waiting for more fragments.
    Buffering,
}

/// Receives the diagnostic when a buffered payload times out.
#[async_trait]
pub trait TimeoutReporter: Send + Sync {
    async fn report(&self, conversation: &ConversationId, message: String);
}

/// Parse-failure text for an incomplete payload.
pub fn timeout_diagnostic(payload: &str) -> String {
    let chars = payload.chars().count();
    match serde_json::from_str::<Value>(payload) {
        Ok(_) => format!("Received {chars} chars of JSON."),
        Err(e) => {
            let line = e.line();
            let column = e.column();
            let full = e.to_string();
            let msg = full
                .rsplit_once(" at line ")
                .map_or(full.as_str(), |(head, _)| head);
            format!(
                "Received {chars} chars but JSON is incomplete. Error near line {line}, \
                 column {column} (char ~{}): {msg}. Try sending as a file attachment instead.",
                char_position(payload, line, column)
            )
        }
    }
}

/// Approximate char offset of a 1-based line/column position.
fn char_position(text: &str, line: usize, column: usize) -> usize {
    let before: usize = text
        .split('\n')
        .take(line.saturating_sub(1))
        .map(|l| l.chars().count() + 1)
        .sum();
    before + column
}

/// Applies the reassembly rules to a session's fragment buffer.
pub struct Reassembler {
    rules: ReassemblyRules,
    reporter: Arc<dyn TimeoutReporter>,
}

impl Reassembler {
    pub fn new(rules: ReassemblyRules, reporter: Arc<dyn TimeoutReporter>) -> Self {
        Self { rules, reporter }
    }

    /// Offer a text message to the buffer.
    ///
    /// `session` must be the locked contents of `handle`; the handle is
    /// what a debounce timer re-locks when it fires.
    pub fn offer(
        &self,
        conversation: &ConversationId,
        handle: &Arc<Mutex<Session>>,
        session: &mut Session,
        text: &str,
    ) -> Intake {
        let trimmed = text.trim();
        let buffer = &mut session.fragments;

        if buffer.is_buffering() {
            buffer.fragments.push(text.to_string());
            let combined = buffer.joined();
            if let Ok(value) = serde_json::from_str::<Value>(combined.trim()) {
                info!(
                    conversation_id = %conversation,
                    chars = combined.trim().chars().count(),
                    fragments = buffer.fragment_count(),
                    "Payload reassembled"
                );
                buffer.clear();
                return Intake::Complete(value);
            }

            // a complete payload of its own supersedes the stale buffer
            if self.rules.opens_payload(trimmed) {
                if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                    info!(conversation_id = %conversation, "New payload replaces buffered fragments");
                    buffer.clear();
                    return Intake::Complete(value);
                }
            }

            debug!(
                conversation_id = %conversation,
                chars = combined.chars().count(),
                "Payload still incomplete"
            );
            self.arm(conversation, handle, buffer);
            return Intake::Buffering;
        }

        let opens = self.rules.opens_payload(trimmed);
        if opens {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                return Intake::Complete(value);
            }
        }
        if opens || self.rules.looks_like_fragment(trimmed) {
            info!(
                conversation_id = %conversation,
                chars = trimmed.chars().count(),
                "Started payload buffer"
            );
            buffer.fragments.push(text.to_string());
            self.arm(conversation, handle, buffer);
            return Intake::Buffering;
        }

        Intake::PassThrough
    }

    /// Cancel the previous timer and start a new one with a fresh token.
    fn arm(
        &self,
        conversation: &ConversationId,
        handle: &Arc<Mutex<Session>>,
        buffer: &mut FragmentBuffer,
    ) {
        if let Some(old) = buffer.timer.take() {
            old.abort();
        }
        buffer.last_token += 1;
        let token = buffer.last_token;
        buffer.armed = Some(token);

        let handle = Arc::clone(handle);
        let reporter = Arc::clone(&self.reporter);
        let conversation = conversation.clone();
        let debounce = self.rules.debounce;

        buffer.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let payload = {
                let mut session = handle.lock().await;
                if !session.fragments.is_current(token) {
                    return;
                }
                session.fragments.expire()
            };
            let payload = payload.trim().to_string();
            info!(
                conversation_id = %conversation,
                chars = payload.chars().count(),
                "Payload buffer timed out"
            );
            reporter
                .report(&conversation, timeout_diagnostic(&payload))
                .await;
        }));
    }
}
