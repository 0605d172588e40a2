//! Message intake.
//!
//! Every inbound message runs in its own task and holds its session lock
//! for the whole of its handling. Routing order:
//!
//! 1. attachments: documents are parsed as payloads, photos go to the turn loop
//! 2. commands (`/cancel`, `/status`, ...)
//! 3. text: fragment reassembler, then the pending-action gate, then the turn loop

use crate::confirm::{ConfirmationGate, Resolution};
use crate::executor::ToolGateway;
use crate::loop_runner::{TerminalOutcome, TurnLoop};
use crate::prompt::system_prompt;
use crate::reassembler::{Intake, Reassembler, ReassemblyRules, TimeoutReporter};
use crate::session::{Session, SessionHandle, SessionStore};
use crate::snapshot::PayloadProcessor;
use async_trait::async_trait;
use deckhand_audit::ChangeLog;
use deckhand_config::AppConfig;
use deckhand_core::channel::{Attachment, AttachmentKind, Channel, ChannelMessage};
use deckhand_core::collection::KnowledgeStore;
use deckhand_core::error::ChannelError;
use deckhand_core::message::{ConversationId, Role, Segment, Turn};
use deckhand_core::provider::Provider;
use deckhand_tools::{ToolSettings, default_catalog};
use regex_lite::Regex;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

const LOG_ENTRIES: usize = 20;
const IGNORED_TAGS: &[&str] = &["card", "anki"];
const PHOTO_INSTRUCTION: &str =
    "Read the Chinese words in this image and propose them as vocabulary cards.";

const WELCOME: &str = "Deckhand\n\n\
Send me a message and I'll turn it into flashcards.\n\n\
Examples:\n  \
学习: a Chinese vocabulary card\n  \
mitochondria is the powerhouse of the cell: a front/back card\n  \
学习 #hsk4: a vocabulary card with an extra tag\n  \
a photo of Chinese text: pick words to add\n  \
a JSON progress export: snapshot analysis\n\n\
Commands:\n  \
/status: card counts\n  \
/decks: list decks\n  \
/log: recent changes\n  \
/cancel: clear pending confirmations and buffers\n  \
/help: usage guide";

const HELP: &str = "Usage\n\n\
Send text and I'll create a card. Chinese words become vocabulary cards; \
anything else becomes a front/back card. You can also ask me to search, tag, \
suspend, move or delete cards.\n\n\
Every add or delete is shown to you first. Reply yes/no (or tag/new/skip for \
duplicates, or numbers like 1,3 for word lists).\n\n\
Add #tags to a message to tag the cards it creates.\n\n\
Large JSON exports can be pasted across several messages or sent as a file.";

/// Relays reassembly timeouts to the chat the fragments came from.
struct ChannelReporter {
    channel: Arc<dyn Channel>,
}

#[async_trait]
impl TimeoutReporter for ChannelReporter {
    async fn report(&self, conversation: &ConversationId, message: String) {
        if let Err(e) = self.channel.send_chunked(&conversation.0, &message).await {
            warn!(conversation_id = %conversation, error = %e, "Failed to report payload timeout");
        }
    }
}

static HASHTAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"#(\w+)").ok());
static HASHTAG_WITH_SPACE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\s*#\w+").ok());

/// Hashtags in `text` (minus the ignored ones) and the text without them.
pub fn split_hashtags(text: &str) -> (String, Vec<String>) {
    let (Some(tag), Some(strip)) = (HASHTAG.as_ref(), HASHTAG_WITH_SPACE.as_ref()) else {
        return (text.trim().to_string(), Vec::new());
    };
    let mut tags: Vec<String> = Vec::new();
    for cap in tag.captures_iter(text) {
        let name = &cap[1];
        if !IGNORED_TAGS.contains(&name.to_lowercase().as_str())
            && !tags.iter().any(|t| t.eq_ignore_ascii_case(name))
        {
            tags.push(name.to_string());
        }
    }
    let clean = strip.replace_all(text, "").trim().to_string();
    (clean, tags)
}

/// Media type of an image, from its bytes first, then its declared type or
/// file extension.
pub fn image_media_type(bytes: &[u8], attachment: &Attachment) -> String {
    let sniffed = if bytes.starts_with(b"\x89PNG") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    };
    if let Some(media) = sniffed {
        return media.into();
    }
    if let Some(mime) = attachment.mime_type.as_deref().filter(|m| m.starts_with("image/")) {
        return mime.into();
    }
    let ext = attachment
        .filename
        .as_deref()
        .and_then(|f| Path::new(f).extension())
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
    .into()
}

/// The chat-facing assistant.
pub struct Assistant {
    channel: Arc<dyn Channel>,
    sessions: SessionStore,
    turn_loop: TurnLoop,
    gate: ConfirmationGate,
    reassembler: Reassembler,
    payloads: PayloadProcessor,
    gateway: ToolGateway,
}

impl Assistant {
    pub fn new(
        config: &AppConfig,
        channel: Arc<dyn Channel>,
        provider: Arc<dyn Provider>,
        store: Arc<dyn KnowledgeStore>,
        changes: Arc<ChangeLog>,
    ) -> Self {
        let settings = ToolSettings {
            default_deck: config.collection.default_deck.clone(),
            vocab_note_type: config.collection.vocab_note_type.clone(),
            assistant_tag: config.collection.assistant_tag.clone(),
            language_tag: config.collection.language_tag.clone(),
            auth_path: config.auth_path(),
        };
        let gateway = ToolGateway::new(
            Arc::new(default_catalog()),
            Arc::clone(&store),
            changes,
            settings.clone(),
        );
        let turn_loop = TurnLoop::new(provider, gateway.clone(), system_prompt(&settings))
            .with_config(config);
        let reassembler = Reassembler::new(
            ReassemblyRules::from(&config.reassembly),
            Arc::new(ChannelReporter {
                channel: Arc::clone(&channel),
            }),
        );
        let payloads = PayloadProcessor::new(
            config.snapshots_dir(),
            store,
            config.collection.vocab_note_type.clone(),
            config.collection.known_words_tag.clone(),
        );

        Self {
            channel,
            sessions: SessionStore::new(),
            turn_loop,
            gate: ConfirmationGate::new(gateway.clone()),
            reassembler,
            payloads,
            gateway,
        }
    }

    /// Replace the reassembly thresholds.
    pub fn with_reassembly_rules(mut self, rules: ReassemblyRules) -> Self {
        self.reassembler = Reassembler::new(
            rules,
            Arc::new(ChannelReporter {
                channel: Arc::clone(&self.channel),
            }),
        );
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Listen on the channel and handle each message in its own task.
    pub async fn run(self: Arc<Self>) -> Result<(), ChannelError> {
        let mut inbound = self.channel.start().await?;
        info!(channel = %self.channel.name(), "Assistant listening");
        while let Some(item) = inbound.recv().await {
            match item {
                Ok(msg) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.handle(msg).await });
                }
                Err(e) => warn!(error = %e, "Channel error"),
            }
        }
        info!(channel = %self.channel.name(), "Channel closed");
        Ok(())
    }

    /// Handle one inbound message end to end.
    pub async fn handle(&self, msg: ChannelMessage) {
        if !self.channel.is_allowed(&msg.sender_id) {
            warn!(sender_id = %msg.sender_id, "Dropping message from unauthorized sender");
            return;
        }
        let conversation = ConversationId::from(msg.chat_id.as_str());
        let handle = self.sessions.get_or_create(&conversation);
        let mut session = handle.lock().await;

        let Some(reply) = self.route(&conversation, &handle, &mut session, &msg).await else {
            return;
        };
        if let Err(e) = self.channel.send_chunked(&msg.chat_id, &reply).await {
            warn!(conversation_id = %conversation, error = %e, "Failed to deliver reply");
        }
    }

    async fn route(
        &self,
        conversation: &ConversationId,
        handle: &SessionHandle,
        session: &mut Session,
        msg: &ChannelMessage,
    ) -> Option<String> {
        if let Some(attachment) = msg.attachments.first() {
            return Some(match attachment.kind {
                AttachmentKind::Document => {
                    self.on_document(conversation, session, attachment).await
                }
                AttachmentKind::Photo => {
                    self.on_photo(conversation, session, attachment, &msg.content)
                        .await
                }
            });
        }

        let text = msg.content.as_str();
        if let Some(command) = text.trim().strip_prefix('/') {
            let name = command
                .split_whitespace()
                .next()
                .unwrap_or("")
                .split('@')
                .next()
                .unwrap_or("");
            if let Some(reply) = self.on_command(conversation, session, name).await {
                return Some(reply);
            }
        }

        match self.reassembler.offer(conversation, handle, session, text) {
            Intake::Complete(value) => {
                session.pending = None;
                return Some(self.process_payload(session, &value).await);
            }
            Intake::Buffering => return None,
            Intake::PassThrough => {}
        }

        if let Resolution::Resolved(summary) = self.gate.resolve(conversation, session, text).await
        {
            return Some(summary);
        }

        let (clean, tags) = split_hashtags(text);
        if clean.is_empty() {
            return Some("Please send some text to create a card from.".into());
        }
        let request = with_tag_hint(clean, &tags);
        self.typing(&msg.chat_id).await;
        let outcome = self
            .turn_loop
            .run(conversation, session, Turn::user_text(request))
            .await;
        Some(finish(session, outcome))
    }

    /// Known commands produce a reply; anything else is treated as text.
    async fn on_command(
        &self,
        conversation: &ConversationId,
        session: &mut Session,
        name: &str,
    ) -> Option<String> {
        debug!(conversation_id = %conversation, command = name, "Command");
        let reply = match name {
            "start" => WELCOME.to_string(),
            "help" => HELP.to_string(),
            "cancel" => {
                let cleared = session.clear();
                if cleared.is_empty() {
                    "Nothing pending.".to_string()
                } else {
                    info!(conversation_id = %conversation, ?cleared, "Session cleared");
                    format!("Cleared: {}", cleared.join(", "))
                }
            }
            "status" => self.status().await,
            "decks" => self.decks().await,
            "log" => self.recent_changes(),
            _ => return None,
        };
        Some(reply)
    }

    async fn status(&self) -> String {
        let tag = &self.gateway.settings().assistant_tag;
        let out = self
            .gateway
            .execute("collection_stats", json!({ "query": format!("tag:{tag}") }))
            .await;
        if out.is_error {
            return format!(
                "Could not read the collection: {}",
                out.payload["error"].as_str().unwrap_or("unknown error")
            );
        }
        let stats = &out.payload["collection"];
        let count = |v: &Value| v.as_u64().unwrap_or(0);
        format!(
            "Total cards: {}\nNew: {} | Learning: {} | Due: {}\n\nNotes tagged '{tag}': {}",
            count(&stats["cards"]),
            count(&stats["new"]),
            count(&stats["learning"]),
            count(&stats["due"]),
            count(&out.payload["matching"]["notes"]),
        )
    }

    async fn decks(&self) -> String {
        let out = self.gateway.execute("list_decks", json!({})).await;
        if out.is_error {
            return format!(
                "Could not read the collection: {}",
                out.payload["error"].as_str().unwrap_or("unknown error")
            );
        }
        let lines: Vec<String> = out.payload["decks"]
            .as_array()
            .map(|decks| {
                decks
                    .iter()
                    .map(|d| {
                        format!(
                            "  {} ({})",
                            d["name"].as_str().unwrap_or("?"),
                            d["card_count"].as_u64().unwrap_or(0)
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        if lines.is_empty() {
            "No decks.".into()
        } else {
            format!("Decks:\n{}", lines.join("\n"))
        }
    }

    fn recent_changes(&self) -> String {
        match self.gateway.changes().recent(LOG_ENTRIES) {
            Ok(entries) if entries.is_empty() => "No changes logged yet.".into(),
            Ok(entries) => entries
                .iter()
                .map(|e| e.summary())
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Could not read the change log: {e}"),
        }
    }

    async fn on_document(
        &self,
        conversation: &ConversationId,
        session: &mut Session,
        attachment: &Attachment,
    ) -> String {
        let name = attachment
            .filename
            .clone()
            .unwrap_or_else(|| attachment.file_ref.clone());
        info!(
            conversation_id = %conversation,
            file = %name,
            mime = ?attachment.mime_type,
            size = ?attachment.size_bytes,
            "Document received"
        );
        self.abandon(conversation, session);
        self.typing(&conversation.0).await;

        let bytes = match self.channel.download(attachment).await {
            Ok(bytes) => bytes,
            Err(e) => return format!("Could not download {name}: {e}"),
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => self.process_payload(session, &value).await,
            Err(e) => format!("Could not parse {name} as JSON: {e}"),
        }
    }

    async fn on_photo(
        &self,
        conversation: &ConversationId,
        session: &mut Session,
        attachment: &Attachment,
        caption: &str,
    ) -> String {
        info!(conversation_id = %conversation, size = ?attachment.size_bytes, "Photo received");
        self.abandon(conversation, session);
        self.typing(&conversation.0).await;

        let bytes = match self.channel.download(attachment).await {
            Ok(bytes) => bytes,
            Err(e) => return format!("Could not download the photo: {e}"),
        };
        let media_type = image_media_type(&bytes, attachment);
        let (clean, tags) = split_hashtags(caption);
        let instruction = if clean.is_empty() {
            PHOTO_INSTRUCTION.to_string()
        } else {
            clean
        };
        let turn = Turn::new(
            Role::User,
            vec![
                Segment::image(media_type, bytes),
                Segment::text(with_tag_hint(instruction, &tags)),
            ],
        );
        let outcome = self.turn_loop.run(conversation, session, turn).await;
        finish(session, outcome)
    }

    /// Drop a pending action and any buffered fragments before a new upload.
    fn abandon(&self, conversation: &ConversationId, session: &mut Session) {
        if let Some(action) = session.pending.take() {
            info!(conversation_id = %conversation, kind = action.kind(), "Pending action abandoned by upload");
        }
        session.fragments.clear();
    }

    async fn process_payload(&self, session: &mut Session, value: &Value) -> String {
        match self.payloads.process(value).await {
            Ok(report) => match report.confirmation {
                Some(action) => {
                    let text = format!("{}\n\n{}", report.text, action.prompt());
                    session.pending = Some(action);
                    text
                }
                None => report.text,
            },
            Err(e) => {
                warn!(error = %e, "Payload analysis failed");
                format!("Analysis failed: {e}")
            }
        }
    }

    async fn typing(&self, chat_id: &str) {
        if let Err(e) = self.channel.send_typing(chat_id).await {
            debug!(error = %e, "Typing indicator failed");
        }
    }
}

fn with_tag_hint(mut text: String, tags: &[String]) -> String {
    if !tags.is_empty() {
        text.push_str(&format!("\n\n(Extra tags: {})", tags.join(", ")));
    }
    text
}

/// The reply for a turn-loop outcome, with any staged question appended.
fn finish(session: &Session, outcome: TerminalOutcome) -> String {
    let text = outcome.text().to_string();
    match &session.pending {
        Some(action) if !outcome.is_failed() => format!("{text}\n\n{}", action.prompt()),
        _ => text,
    }
}
