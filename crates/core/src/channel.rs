//! Channel trait: the abstraction over chat transports.
//!
//! A Channel connects Deckhand to a messaging platform (Telegram, or the
//! local terminal). It receives messages from users, downloads their
//! attachments, and sends replies back.

use crate::error::ChannelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Telegram's hard limit on a single text message.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

/// Unique identifier for a channel instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// The channel this message belongs to
    pub channel_id: ChannelId,

    /// Sender identifier (platform-specific user ID)
    pub sender_id: String,

    /// Human-readable sender name (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    /// The text content, or the caption for media
    pub content: String,

    /// The chat identifier within the channel
    pub chat_id: String,

    /// Platform message id, used for threading replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Attachments (photos, documents)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChannelMessage {
    /// A plain text message, mostly useful for tests and the terminal channel.
    pub fn text(channel: &str, chat_id: &str, content: impl Into<String>) -> Self {
        Self {
            channel_id: ChannelId(channel.into()),
            sender_id: chat_id.into(),
            sender_name: None,
            content: content.into(),
            chat_id: chat_id.into(),
            message_id: None,
            attachments: vec![],
        }
    }
}

/// An attachment in a channel message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Type of attachment
    pub kind: AttachmentKind,

    /// Platform file reference (Telegram file_id, or a local path)
    pub file_ref: String,

    /// Optional filename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// File size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Photo,
    Document,
}

/// The core Channel trait.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "telegram", "cli").
    fn name(&self) -> &str;

    /// Unique ID for this channel instance.
    fn id(&self) -> &ChannelId;

    /// Longest text a single `send` may carry.
    fn max_message_len(&self) -> usize {
        TELEGRAM_MAX_MESSAGE_LEN
    }

    /// Start listening for incoming messages.
    async fn start(
        &self,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError>;

    /// Send one message to a chat. `content` must fit `max_message_len`.
    async fn send(
        &self,
        chat_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Send text of any length, split at line boundaries.
    async fn send_chunked(&self, chat_id: &str, content: &str) -> Result<(), ChannelError> {
        for chunk in chunk_text(content, self.max_message_len()) {
            self.send(chat_id, &chunk, None).await?;
        }
        Ok(())
    }

    /// Send a typing indicator (if the platform supports it).
    async fn send_typing(&self, _chat_id: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Fetch the bytes behind an attachment.
    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError>;

    /// Check if a sender is allowed (allowlist check).
    fn is_allowed(&self, sender_id: &str) -> bool;

    /// Stop the channel gracefully.
    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Split `text` into chunks of at most `max` bytes.
///
/// Each cut is made at the last newline before the limit when there is one,
/// otherwise at the last char boundary. Newlines at the start of a
/// following chunk are dropped.
pub fn chunk_text(text: &str, max: usize) -> Vec<String> {
    if text.len() <= max || max == 0 {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.len() <= max {
            chunks.push(rest.to_string());
            break;
        }
        let mut limit = max;
        while limit > 0 && !rest.is_char_boundary(limit) {
            limit -= 1;
        }
        if limit == 0 {
            limit = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let cut = match rest[..limit].rfind('\n') {
            Some(pos) if pos > 0 => pos,
            _ => limit,
        };
        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start_matches('\n');
    }
    chunks
}
