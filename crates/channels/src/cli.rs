//! CLI channel: interactive terminal chat.
//!
//! Reads lines from stdin and prints replies to stdout. A line of the form
//! `/attach <path> [caption]` sends a local file as a photo (by image
//! extension) or a document.

use async_trait::async_trait;
use deckhand_core::channel::{Attachment, AttachmentKind, Channel, ChannelId, ChannelMessage};
use deckhand_core::error::ChannelError;
use std::path::Path;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub const CLI_CHAT_ID: &str = "cli_session";

const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// Interactive CLI channel for terminal-based chat.
pub struct CliChannel {
    id: ChannelId,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            id: ChannelId("cli".into()),
        }
    }

    /// Turn one input line into a message. `None` for blank lines.
    pub fn parse_line(line: &str) -> Option<ChannelMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let mut msg = ChannelMessage::text("cli", CLI_CHAT_ID, line);
        msg.sender_id = "local_user".into();
        msg.sender_name = Some("User".into());

        if let Some(rest) = line.strip_prefix("/attach ") {
            let rest = rest.trim();
            let (path, caption) = rest.split_once(' ').unwrap_or((rest, ""));
            msg.content = caption.trim().to_string();
            msg.attachments.push(local_attachment(path));
        }
        Some(msg)
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn local_attachment(path: &str) -> Attachment {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    let image_type = match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    };
    Attachment {
        kind: if image_type.is_some() {
            AttachmentKind::Photo
        } else {
            AttachmentKind::Document
        },
        file_ref: path.to_string(),
        filename: Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string),
        mime_type: image_type.map(str::to_string),
        size_bytes: std::fs::metadata(path).ok().map(|m| m.len()),
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn max_message_len(&self) -> usize {
        usize::MAX
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let reader = BufReader::new(io::stdin());
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if EXIT_COMMANDS.contains(&line.trim()) {
                            break;
                        }
                        let Some(msg) = CliChannel::parse_line(&line) else {
                            continue;
                        };
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(
        &self,
        _chat_id: &str,
        content: &str,
        _reply_to: Option<&str>,
    ) -> Result<(), ChannelError> {
        println!("{content}\n");
        Ok(())
    }

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError> {
        tokio::fs::read(&attachment.file_ref)
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                file: attachment.file_ref.clone(),
                reason: e.to_string(),
            })
    }

    fn is_allowed(&self, _sender_id: &str) -> bool {
        true // local user
    }
}
