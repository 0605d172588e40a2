//! Telegram channel adapter.
//!
//! Long-polls the Bot API `getUpdates` endpoint with reqwest and relays
//! text, photo and document messages. Replies go out through
//! `sendMessage`; attachments are fetched with `getFile`.

use async_trait::async_trait;
use deckhand_config::TelegramConfig;
use deckhand_core::channel::{Attachment, AttachmentKind, Channel, ChannelId, ChannelMessage};
use deckhand_core::error::ChannelError;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram channel adapter.
pub struct TelegramChannel {
    channel_id: ChannelId,
    api_base: String,
    bot_token: String,
    allowed_users: Vec<String>,
    poll_timeout_secs: u64,
    client: reqwest::Client,
    poller: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("api_base", &self.api_base)
            .field("bot_token", &"[REDACTED]")
            .field("allowed_users", &self.allowed_users)
            .finish()
    }
}

impl TelegramChannel {
    pub fn new(
        bot_token: impl Into<String>,
        allowed_users: Vec<String>,
        poll_timeout_secs: u64,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            // long polls hold the connection for poll_timeout_secs
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self {
            channel_id: ChannelId("telegram".into()),
            api_base: DEFAULT_API_BASE.into(),
            bot_token: bot_token.into(),
            allowed_users,
            poll_timeout_secs,
            client,
            poller: tokio::sync::Mutex::new(None),
        })
    }

    pub fn from_config(config: &TelegramConfig) -> Result<Self, ChannelError> {
        let token = config
            .bot_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ChannelError::NotConfigured(
                    "no bot token; set telegram.bot_token or TELEGRAM_BOT_TOKEN".into(),
                )
            })?;
        Self::new(token, config.allowed_users.clone(), config.poll_timeout_secs)
    }

    /// Point at another Bot API server (self-hosted, tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// Convert one `getUpdates` entry into a channel message.
    ///
    /// Returns `None` for updates that carry no message, no sender, or
    /// nothing we handle (stickers, edits, joins).
    pub fn parse_update(update: &Value) -> Option<ChannelMessage> {
        let message = update.get("message")?;
        let chat_id = message["chat"]["id"].as_i64()?;
        let from = message.get("from")?;
        let sender_id = from["id"].as_i64()?;
        let sender_name = from["username"]
            .as_str()
            .or_else(|| from["first_name"].as_str())
            .map(str::to_string);

        let mut attachments = Vec::new();
        if let Some(photo) = message["photo"].as_array().and_then(|sizes| sizes.last()) {
            attachments.push(Attachment {
                kind: AttachmentKind::Photo,
                file_ref: photo["file_id"].as_str()?.to_string(),
                filename: None,
                mime_type: Some("image/jpeg".into()),
                size_bytes: photo["file_size"].as_u64(),
            });
        }
        if let Some(doc) = message.get("document") {
            attachments.push(Attachment {
                kind: AttachmentKind::Document,
                file_ref: doc["file_id"].as_str()?.to_string(),
                filename: doc["file_name"].as_str().map(str::to_string),
                mime_type: doc["mime_type"].as_str().map(str::to_string),
                size_bytes: doc["file_size"].as_u64(),
            });
        }

        let content = message["text"]
            .as_str()
            .or_else(|| message["caption"].as_str())
            .unwrap_or("")
            .to_string();
        if content.is_empty() && attachments.is_empty() {
            return None;
        }

        Some(ChannelMessage {
            channel_id: ChannelId("telegram".into()),
            sender_id: sender_id.to_string(),
            sender_name,
            content,
            chat_id: chat_id.to_string(),
            message_id: message["message_id"].as_i64().map(|id| id.to_string()),
            attachments,
        })
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value, ChannelError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidPayload(format!("{method}: {e}")))?;
        if payload["ok"].as_bool() != Some(true) {
            return Err(ChannelError::DeliveryFailed {
                channel: "telegram".into(),
                reason: payload["description"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(payload["result"].clone())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        info!("Telegram channel starting (long polling)");
        let (tx, rx) = mpsc::channel(64);

        let client = self.client.clone();
        let url = self.method_url("getUpdates");
        let timeout = self.poll_timeout_secs;

        let handle = tokio::spawn(async move {
            let mut offset: i64 = 0;
            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": timeout,
                    "allowed_updates": ["message"],
                });
                let result = async {
                    client
                        .post(&url)
                        .json(&body)
                        .send()
                        .await?
                        .json::<Value>()
                        .await
                }
                .await;

                let payload = match result {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "getUpdates failed, retrying");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                        continue;
                    }
                };
                if payload["ok"].as_bool() != Some(true) {
                    warn!(description = %payload["description"], "getUpdates rejected");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }

                for update in payload["result"].as_array().into_iter().flatten() {
                    if let Some(id) = update["update_id"].as_i64() {
                        offset = offset.max(id + 1);
                    }
                    let Some(msg) = TelegramChannel::parse_update(update) else {
                        debug!("Skipping unsupported update");
                        continue;
                    };
                    if tx.send(Ok(msg)).await.is_err() {
                        return;
                    }
                }
            }
        });
        *self.poller.lock().await = Some(handle);
        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = json!({ "chat_id": chat_id, "text": content });
        if let Some(id) = reply_to.and_then(|r| r.parse::<i64>().ok()) {
            body["reply_to_message_id"] = json!(id);
        }
        self.call("sendMessage", body).await?;
        debug!(chat_id = %chat_id, content_len = content.len(), "Telegram message sent");
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> Result<(), ChannelError> {
        self.call(
            "sendChatAction",
            json!({ "chat_id": chat_id, "action": "typing" }),
        )
        .await?;
        Ok(())
    }

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError> {
        let file = self
            .call("getFile", json!({ "file_id": attachment.file_ref }))
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                file: attachment.file_ref.clone(),
                reason: e.to_string(),
            })?;
        let path = file["file_path"]
            .as_str()
            .ok_or_else(|| ChannelError::DownloadFailed {
                file: attachment.file_ref.clone(),
                reason: "getFile returned no file_path".into(),
            })?;
        let url = format!("{}/file/bot{}/{}", self.api_base, self.bot_token, path);
        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ChannelError::DownloadFailed {
                file: attachment.file_ref.clone(),
                reason: e.to_string(),
            })?
            .bytes()
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                file: attachment.file_ref.clone(),
                reason: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        if self.allowed_users.is_empty() {
            return false;
        }
        if self.allowed_users.iter().any(|u| u == "*") {
            return true;
        }
        self.allowed_users.iter().any(|u| u == sender_id)
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Telegram channel stopping");
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(allowed: &[&str]) -> TelegramChannel {
        TelegramChannel::new(
            "123:test-token",
            allowed.iter().map(|s| s.to_string()).collect(),
            30,
        )
        .unwrap()
    }

    #[test]
    fn channel_name_and_id() {
        let ch = channel(&["*"]);
        assert_eq!(ch.name(), "telegram");
        assert_eq!(ch.id().0, "telegram");
    }

    #[test]
    fn allowlist_wildcard() {
        assert!(channel(&["*"]).is_allowed("anyone"));
    }

    #[test]
    fn allowlist_specific() {
        let ch = channel(&["1001", "1002"]);
        assert!(ch.is_allowed("1001"));
        assert!(ch.is_allowed("1002"));
        assert!(!ch.is_allowed("666"));
    }

    #[test]
    fn allowlist_empty_denies() {
        assert!(!channel(&[]).is_allowed("anyone"));
    }

    #[test]
    fn from_config_requires_token() {
        let config = TelegramConfig::default();
        assert!(matches!(
            TelegramChannel::from_config(&config),
            Err(ChannelError::NotConfigured(_))
        ));
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", channel(&[]));
        assert!(!debug.contains("test-token"));
    }

    #[test]
    fn method_urls() {
        let ch = channel(&[]).with_api_base("http://localhost:8081/");
        assert_eq!(
            ch.method_url("sendMessage"),
            "http://localhost:8081/bot123:test-token/sendMessage"
        );
    }

    #[test]
    fn parse_text_update() {
        let update = json!({
            "update_id": 10,
            "message": {
                "message_id": 77,
                "from": {"id": 1001, "username": "learner", "first_name": "Lee"},
                "chat": {"id": 1001, "type": "private"},
                "text": "add 你好"
            }
        });
        let msg = TelegramChannel::parse_update(&update).unwrap();
        assert_eq!(msg.content, "add 你好");
        assert_eq!(msg.sender_id, "1001");
        assert_eq!(msg.sender_name.as_deref(), Some("learner"));
        assert_eq!(msg.chat_id, "1001");
        assert_eq!(msg.message_id.as_deref(), Some("77"));
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn parse_photo_takes_largest_size_and_caption() {
        let update = json!({
            "update_id": 11,
            "message": {
                "message_id": 78,
                "from": {"id": 1001, "first_name": "Lee"},
                "chat": {"id": -500},
                "caption": "#menu",
                "photo": [
                    {"file_id": "small", "file_size": 100},
                    {"file_id": "large", "file_size": 9000}
                ]
            }
        });
        let msg = TelegramChannel::parse_update(&update).unwrap();
        assert_eq!(msg.content, "#menu");
        assert_eq!(msg.chat_id, "-500");
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].kind, AttachmentKind::Photo);
        assert_eq!(msg.attachments[0].file_ref, "large");
        assert_eq!(msg.attachments[0].size_bytes, Some(9000));
    }

    #[test]
    fn parse_document() {
        let update = json!({
            "update_id": 12,
            "message": {
                "message_id": 79,
                "from": {"id": 1001},
                "chat": {"id": 1001},
                "document": {
                    "file_id": "doc1",
                    "file_name": "export.json",
                    "mime_type": "application/json"
                }
            }
        });
        let msg = TelegramChannel::parse_update(&update).unwrap();
        assert!(msg.content.is_empty());
        assert_eq!(msg.attachments[0].kind, AttachmentKind::Document);
        assert_eq!(msg.attachments[0].filename.as_deref(), Some("export.json"));
    }

    #[test]
    fn unsupported_updates_are_skipped() {
        assert!(TelegramChannel::parse_update(&json!({"update_id": 1})).is_none());
        let sticker = json!({
            "update_id": 2,
            "message": {"message_id": 1, "from": {"id": 1}, "chat": {"id": 1}, "sticker": {}}
        });
        assert!(TelegramChannel::parse_update(&sticker).is_none());
    }
}
