//! Shared test doubles for the agent's tests.

use async_trait::async_trait;
use deckhand_audit::ChangeLog;
use deckhand_collection::InMemoryStore;
use deckhand_core::channel::{Attachment, Channel, ChannelId, ChannelMessage};
use deckhand_core::error::{ChannelError, ProviderError};
use deckhand_core::message::{Segment, ToolInvocation};
use deckhand_core::provider::{Provider, ReasoningRequest, ReasoningResponse, Usage};
use deckhand_tools::{ToolSettings, default_catalog};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::executor::ToolGateway;

/// A provider that replays scripted responses and records every request.
///
/// Once the script runs out, `repeat` (if set) is returned forever;
/// otherwise the call fails.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ReasoningResponse, ProviderError>>>,
    repeat: Option<ReasoningResponse>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ReasoningResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn replies(responses: Vec<ReasoningResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    /// Answers every call with `response`.
    pub fn always(response: ReasoningResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: ReasoningRequest) -> Result<ReasoningResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        self.repeat
            .clone()
            .ok_or_else(|| ProviderError::Network("script exhausted".into()))
    }
}

pub fn text_response(text: &str) -> ReasoningResponse {
    ReasoningResponse {
        segments: vec![Segment::text(text)],
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
        model: "mock-model".into(),
        stop_reason: Some("end_turn".into()),
    }
}

/// A response carrying `calls` as invocations, ids `call_<index>_<name>`.
pub fn invocation_response(text: &str, calls: &[(&str, serde_json::Value)]) -> ReasoningResponse {
    let mut segments = Vec::new();
    if !text.is_empty() {
        segments.push(Segment::text(text));
    }
    segments.extend(calls.iter().enumerate().map(|(i, (name, arguments))| {
        Segment::ToolInvocation(ToolInvocation {
            id: format!("call_{i}_{name}"),
            name: (*name).to_string(),
            arguments: arguments.clone(),
        })
    }));
    ReasoningResponse {
        segments,
        usage: None,
        model: "mock-model".into(),
        stop_reason: Some("tool_use".into()),
    }
}

/// A gateway over a fresh in-memory store with the default catalog.
pub fn memory_gateway() -> (ToolGateway, InMemoryStore) {
    let store = InMemoryStore::new();
    let gateway = ToolGateway::new(
        Arc::new(default_catalog()),
        Arc::new(store.clone()),
        Arc::new(ChangeLog::in_memory()),
        ToolSettings {
            auth_path: std::env::temp_dir().join("deckhand-test-no-such-auth.json"),
            ..ToolSettings::default()
        },
    );
    (gateway, store)
}

/// A channel that records what it sends and serves canned downloads.
pub struct RecordingChannel {
    id: ChannelId,
    sent: Mutex<Vec<(String, String)>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    pub allow_all: bool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            id: ChannelId("recording".into()),
            sent: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            allow_all: true,
        }
    }

    pub fn with_file(self, file_ref: &str, bytes: &[u8]) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(file_ref.to_string(), bytes.to_vec());
        self
    }

    /// Texts sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn last(&self) -> String {
        self.sent().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn max_message_len(&self) -> usize {
        4096
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: &str,
        content: &str,
        _reply_to: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError> {
        self.files
            .lock()
            .unwrap()
            .get(&attachment.file_ref)
            .cloned()
            .ok_or_else(|| ChannelError::DownloadFailed {
                file: attachment.file_ref.clone(),
                reason: "not found".into(),
            })
    }

    fn is_allowed(&self, _sender_id: &str) -> bool {
        self.allow_all
    }
}
