//! Anthropic Messages API provider.
//!
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Images sent inline as base64 `image` blocks

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use deckhand_config::ReasoningConfig;
use deckhand_core::error::ProviderError;
use deckhand_core::message::{Role, Segment, ToolInvocation, Turn};
use deckhand_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const HEALTH_CHECK_MODEL: &str = "claude-3-5-haiku-20241022";
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
const EMPTY_TURN_PLACEHOLDER: &str = "(empty)";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build from the `[reasoning]` config section.
    pub fn from_config(config: &ReasoningConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::NotConfigured(
                    "no API key; set reasoning.api_key or ANTHROPIC_API_KEY".into(),
                )
            })?;
        let provider = Self::new(api_key)?;
        Ok(match &config.base_url {
            Some(url) => provider.with_base_url(url.as_str()),
            None => provider,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn to_api_block(segment: &Segment) -> Option<ContentBlock> {
        match segment {
            Segment::Text { text } if text.trim().is_empty() => None,
            Segment::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
            Segment::Image { media_type, data } => Some(ContentBlock::Image {
                source: ImageSource {
                    kind: "base64".into(),
                    media_type: media_type.clone(),
                    data: BASE64.encode(data),
                },
            }),
            Segment::ToolInvocation(inv) => Some(ContentBlock::ToolUse {
                id: inv.id.clone(),
                name: inv.name.clone(),
                input: inv.arguments.clone(),
            }),
            Segment::ToolResult {
                invocation_id,
                payload,
                is_error,
            } => Some(ContentBlock::ToolResult {
                tool_use_id: invocation_id.clone(),
                content: payload.to_string(),
                is_error: *is_error,
            }),
        }
    }

    /// Convert turns to Anthropic API messages, one message per turn.
    fn to_api_messages(turns: &[Turn]) -> Vec<AnthropicMessage> {
        turns
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let mut blocks: Vec<ContentBlock> =
                    turn.segments.iter().filter_map(Self::to_api_block).collect();
                if blocks.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: EMPTY_TURN_PLACEHOLDER.into(),
                    });
                }
                AnthropicMessage {
                    role: role.into(),
                    content: blocks,
                }
            })
            .collect()
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn request_body(request: &ReasoningRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.turns),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if !request.system.is_empty() {
            body["system"] = serde_json::json!(request.system);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    /// Convert an Anthropic API response to our ReasoningResponse.
    fn to_reasoning_response(resp: AnthropicResponse) -> ReasoningResponse {
        let segments = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(Segment::Text { text }),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    Some(Segment::ToolInvocation(ToolInvocation {
                        id,
                        name,
                        arguments: input,
                    }))
                }
                ResponseContentBlock::Thinking { .. } => None,
                ResponseContentBlock::Other => {
                    trace!("Ignoring unknown Anthropic content block");
                    None
                }
            })
            .collect();

        ReasoningResponse {
            segments,
            usage: Some(Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            }),
            model: resp.model,
            stop_reason: resp.stop_reason,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: ReasoningRequest) -> Result<ReasoningResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "Sending reasoning request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: AnthropicResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;

        Ok(Self::to_reasoning_response(api_resp))
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": HEALTH_CHECK_MODEL,
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // 401 means a bad key; anything else means reachable
        Ok(response.status().as_u16() != 401)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "thinking")]
    Thinking {
        #[allow(dead_code)]
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
