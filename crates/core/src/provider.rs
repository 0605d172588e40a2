//! Provider trait: the abstraction over the reasoning service.
//!
//! The service is stateless: every request carries the system prompt, the
//! full conversation history and the operation catalog. The response is a
//! list of segments, either text for the user or invocations of catalog
//! operations.

use crate::error::ProviderError;
use crate::message::{Segment, ToolInvocation, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One call to the reasoning service.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,

    /// System instructions
    pub system: String,

    /// Conversation history, oldest first
    pub turns: Vec<Turn>,

    /// Operations the service may invoke
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,
}

/// A tool definition sent to the reasoning service so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The operation name
    pub name: String,

    /// Description of what the operation does
    pub description: String,

    /// JSON Schema describing the operation's arguments
    pub parameters: serde_json::Value,
}

/// A complete response from the reasoning service.
#[derive(Debug, Clone, Default)]
pub struct ReasoningResponse {
    /// Text and invocation segments, in the order the service emitted them
    pub segments: Vec<Segment>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,

    /// Why generation stopped ("end_turn", "tool_use", ...)
    pub stop_reason: Option<String>,
}

impl ReasoningResponse {
    /// Text segments joined with newlines; empty when there are none.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::ToolInvocation(inv) => Some(inv.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The reasoning service.
///
/// The turn loop calls `send()` without knowing which backend answers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn send(&self, request: ReasoningRequest) -> Result<ReasoningResponse, ProviderError>;

    /// Whether the provider is reachable.
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_partitions_text_and_invocations() {
        let response = ReasoningResponse {
            segments: vec![
                Segment::text("Looking that up."),
                Segment::ToolInvocation(ToolInvocation {
                    id: "toolu_1".into(),
                    name: "search_notes".into(),
                    arguments: json!({"query": "好"}),
                }),
                Segment::text("  "),
            ],
            ..Default::default()
        };
        assert_eq!(response.text(), "Looking that up.");
        let invocations = response.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].name, "search_notes");
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "list_decks".into(),
            description: "List all decks".into(),
            parameters: json!({"type": "object", "properties": {}}),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("list_decks"));
    }
}
