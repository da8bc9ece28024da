//! Anthropic Messages API wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── History ────────────────────────────────────────────────────────

/// Conversation roles the Messages API accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaudeRole {
    User,
    Assistant,
}

/// One entry of the `messages` array
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClaudeMessage {
    pub role: ClaudeRole,
    pub content: Vec<ContentBlock>,
}

impl ClaudeMessage {
    pub const fn new(role: ClaudeRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }
}

/// A content block within a message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// A tool invocation (assistant messages)
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// A tool result (user messages)
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// Tool definition sent in the request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClaudeTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// ── Request ────────────────────────────────────────────────────────

/// Body of `POST /v1/messages`
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<&'a str>,
    pub messages: &'a [ClaudeMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<&'a [ClaudeTool]>,
    pub stream: bool,
}

// ── Streaming ──────────────────────────────────────────────────────

/// A single SSE event; fields are populated per `type`
#[derive(Debug, Deserialize)]
pub struct StreamResponse {
    #[serde(rename = "type")]
    pub event_type: String,
    pub index: Option<usize>,
    pub content_block: Option<StreamContentBlock>,
    pub delta: Option<StreamDelta>,
    pub error: Option<ErrorDetail>,
}

/// Block announced by `content_block_start`
#[derive(Debug, Deserialize)]
pub struct StreamContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub text: Option<String>,
}

/// Delta of `content_block_delta` and `message_delta`
#[derive(Debug, Deserialize)]
pub struct StreamDelta {
    #[serde(rename = "type")]
    pub delta_type: Option<String>,
    pub text: Option<String>,
    pub partial_json: Option<String>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Native unit of a streamed response: a finished block delta or the
/// message's stop reason
#[derive(Clone, Debug, PartialEq)]
pub enum ClaudeFragment {
    Block(ContentBlock),
    Stop { stop_reason: Option<String> },
}
