//! Conversation Messages
//!
//! Backend-independent representation of a conversation. Every provider
//! converter renders from and parses back into these types; no
//! backend-native value is ever stored here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// Structured tool arguments, always decoded (never a JSON string)
pub type Arguments = Map<String, Value>;

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Model (LLM) response
    Model,
    /// Tool results
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Model => write!(f, "model"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Tool call request from the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID, unique within a turn
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Decoded arguments
    #[serde(default)]
    pub arguments: Arguments,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Get a string argument by key
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Structured outcome of a tool execution.
///
/// Serialized as `{"success": ...}` or `{"failure": ...}` so that every
/// backend sees an explicit status next to the payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallResult {
    Success(Value),
    Failure(Value),
}

impl ToolCallResult {
    pub fn ok(output: impl Into<Value>) -> Self {
        Self::Success(output.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Failure(Value::String(message.into()))
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub const fn payload(&self) -> &Value {
        match self {
            Self::Success(value) | Self::Failure(value) => value,
        }
    }

    /// Serialize to the JSON object form backends receive
    pub fn to_value(&self) -> Value {
        match self {
            Self::Success(value) => serde_json::json!({ "success": value }),
            Self::Failure(value) => serde_json::json!({ "failure": value }),
        }
    }

    /// Parse a result previously produced by [`ToolCallResult::to_value`].
    ///
    /// Content that was not produced by us (e.g. a history written by
    /// another client) is kept verbatim as a successful payload.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value::<Self>(value.clone()).unwrap_or(Self::Success(value))
    }

    /// Parse from the JSON string form some backends carry in `content`
    pub fn from_json_str(content: &str) -> Self {
        serde_json::from_str::<Value>(content)
            .map_or_else(|_| Self::Success(Value::String(content.to_owned())), Self::from_value)
    }

    pub fn to_json_string(&self) -> String {
        self.to_value().to_string()
    }
}

/// Result of a tool call, answering the [`ToolCall`] with the same id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub content: ToolCallResult,
}

impl ToolResult {
    pub fn new(id: impl Into<String>, name: impl Into<String>, content: ToolCallResult) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            content,
        }
    }
}

/// One piece of message content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Short variant name for diagnostics
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolCall(_) => "tool_call",
            Self::ToolResult(_) => "tool_result",
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Ordered content parts
    pub content: Vec<ContentPart>,
}

impl Message {
    /// Create a new message
    pub const fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    /// Create a single-text user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    /// Create a model message
    pub const fn model(content: Vec<ContentPart>) -> Self {
        Self::new(Role::Model, content)
    }

    /// Create a tool message from results
    pub fn tool(results: Vec<ToolResult>) -> Self {
        Self::new(
            Role::Tool,
            results.into_iter().map(ContentPart::ToolResult).collect(),
        )
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.content.iter().filter_map(ContentPart::as_text).collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::ToolResult(result) => Some(result),
            _ => None,
        })
    }
}

/// Conversation history owned by one session
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// System instructions, placed per backend convention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    /// Static project context, injected once as leading user content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Ordered conversation
    #[serde(default)]
    pub conversation: Vec<Message>,
}

impl History {
    pub fn new(system_message: Option<String>, context: Option<String>) -> Self {
        Self {
            system_message: system_message.filter(|s| !s.is_empty()),
            context: context.filter(|s| !s.is_empty()),
            conversation: Vec::new(),
        }
    }

    /// Append a message, enforcing the tool call / tool result pairing.
    pub fn add_message(&mut self, role: Role, content: Vec<ContentPart>) -> Result<()> {
        self.add_messages(vec![Message::new(role, content)])
    }

    /// Append several messages atomically: either all are valid and
    /// appended, or the history is left untouched.
    pub fn add_messages(&mut self, messages: Vec<Message>) -> Result<()> {
        let mut pending = self.pending_tool_calls();
        for message in &messages {
            check_message(&mut pending, message)?;
        }
        self.conversation.extend(messages);
        Ok(())
    }

    /// Ids of tool calls in the latest model turn that have no result yet
    pub fn pending_tool_calls(&self) -> Vec<String> {
        let mut pending = Vec::new();
        for message in &self.conversation {
            advance_pending(&mut pending, message);
        }
        pending
    }

    /// Check the pairing invariant over the whole conversation
    pub fn validate(&self) -> Result<()> {
        let mut pending = Vec::new();
        for message in &self.conversation {
            check_message(&mut pending, message)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.conversation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversation.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.conversation.last()
    }
}

/// Validate `message` against the currently unmatched call ids and update
/// them as if it had been appended.
fn check_message(pending: &mut Vec<String>, message: &Message) -> Result<()> {
    let mut seen = HashSet::new();
    for part in &message.content {
        match part {
            ContentPart::Text { .. } => {}
            ContentPart::ToolCall(call) => {
                if message.role != Role::Model {
                    return Err(AgentError::Validation(format!(
                        "tool call '{}' in a {} message",
                        call.id, message.role
                    )));
                }
                if !seen.insert(call.id.as_str()) {
                    return Err(AgentError::Validation(format!(
                        "duplicate tool call id '{}' in one turn",
                        call.id
                    )));
                }
            }
            ContentPart::ToolResult(result) => {
                if message.role != Role::Tool {
                    return Err(AgentError::Validation(format!(
                        "tool result '{}' in a {} message",
                        result.id, message.role
                    )));
                }
                if !pending.contains(&result.id) {
                    return Err(AgentError::Validation(format!(
                        "tool result '{}' has no matching unanswered tool call",
                        result.id
                    )));
                }
                pending.retain(|id| id != &result.id);
            }
        }
    }

    if message.role != Role::Tool && !pending.is_empty() {
        return Err(AgentError::Validation(format!(
            "{} message appended while tool calls are unanswered: {}",
            message.role,
            pending.join(", ")
        )));
    }

    if message.role == Role::Model {
        pending.extend(message.tool_calls().map(|call| call.id.clone()));
    }
    Ok(())
}

fn advance_pending(pending: &mut Vec<String>, message: &Message) {
    match message.role {
        Role::Model => {
            pending.clear();
            pending.extend(message.tool_calls().map(|call| call.id.clone()));
        }
        Role::Tool => {
            for result in message.tool_results() {
                pending.retain(|id| id != &result.id);
            }
        }
        Role::User | Role::System => pending.clear(),
    }
}
