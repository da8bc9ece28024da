//! Conversion between canonical history and Claude messages.
//!
//! Placement: the system message travels in the request's `system` field
//! and is never part of the message list; project context becomes one
//! leading `user` message. Tool results are `tool_result` blocks inside a
//! `user` message, which `to_history` reads back as a TOOL message.

use agent_core::chunk::{arguments_from_value, collect_content};
use agent_core::converter::CallIndex;
use agent_core::{
    AgentError, ChunkWrapper, ContentPart, FinishReason, History, HistoryConverter, Message,
    ProviderHistory, Result, Role, ToolCall, ToolCallResult, ToolResult, TurnItems,
};
use serde_json::Value;

use super::types::{ClaudeFragment, ClaudeMessage, ClaudeRole, ContentBlock};

const BACKEND: &str = "claude";

/// Claude chunk: one text delta, one finished tool call or the stop reason
#[derive(Clone, Debug)]
pub struct ClaudeChunk {
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
    raw: ClaudeFragment,
}

impl ChunkWrapper for ClaudeChunk {
    type Raw = ClaudeFragment;

    fn text(&self) -> &str {
        &self.text
    }

    fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    fn raw(&self) -> &ClaudeFragment {
        &self.raw
    }
}

/// Map a Messages API `stop_reason`
pub fn finish_reason(stop_reason: &str) -> FinishReason {
    match stop_reason {
        "end_turn" | "stop_sequence" | "pause_turn" => FinishReason::Stop,
        "tool_use" => FinishReason::ToolUse,
        "max_tokens" => FinishReason::Length,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ClaudeConverter;

impl ClaudeConverter {
    fn block(part: &ContentPart, role: Role) -> Result<ContentBlock> {
        Ok(match part {
            ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
            ContentPart::ToolCall(call) if role == Role::Model => ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: Value::Object(call.arguments.clone()),
            },
            ContentPart::ToolResult(result) if role == Role::Tool => ContentBlock::ToolResult {
                tool_use_id: result.id.clone(),
                content: result.content.to_json_string(),
                is_error: result.content.is_error(),
            },
            other => {
                return Err(AgentError::unsupported(
                    BACKEND,
                    format!("{} part in a {role} message", other.kind()),
                ));
            }
        })
    }

    fn message(message: &Message) -> Result<ClaudeMessage> {
        let role = match message.role {
            Role::User | Role::Tool => ClaudeRole::User,
            Role::Model => ClaudeRole::Assistant,
            Role::System => {
                return Err(AgentError::unsupported(
                    BACKEND,
                    "system messages inside the conversation",
                ));
            }
        };
        let content = message
            .content
            .iter()
            .map(|part| Self::block(part, message.role))
            .collect::<Result<_>>()?;
        Ok(ClaudeMessage::new(role, content))
    }

    fn part(block: &ContentBlock, calls: &CallIndex) -> ContentPart {
        match block {
            ContentBlock::Text { text } => ContentPart::text(text.clone()),
            ContentBlock::ToolUse { id, name, input } => ContentPart::ToolCall(ToolCall::new(
                id.clone(),
                name.clone(),
                arguments_from_value(input.clone()),
            )),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let mut result = ToolCallResult::from_json_str(content);
                if *is_error && !result.is_error() {
                    result = ToolCallResult::Failure(result.payload().clone());
                }
                ContentPart::ToolResult(ToolResult::new(
                    tool_use_id.clone(),
                    calls.name_for(tool_use_id),
                    result,
                ))
            }
        }
    }
}

impl HistoryConverter for ClaudeConverter {
    type Message = ClaudeMessage;
    type Fragment = ClaudeFragment;
    type Chunk = ClaudeChunk;

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn from_history(&self, history: &History) -> Result<ProviderHistory<ClaudeMessage>> {
        let mut messages = Vec::with_capacity(history.conversation.len() + 1);
        if let Some(context) = &history.context {
            messages.push(ClaudeMessage::new(
                ClaudeRole::User,
                vec![ContentBlock::Text {
                    text: context.clone(),
                }],
            ));
        }
        let synthesized = messages.len();

        for message in &history.conversation {
            messages.push(Self::message(message)?);
        }
        Ok(ProviderHistory::new(messages, synthesized))
    }

    fn to_history(&self, history: &ProviderHistory<ClaudeMessage>) -> Result<Vec<Message>> {
        let mut calls = CallIndex::new();
        let mut messages = Vec::new();

        for native in history.conversation() {
            let role = match native.role {
                ClaudeRole::Assistant => Role::Model,
                ClaudeRole::User
                    if native
                        .content
                        .iter()
                        .any(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                {
                    Role::Tool
                }
                ClaudeRole::User => Role::User,
            };

            let content = native
                .content
                .iter()
                .map(|block| Self::part(block, &calls))
                .collect();
            for block in &native.content {
                if let ContentBlock::ToolUse { id, name, .. } = block {
                    calls.record(id.clone(), name.clone());
                }
            }
            messages.push(Message::new(role, content));
        }
        Ok(messages)
    }

    fn to_history_item(&self, items: TurnItems<'_, ClaudeChunk>) -> Result<Vec<ClaudeMessage>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let message = match items {
            TurnItems::Chunks(chunks) => {
                Self::message(&Message::model(collect_content(chunks)))?
            }
            TurnItems::ToolResults(results) => Self::message(&Message::tool(results.to_vec()))?,
        };
        if message.content.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![message])
    }

    fn create_chunk_wrapper(&self, fragment: ClaudeFragment) -> ClaudeChunk {
        let mut chunk = ClaudeChunk {
            text: String::new(),
            tool_calls: Vec::new(),
            finish_reason: None,
            raw: fragment,
        };
        match &chunk.raw {
            ClaudeFragment::Block(ContentBlock::Text { text }) => chunk.text.clone_from(text),
            ClaudeFragment::Block(ContentBlock::ToolUse { id, name, input }) => {
                chunk.tool_calls.push(ToolCall::new(
                    id.clone(),
                    name.clone(),
                    arguments_from_value(input.clone()),
                ));
            }
            ClaudeFragment::Block(ContentBlock::ToolResult { .. }) => {}
            ClaudeFragment::Stop { stop_reason } => {
                chunk.finish_reason = stop_reason.as_deref().map(finish_reason);
            }
        }
        chunk
    }
}
