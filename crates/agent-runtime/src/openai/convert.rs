//! Conversion between canonical history and chat-completion messages.
//!
//! Placement: the system message is a leading `system` message and project
//! context the `user` message right after it. Every tool result is its own
//! `tool` message; consecutive ones read back as a single TOOL message.
//! Within an assistant message, text always precedes the tool calls, so
//! interleaved text/call order does not survive a round trip.

use agent_core::chunk::{collect_content, decode_arguments};
use agent_core::converter::CallIndex;
use agent_core::{
    AgentError, ChunkWrapper, ContentPart, FinishReason, History, HistoryConverter, Message,
    ProviderHistory, Result, Role, ToolCall, ToolCallResult, ToolResult, TurnItems,
};

use super::types::{OpenAiContent, OpenAiFragment, OpenAiMessage, OpenAiRole, OpenAiToolCall, TextPart};

const BACKEND: &str = "openai";

#[derive(Clone, Debug)]
pub struct OpenAiChunk {
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
    raw: OpenAiFragment,
}

impl ChunkWrapper for OpenAiChunk {
    type Raw = OpenAiFragment;

    fn text(&self) -> &str {
        &self.text
    }

    fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    fn raw(&self) -> &OpenAiFragment {
        &self.raw
    }
}

pub fn finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "tool_calls" | "function_call" => FinishReason::ToolUse,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

fn content_of(texts: Vec<&str>) -> Option<OpenAiContent> {
    match texts.as_slice() {
        [] => None,
        [single] => Some(OpenAiContent::Text((*single).to_owned())),
        parts => Some(OpenAiContent::Parts(
            parts.iter().map(|t| TextPart::new(*t)).collect(),
        )),
    }
}

fn text_parts(content: Option<&OpenAiContent>) -> Vec<ContentPart> {
    match content {
        None => Vec::new(),
        Some(OpenAiContent::Text(text)) => vec![ContentPart::text(text.clone())],
        Some(OpenAiContent::Parts(parts)) => parts
            .iter()
            .map(|p| ContentPart::text(p.text.clone()))
            .collect(),
    }
}

fn flat_text(content: Option<&OpenAiContent>) -> String {
    match content {
        None => String::new(),
        Some(OpenAiContent::Text(text)) => text.clone(),
        Some(OpenAiContent::Parts(parts)) => parts.iter().map(|p| p.text.as_str()).collect(),
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OpenAiConverter;

impl OpenAiConverter {
    /// Native messages for one canonical message
    fn messages(message: &Message) -> Result<Vec<OpenAiMessage>> {
        let unsupported = |part: &ContentPart| {
            AgentError::unsupported(
                BACKEND,
                format!("{} part in a {} message", part.kind(), message.role),
            )
        };

        match message.role {
            Role::Tool => message
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::ToolResult(result) => Ok(OpenAiMessage::tool(
                        result.id.clone(),
                        result.content.to_json_string(),
                    )),
                    other => Err(unsupported(other)),
                })
                .collect(),
            Role::Model => {
                let mut texts = Vec::new();
                let mut tool_calls = Vec::new();
                for part in &message.content {
                    match part {
                        ContentPart::Text { text } => texts.push(text.as_str()),
                        ContentPart::ToolCall(call) => tool_calls.push(OpenAiToolCall::new(
                            call.id.clone(),
                            call.name.clone(),
                            serde_json::to_string(&call.arguments)?,
                        )),
                        ContentPart::ToolResult(_) => return Err(unsupported(part)),
                    }
                }
                Ok(vec![OpenAiMessage {
                    role: OpenAiRole::Assistant,
                    content: content_of(texts),
                    tool_calls,
                    tool_call_id: None,
                }])
            }
            Role::User | Role::System => {
                let texts = message
                    .content
                    .iter()
                    .map(|part| part.as_text().ok_or_else(|| unsupported(part)))
                    .collect::<Result<Vec<_>>>()?;
                let role = if message.role == Role::System {
                    OpenAiRole::System
                } else {
                    OpenAiRole::User
                };
                Ok(vec![OpenAiMessage {
                    role,
                    content: content_of(texts),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                }])
            }
        }
    }
}

impl HistoryConverter for OpenAiConverter {
    type Message = OpenAiMessage;
    type Fragment = OpenAiFragment;
    type Chunk = OpenAiChunk;

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn from_history(&self, history: &History) -> Result<ProviderHistory<OpenAiMessage>> {
        let mut messages = Vec::with_capacity(history.conversation.len() + 2);
        if let Some(system) = &history.system_message {
            messages.push(OpenAiMessage::text(OpenAiRole::System, system.clone()));
        }
        if let Some(context) = &history.context {
            messages.push(OpenAiMessage::text(OpenAiRole::User, context.clone()));
        }
        let synthesized = messages.len();

        for message in &history.conversation {
            messages.extend(Self::messages(message)?);
        }
        Ok(ProviderHistory::new(messages, synthesized))
    }

    fn to_history(&self, history: &ProviderHistory<OpenAiMessage>) -> Result<Vec<Message>> {
        let mut calls = CallIndex::new();
        let mut messages: Vec<Message> = Vec::new();

        for native in history.conversation() {
            match native.role {
                OpenAiRole::Tool => {
                    let id = native.tool_call_id.clone().unwrap_or_default();
                    let result = ToolResult::new(
                        id.clone(),
                        calls.name_for(&id),
                        ToolCallResult::from_json_str(&flat_text(native.content.as_ref())),
                    );
                    match messages.last_mut() {
                        Some(last) if last.role == Role::Tool => {
                            last.content.push(ContentPart::ToolResult(result));
                        }
                        _ => messages.push(Message::tool(vec![result])),
                    }
                }
                OpenAiRole::Assistant => {
                    let mut content = text_parts(native.content.as_ref());
                    for call in &native.tool_calls {
                        calls.record(call.id.clone(), call.function.name.clone());
                        content.push(ContentPart::ToolCall(ToolCall::new(
                            call.id.clone(),
                            call.function.name.clone(),
                            decode_arguments(&call.function.arguments),
                        )));
                    }
                    messages.push(Message::model(content));
                }
                OpenAiRole::User => {
                    messages.push(Message::new(Role::User, text_parts(native.content.as_ref())));
                }
                OpenAiRole::System => {
                    messages.push(Message::new(
                        Role::System,
                        text_parts(native.content.as_ref()),
                    ));
                }
            }
        }
        Ok(messages)
    }

    fn to_history_item(&self, items: TurnItems<'_, OpenAiChunk>) -> Result<Vec<OpenAiMessage>> {
        match items {
            TurnItems::Chunks(chunks) => {
                let content = collect_content(chunks);
                if content.is_empty() {
                    return Ok(Vec::new());
                }
                Self::messages(&Message::model(content))
            }
            TurnItems::ToolResults(results) => Self::messages(&Message::tool(results.to_vec())),
        }
    }

    fn create_chunk_wrapper(&self, fragment: OpenAiFragment) -> OpenAiChunk {
        let mut chunk = OpenAiChunk {
            text: String::new(),
            tool_calls: Vec::new(),
            finish_reason: None,
            raw: fragment,
        };
        match &chunk.raw {
            OpenAiFragment::Text(text) => chunk.text.clone_from(text),
            OpenAiFragment::ToolCall(call) => chunk.tool_calls.push(ToolCall::new(
                call.id.clone(),
                call.function.name.clone(),
                decode_arguments(&call.function.arguments),
            )),
            OpenAiFragment::Finish(reason) => chunk.finish_reason = Some(finish_reason(reason)),
        }
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::chunk::arguments_from_value;
    use agent_core::converter::UNKNOWN_TOOL;
    use serde_json::{Value, json};

    fn sample_history() -> History {
        let mut history = History::new(Some("be brief".into()), Some("project notes".into()));
        history
            .add_message(
                Role::User,
                vec![ContentPart::text("what time is it"), ContentPart::text("and read a.txt")],
            )
            .unwrap();
        history
            .add_message(
                Role::Model,
                vec![
                    ContentPart::text("Checking both."),
                    ContentPart::ToolCall(ToolCall::new("call_a", "datetime", Default::default())),
                    ContentPart::ToolCall(ToolCall::new(
                        "call_b",
                        "read_file",
                        arguments_from_value(json!({"path": "a.txt"})),
                    )),
                ],
            )
            .unwrap();
        history
            .add_message(
                Role::Tool,
                vec![
                    ContentPart::ToolResult(ToolResult::new(
                        "call_a",
                        "datetime",
                        ToolCallResult::ok("2025-01-01T00:00:00Z"),
                    )),
                    ContentPart::ToolResult(ToolResult::new(
                        "call_b",
                        "read_file",
                        ToolCallResult::error("No such file"),
                    )),
                ],
            )
            .unwrap();
        history
            .add_message(Role::Model, vec![ContentPart::text("It is midnight; a.txt is missing.")])
            .unwrap();
        history
    }

    #[test]
    fn round_trip_strips_system_and_context() {
        let history = sample_history();
        let native = OpenAiConverter.from_history(&history).unwrap();

        assert_eq!(native.synthesized, 2);
        assert_eq!(OpenAiConverter.to_history(&native).unwrap(), history.conversation);
    }

    #[test]
    fn wire_shape() {
        let native = OpenAiConverter.from_history(&sample_history()).unwrap();
        let value = serde_json::to_value(&native.messages).unwrap();

        assert_eq!(value[0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(value[1], json!({"role": "user", "content": "project notes"}));
        assert_eq!(value[2]["content"][1], json!({"type": "text", "text": "and read a.txt"}));
        assert_eq!(value[3]["tool_calls"][1]["type"], "function");
        assert_eq!(
            value[3]["tool_calls"][1]["function"]["arguments"],
            r#"{"path":"a.txt"}"#
        );
        // One tool message per result
        assert_eq!(value[4]["role"], "tool");
        assert_eq!(value[4]["tool_call_id"], "call_a");
        assert_eq!(value[5]["tool_call_id"], "call_b");
        assert_eq!(value[5]["content"], r#"{"failure":"No such file"}"#);
        assert_eq!(native.len(), 7);
    }

    #[test]
    fn unresolvable_tool_result_gets_unknown_name() {
        let native = ProviderHistory::new(
            vec![OpenAiMessage::tool("call_missing", r#"{"success":"ok"}"#)],
            0,
        );
        let messages = OpenAiConverter.to_history(&native).unwrap();
        let result = messages[0].tool_results().next().unwrap();
        assert_eq!(result.name, UNKNOWN_TOOL);
        assert_eq!(result.content, ToolCallResult::ok("ok"));
    }

    #[test]
    fn tool_call_in_user_message_is_unsupported() {
        let message = Message::new(
            Role::User,
            vec![ContentPart::ToolCall(ToolCall::new("c", "n", Default::default()))],
        );
        assert!(matches!(
            OpenAiConverter::messages(&message),
            Err(AgentError::UnsupportedContent { backend: "openai", .. })
        ));
    }

    #[test]
    fn chunk_wrapper_decodes_string_arguments() {
        let chunk = OpenAiConverter.create_chunk_wrapper(OpenAiFragment::ToolCall(
            OpenAiToolCall::new("call_1", "read_file", r#"{"path":"a.txt"}"#),
        ));
        assert_eq!(chunk.tool_calls()[0].get_str("path"), Some("a.txt"));
        assert_eq!(chunk.text(), "");
        assert_eq!(chunk.finish_reason(), None);

        let broken = OpenAiConverter.create_chunk_wrapper(OpenAiFragment::ToolCall(
            OpenAiToolCall::new("call_2", "read_file", "{\"path\":"),
        ));
        assert_eq!(
            broken.tool_calls()[0].arguments.get("_raw"),
            Some(&Value::String("{\"path\":".into()))
        );

        let finish = OpenAiConverter.create_chunk_wrapper(OpenAiFragment::Finish("tool_calls".into()));
        assert_eq!(finish.finish_reason(), Some(FinishReason::ToolUse));
    }

    #[test]
    fn turn_items_render_one_message_per_result() {
        let chunks = vec![
            OpenAiConverter.create_chunk_wrapper(OpenAiFragment::Text("Let me ".into())),
            OpenAiConverter.create_chunk_wrapper(OpenAiFragment::Text("check.".into())),
            OpenAiConverter.create_chunk_wrapper(OpenAiFragment::ToolCall(OpenAiToolCall::new(
                "call_1", "datetime", "",
            ))),
            OpenAiConverter.create_chunk_wrapper(OpenAiFragment::Finish("tool_calls".into())),
        ];
        let model = OpenAiConverter
            .to_history_item(TurnItems::Chunks(&chunks))
            .unwrap();
        assert_eq!(model.len(), 1);
        assert_eq!(model[0].content, Some(OpenAiContent::Text("Let me check.".into())));
        assert_eq!(model[0].tool_calls[0].function.arguments, "{}");

        let results = vec![
            ToolResult::new("call_1", "datetime", ToolCallResult::ok("now")),
            ToolResult::new("call_2", "datetime", ToolCallResult::ok("later")),
        ];
        let tool = OpenAiConverter
            .to_history_item(TurnItems::ToolResults(&results))
            .unwrap();
        assert_eq!(tool.len(), 2);

        let empty: Vec<OpenAiChunk> = Vec::new();
        assert!(OpenAiConverter
            .to_history_item(TurnItems::Chunks(&empty))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn finish_reasons() {
        assert_eq!(finish_reason("stop"), FinishReason::Stop);
        assert_eq!(finish_reason("length"), FinishReason::Length);
        assert_eq!(finish_reason("content_filter"), FinishReason::ContentFilter);
        assert_eq!(finish_reason("something_new"), FinishReason::Other);
    }
}
