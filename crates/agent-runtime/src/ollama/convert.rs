//! Conversion between canonical history and Ollama chat messages.
//!
//! Placement matches OpenAI: a leading `system` message, then project
//! context as a `user` message. Message content is a single string, so
//! several text parts in one message are joined. Tool results are one
//! `tool` message each, carrying `tool_call_id` and `tool_name`.

use agent_core::chunk::{arguments_from_value, collect_content, generate_call_id};
use agent_core::converter::CallIndex;
use agent_core::{
    AgentError, ChunkWrapper, ContentPart, FinishReason, History, HistoryConverter, Message,
    ProviderHistory, Result, Role, ToolCall, ToolCallResult, ToolResult, TurnItems,
};
use serde_json::Value;

use super::types::{ChatResponse, OllamaFunction, OllamaMessage, OllamaRole, OllamaToolCall};

const BACKEND: &str = "ollama";

/// One NDJSON line; tool calls without ids get generated ones
#[derive(Clone, Debug)]
pub struct OllamaChunk {
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
    raw: ChatResponse,
}

impl ChunkWrapper for OllamaChunk {
    type Raw = ChatResponse;

    fn text(&self) -> &str {
        &self.text
    }

    fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    fn raw(&self) -> &ChatResponse {
        &self.raw
    }
}

pub fn finish_reason(done_reason: Option<&str>) -> FinishReason {
    match done_reason {
        None | Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some(_) => FinishReason::Other,
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OllamaConverter;

impl OllamaConverter {
    fn messages(message: &Message) -> Result<Vec<OllamaMessage>> {
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
                    ContentPart::ToolResult(result) => Ok(OllamaMessage {
                        tool_call_id: Some(result.id.clone()),
                        tool_name: Some(result.name.clone()),
                        ..OllamaMessage::text(OllamaRole::Tool, result.content.to_json_string())
                    }),
                    other => Err(unsupported(other)),
                })
                .collect(),
            Role::Model => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                for part in &message.content {
                    match part {
                        ContentPart::Text { text: t } => text.push_str(t),
                        ContentPart::ToolCall(call) => tool_calls.push(OllamaToolCall {
                            id: Some(call.id.clone()),
                            function: OllamaFunction {
                                name: call.name.clone(),
                                arguments: Value::Object(call.arguments.clone()),
                            },
                        }),
                        ContentPart::ToolResult(_) => return Err(unsupported(part)),
                    }
                }
                Ok(vec![OllamaMessage {
                    tool_calls,
                    ..OllamaMessage::text(OllamaRole::Assistant, text)
                }])
            }
            Role::User | Role::System => {
                let text = message
                    .content
                    .iter()
                    .map(|part| part.as_text().ok_or_else(|| unsupported(part)))
                    .collect::<Result<String>>()?;
                let role = if message.role == Role::System {
                    OllamaRole::System
                } else {
                    OllamaRole::User
                };
                Ok(vec![OllamaMessage::text(role, text)])
            }
        }
    }

    fn tool_call(call: &OllamaToolCall) -> ToolCall {
        ToolCall::new(
            call.id.clone().unwrap_or_else(generate_call_id),
            call.function.name.clone(),
            arguments_from_value(call.function.arguments.clone()),
        )
    }
}

fn text_part(content: &str) -> Option<ContentPart> {
    (!content.is_empty()).then(|| ContentPart::text(content))
}

impl HistoryConverter for OllamaConverter {
    type Message = OllamaMessage;
    type Fragment = ChatResponse;
    type Chunk = OllamaChunk;

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn from_history(&self, history: &History) -> Result<ProviderHistory<OllamaMessage>> {
        let mut messages = Vec::with_capacity(history.conversation.len() + 2);
        if let Some(system) = &history.system_message {
            messages.push(OllamaMessage::text(OllamaRole::System, system.clone()));
        }
        if let Some(context) = &history.context {
            messages.push(OllamaMessage::text(OllamaRole::User, context.clone()));
        }
        let synthesized = messages.len();

        for message in &history.conversation {
            messages.extend(Self::messages(message)?);
        }
        Ok(ProviderHistory::new(messages, synthesized))
    }

    fn to_history(&self, history: &ProviderHistory<OllamaMessage>) -> Result<Vec<Message>> {
        let mut calls = CallIndex::new();
        // Calls of the latest assistant message still waiting for a result
        let mut unanswered: Vec<(String, String)> = Vec::new();
        let mut messages: Vec<Message> = Vec::new();

        for native in history.conversation() {
            match native.role {
                OllamaRole::Tool => {
                    let tool_name = native.tool_name.as_deref().filter(|name| !name.is_empty());
                    let id = match native.tool_call_id.as_deref().filter(|id| !id.is_empty()) {
                        Some(id) => id.to_owned(),
                        None => {
                            let position = tool_name
                                .and_then(|name| unanswered.iter().position(|(_, n)| n == name))
                                .or_else(|| (!unanswered.is_empty()).then_some(0));
                            position.map_or_else(generate_call_id, |p| unanswered.remove(p).0)
                        }
                    };
                    unanswered.retain(|(pending, _)| pending != &id);

                    let name = tool_name.map_or_else(|| calls.name_for(&id), str::to_owned);
                    let result =
                        ToolResult::new(id, name, ToolCallResult::from_json_str(&native.content));
                    match messages.last_mut() {
                        Some(last) if last.role == Role::Tool => {
                            last.content.push(ContentPart::ToolResult(result));
                        }
                        _ => messages.push(Message::tool(vec![result])),
                    }
                }
                OllamaRole::Assistant => {
                    let mut content: Vec<ContentPart> =
                        text_part(&native.content).into_iter().collect();
                    unanswered.clear();
                    for call in &native.tool_calls {
                        let call = Self::tool_call(call);
                        calls.record(call.id.clone(), call.name.clone());
                        unanswered.push((call.id.clone(), call.name.clone()));
                        content.push(ContentPart::ToolCall(call));
                    }
                    messages.push(Message::model(content));
                }
                OllamaRole::User | OllamaRole::System => {
                    let role = if native.role == OllamaRole::System {
                        Role::System
                    } else {
                        Role::User
                    };
                    messages.push(Message::new(
                        role,
                        text_part(&native.content).into_iter().collect(),
                    ));
                }
            }
        }
        Ok(messages)
    }

    fn to_history_item(&self, items: TurnItems<'_, OllamaChunk>) -> Result<Vec<OllamaMessage>> {
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

    fn create_chunk_wrapper(&self, fragment: ChatResponse) -> OllamaChunk {
        let (text, tool_calls) = fragment.message.as_ref().map_or_else(
            || (String::new(), Vec::new()),
            |message| {
                (
                    message.content.clone(),
                    message
                        .tool_calls
                        .iter()
                        .flatten()
                        .map(Self::tool_call)
                        .collect(),
                )
            },
        );
        OllamaChunk {
            text,
            tool_calls,
            finish_reason: fragment
                .done
                .then(|| finish_reason(fragment.done_reason.as_deref())),
            raw: fragment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::ResponseMessage;
    use agent_core::converter::UNKNOWN_TOOL;
    use serde_json::json;

    fn sample_history() -> History {
        let mut history = History::new(Some("be brief".into()), Some("project notes".into()));
        history
            .add_message(Role::User, vec![ContentPart::text("list the src directory")])
            .unwrap();
        history
            .add_message(
                Role::Model,
                vec![ContentPart::ToolCall(ToolCall::new(
                    "call_1",
                    "list_directory",
                    arguments_from_value(json!({"path": "src"})),
                ))],
            )
            .unwrap();
        history
            .add_message(
                Role::Tool,
                vec![ContentPart::ToolResult(ToolResult::new(
                    "call_1",
                    "list_directory",
                    ToolCallResult::ok(json!(["lib.rs", "main.rs"])),
                ))],
            )
            .unwrap();
        history
            .add_message(Role::Model, vec![ContentPart::text("Two files.")])
            .unwrap();
        history
    }

    #[test]
    fn round_trip() {
        let history = sample_history();
        let native = OllamaConverter.from_history(&history).unwrap();

        assert_eq!(native.synthesized, 2);
        assert_eq!(native.messages[0].role, OllamaRole::System);
        assert_eq!(native.messages[1].content, "project notes");
        assert_eq!(OllamaConverter.to_history(&native).unwrap(), history.conversation);
    }

    #[test]
    fn tool_messages_carry_id_and_name() {
        let native = OllamaConverter.from_history(&sample_history()).unwrap();
        let value = serde_json::to_value(&native.messages[4]).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "tool",
                "content": r#"{"success":["lib.rs","main.rs"]}"#,
                "tool_call_id": "call_1",
                "tool_name": "list_directory"
            })
        );
        // Arguments stay structured
        assert_eq!(
            serde_json::to_value(&native.messages[3].tool_calls[0]).unwrap(),
            json!({"id": "call_1", "function": {"name": "list_directory", "arguments": {"path": "src"}}})
        );
    }

    #[test]
    fn nameless_results_resolve_through_history() {
        let native = ProviderHistory::new(
            vec![
                OllamaMessage {
                    tool_calls: vec![OllamaToolCall {
                        id: Some("call_9".into()),
                        function: OllamaFunction {
                            name: "datetime".into(),
                            arguments: json!({}),
                        },
                    }],
                    ..OllamaMessage::text(OllamaRole::Assistant, "")
                },
                OllamaMessage {
                    tool_call_id: Some("call_9".into()),
                    ..OllamaMessage::text(OllamaRole::Tool, r#"{"success":"now"}"#)
                },
                OllamaMessage {
                    tool_call_id: Some("call_404".into()),
                    ..OllamaMessage::text(OllamaRole::Tool, r#"{"success":"?"}"#)
                },
            ],
            0,
        );
        let messages = OllamaConverter.to_history(&native).unwrap();
        let names: Vec<_> = messages[1].tool_results().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["datetime", UNKNOWN_TOOL]);
    }

    #[test]
    fn id_less_results_pair_with_their_calls() {
        let call = |name: &str| OllamaToolCall {
            id: None,
            function: OllamaFunction {
                name: name.into(),
                arguments: json!({}),
            },
        };
        let native = ProviderHistory::new(
            vec![
                OllamaMessage::text(OllamaRole::User, "what time is it, and show the readme"),
                OllamaMessage {
                    tool_calls: vec![call("read_file"), call("datetime")],
                    ..OllamaMessage::text(OllamaRole::Assistant, "")
                },
                OllamaMessage {
                    tool_name: Some("datetime".into()),
                    ..OllamaMessage::text(OllamaRole::Tool, r#"{"success":"noon"}"#)
                },
                OllamaMessage::text(OllamaRole::Tool, r##"{"success":"# Readme"}"##),
            ],
            0,
        );

        let messages = OllamaConverter.to_history(&native).unwrap();
        let calls: Vec<_> = messages[1].tool_calls().map(|c| (c.id.clone(), c.name.clone())).collect();
        let results: Vec<_> = messages[2]
            .tool_results()
            .map(|r| (r.id.clone(), r.name.clone()))
            .collect();
        assert_eq!(results, vec![calls[1].clone(), calls[0].clone()]);

        let mut history = History::default();
        history.add_messages(messages).unwrap();
        history.validate().unwrap();
    }

    #[test]
    fn chunk_wrapper_generates_ids_and_finishes_on_done() {
        let chunk = OllamaConverter.create_chunk_wrapper(ChatResponse {
            message: Some(ResponseMessage {
                content: String::new(),
                tool_calls: Some(vec![OllamaToolCall {
                    id: None,
                    function: OllamaFunction {
                        name: "datetime".into(),
                        arguments: json!({"format": "iso"}),
                    },
                }]),
            }),
            done: false,
            done_reason: None,
        });
        assert!(chunk.tool_calls()[0].id.starts_with("call_"));
        assert_eq!(chunk.tool_calls()[0].get_str("format"), Some("iso"));
        assert_eq!(chunk.finish_reason(), None);

        let last = OllamaConverter.create_chunk_wrapper(ChatResponse {
            message: None,
            done: true,
            done_reason: Some("length".into()),
        });
        assert_eq!(last.finish_reason(), Some(FinishReason::Length));
        assert_eq!(last.raw().done_reason.as_deref(), Some("length"));
        assert_eq!(finish_reason(None), FinishReason::Stop);
    }

    #[test]
    fn turn_items_keep_generated_ids() {
        let chunks = vec![OllamaConverter.create_chunk_wrapper(ChatResponse {
            message: Some(ResponseMessage {
                content: "On it.".into(),
                tool_calls: Some(vec![OllamaToolCall {
                    id: None,
                    function: OllamaFunction {
                        name: "datetime".into(),
                        arguments: Value::Null,
                    },
                }]),
            }),
            done: true,
            done_reason: Some("stop".into()),
        })];
        let generated = chunks[0].tool_calls()[0].id.clone();

        let items = OllamaConverter
            .to_history_item(TurnItems::Chunks(&chunks))
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "On it.");
        assert_eq!(items[0].tool_calls[0].id.as_deref(), Some(generated.as_str()));
    }

    #[test]
    fn tool_result_in_user_message_is_unsupported() {
        let message = Message::new(
            Role::User,
            vec![ContentPart::ToolResult(ToolResult::new(
                "c",
                "n",
                ToolCallResult::ok("x"),
            ))],
        );
        assert!(matches!(
            OllamaConverter::messages(&message),
            Err(AgentError::UnsupportedContent { backend: "ollama", .. })
        ));
    }
}
