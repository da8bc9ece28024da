//! Conversion between canonical history and Gemini contents.
//!
//! Placement: the system message is sent as `systemInstruction`; project
//! context becomes one leading `user` content. Tool results are
//! `functionResponse` parts inside a `user` content. Gemini may omit call
//! ids, in which case one is generated when the chunk is wrapped.

use agent_core::chunk::{arguments_from_value, collect_content, generate_call_id};
use agent_core::converter::CallIndex;
use agent_core::{
    AgentError, ChunkWrapper, ContentPart, FinishReason, History, HistoryConverter, Message,
    ProviderHistory, Result, Role, ToolCall, ToolCallResult, ToolResult, TurnItems,
};
use serde_json::Value;

use super::types::{Content, FunctionCall, FunctionResponse, GenerateContentResponse, Part};

const BACKEND: &str = "gemini";
const USER: &str = "user";
const MODEL: &str = "model";

/// Gemini chunk: the text, calls and finish reason of one streamed response
#[derive(Clone, Debug)]
pub struct GeminiChunk {
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
    raw: GenerateContentResponse,
}

impl ChunkWrapper for GeminiChunk {
    type Raw = GenerateContentResponse;

    fn text(&self) -> &str {
        &self.text
    }

    fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    fn raw(&self) -> &GenerateContentResponse {
        &self.raw
    }
}

/// Map a candidate `finishReason`
pub fn finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" => FinishReason::ContentFilter,
        "MALFORMED_FUNCTION_CALL" => FinishReason::Error,
        _ => FinishReason::Other,
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GeminiConverter;

impl GeminiConverter {
    fn part(part: &ContentPart, role: Role) -> Result<Part> {
        Ok(match part {
            ContentPart::Text { text } => Part::text(text.clone()),
            ContentPart::ToolCall(call) if role == Role::Model => Part::function_call(FunctionCall {
                id: Some(call.id.clone()),
                name: call.name.clone(),
                args: Value::Object(call.arguments.clone()),
            }),
            ContentPart::ToolResult(result) if role == Role::Tool => {
                Part::function_response(FunctionResponse {
                    id: Some(result.id.clone()),
                    name: result.name.clone(),
                    response: result.content.to_value(),
                })
            }
            other => {
                return Err(AgentError::unsupported(
                    BACKEND,
                    format!("{} part in a {role} message", other.kind()),
                ));
            }
        })
    }

    fn content(message: &Message) -> Result<Content> {
        let role = match message.role {
            Role::User | Role::Tool => USER,
            Role::Model => MODEL,
            Role::System => {
                return Err(AgentError::unsupported(
                    BACKEND,
                    "system messages inside the conversation",
                ));
            }
        };
        let parts = message
            .content
            .iter()
            .map(|part| Self::part(part, message.role))
            .collect::<Result<_>>()?;
        Ok(Content::new(role, parts))
    }
}

/// Calls of the latest model turn, used to pair responses that carry no id
#[derive(Default)]
struct TurnCalls {
    index: CallIndex,
    unanswered: Vec<(String, String)>,
}

impl TurnCalls {
    fn call(&mut self, call: &FunctionCall) -> ToolCall {
        let id = call.id.clone().unwrap_or_else(generate_call_id);
        self.index.record(id.clone(), call.name.clone());
        self.unanswered.push((id.clone(), call.name.clone()));
        ToolCall::new(id, call.name.clone(), arguments_from_value(call.args.clone()))
    }

    fn result(&mut self, response: &FunctionResponse) -> ToolResult {
        let id = response.id.clone().or_else(|| {
            let position = self
                .unanswered
                .iter()
                .position(|(_, name)| name == &response.name)?;
            Some(self.unanswered.remove(position).0)
        });
        let id = id.unwrap_or_else(generate_call_id);
        self.unanswered.retain(|(pending, _)| pending != &id);

        let name = if response.name.is_empty() {
            self.index.name_for(&id)
        } else {
            response.name.clone()
        };
        ToolResult::new(id, name, ToolCallResult::from_value(response.response.clone()))
    }
}

impl HistoryConverter for GeminiConverter {
    type Message = Content;
    type Fragment = GenerateContentResponse;
    type Chunk = GeminiChunk;

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn from_history(&self, history: &History) -> Result<ProviderHistory<Content>> {
        let mut contents = Vec::with_capacity(history.conversation.len() + 1);
        if let Some(context) = &history.context {
            contents.push(Content::new(USER, vec![Part::text(context.clone())]));
        }
        let synthesized = contents.len();

        for message in &history.conversation {
            contents.push(Self::content(message)?);
        }
        Ok(ProviderHistory::new(contents, synthesized))
    }

    fn to_history(&self, history: &ProviderHistory<Content>) -> Result<Vec<Message>> {
        let mut calls = TurnCalls::default();
        let mut messages = Vec::new();

        for content in history.conversation() {
            let is_model = content.role.as_deref() == Some(MODEL);
            if is_model {
                calls.unanswered.clear();
            }

            let mut parts = Vec::with_capacity(content.parts.len());
            let mut has_results = false;
            for part in &content.parts {
                if part.thought == Some(true) {
                    continue;
                }
                if let Some(text) = &part.text {
                    parts.push(ContentPart::text(text.clone()));
                } else if let Some(call) = &part.function_call {
                    parts.push(ContentPart::ToolCall(calls.call(call)));
                } else if let Some(response) = &part.function_response {
                    has_results = true;
                    parts.push(ContentPart::ToolResult(calls.result(response)));
                }
            }

            let role = if is_model {
                Role::Model
            } else if has_results {
                Role::Tool
            } else {
                Role::User
            };
            messages.push(Message::new(role, parts));
        }
        Ok(messages)
    }

    fn to_history_item(&self, items: TurnItems<'_, GeminiChunk>) -> Result<Vec<Content>> {
        let content = match items {
            TurnItems::Chunks(chunks) => Self::content(&Message::model(collect_content(chunks)))?,
            TurnItems::ToolResults(results) => Self::content(&Message::tool(results.to_vec()))?,
        };
        if content.parts.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![content])
    }

    fn create_chunk_wrapper(&self, fragment: GenerateContentResponse) -> GeminiChunk {
        let mut chunk = GeminiChunk {
            text: String::new(),
            tool_calls: Vec::new(),
            finish_reason: None,
            raw: fragment,
        };

        if let Some(candidate) = chunk.raw.candidates.first() {
            let parts = candidate.content.iter().flat_map(|c| &c.parts);
            for part in parts {
                if part.thought == Some(true) {
                    continue;
                }
                if let Some(text) = &part.text {
                    chunk.text.push_str(text);
                }
                if let Some(call) = &part.function_call {
                    chunk.tool_calls.push(ToolCall::new(
                        call.id.clone().unwrap_or_else(generate_call_id),
                        call.name.clone(),
                        arguments_from_value(call.args.clone()),
                    ));
                }
            }
            chunk.finish_reason = candidate.finish_reason.as_deref().map(finish_reason);
        }

        let blocked = chunk
            .raw
            .prompt_feedback
            .as_ref()
            .is_some_and(|f| f.block_reason.is_some());
        if blocked {
            chunk.finish_reason = Some(FinishReason::ContentFilter);
        }
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::converter::UNKNOWN_TOOL;
    use serde_json::json;

    fn sample_history() -> History {
        let mut history = History::new(Some("be brief".into()), Some("project notes".into()));
        history
            .add_message(Role::User, vec![ContentPart::text("what time is it?")])
            .unwrap();
        history
            .add_message(
                Role::Model,
                vec![ContentPart::ToolCall(ToolCall::new(
                    "call_1",
                    "datetime",
                    arguments_from_value(json!({"format": "iso"})),
                ))],
            )
            .unwrap();
        history
            .add_message(
                Role::Tool,
                vec![ContentPart::ToolResult(ToolResult::new(
                    "call_1",
                    "datetime",
                    ToolCallResult::ok("2025-01-01T00:00:00Z"),
                ))],
            )
            .unwrap();
        history
            .add_message(Role::Model, vec![ContentPart::text("Midnight.")])
            .unwrap();
        history
    }

    #[test]
    fn round_trip() {
        let history = sample_history();
        let native = GeminiConverter.from_history(&history).unwrap();
        assert_eq!(GeminiConverter.to_history(&native).unwrap(), history.conversation);
    }

    #[test]
    fn wire_shape() {
        let native = GeminiConverter.from_history(&sample_history()).unwrap();
        assert_eq!(native.synthesized, 1);

        let value = serde_json::to_value(&native.messages).unwrap();
        assert_eq!(value[0], json!({"role": "user", "parts": [{"text": "project notes"}]}));
        assert_eq!(value[2]["role"], "model");
        assert_eq!(value[2]["parts"][0]["functionCall"]["name"], "datetime");
        assert_eq!(value[3]["role"], "user");
        assert_eq!(
            value[3]["parts"][0]["functionResponse"]["response"],
            json!({"success": "2025-01-01T00:00:00Z"})
        );
    }

    #[test]
    fn responses_without_ids_pair_by_name() {
        let native = ProviderHistory::new(
            vec![
                Content::new(
                    MODEL,
                    vec![Part::function_call(FunctionCall {
                        id: None,
                        name: "datetime".into(),
                        args: json!({}),
                    })],
                ),
                Content::new(
                    USER,
                    vec![Part::function_response(FunctionResponse {
                        id: None,
                        name: "datetime".into(),
                        response: json!({"success": "now"}),
                    })],
                ),
            ],
            0,
        );

        let messages = GeminiConverter.to_history(&native).unwrap();
        let call = messages[0].tool_calls().next().unwrap();
        let result = messages[1].tool_results().next().unwrap();
        assert!(call.id.starts_with("call_"));
        assert_eq!(result.id, call.id);

        let mut history = History::default();
        history.conversation = messages;
        history.validate().unwrap();
    }

    #[test]
    fn nameless_response_resolves_by_id_or_falls_back() {
        let native = ProviderHistory::new(
            vec![
                Content::new(
                    MODEL,
                    vec![Part::function_call(FunctionCall {
                        id: Some("c1".into()),
                        name: "read_file".into(),
                        args: json!({}),
                    })],
                ),
                Content::new(
                    USER,
                    vec![
                        Part::function_response(FunctionResponse {
                            id: Some("c1".into()),
                            name: String::new(),
                            response: json!({"success": "ok"}),
                        }),
                        Part::function_response(FunctionResponse {
                            id: Some("c9".into()),
                            name: String::new(),
                            response: json!({"success": "ok"}),
                        }),
                    ],
                ),
            ],
            0,
        );

        let messages = GeminiConverter.to_history(&native).unwrap();
        let names: Vec<_> = messages[1].tool_results().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["read_file", UNKNOWN_TOOL]);
    }

    #[test]
    fn chunk_wrapper_generates_missing_ids() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Let me check."},
                    {"functionCall": {"name": "datetime", "args": {"format": "iso"}}}
                ]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        let chunk = GeminiConverter.create_chunk_wrapper(response);
        assert_eq!(chunk.text(), "Let me check.");
        assert!(chunk.tool_calls()[0].id.starts_with("call_"));
        assert_eq!(chunk.tool_calls()[0].get_str("format"), Some("iso"));
        assert_eq!(chunk.finish_reason(), Some(FinishReason::Stop));
    }

    #[test]
    fn finish_reasons() {
        assert_eq!(finish_reason("MALFORMED_FUNCTION_CALL"), FinishReason::Error);
        assert_eq!(finish_reason("SAFETY"), FinishReason::ContentFilter);
        assert_eq!(finish_reason("MAX_TOKENS"), FinishReason::Length);

        let blocked: GenerateContentResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        assert_eq!(
            GeminiConverter.create_chunk_wrapper(blocked).finish_reason(),
            Some(FinishReason::ContentFilter)
        );
    }

    #[test]
    fn turn_items_keep_generated_ids() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"name": "datetime", "args": {}}}
            ]}}]
        }))
        .unwrap();
        let chunk = GeminiConverter.create_chunk_wrapper(response);
        let id = chunk.tool_calls()[0].id.clone();

        let items = GeminiConverter
            .to_history_item(TurnItems::Chunks(std::slice::from_ref(&chunk)))
            .unwrap();
        assert_eq!(items[0].parts[0].function_call.as_ref().unwrap().id, Some(id));
    }
}
