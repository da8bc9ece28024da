//! SSE parser for streamed chat completions.
//!
//! Tool calls arrive as deltas keyed by `index`; they are assembled and
//! emitted in index order once the choice reports a finish reason.

use std::collections::BTreeMap;

use agent_core::chunk::generate_call_id;
use agent_core::{AgentError, Result};
use serde_json::Value;

use super::types::{OpenAiFragment, OpenAiToolCall, StreamResponse, ToolCallDelta};
use crate::stream::FrameParser;

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct OpenAiStreamParser {
    calls: BTreeMap<usize, PendingCall>,
}

impl OpenAiStreamParser {
    fn accumulate(&mut self, delta: ToolCallDelta) {
        let pending = self.calls.entry(delta.index).or_default();
        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            pending.id = id;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                pending.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                pending.arguments.push_str(&arguments);
            }
        }
    }

    fn drain_calls(&mut self) -> Vec<OpenAiFragment> {
        std::mem::take(&mut self.calls).into_values().map(|call| {
            let id = if call.id.is_empty() {
                generate_call_id()
            } else {
                call.id
            };
            OpenAiFragment::ToolCall(OpenAiToolCall::new(id, call.name, call.arguments))
        })
        .collect()
    }
}

impl FrameParser for OpenAiStreamParser {
    type Output = OpenAiFragment;

    fn on_frame(&mut self, payload: &str) -> Result<Vec<OpenAiFragment>> {
        let value: Value = serde_json::from_str(payload).map_err(|e| {
            AgentError::Transport(format!("Malformed OpenAI stream payload: {e}"))
        })?;
        if let Some(error) = value.get("error") {
            return Err(AgentError::Transport(format!("OpenAI stream error: {error}")));
        }
        let response: StreamResponse = serde_json::from_value(value).map_err(|e| {
            AgentError::Transport(format!("Unexpected OpenAI chunk shape: {e}"))
        })?;

        let mut fragments = Vec::new();
        // Only the first choice is requested
        if let Some(choice) = response.choices.into_iter().next() {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                fragments.push(OpenAiFragment::Text(text));
            }
            for delta in choice.delta.tool_calls.into_iter().flatten() {
                self.accumulate(delta);
            }
            if let Some(reason) = choice.finish_reason {
                fragments.extend(self.drain_calls());
                fragments.push(OpenAiFragment::Finish(reason));
            }
        }
        Ok(fragments)
    }

    fn finish(&mut self) -> Result<Vec<OpenAiFragment>> {
        // Some compatible servers close the stream without a finish reason
        Ok(self.drain_calls())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed(parser: &mut OpenAiStreamParser, events: &[Value]) -> Vec<OpenAiFragment> {
        events
            .iter()
            .flat_map(|e| parser.on_frame(&e.to_string()).unwrap())
            .collect()
    }

    #[test]
    fn text_deltas_pass_through() {
        let mut parser = OpenAiStreamParser::default();
        let fragments = feed(
            &mut parser,
            &[
                json!({"choices": [{"delta": {"role": "assistant", "content": ""}}]}),
                json!({"choices": [{"delta": {"content": "Hel"}}]}),
                json!({"choices": [{"delta": {"content": "lo"}}]}),
                json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
            ],
        );
        assert_eq!(
            fragments,
            vec![
                OpenAiFragment::Text("Hel".into()),
                OpenAiFragment::Text("lo".into()),
                OpenAiFragment::Finish("stop".into()),
            ]
        );
    }

    #[test]
    fn tool_call_deltas_are_assembled_in_index_order() {
        let mut parser = OpenAiStreamParser::default();
        let fragments = feed(
            &mut parser,
            &[
                json!({"choices": [{"delta": {"tool_calls": [
                    {"index": 1, "id": "call_b", "type": "function", "function": {"name": "datetime", "arguments": ""}}
                ]}}]}),
                json!({"choices": [{"delta": {"tool_calls": [
                    {"index": 0, "id": "call_a", "type": "function", "function": {"name": "read_file", "arguments": "{\"pa"}}
                ]}}]}),
                json!({"choices": [{"delta": {"tool_calls": [
                    {"index": 0, "function": {"arguments": "th\":\"a.txt\"}"}}
                ]}}]}),
                json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
            ],
        );

        assert_eq!(
            fragments,
            vec![
                OpenAiFragment::ToolCall(OpenAiToolCall::new(
                    "call_a",
                    "read_file",
                    r#"{"path":"a.txt"}"#
                )),
                OpenAiFragment::ToolCall(OpenAiToolCall::new("call_b", "datetime", "")),
                OpenAiFragment::Finish("tool_calls".into()),
            ]
        );
        assert!(parser.finish().unwrap().is_empty());
    }

    #[test]
    fn calls_left_open_are_flushed_at_the_end() {
        let mut parser = OpenAiStreamParser::default();
        feed(
            &mut parser,
            &[json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"name": "datetime", "arguments": "{}"}}
            ]}}]})],
        );
        let flushed = parser.finish().unwrap();
        assert!(matches!(
            &flushed[..],
            [OpenAiFragment::ToolCall(call)] if call.id.starts_with("call_") && call.function.name == "datetime"
        ));
    }

    #[test]
    fn error_payloads_fail_the_stream() {
        let mut parser = OpenAiStreamParser::default();
        assert!(matches!(
            parser.on_frame(r#"{"error":{"message":"server overloaded"}}"#),
            Err(AgentError::Transport(m)) if m.contains("server overloaded")
        ));
        assert!(parser.on_frame("{not json").is_err());
    }
}
