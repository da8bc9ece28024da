//! SSE event parser for the Messages API.
//!
//! Text deltas are passed on as they arrive. Tool-use blocks are held back
//! until `content_block_stop`, when their accumulated input JSON is
//! complete.

use std::collections::HashMap;

use agent_core::chunk::decode_arguments;
use agent_core::{AgentError, Result};
use serde_json::Value;

use super::types::{ClaudeFragment, ContentBlock, StreamResponse};
use crate::stream::FrameParser;

#[derive(Debug)]
struct ToolUseState {
    id: String,
    name: String,
    json_buffer: String,
}

/// Per-response parser state
#[derive(Debug, Default)]
pub struct ClaudeStreamParser {
    tool_uses: HashMap<usize, ToolUseState>,
}

impl FrameParser for ClaudeStreamParser {
    type Output = ClaudeFragment;

    fn on_frame(&mut self, payload: &str) -> Result<Vec<ClaudeFragment>> {
        let event = match serde_json::from_str::<StreamResponse>(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable Claude event");
                return Ok(Vec::new());
            }
        };

        let fragment = match event.event_type.as_str() {
            "content_block_start" => self.block_start(&event),
            "content_block_delta" => self.block_delta(&event),
            "content_block_stop" => self.block_stop(&event),
            "message_delta" => event.delta.map(|delta| ClaudeFragment::Stop {
                stop_reason: delta.stop_reason,
            }),
            "error" => {
                let detail = event.error.map_or_else(
                    || "unknown error".to_owned(),
                    |e| format!("{}: {}", e.error_type, e.message),
                );
                return Err(AgentError::Transport(format!(
                    "Claude stream error: {detail}"
                )));
            }
            _ => None,
        };
        Ok(fragment.into_iter().collect())
    }

    fn finish(&mut self) -> Result<Vec<ClaudeFragment>> {
        if !self.tool_uses.is_empty() {
            return Err(AgentError::Transport(
                "Claude stream ended inside a tool_use block".into(),
            ));
        }
        Ok(Vec::new())
    }
}

impl ClaudeStreamParser {
    fn block_start(&mut self, event: &StreamResponse) -> Option<ClaudeFragment> {
        let (Some(index), Some(block)) = (event.index, &event.content_block) else {
            return None;
        };

        match block.block_type.as_str() {
            "tool_use" => {
                self.tool_uses.insert(
                    index,
                    ToolUseState {
                        id: block.id.clone().unwrap_or_default(),
                        name: block.name.clone().unwrap_or_default(),
                        json_buffer: String::new(),
                    },
                );
                None
            }
            "text" => block
                .text
                .as_ref()
                .filter(|t| !t.is_empty())
                .map(|text| ClaudeFragment::Block(ContentBlock::Text { text: text.clone() })),
            _ => None,
        }
    }

    fn block_delta(&mut self, event: &StreamResponse) -> Option<ClaudeFragment> {
        let (Some(index), Some(delta)) = (event.index, &event.delta) else {
            return None;
        };

        match delta.delta_type.as_deref() {
            Some("text_delta") => delta
                .text
                .as_ref()
                .map(|text| ClaudeFragment::Block(ContentBlock::Text { text: text.clone() })),
            Some("input_json_delta") => {
                if let (Some(state), Some(partial)) =
                    (self.tool_uses.get_mut(&index), &delta.partial_json)
                {
                    state.json_buffer.push_str(partial);
                }
                None
            }
            _ => None,
        }
    }

    fn block_stop(&mut self, event: &StreamResponse) -> Option<ClaudeFragment> {
        let state = self.tool_uses.remove(&event.index?)?;
        Some(ClaudeFragment::Block(ContentBlock::ToolUse {
            id: state.id,
            name: state.name,
            input: Value::Object(decode_arguments(&state.json_buffer)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed(parser: &mut ClaudeStreamParser, events: &[Value]) -> Vec<ClaudeFragment> {
        events
            .iter()
            .flat_map(|e| parser.on_frame(&e.to_string()).unwrap())
            .collect()
    }

    #[test]
    fn text_and_tool_use_stream() {
        let mut parser = ClaudeStreamParser::default();
        let fragments = feed(
            &mut parser,
            &[
                json!({"type": "message_start", "message": {"id": "msg_1"}}),
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Checking"}}),
                json!({"type": "content_block_stop", "index": 0}),
                json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {}}}),
                json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"path\": "}}),
                json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"a.txt\"}"}}),
                json!({"type": "content_block_stop", "index": 1}),
                json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
                json!({"type": "message_stop"}),
            ],
        );

        assert_eq!(
            fragments,
            vec![
                ClaudeFragment::Block(ContentBlock::Text {
                    text: "Checking".into()
                }),
                ClaudeFragment::Block(ContentBlock::ToolUse {
                    id: "toolu_1".into(),
                    name: "read_file".into(),
                    input: json!({"path": "a.txt"}),
                }),
                ClaudeFragment::Stop {
                    stop_reason: Some("tool_use".into())
                },
            ]
        );
        assert!(parser.finish().unwrap().is_empty());
    }

    #[test]
    fn tool_use_without_input_has_empty_arguments() {
        let mut parser = ClaudeStreamParser::default();
        let fragments = feed(
            &mut parser,
            &[
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "toolu_2", "name": "datetime"}}),
                json!({"type": "content_block_stop", "index": 0}),
            ],
        );
        assert!(matches!(
            &fragments[0],
            ClaudeFragment::Block(ContentBlock::ToolUse { input, .. }) if input == &json!({})
        ));
    }

    #[test]
    fn error_event_fails_the_stream() {
        let mut parser = ClaudeStreamParser::default();
        let err = parser
            .on_frame(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();
        assert!(matches!(err, AgentError::Transport(m) if m.contains("overloaded_error")));
    }

    #[test]
    fn pings_and_garbage_are_skipped() {
        let mut parser = ClaudeStreamParser::default();
        assert!(parser.on_frame(r#"{"type":"ping"}"#).unwrap().is_empty());
        assert!(parser.on_frame("not json").unwrap().is_empty());
    }

    #[test]
    fn unterminated_tool_use_is_an_error() {
        let mut parser = ClaudeStreamParser::default();
        feed(
            &mut parser,
            &[json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "t", "name": "n"}})],
        );
        assert!(parser.finish().is_err());
    }
}
