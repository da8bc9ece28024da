//! Response Chunks
//!
//! A uniform read-only view over one incremental unit of a backend's
//! response. Streaming backends produce many chunks per turn; backends that
//! answer with a single object are wrapped as a one-chunk sequence.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::{Arguments, ContentPart, ToolCall};

/// Reason for a response finishing, normalized across backends
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
    Other,
}

impl FinishReason {
    /// Final reason for a turn, given what the backend reported and whether
    /// the turn requested any tools.
    ///
    /// Several backends report a plain "stop" alongside tool calls, so a
    /// turn with calls and a non-terminal report counts as tool use. A turn
    /// without calls can never be tool use.
    pub const fn resolve(reported: Option<Self>, has_tool_calls: bool) -> Self {
        match (reported, has_tool_calls) {
            (None | Some(Self::Stop | Self::ToolUse), true) => Self::ToolUse,
            (Some(Self::ToolUse) | None, false) => Self::Stop,
            (Some(reason), _) => reason,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolUse => "tool_use",
            Self::ContentFilter => "content_filter",
            Self::Error => "error",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view over one backend-native response fragment
pub trait ChunkWrapper: Send {
    /// Backend-native fragment type
    type Raw: std::fmt::Debug;

    /// Text carried by this fragment; empty if none
    fn text(&self) -> &str;

    /// Tool calls completed by this fragment, arguments already decoded
    fn tool_calls(&self) -> &[ToolCall];

    /// Set only on the terminal fragment
    fn finish_reason(&self) -> Option<FinishReason>;

    /// The native fragment this chunk was built from
    fn raw(&self) -> &Self::Raw;
}

/// Lazily produced, finite, single-use chunk sequence
pub type ChunkStream<C> = Pin<Box<dyn Stream<Item = Result<C>> + Send>>;

/// Merge a finished turn into canonical content parts.
///
/// Adjacent text deltas collapse into one text part; tool calls keep their
/// position relative to the text around them.
pub fn collect_content<C: ChunkWrapper>(chunks: &[C]) -> Vec<ContentPart> {
    let mut parts = Vec::new();
    let mut text = String::new();
    for chunk in chunks {
        text.push_str(chunk.text());
        for call in chunk.tool_calls() {
            if !text.is_empty() {
                parts.push(ContentPart::text(std::mem::take(&mut text)));
            }
            parts.push(ContentPart::ToolCall(call.clone()));
        }
    }
    if !text.is_empty() {
        parts.push(ContentPart::text(text));
    }
    parts
}

/// Decode string-encoded JSON tool arguments.
///
/// An empty string is an empty object. Anything that is not a JSON object
/// is kept under `_raw` so the tool rejects it and the model sees why.
pub fn decode_arguments(encoded: &str) -> Arguments {
    if encoded.trim().is_empty() {
        return Arguments::new();
    }
    match serde_json::from_str::<Value>(encoded) {
        Ok(value) => arguments_from_value(value),
        Err(e) => {
            tracing::warn!(error = %e, "Tool arguments are not valid JSON, keeping raw text");
            raw_arguments(Value::String(encoded.to_owned()))
        }
    }
}

/// Convert an already-structured argument value into an argument map
pub fn arguments_from_value(value: Value) -> Arguments {
    match value {
        Value::Object(map) => map,
        Value::Null => Arguments::new(),
        other => {
            tracing::warn!("Tool arguments are not a JSON object, keeping raw value");
            raw_arguments(other)
        }
    }
}

fn raw_arguments(value: Value) -> Arguments {
    let mut map = Arguments::new();
    map.insert("_raw".into(), value);
    map
}

/// Id for backends that do not assign tool call ids themselves
pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}
