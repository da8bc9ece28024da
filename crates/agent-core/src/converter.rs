//! History Converter Contract
//!
//! Each backend implements [`HistoryConverter`] to map between the canonical
//! [`History`] and its own request/response structures. Converters are
//! stateless; the only state they see is what is passed in.
//!
//! ## Round trip
//!
//! For any history that only uses content a backend can represent,
//! `to_history(from_history(h)) == h.conversation`. The leading entries
//! `from_history` synthesizes for the system message and project context are
//! counted in [`ProviderHistory::synthesized`] so the inverse knows exactly
//! what to strip.

use crate::chunk::ChunkWrapper;
use crate::error::Result;
use crate::message::{History, Message, ToolResult};

/// Fallback tool name when a result's call cannot be found
pub const UNKNOWN_TOOL: &str = "unknown";

/// Backend-native rendering of a [`History`]
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderHistory<M> {
    /// Native messages in request order
    pub messages: Vec<M>,

    /// Number of leading messages synthesized from system message/context
    pub synthesized: usize,
}

impl<M> ProviderHistory<M> {
    pub const fn new(messages: Vec<M>, synthesized: usize) -> Self {
        Self {
            messages,
            synthesized,
        }
    }

    /// Extend with the native messages of a finished turn
    pub fn append(&mut self, items: Vec<M>) {
        self.messages.extend(items);
    }

    /// Messages that correspond to canonical conversation entries
    pub fn conversation(&self) -> &[M] {
        self.messages.get(self.synthesized..).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<M> Default for ProviderHistory<M> {
    fn default() -> Self {
        Self::new(Vec::new(), 0)
    }
}

/// Finished items of one turn, to be rendered as native history entries
#[derive(Debug)]
pub enum TurnItems<'a, C> {
    /// Every chunk of one model response
    Chunks(&'a [C]),
    /// Results of the tools that response requested
    ToolResults(&'a [ToolResult]),
}

impl<C> TurnItems<'_, C> {
    pub const fn is_empty(&self) -> bool {
        match self {
            Self::Chunks(chunks) => chunks.is_empty(),
            Self::ToolResults(results) => results.is_empty(),
        }
    }
}

/// Bidirectional mapping between canonical and backend-native history
pub trait HistoryConverter: Send + Sync {
    /// Native history entry
    type Message: Clone + Send + Sync + std::fmt::Debug + 'static;

    /// Native response fragment
    type Fragment;

    /// Chunk wrapper produced for each fragment
    type Chunk: ChunkWrapper + 'static;

    /// Backend name used in diagnostics
    fn backend(&self) -> &'static str;

    /// Render the canonical history for a request.
    ///
    /// Fails with `UnsupportedContent` for any part or role the backend
    /// cannot represent; nothing is silently dropped.
    fn from_history(&self, history: &History) -> Result<ProviderHistory<Self::Message>>;

    /// Parse native history back into canonical messages, skipping the
    /// synthesized leading entries.
    fn to_history(&self, history: &ProviderHistory<Self::Message>) -> Result<Vec<Message>>;

    /// Render a finished turn as native entries; empty input yields none.
    fn to_history_item(&self, items: TurnItems<'_, Self::Chunk>) -> Result<Vec<Self::Message>>;

    /// Wrap one native fragment
    fn create_chunk_wrapper(&self, fragment: Self::Fragment) -> Self::Chunk;
}

/// Tool calls seen so far while walking a native history, used to name
/// tool results that only carry an id.
#[derive(Debug, Default)]
pub struct CallIndex {
    calls: Vec<(String, String)>,
}

impl CallIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: impl Into<String>, name: impl Into<String>) {
        self.calls.push((id.into(), name.into()));
    }

    /// Name of the nearest preceding call with this id.
    ///
    /// Falls back to [`UNKNOWN_TOOL`] only when no such call exists.
    pub fn name_for(&self, id: &str) -> String {
        self.calls
            .iter()
            .rev()
            .find(|(call_id, _)| call_id == id)
            .map_or_else(
                || {
                    tracing::warn!(tool_call_id = %id, "No tool call found for result, using placeholder name");
                    UNKNOWN_TOOL.to_owned()
                },
                |(_, name)| name.clone(),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_index_prefers_nearest_call() {
        let mut index = CallIndex::new();
        index.record("1", "read_file");
        index.record("2", "list_directory");
        index.record("1", "calculate");

        assert_eq!(index.name_for("2"), "list_directory");
        assert_eq!(index.name_for("1"), "calculate");
    }

    #[test]
    fn call_index_falls_back_to_unknown() {
        let index = CallIndex::new();
        assert_eq!(index.name_for("missing"), UNKNOWN_TOOL);
    }

    #[test]
    fn provider_history_skips_synthesized() {
        let mut history = ProviderHistory::new(vec!["system", "context", "hi"], 2);
        assert_eq!(history.conversation(), ["hi"]);
        history.append(vec!["hello"]);
        assert_eq!(history.conversation(), ["hi", "hello"]);
    }
}
