//! Conversation Budget
//!
//! Approximate sizing and pruning of a [`History`] against a context limit.
//! Pruning keeps the opening message and the most recent exchanges and
//! sacrifices the middle of the conversation.

use crate::message::{History, Role};

/// Most recent messages kept when pruning
const MAX_RETAINED_TAIL: usize = 5;

/// Conversations this short are never pruned
const MIN_PRUNABLE_LEN: usize = 4;

/// Approximate size of a history in tokens.
///
/// Roughly four bytes of serialized JSON per token, counting the system
/// message and context as well as the conversation.
pub fn estimate_size(history: &History) -> usize {
    serde_json::to_vec(history).map_or(0, |bytes| bytes.len()) / 4
}

/// Prune `history` if it is over `limit`.
///
/// Returns `true` when the history fits, either untouched or after
/// pruning. A `false` return means a single pruning pass was applied and
/// the history is still too large; no further messages are dropped.
pub fn enforce_budget(history: &mut History, limit: usize) -> bool {
    let before = estimate_size(history);
    if before <= limit {
        return true;
    }

    let total = history.conversation.len();
    let keep = MAX_RETAINED_TAIL.min(total / 2);
    if total < MIN_PRUNABLE_LEN || total <= keep + 1 {
        tracing::warn!(estimated = before, limit, "Conversation over budget and too short to prune");
        return false;
    }

    let mut tail: Vec<_> = history.conversation.split_off(total - keep);
    history.conversation.truncate(1);

    // A tool message whose calls were pruned cannot stand on its own.
    let orphaned = tail.iter().take_while(|m| m.role == Role::Tool).count();
    tail.drain(..orphaned);
    history.conversation.append(&mut tail);

    let after = estimate_size(history);
    tracing::info!(
        removed = total - history.conversation.len(),
        before,
        after,
        limit,
        "Pruned conversation to fit context budget"
    );
    after <= limit
}
