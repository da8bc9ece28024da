//! Session Management
//!
//! A session exclusively owns one conversation history and the engine that
//! drives it. Nothing is shared between sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::generation::{ConversationEngine, GenerationEvent, TurnOutcome};
use crate::message::{History, Message, Role};
use crate::tool::ToolExecutor;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A conversation bound to one engine
pub struct Session<E> {
    /// Unique identifier
    pub id: SessionId,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,

    history: History,
    engine: E,
}

impl<E: ConversationEngine> Session<E> {
    /// Create a new session
    pub fn new(engine: E, history: History) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            created_at: now,
            updated_at: now,
            history,
            engine,
        }
    }

    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Hand the history over for persistence
    pub fn into_history(self) -> History {
        self.history
    }

    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Send a prompt and run the generation loop.
    ///
    /// With no prompt the loop still runs once on the current history. If
    /// the run fails before the model answered, the prompt is taken back
    /// out so the next attempt starts from the same state.
    pub async fn send(
        &mut self,
        prompt: Option<&str>,
        tools: &dyn ToolExecutor,
        on_event: &mut (dyn FnMut(GenerationEvent) + Send),
    ) -> Result<TurnOutcome> {
        let prompt = prompt.map(str::trim).filter(|p| !p.is_empty());
        if let Some(prompt) = prompt {
            self.history.add_messages(vec![Message::user(prompt)])?;
        }

        let outcome = self
            .engine
            .generate_with_tools(&mut self.history, tools, on_event)
            .await;

        // The prompt is still last only if no model turn was committed
        let unanswered = self
            .history
            .conversation
            .last()
            .is_some_and(|last| last.role == Role::User);
        if outcome.is_err() && prompt.is_some() && unanswered {
            self.history.conversation.pop();
            tracing::debug!(session = %self.id, "Rolled back prompt after failed turn");
        }

        self.touch();
        outcome
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Short title from the first user message
    pub fn title(&self) -> String {
        self.history
            .conversation
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| {
                let text = m.text();
                if text.chars().count() > 50 {
                    format!("{}...", text.chars().take(47).collect::<String>())
                } else {
                    text
                }
            })
            .unwrap_or_else(|| "New Session".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::FinishReason;
    use crate::error::AgentError;
    use crate::message::{Arguments, ContentPart, ToolCall, ToolCallResult};
    use crate::tool::ToolSchema;
    use async_trait::async_trait;

    struct NoTools;

    #[async_trait]
    impl ToolExecutor for NoTools {
        fn schemas(&self) -> Vec<ToolSchema> {
            Vec::new()
        }

        async fn call_tool(&self, name: &str, _: &Arguments, _: &ToolCall) -> Result<ToolCallResult> {
            Err(AgentError::ToolExecution(format!("Unknown tool: {name}")))
        }
    }

    /// Answers with a fixed reply, or fails when `reply` is `None`
    struct Canned {
        reply: Option<&'static str>,
    }

    #[async_trait]
    impl ConversationEngine for Canned {
        fn backend(&self) -> &'static str {
            "canned"
        }

        fn model(&self) -> &str {
            "canned-1"
        }

        async fn generate_with_tools(
            &self,
            history: &mut History,
            _tools: &dyn ToolExecutor,
            _on_event: &mut (dyn FnMut(GenerationEvent) + Send),
        ) -> Result<TurnOutcome> {
            let reply = self
                .reply
                .ok_or_else(|| AgentError::Transport("connection reset".into()))?;
            history.add_message(Role::Model, vec![ContentPart::text(reply)])?;
            Ok(TurnOutcome {
                finish_reason: FinishReason::Stop,
                requests: 1,
                text: reply.into(),
            })
        }
    }

    #[tokio::test]
    async fn send_appends_prompt_and_reply() {
        let mut session = Session::new(Canned { reply: Some("hello") }, History::default());
        let outcome = session.send(Some("hi"), &NoTools, &mut |_| {}).await.unwrap();

        assert_eq!(outcome.text, "hello");
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.title(), "hi");
    }

    #[tokio::test]
    async fn failed_turn_rolls_back_prompt() {
        let mut session = Session::new(Canned { reply: None }, History::default());
        assert!(session.send(Some("hi"), &NoTools, &mut |_| {}).await.is_err());
        assert!(session.history().is_empty());
    }

    /// Drops the oldest message, then fails
    struct ShrinkThenFail;

    #[async_trait]
    impl ConversationEngine for ShrinkThenFail {
        fn backend(&self) -> &'static str {
            "shrinking"
        }

        fn model(&self) -> &str {
            "shrinking-1"
        }

        async fn generate_with_tools(
            &self,
            history: &mut History,
            _tools: &dyn ToolExecutor,
            _on_event: &mut (dyn FnMut(GenerationEvent) + Send),
        ) -> Result<TurnOutcome> {
            history.conversation.remove(0);
            Err(AgentError::Transport("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn rollback_does_not_depend_on_history_length() {
        let mut history = History::default();
        history.add_message(Role::User, vec![ContentPart::text("first")]).unwrap();
        history.add_message(Role::Model, vec![ContentPart::text("answer")]).unwrap();
        let mut session = Session::new(ShrinkThenFail, history);

        assert!(session.send(Some("second"), &NoTools, &mut |_| {}).await.is_err());

        let roles: Vec<Role> = session.history().conversation.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Model]);
    }

    #[tokio::test]
    async fn empty_prompt_still_runs_once() {
        let mut session = Session::new(Canned { reply: Some("again") }, History::default());
        session.send(None, &NoTools, &mut |_| {}).await.unwrap();
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().conversation[0].role, Role::Model);
    }

    #[test]
    fn test_session_id() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }
}
