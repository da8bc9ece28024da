//! # agent-runtime
//!
//! Backend implementations for the agent-core generation loop.
//!
//! ## Backends
//!
//! - **Claude**: Anthropic Messages API, SSE
//! - **Gemini**: Google `streamGenerateContent`, SSE
//! - **Ollama**: local or remote `/api/chat`, newline-delimited JSON
//! - **OpenAI**: Chat Completions (and compatible servers), SSE
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::{ConversationEngine, GenerationConfig, History};
//! use agent_runtime::Backend;
//!
//! let backend = Backend::from_name("ollama", GenerationConfig::default())?;
//! let mut history = History::new(Some("You are terse.".into()), None);
//! history.add_message(Role::User, vec![ContentPart::text("Hello")])?;
//! backend.generate_with_tools(&mut history, &registry, &mut |event| {
//!     println!("{event:?}");
//! }).await?;
//! ```

pub mod backend;
pub mod claude;
pub mod gemini;
pub mod http;
pub mod ollama;
pub mod openai;
pub mod stream;

pub use backend::{Backend, BackendKind};
pub use claude::{ClaudeAdapter, ClaudeConfig};
pub use gemini::{GeminiAdapter, GeminiConfig};
pub use ollama::{OllamaAdapter, OllamaConfig};
pub use openai::{OpenAiAdapter, OpenAiConfig};

// Re-export core types for convenience
pub use agent_core::{
    AgentError, ConversationEngine, GenerationConfig, GenerationEvent, History, Result, Session,
    ToolRegistry,
};
