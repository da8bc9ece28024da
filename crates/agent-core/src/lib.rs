//! # agent-core
//!
//! Provider-agnostic conversation model and tool-calling generation loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │ Generation  │  │ ToolExecutor │  │  ProviderAdapter    │  │
//! │  │    Loop     │──│  (callback)  │──│  + HistoryConverter │  │
//! │  └─────────────┘  └──────────────┘  └─────────────────────┘  │
//! │         │                                                    │
//! │  ┌─────────────┐  ┌──────────────┐                           │
//! │  │   History   │──│    Budget    │                           │
//! │  └─────────────┘  └──────────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `ProviderAdapter` trait enables swapping between Claude, Gemini,
//! Ollama and OpenAI without changing the loop. Backend implementations
//! live in `agent-runtime`.

pub mod budget;
pub mod chunk;
pub mod converter;
pub mod error;
pub mod generation;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;

pub use chunk::{ChunkStream, ChunkWrapper, FinishReason};
pub use converter::{HistoryConverter, ProviderHistory, TurnItems};
pub use error::{AgentError, Result};
pub use generation::{
    ConversationEngine, GenerationConfig, GenerationEvent, Orchestrator, RetryPolicy, TurnOutcome,
};
pub use message::{ContentPart, History, Message, Role, ToolCall, ToolCallResult, ToolResult};
pub use provider::{GenerateRequest, ProviderAdapter};
pub use session::{Session, SessionId};
pub use tool::{ParameterSchema, Tool, ToolExecutor, ToolRegistry, ToolSchema};
