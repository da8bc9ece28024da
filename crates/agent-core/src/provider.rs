//! Provider Client Adapter Contract
//!
//! Defines the interface every backend implements so the generation loop
//! can drive Claude, Gemini, Ollama or OpenAI without code changes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::ProviderAdapter;
//!
//! let adapter = ClaudeAdapter::new(ClaudeConfig::from_env());
//! let client = adapter.initialize_client()?;
//! let history = adapter.converter().from_history(&history)?;
//! let tools = adapter.transform_tools(&registry.schemas());
//! let chunks = adapter.generate(&client, request).await?;
//! ```

use async_trait::async_trait;

use crate::chunk::ChunkStream;
use crate::converter::{HistoryConverter, ProviderHistory};
use crate::error::Result;
use crate::tool::ToolSchema;

/// Native history entry of an adapter's converter
pub type NativeMessage<P> = <<P as ProviderAdapter>::Converter as HistoryConverter>::Message;

/// Chunk wrapper of an adapter's converter
pub type NativeChunk<P> = <<P as ProviderAdapter>::Converter as HistoryConverter>::Chunk;

/// Everything one backend request needs
#[derive(Debug)]
pub struct GenerateRequest<'a, M, T> {
    /// Model identifier (e.g., "claude-3-7-sonnet-20250219", "llama3.1:8b")
    pub model: &'a str,

    /// System instructions, for backends that take them out of band
    pub system_message: Option<&'a str>,

    /// Rendered conversation
    pub history: &'a ProviderHistory<M>,

    /// Backend-native tool declarations
    pub tools: &'a T,

    /// Maximum tokens to generate
    pub max_output_tokens: u32,
}

/// Strategy trait for LLM backends
///
/// Implement this trait to add support for a new backend. The generation
/// loop works exclusively through this interface.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Network client, created lazily by the loop
    type Client: Send + Sync;

    /// History converter for this backend
    type Converter: HistoryConverter;

    /// Backend-native tool declarations
    type Tools: Send + Sync;

    /// Backend name (e.g., "claude", "ollama")
    fn name(&self) -> &'static str;

    /// Model used when none is configured
    fn default_model(&self) -> &str;

    /// Approximate context window of the default model, in tokens
    fn context_limit(&self) -> usize;

    fn converter(&self) -> &Self::Converter;

    /// Create the network client.
    ///
    /// Fails with `Configuration` when required credentials are absent;
    /// never falls back to another backend.
    fn initialize_client(&self) -> Result<Self::Client>;

    /// Issue one request and return its chunks.
    ///
    /// Rate limiting reported when the request is made surfaces as
    /// `RateLimited`; every other failure as a non-retryable error.
    async fn generate(
        &self,
        client: &Self::Client,
        request: GenerateRequest<'_, NativeMessage<Self>, Self::Tools>,
    ) -> Result<ChunkStream<NativeChunk<Self>>>;

    /// Map common tool schemas to the backend's declaration shape
    fn transform_tools(&self, tools: &[ToolSchema]) -> Self::Tools;
}
