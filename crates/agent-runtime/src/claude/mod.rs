//! Anthropic Claude backend
//!
//! Streams `POST /v1/messages` responses over SSE.

mod convert;
mod stream;
mod types;

pub use convert::{ClaudeChunk, ClaudeConverter};
pub use types::{ClaudeFragment, ClaudeMessage, ClaudeRole, ClaudeTool, ContentBlock};

use agent_core::provider::{NativeChunk, NativeMessage};
use agent_core::{
    AgentError, ChunkStream, GenerateRequest, HistoryConverter, ProviderAdapter, Result,
    ToolSchema,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;

use crate::http;
use crate::stream::{Framing, parse_frames};
use stream::ClaudeStreamParser;
use types::Request;

pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const CONTEXT_LIMIT: usize = 200_000;

/// Claude backend configuration
#[derive(Clone, Debug)]
pub struct ClaudeConfig {
    /// API key; required when the client is created
    pub api_key: Option<String>,

    /// API base URL
    pub base_url: String,

    pub model: String,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
        }
    }
}

impl ClaudeConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: http::env_var("ANTHROPIC_API_KEY"),
            base_url: http::env_var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            ..Self::default()
        }
    }
}

/// Authenticated HTTP client
#[derive(Clone, Debug)]
pub struct ClaudeClient {
    http: reqwest::Client,
    api_key: String,
    messages_url: String,
}

/// 429, 529 and the API's own rate/overload error types
fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status.as_u16() == 529
        || body.contains("rate_limit_error")
        || body.contains("overloaded_error")
}

#[derive(Debug, Default)]
pub struct ClaudeAdapter {
    config: ClaudeConfig,
    converter: ClaudeConverter,
}

impl ClaudeAdapter {
    pub const fn new(config: ClaudeConfig) -> Self {
        Self {
            config,
            converter: ClaudeConverter,
        }
    }

    pub fn from_env() -> Self {
        Self::new(ClaudeConfig::from_env())
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    type Client = ClaudeClient;
    type Converter = ClaudeConverter;
    type Tools = Vec<ClaudeTool>;

    fn name(&self) -> &'static str {
        "claude"
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    fn context_limit(&self) -> usize {
        CONTEXT_LIMIT
    }

    fn converter(&self) -> &ClaudeConverter {
        &self.converter
    }

    fn initialize_client(&self) -> Result<ClaudeClient> {
        let api_key = self.config.api_key.clone().ok_or_else(|| {
            AgentError::Configuration("ANTHROPIC_API_KEY is not set".into())
        })?;

        Ok(ClaudeClient {
            http: http::build_client()?,
            api_key,
            messages_url: format!("{}/v1/messages", http::trim_base_url(&self.config.base_url)),
        })
    }

    async fn generate(
        &self,
        client: &ClaudeClient,
        request: GenerateRequest<'_, NativeMessage<Self>, Vec<ClaudeTool>>,
    ) -> Result<ChunkStream<NativeChunk<Self>>> {
        let body = Request {
            model: request.model,
            max_tokens: request.max_output_tokens,
            system: request.system_message,
            messages: &request.history.messages,
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
            stream: true,
        };

        let builder = client
            .http
            .post(&client.messages_url)
            .header("x-api-key", &client.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        let response = http::send(self.name(), builder, is_rate_limited).await?;

        let converter = self.converter;
        let fragments = parse_frames(
            response.bytes_stream(),
            Framing::Sse,
            ClaudeStreamParser::default(),
        );
        Ok(Box::pin(fragments.map(move |fragment| {
            fragment.map(|f| converter.create_chunk_wrapper(f))
        })))
    }

    fn transform_tools(&self, tools: &[ToolSchema]) -> Vec<ClaudeTool> {
        tools
            .iter()
            .map(|tool| ClaudeTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.parameters.clone(),
            })
            .collect()
    }
}
