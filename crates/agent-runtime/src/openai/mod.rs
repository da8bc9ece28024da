//! OpenAI backend
//!
//! Streams `POST {base}/chat/completions` over SSE. Any server speaking the
//! same protocol works through `OPENAI_API_BASE`.

mod convert;
mod stream;
mod types;

pub use convert::{OpenAiChunk, OpenAiConverter};
pub use types::{
    FunctionDefinition, OpenAiContent, OpenAiFragment, OpenAiMessage, OpenAiRole, OpenAiTool,
    OpenAiToolCall,
};

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
use stream::OpenAiStreamParser;
use types::Request;

pub const DEFAULT_MODEL: &str = "gpt-4-turbo-2024-04-09";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CONTEXT_LIMIT: usize = 128_000;

/// OpenAI backend configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API key; required when the client is created
    pub api_key: Option<String>,

    /// API base URL, including the version segment
    pub base_url: String,

    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
        }
    }
}

impl OpenAiConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: http::env_var("OPENAI_API_KEY"),
            base_url: http::env_var("OPENAI_API_BASE").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    completions_url: String,
}

/// 429 is a rate limit unless the account is out of quota
fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS && !body.contains("insufficient_quota")
}

#[derive(Debug, Default)]
pub struct OpenAiAdapter {
    config: OpenAiConfig,
    converter: OpenAiConverter,
}

impl OpenAiAdapter {
    pub const fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            converter: OpenAiConverter,
        }
    }

    pub fn from_env() -> Self {
        Self::new(OpenAiConfig::from_env())
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    type Client = OpenAiClient;
    type Converter = OpenAiConverter;
    type Tools = Vec<OpenAiTool>;

    fn name(&self) -> &'static str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    fn context_limit(&self) -> usize {
        CONTEXT_LIMIT
    }

    fn converter(&self) -> &OpenAiConverter {
        &self.converter
    }

    fn initialize_client(&self) -> Result<OpenAiClient> {
        let api_key = self
            .config
            .api_key
            .clone()
            .ok_or_else(|| AgentError::Configuration("OPENAI_API_KEY is not set".into()))?;

        Ok(OpenAiClient {
            http: http::build_client()?,
            api_key,
            completions_url: format!(
                "{}/chat/completions",
                http::trim_base_url(&self.config.base_url)
            ),
        })
    }

    async fn generate(
        &self,
        client: &OpenAiClient,
        request: GenerateRequest<'_, NativeMessage<Self>, Vec<OpenAiTool>>,
    ) -> Result<ChunkStream<NativeChunk<Self>>> {
        // The system message is already the first rendered message
        let body = Request {
            model: request.model,
            messages: &request.history.messages,
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
            max_tokens: request.max_output_tokens,
            stream: true,
        };

        let builder = client
            .http
            .post(&client.completions_url)
            .bearer_auth(&client.api_key)
            .json(&body);
        let response = http::send(self.name(), builder, is_rate_limited).await?;

        let converter = self.converter;
        let fragments = parse_frames(
            response.bytes_stream(),
            Framing::Sse,
            OpenAiStreamParser::default(),
        );
        Ok(Box::pin(fragments.map(move |fragment| {
            fragment.map(|f| converter.create_chunk_wrapper(f))
        })))
    }

    fn transform_tools(&self, tools: &[ToolSchema]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                tool_type: "function",
                function: FunctionDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }
}
