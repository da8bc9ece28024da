//! Google Gemini backend
//!
//! Streams `models/{model}:streamGenerateContent?alt=sse`. Every SSE event
//! is a complete `GenerateContentResponse`.

mod convert;
mod types;

pub use convert::{GeminiChunk, GeminiConverter};
pub use types::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GenerateContentResponse,
    GeminiTool, Part,
};

use agent_core::provider::{NativeChunk, NativeMessage};
use agent_core::{
    AgentError, ChunkStream, GenerateRequest, HistoryConverter, ProviderAdapter, Result,
    ToolSchema,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;

use crate::http;
use crate::stream::{FrameParser, Framing, parse_frames};
use types::{GenerationConfig, Request};

pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const CONTEXT_LIMIT: usize = 1_048_576;

/// JSON-schema keys the Gemini API rejects in function parameters
const UNSUPPORTED_SCHEMA_KEYS: [&str; 2] = ["$schema", "additionalProperties"];

/// Gemini backend configuration
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    /// API key; required when the client is created
    pub api_key: Option<String>,

    pub base_url: String,

    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: http::env_var("GEMINI_API_KEY"),
            base_url: http::env_var("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:streamGenerateContent?alt=sse",
            self.base_url
        )
    }
}

fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED")
}

/// Remove schema keys Gemini rejects, at every depth
fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), sanitize_schema(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

/// Each payload is one full response object
#[derive(Debug, Default)]
struct GeminiStreamParser;

impl FrameParser for GeminiStreamParser {
    type Output = GenerateContentResponse;

    fn on_frame(&mut self, payload: &str) -> Result<Vec<GenerateContentResponse>> {
        let value: Value = serde_json::from_str(payload).map_err(|e| {
            AgentError::Transport(format!("Malformed Gemini stream payload: {e}"))
        })?;
        if let Some(error) = value.get("error") {
            return Err(AgentError::Transport(format!("Gemini stream error: {error}")));
        }
        let response = serde_json::from_value(value).map_err(|e| {
            AgentError::Transport(format!("Unexpected Gemini response shape: {e}"))
        })?;
        Ok(vec![response])
    }
}

#[derive(Debug, Default)]
pub struct GeminiAdapter {
    config: GeminiConfig,
    converter: GeminiConverter,
}

impl GeminiAdapter {
    pub const fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            converter: GeminiConverter,
        }
    }

    pub fn from_env() -> Self {
        Self::new(GeminiConfig::from_env())
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    type Client = GeminiClient;
    type Converter = GeminiConverter;
    type Tools = Vec<GeminiTool>;

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    fn context_limit(&self) -> usize {
        CONTEXT_LIMIT
    }

    fn converter(&self) -> &GeminiConverter {
        &self.converter
    }

    fn initialize_client(&self) -> Result<GeminiClient> {
        let api_key = self
            .config
            .api_key
            .clone()
            .ok_or_else(|| AgentError::Configuration("GEMINI_API_KEY is not set".into()))?;

        Ok(GeminiClient {
            http: http::build_client()?,
            api_key,
            base_url: http::trim_base_url(&self.config.base_url),
        })
    }

    async fn generate(
        &self,
        client: &GeminiClient,
        request: GenerateRequest<'_, NativeMessage<Self>, Vec<GeminiTool>>,
    ) -> Result<ChunkStream<NativeChunk<Self>>> {
        let body = Request {
            contents: &request.history.messages,
            system_instruction: request
                .system_message
                .map(|system| Content {
                    role: None,
                    parts: vec![Part::text(system)],
                }),
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
            generation_config: GenerationConfig {
                max_output_tokens: request.max_output_tokens,
            },
        };

        let builder = client
            .http
            .post(client.stream_url(request.model))
            .header("x-goog-api-key", &client.api_key)
            .json(&body);
        let response = http::send(self.name(), builder, is_rate_limited).await?;

        let converter = self.converter;
        let fragments = parse_frames(response.bytes_stream(), Framing::Sse, GeminiStreamParser);
        Ok(Box::pin(fragments.map(move |fragment| {
            fragment.map(|f| converter.create_chunk_wrapper(f))
        })))
    }

    fn transform_tools(&self, tools: &[ToolSchema]) -> Vec<GeminiTool> {
        if tools.is_empty() {
            return Vec::new();
        }
        vec![GeminiTool {
            function_declarations: tools
                .iter()
                .map(|tool| FunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: sanitize_schema(&tool.parameters),
                })
                .collect(),
        }]
    }
}
