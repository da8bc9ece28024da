//! Ollama backend
//!
//! Streams `POST /api/chat` as newline-delimited JSON from a local or
//! remote Ollama server.

mod convert;
mod types;

pub use convert::{OllamaChunk, OllamaConverter};
pub use types::{ChatResponse, OllamaFunction, OllamaMessage, OllamaRole, OllamaTool, OllamaToolCall};

use agent_core::provider::{NativeChunk, NativeMessage};
use agent_core::{
    AgentError, ChunkStream, GenerateRequest, HistoryConverter, ProviderAdapter, Result,
    ToolSchema,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{StatusCode, Url};
use serde_json::Value;

use crate::http;
use crate::stream::{FrameParser, Framing, parse_frames};
use types::{FunctionDefinition, Options, Request};

pub const DEFAULT_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_API_URL: &str = "http://localhost:11434";
const CONTEXT_LIMIT: usize = 32_768;

/// Ollama backend configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Server URL
    pub api_url: String,

    /// Bearer token for servers behind an authenticating proxy
    pub api_key: Option<String>,

    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            api_key: None,
            model: DEFAULT_MODEL.into(),
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: http::env_var("OLLAMA_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            api_key: http::env_var("OLLAMA_API_KEY"),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct OllamaClient {
    http: reqwest::Client,
    api_key: Option<String>,
    chat_url: String,
}

fn is_rate_limited(status: StatusCode, _body: &str) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
}

/// One response object per line; `{"error": ...}` lines abort the stream
#[derive(Debug, Default)]
struct OllamaStreamParser;

impl FrameParser for OllamaStreamParser {
    type Output = ChatResponse;

    fn on_frame(&mut self, payload: &str) -> Result<Vec<ChatResponse>> {
        let value: Value = serde_json::from_str(payload).map_err(|e| {
            AgentError::Transport(format!("Malformed Ollama stream line: {e}"))
        })?;
        if let Some(error) = value.get("error") {
            return Err(AgentError::Transport(format!("Ollama stream error: {error}")));
        }
        let response = serde_json::from_value(value).map_err(|e| {
            AgentError::Transport(format!("Unexpected Ollama response shape: {e}"))
        })?;
        Ok(vec![response])
    }
}

#[derive(Debug, Default)]
pub struct OllamaAdapter {
    config: OllamaConfig,
    converter: OllamaConverter,
}

impl OllamaAdapter {
    pub const fn new(config: OllamaConfig) -> Self {
        Self {
            config,
            converter: OllamaConverter,
        }
    }

    pub fn from_env() -> Self {
        Self::new(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    type Client = OllamaClient;
    type Converter = OllamaConverter;
    type Tools = Vec<OllamaTool>;

    fn name(&self) -> &'static str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    fn context_limit(&self) -> usize {
        CONTEXT_LIMIT
    }

    fn converter(&self) -> &OllamaConverter {
        &self.converter
    }

    /// No credentials are required, but the URL must be usable
    fn initialize_client(&self) -> Result<OllamaClient> {
        let base = http::trim_base_url(&self.config.api_url);
        Url::parse(&base).map_err(|e| {
            AgentError::Configuration(format!("Invalid OLLAMA_API_URL '{base}': {e}"))
        })?;

        Ok(OllamaClient {
            http: http::build_client()?,
            api_key: self.config.api_key.clone(),
            chat_url: format!("{base}/api/chat"),
        })
    }

    async fn generate(
        &self,
        client: &OllamaClient,
        request: GenerateRequest<'_, NativeMessage<Self>, Vec<OllamaTool>>,
    ) -> Result<ChunkStream<NativeChunk<Self>>> {
        let body = Request {
            model: request.model,
            messages: &request.history.messages,
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
            stream: true,
            options: Options {
                num_predict: request.max_output_tokens,
            },
        };

        let mut builder = client.http.post(&client.chat_url).json(&body);
        if let Some(key) = &client.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = http::send(self.name(), builder, is_rate_limited).await?;

        let converter = self.converter;
        let fragments = parse_frames(response.bytes_stream(), Framing::Ndjson, OllamaStreamParser);
        Ok(Box::pin(fragments.map(move |fragment| {
            fragment.map(|f| converter.create_chunk_wrapper(f))
        })))
    }

    fn transform_tools(&self, tools: &[ToolSchema]) -> Vec<OllamaTool> {
        tools
            .iter()
            .map(|tool| OllamaTool {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_client_needs_no_credentials() {
        let client = OllamaAdapter::localhost().initialize_client().unwrap();
        assert_eq!(client.chat_url, "http://localhost:11434/api/chat");
        assert!(client.api_key.is_none());
    }

    #[test]
    fn invalid_url_is_a_configuration_error() {
        let adapter = OllamaAdapter::new(OllamaConfig {
            api_url: "not a url".into(),
            ..OllamaConfig::default()
        });
        assert!(matches!(
            adapter.initialize_client(),
            Err(AgentError::Configuration(_))
        ));
    }

    #[test]
    fn request_carries_output_limit() {
        let history = agent_core::ProviderHistory::new(
            vec![OllamaMessage::text(OllamaRole::User, "hi")],
            0,
        );
        let tools = OllamaAdapter::default().transform_tools(&[ToolSchema::new(
            "datetime",
            "Current time",
            json!({"type": "object"}),
        )]);
        let body = Request {
            model: DEFAULT_MODEL,
            messages: &history.messages,
            tools: Some(&tools),
            stream: true,
            options: Options { num_predict: 512 },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["options"]["num_predict"], 512);
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["name"], "datetime");
        assert_eq!(value["messages"][0], json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn parser_handles_lines_and_errors() {
        let mut parser = OllamaStreamParser;
        let parsed = parser
            .on_frame(r#"{"model":"llama3.1:8b","message":{"role":"assistant","content":"Hi"},"done":false}"#)
            .unwrap();
        assert_eq!(parsed[0].message.as_ref().unwrap().content, "Hi");

        assert!(matches!(
            parser.on_frame(r#"{"error":"model 'x' not found"}"#),
            Err(AgentError::Transport(m)) if m.contains("not found")
        ));
    }
}
