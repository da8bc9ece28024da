//! Generation Loop
//!
//! Drives one backend through request, streaming, tool execution and
//! follow-up requests until the model stops asking for tools.
//!
//! ```text
//! AWAITING_REQUEST ──▶ STREAMING_RESPONSE ──▶ DONE
//!        ▲                     │
//!        └── EXECUTING_TOOLS ◀─┘  (tool use requested)
//! ```
//!
//! A turn is committed to the [`History`] only after its response has been
//! fully consumed and its tools have run. An error at any point before that
//! leaves the history exactly as it was, even though text may already have
//! been emitted to the caller.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::OnceCell;

use crate::budget::{enforce_budget, estimate_size};
use crate::chunk::{ChunkStream, ChunkWrapper, FinishReason, collect_content};
use crate::converter::{HistoryConverter, ProviderHistory, TurnItems};
use crate::error::{AgentError, Result};
use crate::message::{ContentPart, History, Message, ToolCall, ToolCallResult, ToolResult};
use crate::provider::{GenerateRequest, NativeChunk, NativeMessage, ProviderAdapter};
use crate::tool::ToolExecutor;

const DEFAULT_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

/// How rate-limited requests are retried.
///
/// Retries are not counted; they stop only when `max_elapsed` is set and
/// the next wait would run past it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed wait between attempts
    pub backoff: Duration,

    /// Optional wall-clock cap on retrying one request
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
            max_elapsed: None,
        }
    }
}

/// Generation loop configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationConfig {
    /// Model override; the adapter's default model otherwise
    pub model: Option<String>,

    /// Context budget override in approximate tokens
    pub max_context_tokens: Option<usize>,

    /// Maximum tokens to generate per request
    pub max_output_tokens: u32,

    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_context_tokens: None,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Something the caller may want to display while a run is in progress
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationEvent {
    /// Incremental response text
    Text(String),
    /// The model requested a tool
    ToolCall(ToolCall),
    /// A tool finished
    ToolResult(ToolResult),
    /// A request was rate limited and will be retried after `wait`
    Retrying { attempt: u32, wait: Duration },
    /// The run ended
    Finished(FinishReason),
}

/// Summary of a finished run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Finish reason of the last response
    pub finish_reason: FinishReason,

    /// Number of responses consumed (retried attempts not included)
    pub requests: usize,

    /// All text the model produced during the run
    pub text: String,
}

/// Backend-independent view of a configured generation loop
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    /// Backend name
    fn backend(&self) -> &'static str;

    /// Model in use
    fn model(&self) -> &str;

    /// Run the generation loop on `history` until the model stops
    async fn generate_with_tools(
        &self,
        history: &mut History,
        tools: &dyn ToolExecutor,
        on_event: &mut (dyn FnMut(GenerationEvent) + Send),
    ) -> Result<TurnOutcome>;
}

/// Generation loop over one provider adapter.
///
/// Owns the adapter exclusively and creates its client on first use.
pub struct Orchestrator<P: ProviderAdapter> {
    adapter: P,
    config: GenerationConfig,
    client: OnceCell<P::Client>,
}

impl<P: ProviderAdapter> Orchestrator<P> {
    pub fn new(adapter: P, config: GenerationConfig) -> Self {
        Self {
            adapter,
            config,
            client: OnceCell::new(),
        }
    }

    pub const fn adapter(&self) -> &P {
        &self.adapter
    }

    pub const fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Context budget in approximate tokens
    pub fn context_limit(&self) -> usize {
        self.config
            .max_context_tokens
            .unwrap_or_else(|| self.adapter.context_limit())
    }

    async fn client(&self) -> Result<&P::Client> {
        self.client
            .get_or_try_init(|| async { self.adapter.initialize_client() })
            .await
    }

    /// Pruned copy of the history when it is over budget.
    ///
    /// The caller commits the copy only once the turn it was sent with
    /// succeeds.
    fn fit_budget(&self, history: &History) -> Result<Option<History>> {
        let limit = self.context_limit();
        if estimate_size(history) <= limit {
            return Ok(None);
        }

        let mut candidate = history.clone();
        if enforce_budget(&mut candidate, limit) {
            Ok(Some(candidate))
        } else {
            Err(AgentError::BudgetExceeded {
                estimated: estimate_size(&candidate),
                limit,
            })
        }
    }

    /// Issue the request, waiting out rate limits
    async fn request(
        &self,
        client: &P::Client,
        system_message: Option<&str>,
        history: &ProviderHistory<NativeMessage<P>>,
        tools: &P::Tools,
        on_event: &mut (dyn FnMut(GenerationEvent) + Send),
    ) -> Result<ChunkStream<NativeChunk<P>>> {
        let policy = &self.config.retry;
        let started = tokio::time::Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let request = GenerateRequest {
                model: self.model(),
                system_message,
                history,
                tools,
                max_output_tokens: self.config.max_output_tokens,
            };

            match self.adapter.generate(client, request).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_rate_limited() => {
                    let elapsed = started.elapsed();
                    if policy
                        .max_elapsed
                        .is_some_and(|max| elapsed + policy.backoff > max)
                    {
                        return Err(AgentError::RetryTimeout {
                            elapsed_secs: elapsed.as_secs(),
                        });
                    }

                    tracing::warn!(
                        backend = self.adapter.name(),
                        attempt,
                        wait_secs = policy.backoff.as_secs(),
                        error = %e,
                        "Rate limited, retrying"
                    );
                    on_event(GenerationEvent::Retrying {
                        attempt,
                        wait: policy.backoff,
                    });
                    tokio::time::sleep(policy.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Run one tool call; failures become failure results
async fn execute_tool(tools: &dyn ToolExecutor, call: &ToolCall) -> ToolResult {
    tracing::debug!(tool = %call.name, id = %call.id, "Executing tool");

    let content = match tools.call_tool(&call.name, &call.arguments, call).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(tool = %call.name, error = %e, "Tool failed");
            ToolCallResult::error(e.to_string())
        }
    };

    ToolResult::new(call.id.clone(), call.name.clone(), content)
}

#[async_trait]
impl<P: ProviderAdapter> ConversationEngine for Orchestrator<P> {
    fn backend(&self) -> &'static str {
        self.adapter.name()
    }

    fn model(&self) -> &str {
        self.config
            .model
            .as_deref()
            .unwrap_or_else(|| self.adapter.default_model())
    }

    async fn generate_with_tools(
        &self,
        history: &mut History,
        tools: &dyn ToolExecutor,
        on_event: &mut (dyn FnMut(GenerationEvent) + Send),
    ) -> Result<TurnOutcome> {
        let client = self.client().await?;
        let converter = self.adapter.converter();
        let native_tools = self.adapter.transform_tools(&tools.schemas());

        let mut rendered: Option<ProviderHistory<NativeMessage<P>>> = None;
        let mut requests = 0;
        let mut text = String::new();

        loop {
            let pruned = self.fit_budget(history)?;
            let mut provider_history = match (&pruned, rendered.take()) {
                (None, Some(rendered)) => rendered,
                (Some(pruned), _) => converter.from_history(pruned)?,
                (None, None) => converter.from_history(history)?,
            };

            tracing::debug!(
                backend = self.adapter.name(),
                request = requests + 1,
                messages = provider_history.len(),
                "Sending request"
            );
            let mut stream = self
                .request(
                    client,
                    history.system_message.as_deref(),
                    &provider_history,
                    &native_tools,
                    on_event,
                )
                .await?;
            requests += 1;

            let mut chunks = Vec::new();
            let mut reported = None;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if !chunk.text().is_empty() {
                    text.push_str(chunk.text());
                    on_event(GenerationEvent::Text(chunk.text().to_owned()));
                }
                for call in chunk.tool_calls() {
                    on_event(GenerationEvent::ToolCall(call.clone()));
                }
                if let Some(reason) = chunk.finish_reason() {
                    tracing::trace!(
                        backend = self.adapter.name(),
                        fragment = ?chunk.raw(),
                        "Terminal fragment"
                    );
                    reported = Some(reason);
                }
                chunks.push(chunk);
            }
            drop(stream);

            let content = collect_content(&chunks);
            let calls: Vec<ToolCall> = content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ToolCall(call) => Some(call.clone()),
                    _ => None,
                })
                .collect();
            let finish_reason = FinishReason::resolve(reported, !calls.is_empty());

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                let result = execute_tool(tools, call).await;
                on_event(GenerationEvent::ToolResult(result.clone()));
                results.push(result);
            }

            let mut turn = Vec::with_capacity(2);
            if content.is_empty() {
                tracing::debug!("Response carried no content, nothing to record");
            } else {
                turn.push(Message::model(content));
            }
            if !results.is_empty() {
                turn.push(Message::tool(results.clone()));
            }

            let continuing = finish_reason == FinishReason::ToolUse;
            if continuing {
                provider_history.append(converter.to_history_item(TurnItems::Chunks(&chunks))?);
                provider_history
                    .append(converter.to_history_item(TurnItems::ToolResults(&results))?);
            }
            match pruned {
                Some(mut pruned) => {
                    pruned.add_messages(turn)?;
                    *history = pruned;
                }
                None => history.add_messages(turn)?,
            }

            if !continuing {
                tracing::debug!(%finish_reason, requests, "Generation finished");
                on_event(GenerationEvent::Finished(finish_reason));
                return Ok(TurnOutcome {
                    finish_reason,
                    requests,
                    text,
                });
            }
            rendered = Some(provider_history);
        }
    }
}
