//! Shared HTTP plumbing for the backends.

use std::time::Duration;

use agent_core::{AgentError, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

/// Time allowed to establish a connection; streaming bodies are not capped
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client shared by every request of one adapter
pub fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| AgentError::Configuration(format!("Failed to create HTTP client: {e}")))
}

/// Send a request and sort failures into rate limits and everything else.
///
/// `is_rate_limited` sees the status and body of every non-success
/// response; network failures are never rate limits.
pub async fn send(
    backend: &str,
    request: RequestBuilder,
    is_rate_limited: impl Fn(StatusCode, &str) -> bool + Send,
) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| AgentError::Transport(format!("{backend} request failed: {e}")))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!(backend, %status, body = %body, "Request rejected");

    if is_rate_limited(status, &body) {
        Err(AgentError::RateLimited(format!("{backend} returned {status}: {body}")))
    } else {
        Err(AgentError::Transport(format!("{backend} returned {status}: {body}")))
    }
}

/// Trim a base URL so paths can be appended with a single slash
pub fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_owned()
}

/// Read an optional, non-empty environment variable
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
