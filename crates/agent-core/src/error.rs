//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Missing or invalid credentials / endpoint configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Conversation invariant violated (tool call / tool result pairing)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A converter cannot represent a content part or role
    #[error("Unsupported content for {backend}: {detail}")]
    UnsupportedContent { backend: &'static str, detail: String },

    /// Backend asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Any other backend or network failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Conversation could not be pruned under the context budget
    #[error("Conversation budget exceeded: ~{estimated} tokens (limit: {limit})")]
    BudgetExceeded { estimated: usize, limit: usize },

    /// Rate-limit retries ran past the configured wall-clock limit
    #[error("Gave up retrying after {elapsed_secs}s of rate limiting")]
    RetryTimeout { elapsed_secs: u64 },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Create an unsupported-content error for a backend
    pub fn unsupported(backend: &'static str, detail: impl Into<String>) -> Self {
        Self::UnsupportedContent {
            backend,
            detail: detail.into(),
        }
    }

    /// Whether the generation loop should retry the same request.
    ///
    /// Rate limiting is the only transient condition; everything else
    /// propagates to the caller of the turn.
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(msg) => format!("Configuration problem: {msg}"),
            Self::Validation(msg) => format!("The conversation is inconsistent: {msg}"),
            Self::UnsupportedContent { backend, .. } => {
                format!("The conversation contains content that {backend} cannot represent.")
            }
            Self::RateLimited(_) => "The AI service is rate limiting requests. Please wait a moment.".into(),
            Self::Transport(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ToolExecution(msg) => format!("Tool error: {msg}"),
            Self::BudgetExceeded { .. } => {
                "The conversation is too long. Please start a new session.".into()
            }
            Self::RetryTimeout { .. } => {
                "The AI service kept rate limiting requests. Please try again later.".into()
            }
            _ => "An unexpected error occurred.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limits_are_retryable() {
        assert!(AgentError::RateLimited("429".into()).is_rate_limited());
        assert!(!AgentError::Transport("503".into()).is_rate_limited());
        assert!(!AgentError::Configuration("no key".into()).is_rate_limited());
        assert!(
            !AgentError::Io(std::io::Error::new(std::io::ErrorKind::Other, "reset"))
                .is_rate_limited()
        );
    }

    #[test]
    fn io_and_json_failures_get_the_generic_message() {
        let io = AgentError::from(std::io::Error::new(std::io::ErrorKind::Other, "reset"));
        assert_eq!(io.user_message(), "An unexpected error occurred.");

        let json = AgentError::from(serde_json::from_str::<u8>("x").unwrap_err());
        assert_eq!(json.user_message(), "An unexpected error occurred.");
    }

    #[test]
    fn budget_error_mentions_limit() {
        let err = AgentError::BudgetExceeded {
            estimated: 120,
            limit: 100,
        };
        assert!(err.to_string().contains("limit: 100"));
    }
}
