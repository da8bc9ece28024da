//! Backend Selection
//!
//! The closed set of supported backends, chosen once per session either by
//! name or from the credentials present in the environment.

use std::fmt;
use std::str::FromStr;

use agent_core::{
    AgentError, ConversationEngine, GenerationConfig, GenerationEvent, History, Orchestrator,
    Result, ToolExecutor, TurnOutcome,
};
use async_trait::async_trait;

use crate::claude::ClaudeAdapter;
use crate::gemini::GeminiAdapter;
use crate::http;
use crate::ollama::OllamaAdapter;
use crate::openai::OpenAiAdapter;

/// Supported backend names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Claude,
    Gemini,
    Ollama,
    OpenAi,
}

impl BackendKind {
    pub const ALL: [Self; 4] = [Self::Claude, Self::Gemini, Self::Ollama, Self::OpenAi];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        }
    }

    /// Pick the backend whose API key is set, in order Claude, Gemini,
    /// OpenAI; Ollama needs no key and is the fallback.
    pub fn detect() -> Self {
        Self::detect_with(http::env_var)
    }

    fn detect_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        [
            ("ANTHROPIC_API_KEY", Self::Claude),
            ("GEMINI_API_KEY", Self::Gemini),
            ("OPENAI_API_KEY", Self::OpenAi),
        ]
        .into_iter()
        .find(|(key, _)| lookup(key).is_some())
        .map_or(Self::Ollama, |(_, kind)| kind)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AgentError;

    fn from_str(name: &str) -> Result<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| {
                AgentError::Configuration(format!(
                    "Unknown engine '{name}', expected one of: claude, gemini, ollama, openai"
                ))
            })
    }
}

/// A generation loop over one of the supported backends
pub enum Backend {
    Claude(Orchestrator<ClaudeAdapter>),
    Gemini(Orchestrator<GeminiAdapter>),
    Ollama(Orchestrator<OllamaAdapter>),
    OpenAi(Orchestrator<OpenAiAdapter>),
}

/// Forward a call to whichever orchestrator is inside
macro_rules! dispatch {
    ($backend:expr, $engine:ident => $call:expr) => {
        match $backend {
            Backend::Claude($engine) => $call,
            Backend::Gemini($engine) => $call,
            Backend::Ollama($engine) => $call,
            Backend::OpenAi($engine) => $call,
        }
    };
}

impl Backend {
    /// Build a backend configured from the environment.
    ///
    /// Credentials are checked on the first request, not here.
    pub fn new(kind: BackendKind, config: GenerationConfig) -> Self {
        tracing::debug!(backend = %kind, model = ?config.model, "Creating backend");
        match kind {
            BackendKind::Claude => Self::Claude(Orchestrator::new(ClaudeAdapter::from_env(), config)),
            BackendKind::Gemini => Self::Gemini(Orchestrator::new(GeminiAdapter::from_env(), config)),
            BackendKind::Ollama => Self::Ollama(Orchestrator::new(OllamaAdapter::from_env(), config)),
            BackendKind::OpenAi => Self::OpenAi(Orchestrator::new(OpenAiAdapter::from_env(), config)),
        }
    }

    /// Backend by name, case-insensitive
    pub fn from_name(name: &str, config: GenerationConfig) -> Result<Self> {
        Ok(Self::new(name.parse()?, config))
    }

    /// Backend chosen from the credentials in the environment
    pub fn detect(config: GenerationConfig) -> Self {
        Self::new(BackendKind::detect(), config)
    }

    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Claude(_) => BackendKind::Claude,
            Self::Gemini(_) => BackendKind::Gemini,
            Self::Ollama(_) => BackendKind::Ollama,
            Self::OpenAi(_) => BackendKind::OpenAi,
        }
    }

    /// Context budget in approximate tokens
    pub fn context_limit(&self) -> usize {
        dispatch!(self, engine => engine.context_limit())
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind())
            .field("model", &self.model())
            .finish()
    }
}

#[async_trait]
impl ConversationEngine for Backend {
    fn backend(&self) -> &'static str {
        self.kind().as_str()
    }

    fn model(&self) -> &str {
        dispatch!(self, engine => engine.model())
    }

    async fn generate_with_tools(
        &self,
        history: &mut History,
        tools: &dyn ToolExecutor,
        on_event: &mut (dyn FnMut(GenerationEvent) + Send),
    ) -> Result<TurnOutcome> {
        dispatch!(self, engine => engine.generate_with_tools(history, tools, on_event).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!("Claude".parse::<BackendKind>().unwrap(), BackendKind::Claude);
        assert_eq!(" OPENAI ".parse::<BackendKind>().unwrap(), BackendKind::OpenAi);
        assert_eq!("gemini".parse::<BackendKind>().unwrap(), BackendKind::Gemini);
        for kind in BackendKind::ALL {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_name_is_a_configuration_error() {
        let err = Backend::from_name("mistral", GenerationConfig::default()).unwrap_err();
        assert!(matches!(err, AgentError::Configuration(m) if m.contains("mistral")));
    }

    #[test]
    fn detection_order() {
        let present = |keys: &'static [&'static str]| {
            move |name: &str| keys.contains(&name).then(|| "key".to_owned())
        };

        assert_eq!(
            BackendKind::detect_with(present(&["OPENAI_API_KEY", "ANTHROPIC_API_KEY"])),
            BackendKind::Claude
        );
        assert_eq!(
            BackendKind::detect_with(present(&["OPENAI_API_KEY", "GEMINI_API_KEY"])),
            BackendKind::Gemini
        );
        assert_eq!(
            BackendKind::detect_with(present(&["OPENAI_API_KEY"])),
            BackendKind::OpenAi
        );
        assert_eq!(BackendKind::detect_with(present(&[])), BackendKind::Ollama);
    }

    #[test]
    fn model_override_and_defaults() {
        let backend = Backend::new(BackendKind::Ollama, GenerationConfig::default());
        assert_eq!(backend.backend(), "ollama");
        assert_eq!(backend.model(), crate::ollama::DEFAULT_MODEL);
        assert_eq!(backend.context_limit(), 32_768);

        let backend = Backend::from_name(
            "claude",
            GenerationConfig {
                model: Some("claude-sonnet-4-20250514".into()),
                max_context_tokens: Some(50_000),
                ..GenerationConfig::default()
            },
        )
        .unwrap();
        assert_eq!(backend.kind(), BackendKind::Claude);
        assert_eq!(backend.model(), "claude-sonnet-4-20250514");
        assert_eq!(backend.context_limit(), 50_000);
    }
}
