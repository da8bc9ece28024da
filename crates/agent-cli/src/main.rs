//! agent - chat with Claude, Gemini, Ollama or OpenAI from the terminal
//!
//! Runs one prompt (`--prompt`) or an interactive session on stdin. The
//! model can call the built-in tools, which operate on `--path`.

mod context;
mod render;
mod tools;

use std::io::Write as _;
use std::path::PathBuf;

use agent_core::{ConversationEngine, GenerationConfig, History, Session, ToolRegistry};
use agent_runtime::Backend;
use anyhow::Context as _;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Chat with an LLM backend that can call local tools
#[derive(Parser, Debug)]
#[command(name = "agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend: claude, gemini, ollama or openai (detected from API keys if omitted)
    #[arg(long, short = 'e')]
    engine: Option<String>,

    /// Model name (backend default if omitted)
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Single prompt mode (non-interactive)
    #[arg(long, short = 'p')]
    prompt: Option<String>,

    /// Working directory for file tools
    #[arg(long, default_value = ".")]
    path: PathBuf,

    /// Directory with system.md and project context files, relative to --path
    #[arg(long, default_value = ".agent")]
    context_dir: PathBuf,

    /// Context budget in approximate tokens (backend default if omitted)
    #[arg(long)]
    max_context_tokens: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // stdout carries the conversation, logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let work_dir = args
        .path
        .canonicalize()
        .with_context(|| format!("Working directory {} not found", args.path.display()))?;
    let project = context::load(&work_dir.join(&args.context_dir))?;

    let config = GenerationConfig {
        model: args.model,
        max_context_tokens: args.max_context_tokens,
        ..GenerationConfig::default()
    };
    let backend = match args.engine.as_deref() {
        Some(name) => Backend::from_name(name, config)?,
        None => Backend::detect(config),
    };
    eprintln!("Using {} ({})", backend.backend(), backend.model());

    let tools = tools::registry(&work_dir);
    let mut session = Session::new(
        backend,
        History::new(project.system_message, project.context),
    );
    tracing::info!(session = %session.id, tools = tools.len(), "Session started");

    if let Some(prompt) = args.prompt {
        run_turn(&mut session, &prompt, &tools).await?;
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line == "exit" {
            break;
        }
        if line.is_empty() {
            continue;
        }

        if let Err(e) = run_turn(&mut session, line, &tools).await {
            eprintln!("\n{}", render::error(&e));
        }
    }

    tracing::info!(
        session = %session.id,
        title = %session.title(),
        messages = session.history().len(),
        "Session ended"
    );
    Ok(())
}

async fn run_turn(
    session: &mut Session<Backend>,
    prompt: &str,
    tools: &ToolRegistry,
) -> agent_core::Result<()> {
    let mut on_event = render::event;
    let outcome = session.send(Some(prompt), tools, &mut on_event).await?;
    tracing::debug!(
        requests = outcome.requests,
        finish_reason = %outcome.finish_reason,
        "Turn complete"
    );
    Ok(())
}
