//! Terminal rendering of generation events.
//!
//! Model text goes to stdout as it streams; tool activity and status lines
//! go to stderr so the answer can be piped on its own.

use std::io::Write as _;

use agent_core::{AgentError, FinishReason, GenerationEvent, ToolCallResult};

/// Longest tool result preview printed
const PREVIEW_CHARS: usize = 200;

pub fn event(event: GenerationEvent) {
    match event {
        GenerationEvent::Text(text) => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        GenerationEvent::ToolCall(call) => {
            eprintln!("\n[{}] {}", call.name, serde_json::Value::Object(call.arguments));
        }
        GenerationEvent::ToolResult(result) => {
            eprintln!("[{}] {}", result.name, summarize(&result.content));
        }
        GenerationEvent::Retrying { attempt, wait } => {
            eprintln!(
                "\nRate limited (attempt {attempt}), retrying in {}s...",
                wait.as_secs()
            );
        }
        GenerationEvent::Finished(reason) => {
            println!();
            if reason != FinishReason::Stop {
                eprintln!("[finished: {reason}]");
            }
        }
    }
}

fn summarize(result: &ToolCallResult) -> String {
    let payload = match result.payload() {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let status = if result.is_error() { "failed" } else { "ok" };

    let mut preview: String = payload.chars().take(PREVIEW_CHARS).collect();
    if preview.len() < payload.len() {
        preview.push_str("...");
    }
    format!("{status}: {}", preview.replace('\n', " "))
}

pub fn error(error: &AgentError) -> String {
    format!("Error: {}", error.user_message())
}
