//! Project context loading.
//!
//! The context directory holds `system.md`, used as the system message, and
//! any number of other text files that are concatenated, in name order,
//! into the project context sent ahead of the conversation.

use std::path::Path;

use anyhow::Context as _;

const SYSTEM_FILE: &str = "system.md";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProjectContext {
    pub system_message: Option<String>,
    pub context: Option<String>,
}

pub fn load(dir: &Path) -> anyhow::Result<ProjectContext> {
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "No context directory");
        return Ok(ProjectContext::default());
    }

    let mut files = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    files.retain(|path| path.is_file());
    files.sort();

    let mut system_message = None;
    let mut sections = Vec::new();
    for path in files {
        let Ok(content) = std::fs::read_to_string(&path) else {
            tracing::warn!(file = %path.display(), "Skipping non-text context file");
            continue;
        };
        let content = content.trim();
        if content.is_empty() {
            continue;
        }

        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if name == SYSTEM_FILE {
            system_message = Some(content.to_owned());
        } else {
            sections.push(format!("# {name}\n\n{content}"));
        }
    }

    tracing::info!(
        files = sections.len(),
        system = system_message.is_some(),
        "Loaded project context"
    );
    Ok(ProjectContext {
        system_message,
        context: (!sections.is_empty()).then(|| sections.join("\n\n")),
    })
}
