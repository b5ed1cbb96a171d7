//! System prompt builder.
//!
//! The prompt is assembled fresh for every turn from: the core identity, the
//! workspace identity files, long-term memory, the skills summary and the
//! current time. Sections with nothing to say are left out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::memory::MemoryLoader;
use crate::skills::SkillsLoader;

/// Workspace identity files, in prompt order, with the tag each is wrapped in.
const IDENTITY_FILES: [(&str, &str); 5] = [
    ("agents", "AGENTS.md"),
    ("soul", "SOUL.md"),
    ("user", "USER.md"),
    ("tools", "TOOLS.md"),
    ("identity", "IDENTITY.md"),
];

const CORE_IDENTITY: &str = r#"You are Leo, a personal AI assistant. You are helpful, capable, and proactive.

You have access to tools that let you interact with the filesystem, run shell commands, search the web, and manage your own memory and skills.

Key behaviors:
- Use your tools proactively to help the user
- Remember important information by updating your memory files
- When you learn something new or develop a useful capability, consider creating a skill for it
- Be concise but thorough in your responses
- If you're unsure about something, say so and suggest ways to find out

Memory system:
- memory/MEMORY.md contains long-term facts about the user and context (always loaded)
- When the user tells you to remember something, write it there"#;

/// Builds the system prompt for a turn.
#[derive(Clone)]
pub struct PromptBuilder {
    workspace: PathBuf,
    memory: Option<Arc<dyn MemoryLoader>>,
    skills: Option<Arc<dyn SkillsLoader>>,
}

impl PromptBuilder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            memory: None,
            skills: None,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryLoader>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_skills(mut self, skills: Arc<dyn SkillsLoader>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Build the prompt stamped with the current time.
    pub fn build(&self) -> String {
        self.build_at(Utc::now())
    }

    pub fn build_at(&self, now: DateTime<Utc>) -> String {
        let mut parts = Vec::with_capacity(IDENTITY_FILES.len() + 4);
        parts.push(CORE_IDENTITY.to_string());

        for (tag, filename) in IDENTITY_FILES {
            if let Some(content) = read_nonempty(&self.workspace.join(filename)) {
                parts.push(format!("<{tag}>\n{content}\n</{tag}>"));
            }
        }

        if let Some(memory) = &self.memory {
            match memory.load_memory() {
                Ok(text) if !text.is_empty() => parts.push(format!("<memory>\n{text}\n</memory>")),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Skipping memory section"),
            }
        }

        if let Some(skills) = &self.skills {
            match skills.load_summary() {
                Ok(text) if !text.is_empty() => parts.push(format!("<skills>\n{text}\n</skills>")),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Skipping skills section"),
            }
        }

        parts.push(format!(
            "<current_time>{}</current_time>",
            now.format("%Y-%m-%d %H:%M UTC")
        ));

        parts.join("\n\n")
    }
}

fn read_nonempty(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .filter(|content| !content.trim().is_empty())
}
