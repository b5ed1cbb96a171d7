//! Skills module - extend agent capabilities

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::Result;

/// Read-only source of the skills summary shown in the system prompt.
pub trait SkillsLoader: Send + Sync {
    fn load_summary(&self) -> Result<String>;
}

/// A loaded skill
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub requires: Vec<String>,
    pub content: String,
    pub path: PathBuf,
}

/// Skill registry - manages available skills
#[derive(Debug, Default)]
pub struct SkillRegistry {
    skills: BTreeMap<String, Skill>,
}

impl SkillRegistry {
    /// Create a new skill registry and load skills from workspace
    pub fn new(workspace: &Path) -> Self {
        let mut registry = Self::default();
        registry.load_from_directory(&workspace.join("skills"));
        registry
    }

    /// Load skills from a directory
    fn load_from_directory(&mut self, path: &Path) {
        let Ok(entries) = std::fs::read_dir(path) else {
            return;
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let skill_path = entry.path();
            if skill_path.is_dir() {
                self.load_skill(&skill_path);
            }
        }
    }

    /// Load a single skill from its directory
    fn load_skill(&mut self, path: &Path) {
        let Ok(content) = std::fs::read_to_string(path.join("SKILL.md")) else {
            return;
        };

        match parse_skill(&content, path) {
            Some(skill) => {
                self.skills.insert(skill.name.clone(), skill);
            }
            None => tracing::debug!("Skipping {:?}: no frontmatter", path),
        }
    }

    pub fn insert(&mut self, skill: Skill) {
        self.skills.insert(skill.name.clone(), skill);
    }

    /// Get a skill by name
    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.get(name)
    }

    /// List all skill names, sorted
    pub fn list(&self) -> Vec<&str> {
        self.skills.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Skill entries for the system prompt. The caller wraps them.
    pub fn build_summary(&self) -> String {
        let mut lines = Vec::new();

        for skill in self.skills.values() {
            lines.push(format!("<skill name=\"{}\">", skill.name));
            lines.push(format!("  <description>{}</description>", skill.description));
            if !skill.requires.is_empty() {
                lines.push(format!("  <requires>{}</requires>", skill.requires.join(", ")));
            }
            lines.push("</skill>".to_string());
        }

        lines.join("\n")
    }
}

impl SkillsLoader for SkillRegistry {
    fn load_summary(&self) -> Result<String> {
        Ok(self.build_summary())
    }
}

/// Parse skill from SKILL.md content
fn parse_skill(content: &str, path: &Path) -> Option<Skill> {
    let rest = content.strip_prefix("---")?;
    let end_idx = rest.find("\n---")?;
    let frontmatter = &rest[..end_idx];
    let body = rest[end_idx + 4..].trim_start_matches('-');

    // key: value pairs only
    let mut name = None;
    let mut description = None;
    let mut requires = Vec::new();

    for line in frontmatter.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "name" => name = Some(value.to_string()),
            "description" => description = Some(value.to_string()),
            "requires" => {
                // [a, b, c] or a, b, c
                requires = value
                    .trim_matches(['[', ']', ' '].as_ref())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            _ => {}
        }
    }

    Some(Skill {
        name: name?,
        description: description.unwrap_or_default(),
        requires,
        content: body.trim().to_string(),
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WEATHER: &str = r#"---
name: weather
description: Get weather information
requires: [web_fetch]
---

# Weather Skill

Use this skill to get weather information.
"#;

    #[test]
    fn test_parse_skill() {
        let skill = parse_skill(WEATHER, &PathBuf::from("/test")).unwrap();
        assert_eq!(skill.name, "weather");
        assert_eq!(skill.description, "Get weather information");
        assert_eq!(skill.requires, vec!["web_fetch"]);
        assert!(skill.content.starts_with("# Weather Skill"));
    }

    #[test]
    fn test_parse_requires_frontmatter() {
        assert!(parse_skill("# just markdown", Path::new("/x")).is_none());
        assert!(parse_skill("---\ndescription: no name\n---\n", Path::new("/x")).is_none());
    }

    #[test]
    fn test_load_from_workspace() {
        let dir = TempDir::new().unwrap();
        let skill_dir = dir.path().join("skills").join("weather");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join("SKILL.md"), WEATHER).unwrap();
        std::fs::create_dir_all(dir.path().join("skills").join("empty")).unwrap();

        let registry = SkillRegistry::new(dir.path());
        assert_eq!(registry.list(), vec!["weather"]);
        assert_eq!(registry.get("weather").unwrap().requires, vec!["web_fetch"]);
    }

    #[test]
    fn test_skill_summary() {
        let mut registry = SkillRegistry::default();
        assert_eq!(registry.load_summary().unwrap(), "");

        registry.insert(Skill {
            name: "test".to_string(),
            description: "A test skill".to_string(),
            requires: vec![],
            content: String::new(),
            path: PathBuf::new(),
        });

        let summary = registry.load_summary().unwrap();
        assert!(!summary.contains("<skills>"));
        assert!(summary.contains("<skill name=\"test\">"));
        assert!(summary.contains("A test skill"));
    }
}
