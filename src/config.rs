//! Configuration management
//!
//! Configuration is loaded once at startup and handed to constructors; nothing
//! here is cached in process-wide state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::Result;
use crate::error::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory path (identity files, memory, skills)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Directory holding one JSONL file per session
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,

    /// LLM provider connection settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// Completion tokens reserved per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tool iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Number of recent messages considered "working memory" (reported by /status)
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,

    /// Upper bound for a single turn, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Message bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Context budgeting settings
    #[serde(default)]
    pub context: ContextConfig,

    /// HEARTBEAT.md polling
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

/// OpenAI-compatible provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of each of the inbound and outbound queues
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Compress history when it no longer fits the model's window
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tokens held back on top of the completion reservation
    #[serde(default = "default_safety_margin")]
    pub safety_margin: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between scans of HEARTBEAT.md
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
}

fn default_workspace() -> PathBuf {
    config_dir().join("workspace")
}

fn default_sessions_dir() -> PathBuf {
    config_dir().join("sessions")
}

fn default_model() -> String {
    "z-ai/glm-4.5-air:free".to_string()
}

fn default_max_tokens() -> usize {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_iterations() -> usize {
    20
}

fn default_memory_window() -> usize {
    50
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_provider_name() -> String {
    "openrouter".to_string()
}

fn default_api_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_queue_size() -> usize {
    1000
}

fn default_safety_margin() -> usize {
    100
}

fn default_heartbeat_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_key: String::new(),
            api_base: default_api_base(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            safety_margin: default_safety_margin(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_heartbeat_interval(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            sessions_dir: default_sessions_dir(),
            provider: ProviderConfig::default(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_iterations: default_max_iterations(),
            memory_window: default_memory_window(),
            timeout_secs: default_timeout_secs(),
            bus: BusConfig::default(),
            context: ContextConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".leo")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from the default location.
///
/// A missing file yields the defaults; a malformed one is an error.
pub fn load() -> Result<Config> {
    load_from(&config_path())
}

/// Load configuration from an explicit path
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!("No config at {:?}, using defaults", path);
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config at {:?}: {}", path, e)))
}

/// Save configuration to the default location
pub fn save(config: &Config) -> Result<()> {
    save_to(config, &config_path())
}

/// Save configuration to an explicit path
pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
