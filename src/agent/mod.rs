//! Agent module - core agent logic.
//!
//! This module contains:
//! - Message types shared with providers and sessions
//! - LLM client trait and the OpenAI-compatible client
//! - The ReAct agent loop
//! - System prompt builder
//! - Context budgeting and history compression
//!
//! # Adding a New LLM Provider
//!
//! See [`llm::ProviderRegistry`] for instructions.

mod compaction;
mod context;
mod loop_impl;
mod message;
pub mod tokens;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use compaction::Compressor;
pub use context::PromptBuilder;
pub use llm::{ChatRequest, ChatResponse, Choice, LlmClient, OpenAiClient, ProviderRegistry, Usage};
pub use loop_impl::{Agent, AgentBuilder, DEFAULT_MAX_ITERATIONS, DEFAULT_TIMEOUT, SUMMARY_TAG};
pub use message::{Message, Retention, Role, ToolCallRequest};
pub use tokens::{estimate_tokens, BudgetManager, ContextWindow, ModelRegistry};
