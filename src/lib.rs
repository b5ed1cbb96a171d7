//! Leo - personal AI assistant core
//!
//! This library provides the message bus that connects chat adapters to the
//! agent, the ReAct agent loop with tool execution, and context budgeting
//! with history compression.

pub mod adapters;
pub mod agent;
pub mod bus;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod memory;
pub mod session;
pub mod skills;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
