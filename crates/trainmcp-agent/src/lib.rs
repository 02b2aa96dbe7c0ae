//! # trainmcp-agent
//!
//! The tool-calling loop that answers a user turn.
//!
//! This crate provides:
//! - The [`Agent`] loop: ask the model, run the tools it requests over MCP,
//!   feed the results back, repeat until it answers or the round limit hits
//! - System prompt assembly
//! - The built-in station code table used as a fallback by the model

pub mod agent;
pub mod prompt;
pub mod stations;

pub use agent::{
    normalize_tool_result, Agent, AgentBuilder, AgentConfig, AgentError, AgentEventHandler,
    AgentResult, NoOpEventHandler,
};
pub use prompt::SystemPrompt;
pub use stations::StationCodeMapper;
