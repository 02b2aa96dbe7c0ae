//! # trainmcp-providers
//!
//! LLM provider abstraction for trainmcp.
//!
//! This crate provides:
//! - The [`Provider`] trait the agent drives
//! - An OpenAI-compatible chat-completions client (DeepSeek by default)

pub mod openai;
pub mod traits;

pub use openai::OpenAIProvider;
pub use traits::{CompletionRequest, CompletionResponse, FinishReason, Provider, Usage};
