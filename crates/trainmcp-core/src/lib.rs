//! # trainmcp-core
//!
//! Core types shared by the trainmcp crates.
//!
//! This crate provides:
//! - Configuration loading and validation
//! - Chat message primitives (role-tagged)
//! - Tool definitions exposed to the LLM
//! - Common error types

pub mod config;
pub mod error;
pub mod message;
pub mod tool;

pub use config::Config;
pub use error::{Error, ProviderError, Result};
pub use message::{ChatMessage, Role, ToolCallRequest};
pub use tool::ToolDefinition;
