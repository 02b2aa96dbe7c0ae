//! # trainmcp-memory
//!
//! File-backed memory for the assistant.
//!
//! This crate provides:
//! - [`HistoryStore`]: the running conversation plus archived past sessions
//! - [`ProfileStore`]: a persistent user profile rendered into the system prompt
//!
//! Both are plain JSON documents written atomically.

pub mod history;
pub mod profile;
pub mod store;

pub use history::{ArchivedSession, ConversationHistory, HistoryEntry, HistoryStore};
pub use profile::{ProfileStore, UserProfile, UserProfileStore};
pub use store::{Result, StoreError};
