//! Conversation history.
//!
//! The current session lives in memory and is fed back to the LLM as a
//! sliding window. `clear_session` archives it; the archive is what gets
//! written to disk and summarized into later system prompts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use trainmcp_core::{ChatMessage, Role};

use crate::store::{read_json, write_json, Result};

/// Archived sessions kept on disk.
const MAX_ARCHIVED_SESSIONS: usize = 50;

/// Characters of each past question included in the summary.
const SUMMARY_QUESTION_CHARS: usize = 100;

/// Summary lines kept in the recent-conversation context.
const SUMMARY_LINES: usize = 5;

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Convert for the LLM transcript. Tool entries carry no call id and
    /// are skipped.
    pub fn to_chat_message(&self) -> Option<ChatMessage> {
        match self.role {
            Role::User => Some(ChatMessage::user(self.content.clone())),
            Role::Assistant => Some(ChatMessage::assistant(self.content.clone())),
            Role::System => Some(ChatMessage::system(self.content.clone())),
            Role::Tool => None,
        }
    }
}

/// A finished session as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedSession {
    pub session_id: String,
    #[serde(default)]
    pub messages: Vec<HistoryEntry>,
}

/// History store used by the agent.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Add a message to the current session.
    fn append(&self, role: Role, content: &str);

    /// Last `n` messages of the current session, oldest first.
    fn recent_window(&self, n: usize) -> Vec<HistoryEntry>;

    /// The window sent to the LLM.
    fn session_window(&self) -> Vec<HistoryEntry>;

    /// Short summary of the last `count` archived sessions for the system prompt.
    fn recent_summarized_context(&self, count: usize) -> String;

    /// Archive the current session and start a new one.
    async fn clear_session(&self) -> Result<()>;

    /// Write the archive to disk.
    async fn flush(&self) -> Result<()>;

    fn current_len(&self) -> usize;

    fn archived_len(&self) -> usize;
}

#[derive(Debug, Default)]
struct HistoryState {
    current: Vec<HistoryEntry>,
    archive: Vec<ArchivedSession>,
}

/// JSON-file backed [`HistoryStore`].
#[derive(Debug)]
pub struct ConversationHistory {
    path: PathBuf,
    max_messages: usize,
    state: Mutex<HistoryState>,
}

impl ConversationHistory {
    /// Open the history file at `path`. A missing or unreadable file starts
    /// an empty archive.
    pub fn open(path: impl AsRef<Path>, max_messages: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let archive = match read_json::<Vec<ArchivedSession>>(&path) {
            Ok(Some(archive)) => {
                debug!(path = %path.display(), sessions = archive.len(), "Loaded conversation history");
                archive
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load conversation history");
                Vec::new()
            }
        };

        Self {
            path,
            max_messages,
            state: Mutex::new(HistoryState {
                current: Vec::new(),
                archive,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        let snapshot: Vec<ArchivedSession> = {
            let state = self.state.lock();
            let skip = state.archive.len().saturating_sub(MAX_ARCHIVED_SESSIONS);
            state.archive[skip..].to_vec()
        };
        write_json(&self.path, &snapshot)
    }
}

#[async_trait]
impl HistoryStore for ConversationHistory {
    fn append(&self, role: Role, content: &str) {
        self.state.lock().current.push(HistoryEntry::new(role, content));
    }

    fn recent_window(&self, n: usize) -> Vec<HistoryEntry> {
        let state = self.state.lock();
        let skip = state.current.len().saturating_sub(n);
        state.current[skip..].to_vec()
    }

    fn session_window(&self) -> Vec<HistoryEntry> {
        self.recent_window(self.max_messages)
    }

    fn recent_summarized_context(&self, count: usize) -> String {
        if count == 0 {
            return String::new();
        }

        let state = self.state.lock();
        let skip = state.archive.len().saturating_sub(count);
        let lines: Vec<String> = state.archive[skip..]
            .iter()
            .flat_map(|session| session.messages.iter())
            .filter(|m| m.role == Role::User)
            .map(|m| {
                let question: String = m.content.chars().take(SUMMARY_QUESTION_CHARS).collect();
                format!("User previously asked: {}", question)
            })
            .collect();

        if lines.is_empty() {
            return String::new();
        }

        let keep = lines.len().saturating_sub(SUMMARY_LINES);
        format!("# Recent conversations\n{}", lines[keep..].join("\n"))
    }

    async fn clear_session(&self) -> Result<()> {
        let archived = {
            let mut state = self.state.lock();
            if state.current.is_empty() {
                false
            } else {
                let messages = std::mem::take(&mut state.current);
                state.archive.push(ArchivedSession {
                    session_id: Utc::now().to_rfc3339(),
                    messages,
                });
                true
            }
        };

        if archived {
            self.save()?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.save()
    }

    fn current_len(&self) -> usize {
        self.state.lock().current.len()
    }

    fn archived_len(&self) -> usize {
        self.state.lock().archive.len()
    }
}
