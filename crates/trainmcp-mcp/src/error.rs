//! MCP-specific error types.

use std::time::Duration;

use thiserror::Error;

/// Longest reply fragment kept in a decode error.
const FRAGMENT_LIMIT: usize = 200;

/// A reply body that could not be turned into a JSON-RPC message.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// SSE-framed reply without any `data:` line.
    #[error("SSE reply has no data line: {fragment}")]
    MissingData { fragment: String },

    /// The payload was not a JSON-RPC object.
    #[error("invalid JSON in reply ({source}): {fragment}")]
    InvalidJson {
        fragment: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    pub fn missing_data(body: &str) -> Self {
        Self::MissingData {
            fragment: truncate_fragment(body),
        }
    }

    pub fn invalid_json(payload: &str, source: serde_json::Error) -> Self {
        Self::InvalidJson {
            fragment: truncate_fragment(payload),
            source,
        }
    }

    /// The offending piece of the reply.
    pub fn fragment(&self) -> &str {
        match self {
            Self::MissingData { fragment } | Self::InvalidJson { fragment, .. } => fragment,
        }
    }
}

fn truncate_fragment(text: &str) -> String {
    match text.char_indices().nth(FRAGMENT_LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Errors that can occur during transport operations.
///
/// All of these are retryable from the correlator's point of view.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request could not be sent or its body not read.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The request did not finish within its deadline.
    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The server answered with a non-success status.
    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The reply body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A success reply carried an id other than the one sent.
    #[error("reply id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: u64, actual: String },

    /// Transport is not open.
    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Server returned a JSON-RPC error object. Never retried.
    #[error("server error (code {code}): {message}")]
    Server { code: i64, message: String },

    /// Every attempt of a call failed at the transport level.
    #[error("{method} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        method: String,
        attempts: u32,
        #[source]
        last: TransportError,
    },

    /// The connect handshake failed on every attempt.
    #[error("could not connect after {attempts} attempts: {reason}")]
    ConnectFailed { attempts: u32, reason: String },

    /// Protocol-level error (unexpected result shape).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Session is not in a state that allows the operation.
    #[error("invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn server_error(code: i64, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<McpError> for trainmcp_core::Error {
    fn from(e: McpError) -> Self {
        trainmcp_core::Error::Mcp(e.to_string())
    }
}
