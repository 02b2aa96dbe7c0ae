//! # trainmcp-mcp
//!
//! Client for a remote MCP server speaking JSON-RPC 2.0 over HTTP.
//!
//! Every request is a `POST {base}/mcp`; the server may answer with a bare
//! JSON body or with an SSE-framed one (`event:`/`data:` lines). A long-lived
//! `GET {base}/sse` stream and a periodic `ping` keep the session healthy.
//!
//! # Example
//!
//! ```ignore
//! use trainmcp_mcp::McpSession;
//!
//! let session = McpSession::from_config(&config.mcp_server);
//! session.connect().await?;
//!
//! for tool in session.catalog().definitions() {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//!
//! let result = session
//!     .call_tool("get-current-date", serde_json::json!({}))
//!     .await?;
//! session.cleanup().await;
//! ```

pub mod catalog;
pub mod codec;
pub mod correlator;
pub mod error;
pub mod protocol;
pub mod session;
pub mod sse;
pub mod transport;

#[cfg(test)]
mod mock;

pub use catalog::ToolCatalog;
pub use correlator::{Correlator, RetryPolicy, Sleeper, TokioSleeper};
pub use error::{DecodeError, McpError, TransportError};
pub use protocol::{InitializeResult, ServerInfo};
pub use session::{McpSession, SessionOptions, SessionState};
pub use transport::{ByteStream, HttpTransport, HttpTransportConfig, Transport};
