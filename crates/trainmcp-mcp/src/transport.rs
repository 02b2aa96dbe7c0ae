//! MCP transport implementations.
//!
//! The transport is a thin HTTP layer: one POST per JSON-RPC request and a
//! long-lived GET for the server's event stream. Retries, id correlation and
//! reply decoding live above it in the correlator.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::TransportError;

/// Byte chunks of an open event stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Trait for MCP transport implementations.
///
/// Methods take `&self` so a single transport can serve request calls, the
/// event-stream listener and the heartbeat concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Prepare the transport for use. Idempotent.
    async fn open(&self) -> Result<(), TransportError>;

    /// POST a JSON body and return the raw reply text.
    async fn post(&self, url: &str, body: String, timeout: Duration)
        -> Result<String, TransportError>;

    /// Open a streaming GET on `url`.
    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError>;

    /// Release the transport. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the transport is open.
    fn is_open(&self) -> bool;
}

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub user_agent: String,
    pub proxy: Option<String>,
    pub verify_ssl: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("trainmcp/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
            verify_ssl: true,
        }
    }
}

impl HttpTransportConfig {
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }
}

/// HTTP transport backed by `reqwest`.
///
/// No client-wide timeout is set: request deadlines are per POST, and the
/// event stream must be allowed to stay open indefinitely.
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: RwLock<Option<reqwest::Client>>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    fn build_client(&self) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.config.user_agent.clone())
            .danger_accept_invalid_certs(!self.config.verify_ssl);

        // Only an explicit proxy is used; environment proxies are ignored
        builder = match self.config.proxy {
            Some(ref proxy) => {
                let proxy =
                    reqwest::Proxy::all(proxy).map_err(|e| TransportError::Http(e.to_string()))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        builder.build().map_err(|e| TransportError::Http(e.to_string()))
    }

    fn client(&self) -> Result<reqwest::Client, TransportError> {
        self.client.read().clone().ok_or(TransportError::NotConnected)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(HttpTransportConfig::default())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self) -> Result<(), TransportError> {
        if self.client.read().is_some() {
            return Ok(());
        }
        let client = self.build_client()?;
        *self.client.write() = Some(client);
        debug!("HTTP transport opened");
        Ok(())
    }

    async fn post(
        &self,
        url: &str,
        body: String,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let client = self.client()?;

        debug!(url = url, bytes = body.len(), "POST to MCP server");

        let response = client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(text)
    }

    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError> {
        let client = self.client()?;

        let response = client
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| TransportError::Http(e.to_string()))
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.client.write().take().is_some() {
            debug!("HTTP transport closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.client.read().is_some()
    }
}
