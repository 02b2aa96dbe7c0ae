//! MCP session lifecycle.
//!
//! A session owns the transport, the correlator and the tool catalog, and
//! runs two background tasks while connected: a listener on the server's
//! event stream and a periodic `ping`. Both stop when the session is cleaned
//! up or reconnected.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trainmcp_core::config::{ConnectionConfig, McpServerConfig};

use crate::catalog::ToolCatalog;
use crate::correlator::{Correlator, RetryPolicy, Sleeper, TokioSleeper};
use crate::error::McpError;
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, ListToolsResult, ServerInfo,
    METHOD_INITIALIZE, METHOD_PING, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::sse::SseParser;
use crate::transport::{HttpTransport, HttpTransportConfig, Transport};

/// Characters of an SSE event logged at debug level.
const SSE_PREVIEW_CHARS: usize = 100;

/// Lifecycle state of an MCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never connected.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake done, event stream healthy (or not used).
    Connected,
    /// Handshake done but the event stream dropped. Calls still work.
    Degraded,
    /// Cleaned up. Terminal until the next `connect`.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Degraded => write!(f, "degraded"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Session tuning, usually derived from [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub retry: RetryPolicy,
    pub sse_enabled: bool,
    pub sse_reconnect_interval: Duration,
    /// `None` disables the heartbeat
    pub heartbeat_interval: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}

impl SessionOptions {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(config),
            sse_enabled: config.sse_reconnect_enabled,
            sse_reconnect_interval: config.sse_reconnect_interval(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

/// Handles of the background tasks of one connection.
struct BackgroundTasks {
    cancel: CancellationToken,
    sse: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in [self.sse.take(), self.heartbeat.take()].into_iter().flatten() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(error = %e, "MCP background task panicked");
                }
            }
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A session with one MCP server.
pub struct McpSession {
    base_url: String,
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    sleeper: Arc<dyn Sleeper>,
    options: SessionOptions,
    state: Arc<RwLock<SessionState>>,
    catalog: RwLock<Arc<ToolCatalog>>,
    server_info: RwLock<Option<ServerInfo>>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl McpSession {
    /// Create a session for `base_url` (without the `/mcp` suffix).
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
        let correlator = Correlator::new(
            transport.clone(),
            format!("{}/mcp", base_url),
            options.retry.clone(),
        )
        .with_sleeper(sleeper.clone());

        Self {
            base_url,
            transport,
            correlator: Arc::new(correlator),
            sleeper,
            options,
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            catalog: RwLock::new(Arc::new(ToolCatalog::default())),
            server_info: RwLock::new(None),
            tasks: Mutex::new(None),
        }
    }

    /// Create a session over HTTP from the `mcp_server` config section.
    pub fn from_config(config: &McpServerConfig) -> Self {
        let transport = HttpTransport::new(HttpTransportConfig::default());
        Self::new(
            config.url.clone(),
            Arc::new(transport),
            SessionOptions::from_config(&config.connection),
        )
    }

    /// Replace the sleeper used for every backoff wait.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        let correlator = Correlator::new(
            self.transport.clone(),
            format!("{}/mcp", self.base_url),
            self.options.retry.clone(),
        )
        .with_sleeper(sleeper.clone());
        self.correlator = Arc::new(correlator);
        self.sleeper = sleeper;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// True once the handshake succeeded and until cleanup.
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), SessionState::Connected | SessionState::Degraded)
    }

    /// Current tool catalog snapshot.
    pub fn catalog(&self) -> Arc<ToolCatalog> {
        self.catalog.read().clone()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// Open the transport, run the handshake and load the tool catalog.
    ///
    /// Each attempt performs `initialize` followed by `tools/list`; a failure
    /// anywhere fails the attempt. When every attempt fails the session is
    /// cleaned up.
    pub async fn connect(&self) -> Result<(), McpError> {
        self.stop_background_tasks().await;

        let attempts = self.options.retry.effective_attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            self.set_state(SessionState::Connecting);
            info!(
                url = %self.base_url,
                attempt = attempt + 1,
                attempts = attempts,
                "Connecting to MCP server"
            );

            match self.handshake().await {
                Ok(()) => {
                    self.set_state(SessionState::Connected);
                    self.start_background_tasks();
                    info!(
                        url = %self.base_url,
                        tools = self.catalog().len(),
                        "Connected to MCP server"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(url = %self.base_url, attempt = attempt + 1, error = %e, "MCP connect attempt failed");
                    last_error = e.to_string();
                    if let Err(e) = self.transport.close().await {
                        debug!(error = %e, "Failed to release MCP transport after attempt");
                    }
                    if attempt + 1 < attempts {
                        self.sleeper.sleep(self.options.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        error!(url = %self.base_url, attempts = attempts, "Could not connect to MCP server");
        self.cleanup().await;
        Err(McpError::ConnectFailed {
            attempts,
            reason: last_error,
        })
    }

    async fn handshake(&self) -> Result<(), McpError> {
        self.transport.open().await?;

        let params = serde_json::to_value(InitializeParams::default())?;
        let result = self.correlator.request(METHOD_INITIALIZE, params).await?;
        let init: InitializeResult = serde_json::from_value(result).unwrap_or_default();

        if let Some(server) = init.server_info {
            info!(
                server = %server.name,
                version = server.version.as_deref().unwrap_or("unknown"),
                protocol = init.protocol_version.as_deref().unwrap_or("unknown"),
                "MCP server initialized"
            );
            *self.server_info.write() = Some(server);
        }

        self.refresh_tools().await?;
        Ok(())
    }

    /// Re-fetch `tools/list` and swap in the new catalog.
    pub async fn refresh_tools(&self) -> Result<Arc<ToolCatalog>, McpError> {
        let result = self.correlator.request(METHOD_TOOLS_LIST, json!({})).await?;
        let list: ListToolsResult = if result.is_null() {
            ListToolsResult::default()
        } else {
            serde_json::from_value(result)
                .map_err(|e| McpError::protocol(format!("invalid tools/list result: {}", e)))?
        };

        let catalog = Arc::new(ToolCatalog::from_descriptors(list.tools));
        debug!(tools = ?catalog.names(), "Loaded MCP tool catalog");
        *self.catalog.write() = catalog.clone();
        Ok(catalog)
    }

    /// Calls need a completed handshake. Without one the transport would
    /// answer `NotConnected` and every retry would be spent on it.
    fn ensure_connected(&self) -> Result<(), McpError> {
        let state = self.state();
        if matches!(state, SessionState::Connected | SessionState::Degraded) {
            Ok(())
        } else {
            Err(McpError::invalid_state("connected session", state.to_string()))
        }
    }

    /// Invoke a tool and return the raw `result` value.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.ensure_connected()?;

        debug!(tool = name, "Calling MCP tool");
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        self.correlator.request(METHOD_TOOLS_CALL, params).await
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        self.ensure_connected()?;
        self.correlator.request(METHOD_PING, json!({})).await.map(|_| ())
    }

    /// Close the session: stop background tasks and release the transport.
    /// Safe to call more than once.
    pub async fn cleanup(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), SessionState::Closed);
        self.stop_background_tasks().await;

        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Failed to close MCP transport");
        }

        if previous != SessionState::Closed {
            info!(url = %self.base_url, "MCP session closed");
        }
    }

    fn start_background_tasks(&self) {
        let cancel = CancellationToken::new();

        let sse = self.options.sse_enabled.then(|| {
            tokio::spawn(run_sse_listener(
                self.transport.clone(),
                format!("{}/sse", self.base_url),
                self.state.clone(),
                self.options.sse_reconnect_interval,
                cancel.clone(),
            ))
        });

        let heartbeat = self.options.heartbeat_interval.map(|interval| {
            tokio::spawn(run_heartbeat(
                self.correlator.clone(),
                self.state.clone(),
                interval,
                cancel.clone(),
            ))
        });

        *self.tasks.lock() = Some(BackgroundTasks {
            cancel,
            sse,
            heartbeat,
        });
    }

    async fn stop_background_tasks(&self) {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
        }
    }
}

fn current_state(state: &RwLock<SessionState>) -> SessionState {
    *state.read()
}

/// Move from `from` to `to` only if the session is still in `from`.
fn transition(state: &RwLock<SessionState>, from: SessionState, to: SessionState) -> bool {
    let mut guard = state.write();
    if *guard == from {
        *guard = to;
        true
    } else {
        false
    }
}

async fn run_sse_listener(
    transport: Arc<dyn Transport>,
    url: String,
    state: Arc<RwLock<SessionState>>,
    reconnect_interval: Duration,
    cancel: CancellationToken,
) {
    let mut parser = SseParser::new();

    loop {
        if cancel.is_cancelled() || current_state(&state) == SessionState::Closed {
            break;
        }

        match transport.open_stream(&url).await {
            Ok(mut stream) => {
                if transition(&state, SessionState::Degraded, SessionState::Connected) {
                    info!("SSE stream restored");
                }
                debug!(url = %url, "SSE stream opened");
                parser.reset();

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        chunk = stream.next() => {
                            match chunk {
                                Some(Ok(bytes)) => {
                                    for event in parser.feed(&bytes) {
                                        if event.has_data() {
                                            debug!(
                                                event = event.event.as_deref().unwrap_or("message"),
                                                data = event.preview(SSE_PREVIEW_CHARS),
                                                "SSE event"
                                            );
                                        }
                                    }
                                }
                                Some(Err(e)) => {
                                    warn!(error = %e, "SSE stream error");
                                    break;
                                }
                                None => {
                                    debug!("SSE stream ended");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Could not open SSE stream");
            }
        }

        if transition(&state, SessionState::Connected, SessionState::Degraded) {
            warn!("SSE stream lost, session degraded");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_interval) => {}
        }
    }
}

async fn run_heartbeat(
    correlator: Arc<Correlator>,
    state: Arc<RwLock<SessionState>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if current_state(&state) == SessionState::Closed {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = correlator.request(METHOD_PING, json!({})) => {
                match result {
                    Ok(_) => debug!("Heartbeat ok"),
                    Err(e) => warn!(error = %e, "Heartbeat failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::mock::{MockTransport, RecordingSleeper};
    use std::sync::atomic::Ordering;

    fn options(attempts: u32) -> SessionOptions {
        SessionOptions {
            retry: RetryPolicy {
                attempts,
                base_delay: Duration::from_millis(100),
                max_delay: None,
                timeout: Duration::from_secs(1),
            },
            sse_enabled: false,
            sse_reconnect_interval: Duration::from_millis(10),
            heartbeat_interval: None,
        }
    }

    fn handshake_server() -> MockTransport {
        MockTransport::answering(|method, params| match method {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "12306-mcp", "version": "0.3.0"}
            })),
            "tools/list" => Ok(json!({"tools": [
                {"name": "get-current-date", "description": "Current date"},
                {"name": "get-tickets", "description": "Query tickets", "inputSchema": {"type": "object"}}
            ]})),
            "tools/call" => Ok(json!({"content": [{"type": "text", "text": params["name"]}]})),
            "ping" => Ok(json!({})),
            other => Err(TransportError::Http(format!("unexpected method {}", other))),
        })
    }

    fn session(transport: Arc<MockTransport>, options: SessionOptions) -> (McpSession, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let session = McpSession::new("http://test/", transport, options).with_sleeper(sleeper.clone());
        (session, sleeper)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_connect_loads_catalog() {
        let transport = Arc::new(handshake_server());
        let (session, _) = session(transport.clone(), options(3));

        assert_eq!(session.state(), SessionState::Disconnected);
        session.connect().await.unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.is_connected());
        assert_eq!(session.base_url(), "http://test");
        assert_eq!(session.catalog().names(), vec!["get-current-date", "get-tickets"]);
        assert_eq!(session.server_info().unwrap().name, "12306-mcp");
        assert_eq!(transport.posted_methods(), vec!["initialize", "tools/list"]);

        let posted = transport.posted.lock();
        assert_eq!(posted[0]["params"]["clientInfo"]["name"], "trainmcp");
    }

    #[tokio::test]
    async fn test_call_tool_and_ping() {
        let transport = Arc::new(handshake_server());
        let (session, _) = session(transport.clone(), options(3));
        session.connect().await.unwrap();

        let result = session.call_tool("get-tickets", json!({"date": "2026-10-18"})).await.unwrap();
        assert_eq!(result["content"][0]["text"], "get-tickets");
        session.ping().await.unwrap();

        let posted = transport.posted.lock();
        assert_eq!(posted[2]["params"]["arguments"]["date"], "2026-10-18");
        assert_eq!(posted[3]["method"], "ping");
        assert_eq!(posted[3]["params"], json!({}));
    }

    #[tokio::test]
    async fn test_connect_failure_cleans_up() {
        let transport = Arc::new(MockTransport::new());
        let (session, sleeper) = session(transport.clone(), options(2));

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, McpError::ConnectFailed { attempts: 2, .. }));
        assert_eq!(session.state(), SessionState::Closed);
        // Released after each failed attempt, then once more by cleanup
        assert_eq!(transport.closes.load(Ordering::SeqCst), 3);
        // Two connect attempts, each making two initialize tries
        assert_eq!(transport.posted_methods(), vec!["initialize"; 4]);
        assert_eq!(sleeper.slept.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_call_after_cleanup_is_rejected() {
        let transport = Arc::new(handshake_server());
        let (session, _) = session(transport.clone(), options(1));
        session.connect().await.unwrap();

        session.cleanup().await;
        session.cleanup().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_connected());

        let err = session.call_tool("get-tickets", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidState { .. }));
        assert_eq!(transport.posted_methods().len(), 2);
    }

    #[tokio::test]
    async fn test_calls_before_connect_are_rejected() {
        let transport = Arc::new(handshake_server());
        let (session, sleeper) = session(transport.clone(), options(3));

        let err = session.call_tool("get-tickets", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidState { ref actual, .. } if actual == "disconnected"));
        assert!(matches!(session.ping().await, Err(McpError::InvalidState { .. })));

        assert!(transport.posted_methods().is_empty());
        assert!(sleeper.slept.lock().is_empty());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_attempt_releases_transport() {
        let transport = Arc::new(handshake_server());
        // Both tries of the first initialize time out
        transport.push_reply(Err(TransportError::Timeout(Duration::from_secs(1))));
        transport.push_reply(Err(TransportError::Timeout(Duration::from_secs(1))));
        let (session, sleeper) = session(transport.clone(), options(2));

        session.connect().await.unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
        assert_eq!(sleeper.slept.lock().len(), 2);
        assert_eq!(
            transport.posted_methods(),
            vec!["initialize", "initialize", "initialize", "tools/list"]
        );
    }

    #[tokio::test]
    async fn test_refresh_replaces_catalog() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(Ok(json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": [{"name": "a"}]}}).to_string()));
        transport.push_reply(Ok(json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": [{"name": "b"}, {"name": "c"}]}}).to_string()));
        let (session, _) = session(transport, options(1));

        let before = session.refresh_tools().await.unwrap();
        let after = session.refresh_tools().await.unwrap();

        // Old snapshots stay intact
        assert_eq!(before.names(), vec!["a"]);
        assert_eq!(after.names(), vec!["b", "c"]);
        assert_eq!(session.catalog().len(), 2);
    }

    #[tokio::test]
    async fn test_sse_drop_degrades_but_calls_still_work() {
        let transport = Arc::new(handshake_server());
        transport.push_stream(vec!["event: endpoint\ndata: /mcp\n\n", ": keepalive\n\n"]);
        let mut opts = options(1);
        opts.sse_enabled = true;
        let (session, _) = session(transport.clone(), opts);

        session.connect().await.unwrap();
        assert!(wait_for(|| session.state() == SessionState::Degraded).await);
        assert!(session.is_connected());
        assert!(wait_for(|| transport.stream_opens.load(Ordering::SeqCst) >= 2).await);

        session.call_tool("get-current-date", json!({})).await.unwrap();

        session.cleanup().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_heartbeat_pings() {
        let transport = Arc::new(handshake_server());
        let mut opts = options(1);
        opts.heartbeat_interval = Some(Duration::from_millis(20));
        let (session, _) = session(transport.clone(), opts);

        session.connect().await.unwrap();
        assert!(wait_for(|| transport.posted_methods().iter().any(|m| m == "ping")).await);

        session.cleanup().await;
        let count = transport.posted_methods().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.posted_methods().len(), count);
    }

    #[test]
    fn test_transition_respects_closed() {
        let state = RwLock::new(SessionState::Degraded);
        assert!(transition(&state, SessionState::Degraded, SessionState::Connected));
        assert_eq!(*state.read(), SessionState::Connected);

        *state.write() = SessionState::Closed;
        assert!(!transition(&state, SessionState::Connected, SessionState::Degraded));
        assert!(!transition(&state, SessionState::Degraded, SessionState::Connected));
        assert_eq!(*state.read(), SessionState::Closed);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = ConnectionConfig::default();
        config.heartbeat_interval = 0;
        let opts = SessionOptions::from_config(&config);
        assert!(opts.heartbeat_interval.is_none());
        assert!(opts.sse_enabled);
        assert_eq!(opts.retry.attempts, 3);
    }
}
