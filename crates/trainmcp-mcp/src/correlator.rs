//! Request/reply correlation with retry and exponential backoff.
//!
//! Each logical call gets exactly one id, reused across its retries. Only
//! transport-level failures are retried; a JSON-RPC error object from the
//! server is final.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use trainmcp_core::config::ConnectionConfig;

use crate::codec::decode_reply;
use crate::error::{McpError, TransportError};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;

/// Retry settings shared by RPC calls and connect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts; values below 1 are treated as 1
    pub attempts: u32,
    /// Wait before the second attempt, doubled afterwards
    pub base_delay: Duration,
    /// Upper bound for a single wait
    pub max_delay: Option<Duration>,
    /// Per-attempt request timeout
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            base_delay: config.retry_delay(),
            max_delay: Some(config.max_retry_delay()),
            timeout: config.timeout(),
        }
    }

    pub fn effective_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Wait after the failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(32) as i32);
        let delay = Duration::from_secs_f64(self.base_delay.as_secs_f64() * factor);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Sum of all waits when every attempt fails.
    pub fn total_backoff(&self) -> Duration {
        (0..self.effective_attempts().saturating_sub(1))
            .map(|i| self.delay_for(i))
            .sum()
    }
}

/// Something that can wait. Injected so tests run without real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Issues JSON-RPC calls over a [`Transport`] and matches their replies.
pub struct Correlator {
    transport: Arc<dyn Transport>,
    endpoint: String,
    next_id: AtomicU64,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Correlator {
    pub fn new(transport: Arc<dyn Transport>, endpoint: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
            policy,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sleeper(&self) -> &Arc<dyn Sleeper> {
        &self.sleeper
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send `method` with `params` and return the reply's `result`.
    ///
    /// A reply without `result` yields `Value::Null`.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_request_id();
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        let attempts = self.policy.effective_attempts();

        let mut attempt = 0;
        loop {
            match self.attempt(id, &body).await {
                Ok(reply) => {
                    if let Some(error) = reply.error {
                        warn!(method = method, id = id, code = error.code, message = %error.message, "MCP server returned an error");
                        return Err(McpError::server_error(error.code, error.message));
                    }
                    debug!(method = method, id = id, "MCP request completed");
                    return Ok(reply.result.unwrap_or(Value::Null));
                }
                Err(err) => {
                    attempt += 1;
                    warn!(
                        method = method,
                        id = id,
                        attempt = attempt,
                        attempts = attempts,
                        error = %err,
                        "MCP request attempt failed"
                    );

                    if attempt >= attempts {
                        return Err(McpError::RetriesExhausted {
                            method: method.to_string(),
                            attempts,
                            last: err,
                        });
                    }

                    self.sleeper.sleep(self.policy.delay_for(attempt - 1)).await;
                }
            }
        }
    }

    async fn attempt(&self, id: u64, body: &str) -> Result<JsonRpcResponse, TransportError> {
        let text = self
            .transport
            .post(&self.endpoint, body.to_string(), self.policy.timeout)
            .await?;
        let reply = decode_reply(&text)?;

        // Error replies are surfaced as-is, whatever their id
        if reply.error.is_none() && !reply.id.as_ref().map(|r| r.matches(id)).unwrap_or(false) {
            return Err(TransportError::IdMismatch {
                expected: id,
                actual: reply
                    .id
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "none".to_string()),
            });
        }

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ok_reply, MockTransport, RecordingSleeper};
    use serde_json::json;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(30)),
            timeout: Duration::from_secs(5),
        }
    }

    fn correlator(
        transport: Arc<MockTransport>,
        attempts: u32,
    ) -> (Correlator, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let correlator = Correlator::new(transport, "http://test/mcp", policy(attempts))
            .with_sleeper(sleeper.clone());
        (correlator, sleeper)
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy {
            max_delay: Some(Duration::from_secs(5)),
            ..policy(6)
        };
        let delays: Vec<u64> = (0..5).map(|i| p.delay_for(i).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_total_backoff() {
        assert_eq!(policy(3).total_backoff(), Duration::from_secs(3));
        assert_eq!(policy(1).total_backoff(), Duration::ZERO);
        assert_eq!(policy(0).total_backoff(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_ids_increase_per_call() {
        let transport = Arc::new(MockTransport::answering(|_, _| Ok(json!({}))));
        let (correlator, _) = correlator(transport.clone(), 3);

        for _ in 0..4 {
            correlator.request("ping", json!({})).await.unwrap();
        }

        let ids: Vec<u64> = transport
            .posted
            .lock()
            .iter()
            .map(|r| r["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_retry_reuses_id_and_backs_off() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(Err(TransportError::Http("reset".into())));
        transport.push_reply(Ok("event: message\n\n".into()));
        transport.push_reply(ok_reply(1, json!({"tools": []})));
        let (correlator, sleeper) = correlator(transport.clone(), 3);

        let result = correlator.request("tools/list", json!({})).await.unwrap();
        assert_eq!(result, json!({"tools": []}));

        let posted = transport.posted.lock();
        assert_eq!(posted.len(), 3);
        assert!(posted.iter().all(|r| r["id"] == 1));
        assert_eq!(
            *sleeper.slept.lock(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let transport = Arc::new(MockTransport::new());
        for status in [500, 502, 503] {
            transport.push_reply(Err(TransportError::Status {
                status,
                body: String::new(),
            }));
        }
        let (correlator, sleeper) = correlator(transport.clone(), 3);

        let err = correlator.request("tools/call", json!({})).await.unwrap_err();
        match err {
            McpError::RetriesExhausted {
                method,
                attempts,
                last: TransportError::Status { status, .. },
            } => {
                assert_eq!(method, "tools/call");
                assert_eq!(attempts, 3);
                assert_eq!(status, 503);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.posted.lock().len(), 3);
        // No wait after the final attempt
        assert_eq!(sleeper.slept.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let transport = Arc::new(MockTransport::new());
        let (correlator, sleeper) = correlator(transport.clone(), 0);

        let err = correlator.request("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(transport.posted.lock().len(), 1);
        assert!(sleeper.slept.lock().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(Ok(json!({
            "jsonrpc": "2.0",
            "id": 99,
            "error": {"code": -32601, "message": "Method not found"}
        })
        .to_string()));
        let (correlator, sleeper) = correlator(transport.clone(), 3);

        let err = correlator.request("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Server { code: -32601, .. }));
        assert_eq!(transport.posted.lock().len(), 1);
        assert!(sleeper.slept.lock().is_empty());
    }

    #[tokio::test]
    async fn test_id_mismatch_is_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(ok_reply(41, json!("stale")));
        transport.push_reply(Ok(json!({"jsonrpc": "2.0", "result": "no id"}).to_string()));
        transport.push_reply(ok_reply(1, json!("fresh")));
        let (correlator, _) = correlator(transport.clone(), 3);

        let result = correlator.request("ping", json!({})).await.unwrap();
        assert_eq!(result, json!("fresh"));
        assert_eq!(transport.posted.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_result_is_null() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(Ok(r#"{"jsonrpc":"2.0","id":1}"#.to_string()));
        let (correlator, _) = correlator(transport, 1);

        assert_eq!(correlator.request("ping", json!({})).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_sse_and_json_replies_agree() {
        let transport = Arc::new(MockTransport::new());
        let payload = json!({"jsonrpc": "2.0", "id": 1, "result": {"date": "2026-10-18"}});
        transport.push_reply(Ok(payload.to_string()));
        transport.push_reply(Ok(format!(
            "event: message\ndata: {}\n\n",
            json!({"jsonrpc": "2.0", "id": 2, "result": {"date": "2026-10-18"}})
        )));
        let (correlator, _) = correlator(transport, 1);

        let bare = correlator.request("tools/call", json!({})).await.unwrap();
        let framed = correlator.request("tools/call", json!({})).await.unwrap();
        assert_eq!(bare, framed);
    }
}
