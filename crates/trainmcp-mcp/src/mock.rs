//! Scripted transport and sleeper shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::correlator::Sleeper;
use crate::error::TransportError;
use crate::transport::{ByteStream, Transport};

type Responder = Box<dyn Fn(&Value) -> Result<String, TransportError> + Send + Sync>;

/// Replays queued replies, then falls back to an optional responder.
#[derive(Default)]
pub(crate) struct MockTransport {
    replies: Mutex<VecDeque<Result<String, TransportError>>>,
    responder: Option<Responder>,
    streams: Mutex<VecDeque<Vec<Vec<u8>>>>,
    pub(crate) posted: Mutex<Vec<Value>>,
    pub(crate) stream_opens: AtomicUsize,
    pub(crate) closes: AtomicUsize,
    open: AtomicBool,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer every request by calling `handler(method, params)` and
    /// wrapping its value as a result with the request's own id.
    pub(crate) fn answering<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        let responder: Responder = Box::new(move |request: &Value| {
            let method = request["method"].as_str().unwrap_or_default();
            let result = handler(method, &request["params"])?;
            Ok(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}).to_string())
        });
        Self {
            responder: Some(responder),
            ..Self::default()
        }
    }

    pub(crate) fn push_reply(&self, reply: Result<String, TransportError>) {
        self.replies.lock().push_back(reply);
    }

    pub(crate) fn push_stream(&self, chunks: Vec<&str>) {
        self.streams
            .lock()
            .push_back(chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect());
    }

    pub(crate) fn posted_methods(&self) -> Vec<String> {
        self.posted
            .lock()
            .iter()
            .map(|r| r["method"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<(), TransportError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn post(
        &self,
        _url: &str,
        body: String,
        _timeout: Duration,
    ) -> Result<String, TransportError> {
        let request: Value = serde_json::from_str(&body).expect("client sent invalid JSON");
        self.posted.lock().push(request.clone());

        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        match self.responder {
            Some(ref responder) => responder(&request),
            None => Err(TransportError::Http("no scripted reply".to_string())),
        }
    }

    async fn open_stream(&self, _url: &str) -> Result<ByteStream, TransportError> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        match self.streams.lock().pop_front() {
            Some(chunks) => Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))),
            None => Err(TransportError::Http("stream unavailable".to_string())),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Records requested sleeps without waiting.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    pub(crate) slept: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

pub(crate) fn ok_reply(id: u64, result: Value) -> Result<String, TransportError> {
    Ok(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string())
}
