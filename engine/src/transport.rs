//! Transport abstraction for talking to the remote store.
//!
//! The engine never builds HTTP requests itself; it hands a [`BatchRequest`]
//! to a [`BatchTransport`] and gets the index-aligned results back.

use crate::{error::Result, BatchRequest, BatchResponse, BatchResult, Error, Outcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Network access to the remote store.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Send one batch request for `bucket` and return its results.
    async fn send_batch(&self, bucket: &str, request: BatchRequest) -> Result<BatchResponse>;

    /// Fetch server documents of `bucket` changed after `since`, at most `limit`.
    async fn fetch_since(
        &self,
        bucket: &str,
        since: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let _ = (bucket, since, limit);
        Err(Error::Protocol("pull is not supported by this transport".into()))
    }
}

type BatchHandler = dyn Fn(&str, &BatchRequest) -> Result<BatchResponse> + Send + Sync;

/// A scriptable transport for tests and offline demos.
///
/// Batch calls are answered from a queue of canned responses first, then by
/// the handler, if any. Every request is recorded.
#[derive(Default)]
pub struct MockTransport {
    queued: Mutex<VecDeque<Result<BatchResponse>>>,
    handler: Mutex<Option<Arc<BatchHandler>>>,
    requests: Mutex<Vec<(String, BatchRequest)>>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    remote_documents: Mutex<Vec<Value>>,
    pulls: Mutex<Vec<Option<String>>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("queued", &self.queued.lock().len())
            .field("requests", &self.requests.lock().len())
            .finish()
    }
}

impl MockTransport {
    /// Creates a new mock transport with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that acknowledges every operation with a fresh etag.
    pub fn accepting() -> Self {
        let transport = Self::new();
        let counter = AtomicU64::new(0);
        transport.set_handler(move |_, request| {
            let results = request
                .requests
                .iter()
                .map(|op| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    BatchResult::ok(
                        op.target_id().unwrap_or_default(),
                        format!("etag-{n}"),
                        "2024-01-01T00:00:00.000Z",
                    )
                })
                .collect();
            Ok(BatchResponse { results })
        });
        transport
    }

    /// Queue a response for the next batch call.
    pub fn push_response(&self, response: BatchResponse) {
        self.queued.lock().push_back(Ok(response));
    }

    /// Queue a failure for the next batch call.
    pub fn push_error(&self, error: Error) {
        self.queued.lock().push_back(Err(error));
    }

    /// Answer batch calls with `handler` once the queue is drained.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &BatchRequest) -> Result<BatchResponse> + Send + Sync + 'static,
    {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    /// Delay every batch response.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Documents returned by pull calls.
    pub fn set_remote_documents(&self, documents: Vec<Value>) {
        *self.remote_documents.lock() = documents;
    }

    /// All batch requests received so far, in order.
    pub fn requests(&self) -> Vec<(String, BatchRequest)> {
        self.requests.lock().clone()
    }

    /// Number of batch requests received.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// The largest number of batch calls that were ever in flight together.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// The `since` argument of every pull call, in order.
    pub fn pulls(&self) -> Vec<Option<String>> {
        self.pulls.lock().clone()
    }
}

#[async_trait]
impl BatchTransport for MockTransport {
    async fn send_batch(&self, bucket: &str, request: BatchRequest) -> Result<BatchResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.requests
            .lock()
            .push((bucket.to_string(), request.clone()));

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let queued = self.queued.lock().pop_front();
        let response = match queued {
            Some(response) => response,
            None => {
                let handler = self.handler.lock().clone();
                match handler {
                    Some(handler) => handler(bucket, &request),
                    None => Err(Error::Protocol("no mock batch response set".into())),
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }

    async fn fetch_since(
        &self,
        _bucket: &str,
        since: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>> {
        self.pulls.lock().push(since.map(String::from));
        Ok(self
            .remote_documents
            .lock()
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Build a response answering every operation of `request` with `outcome`.
pub fn uniform_response(request: &BatchRequest, outcome: Outcome) -> BatchResponse {
    BatchResponse {
        results: request
            .requests
            .iter()
            .map(|_| BatchResult::status(outcome))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BatchOperation, DeleteOp};

    fn request(ids: &[&str]) -> BatchRequest {
        BatchRequest::new(
            ids.iter()
                .map(|id| {
                    BatchOperation::Delete(DeleteOp {
                        id: id.to_string(),
                        etag: None,
                    })
                })
                .collect(),
            false,
        )
    }

    #[tokio::test]
    async fn unscripted_mock_fails() {
        let transport = MockTransport::new();
        let result = transport.send_batch("notes", request(&["a"])).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn queue_before_handler() {
        let transport = MockTransport::accepting();
        transport.push_error(Error::transport_retryable("offline"));

        let first = transport.send_batch("notes", request(&["a"])).await;
        assert!(matches!(first, Err(Error::Transport { .. })));

        let second = transport
            .send_batch("notes", request(&["a", "b"]))
            .await
            .unwrap();
        assert_eq!(second.results.len(), 2);
        assert_eq!(second.results[0].result, Outcome::Ok);
        assert_eq!(second.results[1].id.as_deref(), Some("b"));
        assert_ne!(second.results[0].etag, second.results[1].etag);
    }

    #[tokio::test]
    async fn records_requests() {
        let transport = MockTransport::new();
        transport.set_handler(|_, request| Ok(uniform_response(request, Outcome::Forbidden)));

        transport.send_batch("notes", request(&["a"])).await.unwrap();
        transport.send_batch("tasks", request(&["b", "c"])).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].0, "notes");
        assert_eq!(requests[1].1.len(), 2);
        assert_eq!(transport.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn pull_returns_remote_documents() {
        let transport = MockTransport::new();
        transport.set_remote_documents(vec![
            serde_json::json!({"id": "a"}),
            serde_json::json!({"id": "b"}),
        ]);

        let docs = transport.fetch_since("notes", Some("t0"), 1).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(transport.pulls(), vec![Some("t0".to_string())]);
    }
}
