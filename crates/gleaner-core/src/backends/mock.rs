//! Mock backend for testing the executor and orchestrator.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{BackendError, ExtractOutput, ModelBackend};
use crate::{BackendId, SchemaDescriptor};

/// A configurable scripted response for [`MockBackend`].
#[derive(Clone, Debug)]
pub enum MockCall {
    /// Return this value as the extraction output.
    Succeed(serde_json::Value),
    /// Fail with the given error.
    Fail(BackendError),
    /// Never complete (for cancellation tests).
    Hang,
}

/// A hand-rolled mock implementing [`ModelBackend`] for tests.
///
/// Supports a fixed response or a per-call sequence (the last response is
/// repeated once the sequence is exhausted), optional per-call latency, and
/// call counting.
pub struct MockBackend {
    id: BackendId,
    /// If non-empty, each call pops the next response.
    responses: Mutex<Vec<MockCall>>,
    /// Fallback once the sequence is exhausted (or single-response mode).
    fallback: MockCall,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl MockBackend {
    /// Create a mock that always returns `response`.
    pub fn new(id: BackendId, response: MockCall) -> Self {
        Self {
            id,
            responses: Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Create a mock that returns responses in order, repeating the last one.
    pub fn with_sequence(id: BackendId, mut responses: Vec<MockCall>) -> Self {
        assert!(
            !responses.is_empty(),
            "sequence must have at least one response"
        );
        let fallback = responses.last().cloned().unwrap();
        // Reverse so we can pop() from the front cheaply.
        responses.reverse();
        Self {
            id,
            responses: Mutex::new(responses),
            fallback,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Set simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `call()` has been invoked.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> MockCall {
        let mut seq = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }
}

impl ModelBackend for MockBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn call<'a>(
        &'a self,
        _content: &'a str,
        _schema: &'a SchemaDescriptor,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<ExtractOutput, BackendError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }

            match response {
                MockCall::Succeed(value) => Ok(value),
                MockCall::Fail(err) => Err(err),
                MockCall::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!("pending future resolved")
                }
            }
        })
    }
}
