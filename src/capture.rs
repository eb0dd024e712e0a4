//! One-shot capture of a single response

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::normalize::{HeaderFields, RequestDescriptor};
use crate::recorder::{Record, Recorder};

/// Canonical response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDescriptor {
    /// HTTP status code
    pub status_code: u16,
    /// Response headers
    pub headers: HeaderFields,
    /// Body as sent to the client
    pub body: Value,
}

impl ResponseDescriptor {
    /// Response with no headers
    #[must_use]
    pub fn new(status_code: u16, body: Value) -> Self {
        Self {
            status_code,
            headers: HeaderFields::new(),
            body,
        }
    }

    /// Replace the headers
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderFields) -> Self {
        self.headers = headers;
        self
    }
}

struct CaptureState {
    started: Instant,
    fired: AtomicBool,
    request: Mutex<Option<RequestDescriptor>>,
    recorder: Recorder,
}

/// Completion observer for one recorded request
///
/// Clones share the same guard, so every aliased finalize path of a
/// response can hold one and only the first `finish` produces a record.
#[derive(Clone)]
pub struct ResponseCapture {
    state: Arc<CaptureState>,
}

impl ResponseCapture {
    /// Start timing now
    pub fn start(request: RequestDescriptor, recorder: Recorder) -> Self {
        Self::started_at(request, recorder, Instant::now())
    }

    /// Start timing from an earlier instant
    pub fn started_at(request: RequestDescriptor, recorder: Recorder, started: Instant) -> Self {
        Self {
            state: Arc::new(CaptureState {
                started,
                fired: AtomicBool::new(false),
                request: Mutex::new(Some(request)),
                recorder,
            }),
        }
    }

    /// Endpoint being captured
    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        self.lock_request()
            .as_ref()
            .map(|request| request.endpoint.clone())
    }

    /// Time since capture started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.state.started.elapsed()
    }

    /// Replace the request body once it has been read
    ///
    /// No effect after `finish`.
    pub fn set_request_body(&self, body: Value) {
        if let Some(request) = self.lock_request().as_mut() {
            request.body = body;
        }
    }

    /// Whether `finish` already fired
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.fired.load(Ordering::Acquire)
    }

    /// Finalize with the response being sent and hand the record off
    ///
    /// Returns `true` only for the call that produced the record.
    pub fn finish(&self, response: ResponseDescriptor) -> bool {
        if self.state.fired.swap(true, Ordering::AcqRel) {
            debug!(status = response.status_code, "Response already captured, ignoring");
            return false;
        }

        let elapsed = self.state.started.elapsed();
        let Some(request) = self.lock_request().take() else {
            return false;
        };

        let record = Record::new(request, response, elapsed);
        debug!(
            endpoint = %record.endpoint,
            status = record.status_code,
            duration_ms = record.duration,
            "Response captured"
        );
        self.state.recorder.record(record);
        true
    }

    fn lock_request(&self) -> std::sync::MutexGuard<'_, Option<RequestDescriptor>> {
        self.state
            .request
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::ChannelSink;
    use crate::config::RecorderConfig;
    use crate::normalize::{normalize, RequestParts};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn capture() -> (ResponseCapture, mpsc::UnboundedReceiver<Record>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Recorder::with_sink(
            Arc::new(RecorderConfig::new("k")),
            Arc::new(ChannelSink(tx)),
        );
        let request = normalize(&RequestParts::new("GET", "/api/orders").with_header("host", "h"));
        (ResponseCapture::start(request, recorder), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_measures_duration() {
        let (capture, mut rx) = capture();

        tokio::time::advance(Duration::from_millis(42)).await;
        assert!(capture.finish(ResponseDescriptor::new(200, json!({"ok": true}))));

        let record = rx.recv().await.unwrap();
        assert_eq!(record.duration, 42);
        assert_eq!(record.status_code, 200);
        assert_eq!(record.endpoint, "http://h/api/orders");
    }

    #[tokio::test]
    async fn test_request_body_set_before_finish() {
        let (capture, mut rx) = capture();

        capture.set_request_body(json!({"sku": "A1"}));
        assert!(capture.finish(ResponseDescriptor::new(201, Value::Null)));
        capture.set_request_body(json!("late"));

        let record = rx.recv().await.unwrap();
        assert_eq!(record.request_body, json!({"sku": "A1"}));
    }

    #[tokio::test]
    async fn test_finish_is_one_shot_across_clones() {
        let (capture, mut rx) = capture();
        let alias = capture.clone();

        assert!(capture.finish(ResponseDescriptor::new(200, json!("first"))));
        assert!(!alias.finish(ResponseDescriptor::new(500, json!("second"))));
        assert!(alias.is_finished());
        assert_eq!(alias.endpoint(), None);

        let record = rx.recv().await.unwrap();
        assert_eq!(record.response_body, json!("first"));

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
