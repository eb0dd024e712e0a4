//! Lifecycle-hook adapter for frameworks exposing request and send hooks

use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use super::RecordingHook;
use crate::capture::{ResponseCapture, ResponseDescriptor};
use crate::normalize::{HeaderFields, RawRequest};

/// Adapter keeping in-flight captures keyed by request id
pub struct HookAdapter {
    hook: RecordingHook,
    in_flight: DashMap<u64, ResponseCapture>,
}

impl HookAdapter {
    /// Create an adapter around `hook`
    #[must_use]
    pub fn new(hook: RecordingHook) -> Self {
        Self {
            hook,
            in_flight: DashMap::new(),
        }
    }

    /// Request hook; returns whether the request is being recorded
    ///
    /// A recorded request stays in flight until `on_send` or `on_abort` is
    /// called with the same id. Hosts whose error paths can skip both must
    /// call `evict_stale` periodically.
    pub fn on_request<R: RawRequest + ?Sized>(&self, request_id: u64, raw: &R) -> bool {
        match self.hook.begin(raw) {
            Some(capture) => {
                self.in_flight.insert(request_id, capture);
                true
            }
            None => false,
        }
    }

    /// Send hook; returns whether a record was produced
    ///
    /// The entry is removed on first use, so a repeated send for the same
    /// id is a no-op.
    pub fn on_send(
        &self,
        request_id: u64,
        status: u16,
        headers: HeaderFields,
        body: &Value,
    ) -> bool {
        let Some((_, capture)) = self.in_flight.remove(&request_id) else {
            return false;
        };

        capture.finish(ResponseDescriptor::new(status, body.clone()).with_headers(headers))
    }

    /// Abort hook; drops the capture without recording
    pub fn on_abort(&self, request_id: u64) -> bool {
        let removed = self.in_flight.remove(&request_id).is_some();
        if removed {
            debug!(request_id, "Request aborted before response, no record");
        }
        removed
    }

    /// Drop captures older than `max_age` without recording them
    ///
    /// Returns the number of entries removed.
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        let mut evicted = 0;
        self.in_flight.retain(|request_id, capture| {
            let fresh = capture.elapsed() < max_age;
            if !fresh {
                debug!(request_id, "Evicting capture that never saw a response");
                evicted += 1;
            }
            fresh
        });
        evicted
    }

    /// Number of captures awaiting a response
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support;
    use crate::config::RecorderConfig;
    use crate::normalize::RequestParts;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_send_cycle() {
        let (hook, mut rx) = test_support::hook(RecorderConfig::new("k"));
        let adapter = HookAdapter::new(hook);

        assert!(adapter.on_request(7, &RequestParts::new("DELETE", "/api/items/7")));
        assert!(!adapter.on_request(8, &RequestParts::new("GET", "/app.css")));
        assert_eq!(adapter.in_flight(), 1);

        assert!(adapter.on_send(7, 204, HeaderFields::new(), &Value::Null));
        assert!(!adapter.on_send(7, 204, HeaderFields::new(), &Value::Null));
        assert!(!adapter.on_send(8, 200, HeaderFields::new(), &json!("css")));
        assert_eq!(adapter.in_flight(), 0);

        let record = rx.recv().await.unwrap();
        assert_eq!(record.method, "DELETE");
        assert_eq!(record.status_code, 204);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_stale_entries() {
        let (hook, mut rx) = test_support::hook(RecorderConfig::new("k"));
        let adapter = HookAdapter::new(hook);

        adapter.on_request(1, &RequestParts::new("GET", "/api/lost"));
        tokio::time::advance(Duration::from_secs(60)).await;
        adapter.on_request(2, &RequestParts::new("GET", "/api/live"));

        assert_eq!(adapter.evict_stale(Duration::from_secs(30)), 1);
        assert_eq!(adapter.in_flight(), 1);
        assert!(!adapter.on_send(1, 500, HeaderFields::new(), &Value::Null));
        assert!(adapter.on_send(2, 200, HeaderFields::new(), &Value::Null));

        let record = rx.recv().await.unwrap();
        assert!(record.endpoint.ends_with("/api/live"));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_abort_produces_no_record() {
        let (hook, mut rx) = test_support::hook(RecorderConfig::new("k"));
        let adapter = HookAdapter::new(hook);

        adapter.on_request(1, &RequestParts::new("GET", "/api/slow"));
        assert!(adapter.on_abort(1));
        assert!(!adapter.on_send(1, 200, HeaderFields::new(), &Value::Null));

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
