//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use chronycle::{Record, Sink};

/// Sink forwarding every record to a channel
pub struct ChannelSink(pub mpsc::UnboundedSender<Record>);

#[async_trait]
impl Sink for ChannelSink {
    async fn send(&self, record: &Record) -> chronycle::Result<()> {
        self.0.send(record.clone()).ok();
        Ok(())
    }
}

/// Sink that never answers
pub struct StalledSink;

#[async_trait]
impl Sink for StalledSink {
    async fn send(&self, _record: &Record) -> chronycle::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Counts error and warning events emitted by this crate
#[derive(Clone, Default)]
pub struct LogCounter {
    errors: Arc<AtomicUsize>,
    warnings: Arc<AtomicUsize>,
}

impl LogCounter {
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    /// Install as the thread-default subscriber for the guard's lifetime
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }
}

impl<S: Subscriber> Layer<S> for LogCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !event.metadata().target().starts_with("chronycle") {
            return;
        }
        match *event.metadata().level() {
            Level::ERROR => {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
            Level::WARN => {
                self.warnings.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

/// Minimal record for delivery tests
pub fn sample_record() -> Record {
    Record {
        method: "GET".to_string(),
        endpoint: "http://shop.example.com/api/orders".to_string(),
        headers: Default::default(),
        query_params: Default::default(),
        request_body: serde_json::Value::Null,
        duration: 42,
        status_code: 200,
        response_headers: Default::default(),
        response_body: serde_json::json!({"orders": []}),
    }
}
