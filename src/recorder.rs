//! Asynchronous, fail-open delivery of records to the collector

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::capture::ResponseDescriptor;
use crate::config::RecorderConfig;
use crate::normalize::{HeaderFields, RequestDescriptor};
use crate::{ChronycleError, Result};

/// Credential header sent with every delivery
pub const API_KEY_HEADER: &str = "x-api-key";

/// One captured request/response pair, as posted to the collector
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Uppercase HTTP method
    pub method: String,
    /// Absolute request URL
    pub endpoint: String,
    /// Request headers
    pub headers: HeaderFields,
    /// Decoded query parameters
    pub query_params: std::collections::BTreeMap<String, String>,
    /// Request body
    pub request_body: Value,
    /// Elapsed milliseconds between capture start and finish
    pub duration: u64,
    /// Response status code
    pub status_code: u16,
    /// Response headers
    pub response_headers: HeaderFields,
    /// Response body
    pub response_body: Value,
}

impl Record {
    /// Combine descriptors and elapsed time
    #[must_use]
    pub fn new(
        request: RequestDescriptor,
        response: ResponseDescriptor,
        elapsed: Duration,
    ) -> Self {
        Self {
            method: request.method,
            endpoint: request.endpoint,
            headers: request.headers,
            query_params: request.query_params,
            request_body: request.body,
            duration: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            status_code: response.status_code,
            response_headers: response.headers,
            response_body: response.body,
        }
    }
}

/// Delivery state of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Handed to the recorder
    Pending,
    /// Request to the collector in flight
    Sending,
    /// Collector accepted the record
    Delivered,
    /// Record lost
    Failed,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Destination for records
#[async_trait]
pub trait Sink: Send + Sync {
    /// Send one record
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or rejection
    async fn send(&self, record: &Record) -> Result<()>;
}

/// Collector reached over HTTP
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpSink {
    /// Create a sink posting to `config.recording_url()`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &RecorderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            url: config.recording_url(),
            api_key: config.api_key.clone(),
        })
    }

    /// Target URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&self, record: &Record) -> Result<()> {
        let payload = serde_json::to_vec(record)?;

        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChronycleError::RejectedStatus(status.as_u16()));
        }

        Ok(())
    }
}

/// Fire-and-forget recorder
///
/// `record` never fails and never waits on the network; failures are logged
/// and the record is dropped.
#[derive(Clone)]
pub struct Recorder {
    config: Arc<RecorderConfig>,
    sink: Arc<dyn Sink>,
}

impl Recorder {
    /// Recorder delivering over HTTP
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: Arc<RecorderConfig>) -> Result<Self> {
        let sink = HttpSink::new(&config)?;
        Ok(Self::with_sink(config, Arc::new(sink)))
    }

    /// Recorder delivering to a custom sink
    pub fn with_sink(config: Arc<RecorderConfig>, sink: Arc<dyn Sink>) -> Self {
        Self { config, sink }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Spawn delivery of `record` and return immediately
    pub fn record(&self, record: Record) {
        match Handle::try_current() {
            Ok(handle) => {
                let recorder = self.clone();
                handle.spawn(async move {
                    recorder.deliver(record).await;
                });
            }
            Err(e) => {
                let err =
                    ChronycleError::Other(format!("No async runtime to deliver recording: {e}"));
                self.report_failure(&record, &err);
            }
        }
    }

    /// Deliver `record` within the configured timeout
    ///
    /// Returns the terminal state; errors are logged, never returned.
    pub async fn deliver(&self, record: Record) -> DeliveryState {
        let mut state = DeliveryState::Pending;
        transition(&mut state, DeliveryState::Sending, &record);

        let budget = self.config.timeout_duration();
        let outcome = match tokio::time::timeout(budget, self.sink.send(&record)).await {
            Ok(result) => result,
            Err(_) => Err(ChronycleError::Timeout(budget)),
        };

        match outcome {
            Ok(()) => transition(&mut state, DeliveryState::Delivered, &record),
            Err(e) => {
                self.report_failure(&record, &e);
                transition(&mut state, DeliveryState::Failed, &record);
            }
        }

        state
    }

    fn report_failure(&self, record: &Record, err: &ChronycleError) {
        error!(
            endpoint = %record.endpoint,
            method = %record.method,
            "Failed to deliver recording: {err}"
        );

        if !self.config.silent {
            warn!(
                "Chronycle recording for {} {} was dropped; the request itself was unaffected",
                record.method, record.endpoint
            );
        }
    }
}

fn transition(state: &mut DeliveryState, next: DeliveryState, record: &Record) {
    debug!(endpoint = %record.endpoint, from = %state, to = %next, "Delivery state");
    *state = next;
}
