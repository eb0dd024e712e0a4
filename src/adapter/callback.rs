//! Callback-style adapter for frameworks that finalize through response methods

use serde::Serialize;
use serde_json::Value;

use super::RecordingHook;
use crate::capture::{ResponseCapture, ResponseDescriptor};
use crate::normalize::{HeaderFields, RawRequest};
use crate::Result;

/// Adapter producing one `ResponseFinisher` per request
#[derive(Clone)]
pub struct CallbackAdapter {
    hook: RecordingHook,
}

impl CallbackAdapter {
    /// Create an adapter around `hook`
    #[must_use]
    pub fn new(hook: RecordingHook) -> Self {
        Self { hook }
    }

    /// Start handling a request; `writer` is the framework's own send path
    pub fn intercept<R, W, T>(&self, raw: &R, writer: W) -> ResponseFinisher<W>
    where
        R: RawRequest + ?Sized,
        W: FnMut(u16, &HeaderFields, &Value) -> T,
    {
        ResponseFinisher {
            capture: self.hook.begin(raw),
            status: 200,
            headers: HeaderFields::new(),
            writer,
        }
    }
}

/// Response handle with `send` and `json` finalize paths
///
/// Both paths share one capture, so calling them in any combination
/// records at most once. The writer always runs and its return value is
/// passed back unchanged.
pub struct ResponseFinisher<W> {
    capture: Option<ResponseCapture>,
    status: u16,
    headers: HeaderFields,
    writer: W,
}

impl<W, T> ResponseFinisher<W>
where
    W: FnMut(u16, &HeaderFields, &Value) -> T,
{
    /// Set the status code
    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    /// Set a response header (name is lowercased)
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Whether this request is being recorded
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.capture.as_ref().is_some_and(|c| !c.is_finished())
    }

    /// Send `body`
    pub fn send(&mut self, body: Value) -> T {
        if let Some(capture) = &self.capture {
            let response = ResponseDescriptor::new(self.status, body.clone())
                .with_headers(self.headers.clone());
            capture.finish(response);
        }
        (self.writer)(self.status, &self.headers, &body)
    }

    /// Serialize `body` as JSON and send it through `send`
    ///
    /// # Errors
    ///
    /// Returns error if `body` cannot be serialized
    pub fn json<B: Serialize + ?Sized>(&mut self, body: &B) -> Result<T> {
        let value = serde_json::to_value(body)?;
        self.headers
            .entry("content-type".to_string())
            .or_insert_with(|| "application/json".to_string());
        Ok(self.send(value))
    }
}
