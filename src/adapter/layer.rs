//! `tower` middleware for `http` services

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::{Request, Response};
use serde_json::Value;
use tower::{Layer, Service};
use tracing::debug;

use super::RecordingHook;
use crate::capture::{ResponseCapture, ResponseDescriptor};
use crate::normalize::{body_value, header_fields, HeaderFields, HttpRequestView};

/// Layer wrapping services with request recording
#[derive(Clone)]
pub struct RecordingLayer {
    hook: RecordingHook,
    encrypted: Option<bool>,
}

impl RecordingLayer {
    /// Create a layer around `hook`
    #[must_use]
    pub fn new(hook: RecordingHook) -> Self {
        Self {
            hook,
            encrypted: None,
        }
    }

    /// Tell the normalizer whether the listener terminates TLS
    #[must_use]
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = Some(encrypted);
        self
    }
}

impl<S> Layer<S> for RecordingLayer {
    type Service = RecordingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecordingService {
            inner,
            hook: self.hook.clone(),
            encrypted: self.encrypted,
        }
    }
}

/// Service produced by `RecordingLayer`
///
/// The recording decision is made from the request head. Bodies are never
/// buffered ahead of the inner service or the client: recorded requests
/// copy up to `maxBodySize` bytes of each body as frames pass through, and
/// the record is produced when the response body reaches its end.
#[derive(Clone)]
pub struct RecordingService<S> {
    inner: S,
    hook: RecordingHook,
    encrypted: Option<bool>,
}

impl<S, B, ResBody> Service<Request<B>> for RecordingService<S>
where
    S: Service<Request<RequestBody<B>>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: 'static,
    B: Body<Data = Bytes>,
    ResBody: Body<Data = Bytes> + Send + 'static,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let (parts, body) = request.into_parts();

        let capture = {
            let mut view = HttpRequestView::new(&parts);
            if let Some(encrypted) = self.encrypted {
                view = view.with_encrypted(encrypted);
            }
            self.hook.begin(&view)
        };

        let limit = self.hook.config().max_body_size;
        let recording = capture.map(|capture| {
            let tap = Arc::new(Mutex::new(BodyTap::new(&parts.headers, limit)));
            (capture, tap)
        });

        let body = match &recording {
            Some((_, tap)) => RequestBody::tapped(body, Arc::clone(tap)),
            None => RequestBody::passthrough(body),
        };

        let future = self.inner.call(Request::from_parts(parts, body));

        Box::pin(async move {
            let response = future.await?;

            let Some((capture, request)) = recording else {
                return Ok(response.map(ResponseBody::passthrough));
            };

            let (parts, body) = response.into_parts();
            let completion = Completion {
                capture,
                request,
                status: parts.status.as_u16(),
                headers: header_fields(&parts.headers),
                body: BodyTap::new(&parts.headers, limit),
            };
            Ok(Response::from_parts(parts, ResponseBody::recording(body, completion)))
        })
    }
}

/// Bounded copy of the data frames of one body
struct BodyTap {
    content_type: Option<String>,
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BodyTap {
    fn new(headers: &HeaderMap, limit: usize) -> Self {
        Self {
            content_type: headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, data: &Bytes) {
        if self.truncated {
            return;
        }
        if self.bytes.len() + data.len() > self.limit {
            debug!(limit = self.limit, "Body exceeds capture limit, recording null");
            self.truncated = true;
            self.bytes = Vec::new();
            return;
        }
        self.bytes.extend_from_slice(data);
    }

    fn value(&self) -> Value {
        if self.truncated {
            Value::Null
        } else {
            body_value(&self.bytes, self.content_type.as_deref())
        }
    }
}

fn lock(tap: &Mutex<BodyTap>) -> MutexGuard<'_, BodyTap> {
    tap.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Request body handed to the inner service
///
/// Frames are forwarded unchanged. When the request is recorded, data
/// frames are also copied into the capture.
pub struct RequestBody<B> {
    inner: Pin<Box<B>>,
    tap: Option<Arc<Mutex<BodyTap>>>,
}

impl<B> RequestBody<B> {
    fn passthrough(inner: B) -> Self {
        Self {
            inner: Box::pin(inner),
            tap: None,
        }
    }

    fn tapped(inner: B, tap: Arc<Mutex<BodyTap>>) -> Self {
        Self {
            inner: Box::pin(inner),
            tap: Some(tap),
        }
    }
}

impl<B> Body for RequestBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, B::Error>>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_frame(cx);

        if let (Poll::Ready(Some(Ok(frame))), Some(tap)) = (&polled, &this.tap) {
            if let Some(data) = frame.data_ref() {
                lock(tap).push(data);
            }
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

struct Completion {
    capture: ResponseCapture,
    request: Arc<Mutex<BodyTap>>,
    status: u16,
    headers: HeaderFields,
    body: BodyTap,
}

impl Completion {
    fn finish(self) {
        self.capture.set_request_body(lock(&self.request).value());
        self.capture.finish(
            ResponseDescriptor::new(self.status, self.body.value()).with_headers(self.headers),
        );
    }
}

/// Response body returned to the caller
///
/// Frames are forwarded as the inner body yields them. A recorded response
/// is finished once its body ends; a body that errors or is dropped early
/// produces no record.
pub struct ResponseBody<B> {
    inner: Pin<Box<B>>,
    pending: Option<Completion>,
}

impl<B: Body> ResponseBody<B> {
    fn passthrough(inner: B) -> Self {
        Self {
            inner: Box::pin(inner),
            pending: None,
        }
    }

    fn recording(inner: B, completion: Completion) -> Self {
        let mut body = Self {
            inner: Box::pin(inner),
            pending: Some(completion),
        };
        // An empty body may never be polled.
        if body.inner.is_end_stream() {
            body.complete();
        }
        body
    }

    fn complete(&mut self) {
        if let Some(completion) = self.pending.take() {
            completion.finish();
        }
    }
}

impl<B> Body for ResponseBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, B::Error>>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(data), Some(pending)) = (frame.data_ref(), this.pending.as_mut()) {
                    pending.body.push(data);
                }
                if this.inner.is_end_stream() {
                    this.complete();
                }
            }
            Poll::Ready(Some(Err(_))) => {
                if this.pending.take().is_some() {
                    debug!("Response body failed, dropping capture");
                }
            }
            Poll::Ready(None) => this.complete(),
            Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
