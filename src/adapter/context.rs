//! Context-style adapter for async middleware chains

use std::future::Future;

use serde_json::Value;

use super::RecordingHook;
use crate::capture::ResponseDescriptor;
use crate::normalize::{HeaderFields, RequestParts};

/// Request/response context threaded through the middleware chain
#[derive(Debug, Clone)]
pub struct Context {
    /// Incoming request
    pub request: RequestParts,
    /// Response status; `404` until a handler sets it
    pub status: u16,
    /// Response headers
    pub response_headers: HeaderFields,
    /// Response body
    pub body: Value,
}

impl Context {
    /// Fresh context for `request`
    #[must_use]
    pub fn new(request: RequestParts) -> Self {
        Self {
            request,
            status: 404,
            response_headers: HeaderFields::new(),
            body: Value::Null,
        }
    }
}

/// Adapter wrapping the downstream `next` call
#[derive(Clone)]
pub struct ContextAdapter {
    hook: RecordingHook,
}

impl ContextAdapter {
    /// Create an adapter around `hook`
    #[must_use]
    pub fn new(hook: RecordingHook) -> Self {
        Self { hook }
    }

    /// Run `next` and record the response it leaves in the context
    ///
    /// A downstream error is passed through and nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns whatever error `next` returns
    pub async fn handle<F, Fut, E>(&self, ctx: Context, next: F) -> Result<Context, E>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<Context, E>>,
    {
        let capture = self.hook.begin(&ctx.request);
        let ctx = next(ctx).await?;

        if let Some(capture) = capture {
            capture.finish(
                ResponseDescriptor::new(ctx.status, ctx.body.clone())
                    .with_headers(ctx.response_headers.clone()),
            );
        }

        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support;
    use crate::config::RecorderConfig;
    use serde_json::json;

    #[tokio::test]
    async fn test_handle_records_downstream_response() {
        let (hook, mut rx) = test_support::hook(RecorderConfig::new("k"));
        let adapter = ContextAdapter::new(hook);

        let ctx = Context::new(RequestParts::new("PUT", "/api/cart").with_body(json!({"qty": 2})));
        let ctx = adapter
            .handle(ctx, |mut ctx| async move {
                ctx.status = 200;
                ctx.body = json!({"total": 20});
                Ok::<_, std::io::Error>(ctx)
            })
            .await
            .unwrap();

        assert_eq!(ctx.body, json!({"total": 20}));

        let record = rx.recv().await.unwrap();
        assert_eq!(record.request_body, json!({"qty": 2}));
        assert_eq!(record.status_code, 200);
        assert_eq!(record.response_body, json!({"total": 20}));
    }

    #[tokio::test]
    async fn test_handle_error_skips_record() {
        let (hook, mut rx) = test_support::hook(RecorderConfig::new("k"));
        let adapter = ContextAdapter::new(hook);

        let result = adapter
            .handle(Context::new(RequestParts::new("GET", "/api/boom")), |_ctx| async {
                Err::<Context, _>("downstream failed")
            })
            .await;

        assert_eq!(result.unwrap_err(), "downstream failed");
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
