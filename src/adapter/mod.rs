//! Framework integration
//!
//! Every integration style shares one `RecordingHook`: normalize the
//! request, consult the filter policy, and hand back a `ResponseCapture`
//! only when the request should be recorded. The variants differ only in
//! how the host framework exposes the request and signals completion.

mod callback;
mod context;
mod detect;
mod hooks;
mod layer;

pub use callback::{CallbackAdapter, ResponseFinisher};
pub use context::{Context, ContextAdapter};
pub use detect::{
    default_strategies, detect_adapter, DetectionStrategy, EnvVarStrategy, Explicit,
    MarkerStrategy, Probe, ADAPTER_ENV_KEY,
};
pub use hooks::HookAdapter;
pub use layer::{RecordingLayer, RecordingService, RequestBody, ResponseBody};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::capture::ResponseCapture;
use crate::config::RecorderConfig;
use crate::filter::FilterPolicy;
use crate::normalize::{normalize, RawRequest};
use crate::recorder::{Recorder, Sink};
use crate::{ChronycleError, Result};

/// Integration style of the host framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// `tower` middleware around `http` services
    Generic,
    /// Response object with `send`/`json` style finalize methods
    Callback,
    /// Paired request/send lifecycle hooks keyed by request id
    Hook,
    /// Context object passed through an async `next` chain
    Context,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generic => "generic",
            Self::Callback => "callback",
            Self::Hook => "hook",
            Self::Context => "context",
        };
        f.write_str(name)
    }
}

impl FromStr for AdapterKind {
    type Err = ChronycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" | "tower" | "hyper" => Ok(Self::Generic),
            "callback" | "express" => Ok(Self::Callback),
            "hook" | "fastify" => Ok(Self::Hook),
            "context" | "koa" => Ok(Self::Context),
            other => Err(ChronycleError::ConfigError(format!(
                "Unknown adapter kind: {other}"
            ))),
        }
    }
}

/// Per-request entry point shared by all adapters
#[derive(Clone)]
pub struct RecordingHook {
    policy: Arc<FilterPolicy>,
    recorder: Recorder,
}

impl RecordingHook {
    /// Build a hook delivering over HTTP
    ///
    /// # Errors
    ///
    /// Returns error on a malformed filter pattern or HTTP client failure
    pub fn new(config: RecorderConfig) -> Result<Self> {
        let policy = FilterPolicy::new(&config)?;
        let recorder = Recorder::new(Arc::new(config))?;
        Ok(Self::from_parts(policy, recorder))
    }

    /// Build a hook delivering to a custom sink
    ///
    /// # Errors
    ///
    /// Returns error on a malformed filter pattern
    pub fn with_sink(config: RecorderConfig, sink: Arc<dyn Sink>) -> Result<Self> {
        let policy = FilterPolicy::new(&config)?;
        let recorder = Recorder::with_sink(Arc::new(config), sink);
        Ok(Self::from_parts(policy, recorder))
    }

    fn from_parts(policy: FilterPolicy, recorder: Recorder) -> Self {
        Self {
            policy: Arc::new(policy),
            recorder,
        }
    }

    /// Normalize and filter; returns a capture only when recording
    pub fn begin<R: RawRequest + ?Sized>(&self, raw: &R) -> Option<ResponseCapture> {
        let request = normalize(raw);

        if !self.policy.should_record(&request.endpoint) {
            debug!(endpoint = %request.endpoint, "Skipping request");
            return None;
        }

        Some(ResponseCapture::start(request, self.recorder.clone()))
    }

    /// Filter policy in use
    #[must_use]
    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &RecorderConfig {
        self.recorder.config()
    }
}

/// One adapter, chosen at startup
#[derive(Clone)]
pub enum FrameworkAdapter {
    /// `tower` layer
    Generic(RecordingLayer),
    /// Callback-style finisher
    Callback(CallbackAdapter),
    /// Lifecycle hooks
    Hook(Arc<HookAdapter>),
    /// Context chain
    Context(ContextAdapter),
}

impl FrameworkAdapter {
    /// Build the adapter for `kind`
    #[must_use]
    pub fn build(kind: AdapterKind, hook: RecordingHook) -> Self {
        match kind {
            AdapterKind::Generic => Self::Generic(RecordingLayer::new(hook)),
            AdapterKind::Callback => Self::Callback(CallbackAdapter::new(hook)),
            AdapterKind::Hook => Self::Hook(Arc::new(HookAdapter::new(hook))),
            AdapterKind::Context => Self::Context(ContextAdapter::new(hook)),
        }
    }

    /// Run detection strategies in order and build the winner
    #[must_use]
    pub fn detect(
        strategies: &[Box<dyn DetectionStrategy>],
        probe: &Probe,
        hook: RecordingHook,
    ) -> Self {
        Self::build(detect_adapter(strategies, probe), hook)
    }

    /// Integration style
    #[must_use]
    pub fn kind(&self) -> AdapterKind {
        match self {
            Self::Generic(_) => AdapterKind::Generic,
            Self::Callback(_) => AdapterKind::Callback,
            Self::Hook(_) => AdapterKind::Hook,
            Self::Context(_) => AdapterKind::Context,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RequestParts;

    #[test]
    fn test_adapter_kind_parse() {
        assert_eq!("express".parse::<AdapterKind>().unwrap(), AdapterKind::Callback);
        assert_eq!(" Koa ".parse::<AdapterKind>().unwrap(), AdapterKind::Context);
        assert_eq!("tower".parse::<AdapterKind>().unwrap(), AdapterKind::Generic);
        assert!("rails".parse::<AdapterKind>().is_err());
    }

    #[tokio::test]
    async fn test_begin_respects_policy() {
        let (hook, _rx) =
            test_support::hook(RecorderConfig::new("k").with_exclude(["/health"]));

        assert!(hook.begin(&RequestParts::new("GET", "/health")).is_none());
        assert!(hook.begin(&RequestParts::new("GET", "/api/orders")).is_some());
    }

    #[tokio::test]
    async fn test_build_each_kind() {
        let (hook, _rx) = test_support::hook(RecorderConfig::new("k"));

        for kind in [
            AdapterKind::Generic,
            AdapterKind::Callback,
            AdapterKind::Hook,
            AdapterKind::Context,
        ] {
            assert_eq!(FrameworkAdapter::build(kind, hook.clone()).kind(), kind);
        }
    }

    #[test]
    fn test_invalid_pattern_fails_construction() {
        let config = RecorderConfig::new("k").with_endpoints(["(oops"]);
        assert!(RecordingHook::new(config).is_err());
    }
}
