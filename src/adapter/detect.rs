//! Startup selection of the adapter style
//!
//! Strategies only look at an injected `Probe`, never at process state.

use std::collections::HashMap;

use tracing::{debug, info};

use super::AdapterKind;

/// Probe key read by `EnvVarStrategy` by default
pub const ADAPTER_ENV_KEY: &str = "CHRONYCLE_ADAPTER";

/// Snapshot of facts about the host environment
#[derive(Debug, Clone, Default)]
pub struct Probe {
    facts: HashMap<String, String>,
}

impl Probe {
    /// Empty probe
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe built from key/value pairs (for example `std::env::vars()`)
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            facts: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Add a fact
    #[must_use]
    pub fn with_fact(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.insert(key.into(), value.into());
        self
    }

    /// Look up a fact
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }
}

/// One way of recognizing the host framework
pub trait DetectionStrategy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Adapter style, if this strategy recognizes the environment
    fn detect(&self, probe: &Probe) -> Option<AdapterKind>;
}

/// Always answers with a fixed kind
pub struct Explicit(pub AdapterKind);

impl DetectionStrategy for Explicit {
    fn name(&self) -> &str {
        "explicit"
    }

    fn detect(&self, _probe: &Probe) -> Option<AdapterKind> {
        Some(self.0)
    }
}

/// Reads the adapter kind from a probe key
pub struct EnvVarStrategy {
    key: String,
}

impl EnvVarStrategy {
    /// Strategy reading `key`
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for EnvVarStrategy {
    fn default() -> Self {
        Self::new(ADAPTER_ENV_KEY)
    }
}

impl DetectionStrategy for EnvVarStrategy {
    fn name(&self) -> &str {
        "env"
    }

    fn detect(&self, probe: &Probe) -> Option<AdapterKind> {
        let value = probe.get(&self.key)?;
        match value.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                debug!("Ignoring {}: {e}", self.key);
                None
            }
        }
    }
}

/// Maps the presence of a marker key to a kind
pub struct MarkerStrategy {
    marker: String,
    kind: AdapterKind,
}

impl MarkerStrategy {
    /// Strategy answering `kind` when `marker` is present
    pub fn new(marker: impl Into<String>, kind: AdapterKind) -> Self {
        Self {
            marker: marker.into(),
            kind,
        }
    }
}

impl DetectionStrategy for MarkerStrategy {
    fn name(&self) -> &str {
        &self.marker
    }

    fn detect(&self, probe: &Probe) -> Option<AdapterKind> {
        probe.get(&self.marker).map(|_| self.kind)
    }
}

/// Env override first, then framework markers
#[must_use]
pub fn default_strategies() -> Vec<Box<dyn DetectionStrategy>> {
    vec![
        Box::new(EnvVarStrategy::default()),
        Box::new(MarkerStrategy::new("framework.express", AdapterKind::Callback)),
        Box::new(MarkerStrategy::new("framework.fastify", AdapterKind::Hook)),
        Box::new(MarkerStrategy::new("framework.koa", AdapterKind::Context)),
    ]
}

/// First strategy that recognizes the probe wins; `Generic` otherwise
#[must_use]
pub fn detect_adapter(strategies: &[Box<dyn DetectionStrategy>], probe: &Probe) -> AdapterKind {
    for strategy in strategies {
        if let Some(kind) = strategy.detect(probe) {
            info!("Adapter '{kind}' selected by strategy '{}'", strategy.name());
            return kind;
        }
    }

    debug!("No strategy matched, using generic adapter");
    AdapterKind::Generic
}
