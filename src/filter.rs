//! Recording decision for a resolved endpoint
//!
//! Evaluation order, first match wins:
//! 1. Sampling
//! 2. Built-in and caller exclusions
//! 3. Static asset extensions
//! 4. Whitelist (only when non-empty)
//! 5. Record

use regex::Regex;
use tracing::debug;

use crate::config::{Pattern, RecorderConfig};
use crate::{ChronycleError, Result};

/// Browser discovery and housekeeping paths that are never API traffic
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "/.well-known/",
    "/favicon.ico",
    "/robots.txt",
    "/sitemap.xml",
    "/apple-touch-icon",
    "/manifest.json",
    "/site.webmanifest",
    "/browserconfig.xml",
    "/crossdomain.xml",
    "/ads.txt",
    "/security.txt",
    "/humans.txt",
    "/sw.js",
    "/service-worker.js",
];

/// Extensions of static assets (lowercase)
pub const STATIC_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".mjs", ".map", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp",
    ".avif", ".bmp", ".woff", ".woff2", ".ttf", ".otf", ".eot",
];

/// Outcome of a filter evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Request should be recorded
    Record,
    /// Dropped by sampling
    Sampled,
    /// Matched an exclude pattern (source text included)
    Excluded(String),
    /// Path ends with a static asset extension
    StaticAsset,
    /// Whitelist configured and nothing matched
    NotWhitelisted,
}

impl Decision {
    /// Whether the request should be recorded
    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record)
    }
}

#[derive(Debug)]
struct CompiledPattern {
    source: String,
    literal: bool,
    regex: Regex,
}

impl CompiledPattern {
    fn compile(pattern: &Pattern) -> Result<Self> {
        let source = pattern.source();
        let regex = Regex::new(source).map_err(|e| ChronycleError::InvalidPattern {
            pattern: source.to_string(),
            source: e,
        })?;

        Ok(Self {
            source: source.to_string(),
            literal: matches!(pattern, Pattern::Text(_)),
            regex,
        })
    }

    fn matches(&self, endpoint: &str) -> bool {
        let source = self.source.as_str();
        if self.literal && (endpoint.contains(source) || endpoint.starts_with(source)) {
            return true;
        }
        self.regex.is_match(endpoint)
    }
}

/// Compiled filter policy
///
/// All patterns are compiled up front so a malformed caller pattern fails
/// at construction rather than on a live request.
#[derive(Debug)]
pub struct FilterPolicy {
    sample_rate: Option<f64>,
    exclude: Vec<CompiledPattern>,
    whitelist: Vec<CompiledPattern>,
    smart_filtering: bool,
}

impl FilterPolicy {
    /// Compile a policy from configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` if any pattern is not a valid regular expression
    pub fn new(config: &RecorderConfig) -> Result<Self> {
        let smart_filtering = !config.disable_smart_filtering;

        let defaults = if smart_filtering { DEFAULT_EXCLUDES } else { &[] };
        let exclude = defaults
            .iter()
            .map(|&text| Pattern::from(text))
            .chain(config.exclude.iter().cloned())
            .map(|p| CompiledPattern::compile(&p))
            .collect::<Result<Vec<_>>>()?;

        let whitelist = config
            .endpoints
            .iter()
            .map(CompiledPattern::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sample_rate: config.sample_rate,
            exclude,
            whitelist,
            smart_filtering,
        })
    }

    /// Decide with a fresh random draw
    #[must_use]
    pub fn should_record(&self, endpoint: &str) -> bool {
        self.should_record_with_draw(endpoint, fastrand::f64())
    }

    /// Decide with a caller-provided draw in `[0, 1)`
    #[must_use]
    pub fn should_record_with_draw(&self, endpoint: &str, draw: f64) -> bool {
        self.evaluate(endpoint, Some(draw)).is_record()
    }

    /// Full evaluation; `None` skips the sampling step
    #[must_use]
    pub fn evaluate(&self, endpoint: &str, draw: Option<f64>) -> Decision {
        let decision = self.decide(endpoint, draw);
        debug!(endpoint, ?decision, "Filter decision");
        decision
    }

    fn decide(&self, endpoint: &str, draw: Option<f64>) -> Decision {
        if let (Some(rate), Some(draw)) = (self.sample_rate, draw) {
            if draw > rate {
                return Decision::Sampled;
            }
        }

        if let Some(pattern) = self.exclude.iter().find(|p| p.matches(endpoint)) {
            return Decision::Excluded(pattern.source.clone());
        }

        if self.smart_filtering && is_static_asset(endpoint) {
            return Decision::StaticAsset;
        }

        if !self.whitelist.is_empty() && !self.whitelist.iter().any(|p| p.matches(endpoint)) {
            return Decision::NotWhitelisted;
        }

        Decision::Record
    }
}

/// One-shot decision that compiles the policy on every call
///
/// # Errors
///
/// Returns `InvalidPattern` if any configured pattern is malformed
pub fn should_record(endpoint: &str, config: &RecorderConfig) -> Result<bool> {
    Ok(FilterPolicy::new(config)?.should_record(endpoint))
}

/// Path portion of an endpoint, without query or fragment
fn endpoint_path(endpoint: &str) -> &str {
    let rest = match endpoint.find("://") {
        Some(idx) => {
            let after_scheme = &endpoint[idx + 3..];
            after_scheme
                .find('/')
                .map_or("", |slash| &after_scheme[slash..])
        }
        None => endpoint,
    };

    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    &rest[..end]
}

fn is_static_asset(endpoint: &str) -> bool {
    let path = endpoint_path(endpoint).to_ascii_lowercase();
    STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
