//! Configuration types for Chronycle

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::filter::FilterPolicy;
use crate::{ChronycleError, Result};

/// Default collector base address
pub const DEFAULT_REMOTE_BASE: &str = "https://chronycle-api.onrender.com";

/// Path appended to the remote base for every delivery
pub const RECORDING_PATH: &str = "/api/v1/recording";

/// Default delivery timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default cap on buffered body bytes per captured request or response
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024; // 1 MB

/// Environment key overriding the credential
pub const ENV_API_KEY: &str = "CHRONYCLE_API_KEY";

/// Environment key overriding the remote base
pub const ENV_REMOTE_BASE: &str = "CHRONYCLE_URL";

/// Endpoint pattern used by the whitelist and the exclude list
///
/// A plain string matches as a substring, as a prefix, or as a regular
/// expression. The table form `{ regex = "..." }` matches as a regular
/// expression only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pattern {
    /// Substring, prefix or regex
    Text(String),
    /// Regex only
    Regex {
        /// Regular expression source
        regex: String,
    },
}

impl Pattern {
    /// Build a regex-only pattern
    pub fn regex(source: impl Into<String>) -> Self {
        Self::Regex {
            regex: source.into(),
        }
    }

    /// Pattern source text
    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Regex { regex } => regex,
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Pattern {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Recorder configuration
///
/// Built once per mounted recorder and shared read-only across requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Credential sent as `x-api-key`
    pub api_key: String,
    /// Collector base address
    pub chronycle_url: String,
    /// Whitelist; when non-empty only matching endpoints are recorded
    pub endpoints: Vec<Pattern>,
    /// Caller-supplied exclusions, evaluated after the built-in ones
    pub exclude: Vec<Pattern>,
    /// Fraction of requests to keep, in `[0, 1]`
    pub sample_rate: Option<f64>,
    /// Delivery timeout in milliseconds
    pub timeout: u64,
    /// Suppress the secondary warning on delivery failure
    pub silent: bool,
    /// Turn off built-in exclusions and static asset filtering
    pub disable_smart_filtering: bool,
    /// Bodies larger than this many bytes are forwarded but recorded as `null`
    pub max_body_size: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            chronycle_url: DEFAULT_REMOTE_BASE.to_string(),
            endpoints: Vec::new(),
            exclude: Vec::new(),
            sample_rate: None,
            timeout: DEFAULT_TIMEOUT_MS,
            silent: false,
            disable_smart_filtering: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl RecorderConfig {
    /// Create a configuration with the given credential and defaults elsewhere
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Override the collector base address
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.chronycle_url = url.into();
        self
    }

    /// Set the endpoint whitelist
    #[must_use]
    pub fn with_endpoints<I, P>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Pattern>,
    {
        self.endpoints = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the exclude list
    #[must_use]
    pub fn with_exclude<I, P>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Pattern>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the sample rate
    #[must_use]
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    /// Set the delivery timeout in milliseconds
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    /// Toggle the secondary failure warning
    #[must_use]
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Toggle smart filtering
    #[must_use]
    pub fn with_smart_filtering_disabled(mut self, disabled: bool) -> Self {
        self.disable_smart_filtering = disabled;
        self
    }

    /// Set the body capture cap in bytes
    #[must_use]
    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Delivery timeout as a `Duration`
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Full collector URL records are posted to
    #[must_use]
    pub fn recording_url(&self) -> String {
        format!(
            "{}{RECORDING_PATH}",
            self.chronycle_url.trim_end_matches('/')
        )
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChronycleError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ChronycleError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Layer credential and remote base overrides from an environment lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            self.api_key = key;
        }
        if let Some(url) = lookup(ENV_REMOTE_BASE).filter(|v| !v.is_empty()) {
            self.chronycle_url = url;
        }
    }

    /// Validate configuration
    ///
    /// The credential is deliberately not checked; the collector rejects it.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if let Some(rate) = self.sample_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ChronycleError::ConfigError(format!(
                    "sampleRate must be within [0, 1], got {rate}"
                )));
            }
        }

        if self.timeout == 0 {
            return Err(ChronycleError::ConfigError(
                "timeout must be greater than 0".to_string(),
            ));
        }

        let url = self.chronycle_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ChronycleError::ConfigError(format!(
                "chronycleUrl must be an http(s) address: {}",
                self.chronycle_url
            )));
        }

        FilterPolicy::new(self).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parse() {
        let config_toml = r#"
            apiKey = "k"
            endpoints = ["/api/", { regex = "^https?://[^/]+/v[0-9]+/" }]
            exclude = ["/health"]
            sampleRate = 0.25
        "#;

        let config: RecorderConfig = toml::from_str(config_toml).unwrap();
        assert_eq!(config.api_key, "k");
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1], Pattern::regex("^https?://[^/]+/v[0-9]+/"));
        assert_eq!(config.exclude, vec![Pattern::from("/health")]);
        assert_eq!(config.sample_rate, Some(0.25));
        assert_eq!(config.chronycle_url, DEFAULT_REMOTE_BASE);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.max_body_size, DEFAULT_MAX_BODY_SIZE);
        assert!(!config.silent);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        let config_toml = r#"
            apiKey = "secret"
            chronycleUrl = "http://collector.internal:9000/"
            timeout = 250
            silent = true
            disableSmartFiltering = true
            maxBodySize = 4096
        "#;
        file.write_all(config_toml.as_bytes()).unwrap();

        let config = RecorderConfig::from_file(file.path()).unwrap();
        assert!(config.silent);
        assert!(config.disable_smart_filtering);
        assert_eq!(config.max_body_size, 4096);
        assert_eq!(config.timeout_duration(), Duration::from_millis(250));
        assert_eq!(
            config.recording_url(),
            "http://collector.internal:9000/api/v1/recording"
        );
    }

    #[test]
    fn test_invalid_sample_rate() {
        let config = RecorderConfig::new("k").with_sample_rate(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = RecorderConfig::new("k").with_exclude(["/api/(unclosed"]);
        assert!(matches!(
            config.validate(),
            Err(ChronycleError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_missing_api_key_is_not_validated() {
        assert!(RecorderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RecorderConfig::new("from-file");
        config.apply_env_overrides(|key| match key {
            ENV_API_KEY => Some("from-env".to_string()),
            ENV_REMOTE_BASE => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.api_key, "from-env");
        assert_eq!(config.chronycle_url, DEFAULT_REMOTE_BASE);
    }
}
