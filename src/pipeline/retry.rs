//! Retry policy for provisioning commands
//!
//! A failed command is retried only when its output matches one of the
//! configured regexes; retries are bounded and spaced by a fixed interval.

use crate::error::{HelperError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_TIME_BETWEEN_RETRIES: Duration = Duration::from_secs(60);

/// Applied when the known-transient error set is merged in
pub const TRANSIENT_MAX_RETRIES: u32 = 3;
pub const TRANSIENT_TIME_BETWEEN_RETRIES: Duration = Duration::from_secs(5);

const PLUGIN_NETWORK_ERROR: &str = "Failed to retrieve plugin due to transient network error.";

/// Engine errors known to be transient
pub const DEFAULT_RETRYABLE_ERRORS: &[(&str, &str)] = &[
    (".*read: connection reset by peer.*", "Failed to reach helm charts repository."),
    (".*transport is closing.*", "Failed to reach Kubernetes API."),
    (".*unable to verify signature.*", PLUGIN_NETWORK_ERROR),
    (".*unable to verify checksum.*", PLUGIN_NETWORK_ERROR),
    (".*no provider exists with the given name.*", PLUGIN_NETWORK_ERROR),
    (".*registry service is unreachable.*", PLUGIN_NETWORK_ERROR),
    (".*Error installing provider.*", PLUGIN_NETWORK_ERROR),
    (".*Failed to query available provider packages.*", PLUGIN_NETWORK_ERROR),
    (".*timeout while waiting for plugin to start.*", PLUGIN_NETWORK_ERROR),
    (".*timed out waiting for server handshake.*", PLUGIN_NETWORK_ERROR),
    ("could not query provider registry for", PLUGIN_NETWORK_ERROR),
    (".*Please try again.*", "Service side suggest retry."),
];

/// Reason attached to patterns loaded from a retry config file
pub const CONFIGURED_REASON: &str = "retryable errors set by test";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub time_between_retries: Duration,
    /// regex -> human readable reason
    pub retryable_errors: BTreeMap<String, String>,
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self::default()
    }

    /// Retry destroy on any error, five times a minute apart
    pub fn destroy() -> Self {
        let mut retryable_errors = BTreeMap::new();
        retryable_errors.insert(".*".to_string(), "Retry destroy on any error".to_string());
        Self {
            max_retries: 5,
            time_between_retries: Duration::from_secs(60),
            retryable_errors,
        }
    }

    /// Fill in missing limits when retryable errors are configured
    pub fn setup(self) -> Self {
        self.setup_with(DEFAULT_MAX_RETRIES, DEFAULT_TIME_BETWEEN_RETRIES)
    }

    pub fn setup_with(mut self, max_retries: u32, time_between_retries: Duration) -> Self {
        if self.retryable_errors.is_empty() {
            return self;
        }
        if self.max_retries == 0 {
            self.max_retries = max_retries;
        }
        if self.time_between_retries.is_zero() {
            self.time_between_retries = time_between_retries;
        }
        self
    }

    /// Merge the known-transient error set and its retry limits
    pub fn with_default_retryable_errors(mut self) -> Self {
        for (pattern, reason) in DEFAULT_RETRYABLE_ERRORS {
            self.retryable_errors
                .insert(pattern.to_string(), reason.to_string());
        }
        self.max_retries = TRANSIENT_MAX_RETRIES;
        self.time_between_retries = TRANSIENT_TIME_BETWEEN_RETRIES;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.time_between_retries = interval;
        self
    }

    pub fn compile(&self) -> Result<RetryMatcher> {
        let patterns = self
            .retryable_errors
            .iter()
            .map(|(pattern, reason)| Ok((Regex::new(pattern)?, reason.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(RetryMatcher { patterns })
    }
}

/// Compiled retryable-error patterns
pub struct RetryMatcher {
    patterns: Vec<(Regex, String)>,
}

impl RetryMatcher {
    /// Reason of the first pattern matching `output`
    pub fn matching_reason(&self, output: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(output))
            .map(|(_, reason)| reason.as_str())
    }
}

#[derive(Deserialize)]
struct RetryableConfig {
    retryable_errors: Vec<String>,
}

/// Read `{"retryable_errors": ["<regex>", ...]}` into a regex -> reason map
pub fn read_retryable_errors(config: &[u8]) -> Result<BTreeMap<String, String>> {
    let cfg: RetryableConfig = serde_json::from_slice(config).map_err(|e| {
        HelperError::Config(crate::config::ConfigError::InvalidValue(format!(
            "cannot unmarshal retryable config, must be a valid `retryable_errors` config in json format: {}",
            e
        )))
    })?;

    Ok(cfg
        .retryable_errors
        .into_iter()
        .map(|pattern| (pattern, CONFIGURED_REASON.to_string()))
        .collect())
}
