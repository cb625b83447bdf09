//! Error handling module
//!
//! Provides the unified error type shared by extraction, diffing, release
//! resolution and the test pipeline.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Library-wide error type
#[derive(Error, Debug)]
pub enum HelperError {
    /// Malformed module source or undecodable `variable`/`output` block
    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Two interface records could not be compared
    #[error("Diff error: {0}")]
    Diff(String),

    /// Remote source could not be fetched
    #[error("cannot clone repo: {0}")]
    Clone(String),

    /// Not a failure: the test should be skipped with this explanation
    #[error("{0}")]
    Skip(String),

    /// No comparable previous version exists
    #[error("{0}")]
    NotFound(String),

    /// Apply succeeded but a follow-up plan still reports changes
    #[error("terraform configuration not idempotent:{plan}")]
    NonIdempotent { plan: String },

    /// Provisioning engine command exited unsuccessfully
    #[error("`{command}` failed with exit code {exit_code}: {output}")]
    Provisioning {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// The caller's check over the applied outputs rejected them
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// Snapshot persistence failure during teardown
    #[error("Teardown error: {0}")]
    Teardown(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HelperError {
    /// Whether this error signals "skip the test" rather than a failure
    pub fn is_skip(&self) -> bool {
        matches!(self, HelperError::Skip(_) | HelperError::NotFound(_))
    }
}

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, HelperError>;

/// Helper function to create a parse error
pub fn parse_error(path: impl Into<PathBuf>, msg: impl Into<String>) -> HelperError {
    HelperError::Parse {
        path: path.into(),
        message: msg.into(),
    }
}

/// "No previous tag yet" skip signal
pub fn cannot_test_error() -> HelperError {
    HelperError::NotFound(
        "no previous tag yet or previous tag's folder structure is different than the current version, skip upgrade test"
            .to_string(),
    )
}

/// Major version 0 skip signal
pub fn skip_v0_error() -> HelperError {
    HelperError::Skip("v0 is meant to be unstable, skip upgrade test".to_string())
}
