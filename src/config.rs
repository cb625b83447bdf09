//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Failed to read working directory: {0}")]
    WorkingDir(#[from] std::io::Error),
}

/// Remote repository host configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    /// Access token; enables authenticated fetches and higher rate limits
    pub token: Option<String>,
    pub api_url: String,
    pub clone_host: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://api.github.com".to_string(),
            clone_host: "github.com".to_string(),
        }
    }
}

/// Provisioning engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TerraformConfig {
    pub binary: String,
    pub max_retries: u32,
    pub time_between_retries: Duration,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_string(),
            max_retries: 10,
            time_between_retries: Duration::from_secs(60),
        }
    }
}

/// Per-run environment
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Root for the clone cache and scratch workspaces
    pub tmp_root: PathBuf,
    /// Injected as `managed_identity_principal_id` when present
    pub managed_identity_principal_id: Option<String>,
    /// Major version the current code belongs to (0 when unknown)
    pub current_major_version: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tmp_root: std::env::temp_dir(),
            managed_identity_principal_id: None,
            current_major_version: 0,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub github: GithubConfig,
    pub terraform: TerraformConfig,
    pub run: RunConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let github = GithubConfig {
            token: non_empty_var("GITHUB_TOKEN"),
            api_url: non_empty_var("GITHUB_API_URL")
                .unwrap_or_else(|| GithubConfig::default().api_url),
            clone_host: non_empty_var("GITHUB_CLONE_HOST")
                .unwrap_or_else(|| GithubConfig::default().clone_host),
        };

        let defaults = TerraformConfig::default();
        let terraform = TerraformConfig {
            binary: non_empty_var("TERRAFORM_BINARY").unwrap_or(defaults.binary),
            max_retries: parse_var("TFMOD_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            time_between_retries: parse_var::<u64>("TFMOD_RETRY_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.time_between_retries),
        };

        let run = RunConfig {
            tmp_root: non_empty_var("TFMOD_TMP_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            managed_identity_principal_id: non_empty_var("MSI_ID"),
            current_major_version: current_major_version(
                std::env::var("PREVIOUS_MAJOR_VERSION").ok().as_deref(),
            )?,
        };

        Ok(Self {
            github,
            terraform,
            run,
        })
    }
}

/// Current major version derived from the previous release marker.
///
/// `v1` (or `1`) means the code under test is major version 2; an absent or
/// empty marker means 0, which disables upgrade tests.
pub fn current_major_version(previous_marker: Option<&str>) -> Result<u64, ConfigError> {
    let marker = match previous_marker.map(str::trim) {
        None | Some("") => return Ok(0),
        Some(m) => m,
    };
    let previous: u64 = marker.trim_start_matches('v').parse().map_err(|_| {
        ConfigError::InvalidValue(format!(
            "PREVIOUS_MAJOR_VERSION must look like `v1` or `1`, got `{}`",
            marker
        ))
    })?;
    Ok(previous + 1)
}

/// Module root for a test running two levels below it (e.g. `tests/unit`)
pub fn current_module_root_path() -> Result<String, ConfigError> {
    let current = std::env::current_dir()?;
    let root = current.join("..").join("..");
    Ok(root.to_string_lossy().replace('\\', "/"))
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match non_empty_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{} has invalid value `{}`", name, raw))),
    }
}
