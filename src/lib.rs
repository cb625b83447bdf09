//! tfmod-testkit - Terraform module test helper
//!
//! Guards a reusable infrastructure module against breaking its consumers:
//! - Interface extraction and breaking-change classification between versions
//! - Release resolution within a major version
//! - End-to-end and upgrade test runs with idempotency checks and version records

pub mod compat;
pub mod config;
pub mod error;
pub mod interface;
pub mod locks;
pub mod logging;
pub mod pipeline;
pub mod release;
pub mod vars;

pub use compat::{breaking_changes_detect, compare_two_modules, CompatibilityReport};
pub use config::Settings;
pub use error::{HelperError, Result};
pub use interface::{InterfaceExtractor, ModuleInterface};
pub use pipeline::{TestOptions, TestOutcome, TestRunner};
pub use release::{latest_tag, GithubSource, ReleaseSource};
