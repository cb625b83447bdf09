//! Test Pipeline Module
//!
//! Drives a module example through the provisioning engine:
//!
//! 1. **Workspace**: copy the example into an isolated scratch directory
//! 2. **Engine**: init and apply, retrying transient errors
//! 3. **Idempotency**: a second plan must be a no-op
//! 4. **Record**: append a version snapshot, then destroy
//!
//! The upgrade variant applies the previous release first and redirects
//! its module references to the local code before the idempotency check.

pub mod engine;
pub mod idempotency;
pub mod orchestrator;
pub mod record;
pub mod redirect;
pub mod retry;
pub mod workspace;

// Re-export main types for convenient access
pub use engine::{CommandOutput, ProvisioningEngine, Terraform, TerraformCli, TerraformOptions, TerraformOutput};
pub use orchestrator::{Assertion, TestOptions, TestOutcome, TestRunner};
pub use record::VersionSnapshot;
pub use retry::{read_retryable_errors, RetryPolicy};
