//! Orchestrator - end-to-end and upgrade test runs
//!
//! A run copies the example into a scratch workspace, initializes and
//! applies it, checks that a second plan is clean, hands the outputs to the
//! caller's assertion, records a version snapshot and destroys what it
//! created. Snapshot and destroy happen on every exit path and never change
//! the outcome.

use crate::config::{Settings, TerraformConfig};
use crate::error::{cannot_test_error, skip_v0_error, HelperError, Result};
use crate::logging::{RunLog, RunLogger};
use crate::pipeline::engine::{ProvisioningEngine, Terraform, TerraformOptions, TerraformOutput};
use crate::pipeline::idempotency::check_idempotent;
use crate::pipeline::record::VersionSnapshot;
use crate::pipeline::redirect::rewrite_module_sources;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::workspace::{copy_folder_to_temp, Scratch};
use crate::release::{latest_tag, ReleaseSource};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Caller-supplied check over the applied module's outputs
pub type Assertion = Box<dyn FnOnce(&TerraformOutput) -> anyhow::Result<()> + Send>;

/// How a test run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    /// Not a failure; carries the reason
    Skipped(String),
    Failed(String),
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TestOutcome::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TestOutcome::Failed(_))
    }

    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => TestOutcome::Passed,
            Err(e) if e.is_skip() => TestOutcome::Skipped(e.to_string()),
            Err(e) => TestOutcome::Failed(e.to_string()),
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => write!(f, "passed"),
            TestOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            TestOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Options of one end-to-end run
pub struct TestOptions {
    pub terraform: TerraformOptions,
    pub skip_idempotent_check: bool,
    pub skip_destroy: bool,
    pub assertion: Option<Assertion>,
}

impl TestOptions {
    pub fn new(terraform: TerraformOptions) -> Self {
        Self {
            terraform,
            skip_idempotent_check: false,
            skip_destroy: false,
            assertion: None,
        }
    }

    pub fn with_assertion<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&TerraformOutput) -> anyhow::Result<()> + Send + 'static,
    {
        self.assertion = Some(Box::new(assertion));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    EndToEnd,
    Unit,
}

/// A prepared run: the scratch copy and the options pointing into it
struct Workspace {
    options: TerraformOptions,
    _scratch: Scratch,
}

pub struct TestRunner {
    engine: Arc<dyn ProvisioningEngine>,
    releases: Arc<dyn ReleaseSource>,
    terraform: TerraformConfig,
    tmp_root: PathBuf,
    destroy_retry: RetryPolicy,
}

impl TestRunner {
    pub fn new(engine: Arc<dyn ProvisioningEngine>, releases: Arc<dyn ReleaseSource>, settings: &Settings) -> Self {
        Self {
            engine,
            releases,
            terraform: settings.terraform.clone(),
            tmp_root: settings.run.tmp_root.clone(),
            destroy_retry: RetryPolicy::destroy(),
        }
    }

    pub fn with_destroy_retry(mut self, policy: RetryPolicy) -> Self {
        self.destroy_retry = policy;
        self
    }

    /// Apply `root/example`, check idempotency, assert on outputs and
    /// record a version snapshot.
    pub async fn run_e2e_test(
        &self,
        root: &Path,
        example: &str,
        terraform: TerraformOptions,
        assertion: Option<Assertion>,
    ) -> TestOutcome {
        let mut options = TestOptions::new(terraform);
        options.assertion = assertion;
        self.run(root, example, options, RunKind::EndToEnd).await
    }

    pub async fn run_e2e_test_with_options(&self, root: &Path, example: &str, options: TestOptions) -> TestOutcome {
        self.run(root, example, options, RunKind::EndToEnd).await
    }

    /// Apply without a snapshot or buffered logs; nothing is destroyed and
    /// idempotency is not checked.
    pub async fn run_unit_test(
        &self,
        root: &Path,
        example: &str,
        terraform: TerraformOptions,
        assertion: Option<Assertion>,
    ) -> TestOutcome {
        let options = TestOptions {
            terraform,
            skip_idempotent_check: true,
            skip_destroy: true,
            assertion,
        };
        self.run(root, example, options, RunKind::Unit).await
    }

    async fn run(&self, root: &Path, example: &str, options: TestOptions, kind: RunKind) -> TestOutcome {
        let label = root.join(example).display().to_string();
        info!(
            "===> Starting test for {}, since we're running tests in parallel, the test log will be buffered and output to stdout after the test was finished.",
            label
        );

        let run_log = (kind == RunKind::EndToEnd).then(|| RunLog::begin(label.clone()));
        let logger = run_log
            .as_ref()
            .map(RunLog::logger)
            .unwrap_or_else(RunLogger::discard);

        let TestOptions {
            terraform,
            skip_idempotent_check,
            skip_destroy,
            assertion,
        } = options;

        let (result, workspace) = match self.prepare(root, example, terraform, logger).await {
            Ok(workspace) => {
                let result = self
                    .apply_and_check(&workspace.options, skip_idempotent_check, assertion)
                    .await;
                (result, Some(workspace))
            }
            Err(e) => (Err(e), None),
        };

        if kind == RunKind::EndToEnd {
            self.teardown(root, example, &result).await;
        }
        if let Some(workspace) = workspace {
            if !skip_destroy {
                self.destroy(&workspace.options).await;
            }
        }
        drop(run_log);

        let outcome = TestOutcome::from_result(result);
        match &outcome {
            TestOutcome::Passed => info!("✅ {} passed", label),
            TestOutcome::Skipped(reason) => info!("⏭️  {} skipped: {}", label, reason),
            TestOutcome::Failed(reason) => error!("❌ {} failed: {}", label, reason),
        }
        outcome
    }

    async fn prepare(
        &self,
        root: &Path,
        example: &str,
        terraform: TerraformOptions,
        logger: RunLogger,
    ) -> Result<Workspace> {
        let scratch = copy_folder_to_temp(root, example, &self.tmp_root).await?;

        let mut options = terraform;
        options.terraform_dir = scratch.path.clone();
        options.logger = logger;
        options.retry = options
            .retry
            .setup_with(self.terraform.max_retries, self.terraform.time_between_retries);
        let options = options.materialize_vars()?;

        Ok(Workspace {
            options,
            _scratch: scratch,
        })
    }

    async fn apply_and_check(
        &self,
        options: &TerraformOptions,
        skip_idempotent_check: bool,
        assertion: Option<Assertion>,
    ) -> Result<()> {
        let engine = self.engine.as_ref();
        Terraform::new(engine, options).init_and_apply().await?;

        if !skip_idempotent_check {
            check_idempotent(engine, options).await?;
        }

        if let Some(assertion) = assertion {
            let mut quiet = options.clone();
            quiet.logger = RunLogger::discard();
            let outputs = Terraform::new(engine, &quiet).output_all().await?;
            assertion(&outputs).map_err(|e| HelperError::Assertion(format!("{:#}", e)))?;
        }
        Ok(())
    }

    async fn teardown(&self, root: &Path, example: &str, result: &Result<()>) {
        let mut snapshot = match result {
            Ok(()) => VersionSnapshot::success(root, example),
            Err(e) => VersionSnapshot::failed(root, example, e.to_string()),
        };
        if let Err(e) = snapshot.save(self.engine.as_ref(), &self.tmp_root).await {
            warn!("Failed to record version snapshot for {}: {}", example, e);
        }
    }

    /// Best effort; skipped when nothing was ever applied
    async fn destroy(&self, options: &TerraformOptions) {
        let dir = &options.terraform_dir;
        if !dir.is_dir() || !dir.join("terraform.tfstate").exists() {
            info!("Skipping destroy: no state in {}", dir.display());
            return;
        }

        let mut options = options.clone();
        options.retry = self.destroy_retry.clone();
        let tf = Terraform::new(self.engine.as_ref(), &options);

        if let Err(e) = tf.destroy(false).await {
            warn!("Destroy without refresh failed, retrying with refresh: {}", e);
            if let Err(e) = tf.destroy(true).await {
                error!("🧹 Destroy of {} failed: {}", dir.display(), e);
            }
        }
    }

    /// Apply the latest release of the current major version, then point
    /// its example at the local module and require a clean plan.
    pub async fn module_upgrade_test(
        &self,
        owner: &str,
        repo: &str,
        module_folder: &str,
        current_module_path: &Path,
        terraform: TerraformOptions,
        current_major_version: u64,
    ) -> TestOutcome {
        let label = format!("{}/{}/{}", owner, repo, module_folder);
        info!("===> Starting upgrade test for {}", label);

        let run_log = RunLog::begin(label.clone());
        let mut options = terraform;
        options.logger = run_log.logger();
        options.retry = options
            .retry
            .setup_with(self.terraform.max_retries, self.terraform.time_between_retries)
            .with_default_retryable_errors();

        let result = self
            .module_upgrade(owner, repo, module_folder, current_module_path, options, current_major_version)
            .await;
        drop(run_log);

        let outcome = TestOutcome::from_result(result);
        match &outcome {
            TestOutcome::Passed => info!("✅ upgrade test of {} passed", label),
            TestOutcome::Skipped(reason) => info!("⏭️  upgrade test of {} skipped: {}", label, reason),
            TestOutcome::Failed(reason) => error!("❌ upgrade test of {} failed: {}", label, reason),
        }
        outcome
    }

    async fn module_upgrade(
        &self,
        owner: &str,
        repo: &str,
        module_folder: &str,
        current_module_path: &Path,
        options: TerraformOptions,
        current_major_version: u64,
    ) -> Result<()> {
        if current_major_version == 0 {
            return Err(skip_v0_error());
        }

        let tag = latest_tag(self.releases.as_ref(), owner, repo, current_major_version).await?;
        let tree = self.releases.fetch(owner, repo, Some(&tag)).await?;
        if !tree.join(module_folder).is_dir() {
            return Err(cannot_test_error());
        }

        let scratch = copy_folder_to_temp(&tree, module_folder, &self.tmp_root).await?;
        let mut options = options;
        options.terraform_dir = scratch.path.clone();
        let options = options.materialize_vars()?;

        let result = self.apply_redirect_and_check(&options, current_module_path).await;
        self.destroy(&options).await;
        result
    }

    async fn apply_redirect_and_check(&self, options: &TerraformOptions, current_module_path: &Path) -> Result<()> {
        let engine = self.engine.as_ref();
        Terraform::new(engine, options).init_and_apply().await?;

        let new_source = current_module_path.to_string_lossy().replace('\\', "/");
        let dir = options.terraform_dir.clone();
        let target = new_source.clone();
        let redirected = tokio::task::spawn_blocking(move || rewrite_module_sources(&dir, &target))
            .await
            .map_err(|e| HelperError::Internal(format!("task join error: {}", e)))??;
        info!("🔀 Redirected {} module reference(s) to {}", redirected, new_source);

        check_idempotent(engine, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::testing::{failure, FakeEngine};
    use crate::pipeline::engine::{CommandOutput, PLAN_EXIT_CHANGES};
    use crate::pipeline::record::RECORD_FILE_NAME;
    use crate::release::testing::StaticSource;
    use std::fs;
    use std::time::Duration;

    const CHANGED_PLAN: &str =
        r#"{"resource_changes": [{"address": "azurerm_resource_group.rg", "change": {"actions": ["update"]}}]}"#;

    fn module_root() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let p = root.path();
        fs::write(p.join("variables.tf"), "variable \"location\" {\n  type = string\n}\n").unwrap();
        fs::create_dir_all(p.join("examples/default")).unwrap();
        fs::write(
            p.join("examples/default/main.tf"),
            "module \"this\" {\n  source   = \"../..\"\n  location = \"eastus\"\n}\n",
        )
        .unwrap();
        root
    }

    fn runner(engine: Arc<FakeEngine>, releases: StaticSource, tmp: &Path) -> TestRunner {
        let mut settings = Settings::default();
        settings.run.tmp_root = tmp.to_path_buf();
        settings.terraform.time_between_retries = Duration::ZERO;
        TestRunner::new(engine, Arc::new(releases), &settings)
            .with_destroy_retry(RetryPolicy::destroy().with_interval(Duration::ZERO))
    }

    fn no_releases() -> StaticSource {
        StaticSource { tags: vec![], tree: None }
    }

    fn record(root: &Path) -> String {
        fs::read_to_string(root.join("examples/default").join(RECORD_FILE_NAME)).unwrap()
    }

    #[tokio::test]
    async fn test_e2e_run_passes_and_records_snapshot() {
        let root = module_root();
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let runner = runner(engine.clone(), no_releases(), tmp.path());

        let outcome = runner
            .run_e2e_test(root.path(), "examples/default", TerraformOptions::default(), None)
            .await;

        assert_eq!(outcome, TestOutcome::Passed);
        assert_eq!(engine.commands(), vec!["init", "apply", "init", "plan", "init", "version"]);
        assert!(record(root.path()).contains("Success: true"));
        assert!(root.path().join("TestRecord/default").join(RECORD_FILE_NAME).is_file());
    }

    #[tokio::test]
    async fn test_apply_failure_still_records_snapshot() {
        let root = module_root();
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new().respond("apply", failure(1, "Error: quota exceeded")));
        let runner = runner(engine.clone(), no_releases(), tmp.path());

        let outcome = runner
            .run_e2e_test(root.path(), "examples/default", TerraformOptions::default(), None)
            .await;

        assert!(outcome.is_failed());
        assert!(outcome.to_string().contains("quota exceeded"));
        let record = record(root.path());
        assert!(record.contains("Success: false"));
        assert!(record.contains("quota exceeded"));
        assert!(engine.calls_of("plan").is_empty());
    }

    #[tokio::test]
    async fn test_non_idempotent_plan_fails_with_plan_text() {
        let root = module_root();
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(
            FakeEngine::new()
                .respond("plan", failure(PLAN_EXIT_CHANGES, ""))
                .respond("show", CommandOutput::success(CHANGED_PLAN))
                .respond("show", CommandOutput::success("~ azurerm_resource_group.rg will be updated in-place")),
        );
        let runner = runner(engine, no_releases(), tmp.path());

        let outcome = runner
            .run_e2e_test(root.path(), "examples/default", TerraformOptions::default(), None)
            .await;

        match outcome {
            TestOutcome::Failed(reason) => {
                assert!(reason.starts_with("terraform configuration not idempotent:"));
                assert!(reason.contains("will be updated in-place"));
            }
            other => panic!("unexpected outcome: {other}"),
        }
    }

    #[tokio::test]
    async fn test_assertion_receives_output_values() {
        let root = module_root();
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new().respond(
            "output",
            CommandOutput::success(r#"{"resource_group_name": {"sensitive": false, "value": "rg-e2e"}}"#),
        ));
        let runner = runner(engine, no_releases(), tmp.path());

        let options = TestOptions::new(TerraformOptions::default()).with_assertion(|outputs| {
            anyhow::ensure!(outputs["resource_group_name"] == "rg-e2e", "unexpected name");
            Ok(())
        });
        let outcome = runner
            .run_e2e_test_with_options(root.path(), "examples/default", options)
            .await;
        assert_eq!(outcome, TestOutcome::Passed);

        let failing = TestOptions::new(TerraformOptions::default())
            .with_assertion(|_| Err(anyhow::anyhow!("resource group missing tags")));
        let outcome = runner
            .run_e2e_test_with_options(root.path(), "examples/default", failing)
            .await;
        assert_eq!(
            outcome,
            TestOutcome::Failed("assertion failed: resource group missing tags".to_string())
        );
    }

    #[tokio::test]
    async fn test_unit_run_skips_snapshot_idempotency_and_destroy() {
        let root = module_root();
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let runner = runner(engine.clone(), no_releases(), tmp.path());

        let outcome = runner
            .run_unit_test(root.path(), "examples/default", TerraformOptions::default(), None)
            .await;

        assert_eq!(outcome, TestOutcome::Passed);
        assert_eq!(engine.commands(), vec!["init", "apply"]);
        assert!(!root.path().join("examples/default").join(RECORD_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_missing_example_fails_without_engine_calls() {
        let root = module_root();
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let runner = runner(engine.clone(), no_releases(), tmp.path());

        let outcome = runner
            .run_unit_test(root.path(), "examples/absent", TerraformOptions::default(), None)
            .await;
        assert!(outcome.is_failed());
        assert!(engine.commands().is_empty());
    }

    #[tokio::test]
    async fn test_vars_are_passed_as_var_file() {
        let root = module_root();
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let runner = runner(engine.clone(), no_releases(), tmp.path());

        let options = TerraformOptions::default().with_var("managed_identity_principal_id", "msi-id");
        runner
            .run_unit_test(root.path(), "examples/default", options, None)
            .await;

        let apply = &engine.calls_of("apply")[0];
        assert!(apply.iter().any(|a| a.starts_with("-var-file=") && a.ends_with(".tfvars.json")));
    }

    #[tokio::test]
    async fn test_upgrade_on_major_zero_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let runner = runner(engine.clone(), no_releases(), tmp.path());

        let outcome = runner
            .module_upgrade_test("Azure", "mod", "examples/default", Path::new("/work"), TerraformOptions::default(), 0)
            .await;
        assert_eq!(
            outcome,
            TestOutcome::Skipped("v0 is meant to be unstable, skip upgrade test".to_string())
        );
        assert!(engine.commands().is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_without_release_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let releases = StaticSource {
            tags: vec!["v1.0.0".to_string()],
            tree: None,
        };
        let runner = runner(engine, releases, tmp.path());

        let outcome = runner
            .module_upgrade_test("Azure", "mod", "examples/default", Path::new("/work"), TerraformOptions::default(), 2)
            .await;
        assert!(outcome.is_skipped());
    }

    #[tokio::test]
    async fn test_upgrade_with_missing_folder_is_skipped() {
        let released = module_root();
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let releases = StaticSource {
            tags: vec!["v1.3.0".to_string()],
            tree: Some(released.path().to_path_buf()),
        };
        let runner = runner(engine, releases, tmp.path());

        let outcome = runner
            .module_upgrade_test("Azure", "mod", "examples/renamed", Path::new("/work"), TerraformOptions::default(), 1)
            .await;
        assert!(outcome.is_skipped());
    }

    #[tokio::test]
    async fn test_upgrade_applies_release_then_plans_against_local_module() {
        let released = module_root();
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let releases = StaticSource {
            tags: vec!["v1.2.0".to_string(), "v1.3.0".to_string(), "v2.0.0-rc1".to_string()],
            tree: Some(released.path().to_path_buf()),
        };
        let runner = runner(engine.clone(), releases, tmp.path());

        let outcome = runner
            .module_upgrade_test("Azure", "mod", "examples/default", Path::new("/work/module"), TerraformOptions::default(), 1)
            .await;

        assert_eq!(outcome, TestOutcome::Passed);
        assert_eq!(engine.commands(), vec!["init", "apply", "init", "plan"]);
        let untouched = fs::read_to_string(released.path().join("examples/default/main.tf")).unwrap();
        assert!(untouched.contains("\"../..\""));
    }

    #[tokio::test]
    async fn test_destroy_runs_when_state_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("terraform.tfstate"), "{}").unwrap();
        let engine = Arc::new(
            FakeEngine::new()
                .respond("destroy", failure(1, "Error: refresh failed"))
                .respond("destroy", failure(1, "Error: refresh failed"))
                .respond("destroy", CommandOutput::success("Destroy complete!")),
        );
        let runner = runner(engine.clone(), no_releases(), tmp.path())
            .with_destroy_retry(RetryPolicy::none());

        runner.destroy(&TerraformOptions::new(dir.path())).await;

        let destroys = engine.calls_of("destroy");
        assert_eq!(destroys.len(), 2);
        assert!(destroys[0].contains(&"-refresh=false".to_string()));
        assert!(!destroys[1].contains(&"-refresh=false".to_string()));
    }

    #[tokio::test]
    async fn test_destroy_is_skipped_without_state() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let runner = runner(engine.clone(), no_releases(), tmp.path());

        runner.destroy(&TerraformOptions::new(dir.path())).await;
        assert!(engine.commands().is_empty());
    }
}
