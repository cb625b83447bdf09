//! tfmod-testkit - Terraform module test helper CLI
//!
//! Subcommands:
//! - `compare`: breaking changes between two local module directories
//! - `detect`: breaking changes of the local module against a remote ref
//! - `latest-tag`: latest release within a major version
//! - `e2e`: apply an example, check idempotency, record versions, destroy
//! - `upgrade`: apply the previous release's example and plan it against the local module

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tfmod_testkit::compat::{breaking_changes_detect, compare_module_dirs};
use tfmod_testkit::config::{current_module_root_path, Settings};
use tfmod_testkit::pipeline::{read_retryable_errors, TerraformCli, TerraformOptions, TestOptions, TestOutcome, TestRunner};
use tfmod_testkit::release::{latest_tag, GithubSource};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "tfmod-testkit", version, about = "Terraform module test helper")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compare two module directories and list breaking changes
    Compare {
        /// Directory of the previous version
        old: PathBuf,
        /// Directory of the new version
        new: PathBuf,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare the local module against a remote ref
    Detect {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        /// Tag to compare against; default branch when omitted
        #[arg(long)]
        tag: Option<String>,
        #[arg(long, default_value = ".")]
        module_path: PathBuf,
    },
    /// Print the latest release tag within a major version
    LatestTag {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        /// Defaults to the major version derived from PREVIOUS_MAJOR_VERSION
        #[arg(long)]
        major: Option<u64>,
    },
    /// Run an end-to-end test of one example
    E2e {
        /// Module root; defaults to two levels above the working directory
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long, default_value = "examples/default")]
        example: String,
        #[arg(long)]
        skip_idempotent_check: bool,
        #[arg(long)]
        skip_destroy: bool,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run an upgrade test from the latest release of the current major version
    Upgrade {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        #[arg(long, default_value = "examples/default")]
        example: String,
        /// Local module the released example is redirected to
        #[arg(long)]
        module_path: Option<PathBuf>,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Module input as `name=value`; JSON values are decoded
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,
    /// JSON file of the form {"retryable_errors": ["<regex>", ...]}
    #[arg(long)]
    retryable_errors: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::load()?;

    match cli.command {
        Command::Compare { old, new, json } => {
            let report = compare_module_dirs(&old, &new)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.to_text());
            }
            Ok(exit_for_breaking(report.has_breaking_changes()))
        }
        Command::Detect {
            owner,
            repo,
            tag,
            module_path,
        } => {
            let source = GithubSource::new(settings.github.clone(), &settings.run.tmp_root);
            let breaking = breaking_changes_detect(&source, &module_path, &owner, &repo, tag.as_deref()).await?;
            if !breaking.is_empty() {
                println!("{}", breaking);
            }
            Ok(exit_for_breaking(!breaking.is_empty()))
        }
        Command::LatestTag { owner, repo, major } => {
            let source = GithubSource::new(settings.github.clone(), &settings.run.tmp_root);
            let major = major.unwrap_or(settings.run.current_major_version);
            match latest_tag(&source, &owner, &repo, major).await {
                Ok(tag) => {
                    println!("{}", tag);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) if e.is_skip() => {
                    info!("{}", e);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::E2e {
            root,
            example,
            skip_idempotent_check,
            skip_destroy,
            engine,
        } => {
            let root = match root {
                Some(root) => root,
                None => PathBuf::from(current_module_root_path()?),
            };
            let options = TestOptions {
                terraform: terraform_options(&settings, &engine)?,
                skip_idempotent_check,
                skip_destroy,
                assertion: None,
            };
            let outcome = runner(&settings)
                .run_e2e_test_with_options(&root, &example, options)
                .await;
            Ok(exit_for_outcome(&outcome))
        }
        Command::Upgrade {
            owner,
            repo,
            example,
            module_path,
            engine,
        } => {
            let module_path = match module_path {
                Some(path) => path,
                None => PathBuf::from(current_module_root_path()?),
            };
            let module_path = std::path::absolute(module_path)?;
            let outcome = runner(&settings)
                .module_upgrade_test(
                    &owner,
                    &repo,
                    &example,
                    &module_path,
                    terraform_options(&settings, &engine)?,
                    settings.run.current_major_version,
                )
                .await;
            Ok(exit_for_outcome(&outcome))
        }
    }
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tfmod_testkit=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if std::env::var("TFMOD_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init();
    }
}

fn runner(settings: &Settings) -> TestRunner {
    let engine = Arc::new(TerraformCli::new(settings.terraform.binary.clone()));
    let releases = Arc::new(GithubSource::new(settings.github.clone(), &settings.run.tmp_root));
    TestRunner::new(engine, releases, settings)
}

fn terraform_options(settings: &Settings, args: &EngineArgs) -> anyhow::Result<TerraformOptions> {
    let mut options = TerraformOptions::default();

    if let Some(msi_id) = &settings.run.managed_identity_principal_id {
        options = options.with_var("managed_identity_principal_id", msi_id.clone());
    }
    for raw in &args.vars {
        let (name, value) = raw
            .split_once('=')
            .with_context(|| format!("--var expects NAME=VALUE, got `{}`", raw))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        options = options.with_var(name, value);
    }

    if let Some(path) = &args.retryable_errors {
        let config = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        options.retry.retryable_errors = read_retryable_errors(&config)?;
    }
    Ok(options)
}

fn exit_for_breaking(breaking: bool) -> ExitCode {
    if breaking {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn exit_for_outcome(outcome: &TestOutcome) -> ExitCode {
    match outcome {
        TestOutcome::Passed | TestOutcome::Skipped(_) => ExitCode::SUCCESS,
        TestOutcome::Failed(reason) => {
            error!("{}", reason);
            ExitCode::from(1)
        }
    }
}
