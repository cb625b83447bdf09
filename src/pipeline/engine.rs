//! Provisioning engine
//!
//! `ProvisioningEngine` is the seam to the external infrastructure CLI. The
//! `Terraform` wrapper formats arguments for each step, streams output into
//! the run logger and applies the retry policy.

use crate::error::{HelperError, Result};
use crate::logging::RunLogger;
use crate::pipeline::retry::RetryPolicy;
use crate::vars::vars_to_file;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// `terraform plan -detailed-exitcode`: succeeded, diff present
pub const PLAN_EXIT_CHANGES: i32 = 2;

/// Output name -> value, from `terraform output -json`
pub type TerraformOutput = Map<String, Value>;

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Runs one engine command in a working directory
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    async fn execute(&self, dir: &Path, args: &[String]) -> Result<CommandOutput>;
}

/// The `terraform` binary on PATH (or configured path)
pub struct TerraformCli {
    binary: String,
}

impl TerraformCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

#[async_trait]
impl ProvisioningEngine for TerraformCli {
    async fn execute(&self, dir: &Path, args: &[String]) -> Result<CommandOutput> {
        debug!("Running {} {} in {}", self.binary, args.join(" "), dir.display());

        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .output()
            .await
            .map_err(|e| HelperError::Provisioning {
                command: format!("{} {}", self.binary, args.join(" ")),
                exit_code: -1,
                output: e.to_string(),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Per-run engine options
#[derive(Clone)]
pub struct TerraformOptions {
    pub terraform_dir: PathBuf,
    /// Input variables; written to a var file before the first command
    pub vars: Map<String, Value>,
    pub var_files: Vec<PathBuf>,
    pub upgrade: bool,
    pub no_color: bool,
    pub retry: RetryPolicy,
    pub logger: RunLogger,
}

impl Default for TerraformOptions {
    fn default() -> Self {
        Self {
            terraform_dir: PathBuf::from("."),
            vars: Map::new(),
            var_files: Vec::new(),
            upgrade: false,
            no_color: true,
            retry: RetryPolicy::none(),
            logger: RunLogger::discard(),
        }
    }
}

impl TerraformOptions {
    pub fn new(terraform_dir: impl Into<PathBuf>) -> Self {
        Self {
            terraform_dir: terraform_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Move `vars` into a var file so they reach every command
    pub fn materialize_vars(mut self) -> Result<Self> {
        if !self.vars.is_empty() {
            let path = vars_to_file(&self.vars)?;
            self.vars.clear();
            self.var_files.push(path);
        }
        Ok(self)
    }

    fn var_file_args(&self) -> impl Iterator<Item = String> + '_ {
        self.var_files
            .iter()
            .map(|f| format!("-var-file={}", f.display()))
    }

    fn color_arg(&self) -> Option<String> {
        self.no_color.then(|| "-no-color".to_string())
    }
}

/// Engine commands bound to one set of options
pub struct Terraform<'a> {
    engine: &'a dyn ProvisioningEngine,
    options: &'a TerraformOptions,
}

impl<'a> Terraform<'a> {
    pub fn new(engine: &'a dyn ProvisioningEngine, options: &'a TerraformOptions) -> Self {
        Self { engine, options }
    }

    pub async fn init(&self) -> Result<String> {
        let mut args = vec![
            "init".to_string(),
            "-input=false".to_string(),
            format!("-upgrade={}", self.options.upgrade),
        ];
        args.extend(self.options.color_arg());
        self.run(args, &[0]).await.map(|o| o.stdout)
    }

    pub async fn apply(&self) -> Result<String> {
        let mut args = vec![
            "apply".to_string(),
            "-input=false".to_string(),
            "-auto-approve".to_string(),
        ];
        args.extend(self.options.color_arg());
        args.extend(self.options.var_file_args());
        self.run(args, &[0]).await.map(|o| o.stdout)
    }

    pub async fn init_and_apply(&self) -> Result<String> {
        self.init().await?;
        self.apply().await
    }

    /// Plan into `plan_file`; returns the detailed exit code (0 or 2)
    pub async fn plan(&self, plan_file: &Path) -> Result<i32> {
        let mut args = vec![
            "plan".to_string(),
            "-input=false".to_string(),
            "-lock=false".to_string(),
            "-detailed-exitcode".to_string(),
            format!("-out={}", plan_file.display()),
        ];
        args.extend(self.options.color_arg());
        args.extend(self.options.var_file_args());
        self.run(args, &[0, PLAN_EXIT_CHANGES])
            .await
            .map(|o| o.exit_code)
    }

    pub async fn show_plan_json(&self, plan_file: &Path) -> Result<String> {
        let args = vec![
            "show".to_string(),
            "-json".to_string(),
            plan_file.display().to_string(),
        ];
        self.run(args, &[0]).await.map(|o| o.stdout)
    }

    pub async fn show_plan_text(&self, plan_file: &Path) -> Result<String> {
        let args = vec![
            "show".to_string(),
            "-no-color".to_string(),
            plan_file.display().to_string(),
        ];
        self.run(args, &[0]).await.map(|o| o.stdout)
    }

    pub async fn output_all(&self) -> Result<TerraformOutput> {
        let args = vec!["output".to_string(), "-json".to_string()];
        let stdout = self.run(args, &[0]).await?.stdout;
        if stdout.trim().is_empty() {
            return Ok(TerraformOutput::new());
        }
        let raw: Map<String, Value> = serde_json::from_str(&stdout)?;
        Ok(raw
            .into_iter()
            .map(|(name, mut entry)| {
                let value = entry.get_mut("value").map(Value::take).unwrap_or(Value::Null);
                (name, value)
            })
            .collect())
    }

    pub async fn destroy(&self, refresh: bool) -> Result<String> {
        let mut args = vec![
            "destroy".to_string(),
            "-auto-approve".to_string(),
            "-input=false".to_string(),
        ];
        if !refresh {
            args.push("-refresh=false".to_string());
        }
        args.extend(self.options.color_arg());
        args.extend(self.options.var_file_args());
        self.run(args, &[0]).await.map(|o| o.stdout)
    }

    pub async fn version(&self) -> Result<String> {
        let args = vec!["version".to_string()];
        self.run(args, &[0]).await.map(|o| o.stdout)
    }

    async fn run(&self, args: Vec<String>, accepted: &[i32]) -> Result<CommandOutput> {
        let retry = &self.options.retry;
        let matcher = retry.compile()?;
        let dir = &self.options.terraform_dir;

        let mut attempt = 0;
        loop {
            let output = self.engine.execute(dir, &args).await?;
            self.options.logger.log(&output.combined());

            if accepted.contains(&output.exit_code) {
                return Ok(output);
            }

            let combined = output.combined();
            match matcher.matching_reason(&combined) {
                Some(reason) if attempt < retry.max_retries => {
                    attempt += 1;
                    warn!(
                        "terraform {} failed with a retryable error ({}); retry {}/{} in {:?}",
                        args[0], reason, attempt, retry.max_retries, retry.time_between_retries
                    );
                    tokio::time::sleep(retry.time_between_retries).await;
                }
                _ => {
                    return Err(HelperError::Provisioning {
                        command: args.join(" "),
                        exit_code: output.exit_code,
                        output: combined,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted engine: pops a canned response per command name and records calls
    #[derive(Default)]
    pub struct FakeEngine {
        responses: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
        pub calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
    }

    impl FakeEngine {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a response for `command`; the last one repeats once the queue drains
        pub fn respond(self, command: &str, output: CommandOutput) -> Self {
            {
                let mut responses = self.responses.lock().unwrap();
                match responses.iter_mut().find(|(c, _)| c == command) {
                    Some((_, queue)) => queue.push_back(output),
                    None => responses.push((command.to_string(), VecDeque::from([output]))),
                }
            }
            self
        }

        pub fn commands(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, args)| args[0].clone())
                .collect()
        }

        pub fn calls_of(&self, command: &str) -> Vec<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, args)| args[0] == command)
                .map(|(_, args)| args.clone())
                .collect()
        }
    }

    pub fn failure(exit_code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[async_trait]
    impl ProvisioningEngine for FakeEngine {
        async fn execute(&self, dir: &Path, args: &[String]) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((dir.to_path_buf(), args.to_vec()));

            let mut responses = self.responses.lock().unwrap();
            let output = match responses.iter_mut().find(|(c, _)| *c == args[0]) {
                Some((_, queue)) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
                Some((_, queue)) => queue.front().cloned().unwrap_or_default(),
                None => CommandOutput::success(""),
            };
            Ok(output)
        }
    }
}
