//! Version records
//!
//! Every end-to-end run leaves a `VersionSnapshot` behind: when it ran,
//! whether it passed, which engine and provider versions it used and the
//! error if any. Snapshots are appended to `TestRecord.md.tmp` next to the
//! example and mirrored under `{module-root}/TestRecord/` for CI artifact
//! upload.

use crate::error::{HelperError, Result};
use crate::locks::RECORD_LOCKS;
use crate::pipeline::engine::{ProvisioningEngine, Terraform, TerraformOptions};
use crate::pipeline::workspace::copy_folder_to_temp;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub const RECORD_FILE_NAME: &str = "TestRecord.md.tmp";
pub const ARTIFACT_DIR_NAME: &str = "TestRecord";

/// RFC 822 timestamp layout
const RFC822: &str = "%d %b %y %H:%M %Z";

#[derive(Debug, Clone, Serialize)]
pub struct VersionSnapshot {
    pub module_root_folder: PathBuf,
    pub sub_module_relative_folder: String,
    pub time: DateTime<Utc>,
    pub success: bool,
    pub versions: String,
    pub error_msg: String,
}

impl VersionSnapshot {
    pub fn success(root: impl Into<PathBuf>, example: impl Into<String>) -> Self {
        Self {
            module_root_folder: root.into(),
            sub_module_relative_folder: example.into(),
            time: Utc::now(),
            success: true,
            versions: String::new(),
            error_msg: String::new(),
        }
    }

    pub fn failed(root: impl Into<PathBuf>, example: impl Into<String>, error_msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error_msg: error_msg.into(),
            ..Self::success(root, example)
        }
    }

    pub fn to_markdown(&self) -> String {
        format!(
            "## {}\n\nSuccess: {}\n\n### Versions\n\n{}\n\n### Error\n\n{}\n\n---\n\n",
            self.time.format(RFC822),
            self.success,
            self.versions,
            self.error_msg
        )
    }

    /// `{root}/{example}/TestRecord.md.tmp`
    pub fn record_path(&self) -> Result<PathBuf> {
        let path = self
            .module_root_folder
            .join(&self.sub_module_relative_folder)
            .join(RECORD_FILE_NAME);
        Ok(std::path::absolute(path)?)
    }

    /// `{root}/TestRecord/{example-dir-name}/TestRecord.md.tmp`
    pub fn artifact_path(&self) -> PathBuf {
        let example_dir = Path::new(&self.sub_module_relative_folder)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        self.module_root_folder
            .join(ARTIFACT_DIR_NAME)
            .join(example_dir)
            .join(RECORD_FILE_NAME)
    }

    /// Capture versions, append to the record file and mirror it
    pub async fn save(&mut self, engine: &dyn ProvisioningEngine, tmp_root: &Path) -> Result<()> {
        let path = self.record_path()?;
        let _guard = RECORD_LOCKS.lock(&path.to_string_lossy()).await;

        self.load(engine, tmp_root).await;
        self.append_to(&path).await?;
        self.copy_for_upload_artifact(&path).await?;

        info!(
            "📝 Recorded {} run of {} in {}",
            if self.success { "successful" } else { "failed" },
            self.sub_module_relative_folder,
            path.display()
        );
        Ok(())
    }

    /// Run `init` and `version` in a throwaway copy; a failure marks the
    /// snapshot failed with the engine output as its error.
    async fn load(&mut self, engine: &dyn ProvisioningEngine, tmp_root: &Path) {
        let scratch = match copy_folder_to_temp(&self.module_root_folder, &self.sub_module_relative_folder, tmp_root).await {
            Ok(scratch) => scratch,
            Err(e) => {
                self.success = false;
                self.error_msg = e.to_string();
                return;
            }
        };

        let options = TerraformOptions::new(&scratch.path);
        let tf = Terraform::new(engine, &options);
        let versions = match tf.init().await {
            Ok(_) => tf.version().await,
            Err(e) => Err(e),
        };

        match versions {
            Ok(versions) => self.versions = versions,
            Err(e) => {
                self.success = false;
                self.error_msg = match e {
                    HelperError::Provisioning { output, .. } => output,
                    other => other.to_string(),
                };
            }
        }
    }

    async fn append_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| HelperError::Teardown(format!("cannot open {}: {}", path.display(), e)))?;
        file.write_all(self.to_markdown().as_bytes())
            .await
            .map_err(|e| HelperError::Teardown(format!("cannot write {}: {}", path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| HelperError::Teardown(format!("cannot write {}: {}", path.display(), e)))
    }

    async fn copy_for_upload_artifact(&self, local: &Path) -> Result<()> {
        let target = self.artifact_path();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                HelperError::Teardown(format!("failed to create destination folder {}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::copy(local, &target)
            .await
            .map_err(|e| HelperError::Teardown(format!("failed to copy file to {}: {}", target.display(), e)))?;
        debug!("Mirrored record to {}", target.display());
        Ok(())
    }
}
