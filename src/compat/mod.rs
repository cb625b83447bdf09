//! Module Compatibility Check
//!
//! Answers "does this version of the module break its consumers?":
//! - Interface diff (what changed between two module snapshots)
//! - Breaking-change rules (which of those changes consumers will feel)
//! - Remote comparison (diff the working tree against a released tag)

pub mod diff;
pub mod rules;

pub use diff::{Attribute, Category, ChangeRecord, ChangeType, DiffEngine, InterfaceDiff};
pub use rules::{BreakingChange, BreakingChangeClassifier, BreakingRule};

use crate::error::Result;
use crate::interface::{InterfaceExtractor, ModuleInterface};
use crate::release::ReleaseSource;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Full comparison result: every change plus the breaking subset
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReport {
    pub old_fingerprint: String,
    pub new_fingerprint: String,
    pub changes: InterfaceDiff,
    pub breaking: Vec<BreakingChange>,
}

impl CompatibilityReport {
    pub fn has_breaking_changes(&self) -> bool {
        !self.breaking.is_empty()
    }

    /// One rendered breaking change per line; empty when nothing breaks
    pub fn breaking_text(&self) -> String {
        self.breaking
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every change, breaking ones marked with `!`
    pub fn to_text(&self) -> String {
        let mut lines = vec![format!(
            "{} change(s), {} breaking",
            self.changes.len(),
            self.breaking.len()
        )];
        for change in self.changes.variables.iter().chain(self.changes.outputs.iter()) {
            let rule = self.breaking.iter().find(|b| &b.change == change).map(|b| b.rule);
            match rule {
                Some(rule) => lines.push(format!("! {} ({})", change, rule.description())),
                None => lines.push(format!("  {}", change)),
            }
        }
        lines.join("\n")
    }
}

/// Diff and classify two already-extracted interfaces
pub fn compare_interfaces(old: &ModuleInterface, new: &ModuleInterface) -> Result<CompatibilityReport> {
    let changes = DiffEngine::diff(old, new)?;
    let breaking = BreakingChangeClassifier::classify(&changes);

    debug!(
        "Interface diff: {} variable change(s), {} output change(s), {} breaking",
        changes.variables.len(),
        changes.outputs.len(),
        breaking.len()
    );

    Ok(CompatibilityReport {
        old_fingerprint: old.fingerprint(),
        new_fingerprint: new.fingerprint(),
        changes,
        breaking,
    })
}

/// Extract both module directories and compare them
pub fn compare_module_dirs(old_dir: &Path, new_dir: &Path) -> Result<CompatibilityReport> {
    let old = InterfaceExtractor::extract(old_dir)?;
    let new = InterfaceExtractor::extract(new_dir)?;
    compare_interfaces(&old, &new)
}

/// Breaking changes between two module directories, one per line
pub fn compare_two_modules(old_dir: &Path, new_dir: &Path) -> Result<String> {
    Ok(compare_module_dirs(old_dir, new_dir)?.breaking_text())
}

/// Compare the local module against a remote snapshot (default branch when
/// `tag` is `None`). The fetched tree is removed afterwards.
pub async fn breaking_changes_detect(
    source: &dyn ReleaseSource,
    current_module_path: &Path,
    owner: &str,
    repo: &str,
    tag: Option<&str>,
) -> Result<String> {
    let fetched = source.fetch(owner, repo, tag).await?;
    info!(
        "🔍 Comparing {} against {}/{}@{}",
        current_module_path.display(),
        owner,
        repo,
        tag.unwrap_or("default branch")
    );

    let result = compare_two_modules(&fetched, current_module_path);

    if let Err(e) = tokio::fs::remove_dir_all(&fetched).await {
        debug!("Could not remove {}: {}", fetched.display(), e);
    }
    result
}
