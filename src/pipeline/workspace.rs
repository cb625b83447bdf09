//! Scratch workspaces
//!
//! A run never provisions inside the source tree. The whole module root is
//! copied into a fresh temp directory so relative module references keep
//! working, and the run operates on the example folder inside that copy.

use crate::error::{HelperError, Result};
use crate::locks::COPY_LOCKS;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Disposable copy of a module root; deleted on drop
pub struct Scratch {
    dir: TempDir,
    /// The example folder inside the copy
    pub path: PathBuf,
}

impl Scratch {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Copy `root` into a new scratch dir under `tmp_root` and return the copy
/// of `root/example`. Copies of the same example are serialized.
pub async fn copy_folder_to_temp(root: &Path, example: &str, tmp_root: &Path) -> Result<Scratch> {
    let source = root.join(example);
    let _guard = COPY_LOCKS.lock(&source.to_string_lossy()).await;

    if !source.is_dir() {
        return Err(HelperError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("example folder {} does not exist", source.display()),
        )));
    }

    let root = root.to_path_buf();
    let example = example.to_string();
    let tmp_root = tmp_root.to_path_buf();
    tokio::task::spawn_blocking(move || copy_blocking(&root, &example, &tmp_root))
        .await
        .map_err(|e| HelperError::Internal(format!("task join error: {}", e)))?
}

fn copy_blocking(root: &Path, example: &str, tmp_root: &Path) -> Result<Scratch> {
    std::fs::create_dir_all(tmp_root)?;
    let dir = tempfile::Builder::new()
        .prefix("tfmod-")
        .tempdir_in(tmp_root)?;

    let mut copied = 0usize;
    for entry in WalkDir::new(root).into_iter().filter_entry(should_copy) {
        let entry = entry.map_err(|e| HelperError::Io(e.into()))?;
        let relative = match entry.path().strip_prefix(root) {
            Ok(r) if !r.as_os_str().is_empty() => r,
            _ => continue,
        };
        let target = dir.path().join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    debug!("Copied {} files from {} to {}", copied, root.display(), dir.path().display());
    let path = dir.path().join(example);
    Ok(Scratch { dir, path })
}

/// Skip hidden entries and local engine state. The walk root
/// itself is always kept, whatever its name.
fn should_copy(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if name == ".terraform-version" {
        return true;
    }
    !(name.starts_with('.') || name.starts_with("terraform.tfstate"))
}
