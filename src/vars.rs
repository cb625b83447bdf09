//! Variable files

use crate::error::Result;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Write `vars` to `terraform<hex>.tfvars.json` in the system temp dir and
/// return its absolute path.
pub fn vars_to_file(vars: &Map<String, Value>) -> Result<PathBuf> {
    vars_to_file_in(&std::env::temp_dir(), vars)
}

pub fn vars_to_file_in(dir: &Path, vars: &Map<String, Value>) -> Result<PathBuf> {
    let name = format!("terraform{}.tfvars.json", &Uuid::new_v4().simple().to_string()[..16]);
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(vars)?)?;
    Ok(std::fs::canonicalize(&path)?)
}
