//! Interface records
//!
//! Every attribute is stored as the unparsed source text of its expression.
//! Comparison is purely textual, so a value-equivalent rewrite still shows up
//! as a change.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A declared input variable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_expr: Option<String>,
    pub description: Option<String>,
    pub default: Option<String>,
    pub sensitive: Option<String>,
    pub nullable: Option<String>,
}

/// A declared output value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDecl {
    pub name: String,
    pub description: Option<String>,
    pub sensitive: Option<String>,
    pub value: String,
}

/// Point-in-time capture of a module's variables and outputs.
///
/// Keyed by declaration name. Source positions are never stored, so
/// moving a block between files is not a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInterface {
    pub variables: BTreeMap<String, VariableDecl>,
    pub outputs: BTreeMap<String, OutputDecl>,
}

impl ModuleInterface {
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.outputs.is_empty()
    }

    /// SHA-256 over every declaration in name order
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        for v in self.variables.values() {
            hasher.update(format!(
                "variable:{}|{}|{}|{}|{}|{}\n",
                v.name,
                v.type_expr.as_deref().unwrap_or_default(),
                v.description.as_deref().unwrap_or_default(),
                v.default.as_deref().unwrap_or_default(),
                v.sensitive.as_deref().unwrap_or_default(),
                v.nullable.as_deref().unwrap_or_default(),
            ));
        }

        for o in self.outputs.values() {
            hasher.update(format!(
                "output:{}|{}|{}|{}\n",
                o.name,
                o.description.as_deref().unwrap_or_default(),
                o.sensitive.as_deref().unwrap_or_default(),
                o.value,
            ));
        }

        let result = hasher.finalize();
        format!("{:x}", result)
    }
}
