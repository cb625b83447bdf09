//! Interface Extractor
//!
//! Reads a module directory and captures its `variable` and `output` blocks.
//! Only the module's own `.tf` files are considered: override files, hidden
//! files and editor backups are skipped, and JSON-encoded configuration is
//! ignored. Other block kinds are read past without being decoded.

use crate::error::{parse_error, Result};
use crate::interface::model::{ModuleInterface, OutputDecl, VariableDecl};
use hcl_edit::expr::Expression;
use hcl_edit::parser::parse_body;
use hcl_edit::structure::{Block, Body, Structure};
use hcl_edit::Span;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const PRIMARY_EXTENSION: &str = ".tf";
const JSON_EXTENSION: &str = ".tf.json";

/// Captures the interface of a module directory
pub struct InterfaceExtractor;

impl InterfaceExtractor {
    /// Parse every primary source file of `dir` into a `ModuleInterface`
    pub fn extract(dir: &Path) -> Result<ModuleInterface> {
        let files = Self::source_files(dir)?;
        let mut interface = ModuleInterface::default();

        for file in &files {
            let content = std::fs::read_to_string(file)
                .map_err(|e| parse_error(file, format!("cannot read file: {}", e)))?;
            Self::extract_file(file, &content, &mut interface)?;
        }

        debug!(
            "Extracted {} variables and {} outputs from {} files in {}",
            interface.variables.len(),
            interface.outputs.len(),
            files.len(),
            dir.display()
        );

        Ok(interface)
    }

    /// Candidate source files, sorted by name for a stable read order
    pub fn source_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| parse_error(dir, format!("failed to read module directory: {}", e)))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| parse_error(dir, e.to_string()))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if is_primary_file(&name) && !is_override(&name) && !is_ignored_file(&name) {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }

    fn extract_file(path: &Path, source: &str, interface: &mut ModuleInterface) -> Result<()> {
        let body = parse_body(source).map_err(|e| parse_error(path, e.to_string()))?;

        for block in top_level_blocks(&body) {
            match block.ident.as_str() {
                "variable" => {
                    let name = single_label(path, block)?;
                    let variable = parse_variable(name.clone(), block, source);
                    if interface.variables.insert(name.clone(), variable).is_some() {
                        return Err(parse_error(
                            path,
                            format!("duplicate variable declaration \"{}\"", name),
                        ));
                    }
                }
                "output" => {
                    let name = single_label(path, block)?;
                    let output = parse_output(path, name.clone(), block, source)?;
                    if interface.outputs.insert(name.clone(), output).is_some() {
                        return Err(parse_error(
                            path,
                            format!("duplicate output declaration \"{}\"", name),
                        ));
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn top_level_blocks(body: &Body) -> impl Iterator<Item = &Block> {
    body.iter().filter_map(|structure| match structure {
        Structure::Block(block) => Some(block),
        Structure::Attribute(_) => None,
    })
}

fn single_label(path: &Path, block: &Block) -> Result<String> {
    match block.labels.as_slice() {
        [label] => Ok(label.as_str().to_string()),
        labels => Err(parse_error(
            path,
            format!(
                "{} block expects exactly one label (name), found {}",
                block.ident.as_str(),
                labels.len()
            ),
        )),
    }
}

/// Attribute name -> unparsed expression text, for the attributes of interest
fn attribute_texts(block: &Block, wanted: &[&str], source: &str) -> BTreeMap<String, String> {
    block
        .body
        .iter()
        .filter_map(|structure| match structure {
            Structure::Attribute(attr) => Some(attr),
            Structure::Block(_) => None,
        })
        .filter(|attr| wanted.contains(&attr.key.as_str()))
        .map(|attr| (attr.key.as_str().to_string(), expression_text(&attr.value, source)))
        .collect()
}

fn parse_variable(name: String, block: &Block, source: &str) -> VariableDecl {
    let mut attributes = attribute_texts(
        block,
        &["description", "sensitive", "default", "nullable", "type"],
        source,
    );

    VariableDecl {
        name,
        type_expr: attributes.remove("type"),
        description: attributes.remove("description"),
        default: attributes.remove("default"),
        sensitive: attributes.remove("sensitive"),
        nullable: attributes.remove("nullable"),
    }
}

fn parse_output(path: &Path, name: String, block: &Block, source: &str) -> Result<OutputDecl> {
    let mut attributes = attribute_texts(block, &["value", "description", "sensitive"], source);

    let value = attributes.remove("value").ok_or_else(|| {
        parse_error(
            path,
            format!("output \"{}\" is missing the required \"value\" attribute", name),
        )
    })?;

    Ok(OutputDecl {
        name,
        description: attributes.remove("description"),
        sensitive: attributes.remove("sensitive"),
        value,
    })
}

/// The exact source slice of an expression, falling back to its rendering
fn expression_text(expr: &Expression, source: &str) -> String {
    expr.span()
        .and_then(|span| source.get(span))
        .map(|text| text.trim().to_string())
        .unwrap_or_else(|| expr.to_string().trim().to_string())
}

fn is_primary_file(name: &str) -> bool {
    name.ends_with(PRIMARY_EXTENSION)
}

fn file_stem(name: &str) -> &str {
    name.strip_suffix(JSON_EXTENSION)
        .or_else(|| name.strip_suffix(PRIMARY_EXTENSION))
        .unwrap_or(name)
}

/// `override.tf`, `foo_override.tf` and their JSON counterparts
pub fn is_override(name: &str) -> bool {
    let stem = file_stem(name);
    stem == "override" || stem.ends_with("_override")
}

/// Hidden files plus vim (`foo~`) and emacs (`#foo#`) backups
pub fn is_ignored_file(name: &str) -> bool {
    name.starts_with('.') || name.ends_with('~') || (name.starts_with('#') && name.ends_with('#'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn module(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    const VARIABLES: &str = r#"
variable "location" {
  type        = string
  description = "Azure region"
  default     = "eastus"
}

variable "tags" {
  type      = map(string)
  default   = {}
  nullable  = false
  sensitive = true
}

resource "azurerm_resource_group" "rg" {
  name     = "rg"
  location = var.location
}
"#;

    const OUTPUTS: &str = r#"
output "aks_id" {
  description = "Cluster id"
  value       = azurerm_kubernetes_cluster.this.id
}
"#;

    #[test]
    fn test_extracts_raw_expression_text() {
        let dir = module(&[("variables.tf", VARIABLES), ("outputs.tf", OUTPUTS)]);
        let interface = InterfaceExtractor::extract(dir.path()).unwrap();

        let location = &interface.variables["location"];
        assert_eq!(location.type_expr.as_deref(), Some("string"));
        assert_eq!(location.default.as_deref(), Some("\"eastus\""));
        assert_eq!(location.nullable, None);

        let tags = &interface.variables["tags"];
        assert_eq!(tags.type_expr.as_deref(), Some("map(string)"));
        assert_eq!(tags.sensitive.as_deref(), Some("true"));

        let output = &interface.outputs["aks_id"];
        assert_eq!(output.value, "azurerm_kubernetes_cluster.this.id");
        assert_eq!(output.sensitive, None);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let dir = module(&[("variables.tf", VARIABLES), ("outputs.tf", OUTPUTS)]);
        let first = InterfaceExtractor::extract(dir.path()).unwrap();
        let second = InterfaceExtractor::extract(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_moving_block_between_files_is_not_a_change() {
        let split = module(&[("variables.tf", VARIABLES), ("outputs.tf", OUTPUTS)]);
        let merged = module(&[("main.tf", &format!("{}\n{}", OUTPUTS, VARIABLES))]);
        assert_eq!(
            InterfaceExtractor::extract(split.path()).unwrap(),
            InterfaceExtractor::extract(merged.path()).unwrap()
        );
    }

    #[test]
    fn test_skips_override_ignored_and_json_files() {
        let dir = module(&[
            ("variables.tf", VARIABLES),
            ("override.tf", "variable \"extra\" {}"),
            ("dev_override.tf", "variable \"extra2\" {}"),
            (".hidden.tf", "variable \"extra3\" {}"),
            ("main.tf~", "variable \"extra4\" {}"),
            ("generated.tf.json", "{\"variable\": {\"extra5\": {}}}"),
        ]);
        let interface = InterfaceExtractor::extract(dir.path()).unwrap();
        let names: Vec<_> = interface.variables.keys().cloned().collect();
        assert_eq!(names, vec!["location".to_string(), "tags".to_string()]);
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let dir = module(&[("variables.tf", "variable \"broken\" {\n  type = \n")]);
        let err = InterfaceExtractor::extract(dir.path()).unwrap_err();
        assert!(matches!(err, crate::error::HelperError::Parse { .. }));
    }

    #[test]
    fn test_duplicate_variable_is_parse_error() {
        let dir = module(&[
            ("a.tf", "variable \"x\" {}\n"),
            ("b.tf", "variable \"x\" {}\n"),
        ]);
        assert!(InterfaceExtractor::extract(dir.path()).is_err());
    }

    #[test]
    fn test_output_without_value_is_parse_error() {
        let dir = module(&[("outputs.tf", "output \"x\" {\n  description = \"d\"\n}\n")]);
        assert!(InterfaceExtractor::extract(dir.path()).is_err());
    }

    #[test]
    fn test_missing_directory_is_parse_error() {
        let err = InterfaceExtractor::extract(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, crate::error::HelperError::Parse { .. }));
    }

    #[test]
    fn test_override_names() {
        assert!(is_override("override.tf"));
        assert!(is_override("network_override.tf"));
        assert!(is_override("override.tf.json"));
        assert!(!is_override("overrides.tf"));
        assert!(is_ignored_file(".terraform.lock.hcl"));
        assert!(is_ignored_file("#main.tf#"));
        assert!(!is_ignored_file("main.tf"));
    }
}
