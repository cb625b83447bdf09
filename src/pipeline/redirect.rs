//! Module source redirection
//!
//! An example from a previous release references its module through a
//! relative path (`../..`). Before re-planning it against the current code,
//! those references are rewritten to the local module path. Only the string
//! literal is replaced; everything else in the file stays byte-for-byte.

use crate::error::{parse_error, Result};
use crate::interface::extractor::{is_ignored_file, is_override};
use hcl_edit::expr::Expression;
use hcl_edit::parser::parse_body;
use hcl_edit::structure::Structure;
use hcl_edit::Span;
use std::ops::Range;
use std::path::Path;
use tracing::debug;

/// Relative sources an example uses to reach its module
pub const EXAMPLE_MODULE_SOURCES: &[&str] = &["../../", "../.."];

/// Rewrite `module` sources in every `.tf` file of `dir`; returns how many
/// references were redirected.
pub fn rewrite_module_sources(dir: &Path, new_source: &str) -> Result<usize> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| parse_error(dir, format!("failed to read module directory: {}", e)))?;

    let mut total = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(".tf") || is_override(&name) || is_ignored_file(&name) {
            continue;
        }

        let path = entry.path();
        let code = std::fs::read_to_string(&path)?;
        let (rewritten, count) = redirect_module_source(&path, &code, EXAMPLE_MODULE_SOURCES, new_source)?;
        if count > 0 {
            std::fs::write(&path, rewritten)?;
            debug!("Redirected {} module source(s) in {}", count, path.display());
            total += count;
        }
    }
    Ok(total)
}

/// Replace the `source` of each `module` block whose literal value is one of
/// `origins` with `new_source`.
pub fn redirect_module_source(
    path: &Path,
    code: &str,
    origins: &[&str],
    new_source: &str,
) -> Result<(String, usize)> {
    let body = parse_body(code).map_err(|e| parse_error(path, e.to_string()))?;

    let mut spans: Vec<Range<usize>> = body
        .iter()
        .filter_map(|structure| match structure {
            Structure::Block(block) if block.ident.as_str() == "module" => Some(block),
            _ => None,
        })
        .flat_map(|block| block.body.iter())
        .filter_map(|structure| match structure {
            Structure::Attribute(attr) if attr.key.as_str() == "source" => Some(&attr.value),
            _ => None,
        })
        .filter(|value| match value {
            Expression::String(s) => origins.contains(&s.value().as_str()),
            _ => false,
        })
        .filter_map(|value| value.span())
        .collect();

    if spans.is_empty() {
        return Ok((code.to_string(), 0));
    }

    let literal = serde_json::to_string(new_source)?;
    spans.sort_by_key(|span| span.start);

    let mut out = String::with_capacity(code.len());
    let mut cursor = 0;
    for span in &spans {
        out.push_str(&code[cursor..span.start]);
        out.push_str(&literal);
        cursor = span.end;
    }
    out.push_str(&code[cursor..]);

    Ok((out, spans.len()))
}
