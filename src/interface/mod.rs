//! Module Interface
//!
//! The externally observable contract of a Terraform module: its declared
//! `variable` and `output` blocks, captured as raw source text.

pub mod extractor;
pub mod model;

pub use extractor::InterfaceExtractor;
pub use model::{ModuleInterface, OutputDecl, VariableDecl};
