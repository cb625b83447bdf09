//! Interface Diff Engine
//!
//! Field-by-field comparison of two module interfaces. Every difference is a
//! flat `ChangeRecord` addressed as `Category.name.Attribute`.

use crate::error::{HelperError, Result};
use crate::interface::{ModuleInterface, OutputDecl, VariableDecl};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Type of change detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Create => write!(f, "create"),
            ChangeType::Update => write!(f, "update"),
            ChangeType::Delete => write!(f, "delete"),
        }
    }
}

/// Which half of the interface a change belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Variables,
    Outputs,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Variables => write!(f, "Variables"),
            Category::Outputs => write!(f, "Outputs"),
        }
    }
}

/// Compared fields of `VariableDecl` and `OutputDecl`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attribute {
    Name,
    Type,
    Description,
    Default,
    Sensitive,
    Nullable,
    Value,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Attribute::Name => "Name",
            Attribute::Type => "Type",
            Attribute::Description => "Description",
            Attribute::Default => "Default",
            Attribute::Sensitive => "Sensitive",
            Attribute::Nullable => "Nullable",
            Attribute::Value => "Value",
        };
        write!(f, "{}", s)
    }
}

/// One atomic difference between two interfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub change_type: ChangeType,
    pub category: Category,
    /// Declaration name; absent for record-level changes
    pub name: Option<String>,
    /// Changed field; absent for record-level changes
    pub attribute: Option<Attribute>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl ChangeRecord {
    pub fn is(&self, change_type: ChangeType, attribute: Attribute) -> bool {
        self.change_type == change_type && self.attribute == Some(attribute)
    }
}

/// Rendering of a missing side, distinct from an empty string
const ABSENT: &str = "<nil>";

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] \"{}.{}.{}\" from '{}' to '{}'",
            self.change_type,
            self.category,
            self.name.as_deref().unwrap_or_default(),
            self.attribute.map(|a| a.to_string()).unwrap_or_default(),
            self.from.as_deref().unwrap_or(ABSENT),
            self.to.as_deref().unwrap_or(ABSENT),
        )
    }
}

/// A record shape the differ knows how to walk
pub trait Comparable {
    const CATEGORY: Category;

    fn name(&self) -> &str;

    /// Every compared field, `Name` first
    fn fields(&self) -> Vec<(Attribute, Option<&str>)>;
}

impl Comparable for VariableDecl {
    const CATEGORY: Category = Category::Variables;

    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> Vec<(Attribute, Option<&str>)> {
        vec![
            (Attribute::Name, Some(self.name.as_str())),
            (Attribute::Type, self.type_expr.as_deref()),
            (Attribute::Description, self.description.as_deref()),
            (Attribute::Default, self.default.as_deref()),
            (Attribute::Sensitive, self.sensitive.as_deref()),
            (Attribute::Nullable, self.nullable.as_deref()),
        ]
    }
}

impl Comparable for OutputDecl {
    const CATEGORY: Category = Category::Outputs;

    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> Vec<(Attribute, Option<&str>)> {
        vec![
            (Attribute::Name, Some(self.name.as_str())),
            (Attribute::Description, self.description.as_deref()),
            (Attribute::Sensitive, self.sensitive.as_deref()),
            (Attribute::Value, Some(self.value.as_str())),
        ]
    }
}

/// Change logs for both halves of an interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDiff {
    pub variables: Vec<ChangeRecord>,
    pub outputs: Vec<ChangeRecord>,
}

impl InterfaceDiff {
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.outputs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.variables.len() + self.outputs.len()
    }
}

/// The diff engine that compares module interfaces
pub struct DiffEngine;

impl DiffEngine {
    /// Compare two interfaces and return all differences
    pub fn diff(from: &ModuleInterface, to: &ModuleInterface) -> Result<InterfaceDiff> {
        Ok(InterfaceDiff {
            variables: Self::changelog(&from.variables, &to.variables)?,
            outputs: Self::changelog(&from.outputs, &to.outputs)?,
        })
    }

    /// Diff two name-keyed maps of the same record shape.
    ///
    /// Records only in `to` become `create` entries for each populated field,
    /// records only in `from` become `delete` entries, and records on both
    /// sides produce one `update` per differing field.
    pub fn changelog<T: Comparable>(
        from: &BTreeMap<String, T>,
        to: &BTreeMap<String, T>,
    ) -> Result<Vec<ChangeRecord>> {
        let mut changes = Vec::new();

        for (key, record) in from.iter().chain(to.iter()) {
            if record.name() != key {
                return Err(HelperError::Diff(format!(
                    "{} entry keyed \"{}\" is named \"{}\"",
                    T::CATEGORY,
                    key,
                    record.name()
                )));
            }
        }

        for (name, new) in to {
            match from.get(name) {
                None => Self::record_side(new, ChangeType::Create, &mut changes),
                Some(old) => Self::diff_fields(old, new, &mut changes),
            }
        }

        for (name, old) in from {
            if !to.contains_key(name) {
                Self::record_side(old, ChangeType::Delete, &mut changes);
            }
        }

        Ok(changes)
    }

    fn record_side<T: Comparable>(record: &T, change_type: ChangeType, changes: &mut Vec<ChangeRecord>) {
        for (attribute, value) in record.fields() {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };
            let (from, to) = match change_type {
                ChangeType::Create => (None, Some(value.to_string())),
                _ => (Some(value.to_string()), None),
            };
            changes.push(ChangeRecord {
                change_type,
                category: T::CATEGORY,
                name: Some(record.name().to_string()),
                attribute: Some(attribute),
                from,
                to,
            });
        }
    }

    fn diff_fields<T: Comparable>(old: &T, new: &T, changes: &mut Vec<ChangeRecord>) {
        for ((attribute, before), (_, after)) in old.fields().into_iter().zip(new.fields()) {
            if before == after {
                continue;
            }
            changes.push(ChangeRecord {
                change_type: ChangeType::Update,
                category: T::CATEGORY,
                name: Some(old.name().to_string()),
                attribute: Some(attribute),
                from: before.map(str::to_string),
                to: after.map(str::to_string),
            });
        }
    }
}
