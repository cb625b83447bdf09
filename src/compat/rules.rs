//! Breaking-Change Rules
//!
//! Decides which interface changes force module consumers to touch their own
//! configuration. Pure and deterministic: the verdict never depends on the
//! order of the change log.
//!
//! Sensitivity is asymmetric on purpose. An input losing `sensitive = true`
//! exposes data that used to be hidden; an output gaining it hides data that
//! consumers used to see. The opposite directions are not breaking.

use crate::compat::diff::{Attribute, Category, ChangeRecord, ChangeType, InterfaceDiff};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The rule that flagged a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakingRule {
    NewRequiredVariable,
    DeletedVariable,
    VariableTypeChanged,
    VariableDefaultChanged,
    VariableNullableChanged,
    VariableSensitivityRemoved,
    DeletedOutput,
    OutputValueChanged,
    OutputMarkedSensitive,
}

impl BreakingRule {
    pub fn description(&self) -> &'static str {
        match self {
            BreakingRule::NewRequiredVariable => "new variable without a default value",
            BreakingRule::DeletedVariable => "variable removed",
            BreakingRule::VariableTypeChanged => "variable type changed",
            BreakingRule::VariableDefaultChanged => "existing default value changed or removed",
            BreakingRule::VariableNullableChanged => "variable nullability changed",
            BreakingRule::VariableSensitivityRemoved => "variable no longer sensitive",
            BreakingRule::DeletedOutput => "output removed",
            BreakingRule::OutputValueChanged => "output value expression changed",
            BreakingRule::OutputMarkedSensitive => "output became sensitive",
        }
    }
}

/// A change flagged by one of the rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakingChange {
    pub rule: BreakingRule,
    pub change: ChangeRecord,
}

impl fmt::Display for BreakingChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.change.fmt(f)
    }
}

type Predicate = fn(&ChangeRecord) -> bool;

const VARIABLE_RULES: &[(BreakingRule, Predicate)] = &[
    (BreakingRule::DeletedVariable, is_deleted),
    (BreakingRule::VariableTypeChanged, type_changed),
    (BreakingRule::VariableDefaultChanged, existing_default_changed),
    (BreakingRule::VariableNullableChanged, nullable_changed),
    (BreakingRule::VariableSensitivityRemoved, sensitivity_removed),
];

const OUTPUT_RULES: &[(BreakingRule, Predicate)] = &[
    (BreakingRule::DeletedOutput, is_deleted),
    (BreakingRule::OutputValueChanged, value_changed),
    (BreakingRule::OutputMarkedSensitive, marked_sensitive),
];

/// Applies the breaking-change rule set to a change log
pub struct BreakingChangeClassifier;

impl BreakingChangeClassifier {
    /// Breaking variable changes followed by breaking output changes
    pub fn classify(diff: &InterfaceDiff) -> Vec<BreakingChange> {
        let mut breaking = Self::breaking_variables(&diff.variables);
        breaking.extend(Self::breaking_outputs(&diff.outputs));
        breaking
    }

    pub fn breaking_variables(changes: &[ChangeRecord]) -> Vec<BreakingChange> {
        let variables: Vec<&ChangeRecord> = changes
            .iter()
            .filter(|c| c.category == Category::Variables)
            .collect();

        let mut breaking = new_required_variables(&variables);
        breaking.extend(apply_rules(&variables, VARIABLE_RULES));
        breaking
    }

    pub fn breaking_outputs(changes: &[ChangeRecord]) -> Vec<BreakingChange> {
        let outputs: Vec<&ChangeRecord> = changes
            .iter()
            .filter(|c| c.category == Category::Outputs)
            .collect();

        apply_rules(&outputs, OUTPUT_RULES)
    }
}

/// Rule by rule, so the report groups changes of the same kind
fn apply_rules(changes: &[&ChangeRecord], rules: &[(BreakingRule, Predicate)]) -> Vec<BreakingChange> {
    rules
        .iter()
        .flat_map(|(rule, predicate)| {
            changes
                .iter()
                .filter(move |c| predicate(c))
                .map(move |c| BreakingChange {
                    rule: *rule,
                    change: (*c).clone(),
                })
        })
        .collect()
}

/// Created variables whose create records include no `Default`.
/// One entry per variable: its `Name` record.
fn new_required_variables(changes: &[&ChangeRecord]) -> Vec<BreakingChange> {
    let mut names: Vec<&str> = Vec::new();
    for change in changes.iter().filter(|c| c.change_type == ChangeType::Create) {
        if let Some(name) = change.name.as_deref() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    names
        .into_iter()
        .filter_map(|name| {
            let group: Vec<&&ChangeRecord> = changes
                .iter()
                .filter(|c| c.change_type == ChangeType::Create && c.name.as_deref() == Some(name))
                .collect();
            let has_default = group.iter().any(|c| c.attribute == Some(Attribute::Default));
            if has_default {
                return None;
            }
            group
                .into_iter()
                .find(|c| c.attribute == Some(Attribute::Name))
                .map(|c| BreakingChange {
                    rule: BreakingRule::NewRequiredVariable,
                    change: (**c).clone(),
                })
        })
        .collect()
}

fn is_empty(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

fn is_deleted(c: &ChangeRecord) -> bool {
    c.is(ChangeType::Delete, Attribute::Name)
}

/// A type becoming unset is a widening and stays allowed
fn type_changed(c: &ChangeRecord) -> bool {
    c.is(ChangeType::Update, Attribute::Type) && !is_empty(&c.to)
}

/// Adding a default where there was none is fine
fn existing_default_changed(c: &ChangeRecord) -> bool {
    c.is(ChangeType::Update, Attribute::Default) && !is_empty(&c.from)
}

fn nullable_changed(c: &ChangeRecord) -> bool {
    c.is(ChangeType::Update, Attribute::Nullable)
}

fn sensitivity_removed(c: &ChangeRecord) -> bool {
    c.is(ChangeType::Update, Attribute::Sensitive)
        && c.from.as_deref() == Some("true")
        && matches!(c.to.as_deref(), None | Some("") | Some("false"))
}

fn value_changed(c: &ChangeRecord) -> bool {
    c.is(ChangeType::Update, Attribute::Value)
}

fn marked_sensitive(c: &ChangeRecord) -> bool {
    c.is(ChangeType::Update, Attribute::Sensitive) && c.to.as_deref() == Some("true")
}
