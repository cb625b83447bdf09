//! Idempotency check
//!
//! After apply, a fresh plan against the same workspace must propose no
//! change to any resource.

use crate::error::{HelperError, Result};
use crate::logging::RunLogger;
use crate::pipeline::engine::{ProvisioningEngine, Terraform, TerraformOptions};
use serde::Deserialize;
use tracing::{debug, info};

pub const PLAN_FILE_NAME: &str = "tf.plan";

/// Subset of `terraform show -json <plan>`
#[derive(Debug, Default, Deserialize)]
pub struct PlanJson {
    #[serde(default)]
    pub resource_changes: Vec<ResourceChange>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceChange {
    pub address: String,
    #[serde(default)]
    pub change: Option<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub actions: Option<Vec<String>>,
}

impl ResourceChange {
    /// A missing change or action list counts as no-op
    pub fn is_no_op(&self) -> bool {
        match self.change.as_ref().and_then(|c| c.actions.as_ref()) {
            None => true,
            Some(actions) => actions.len() == 1 && actions[0] == "no-op",
        }
    }
}

impl PlanJson {
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn no_change(&self) -> bool {
        self.resource_changes.iter().all(ResourceChange::is_no_op)
    }

    pub fn changed_addresses(&self) -> Vec<&str> {
        self.resource_changes
            .iter()
            .filter(|rc| !rc.is_no_op())
            .map(|rc| rc.address.as_str())
            .collect()
    }
}

/// Plan the applied workspace and fail with the textual plan when anything
/// would change. Engine output of this check is not logged.
pub async fn check_idempotent(engine: &dyn ProvisioningEngine, options: &TerraformOptions) -> Result<()> {
    let mut options = options.clone();
    options.logger = RunLogger::discard();
    let plan_file = options.terraform_dir.join(PLAN_FILE_NAME);

    let tf = Terraform::new(engine, &options);
    tf.init().await?;
    let exit_code = tf.plan(&plan_file).await?;
    if exit_code == 0 {
        info!("✅ {} is idempotent", options.terraform_dir.display());
        return Ok(());
    }

    let plan = PlanJson::parse(&tf.show_plan_json(&plan_file).await?)?;
    if plan.no_change() {
        debug!("Plan exit code {} but every resource change is no-op", exit_code);
        return Ok(());
    }

    debug!("Non no-op changes: {:?}", plan.changed_addresses());
    let text = tf.show_plan_text(&plan_file).await?;
    Err(HelperError::NonIdempotent { plan: text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::testing::{failure, FakeEngine};
    use crate::pipeline::engine::{CommandOutput, PLAN_EXIT_CHANGES};

    const NO_OP_PLAN: &str = r#"{
        "format_version": "1.1",
        "resource_changes": [
            {"address": "azurerm_resource_group.rg", "change": {"actions": ["no-op"]}},
            {"address": "random_id.suffix", "change": {"actions": null}},
            {"address": "null_resource.x"}
        ]
    }"#;

    const UPDATE_PLAN: &str = r#"{
        "resource_changes": [
            {"address": "azurerm_resource_group.rg", "change": {"actions": ["no-op"]}},
            {"address": "azurerm_storage_account.sa", "change": {"actions": ["update"]}}
        ]
    }"#;

    #[test]
    fn test_no_op_and_missing_actions_count_as_no_change() {
        assert!(PlanJson::parse(NO_OP_PLAN).unwrap().no_change());
        assert!(PlanJson::parse("{}").unwrap().no_change());
    }

    #[test]
    fn test_any_other_action_is_a_change() {
        let plan = PlanJson::parse(UPDATE_PLAN).unwrap();
        assert!(!plan.no_change());
        assert_eq!(plan.changed_addresses(), vec!["azurerm_storage_account.sa"]);

        let replace = PlanJson::parse(
            r#"{"resource_changes": [{"address": "a.b", "change": {"actions": ["delete", "create"]}}]}"#,
        )
        .unwrap();
        assert!(!replace.no_change());
    }

    #[tokio::test]
    async fn test_clean_plan_passes_without_show() {
        let engine = FakeEngine::new();
        check_idempotent(&engine, &TerraformOptions::new("/work")).await.unwrap();
        assert_eq!(engine.commands(), vec!["init", "plan"]);
        assert!(engine.calls_of("plan")[0].contains(&"-out=/work/tf.plan".to_string()));
    }

    #[tokio::test]
    async fn test_diff_of_only_no_ops_passes() {
        let engine = FakeEngine::new()
            .respond("plan", failure(PLAN_EXIT_CHANGES, ""))
            .respond("show", CommandOutput::success(NO_OP_PLAN));
        check_idempotent(&engine, &TerraformOptions::new("/work")).await.unwrap();
    }

    #[tokio::test]
    async fn test_real_change_fails_with_textual_plan() {
        let engine = FakeEngine::new()
            .respond("plan", failure(PLAN_EXIT_CHANGES, ""))
            .respond("show", CommandOutput::success(UPDATE_PLAN))
            .respond("show", CommandOutput::success("  ~ update in-place azurerm_storage_account.sa"));

        let err = check_idempotent(&engine, &TerraformOptions::new("/work"))
            .await
            .unwrap_err();
        match err {
            HelperError::NonIdempotent { plan } => assert!(plan.contains("update in-place")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
