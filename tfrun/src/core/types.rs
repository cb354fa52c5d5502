//! Data model shared by the orchestrator, remote adapters and the summary renderer.
//!
//! These types describe what was observed on the remote platform. They carry no I/O
//! handles; adapters build them and the orchestrator only reads them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::status::RunStatus;

/// Input that cannot be acted on. Raised before any remote call is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Run phase a summary or poll refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Plan,
    Apply,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Apply => "apply",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Phase::Plan => "Plan",
            Phase::Apply => "Apply",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the workspace executes its runs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Remote,
    Agent,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Remote => "remote",
            ExecutionMode::Agent => "agent",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(ExecutionMode::Remote),
            "agent" => Ok(ExecutionMode::Agent),
            other => Err(ValidationError::new(format!(
                "execution mode must be 'remote' or 'agent', got '{other}'"
            ))),
        }
    }
}

/// A remote execution environment, validated once per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workspace {
    pub hostname: String,
    pub organization: String,
    pub project: Option<String>,
    pub name: String,
    pub execution_mode: ExecutionMode,
    pub working_directory: Option<String>,
    pub terraform_version: Option<String>,
}

impl Workspace {
    /// Organization and workspace name must be non-empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.organization.trim().is_empty() {
            return Err(ValidationError::new(
                "organization is required (--organization or TF_CLOUD_ORGANIZATION)",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::new(
                "workspace is required (--workspace or TF_WORKSPACE)",
            ));
        }
        if self.hostname.trim().is_empty() {
            return Err(ValidationError::new("hostname must not be empty"));
        }
        Ok(())
    }
}

/// Identity of a configured workspace on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRef {
    pub id: String,
    pub name: String,
    pub project_id: Option<String>,
}

/// Variable category as understood by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableCategory {
    Terraform,
    Env,
}

impl VariableCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            VariableCategory::Terraform => "terraform",
            VariableCategory::Env => "env",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub key: String,
    pub value: String,
    pub category: VariableCategory,
    /// Value is an HCL/JSON expression rather than a plain string.
    pub hcl: bool,
    pub sensitive: bool,
}

/// Ordered variables with keys unique per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSet {
    entries: Vec<Variable>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `variable`, replacing an earlier entry with the same key and category in place.
    pub fn insert(&mut self, variable: Variable) {
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.key == variable.key && existing.category == variable.category)
        {
            Some(existing) => *existing = variable,
            None => self.entries.push(variable),
        }
    }

    pub fn extend(&mut self, variables: impl IntoIterator<Item = Variable>) {
        for variable in variables {
            self.insert(variable);
        }
    }

    pub fn entries(&self) -> &[Variable] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries of one category, preserving order.
    pub fn of_category(&self, category: VariableCategory) -> VariableSet {
        VariableSet {
            entries: self
                .entries
                .iter()
                .filter(|entry| entry.category == category)
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationStatus {
    #[default]
    Pending,
    Uploaded,
    Errored,
    #[serde(untagged)]
    Other(String),
}

impl ConfigurationStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => ConfigurationStatus::Pending,
            "uploaded" => ConfigurationStatus::Uploaded,
            "errored" => ConfigurationStatus::Errored,
            other => ConfigurationStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ConfigurationStatus::Pending => "pending",
            ConfigurationStatus::Uploaded => "uploaded",
            ConfigurationStatus::Errored => "errored",
            ConfigurationStatus::Other(raw) => raw,
        }
    }
}

/// An uploaded configuration bundle, created fresh for every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationVersion {
    pub id: String,
    pub status: ConfigurationStatus,
    pub speculative: bool,
}

/// A run as returned by the remote side when it is created, applied or discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Run {
    pub id: String,
    pub workspace_id: Option<String>,
    pub configuration_version_id: Option<String>,
    pub is_speculative: bool,
    pub status: RunStatus,
    pub message: Option<String>,
    pub link: Option<String>,
    pub plan_id: Option<String>,
    pub plan_status: Option<String>,
    pub cost_estimation_id: Option<String>,
    pub cost_estimation_status: Option<String>,
}

/// Resource change counts for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub import: u64,
    pub add: u64,
    pub change: u64,
    pub destroy: u64,
}

impl ChangeCounts {
    pub fn has_changes(&self) -> bool {
        self.import + self.add + self.change + self.destroy > 0
    }
}

/// Remote-computed actions available for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunActions {
    pub is_cancelable: bool,
    pub is_confirmable: bool,
    pub is_discardable: bool,
    pub is_force_cancelable: bool,
}

/// Local text artifacts collected for a phase. Missing entries were not produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub execution_log: Option<PathBuf>,
    pub change_summary: Option<PathBuf>,
    pub run_tasks: Option<PathBuf>,
    pub policy_checks: Option<PathBuf>,
}

/// Non-sensitive state outputs keyed by output name.
pub type StateOutputs = BTreeMap<String, serde_json::Value>;

/// The orchestrator's externally visible snapshot of one phase of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunResult {
    pub phase: Option<Phase>,
    pub workspace_name: Option<String>,
    pub workspace_id: Option<String>,
    pub project_id: Option<String>,
    pub run_id: String,
    pub run_link: Option<String>,
    pub run_message: Option<String>,
    pub status: RunStatus,
    pub is_speculative: bool,
    pub configuration_version_id: Option<String>,
    pub configuration_version_status: Option<String>,
    /// Plan or apply resource id, depending on `phase`.
    pub phase_id: Option<String>,
    pub phase_status: Option<String>,
    pub cost_estimation_id: Option<String>,
    pub cost_estimation_status: Option<String>,
    pub resource_count: u64,
    pub counts: ChangeCounts,
    #[serde(flatten)]
    pub actions: RunActions,
    pub artifacts: ArtifactPaths,
    pub state_outputs: Option<StateOutputs>,
}

impl RunResult {
    /// Seed a result from a freshly created run before any observation.
    pub fn from_run(run: &Run) -> Self {
        Self {
            phase: Some(Phase::Plan),
            workspace_id: run.workspace_id.clone(),
            run_id: run.id.clone(),
            run_link: run.link.clone(),
            run_message: run.message.clone(),
            status: run.status.clone(),
            is_speculative: run.is_speculative,
            configuration_version_id: run.configuration_version_id.clone(),
            phase_id: run.plan_id.clone(),
            phase_status: run.plan_status.clone(),
            cost_estimation_id: run.cost_estimation_id.clone(),
            cost_estimation_status: run.cost_estimation_status.clone(),
            ..Self::default()
        }
    }

    /// A `Run` handle suitable for apply/discard requests.
    pub fn to_run(&self) -> Run {
        Run {
            id: self.run_id.clone(),
            workspace_id: self.workspace_id.clone(),
            configuration_version_id: self.configuration_version_id.clone(),
            is_speculative: self.is_speculative,
            status: self.status.clone(),
            message: self.run_message.clone(),
            link: self.run_link.clone(),
            plan_id: None,
            plan_status: None,
            cost_estimation_id: self.cost_estimation_id.clone(),
            cost_estimation_status: self.cost_estimation_status.clone(),
        }
    }

    /// Fill identifiers the observation did not report from what creation returned.
    pub fn backfill_from(&mut self, run: &Run) {
        fn fill(slot: &mut Option<String>, value: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }
        fill(&mut self.run_link, &run.link);
        fill(&mut self.run_message, &run.message);
        fill(&mut self.workspace_id, &run.workspace_id);
        fill(&mut self.configuration_version_id, &run.configuration_version_id);
        fill(&mut self.cost_estimation_id, &run.cost_estimation_id);
        fill(&mut self.cost_estimation_status, &run.cost_estimation_status);
        self.is_speculative |= run.is_speculative;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable(key: &str, value: &str, category: VariableCategory) -> Variable {
        Variable {
            key: key.to_string(),
            value: value.to_string(),
            category,
            hcl: false,
            sensitive: false,
        }
    }

    fn workspace(organization: &str, name: &str) -> Workspace {
        Workspace {
            hostname: "app.terraform.io".to_string(),
            organization: organization.to_string(),
            project: None,
            name: name.to_string(),
            execution_mode: ExecutionMode::Remote,
            working_directory: None,
            terraform_version: None,
        }
    }

    #[test]
    fn workspace_requires_organization_and_name() {
        assert!(workspace("acme", "net-dev").validate().is_ok());
        let err = workspace("  ", "net-dev").validate().unwrap_err();
        assert!(err.to_string().contains("organization"));
        let err = workspace("acme", "").validate().unwrap_err();
        assert!(err.to_string().contains("workspace"));
    }

    #[test]
    fn execution_mode_rejects_unknown_values() {
        assert_eq!(ExecutionMode::parse("Agent"), Ok(ExecutionMode::Agent));
        assert!(ExecutionMode::parse("local").is_err());
    }

    #[test]
    fn variable_set_keeps_keys_unique_per_category() {
        let mut set = VariableSet::new();
        set.insert(variable("region", "us-east-1", VariableCategory::Terraform));
        set.insert(variable("region", "eu-west-1", VariableCategory::Env));
        set.insert(variable("region", "us-west-2", VariableCategory::Terraform));

        assert_eq!(set.len(), 2);
        assert_eq!(set.entries()[0].value, "us-west-2");
        let env = set.of_category(VariableCategory::Env);
        assert_eq!(env.len(), 1);
        assert_eq!(env.entries()[0].value, "eu-west-1");
    }

    #[test]
    fn backfill_keeps_observed_values() {
        let run = Run {
            id: "run-1".to_string(),
            link: Some("https://example/run-1".to_string()),
            message: Some("created".to_string()),
            ..Run::default()
        };
        let mut result = RunResult {
            run_id: "run-1".to_string(),
            run_message: Some("observed".to_string()),
            ..RunResult::default()
        };
        result.backfill_from(&run);
        assert_eq!(result.run_link.as_deref(), Some("https://example/run-1"));
        assert_eq!(result.run_message.as_deref(), Some("observed"));
    }
}
