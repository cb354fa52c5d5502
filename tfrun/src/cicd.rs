//! Repository CI/CD deployment file (`.terraform-cicd-config.yaml`).
//!
//! The file names the backend, the deployments with their per-environment settings, and
//! the lifecycle stages that map branches to environments. It is validated against an
//! embedded JSON Schema before it is deserialized.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::core::types::{ExecutionMode, ValidationError};
use crate::io::outputs::OutputSink;

pub const DEFAULT_CICD_FILE: &str = ".terraform-cicd-config.yaml";

const CICD_SCHEMA: &str = include_str!("../schemas/cicd_config.schema.json");

fn default_project() -> String {
    "Default Project".to_string()
}

fn default_working_directory() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    pub hostname: String,
    pub organization: String,
    #[serde(default = "default_project")]
    pub project: String,
}

/// Environment variables and secret names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub env: Map<String, Value>,
    #[serde(default)]
    pub secrets: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub var_file: String,
    #[serde(default)]
    pub env: Map<String, Value>,
    #[serde(default)]
    pub secrets: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Deployment {
    pub id: String,
    pub workspace_prefix: String,
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    pub global: Scope,
    pub environments: Vec<Environment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleStage {
    pub name: String,
    pub order: i64,
    /// Regular expressions matched against the start of a branch name.
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CicdConfig {
    pub backend: Backend,
    pub deployments: Vec<Deployment>,
    pub lifecycle: Vec<LifecycleStage>,
}

/// Parse and validate a CI/CD file body. `origin` names the file in errors.
pub fn parse_cicd_config(contents: &str, origin: &str) -> Result<CicdConfig> {
    let document: Value =
        serde_yaml::from_str(contents).with_context(|| format!("parse {origin}"))?;
    let schema: Value = serde_json::from_str(CICD_SCHEMA).context("parse cicd schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(&document)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("{origin} is not valid:\n- {}", messages.join("\n- "));
    }
    let config: CicdConfig =
        serde_json::from_value(document).with_context(|| format!("deserialize {origin}"))?;
    check_environments_in_lifecycle(&config).with_context(|| format!("{origin} is not valid"))?;
    Ok(config)
}

pub fn load_cicd_config(path: &Path) -> Result<CicdConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config = parse_cicd_config(&contents, &path.display().to_string())?;
    info!(path = %path.display(), deployments = config.deployments.len(), "cicd config is valid");
    Ok(config)
}

/// Every deployment environment must be a lifecycle stage.
fn check_environments_in_lifecycle(config: &CicdConfig) -> Result<()> {
    for deployment in &config.deployments {
        for environment in &deployment.environments {
            if !config
                .lifecycle
                .iter()
                .any(|stage| stage.name == environment.name)
            {
                return Err(anyhow!(
                    "deployment environment [{}] is not defined in lifecycle",
                    environment.name
                ));
            }
        }
    }
    Ok(())
}

/// Deployments and lifecycle stages relevant to a target branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchPlan {
    pub deployments: Vec<String>,
    pub lifecycle_stages: Vec<String>,
}

/// Stages with at least one branch pattern matching `branch` from its first character.
pub fn plan_for_branch(config: &CicdConfig, branch: &str) -> Result<BranchPlan> {
    let mut lifecycle_stages = Vec::new();
    for stage in &config.lifecycle {
        let mut matched = false;
        for pattern in &stage.branches {
            let anchored = Regex::new(&format!("^(?:{pattern})"))
                .with_context(|| format!("compile branch pattern {pattern} of stage {}", stage.name))?;
            matched |= anchored.is_match(branch);
        }
        if matched {
            lifecycle_stages.push(stage.name.clone());
        }
    }
    debug!(branch, stages = ?lifecycle_stages, "matched lifecycle stages");
    Ok(BranchPlan {
        deployments: config
            .deployments
            .iter()
            .map(|deployment| deployment.id.clone())
            .collect(),
        lifecycle_stages,
    })
}

/// Workspace settings for one deployment in one environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentTarget {
    pub workspace: String,
    pub working_directory: String,
    pub execution_mode: ExecutionMode,
    pub var_file: String,
    /// Global env overlaid with the environment's own.
    pub environment_variables: Map<String, Value>,
    /// Global secrets followed by the environment's.
    pub secrets: Vec<Value>,
}

pub fn deployment_target(
    config: &CicdConfig,
    deployment_id: &str,
    environment_name: &str,
    origin: &str,
) -> Result<DeploymentTarget, ValidationError> {
    let deployment = config
        .deployments
        .iter()
        .find(|deployment| deployment.id == deployment_id)
        .ok_or_else(|| {
            ValidationError::new(format!("deployment [{deployment_id}] is missing from [{origin}]"))
        })?;
    let environment = deployment
        .environments
        .iter()
        .find(|environment| environment.name == environment_name)
        .ok_or_else(|| {
            ValidationError::new(format!(
                "environment [{environment_name}] is missing from [{origin}] for deployment [{deployment_id}]"
            ))
        })?;

    let mut environment_variables = deployment.global.env.clone();
    environment_variables.extend(environment.env.clone());
    let mut secrets = deployment.global.secrets.clone();
    secrets.extend(environment.secrets.iter().cloned());

    Ok(DeploymentTarget {
        workspace: format!("{}-{}", deployment.workspace_prefix, environment.name).to_uppercase(),
        working_directory: deployment.working_directory.clone(),
        execution_mode: deployment.execution_mode,
        var_file: environment.var_file.clone(),
        environment_variables,
        secrets,
    })
}

pub fn export_branch_plan(
    sink: &mut dyn OutputSink,
    config: &CicdConfig,
    plan: &BranchPlan,
) -> Result<()> {
    sink.set("config", &serde_json::to_string(config).context("encode config")?)?;
    sink.set("backend_hostname", &config.backend.hostname)?;
    sink.set("backend_organization", &config.backend.organization)?;
    sink.set("backend_project", &config.backend.project)?;
    sink.set("deployments", &serde_json::to_string(&plan.deployments)?)?;
    sink.set("lifecycle_stages", &serde_json::to_string(&plan.lifecycle_stages)?)?;
    Ok(())
}

pub fn export_deployment_target(sink: &mut dyn OutputSink, target: &DeploymentTarget) -> Result<()> {
    sink.set("workspace", &target.workspace)?;
    sink.set("working_directory", &target.working_directory)?;
    sink.set("execution_mode", target.execution_mode.as_str())?;
    sink.set("var_file", &target.var_file)?;
    sink.set(
        "environment_variables",
        &serde_json::to_string(&target.environment_variables)?,
    )?;
    sink.set("secrets", &serde_json::to_string(&target.secrets)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryOutputs;

    const CONFIG: &str = r#"
backend:
  hostname: app.terraform.io
  organization: acme
deployments:
  - id: network
    workspace-prefix: net
    execution-mode: agent
    global:
      env:
        AWS_REGION: us-east-1
        LOG_LEVEL: info
      secrets: [AWS_ACCESS_KEY_ID]
    environments:
      - name: dev
        var-file: env/dev.tfvars
        env:
          LOG_LEVEL: debug
        secrets: [DEV_TOKEN]
      - name: prod
lifecycle:
  - name: dev
    order: 1
    branches: ["feature/.*", "main"]
  - name: prod
    order: 2
    branches: ["main"]
"#;

    fn config() -> CicdConfig {
        parse_cicd_config(CONFIG, "test.yaml").expect("valid config")
    }

    #[test]
    fn defaults_are_applied() {
        let config = config();
        assert_eq!(config.backend.project, "Default Project");
        assert_eq!(config.deployments[0].working_directory, ".");
        assert_eq!(config.deployments[0].execution_mode, ExecutionMode::Agent);
        assert_eq!(config.deployments[0].environments[1].var_file, "");
    }

    #[test]
    fn branch_matches_stages_from_start() {
        let config = config();
        let plan = plan_for_branch(&config, "main").expect("plan");
        assert_eq!(plan.lifecycle_stages, vec!["dev", "prod"]);
        assert_eq!(plan.deployments, vec!["network"]);

        let plan = plan_for_branch(&config, "feature/vpc").expect("plan");
        assert_eq!(plan.lifecycle_stages, vec!["dev"]);

        let plan = plan_for_branch(&config, "hotfix/main").expect("plan");
        assert!(plan.lifecycle_stages.is_empty());
    }

    #[test]
    fn deployment_target_merges_env_and_secrets() {
        let target = deployment_target(&config(), "network", "dev", "test.yaml").expect("target");
        assert_eq!(target.workspace, "NET-DEV");
        assert_eq!(target.var_file, "env/dev.tfvars");
        assert_eq!(target.environment_variables["LOG_LEVEL"], "debug");
        assert_eq!(target.environment_variables["AWS_REGION"], "us-east-1");
        assert_eq!(
            target.secrets,
            vec![Value::from("AWS_ACCESS_KEY_ID"), Value::from("DEV_TOKEN")]
        );

        let mut outputs = MemoryOutputs::default();
        export_deployment_target(&mut outputs, &target).expect("export");
        assert_eq!(outputs.get("execution_mode"), Some("agent"));
        assert_eq!(outputs.get("secrets"), Some(r#"["AWS_ACCESS_KEY_ID","DEV_TOKEN"]"#));
    }

    #[test]
    fn unknown_deployment_or_environment_names_the_file() {
        let err = deployment_target(&config(), "storage", "dev", "test.yaml").unwrap_err();
        assert!(err.to_string().contains("test.yaml"));
        let err = deployment_target(&config(), "network", "qa", "test.yaml").unwrap_err();
        assert!(err.to_string().contains("[qa]"));
    }

    #[test]
    fn environment_outside_lifecycle_is_rejected() {
        let invalid = CONFIG.replace("- name: prod\nlifecycle", "- name: staging\nlifecycle");
        let err = parse_cicd_config(&invalid, "test.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("[staging]"));
    }

    #[test]
    fn schema_violations_are_listed() {
        let err = parse_cicd_config("backend:\n  hostname: h\ndeployments: []\n", "test.yaml")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("test.yaml is not valid"));
        assert!(message.contains("organization"));
        assert!(message.contains("lifecycle"));
    }
}
