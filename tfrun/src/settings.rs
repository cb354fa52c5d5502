//! Immutable settings resolved once from CLI inputs, the environment and the tunables file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::types::{ExecutionMode, ValidationError, VariableCategory, VariableSet, Workspace};
use crate::core::variables::{VariableSource, collect_variables, split_var_files};
use crate::io::config::TfrunConfig;
use crate::io::env::EnvSnapshot;
use crate::io::tfc_api::ApiSettings;
use crate::io::tfci::TfciSettings;

pub const DEFAULT_HOSTNAME: &str = "app.terraform.io";
pub const DEFAULT_ARTIFACT_DIR: &str = ".tfrun";
pub const DEFAULT_MESSAGE: &str = "Queued by tfrun";

/// Raw per-flow inputs as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct FlowInputs {
    pub hostname: Option<String>,
    pub organization: Option<String>,
    pub workspace: Option<String>,
    pub project: Option<String>,
    pub execution_mode: Option<String>,
    pub working_directory: Option<String>,
    pub terraform_version: Option<String>,
    /// Comma and/or newline separated tfvars/JSON files.
    pub var_file: String,
    /// Inline JSON/HCL block of Terraform variables.
    pub variables: String,
    /// Inline JSON/HCL block of environment variables.
    pub environment_variables: String,
    pub message: Option<String>,
    /// Marker identifying this flow's report; defaults to the workspace name.
    pub label: Option<String>,
    /// Directory bundled into the configuration version.
    pub directory: PathBuf,
    pub artifact_dir: Option<PathBuf>,
}

/// Where to reach the platform and with which credentials.
#[derive(Debug, Clone)]
pub struct Connection {
    pub hostname: String,
    pub organization: Option<String>,
    pub api_token: String,
    pub verify_tls: bool,
}

impl Connection {
    pub fn resolve(
        hostname: Option<&str>,
        organization: Option<&str>,
        env: &EnvSnapshot,
    ) -> Result<Self, ValidationError> {
        let api_token = env.require("TF_API_TOKEN")?.to_string();
        let hostname = pick(hostname, env, "TF_CLOUD_HOSTNAME")
            .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string());
        Ok(Self {
            hostname,
            organization: pick(organization, env, "TF_CLOUD_ORGANIZATION"),
            api_token,
            verify_tls: env.flag("TF_VERIFY", true)?,
        })
    }

    pub fn api_settings(&self, tunables: &TfrunConfig) -> ApiSettings {
        ApiSettings {
            hostname: self.hostname.clone(),
            token: self.api_token.clone(),
            verify_tls: self.verify_tls,
            timeout: tunables.http_timeout(),
        }
    }

    pub fn tfci_settings(&self, tunables: &TfrunConfig) -> TfciSettings {
        TfciSettings {
            command: tunables.tfci_command.clone(),
            hostname: self.hostname.clone(),
            organization: self.organization.clone().unwrap_or_default(),
            token: self.api_token.clone(),
            timeout: tunables.command_timeout(),
            output_limit_bytes: tunables.output_limit_bytes,
        }
    }
}

/// Everything a plan or apply flow needs, validated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub connection: Connection,
    pub workspace: Workspace,
    pub variables: VariableSet,
    pub directory: PathBuf,
    pub artifact_dir: PathBuf,
    pub message: String,
    pub label: String,
    pub tunables: TfrunConfig,
}

impl Settings {
    /// Validate and merge all inputs. Performs no remote calls; var files are read here so
    /// malformed variables fail before anything is sent.
    pub fn resolve(
        inputs: &FlowInputs,
        env: &EnvSnapshot,
        tunables: TfrunConfig,
    ) -> Result<Self, ValidationError> {
        let connection = Connection::resolve(
            inputs.hostname.as_deref(),
            inputs.organization.as_deref(),
            env,
        )?;
        // Presence check only.
        env.require("GITHUB_TOKEN")?;

        let workspace = Workspace {
            hostname: connection.hostname.clone(),
            organization: connection.organization.clone().unwrap_or_default(),
            project: pick(inputs.project.as_deref(), env, "TF_PROJECT"),
            name: pick(inputs.workspace.as_deref(), env, "TF_WORKSPACE").unwrap_or_default(),
            execution_mode: match non_blank(inputs.execution_mode.as_deref()) {
                Some(mode) => ExecutionMode::parse(mode)?,
                None => ExecutionMode::default(),
            },
            working_directory: non_blank(inputs.working_directory.as_deref()).map(str::to_string),
            terraform_version: non_blank(inputs.terraform_version.as_deref()).map(str::to_string),
        };
        workspace.validate()?;
        tunables
            .validate()
            .map_err(|err| ValidationError::new(format!("invalid tunables: {err:#}")))?;

        let variables = load_variables(inputs)?;
        debug!(count = variables.len(), "collected variables");

        let artifact_dir = resolve_artifact_dir(inputs.artifact_dir.as_deref(), env);
        let label = non_blank(inputs.label.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| workspace.name.clone());

        Ok(Self {
            connection,
            variables,
            directory: inputs.directory.clone(),
            artifact_dir,
            message: non_blank(inputs.message.as_deref())
                .unwrap_or(DEFAULT_MESSAGE)
                .to_string(),
            label,
            workspace,
            tunables,
        })
    }
}

/// `--artifact-dir`, else `$RUNNER_TEMP/tfrun`, else `.tfrun`.
pub fn resolve_artifact_dir(cli: Option<&Path>, env: &EnvSnapshot) -> PathBuf {
    cli.map(Path::to_path_buf)
        .or_else(|| env.get("RUNNER_TEMP").map(|temp| Path::new(temp).join("tfrun")))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// CLI value first, then the environment fallback.
fn pick(cli: Option<&str>, env: &EnvSnapshot, key: &str) -> Option<String> {
    non_blank(cli).or_else(|| env.get(key)).map(str::to_string)
}

fn load_variables(inputs: &FlowInputs) -> Result<VariableSet, ValidationError> {
    let mut files = Vec::new();
    for path in split_var_files(&inputs.var_file) {
        let contents = fs::read_to_string(&path)
            .map_err(|err| ValidationError::new(format!("read var file {path}: {err}")))?;
        files.push((path, contents));
    }
    let mut sources: Vec<VariableSource<'_>> = files
        .iter()
        .map(|(path, contents)| VariableSource {
            origin: path,
            contents,
            category: VariableCategory::Terraform,
        })
        .collect();
    sources.push(VariableSource {
        origin: "variables",
        contents: &inputs.variables,
        category: VariableCategory::Terraform,
    });
    sources.push(VariableSource {
        origin: "environment_variables",
        contents: &inputs.environment_variables,
        category: VariableCategory::Env,
    });
    collect_variables(&sources)
}
