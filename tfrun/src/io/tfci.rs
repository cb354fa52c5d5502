//! Adapter for the `tfci` command-line tool.
//!
//! `tfci` uploads configuration bundles and drives run transitions. It prints progress
//! text followed by a pretty-printed JSON object; that trailing object is the structured
//! result.

use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::status::RunStatus;
use crate::core::types::{ConfigurationStatus, ConfigurationVersion, Run, WorkspaceRef};
use crate::io::process::run_command_with_timeout;
use crate::io::remote::{RemoteError, RemoteErrorKind};

/// How to invoke `tfci` and which platform it talks to.
#[derive(Debug, Clone)]
pub struct TfciSettings {
    /// Program and leading arguments.
    pub command: Vec<String>,
    pub hostname: String,
    pub organization: String,
    pub token: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Structured result printed by `tfci`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TfciOutput {
    pub status: Option<String>,
    pub configuration_version_id: Option<String>,
    pub configuration_version_status: Option<String>,
    pub run_id: Option<String>,
    pub run_status: Option<String>,
    pub run_message: Option<String>,
    pub run_link: Option<String>,
    pub plan_id: Option<String>,
    pub plan_status: Option<String>,
    pub cost_estimation_id: Option<String>,
    pub cost_estimation_status: Option<String>,
    pub payload: Option<Value>,
}

impl TfciOutput {
    fn reports_failure(&self) -> bool {
        matches!(
            self.status.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("error" | "timeout")
        )
    }

    /// A run handle from the output, falling back to `run` for fields tfci left out.
    pub fn into_run(self, fallback: &Run) -> Run {
        Run {
            id: self.run_id.unwrap_or_else(|| fallback.id.clone()),
            workspace_id: fallback.workspace_id.clone(),
            configuration_version_id: self
                .configuration_version_id
                .or_else(|| fallback.configuration_version_id.clone()),
            is_speculative: fallback.is_speculative,
            status: self
                .run_status
                .as_deref()
                .map(RunStatus::parse)
                .unwrap_or_else(|| fallback.status.clone()),
            message: self.run_message.or_else(|| fallback.message.clone()),
            link: self.run_link.or_else(|| fallback.link.clone()),
            plan_id: self.plan_id.or_else(|| fallback.plan_id.clone()),
            plan_status: self.plan_status.or_else(|| fallback.plan_status.clone()),
            cost_estimation_id: self
                .cost_estimation_id
                .or_else(|| fallback.cost_estimation_id.clone()),
            cost_estimation_status: self
                .cost_estimation_status
                .or_else(|| fallback.cost_estimation_status.clone()),
        }
    }
}

static OBJECT_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\{").expect("object start regex should be valid"));

/// Byte offset and value of the last top-level JSON object in `stdout`, i.e. one
/// starting at the beginning of a line.
fn trailing_object(stdout: &str) -> Option<(usize, Value)> {
    let starts: Vec<usize> = OBJECT_START.find_iter(stdout).map(|m| m.start()).collect();
    starts.into_iter().rev().find_map(|start| {
        serde_json::Deserializer::from_str(&stdout[start..])
            .into_iter::<Value>()
            .next()
            .and_then(Result::ok)
            .filter(Value::is_object)
            .map(|value| (start, value))
    })
}

pub fn trailing_json(stdout: &str) -> Option<Value> {
    trailing_object(stdout).map(|(_, value)| value)
}

/// `stdout` without its trailing JSON result.
pub fn progress_text(stdout: &str) -> &str {
    match trailing_object(stdout) {
        Some((start, _)) => &stdout[..start],
        None => stdout,
    }
}

static AUTH_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:unauthorized|forbidden|invalid token|401|403)\b")
        .expect("auth error regex should be valid")
});

static CONFLICT_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:conflict|409|not confirmable|(?:cannot|invalid) transition)\b")
        .expect("conflict error regex should be valid")
});

static NOT_FOUND_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:not found|404)\b").expect("not found error regex should be valid")
});

static VALIDATION_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:unprocessable|422|invalid)\b")
        .expect("validation error regex should be valid")
});

/// Guess the failure kind from error text. Callers pass stderr and progress text only,
/// never the JSON result, whose ids and links are arbitrary.
pub fn infer_kind(text: &str, default: RemoteErrorKind) -> RemoteErrorKind {
    if AUTH_ERROR.is_match(text) {
        RemoteErrorKind::Auth
    } else if CONFLICT_ERROR.is_match(text) {
        RemoteErrorKind::Conflict
    } else if NOT_FOUND_ERROR.is_match(text) {
        RemoteErrorKind::NotFound
    } else if VALIDATION_ERROR.is_match(text) {
        RemoteErrorKind::Validation
    } else {
        default
    }
}

/// Runs `tfci` subcommands with the configured timeout and output bound.
pub struct TfciCommand {
    settings: TfciSettings,
}

impl TfciCommand {
    pub fn new(settings: TfciSettings) -> Self {
        Self { settings }
    }

    fn invoke(
        &self,
        action: &str,
        args: &[&str],
        failure_kind: RemoteErrorKind,
    ) -> Result<TfciOutput, RemoteError> {
        let (program, leading) = self
            .settings
            .command
            .split_first()
            .ok_or_else(|| RemoteError::transport("tfci command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(leading)
            .arg("--hostname")
            .arg(&self.settings.hostname)
            .arg("--organization")
            .arg(&self.settings.organization)
            .args(args)
            .env("TF_API_TOKEN", &self.settings.token)
            .env("TF_CLOUD_HOSTNAME", &self.settings.hostname)
            .env("TF_CLOUD_ORGANIZATION", &self.settings.organization);

        debug!(action, "invoking tfci");
        let output = run_command_with_timeout(
            cmd,
            self.settings.timeout,
            self.settings.output_limit_bytes,
        )
        .map_err(|err| RemoteError::transport(format!("run tfci {action}: {err:#}")))?;

        let stdout = output.stdout_text();
        let stderr = output.stderr_text();
        let parsed = match trailing_json(&stdout) {
            Some(value) => serde_json::from_value::<TfciOutput>(value).map_err(|err| {
                RemoteError::transport(format!("tfci {action} printed an unexpected result: {err}"))
            })?,
            None => TfciOutput::default(),
        };
        let run = (parsed.run_id.clone(), parsed.run_link.clone());

        if output.timed_out {
            return Err(RemoteError::transport(format!(
                "tfci {action} timed out after {}s",
                self.settings.timeout.as_secs()
            ))
            .with_stderr(stderr)
            .with_run(run.0, run.1));
        }
        if !output.status.success() || parsed.reports_failure() {
            let code = output.status.code();
            warn!(action, exit_code = ?code, "tfci failed");
            let error_text = format!("{stderr}\n{}", progress_text(&stdout));
            let message = match code {
                Some(code) if code != 0 => format!("tfci {action} failed with exit code {code}"),
                _ => format!(
                    "tfci {action} reported status {}",
                    parsed.status.as_deref().unwrap_or("unknown")
                ),
            };
            return Err(RemoteError::new(infer_kind(&error_text, failure_kind), message)
                .with_exit_code(code)
                .with_stderr(if stderr.trim().is_empty() { stdout } else { stderr })
                .with_run(run.0, run.1));
        }
        if parsed == TfciOutput::default() {
            return Err(RemoteError::transport(format!(
                "tfci {action} printed no JSON result"
            ))
            .with_stderr(stderr));
        }
        Ok(parsed)
    }

    #[instrument(skip_all, fields(workspace = %workspace.name, speculative = speculative))]
    pub fn upload(
        &self,
        workspace: &WorkspaceRef,
        directory: &Path,
        speculative: bool,
    ) -> Result<ConfigurationVersion, RemoteError> {
        let directory = directory.to_string_lossy();
        let mut args = vec![
            "upload",
            "--workspace",
            workspace.name.as_str(),
            "--directory",
            &*directory,
        ];
        if speculative {
            args.push("--speculative");
        }
        let output = self.invoke("upload", &args, RemoteErrorKind::Upload)?;
        let id = output.configuration_version_id.ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::Upload,
                "tfci upload returned no configuration_version_id",
            )
        })?;
        let status = output
            .configuration_version_status
            .as_deref()
            .map(ConfigurationStatus::parse)
            .unwrap_or(ConfigurationStatus::Uploaded);
        info!(configuration_version_id = %id, status = status.as_str(), "uploaded configuration");
        Ok(ConfigurationVersion {
            id,
            status,
            speculative,
        })
    }

    #[instrument(skip_all, fields(workspace = %workspace.name, configuration_version_id = %configuration.id, plan_only = plan_only))]
    pub fn create_run(
        &self,
        workspace: &WorkspaceRef,
        configuration: &ConfigurationVersion,
        message: &str,
        plan_only: bool,
    ) -> Result<Run, RemoteError> {
        let mut args = vec![
            "run",
            "create",
            "--workspace",
            workspace.name.as_str(),
            "--configuration_version",
            configuration.id.as_str(),
            "--message",
            message,
        ];
        if plan_only {
            args.push("--plan-only");
        }
        let output = self.invoke("run create", &args, RemoteErrorKind::Transport)?;
        let fallback = Run {
            workspace_id: Some(workspace.id.clone()),
            configuration_version_id: Some(configuration.id.clone()),
            is_speculative: plan_only,
            message: Some(message.to_string()),
            ..Run::default()
        };
        let run = output.into_run(&fallback);
        if run.id.is_empty() {
            return Err(RemoteError::transport("tfci run create returned no run_id"));
        }
        info!(run_id = %run.id, status = %run.status, "created run");
        Ok(run)
    }

    #[instrument(skip_all, fields(run_id = %run.id))]
    pub fn apply_run(&self, run: &Run, comment: &str) -> Result<Run, RemoteError> {
        let args = ["run", "apply", "--run", run.id.as_str(), "--comment", comment];
        let output = self.invoke("run apply", &args, RemoteErrorKind::Transport)?;
        Ok(output.into_run(run))
    }

    #[instrument(skip_all, fields(run_id = %run.id))]
    pub fn discard_run(&self, run: &Run, comment: &str) -> Result<Run, RemoteError> {
        let args = ["run", "discard", "--run", run.id.as_str(), "--comment", comment];
        let output = self.invoke("run discard", &args, RemoteErrorKind::Transport)?;
        Ok(output.into_run(run))
    }
}
