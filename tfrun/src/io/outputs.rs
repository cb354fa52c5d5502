//! Key/value outputs for the invoking pipeline.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use tracing::debug;

use crate::core::types::{Phase, RunResult, StateOutputs};
use crate::io::env::EnvSnapshot;

pub const GITHUB_OUTPUT_ENV: &str = "GITHUB_OUTPUT";

/// Where step outputs go.
pub trait OutputSink {
    fn set(&mut self, name: &str, value: &str) -> Result<()>;
}

/// Appends outputs to the file named by `GITHUB_OUTPUT`.
#[derive(Debug, Clone, Default)]
pub struct GithubOutputs {
    path: Option<PathBuf>,
}

impl GithubOutputs {
    /// Outputs are dropped when the variable is unset or the file does not exist.
    pub fn from_env(env: &EnvSnapshot) -> Self {
        let path = env
            .get(GITHUB_OUTPUT_ENV)
            .map(PathBuf::from)
            .filter(|path| path.is_file());
        Self { path }
    }

    pub fn at(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
        }
    }
}

impl OutputSink for GithubOutputs {
    fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let Some(path) = &self.path else {
            debug!(name, "no output file, dropping output");
            return Ok(());
        };
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("open output file {}", path.display()))?;
        file.write_all(format_output(name, value, &delimiter()).as_bytes())
            .with_context(|| format!("write output {name}"))?;
        Ok(())
    }
}

/// 20 random lowercase letters.
pub fn delimiter() -> String {
    let mut rng = rand::thread_rng();
    (0..20).map(|_| char::from(rng.gen_range(b'a'..=b'z'))).collect()
}

/// Single-line values as `name=value`; multi-line values as a heredoc closed by `delimiter`.
pub fn format_output(name: &str, value: &str, delimiter: &str) -> String {
    if value.lines().count() > 1 {
        let newline = if value.ends_with('\n') { "" } else { "\n" };
        format!("{name}<<{delimiter}\n{value}{newline}{delimiter}\n")
    } else {
        format!("{name}={value}\n")
    }
}

fn text(value: Option<&str>) -> &str {
    value.unwrap_or_default()
}

/// Export the run fields of `result`. `status` is `Success` or `Error` for the flow as a whole.
pub fn export_run_result(
    sink: &mut dyn OutputSink,
    result: &RunResult,
    succeeded: bool,
) -> Result<()> {
    let phase = result.phase.unwrap_or(Phase::Plan);
    let counts = &result.counts;
    let pairs = [
        ("status", if succeeded { "Success" } else { "Error" }.to_string()),
        ("workspace_id", text(result.workspace_id.as_deref()).to_string()),
        ("project_id", text(result.project_id.as_deref()).to_string()),
        (
            "configuration_version_id",
            text(result.configuration_version_id.as_deref()).to_string(),
        ),
        (
            "configuration_version_status",
            text(result.configuration_version_status.as_deref()).to_string(),
        ),
        ("run_id", result.run_id.clone()),
        ("run_status", result.status.as_str().to_string()),
        ("run_message", text(result.run_message.as_deref()).to_string()),
        ("run_link", text(result.run_link.as_deref()).to_string()),
        (
            match phase {
                Phase::Plan => "plan_id",
                Phase::Apply => "apply_id",
            },
            text(result.phase_id.as_deref()).to_string(),
        ),
        (
            match phase {
                Phase::Plan => "plan_status",
                Phase::Apply => "apply_status",
            },
            text(result.phase_status.as_deref()).to_string(),
        ),
        (
            "cost_estimation_id",
            text(result.cost_estimation_id.as_deref()).to_string(),
        ),
        (
            "cost_estimation_status",
            text(result.cost_estimation_status.as_deref()).to_string(),
        ),
        ("changes", counts.has_changes().to_string()),
        ("resource_count", result.resource_count.to_string()),
        ("resource_imports", counts.import.to_string()),
        ("resource_additions", counts.add.to_string()),
        ("resource_changes", counts.change.to_string()),
        ("resource_destructions", counts.destroy.to_string()),
    ];
    for (name, value) in pairs {
        sink.set(name, &value)?;
    }
    Ok(())
}

/// Export the path of a rendered phase report as `plan_summary` / `apply_summary`.
pub fn export_summary_path(sink: &mut dyn OutputSink, phase: Phase, path: &Path) -> Result<()> {
    sink.set(
        &format!("{}_summary", phase.as_str()),
        &path.to_string_lossy(),
    )
}

pub fn export_state_outputs(sink: &mut dyn OutputSink, outputs: &StateOutputs) -> Result<()> {
    let encoded = serde_json::to_string(outputs).context("encode state outputs")?;
    sink.set("state_version_outputs", &encoded)
}
