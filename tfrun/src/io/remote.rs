//! The remote platform seam.
//!
//! [`RemoteClient`] decouples orchestration from the Terraform Cloud/Enterprise backends
//! (the HTTP API and the `tfci` tool). Tests use a scripted client that replays
//! predetermined observations without any network traffic.

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::core::types::{
    ArtifactPaths, ConfigurationVersion, Phase, Run, RunResult, StateOutputs, VariableSet,
    Workspace, WorkspaceRef,
};

/// Broad class of a remote failure, used to pick the flow's reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// Bad or missing credentials.
    Auth,
    /// The remote side rejected malformed input.
    Validation,
    /// Configuration upload failed.
    Upload,
    /// The requested transition is invalid for the run's current state.
    Conflict,
    NotFound,
    /// Network failure, unexpected response, or a failed/timed-out child process.
    Transport,
}

impl RemoteErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteErrorKind::Auth => "auth",
            RemoteErrorKind::Validation => "validation",
            RemoteErrorKind::Upload => "upload",
            RemoteErrorKind::Conflict => "conflict",
            RemoteErrorKind::NotFound => "not found",
            RemoteErrorKind::Transport => "transport",
        }
    }

    /// Map an HTTP status code to a kind.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => RemoteErrorKind::Auth,
            400 | 422 => RemoteErrorKind::Validation,
            404 => RemoteErrorKind::NotFound,
            409 => RemoteErrorKind::Conflict,
            _ => RemoteErrorKind::Transport,
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed remote call with whatever the backend captured about it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// Exit code of the remote command, when the call went through a child process.
    pub exit_code: Option<i32>,
    /// Captured error stream, surfaced verbatim.
    pub stderr: Option<String>,
    pub run_id: Option<String>,
    pub run_link: Option<String>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
            stderr: None,
            run_id: None,
            run_link: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transport, message)
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        if !stderr.trim().is_empty() {
            self.stderr = Some(stderr);
        }
        self
    }

    pub fn with_run(mut self, run_id: Option<String>, run_link: Option<String>) -> Self {
        self.run_id = run_id;
        self.run_link = run_link;
        self
    }

    pub fn is(&self, kind: RemoteErrorKind) -> bool {
        self.kind == kind
    }
}

/// One observation of a run for a phase, plus the remote references needed to collect its
/// artifacts afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSnapshot {
    pub result: RunResult,
    /// Temporary URL of the phase's execution log.
    pub log_read_url: Option<String>,
    /// Related link of the run's task stages, when the run has any.
    pub task_stages_link: Option<String>,
    pub policy_check_ids: Vec<String>,
    /// False when the remote side reported null counts and they must come from the log.
    pub counts_known: bool,
}

/// Operations against the remote platform. Every call either returns the populated result
/// or a [`RemoteError`]; none of them retry.
pub trait RemoteClient {
    /// Create-or-update the workspace. Calling it twice with the same input yields the same ref.
    fn configure_workspace(&self, workspace: &Workspace) -> Result<WorkspaceRef, RemoteError>;

    /// Upload one set of variables. On failure no entry of the set may be assumed present.
    fn upload_variables(
        &self,
        workspace: &WorkspaceRef,
        variables: &VariableSet,
    ) -> Result<(), RemoteError>;

    /// Bundle `directory` into a fresh configuration version.
    fn upload_configuration(
        &self,
        workspace: &WorkspaceRef,
        directory: &Path,
        speculative: bool,
    ) -> Result<ConfigurationVersion, RemoteError>;

    /// Returns once the remote side has accepted the run; its status may still be moving.
    fn create_run(
        &self,
        workspace: &WorkspaceRef,
        configuration: &ConfigurationVersion,
        message: &str,
        plan_only: bool,
    ) -> Result<Run, RemoteError>;

    /// Fails with a conflict when the run is not confirmable.
    fn apply_run(&self, run: &Run, comment: &str) -> Result<Run, RemoteError>;

    /// Fails with a conflict when the run is already terminal.
    fn discard_run(&self, run: &Run, comment: &str) -> Result<Run, RemoteError>;

    /// Observe the run once for `phase`.
    fn show_run(&self, run_id: &str, phase: Phase) -> Result<RunSnapshot, RemoteError>;

    /// Download the execution log and phase reports of an observation into `dir`.
    fn download_artifacts(
        &self,
        snapshot: &RunSnapshot,
        phase: Phase,
        dir: &Path,
    ) -> Result<ArtifactPaths, RemoteError>;

    /// Non-sensitive state outputs. Only meaningful after a successful apply.
    fn fetch_state_outputs(&self, run_id: &str) -> Result<StateOutputs, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_maps_to_kind() {
        assert_eq!(RemoteErrorKind::from_http_status(401), RemoteErrorKind::Auth);
        assert_eq!(RemoteErrorKind::from_http_status(403), RemoteErrorKind::Auth);
        assert_eq!(RemoteErrorKind::from_http_status(422), RemoteErrorKind::Validation);
        assert_eq!(RemoteErrorKind::from_http_status(404), RemoteErrorKind::NotFound);
        assert_eq!(RemoteErrorKind::from_http_status(409), RemoteErrorKind::Conflict);
        assert_eq!(RemoteErrorKind::from_http_status(502), RemoteErrorKind::Transport);
    }

    #[test]
    fn blank_stderr_is_dropped() {
        let err = RemoteError::transport("boom").with_stderr("  \n");
        assert_eq!(err.stderr, None);
        assert_eq!(err.to_string(), "transport error: boom");
    }
}
