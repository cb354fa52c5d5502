//! Flow results, the failure taxonomy and exit-code mapping.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::status::RunStatus;
use crate::core::types::{Phase, RunResult, StateOutputs, ValidationError};
use crate::exit_codes;
use crate::io::remote::{RemoteError, RemoteErrorKind};

/// Why a flow did not succeed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowFailure {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("authentication failed: {0}")]
    Auth(RemoteError),
    #[error("{0}")]
    Remote(RemoteError),
    /// The run refused a transition; the run was discarded when possible.
    #[error("{source}")]
    Conflict { source: RemoteError, discarded: bool },
    #[error("timed out waiting for the {phase} of run {run_id}")]
    Timeout {
        run_id: String,
        phase: Phase,
        link: Option<String>,
    },
    #[error("run {run_id} is not confirmable{}", discard_note(.discarded))]
    PolicyBlocked {
        run_id: String,
        link: Option<String>,
        discarded: bool,
    },
    #[error("plan of run {run_id} finished with status {status}")]
    PlanFailed {
        run_id: String,
        status: RunStatus,
        link: Option<String>,
    },
    #[error("apply of run {run_id} finished with status {status}")]
    ApplyFailed {
        run_id: String,
        status: RunStatus,
        link: Option<String>,
    },
}

fn discard_note(discarded: &bool) -> &'static str {
    if *discarded { " and was discarded" } else { "" }
}

impl FlowFailure {
    /// Classify a remote error that ends a flow.
    pub fn from_remote(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::Auth => FlowFailure::Auth(err),
            RemoteErrorKind::Conflict => FlowFailure::Conflict {
                source: err,
                discarded: false,
            },
            _ => FlowFailure::Remote(err),
        }
    }

    /// Process exit code: a failing remote command's own non-zero code, otherwise 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            FlowFailure::Auth(err) | FlowFailure::Remote(err) => err
                .exit_code
                .filter(|code| *code != exit_codes::OK)
                .unwrap_or(exit_codes::FAILED),
            _ => exit_codes::FAILED,
        }
    }

    pub fn run_link(&self) -> Option<&str> {
        match self {
            FlowFailure::Validation(_) => None,
            FlowFailure::Auth(err) | FlowFailure::Remote(err) => err.run_link.as_deref(),
            FlowFailure::Conflict { source, .. } => source.run_link.as_deref(),
            FlowFailure::Timeout { link, .. }
            | FlowFailure::PolicyBlocked { link, .. }
            | FlowFailure::PlanFailed { link, .. }
            | FlowFailure::ApplyFailed { link, .. } => link.as_deref(),
        }
    }

    /// Captured error stream of the failing remote call, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            FlowFailure::Auth(err)
            | FlowFailure::Remote(err)
            | FlowFailure::Conflict { source: err, .. } => err.stderr.as_deref(),
            _ => None,
        }
    }

    /// User-facing message: the failure, the run link when known, then captured stderr.
    pub fn report(&self) -> String {
        let mut message = self.to_string();
        if let Some(link) = self.run_link() {
            message.push_str(&format!("\nRun: {link}"));
        }
        if let Some(stderr) = self.stderr() {
            message.push('\n');
            message.push_str(stderr.trim_end());
        }
        message
    }

    /// Attach a link learned later in the flow when the failure has none.
    pub fn with_link(mut self, known: Option<&str>) -> Self {
        let Some(known) = known else {
            return self;
        };
        match &mut self {
            FlowFailure::Auth(err) | FlowFailure::Remote(err) => {
                if err.run_link.is_none() {
                    err.run_link = Some(known.to_string());
                }
            }
            FlowFailure::Conflict { source, .. } => {
                if source.run_link.is_none() {
                    source.run_link = Some(known.to_string());
                }
            }
            FlowFailure::Timeout { link, .. }
            | FlowFailure::PolicyBlocked { link, .. }
            | FlowFailure::PlanFailed { link, .. }
            | FlowFailure::ApplyFailed { link, .. } => {
                if link.is_none() {
                    *link = Some(known.to_string());
                }
            }
            FlowFailure::Validation(_) => {}
        }
        self
    }
}

/// One observed phase and where its report was written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseReport {
    pub result: RunResult,
    pub summary_path: Option<PathBuf>,
    pub timed_out: bool,
}

/// Everything a flow produced, successful or not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowOutcome {
    pub plan: Option<PhaseReport>,
    pub apply: Option<PhaseReport>,
    pub state_outputs: Option<StateOutputs>,
    /// A compensating discard was issued and accepted.
    pub discarded: bool,
    pub failure: Option<FlowFailure>,
}

impl FlowOutcome {
    pub fn failed(failure: FlowFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn exit_code(&self) -> i32 {
        self.failure
            .as_ref()
            .map_or(exit_codes::OK, FlowFailure::exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failures_propagate_command_exit_code() {
        let err = RemoteError::transport("tfci run apply failed").with_exit_code(Some(3));
        assert_eq!(FlowFailure::from_remote(err).exit_code(), 3);
        let err = RemoteError::transport("network down");
        assert_eq!(FlowFailure::from_remote(err).exit_code(), exit_codes::FAILED);
    }

    #[test]
    fn discard_path_failures_exit_with_one() {
        let failure = FlowFailure::PolicyBlocked {
            run_id: "run-1".to_string(),
            link: None,
            discarded: true,
        };
        assert_eq!(failure.exit_code(), exit_codes::FAILED);
        assert_eq!(failure.to_string(), "run run-1 is not confirmable and was discarded");

        let conflict = FlowFailure::from_remote(
            RemoteError::new(RemoteErrorKind::Conflict, "not confirmable").with_exit_code(Some(4)),
        );
        assert_eq!(conflict.exit_code(), exit_codes::FAILED);
    }

    #[test]
    fn report_includes_link_and_stderr() {
        let failure = FlowFailure::from_remote(
            RemoteError::transport("tfci upload failed")
                .with_stderr("Error: bundle too large\n"),
        )
        .with_link(Some("https://app.terraform.io/app/acme/workspaces/net/runs/run-1"));
        assert_eq!(
            failure.report(),
            "transport error: tfci upload failed\nRun: https://app.terraform.io/app/acme/workspaces/net/runs/run-1\nError: bundle too large"
        );
    }

    #[test]
    fn outcome_exit_code_follows_failure() {
        assert_eq!(FlowOutcome::default().exit_code(), exit_codes::OK);
        let outcome = FlowOutcome::failed(FlowFailure::Validation(ValidationError::new(
            "organization is required",
        )));
        assert!(!outcome.succeeded());
        assert_eq!(outcome.exit_code(), exit_codes::FAILED);
    }
}
