//! The gate between a finished plan and an apply request.

use crate::core::status::RunStatus;
use crate::core::types::RunActions;

/// What the plan+apply flow does once the plan has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Request the apply.
    Apply,
    /// The run can only be abandoned: discard it and fail the flow.
    Discard,
}

/// Decide between apply and discard from the run's remote-computed actions.
///
/// Only `confirmable == false && discardable == true` discards. Every other combination,
/// including a run that is neither, attempts the apply and lets the remote side reject it.
pub fn evaluate_gate(actions: &RunActions) -> GateDecision {
    if !actions.is_confirmable && actions.is_discardable {
        GateDecision::Discard
    } else {
        GateDecision::Apply
    }
}

/// A speculative plan succeeds only when it lands exactly on `planned_and_finished`.
pub fn speculative_succeeded(status: &RunStatus) -> bool {
    *status == RunStatus::PlannedAndFinished
}

/// An apply succeeds only when it lands on `applied`.
pub fn apply_succeeded(status: &RunStatus) -> bool {
    *status == RunStatus::Applied
}
