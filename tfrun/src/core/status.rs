//! Closed enumeration of remote run statuses and their health classification.
//!
//! The remote platform reports statuses as free-form strings. Known values map to
//! [`RunStatus`] variants; anything else is preserved verbatim in
//! [`RunStatus::Unknown`] so new remote-side statuses degrade gracefully.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::core::types::Phase;

/// Status of a run as observed on the remote platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum RunStatus {
    #[default]
    Pending,
    Fetching,
    FetchingCompleted,
    PrePlanRunning,
    PrePlanCompleted,
    Queuing,
    PlanQueued,
    Planning,
    Planned,
    CostEstimating,
    CostEstimated,
    PolicyChecking,
    PolicyOverride,
    PolicySoftFailed,
    PolicyChecked,
    Confirmed,
    PostPlanRunning,
    PostPlanCompleted,
    PlannedAndFinished,
    PlannedAndSaved,
    ApplyQueued,
    QueuingApply,
    PreApplyRunning,
    PreApplyCompleted,
    Applying,
    Applied,
    Discarded,
    Errored,
    Canceled,
    ForceCanceled,
    /// A status string this build does not recognise.
    Unknown(String),
}

/// Coarse health classification used by the summary indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Failed,
    Warning,
    Unknown,
}

impl Health {
    pub fn as_str(self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Failed => "failed",
            Health::Warning => "warning",
            Health::Unknown => "unknown",
        }
    }

    /// Colored marker shown next to report headings.
    pub fn symbol(self) -> &'static str {
        match self {
            Health::Healthy => "🟢",
            Health::Failed => "🔴",
            Health::Warning => "🟡",
            Health::Unknown => "⚪",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const KNOWN: &[(&str, RunStatus)] = &[
    ("pending", RunStatus::Pending),
    ("fetching", RunStatus::Fetching),
    ("fetching_completed", RunStatus::FetchingCompleted),
    ("pre_plan_running", RunStatus::PrePlanRunning),
    ("pre_plan_completed", RunStatus::PrePlanCompleted),
    ("queuing", RunStatus::Queuing),
    ("plan_queued", RunStatus::PlanQueued),
    ("planning", RunStatus::Planning),
    ("planned", RunStatus::Planned),
    ("cost_estimating", RunStatus::CostEstimating),
    ("cost_estimated", RunStatus::CostEstimated),
    ("policy_checking", RunStatus::PolicyChecking),
    ("policy_override", RunStatus::PolicyOverride),
    ("policy_soft_failed", RunStatus::PolicySoftFailed),
    ("policy_checked", RunStatus::PolicyChecked),
    ("confirmed", RunStatus::Confirmed),
    ("post_plan_running", RunStatus::PostPlanRunning),
    ("post_plan_completed", RunStatus::PostPlanCompleted),
    ("planned_and_finished", RunStatus::PlannedAndFinished),
    ("planned_and_saved", RunStatus::PlannedAndSaved),
    ("apply_queued", RunStatus::ApplyQueued),
    ("queuing_apply", RunStatus::QueuingApply),
    ("pre_apply_running", RunStatus::PreApplyRunning),
    ("pre_apply_completed", RunStatus::PreApplyCompleted),
    ("applying", RunStatus::Applying),
    ("applied", RunStatus::Applied),
    ("discarded", RunStatus::Discarded),
    ("errored", RunStatus::Errored),
    ("canceled", RunStatus::Canceled),
    ("force_canceled", RunStatus::ForceCanceled),
];

impl RunStatus {
    /// Parse a remote status string. Never fails: unrecognised values become `Unknown`.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        KNOWN
            .iter()
            .find(|(name, _)| *name == normalized)
            .map(|(_, status)| status.clone())
            .unwrap_or_else(|| RunStatus::Unknown(raw.trim().to_string()))
    }

    pub fn as_str(&self) -> &str {
        if let RunStatus::Unknown(raw) = self {
            return raw;
        }
        KNOWN
            .iter()
            .find(|(_, status)| status == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// No further remote transition will happen without a new run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::PlannedAndFinished
                | RunStatus::Applied
                | RunStatus::Errored
                | RunStatus::Discarded
                | RunStatus::Canceled
                | RunStatus::ForceCanceled
        )
    }

    /// The run is parked on a policy result and needs an override or a discard.
    pub fn awaits_override(&self) -> bool {
        matches!(self, RunStatus::PolicyOverride | RunStatus::PolicySoftFailed)
    }

    /// Whether an observation with this status ends polling for `phase`.
    ///
    /// Plan observations also settle once the run is confirmable; that flag comes from the
    /// run's actions, so callers combine it with this check.
    pub fn settles(&self, phase: Phase) -> bool {
        match phase {
            Phase::Plan => self.is_terminal() || self.awaits_override(),
            Phase::Apply => self.is_terminal(),
        }
    }

    /// Health classification shown in summaries.
    ///
    /// Unknown statuses fall back to substring matching on the raw value and are logged.
    pub fn health(&self) -> Health {
        match self {
            RunStatus::Applied
            | RunStatus::PlannedAndFinished
            | RunStatus::Planned
            | RunStatus::PlannedAndSaved
            | RunStatus::PolicyChecked
            | RunStatus::PostPlanCompleted => Health::Healthy,
            RunStatus::Errored
            | RunStatus::PolicySoftFailed
            | RunStatus::Discarded
            | RunStatus::Canceled
            | RunStatus::ForceCanceled => Health::Failed,
            RunStatus::PolicyOverride => Health::Warning,
            RunStatus::Unknown(raw) => {
                warn!(status = %raw, "unrecognised run status");
                health_from_substring(raw)
            }
            _ => Health::Unknown,
        }
    }
}

/// Substring classification for statuses without an explicit mapping.
pub fn health_from_substring(raw: &str) -> Health {
    let raw = raw.to_ascii_lowercase();
    if ["applied", "finished", "planned", "policy_checked", "post_plan_completed"]
        .iter()
        .any(|needle| raw.contains(needle))
    {
        Health::Healthy
    } else if raw.contains("error") || raw.contains("fail") {
        Health::Failed
    } else if raw.contains("override") {
        Health::Warning
    } else {
        Health::Unknown
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(RunStatus::parse(&raw))
    }
}
