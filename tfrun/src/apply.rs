//! Plan+apply flow with the confirm-or-discard gate.
//!
//! The only compensating action is a discard: it runs when the plan is blocked
//! (not confirmable but discardable) or when the platform refuses the apply transition.
//! Discard failures are logged and never replace the failure that triggered them.

use tracing::{error, info, instrument, warn};

use crate::core::decision::{GateDecision, apply_succeeded, evaluate_gate};
use crate::core::types::{Phase, Run};
use crate::io::remote::{RemoteClient, RemoteErrorKind};
use crate::outcome::{FlowFailure, FlowOutcome};
use crate::plan::observe_phase;
use crate::poll::Clock;
use crate::prepare::prepare_run;
use crate::settings::Settings;

/// Best-effort discard. Returns whether the platform accepted it.
fn compensate<C>(client: &C, run: &Run, comment: &str) -> bool
where
    C: RemoteClient + ?Sized,
{
    match client.discard_run(run, comment) {
        Ok(discarded) => {
            info!(run_id = %run.id, status = %discarded.status, "run discarded");
            true
        }
        Err(err) => {
            warn!(run_id = %run.id, err = %err, "discard failed");
            false
        }
    }
}

/// Plan, gate, apply, then fetch state outputs.
///
/// The plan report is written whatever the plan outcome. A failed preparation (including
/// run creation) ends the flow without any apply attempt.
#[instrument(skip_all, fields(workspace = %settings.workspace.name))]
pub fn run_apply_flow<C, K>(client: &C, clock: &K, settings: &Settings) -> FlowOutcome
where
    C: RemoteClient + ?Sized,
    K: Clock + ?Sized,
{
    let prepared = match prepare_run(client, settings, false) {
        Ok(prepared) => prepared,
        Err(err) => {
            error!(err = %err, "run preparation failed");
            return FlowOutcome::failed(FlowFailure::from_remote(err));
        }
    };

    let (plan, failure) = observe_phase(client, clock, settings, &prepared.run, Phase::Plan);
    let mut outcome = FlowOutcome {
        plan: Some(plan.clone()),
        ..FlowOutcome::default()
    };
    if let Some(failure) = failure {
        error!(run_id = %prepared.run.id, "{failure}");
        outcome.failure = Some(failure);
        return outcome;
    }

    let mut run = plan.result.to_run();
    run.plan_id.clone_from(&plan.result.phase_id);
    let link = plan.result.run_link.clone();
    let comment = &settings.tunables.discard_comment;

    if evaluate_gate(&plan.result.actions) == GateDecision::Discard {
        warn!(run_id = %run.id, status = %run.status, "plan is not confirmable, discarding run");
        let discarded = compensate(client, &run, comment);
        outcome.discarded = discarded;
        outcome.failure = Some(FlowFailure::PolicyBlocked {
            run_id: run.id.clone(),
            link,
            discarded,
        });
        return outcome;
    }

    info!(run_id = %run.id, "applying run");
    if let Err(err) = client.apply_run(&run, &settings.message) {
        let failure = if err.is(RemoteErrorKind::Conflict) {
            warn!(run_id = %run.id, err = %err, "apply refused, discarding run");
            let discarded = compensate(client, &run, comment);
            outcome.discarded = discarded;
            FlowFailure::Conflict {
                source: err,
                discarded,
            }
        } else {
            FlowFailure::from_remote(err)
        };
        error!(run_id = %run.id, "{failure}");
        outcome.failure = Some(failure.with_link(link.as_deref()));
        return outcome;
    }

    let (mut apply, failure) = observe_phase(client, clock, settings, &run, Phase::Apply);
    if let Some(failure) = failure {
        error!(run_id = %run.id, "{failure}");
        outcome.apply = Some(apply);
        outcome.failure = Some(failure);
        return outcome;
    }
    if !apply_succeeded(&apply.result.status) {
        let failure = FlowFailure::ApplyFailed {
            run_id: run.id.clone(),
            status: apply.result.status.clone(),
            link: apply.result.run_link.clone(),
        };
        error!(run_id = %run.id, "{failure}");
        outcome.apply = Some(apply);
        outcome.failure = Some(failure);
        return outcome;
    }

    match client.fetch_state_outputs(&run.id) {
        Ok(outputs) => {
            info!(run_id = %run.id, count = outputs.len(), "apply finished");
            apply.result.state_outputs = Some(outputs.clone());
            outcome.state_outputs = Some(outputs);
        }
        Err(err) => {
            error!(run_id = %run.id, err = %err, "fetching state outputs failed");
            outcome.failure =
                Some(FlowFailure::from_remote(err).with_link(apply.result.run_link.as_deref()));
        }
    }
    outcome.apply = Some(apply);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::RunStatus;
    use crate::io::remote::RemoteError;
    use crate::test_support::{Call, ManualClock, ScriptedRemote, snapshot, test_settings};

    fn confirmable_plan() -> crate::io::remote::RunSnapshot {
        let mut plan = snapshot("run-1", RunStatus::Planned);
        plan.result.actions.is_confirmable = true;
        plan.result.actions.is_discardable = true;
        plan
    }

    #[test]
    fn refused_apply_is_discarded_and_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = test_settings(temp.path());
        let remote = ScriptedRemote::new()
            .with_snapshots(Phase::Plan, vec![Ok(confirmable_plan())])
            .with_apply(Err(RemoteError::new(RemoteErrorKind::Conflict, "run is not confirmable")
                .with_exit_code(Some(5))));
        let outcome = run_apply_flow(&remote, &ManualClock::new(), &settings);
        assert_eq!(outcome.exit_code(), crate::exit_codes::FAILED);
        assert!(outcome.discarded);
        assert_eq!(remote.count(|call| matches!(call, Call::DiscardRun { .. })), 1);
        assert!(outcome.apply.is_none());
    }

    #[test]
    fn apply_command_failure_propagates_its_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = test_settings(temp.path());
        let remote = ScriptedRemote::new()
            .with_snapshots(Phase::Plan, vec![Ok(confirmable_plan())])
            .with_apply(Err(RemoteError::transport("tfci run apply failed with exit code 3")
                .with_exit_code(Some(3))));
        let outcome = run_apply_flow(&remote, &ManualClock::new(), &settings);
        assert_eq!(outcome.exit_code(), 3);
        assert_eq!(remote.count(|call| matches!(call, Call::DiscardRun { .. })), 0);
    }

    #[test]
    fn errored_apply_fails_without_fetching_outputs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = test_settings(temp.path());
        let remote = ScriptedRemote::new()
            .with_snapshots(Phase::Plan, vec![Ok(confirmable_plan())])
            .with_snapshots(Phase::Apply, vec![Ok(snapshot("run-1", RunStatus::Errored))]);
        let outcome = run_apply_flow(&remote, &ManualClock::new(), &settings);
        assert!(matches!(outcome.failure, Some(FlowFailure::ApplyFailed { .. })));
        assert!(outcome.failure.as_ref().and_then(FlowFailure::run_link).is_some());
        assert_eq!(remote.count(|call| matches!(call, Call::FetchStateOutputs(_))), 0);
        assert!(outcome.apply.expect("apply").summary_path.is_some());
    }

    #[test]
    fn discard_failure_is_not_fatal_to_reporting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = test_settings(temp.path());
        let mut blocked = snapshot("run-1", RunStatus::PolicyOverride);
        blocked.result.actions.is_discardable = true;
        let remote = ScriptedRemote::new()
            .with_snapshots(Phase::Plan, vec![Ok(blocked)])
            .with_discard(Err(RemoteError::new(RemoteErrorKind::Conflict, "already discarded")));
        let outcome = run_apply_flow(&remote, &ManualClock::new(), &settings);
        assert!(!outcome.discarded);
        assert!(matches!(
            outcome.failure,
            Some(FlowFailure::PolicyBlocked {
                discarded: false,
                ..
            })
        ));
        assert_eq!(outcome.exit_code(), crate::exit_codes::FAILED);
    }
}
