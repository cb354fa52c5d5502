//! Plan-only (speculative) flow.

use tracing::{error, info, instrument, warn};

use crate::core::decision::speculative_succeeded;
use crate::core::types::{Phase, Run, RunResult};
use crate::io::remote::RemoteClient;
use crate::outcome::{FlowFailure, FlowOutcome, PhaseReport};
use crate::poll::{Clock, PollOptions, fetch_execution_summary};
use crate::prepare::prepare_run;
use crate::settings::Settings;
use crate::summary::{ReportOptions, write_report};

/// Wait for `phase` of `run`, then write its report.
///
/// Always returns a report: when polling fails or times out the report reflects whatever
/// was observed (at worst what creation returned), together with the failure.
pub(crate) fn observe_phase<C, K>(
    client: &C,
    clock: &K,
    settings: &Settings,
    run: &Run,
    phase: Phase,
) -> (PhaseReport, Option<FlowFailure>)
where
    C: RemoteClient + ?Sized,
    K: Clock + ?Sized,
{
    let tunables = &settings.tunables;
    let options = PollOptions {
        timeout: match phase {
            Phase::Plan => tunables.plan_timeout(),
            Phase::Apply => tunables.apply_timeout(),
        },
        interval: tunables.poll_interval(),
    };
    let (mut result, timed_out, failure) = match fetch_execution_summary(
        client,
        clock,
        &run.id,
        phase,
        options,
        &settings.artifact_dir,
    ) {
        Ok(summary) => {
            let failure = summary.timed_out.then(|| FlowFailure::Timeout {
                run_id: run.id.clone(),
                phase,
                link: None,
            });
            (summary.result, summary.timed_out, failure)
        }
        Err(err) => {
            let mut partial = RunResult::from_run(run);
            partial.phase = Some(phase);
            (partial, false, Some(FlowFailure::from_remote(err)))
        }
    };
    result.backfill_from(run);
    if result.workspace_name.is_none() {
        result.workspace_name = Some(settings.workspace.name.clone());
    }

    let report_options = ReportOptions {
        label: settings.label.clone(),
        log_tail_lines: tunables.log_tail_lines,
    };
    let summary_path = match write_report(&result, &report_options, &settings.artifact_dir) {
        Ok(path) => Some(path),
        Err(err) => {
            warn!(run_id = %run.id, phase = %phase, "failed to write summary: {err:#}");
            None
        }
    };
    let failure = failure.map(|failure| failure.with_link(result.run_link.as_deref()));
    (
        PhaseReport {
            result,
            summary_path,
            timed_out,
        },
        failure,
    )
}

/// Run a speculative plan and wait for it.
///
/// Succeeds only when the plan ends in exactly `planned_and_finished`.
#[instrument(skip_all, fields(workspace = %settings.workspace.name))]
pub fn run_plan_flow<C, K>(client: &C, clock: &K, settings: &Settings) -> FlowOutcome
where
    C: RemoteClient + ?Sized,
    K: Clock + ?Sized,
{
    let prepared = match prepare_run(client, settings, true) {
        Ok(prepared) => prepared,
        Err(err) => {
            error!(err = %err, "plan preparation failed");
            return FlowOutcome::failed(FlowFailure::from_remote(err));
        }
    };

    let (plan, failure) = observe_phase(client, clock, settings, &prepared.run, Phase::Plan);
    let failure = failure.or_else(|| {
        let result = &plan.result;
        (!speculative_succeeded(&result.status)).then(|| FlowFailure::PlanFailed {
            run_id: result.run_id.clone(),
            status: result.status.clone(),
            link: result.run_link.clone(),
        })
    });
    match &failure {
        Some(failure) => error!(run_id = %plan.result.run_id, "{failure}"),
        None => info!(run_id = %plan.result.run_id, counts = ?plan.result.counts, "speculative plan finished"),
    }
    FlowOutcome {
        plan: Some(plan),
        failure,
        ..FlowOutcome::default()
    }
}
