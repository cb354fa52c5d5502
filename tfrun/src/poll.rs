//! Bounded polling of a run until it settles for a phase.
//!
//! [`fetch_execution_summary`] is the suspension point of every flow: it observes the run
//! repeatedly until the phase settles or the deadline passes, then collects artifacts and
//! returns the populated [`RunResult`].

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::core::log_counts::counts_from_log;
use crate::core::types::{Phase, RunResult};
use crate::io::artifacts::read_non_blank;
use crate::io::config::MAX_DURATION_SECS;
use crate::io::remote::{RemoteClient, RemoteError, RemoteErrorKind, RunSnapshot};

/// Time source for polling, replaceable in tests.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time and real sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub timeout: Duration,
    pub interval: Duration,
}

/// Result of waiting on a phase: the last observation, if any succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub snapshot: Option<RunSnapshot>,
    pub timed_out: bool,
}

/// What [`fetch_execution_summary`] learned about a phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSummary {
    pub result: RunResult,
    pub timed_out: bool,
}

/// Whether `snapshot` ends polling for `phase`.
///
/// Plans also settle once the run is confirmable, since a run waiting for confirmation
/// does not move on by itself.
pub fn observation_settles(snapshot: &RunSnapshot, phase: Phase) -> bool {
    let result = &snapshot.result;
    result.status.settles(phase) || (phase == Phase::Plan && result.actions.is_confirmable)
}

/// Observe `run_id` until it settles for `phase` or `options.timeout` elapses.
///
/// Transport failures of single observations are logged and retried until the deadline;
/// any other remote error ends polling.
#[instrument(skip(client, clock, options))]
pub fn wait_for_phase<C, K>(
    client: &C,
    clock: &K,
    run_id: &str,
    phase: Phase,
    options: PollOptions,
) -> Result<Observation, RemoteError>
where
    C: RemoteClient + ?Sized,
    K: Clock + ?Sized,
{
    let deadline = deadline_after(clock.now(), options.timeout);
    let mut last = None;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match client.show_run(run_id, phase) {
            Ok(snapshot) => {
                debug!(attempts, status = %snapshot.result.status, "observed run");
                if observation_settles(&snapshot, phase) {
                    info!(status = %snapshot.result.status, attempts, "run settled");
                    return Ok(Observation {
                        snapshot: Some(snapshot),
                        timed_out: false,
                    });
                }
                last = Some(snapshot);
            }
            Err(err) if err.is(RemoteErrorKind::Transport) => {
                warn!(attempts, err = %err, "observation failed, retrying");
            }
            Err(err) => return Err(err),
        }

        let now = clock.now();
        if now >= deadline {
            warn!(
                attempts,
                timeout_secs = options.timeout.as_secs(),
                "run did not settle before the deadline"
            );
            return Ok(Observation {
                snapshot: last,
                timed_out: true,
            });
        }
        clock.sleep(options.interval.min(deadline - now));
    }
}

/// `now + timeout`, saturating at the longest configurable wait.
fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(Duration::from_secs(MAX_DURATION_SECS)))
        .unwrap_or(now)
}

/// Poll the run for `phase`, then collect its artifacts into `artifact_dir`.
///
/// On timeout the result reflects the last observation (or only the run id when nothing
/// could be observed) so a partial summary can still be rendered. Counts the platform left
/// null are derived from the downloaded execution log.
pub fn fetch_execution_summary<C, K>(
    client: &C,
    clock: &K,
    run_id: &str,
    phase: Phase,
    options: PollOptions,
    artifact_dir: &Path,
) -> Result<PhaseSummary, RemoteError>
where
    C: RemoteClient + ?Sized,
    K: Clock + ?Sized,
{
    let observation = wait_for_phase(client, clock, run_id, phase, options)?;
    let Some(snapshot) = observation.snapshot else {
        return Ok(PhaseSummary {
            result: RunResult {
                phase: Some(phase),
                run_id: run_id.to_string(),
                ..RunResult::default()
            },
            timed_out: observation.timed_out,
        });
    };

    let mut result = snapshot.result.clone();
    match client.download_artifacts(&snapshot, phase, artifact_dir) {
        Ok(artifacts) => result.artifacts = artifacts,
        Err(err) => warn!(run_id, phase = %phase, err = %err, "artifact download failed"),
    }
    if !snapshot.counts_known
        && let Some(log) = read_non_blank(result.artifacts.execution_log.as_deref())
    {
        result.counts = counts_from_log(&log, phase);
        debug!(counts = ?result.counts, "counted changes from execution log");
    }
    Ok(PhaseSummary {
        result,
        timed_out: observation.timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::RunStatus;
    use crate::core::types::ChangeCounts;
    use crate::test_support::{ManualClock, ScriptedRemote, snapshot};

    fn options() -> PollOptions {
        PollOptions {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(5),
        }
    }

    #[test]
    fn polls_until_terminal_status() {
        let remote = ScriptedRemote::new().with_snapshots(
            Phase::Plan,
            vec![
                Ok(snapshot("run-1", RunStatus::PlanQueued)),
                Ok(snapshot("run-1", RunStatus::Planning)),
                Ok(snapshot("run-1", RunStatus::PlannedAndFinished)),
            ],
        );
        let clock = ManualClock::new();
        let observation =
            wait_for_phase(&remote, &clock, "run-1", Phase::Plan, options()).expect("poll");
        assert!(!observation.timed_out);
        assert_eq!(
            observation.snapshot.expect("snapshot").result.status,
            RunStatus::PlannedAndFinished
        );
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn huge_timeout_saturates_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(
            deadline_after(now, Duration::MAX),
            now + Duration::from_secs(MAX_DURATION_SECS)
        );
        let remote = ScriptedRemote::new().with_snapshots(
            Phase::Plan,
            vec![
                Ok(snapshot("run-1", RunStatus::Planning)),
                Ok(snapshot("run-1", RunStatus::PlannedAndFinished)),
            ],
        );
        let options = PollOptions {
            timeout: Duration::MAX,
            interval: Duration::from_secs(5),
        };
        let observation = wait_for_phase(&remote, &ManualClock::new(), "run-1", Phase::Plan, options)
            .expect("poll");
        assert!(!observation.timed_out);
    }

    #[test]
    fn confirmable_plan_settles() {
        let mut waiting = snapshot("run-1", RunStatus::CostEstimated);
        waiting.result.actions.is_confirmable = true;
        let remote = ScriptedRemote::new().with_snapshots(Phase::Plan, vec![Ok(waiting)]);
        let observation = wait_for_phase(&remote, &ManualClock::new(), "run-1", Phase::Plan, options())
            .expect("poll");
        assert!(!observation.timed_out);
    }

    #[test]
    fn transport_errors_are_retried() {
        let remote = ScriptedRemote::new().with_snapshots(
            Phase::Apply,
            vec![
                Err(RemoteError::transport("connection reset")),
                Ok(snapshot("run-1", RunStatus::Applied)),
            ],
        );
        let observation =
            wait_for_phase(&remote, &ManualClock::new(), "run-1", Phase::Apply, options())
                .expect("poll");
        assert!(!observation.timed_out);
    }

    #[test]
    fn other_errors_stop_polling() {
        let remote = ScriptedRemote::new().with_snapshots(
            Phase::Plan,
            vec![Err(RemoteError::new(RemoteErrorKind::Auth, "bad token"))],
        );
        let err = wait_for_phase(&remote, &ManualClock::new(), "run-1", Phase::Plan, options())
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Auth);
    }

    #[test]
    fn deadline_ends_polling_with_last_observation() {
        let remote = ScriptedRemote::new()
            .with_snapshots(Phase::Plan, vec![Ok(snapshot("run-1", RunStatus::Planning))]);
        let clock = ManualClock::new();
        let observation =
            wait_for_phase(&remote, &clock, "run-1", Phase::Plan, options()).expect("poll");
        assert!(observation.timed_out);
        assert_eq!(
            observation.snapshot.expect("snapshot").result.status,
            RunStatus::Planning
        );
        assert_eq!(clock.elapsed(), Duration::from_secs(60));
    }

    #[test]
    fn null_counts_come_from_the_execution_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut settled = snapshot("run-1", RunStatus::PlannedAndFinished);
        settled.counts_known = false;
        let log = concat!(
            r#"{"type":"planned_change","hook":{"action":"create"}}"#,
            "\n",
            r#"{"type":"planned_change","hook":{"action":"delete"}}"#,
            "\n"
        );
        let remote = ScriptedRemote::new()
            .with_snapshots(Phase::Plan, vec![Ok(settled)])
            .with_execution_log(log);
        let summary = fetch_execution_summary(
            &remote,
            &ManualClock::new(),
            "run-1",
            Phase::Plan,
            options(),
            temp.path(),
        )
        .expect("summary");
        assert_eq!(
            summary.result.counts,
            ChangeCounts {
                import: 0,
                add: 1,
                change: 0,
                destroy: 1,
            }
        );
        assert!(summary.result.artifacts.execution_log.is_some());
    }
}
