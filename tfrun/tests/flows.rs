use std::fs;

use tfrun::apply::run_apply_flow;
use tfrun::core::status::RunStatus;
use tfrun::core::types::{Phase, StateOutputs};
use tfrun::exit_codes;
use tfrun::io::outputs::export_run_result;
use tfrun::io::remote::{RemoteError, RemoteErrorKind};
use tfrun::outcome::FlowFailure;
use tfrun::plan::run_plan_flow;
use tfrun::summary::parse_report;
use tfrun::test_support::{
    Call, ManualClock, MemoryOutputs, ScriptedRemote, counts, snapshot, snapshot_with,
    test_settings,
};

const PARTIAL_LOG: &str = r#"{"@level":"info","@message":"Terraform 1.9.5","type":"version"}
{"@level":"info","@message":"aws_vpc.main: Refreshing state...","type":"refresh_start"}"#;

#[test]
fn speculative_plan_with_changes_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let settings = test_settings(temp.path());
    let remote = ScriptedRemote::new().with_snapshots(
        Phase::Plan,
        vec![
            Ok(snapshot("run-1", RunStatus::PlanQueued)),
            Ok(snapshot("run-1", RunStatus::Planning)),
            Ok(snapshot_with(
                "run-1",
                RunStatus::PlannedAndFinished,
                counts(0, 3, 1, 0),
                false,
                false,
            )),
        ],
    );

    let outcome = run_plan_flow(&remote, &ManualClock::new(), &settings);

    assert_eq!(outcome.exit_code(), exit_codes::OK);
    let plan = outcome.plan.expect("plan report");
    let report = fs::read_to_string(plan.summary_path.expect("summary path")).expect("read");
    assert!(report.contains("3 to Add, 1 to Change"), "{report}");
    assert!(remote.calls().contains(&Call::UploadConfiguration { speculative: true }));
    assert!(remote.calls().contains(&Call::CreateRun { plan_only: true }));
    assert_eq!(remote.count(|call| matches!(call, Call::ApplyRun(_))), 0);
}

#[test]
fn blocked_plan_is_discarded_without_apply() {
    let temp = tempfile::tempdir().expect("tempdir");
    let settings = test_settings(temp.path());
    let remote = ScriptedRemote::new().with_snapshots(
        Phase::Plan,
        vec![Ok(snapshot_with(
            "run-1",
            RunStatus::PolicyOverride,
            counts(0, 1, 0, 0),
            false,
            true,
        ))],
    );

    let outcome = run_apply_flow(&remote, &ManualClock::new(), &settings);

    assert_eq!(outcome.exit_code(), exit_codes::FAILED);
    assert!(outcome.discarded);
    assert_eq!(remote.count(|call| matches!(call, Call::ApplyRun(_))), 0);
    assert_eq!(
        remote.count(|call| matches!(call, Call::DiscardRun { run_id, .. } if run_id == "run-1")),
        1
    );
    let failure = outcome.failure.expect("failure");
    assert!(matches!(failure, FlowFailure::PolicyBlocked { discarded: true, .. }));
    assert!(failure.report().contains("/runs/run-1"));
}

#[test]
fn applied_run_exports_state_outputs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let settings = test_settings(temp.path());
    let mut outputs = StateOutputs::new();
    outputs.insert("vpc_id".to_string(), serde_json::json!("vpc-0abc"));
    let remote = ScriptedRemote::new()
        .with_snapshots(
            Phase::Plan,
            vec![Ok(snapshot_with(
                "run-1",
                RunStatus::Planned,
                counts(0, 2, 0, 0),
                true,
                true,
            ))],
        )
        .with_snapshots(
            Phase::Apply,
            vec![
                Ok(snapshot("run-1", RunStatus::Applying)),
                Ok(snapshot_with("run-1", RunStatus::Applied, counts(0, 2, 0, 0), false, false)),
            ],
        )
        .with_state_outputs(Ok(outputs.clone()));

    let outcome = run_apply_flow(&remote, &ManualClock::new(), &settings);

    assert_eq!(outcome.exit_code(), exit_codes::OK);
    assert_eq!(outcome.state_outputs.as_ref(), Some(&outputs));
    let apply = outcome.apply.as_ref().expect("apply report");
    assert_eq!(apply.result.state_outputs.as_ref(), Some(&outputs));
    assert!(apply.summary_path.as_ref().expect("apply summary").exists());
    assert_eq!(
        remote.calls().last(),
        Some(&Call::FetchStateOutputs("run-1".to_string()))
    );

    let mut sink = MemoryOutputs::default();
    export_run_result(&mut sink, &apply.result, outcome.succeeded()).expect("export");
    assert_eq!(sink.get("status"), Some("Success"));
    assert_eq!(sink.get("run_status"), Some("applied"));
    assert_eq!(sink.get("resource_additions"), Some("2"));
}

#[test]
fn plan_timeout_still_renders_partial_summary() {
    let temp = tempfile::tempdir().expect("tempdir");
    let settings = test_settings(temp.path());
    let remote = ScriptedRemote::new()
        .with_snapshots(Phase::Plan, vec![Ok(snapshot("run-1", RunStatus::Planning))])
        .with_execution_log(PARTIAL_LOG);
    let clock = ManualClock::new();

    let outcome = run_plan_flow(&remote, &clock, &settings);

    assert!(clock.elapsed() >= settings.tunables.plan_timeout());
    assert!(matches!(
        outcome.failure,
        Some(FlowFailure::Timeout {
            phase: Phase::Plan,
            ..
        })
    ));
    assert_eq!(outcome.exit_code(), exit_codes::FAILED);
    let plan = outcome.plan.expect("plan report");
    assert!(plan.timed_out);
    let report = fs::read_to_string(plan.summary_path.expect("summary path")).expect("read");
    assert!(report.contains("Refreshing state..."), "{report}");
    assert!(report.contains("Status: planning"), "{report}");
}

#[test]
fn gate_discards_only_when_blocked() {
    for (is_confirmable, is_discardable) in [(true, true), (true, false), (false, true), (false, false)]
    {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = test_settings(temp.path());
        let remote = ScriptedRemote::new().with_snapshots(
            Phase::Plan,
            vec![Ok(snapshot_with(
                "run-1",
                RunStatus::PolicyOverride,
                counts(0, 1, 0, 0),
                is_confirmable,
                is_discardable,
            ))],
        );

        let outcome = run_apply_flow(&remote, &ManualClock::new(), &settings);

        let applies = remote.count(|call| matches!(call, Call::ApplyRun(_)));
        let discards = remote.count(|call| matches!(call, Call::DiscardRun { .. }));
        let case = format!("confirmable={is_confirmable} discardable={is_discardable}");
        if !is_confirmable && is_discardable {
            assert_eq!((applies, discards), (0, 1), "{case}");
            assert_ne!(outcome.exit_code(), exit_codes::OK, "{case}");
        } else {
            assert_eq!(applies, 1, "{case}");
            assert_eq!(discards, 0, "{case}");
        }
    }
}

#[test]
fn create_failure_aborts_before_apply() {
    let temp = tempfile::tempdir().expect("tempdir");
    let settings = test_settings(temp.path());
    let remote = ScriptedRemote::new().with_create(Err(RemoteError::new(
        RemoteErrorKind::Validation,
        "workspace is locked",
    )));

    let outcome = run_apply_flow(&remote, &ManualClock::new(), &settings);

    assert_eq!(outcome.exit_code(), exit_codes::FAILED);
    assert!(outcome.plan.is_none());
    assert!(
        !remote.calls().iter().any(|call| matches!(
            call,
            Call::ShowRun(..) | Call::ApplyRun(_) | Call::DiscardRun { .. }
        ))
    );
}

#[test]
fn repeated_flows_configure_the_same_workspace() {
    let temp = tempfile::tempdir().expect("tempdir");
    let settings = test_settings(temp.path());
    let remote = ScriptedRemote::new();
    let clock = ManualClock::new();

    let first = run_plan_flow(&remote, &clock, &settings);
    let second = run_plan_flow(&remote, &clock, &settings);

    let configured: Vec<Call> = remote
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::ConfigureWorkspace(_)))
        .collect();
    assert_eq!(configured.len(), 2);
    assert_eq!(configured[0], configured[1]);
    let workspace_of = |outcome: &tfrun::outcome::FlowOutcome| {
        outcome
            .plan
            .as_ref()
            .and_then(|plan| plan.result.workspace_id.clone())
    };
    assert_eq!(workspace_of(&first), Some("ws-1".to_string()));
    assert_eq!(workspace_of(&first), workspace_of(&second));
}

#[test]
fn rendered_report_parses_back() {
    let temp = tempfile::tempdir().expect("tempdir");
    let settings = test_settings(temp.path());
    let remote = ScriptedRemote::new().with_snapshots(
        Phase::Plan,
        vec![Ok(snapshot_with(
            "run-1",
            RunStatus::PlannedAndFinished,
            counts(2, 5, 1, 4),
            false,
            false,
        ))],
    );

    let outcome = run_plan_flow(&remote, &ManualClock::new(), &settings);

    let plan = outcome.plan.expect("plan report");
    let report = fs::read_to_string(plan.summary_path.expect("summary path")).expect("read");
    let parsed = parse_report(&report).expect("parse report");
    assert_eq!(parsed.status, plan.result.status.as_str());
    assert_eq!(parsed.counts, plan.result.counts);
}
