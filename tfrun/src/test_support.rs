//! Deterministic fakes for flow tests: a scripted remote client, a manual clock and an
//! in-memory output sink.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::core::status::RunStatus;
use crate::core::types::{
    ArtifactPaths, ChangeCounts, ConfigurationStatus, ConfigurationVersion, ExecutionMode,
    Phase, Run, RunActions, RunResult, StateOutputs, VariableCategory, VariableSet, Workspace,
    WorkspaceRef,
};
use crate::io::artifacts::write_artifact;
use crate::io::config::TfrunConfig;
use crate::io::outputs::OutputSink;
use crate::io::remote::{RemoteClient, RemoteError, RunSnapshot};
use crate::poll::Clock;
use crate::settings::{Connection, Settings};

pub const RUN_LINK: &str = "https://app.terraform.io/app/acme/workspaces/net-dev/runs/run-1";

/// One recorded call on [`ScriptedRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ConfigureWorkspace(String),
    /// Category and number of entries.
    UploadVariables(VariableCategory, usize),
    UploadConfiguration { speculative: bool },
    CreateRun { plan_only: bool },
    ApplyRun(String),
    DiscardRun { run_id: String, comment: String },
    ShowRun(String, Phase),
    DownloadArtifacts(Phase),
    FetchStateOutputs(String),
}

type Scripted<T> = Result<T, RemoteError>;

/// A [`RemoteClient`] that replays scripted answers and records every call.
///
/// Observations are consumed in order per phase; the last one repeats forever.
pub struct ScriptedRemote {
    calls: RefCell<Vec<Call>>,
    workspace: Scripted<WorkspaceRef>,
    variables_error: Option<RemoteError>,
    configuration: Scripted<ConfigurationVersion>,
    create: Scripted<Run>,
    apply: Option<Scripted<Run>>,
    discard: Option<Scripted<Run>>,
    snapshots: RefCell<HashMap<Phase, VecDeque<Scripted<RunSnapshot>>>>,
    execution_log: Option<String>,
    state_outputs: Scripted<StateOutputs>,
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRemote {
    /// Every step succeeds; run `run-1` plans to `planned_and_finished` and applies cleanly.
    pub fn new() -> Self {
        let mut snapshots = HashMap::new();
        snapshots.insert(
            Phase::Plan,
            VecDeque::from([Ok(snapshot("run-1", RunStatus::PlannedAndFinished))]),
        );
        snapshots.insert(
            Phase::Apply,
            VecDeque::from([Ok(snapshot("run-1", RunStatus::Applied))]),
        );
        Self {
            calls: RefCell::new(Vec::new()),
            workspace: Ok(WorkspaceRef {
                id: "ws-1".to_string(),
                name: "net-dev".to_string(),
                project_id: Some("prj-1".to_string()),
            }),
            variables_error: None,
            configuration: Ok(ConfigurationVersion {
                id: "cv-1".to_string(),
                status: ConfigurationStatus::Uploaded,
                speculative: false,
            }),
            create: Ok(created_run("run-1")),
            apply: None,
            discard: None,
            snapshots: RefCell::new(snapshots),
            execution_log: None,
            state_outputs: Ok(StateOutputs::new()),
        }
    }

    pub fn with_workspace(mut self, workspace: Scripted<WorkspaceRef>) -> Self {
        self.workspace = workspace;
        self
    }

    pub fn with_variables_error(mut self, err: RemoteError) -> Self {
        self.variables_error = Some(err);
        self
    }

    pub fn with_configuration(mut self, configuration: Scripted<ConfigurationVersion>) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_create(mut self, create: Scripted<Run>) -> Self {
        self.create = create;
        self
    }

    pub fn with_apply(mut self, apply: Scripted<Run>) -> Self {
        self.apply = Some(apply);
        self
    }

    pub fn with_discard(mut self, discard: Scripted<Run>) -> Self {
        self.discard = Some(discard);
        self
    }

    pub fn with_snapshots(self, phase: Phase, script: Vec<Scripted<RunSnapshot>>) -> Self {
        self.snapshots.borrow_mut().insert(phase, script.into());
        self
    }

    /// Log text written as the execution-log artifact of every download.
    pub fn with_execution_log(mut self, log: &str) -> Self {
        self.execution_log = Some(log.to_string());
        self
    }

    pub fn with_state_outputs(mut self, outputs: Scripted<StateOutputs>) -> Self {
        self.state_outputs = outputs;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

impl RemoteClient for ScriptedRemote {
    fn configure_workspace(&self, workspace: &Workspace) -> Result<WorkspaceRef, RemoteError> {
        self.record(Call::ConfigureWorkspace(workspace.name.clone()));
        self.workspace.clone()
    }

    fn upload_variables(
        &self,
        _workspace: &WorkspaceRef,
        variables: &VariableSet,
    ) -> Result<(), RemoteError> {
        let category = variables
            .entries()
            .first()
            .map_or(VariableCategory::Terraform, |variable| variable.category);
        self.record(Call::UploadVariables(category, variables.len()));
        match &self.variables_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn upload_configuration(
        &self,
        _workspace: &WorkspaceRef,
        _directory: &Path,
        speculative: bool,
    ) -> Result<ConfigurationVersion, RemoteError> {
        self.record(Call::UploadConfiguration { speculative });
        self.configuration.clone().map(|mut configuration| {
            configuration.speculative = speculative;
            configuration
        })
    }

    fn create_run(
        &self,
        _workspace: &WorkspaceRef,
        configuration: &ConfigurationVersion,
        message: &str,
        plan_only: bool,
    ) -> Result<Run, RemoteError> {
        self.record(Call::CreateRun { plan_only });
        self.create.clone().map(|mut run| {
            run.is_speculative = plan_only;
            run.message = Some(message.to_string());
            run.configuration_version_id = Some(configuration.id.clone());
            run
        })
    }

    fn apply_run(&self, run: &Run, _comment: &str) -> Result<Run, RemoteError> {
        self.record(Call::ApplyRun(run.id.clone()));
        match &self.apply {
            Some(scripted) => scripted.clone(),
            None => Ok(Run {
                status: RunStatus::ApplyQueued,
                ..run.clone()
            }),
        }
    }

    fn discard_run(&self, run: &Run, comment: &str) -> Result<Run, RemoteError> {
        self.record(Call::DiscardRun {
            run_id: run.id.clone(),
            comment: comment.to_string(),
        });
        match &self.discard {
            Some(scripted) => scripted.clone(),
            None => Ok(Run {
                status: RunStatus::Discarded,
                ..run.clone()
            }),
        }
    }

    fn show_run(&self, run_id: &str, phase: Phase) -> Result<RunSnapshot, RemoteError> {
        self.record(Call::ShowRun(run_id.to_string(), phase));
        let mut snapshots = self.snapshots.borrow_mut();
        let script = snapshots
            .get_mut(&phase)
            .ok_or_else(|| RemoteError::transport(format!("no {phase} observations scripted")))?;
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        next.unwrap_or_else(|| Err(RemoteError::transport("observation script is empty")))
            .map(|mut snapshot| {
                snapshot.result.phase = Some(phase);
                snapshot
            })
    }

    fn download_artifacts(
        &self,
        snapshot: &RunSnapshot,
        phase: Phase,
        dir: &Path,
    ) -> Result<ArtifactPaths, RemoteError> {
        self.record(Call::DownloadArtifacts(phase));
        let mut paths = ArtifactPaths::default();
        if let Some(log) = &self.execution_log {
            let stem = format!("{}-{phase}-execution-log", snapshot.result.run_id);
            let path = write_artifact(dir, &stem, log)
                .map_err(|err| RemoteError::transport(format!("{err:#}")))?;
            paths.execution_log = Some(path);
        }
        Ok(paths)
    }

    fn fetch_state_outputs(&self, run_id: &str) -> Result<StateOutputs, RemoteError> {
        self.record(Call::FetchStateOutputs(run_id.to_string()));
        self.state_outputs.clone()
    }
}

/// A run as creation returns it.
pub fn created_run(run_id: &str) -> Run {
    Run {
        id: run_id.to_string(),
        workspace_id: Some("ws-1".to_string()),
        status: RunStatus::PlanQueued,
        link: Some(RUN_LINK.replace("run-1", run_id)),
        ..Run::default()
    }
}

/// An observation with known counts and no available actions.
pub fn snapshot(run_id: &str, status: RunStatus) -> RunSnapshot {
    RunSnapshot {
        result: RunResult {
            workspace_name: Some("net-dev".to_string()),
            workspace_id: Some("ws-1".to_string()),
            run_id: run_id.to_string(),
            run_link: Some(RUN_LINK.replace("run-1", run_id)),
            status,
            ..RunResult::default()
        },
        counts_known: true,
        ..RunSnapshot::default()
    }
}

/// An observation with explicit counts and gate flags.
pub fn snapshot_with(
    run_id: &str,
    status: RunStatus,
    counts: ChangeCounts,
    is_confirmable: bool,
    is_discardable: bool,
) -> RunSnapshot {
    let mut snapshot = snapshot(run_id, status);
    snapshot.result.counts = counts;
    snapshot.result.actions = RunActions {
        is_confirmable,
        is_discardable,
        ..RunActions::default()
    };
    snapshot
}

pub fn counts(import: u64, add: u64, change: u64, destroy: u64) -> ChangeCounts {
    ChangeCounts {
        import,
        add,
        change,
        destroy,
    }
}

/// Settings for workspace `acme/net-dev` writing artifacts under `artifact_dir`.
pub fn test_settings(artifact_dir: &Path) -> Settings {
    let tunables = TfrunConfig {
        plan_timeout_secs: 300,
        apply_timeout_secs: 300,
        ..TfrunConfig::default()
    };
    Settings {
        connection: Connection {
            hostname: "app.terraform.io".to_string(),
            organization: Some("acme".to_string()),
            api_token: "tf-token".to_string(),
            verify_tls: true,
        },
        workspace: Workspace {
            hostname: "app.terraform.io".to_string(),
            organization: "acme".to_string(),
            project: None,
            name: "net-dev".to_string(),
            execution_mode: ExecutionMode::Remote,
            working_directory: None,
            terraform_version: None,
        },
        variables: VariableSet::new(),
        directory: PathBuf::from("."),
        artifact_dir: artifact_dir.to_path_buf(),
        message: "ci run".to_string(),
        label: "net-dev".to_string(),
        tunables,
    }
}

/// A clock that only moves when slept on.
pub struct ManualClock {
    start: Instant,
    elapsed: Cell<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
    }
}

/// Collects outputs in memory, in the order they were set.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutputs {
    pub entries: Vec<(String, String)>,
}

impl MemoryOutputs {
    /// Last value set for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl OutputSink for MemoryOutputs {
    fn set(&mut self, name: &str, value: &str) -> anyhow::Result<()> {
        self.entries.push((name.to_string(), value.to_string()));
        Ok(())
    }
}

type RecordedFields = Arc<Mutex<Vec<(String, String, String)>>>;

/// Records `(span, field, value)` for every field set when a span is created.
struct SpanFieldRecorder {
    fields: RecordedFields,
}

struct FieldVisitor<'a> {
    span: &'static str,
    fields: &'a mut Vec<(String, String, String)>,
}

impl Visit for FieldVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields
            .push((self.span.to_string(), field.name().to_string(), format!("{value:?}")));
    }
}

impl<S: Subscriber> Layer<S> for SpanFieldRecorder {
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        let mut fields = self.fields.lock().expect("span fields lock");
        attrs.record(&mut FieldVisitor {
            span: attrs.metadata().name(),
            fields: &mut fields,
        });
    }
}

/// Run `body` under a subscriber that captures span fields, returning them with its result.
pub fn capture_span_fields<R>(body: impl FnOnce() -> R) -> (R, Vec<(String, String, String)>) {
    let fields = RecordedFields::default();
    let subscriber = tracing_subscriber::registry().with(SpanFieldRecorder {
        fields: Arc::clone(&fields),
    });
    let result = tracing::subscriber::with_default(subscriber, body);
    let recorded = fields.lock().expect("span fields lock").clone();
    (result, recorded)
}

/// Whether `fields` holds `name = value` on span `span`.
pub fn has_span_field(fields: &[(String, String, String)], span: &str, name: &str, value: &str) -> bool {
    fields
        .iter()
        .any(|(s, n, v)| s == span && n == name && v == value)
}
