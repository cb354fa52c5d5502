//! The production [`RemoteClient`]: run transitions through `tfci`, everything else through
//! the HTTP API.

use std::path::Path;

use crate::core::types::{
    ArtifactPaths, ConfigurationVersion, Phase, Run, StateOutputs, VariableSet, Workspace,
    WorkspaceRef,
};
use crate::io::remote::{RemoteClient, RemoteError, RunSnapshot};
use crate::io::tfc_api::{ApiSettings, TfcApi};
use crate::io::tfci::{TfciCommand, TfciSettings};

pub struct TfcClient {
    api: TfcApi,
    tfci: TfciCommand,
}

impl TfcClient {
    pub fn new(api: &ApiSettings, tfci: TfciSettings) -> Self {
        Self {
            api: TfcApi::new(api),
            tfci: TfciCommand::new(tfci),
        }
    }
}

impl RemoteClient for TfcClient {
    fn configure_workspace(&self, workspace: &Workspace) -> Result<WorkspaceRef, RemoteError> {
        self.api.configure_workspace(workspace)
    }

    fn upload_variables(
        &self,
        workspace: &WorkspaceRef,
        variables: &VariableSet,
    ) -> Result<(), RemoteError> {
        self.api.upload_variables(workspace, variables)
    }

    fn upload_configuration(
        &self,
        workspace: &WorkspaceRef,
        directory: &Path,
        speculative: bool,
    ) -> Result<ConfigurationVersion, RemoteError> {
        self.tfci.upload(workspace, directory, speculative)
    }

    fn create_run(
        &self,
        workspace: &WorkspaceRef,
        configuration: &ConfigurationVersion,
        message: &str,
        plan_only: bool,
    ) -> Result<Run, RemoteError> {
        self.tfci.create_run(workspace, configuration, message, plan_only)
    }

    fn apply_run(&self, run: &Run, comment: &str) -> Result<Run, RemoteError> {
        self.tfci.apply_run(run, comment)
    }

    fn discard_run(&self, run: &Run, comment: &str) -> Result<Run, RemoteError> {
        self.tfci.discard_run(run, comment)
    }

    fn show_run(&self, run_id: &str, phase: Phase) -> Result<RunSnapshot, RemoteError> {
        self.api.show_run(run_id, phase)
    }

    fn download_artifacts(
        &self,
        snapshot: &RunSnapshot,
        phase: Phase,
        dir: &Path,
    ) -> Result<ArtifactPaths, RemoteError> {
        self.api.download_artifacts(snapshot, phase, dir)
    }

    fn fetch_state_outputs(&self, run_id: &str) -> Result<StateOutputs, RemoteError> {
        self.api.fetch_state_outputs(run_id)
    }
}
