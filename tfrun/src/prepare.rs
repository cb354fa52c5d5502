//! Steps shared by both flows: workspace, variables, configuration upload and run creation.

use tracing::{info, instrument};

use crate::core::types::{
    ConfigurationStatus, ConfigurationVersion, Run, VariableCategory, WorkspaceRef,
};
use crate::io::remote::{RemoteClient, RemoteError, RemoteErrorKind};
use crate::settings::Settings;

/// A created run and what it was created from.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRun {
    pub workspace: WorkspaceRef,
    pub configuration: ConfigurationVersion,
    pub run: Run,
}

/// Configure the workspace, upload variables and configuration, then create the run.
///
/// Each variable category is uploaded with its own call and skipped when empty. The first
/// failing step ends preparation; nothing is retried.
#[instrument(skip_all, fields(workspace = %settings.workspace.name, plan_only = plan_only))]
pub fn prepare_run<C>(
    client: &C,
    settings: &Settings,
    plan_only: bool,
) -> Result<PreparedRun, RemoteError>
where
    C: RemoteClient + ?Sized,
{
    let workspace = client.configure_workspace(&settings.workspace)?;
    info!(workspace_id = %workspace.id, "workspace configured");

    for category in [VariableCategory::Terraform, VariableCategory::Env] {
        let variables = settings.variables.of_category(category);
        if variables.is_empty() {
            continue;
        }
        client.upload_variables(&workspace, &variables)?;
        info!(
            category = category.as_str(),
            count = variables.len(),
            "variables uploaded"
        );
    }

    let configuration =
        client.upload_configuration(&workspace, &settings.directory, plan_only)?;
    if configuration.status == ConfigurationStatus::Errored {
        return Err(RemoteError::new(
            RemoteErrorKind::Upload,
            format!("configuration version {} errored", configuration.id),
        ));
    }

    let run = client.create_run(&workspace, &configuration, &settings.message, plan_only)?;
    info!(run_id = %run.id, link = run.link.as_deref().unwrap_or_default(), "run created");
    Ok(PreparedRun {
        workspace,
        configuration,
        run,
    })
}
