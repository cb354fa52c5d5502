//! Terraform Cloud/Enterprise run driver for CI pipelines.
//!
//! `plan` and `apply` run a flow end to end; `summary` and `outputs` inspect an existing
//! run; `cicd-config` queries the repository's deployment file. Results are printed as
//! JSON on stdout and exported to `$GITHUB_OUTPUT`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tfrun::apply::run_apply_flow;
use tfrun::cicd::{
    DEFAULT_CICD_FILE, deployment_target, export_branch_plan, export_deployment_target,
    load_cicd_config, plan_for_branch,
};
use tfrun::core::types::{Phase, RunResult, StateOutputs};
use tfrun::exit_codes;
use tfrun::io::actions::{annotate_error, annotate_warning};
use tfrun::io::client::TfcClient;
use tfrun::io::config::{DEFAULT_CONFIG_FILE, TfrunConfig, load_config};
use tfrun::io::env::EnvSnapshot;
use tfrun::io::outputs::{
    GithubOutputs, OutputSink, export_run_result, export_state_outputs, export_summary_path,
};
use tfrun::io::remote::RemoteClient;
use tfrun::logging;
use tfrun::outcome::{FlowFailure, FlowOutcome};
use tfrun::plan::run_plan_flow;
use tfrun::poll::{PollOptions, SystemClock, fetch_execution_summary};
use tfrun::settings::{Connection, FlowInputs, Settings, resolve_artifact_dir};
use tfrun::summary::{ReportOptions, write_report};

#[derive(Parser)]
#[command(
    name = "tfrun",
    version,
    about = "Drive Terraform Cloud/Enterprise runs from CI pipelines"
)]
struct Cli {
    /// Tunables file (TOML). Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a speculative plan and wait for it to finish.
    Plan(FlowArgs),
    /// Plan, then apply when the plan is confirmable; discard it otherwise.
    Apply(FlowArgs),
    /// Observe an existing run and render its summary.
    Summary {
        #[arg(long)]
        run_id: String,
        #[arg(long, value_enum)]
        target: Phase,
        #[arg(long)]
        artifact_dir: Option<PathBuf>,
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Export the state outputs produced by an applied run.
    Outputs {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Validate and query the repository's CI/CD deployment file.
    CicdConfig {
        #[arg(long, default_value = DEFAULT_CICD_FILE)]
        file: PathBuf,
        #[arg(long, conflicts_with = "deployment_id", required_unless_present = "deployment_id")]
        target_branch: Option<String>,
        #[arg(long, requires = "environment_name")]
        deployment_id: Option<String>,
        #[arg(long, requires = "deployment_id")]
        environment_name: Option<String>,
    },
}

/// Inputs shared by `plan` and `apply`. Blank values fall back to the environment.
#[derive(Args, Debug, Clone, Default)]
struct FlowArgs {
    #[arg(long)]
    hostname: Option<String>,
    #[arg(long)]
    organization: Option<String>,
    #[arg(long)]
    workspace: Option<String>,
    #[arg(long)]
    project: Option<String>,
    /// `remote` or `agent`.
    #[arg(long)]
    execution_mode: Option<String>,
    #[arg(long)]
    working_directory: Option<String>,
    #[arg(long)]
    terraform_version: Option<String>,
    /// Comma and/or newline separated variable files.
    #[arg(long, default_value = "")]
    var_file: String,
    /// Inline JSON or HCL block of Terraform variables.
    #[arg(long, default_value = "")]
    variables: String,
    /// Inline JSON or HCL block of environment variables.
    #[arg(long, default_value = "")]
    environment_variables: String,
    #[arg(long)]
    message: Option<String>,
    /// Marker for the rendered report; defaults to the workspace name.
    #[arg(long)]
    label: Option<String>,
    /// Directory uploaded as the configuration version.
    #[arg(long, default_value = ".")]
    directory: PathBuf,
    #[arg(long)]
    artifact_dir: Option<PathBuf>,
}

impl From<FlowArgs> for FlowInputs {
    fn from(args: FlowArgs) -> Self {
        FlowInputs {
            hostname: args.hostname,
            organization: args.organization,
            workspace: args.workspace,
            project: args.project,
            execution_mode: args.execution_mode,
            working_directory: args.working_directory,
            terraform_version: args.terraform_version,
            var_file: args.var_file,
            variables: args.variables,
            environment_variables: args.environment_variables,
            message: args.message,
            label: args.label,
            directory: args.directory,
            artifact_dir: args.artifact_dir,
        }
    }
}

/// What a flow prints on stdout.
#[derive(Serialize)]
struct FlowReport<'a> {
    status: &'static str,
    plan: Option<&'a RunResult>,
    apply: Option<&'a RunResult>,
    state_outputs: Option<&'a StateOutputs>,
    error: Option<String>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let env = EnvSnapshot::capture();
    match cli.command {
        Command::Plan(args) => cmd_flow(&cli.config, &env, args.into(), FlowKind::Plan),
        Command::Apply(args) => cmd_flow(&cli.config, &env, args.into(), FlowKind::Apply),
        Command::Summary {
            run_id,
            target,
            artifact_dir,
            hostname,
        } => cmd_summary(
            &cli.config,
            &env,
            &run_id,
            target,
            artifact_dir.as_deref(),
            hostname.as_deref(),
        ),
        Command::Outputs { run_id, hostname } => {
            cmd_outputs(&cli.config, &env, &run_id, hostname.as_deref())
        }
        Command::CicdConfig {
            file,
            target_branch,
            deployment_id,
            environment_name,
        } => cmd_cicd_config(
            &env,
            &file,
            target_branch.as_deref(),
            deployment_id.as_deref().zip(environment_name.as_deref()),
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowKind {
    Plan,
    Apply,
}

fn cmd_flow(config: &Path, env: &EnvSnapshot, inputs: FlowInputs, kind: FlowKind) -> Result<i32> {
    let tunables = load_config(config)?;
    // The client is only built from validated settings.
    let settings = match Settings::resolve(&inputs, env, tunables) {
        Ok(settings) => settings,
        Err(err) => {
            annotate_error(&FlowFailure::from(err).report());
            return Ok(exit_codes::FAILED);
        }
    };
    let client = client_for(&settings.connection, &settings.tunables);
    let outcome = match kind {
        FlowKind::Plan => run_plan_flow(&client, &SystemClock, &settings),
        FlowKind::Apply => run_apply_flow(&client, &SystemClock, &settings),
    };

    let mut sink = GithubOutputs::from_env(env);
    export_outcome(&mut sink, &outcome)?;
    print_json(&FlowReport {
        status: if outcome.succeeded() { "Success" } else { "Error" },
        plan: outcome.plan.as_ref().map(|report| &report.result),
        apply: outcome.apply.as_ref().map(|report| &report.result),
        state_outputs: outcome.state_outputs.as_ref(),
        error: outcome.failure.as_ref().map(ToString::to_string),
    })?;
    if let Some(failure) = &outcome.failure {
        annotate_error(&failure.report());
    } else if outcome.discarded {
        annotate_warning("run was discarded");
    }
    Ok(outcome.exit_code())
}

fn export_outcome(sink: &mut dyn OutputSink, outcome: &FlowOutcome) -> Result<()> {
    let succeeded = outcome.succeeded();
    for report in [&outcome.plan, &outcome.apply].into_iter().flatten() {
        export_run_result(sink, &report.result, succeeded)?;
        if let (Some(phase), Some(path)) = (report.result.phase, &report.summary_path) {
            export_summary_path(sink, phase, path)?;
        }
    }
    if outcome.plan.is_none() {
        sink.set("status", "Error")?;
    }
    if let Some(outputs) = &outcome.state_outputs {
        export_state_outputs(sink, outputs)?;
    }
    Ok(())
}

fn client_for(connection: &Connection, tunables: &TfrunConfig) -> TfcClient {
    TfcClient::new(
        &connection.api_settings(tunables),
        connection.tfci_settings(tunables),
    )
}

/// Connection for the inspection commands, which need only the API token.
fn inspection_client(
    config: &Path,
    env: &EnvSnapshot,
    hostname: Option<&str>,
) -> Result<Option<(TfcClient, TfrunConfig)>> {
    let tunables = load_config(config)?;
    match Connection::resolve(hostname, None, env) {
        Ok(connection) => Ok(Some((client_for(&connection, &tunables), tunables))),
        Err(err) => {
            annotate_error(&FlowFailure::from(err).report());
            Ok(None)
        }
    }
}

fn cmd_summary(
    config: &Path,
    env: &EnvSnapshot,
    run_id: &str,
    phase: Phase,
    artifact_dir: Option<&Path>,
    hostname: Option<&str>,
) -> Result<i32> {
    let Some((client, tunables)) = inspection_client(config, env, hostname)? else {
        return Ok(exit_codes::FAILED);
    };
    let artifact_dir = resolve_artifact_dir(artifact_dir, env);
    let options = PollOptions {
        timeout: match phase {
            Phase::Plan => tunables.plan_timeout(),
            Phase::Apply => tunables.apply_timeout(),
        },
        interval: tunables.poll_interval(),
    };
    let summary = match fetch_execution_summary(
        &client,
        &SystemClock,
        run_id,
        phase,
        options,
        &artifact_dir,
    ) {
        Ok(summary) => summary,
        Err(err) => {
            let failure = FlowFailure::from_remote(err);
            annotate_error(&failure.report());
            return Ok(failure.exit_code());
        }
    };
    let result = summary.result;
    let label = result
        .workspace_name
        .clone()
        .unwrap_or_else(|| run_id.to_string());
    let report_options = ReportOptions {
        label,
        log_tail_lines: tunables.log_tail_lines,
    };
    let path = write_report(&result, &report_options, &artifact_dir)?;

    let mut sink = GithubOutputs::from_env(env);
    export_run_result(&mut sink, &result, !summary.timed_out)?;
    export_summary_path(&mut sink, phase, &path)?;
    print_json(&result)?;
    if summary.timed_out {
        let failure = FlowFailure::Timeout {
            run_id: run_id.to_string(),
            phase,
            link: result.run_link.clone(),
        };
        annotate_error(&failure.report());
        return Ok(failure.exit_code());
    }
    Ok(exit_codes::OK)
}

fn cmd_outputs(
    config: &Path,
    env: &EnvSnapshot,
    run_id: &str,
    hostname: Option<&str>,
) -> Result<i32> {
    let Some((client, _)) = inspection_client(config, env, hostname)? else {
        return Ok(exit_codes::FAILED);
    };
    let outputs = match client.fetch_state_outputs(run_id) {
        Ok(outputs) => outputs,
        Err(err) => {
            let failure = FlowFailure::from_remote(err);
            annotate_error(&failure.report());
            return Ok(failure.exit_code());
        }
    };
    export_state_outputs(&mut GithubOutputs::from_env(env), &outputs)?;
    print_json(&outputs)?;
    Ok(exit_codes::OK)
}

fn cmd_cicd_config(
    env: &EnvSnapshot,
    file: &Path,
    target_branch: Option<&str>,
    deployment: Option<(&str, &str)>,
) -> Result<i32> {
    let config = match load_cicd_config(file) {
        Ok(config) => config,
        Err(err) => {
            annotate_error(&format!("{err:#}"));
            return Ok(exit_codes::FAILED);
        }
    };
    let mut sink = GithubOutputs::from_env(env);
    if let Some(branch) = target_branch {
        let plan = plan_for_branch(&config, branch)?;
        export_branch_plan(&mut sink, &config, &plan)?;
        print_json(&plan)?;
    } else if let Some((deployment_id, environment_name)) = deployment {
        let origin = file.display().to_string();
        let target = match deployment_target(&config, deployment_id, environment_name, &origin) {
            Ok(target) => target,
            Err(err) => {
                annotate_error(&FlowFailure::from(err).report());
                return Ok(exit_codes::FAILED);
            }
        };
        export_deployment_target(&mut sink, &target)?;
        print_json(&target)?;
    }
    Ok(exit_codes::OK)
}

/// Pretty-printed JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plan_with_inputs() {
        let cli = Cli::parse_from([
            "tfrun",
            "plan",
            "--organization",
            "acme",
            "--workspace",
            "net-dev",
            "--execution-mode",
            "agent",
        ]);
        let Command::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        let inputs = FlowInputs::from(args);
        assert_eq!(inputs.organization.as_deref(), Some("acme"));
        assert_eq!(inputs.execution_mode.as_deref(), Some("agent"));
        assert_eq!(inputs.directory, PathBuf::from("."));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn parse_summary_target() {
        let cli = Cli::parse_from([
            "tfrun", "summary", "--run-id", "run-1", "--target", "apply", "--config", "ci.toml",
        ]);
        assert!(matches!(
            cli.command,
            Command::Summary {
                target: Phase::Apply,
                ..
            }
        ));
        assert_eq!(cli.config, PathBuf::from("ci.toml"));
    }

    #[test]
    fn cicd_config_requires_a_query() {
        assert!(Cli::try_parse_from(["tfrun", "cicd-config"]).is_err());
        assert!(
            Cli::try_parse_from(["tfrun", "cicd-config", "--deployment-id", "network"]).is_err()
        );
        assert!(
            Cli::try_parse_from([
                "tfrun",
                "cicd-config",
                "--target-branch",
                "main",
                "--deployment-id",
                "network",
                "--environment-name",
                "dev",
            ])
            .is_err()
        );
        let cli = Cli::parse_from([
            "tfrun",
            "cicd-config",
            "--deployment-id",
            "network",
            "--environment-name",
            "dev",
        ]);
        assert!(matches!(
            cli.command,
            Command::CicdConfig {
                target_branch: None,
                ..
            }
        ));
    }
}
