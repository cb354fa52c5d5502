//! Terraform Cloud/Enterprise HTTP API adapter.
//!
//! Covers the operations that need structured data back from the platform: workspace
//! configuration, variables, run observation, artifact downloads and state outputs.
//! Documents follow JSON:API; the parsing helpers are pure and unit tested.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};
use ureq::Agent;

use crate::core::overview::render_overview;
use crate::core::status::RunStatus;
use crate::core::types::{
    ArtifactPaths, ChangeCounts, ExecutionMode, Phase, RunActions, RunResult, StateOutputs,
    Variable, VariableCategory, VariableSet, Workspace, WorkspaceRef,
};
use crate::io::artifacts::write_artifact;
use crate::io::remote::{RemoteError, RemoteErrorKind, RunSnapshot};

const JSON_API: &str = "application/vnd.api+json";
/// Execution logs and plan JSON can be large; the default body limit is too small.
const BODY_LIMIT_BYTES: u64 = 256 * 1024 * 1024;

/// Connection parameters for the HTTP API.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub hostname: String,
    pub token: String,
    pub verify_tls: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        })
    }
}

struct Reply {
    status: u16,
    body: String,
}

/// Blocking client for `https://{hostname}/api/v2`.
pub struct TfcApi {
    agent: Agent,
    hostname: String,
    token: String,
}

impl TfcApi {
    pub fn new(settings: &ApiSettings) -> Self {
        let mut config = Agent::config_builder()
            .timeout_global(Some(settings.timeout))
            .http_status_as_error(false);
        if !settings.verify_tls {
            warn!(hostname = %settings.hostname, "TLS verification disabled");
            config = config.tls_config(
                ureq::tls::TlsConfig::builder()
                    .disable_verification(true)
                    .build(),
            );
        }
        let agent: Agent = config.build().into();
        Self {
            agent,
            hostname: settings.hostname.clone(),
            token: settings.token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("https://{}{path}", self.hostname)
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<Reply, RemoteError> {
        debug!(%method, url, "api request");
        let auth = format!("Bearer {}", self.token);
        let result = match method {
            Method::Get | Method::Delete => {
                let mut request = match method {
                    Method::Get => self.agent.get(url),
                    _ => self.agent.delete(url),
                };
                if authenticated {
                    request = request.header("Authorization", &auth);
                }
                request
                    .header("Accept", JSON_API)
                    .query_pairs(query.iter().copied())
                    .call()
            }
            Method::Post | Method::Patch => {
                let payload = body.map(Value::to_string).unwrap_or_default();
                let request = match method {
                    Method::Post => self.agent.post(url),
                    _ => self.agent.patch(url),
                };
                request
                    .header("Authorization", &auth)
                    .header("Content-Type", JSON_API)
                    .query_pairs(query.iter().copied())
                    .send(&payload)
            }
        };
        let mut response =
            result.map_err(|err| RemoteError::transport(format!("{method} {url}: {err}")))?;
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .with_config()
            .limit(BODY_LIMIT_BYTES)
            .read_to_string()
            .map_err(|err| RemoteError::transport(format!("read {method} {url} response: {err}")))?;
        if !(200..300).contains(&status) {
            return Err(status_error(method, url, status, &body));
        }
        Ok(Reply { status, body })
    }

    fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, RemoteError> {
        let reply = self.request(Method::Get, &self.url(path), query, None, true)?;
        parse_document(&reply.body, path)
    }

    fn send_json(&self, method: Method, path: &str, payload: &Value) -> Result<Value, RemoteError> {
        let reply = self.request(method, &self.url(path), &[], Some(payload), true)?;
        if reply.status == 204 || reply.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        parse_document(&reply.body, path)
    }

    fn delete(&self, path: &str) -> Result<(), RemoteError> {
        self.request(Method::Delete, &self.url(path), &[], None, true)
            .map(|_| ())
    }

    /// Create-or-update the workspace named in `workspace`.
    #[instrument(skip_all, fields(workspace = %workspace.name, organization = %workspace.organization))]
    pub fn configure_workspace(&self, workspace: &Workspace) -> Result<WorkspaceRef, RemoteError> {
        let organization = &workspace.organization;
        let agent_pool_id = match workspace.execution_mode {
            ExecutionMode::Agent => {
                let pools =
                    self.get_json(&format!("/api/v2/organizations/{organization}/agent-pools"), &[])?;
                let id = first_id(&pools).ok_or_else(|| {
                    RemoteError::new(
                        RemoteErrorKind::Validation,
                        format!("no agent pools found in organization {organization}"),
                    )
                })?;
                debug!(agent_pool_id = %id, "using agent pool");
                Some(id)
            }
            ExecutionMode::Remote => None,
        };
        let project_id = match workspace.project.as_deref() {
            Some(project) => {
                let projects = self.get_json(
                    &format!("/api/v2/organizations/{organization}/projects"),
                    &[("filter[names]", project)],
                )?;
                let id = find_project_id(&projects, project).ok_or_else(|| {
                    RemoteError::new(
                        RemoteErrorKind::Validation,
                        format!("project '{project}' not found in organization {organization}"),
                    )
                })?;
                Some(id)
            }
            None => None,
        };
        let payload = workspace_payload(workspace, agent_pool_id.as_deref(), project_id.as_deref());

        let existing = self.get_json(
            &format!(
                "/api/v2/organizations/{organization}/workspaces/{}",
                workspace.name
            ),
            &[],
        );
        let document = match existing {
            Ok(found) => {
                let id = str_at(&found, "/data/id").ok_or_else(|| malformed("workspace has no id"))?;
                info!(workspace_id = id, "updating workspace");
                self.send_json(Method::Patch, &format!("/api/v2/workspaces/{id}"), &payload)?
            }
            Err(err) if err.is(RemoteErrorKind::NotFound) => {
                info!("workspace does not exist, creating");
                self.send_json(
                    Method::Post,
                    &format!("/api/v2/organizations/{organization}/workspaces"),
                    &payload,
                )?
            }
            Err(err) => return Err(err),
        };
        parse_workspace_ref(&document)
    }

    /// Create each variable; existing keys are updated, or deleted and re-created.
    #[instrument(skip_all, fields(workspace_id = %workspace.id, count = variables.len()))]
    pub fn upload_variables(
        &self,
        workspace: &WorkspaceRef,
        variables: &VariableSet,
    ) -> Result<(), RemoteError> {
        let collection = format!("/api/v2/workspaces/{}/vars", workspace.id);
        for variable in variables.entries() {
            info!(key = %variable.key, category = variable.category.as_str(), sensitive = variable.sensitive, "uploading variable");
            let payload = variable_payload(variable);
            match self.send_json(Method::Post, &collection, &payload) {
                Ok(_) => {}
                Err(err) if err.is(RemoteErrorKind::Validation) => {
                    self.replace_variable(&collection, variable, &payload, err)?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn replace_variable(
        &self,
        collection: &str,
        variable: &Variable,
        payload: &Value,
        create_error: RemoteError,
    ) -> Result<(), RemoteError> {
        let existing = self.get_json(collection, &[])?;
        let Some(id) = find_variable_id(&existing, &variable.key, variable.category) else {
            return Err(create_error);
        };
        debug!(key = %variable.key, variable_id = %id, "variable exists, updating");
        let member = format!("{collection}/{id}");
        if let Err(err) = self.send_json(Method::Patch, &member, payload) {
            warn!(key = %variable.key, err = %err, "update failed, re-creating variable");
            self.delete(&member)?;
            self.send_json(Method::Post, collection, payload)?;
        }
        Ok(())
    }

    /// Observe a run together with its workspace.
    #[instrument(skip(self))]
    pub fn show_run(&self, run_id: &str, phase: Phase) -> Result<RunSnapshot, RemoteError> {
        let include = format!("{},cost_estimate,configuration_version", phase.as_str());
        let run = self.get_json(&format!("/api/v2/runs/{run_id}"), &[("include", include.as_str())])?;
        let workspace_id = str_at(&run, "/data/relationships/workspace/data/id")
            .ok_or_else(|| malformed(format!("run {run_id} has no workspace")))?;
        let workspace = self.get_json(&format!("/api/v2/workspaces/{workspace_id}"), &[])?;
        parse_run_snapshot(&run, &workspace, phase, &self.hostname)
    }

    /// Collect the phase artifacts. Each artifact is best effort; failures are logged and the
    /// artifact is left out.
    #[instrument(skip_all, fields(run_id = %snapshot.result.run_id, phase = %phase))]
    pub fn download_artifacts(
        &self,
        snapshot: &RunSnapshot,
        phase: Phase,
        dir: &Path,
    ) -> Result<ArtifactPaths, RemoteError> {
        let result = &snapshot.result;
        let stem = result.phase_id.as_deref().unwrap_or(&result.run_id);

        let execution_log = keep(
            "execution log",
            self.download_log(snapshot.log_read_url.as_deref(), dir, stem, phase),
        );
        let change_summary = match (phase, result.phase_id.as_deref()) {
            (Phase::Plan, Some(plan_id)) => keep(
                "change overview",
                self.download_overview(plan_id, dir, stem),
            ),
            _ => None,
        };
        let run_tasks = keep(
            "run tasks",
            self.download_run_tasks(snapshot.task_stages_link.as_deref(), phase, dir, stem),
        );
        let policy_checks = match phase {
            Phase::Plan => keep(
                "policy checks",
                self.download_policy_checks(&snapshot.policy_check_ids, dir, stem),
            ),
            Phase::Apply => None,
        };
        Ok(ArtifactPaths {
            execution_log,
            change_summary,
            run_tasks,
            policy_checks,
        })
    }

    fn download_log(
        &self,
        url: Option<&str>,
        dir: &Path,
        stem: &str,
        phase: Phase,
    ) -> Result<Option<PathBuf>, RemoteError> {
        let Some(url) = url else {
            return Ok(None);
        };
        info!("downloading execution log");
        // The log URL is pre-signed; it must not receive the API token.
        let reply = self.request(Method::Get, url, &[], None, false)?;
        save(dir, &format!("{stem}-{phase}-execution-log"), &reply.body).map(Some)
    }

    fn download_overview(
        &self,
        plan_id: &str,
        dir: &Path,
        stem: &str,
    ) -> Result<Option<PathBuf>, RemoteError> {
        info!("downloading plan JSON output");
        let plan = self.get_json(&format!("/api/v2/plans/{plan_id}/json-output"), &[])?;
        save(dir, &format!("{stem}-plan-summary"), &render_overview(&plan)).map(Some)
    }

    fn download_run_tasks(
        &self,
        link: Option<&str>,
        phase: Phase,
        dir: &Path,
        stem: &str,
    ) -> Result<Option<PathBuf>, RemoteError> {
        let Some(link) = link else {
            return Ok(None);
        };
        let stages = self.get_json(link, &[])?;
        let mut report = String::new();
        for id in task_result_ids(&stages, phase) {
            let result = self.get_json(&format!("/api/v2/task-results/{id}"), &[])?;
            report.push_str(&format_task_result(&result));
        }
        save(dir, &format!("{stem}-run-tasks"), &report).map(Some)
    }

    fn download_policy_checks(
        &self,
        ids: &[String],
        dir: &Path,
        stem: &str,
    ) -> Result<Option<PathBuf>, RemoteError> {
        if ids.is_empty() {
            return Ok(None);
        }
        let mut report = String::new();
        for id in ids {
            let check = self.get_json(&format!("/api/v2/policy-checks/{id}"), &[])?;
            let Some(output) = str_at(&check, "/data/links/output") else {
                debug!(policy_check_id = %id, "policy check has no output link");
                continue;
            };
            info!(policy_check_id = %id, "downloading policy check output");
            let reply = self.request(Method::Get, &self.url(output), &[], None, true)?;
            report.push_str(&reply.body);
            if !report.ends_with('\n') {
                report.push('\n');
            }
        }
        save(dir, &format!("{stem}-policy-checks"), &report).map(Some)
    }

    /// Outputs of the state version written by the run's apply, or the workspace's current
    /// state version when the apply recorded none.
    #[instrument(skip(self))]
    pub fn fetch_state_outputs(&self, run_id: &str) -> Result<StateOutputs, RemoteError> {
        let run = self.get_json(&format!("/api/v2/runs/{run_id}"), &[("include", "apply")])?;
        let state_version_id = match included_of_type(&run, "applies")
            .and_then(|apply| str_at(apply, "/relationships/state-versions/data/0/id"))
        {
            Some(id) => id.to_string(),
            None => {
                let workspace_id = str_at(&run, "/data/relationships/workspace/data/id")
                    .ok_or_else(|| malformed(format!("run {run_id} has no workspace")))?;
                debug!(workspace_id, "apply has no state version, using current");
                let current = self.get_json(
                    &format!("/api/v2/workspaces/{workspace_id}/current-state-version"),
                    &[],
                )?;
                str_at(&current, "/data/id")
                    .ok_or_else(|| malformed("current state version has no id"))?
                    .to_string()
            }
        };

        let mut outputs = StateOutputs::new();
        let mut page = Some(1u64);
        while let Some(number) = page {
            let number = number.to_string();
            let document = self.get_json(
                &format!("/api/v2/state-versions/{state_version_id}/outputs"),
                &[("page[number]", number.as_str())],
            )?;
            page = collect_state_outputs(&document, &mut outputs);
        }
        info!(count = outputs.len(), "fetched state outputs");
        Ok(outputs)
    }
}

fn keep(artifact: &str, attempt: Result<Option<PathBuf>, RemoteError>) -> Option<PathBuf> {
    match attempt {
        Ok(path) => path,
        Err(err) => {
            warn!(artifact, err = %err, "skipping artifact");
            None
        }
    }
}

fn save(dir: &Path, stem: &str, contents: &str) -> Result<PathBuf, RemoteError> {
    write_artifact(dir, stem, contents)
        .map_err(|err| RemoteError::transport(format!("save {stem}: {err:#}")))
}

fn malformed(message: impl Into<String>) -> RemoteError {
    RemoteError::transport(format!("unexpected API response: {}", message.into()))
}

fn parse_document(body: &str, path: &str) -> Result<Value, RemoteError> {
    serde_json::from_str(body).map_err(|err| malformed(format!("{path}: {err}")))
}

fn status_error(method: Method, url: &str, status: u16, body: &str) -> RemoteError {
    let detail = api_error_detail(body)
        .map(|detail| format!(": {detail}"))
        .unwrap_or_default();
    RemoteError::new(
        RemoteErrorKind::from_http_status(status),
        format!("{method} {url} returned HTTP {status}{detail}"),
    )
    .with_stderr(body)
}

/// `detail` (or `title`) of each JSON:API error object, joined.
pub fn api_error_detail(body: &str) -> Option<String> {
    let document: Value = serde_json::from_str(body).ok()?;
    let details: Vec<&str> = document
        .get("errors")?
        .as_array()?
        .iter()
        .filter_map(|error| {
            error
                .get("detail")
                .or_else(|| error.get("title"))
                .and_then(Value::as_str)
        })
        .collect();
    (!details.is_empty()).then(|| details.join("; "))
}

fn str_at<'a>(document: &'a Value, pointer: &str) -> Option<&'a str> {
    document.pointer(pointer).and_then(Value::as_str)
}

fn bool_at(document: &Value, pointer: &str) -> bool {
    document
        .pointer(pointer)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn data_items(document: &Value) -> &[Value] {
    document
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn included_of_type<'a>(document: &'a Value, kind: &str) -> Option<&'a Value> {
    document
        .get("included")
        .and_then(Value::as_array)?
        .iter()
        .find(|item| str_at(item, "/type") == Some(kind))
}

fn first_id(document: &Value) -> Option<String> {
    data_items(document)
        .first()
        .and_then(|item| str_at(item, "/id"))
        .map(str::to_string)
}

/// Id of the project whose name matches exactly.
pub fn find_project_id(document: &Value, name: &str) -> Option<String> {
    data_items(document)
        .iter()
        .find(|item| str_at(item, "/attributes/name") == Some(name))
        .and_then(|item| str_at(item, "/id"))
        .map(str::to_string)
}

/// Id of the workspace variable with the given key and category.
pub fn find_variable_id(document: &Value, key: &str, category: VariableCategory) -> Option<String> {
    data_items(document)
        .iter()
        .find(|item| {
            str_at(item, "/attributes/key") == Some(key)
                && str_at(item, "/attributes/category") == Some(category.as_str())
        })
        .and_then(|item| str_at(item, "/id"))
        .map(str::to_string)
}

pub fn workspace_payload(
    workspace: &Workspace,
    agent_pool_id: Option<&str>,
    project_id: Option<&str>,
) -> Value {
    let mut attributes = json!({
        "name": workspace.name,
        "execution-mode": workspace.execution_mode.as_str(),
        "working-directory": workspace.working_directory.as_deref().unwrap_or(""),
        "speculative-enabled": true,
        "auto-apply": false,
    });
    if let Some(id) = agent_pool_id {
        attributes["agent-pool-id"] = json!(id);
    }
    if let Some(version) = workspace.terraform_version.as_deref() {
        attributes["terraform-version"] = json!(version);
    }
    let mut data = json!({ "type": "workspaces", "attributes": attributes });
    if let Some(id) = project_id {
        data["relationships"] = json!({ "project": { "data": { "type": "projects", "id": id } } });
    }
    json!({ "data": data })
}

pub fn parse_workspace_ref(document: &Value) -> Result<WorkspaceRef, RemoteError> {
    let id = str_at(document, "/data/id").ok_or_else(|| malformed("workspace has no id"))?;
    let name = str_at(document, "/data/attributes/name").unwrap_or_default();
    Ok(WorkspaceRef {
        id: id.to_string(),
        name: name.to_string(),
        project_id: str_at(document, "/data/relationships/project/data/id").map(str::to_string),
    })
}

pub fn variable_payload(variable: &Variable) -> Value {
    json!({
        "data": {
            "type": "vars",
            "attributes": {
                "key": variable.key,
                "value": variable.value,
                "category": variable.category.as_str(),
                "hcl": variable.hcl,
                "sensitive": variable.sensitive,
            }
        }
    })
}

pub fn run_link(hostname: &str, organization: &str, workspace: &str, run_id: &str) -> String {
    format!("https://{hostname}/app/{organization}/workspaces/{workspace}/runs/{run_id}")
}

/// Build a snapshot from a run document (with the phase, cost estimate and configuration
/// version included) and its workspace document.
pub fn parse_run_snapshot(
    run: &Value,
    workspace: &Value,
    phase: Phase,
    hostname: &str,
) -> Result<RunSnapshot, RemoteError> {
    let run_id = str_at(run, "/data/id").ok_or_else(|| malformed("run has no id"))?;
    let status = str_at(run, "/data/attributes/status")
        .ok_or_else(|| malformed(format!("run {run_id} has no status")))?;
    let phase_type = match phase {
        Phase::Plan => "plans",
        Phase::Apply => "applies",
    };
    let phase_doc = included_of_type(run, phase_type)
        .ok_or_else(|| malformed(format!("run {run_id} has no {phase}")))?;

    let raw_counts = [
        "resource-imports",
        "resource-additions",
        "resource-changes",
        "resource-destructions",
    ]
    .map(|field| {
        phase_doc
            .pointer(&format!("/attributes/{field}"))
            .and_then(Value::as_u64)
    });
    let counts_known = raw_counts.iter().all(Option::is_some);
    let counts = match raw_counts {
        [Some(import), Some(add), Some(change), Some(destroy)] => ChangeCounts {
            import,
            add,
            change,
            destroy,
        },
        _ => ChangeCounts::default(),
    };

    let workspace_name = str_at(workspace, "/data/attributes/name");
    let organization = str_at(workspace, "/data/relationships/organization/data/id");
    let link = match (organization, workspace_name) {
        (Some(organization), Some(name)) => Some(run_link(hostname, organization, name, run_id)),
        _ => None,
    };

    let result = RunResult {
        phase: Some(phase),
        workspace_name: workspace_name.map(str::to_string),
        workspace_id: str_at(workspace, "/data/id").map(str::to_string),
        project_id: str_at(workspace, "/data/relationships/project/data/id").map(str::to_string),
        run_id: run_id.to_string(),
        run_link: link,
        run_message: str_at(run, "/data/attributes/message").map(str::to_string),
        status: RunStatus::parse(status),
        is_speculative: bool_at(run, "/data/attributes/plan-only"),
        configuration_version_id: str_at(run, "/data/relationships/configuration-version/data/id")
            .map(str::to_string),
        configuration_version_status: included_of_type(run, "configuration-versions")
            .and_then(|cv| str_at(cv, "/attributes/status"))
            .map(str::to_string),
        phase_id: str_at(phase_doc, "/id").map(str::to_string),
        phase_status: str_at(phase_doc, "/attributes/status").map(str::to_string),
        cost_estimation_id: str_at(run, "/data/relationships/cost-estimate/data/id")
            .map(str::to_string),
        cost_estimation_status: included_of_type(run, "cost-estimates")
            .and_then(|estimate| str_at(estimate, "/attributes/status"))
            .map(str::to_string),
        resource_count: workspace
            .pointer("/data/attributes/resource-count")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        counts,
        actions: RunActions {
            is_cancelable: bool_at(run, "/data/attributes/actions/is-cancelable"),
            is_confirmable: bool_at(run, "/data/attributes/actions/is-confirmable"),
            is_discardable: bool_at(run, "/data/attributes/actions/is-discardable"),
            is_force_cancelable: bool_at(run, "/data/attributes/actions/is-force-cancelable"),
        },
        artifacts: ArtifactPaths::default(),
        state_outputs: None,
    };

    Ok(RunSnapshot {
        result,
        log_read_url: str_at(phase_doc, "/attributes/log-read-url").map(str::to_string),
        task_stages_link: str_at(run, "/data/relationships/task-stages/links/related")
            .map(str::to_string),
        policy_check_ids: run
            .pointer("/data/relationships/policy-checks/data")
            .and_then(Value::as_array)
            .map(|checks| {
                checks
                    .iter()
                    .filter_map(|check| str_at(check, "/id"))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        counts_known,
    })
}

/// Task result ids belonging to `phase`: the plan covers every stage except `pre_apply`, the
/// apply covers only `pre_apply`.
pub fn task_result_ids(stages: &Value, phase: Phase) -> Vec<String> {
    data_items(stages)
        .iter()
        .filter(|stage| {
            let pre_apply = str_at(stage, "/attributes/stage") == Some("pre_apply");
            match phase {
                Phase::Plan => !pre_apply,
                Phase::Apply => pre_apply,
            }
        })
        .flat_map(|stage| {
            stage
                .pointer("/relationships/task-results/data")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
        })
        .filter_map(|result| str_at(result, "/id"))
        .map(str::to_string)
        .collect()
}

pub fn format_task_result(document: &Value) -> String {
    let field = |name: &str| {
        document
            .pointer(&format!("/data/attributes/{name}"))
            .map(|value| match value {
                Value::String(text) => text.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };
    format!(
        "Run Task ID: {}\nRun Task Name: {}\nStage: {}\nEnforcement Level: {}\nStatus: {}\nDetails: {}\nMessage:\n\n{}\n\n",
        field("task-id"),
        field("task-name"),
        field("stage"),
        field("workspace-task-enforcement-level"),
        field("status"),
        field("url"),
        field("message"),
    )
}

/// Add the non-sensitive outputs of one page; returns the next page number, if any.
pub fn collect_state_outputs(document: &Value, outputs: &mut StateOutputs) -> Option<u64> {
    for item in data_items(document) {
        if bool_at(item, "/attributes/sensitive") {
            continue;
        }
        if let Some(name) = str_at(item, "/attributes/name") {
            let value = item
                .pointer("/attributes/value")
                .cloned()
                .unwrap_or(Value::Null);
            outputs.insert(name.to_string(), value);
        }
    }
    document
        .pointer("/meta/pagination/next-page")
        .and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_document(counts: Value) -> Value {
        json!({
            "data": {
                "id": "run-abc",
                "type": "runs",
                "attributes": {
                    "status": "planned",
                    "message": "Triggered from CI",
                    "plan-only": false,
                    "actions": {
                        "is-cancelable": true,
                        "is-confirmable": true,
                        "is-discardable": true,
                        "is-force-cancelable": false
                    }
                },
                "relationships": {
                    "workspace": {"data": {"id": "ws-1", "type": "workspaces"}},
                    "plan": {"data": {"id": "plan-1", "type": "plans"}},
                    "configuration-version": {"data": {"id": "cv-1", "type": "configuration-versions"}},
                    "cost-estimate": {"data": {"id": "ce-1", "type": "cost-estimates"}},
                    "task-stages": {"links": {"related": "/api/v2/runs/run-abc/task-stages"}},
                    "policy-checks": {"data": [{"id": "polchk-1", "type": "policy-checks"}]}
                }
            },
            "included": [
                {"id": "plan-1", "type": "plans", "attributes": counts},
                {"id": "ce-1", "type": "cost-estimates", "attributes": {"status": "finished"}},
                {"id": "cv-1", "type": "configuration-versions", "attributes": {"status": "uploaded"}}
            ]
        })
    }

    fn workspace_document() -> Value {
        json!({
            "data": {
                "id": "ws-1",
                "type": "workspaces",
                "attributes": {"name": "net-dev", "resource-count": 12},
                "relationships": {
                    "organization": {"data": {"id": "acme", "type": "organizations"}},
                    "project": {"data": {"id": "prj-1", "type": "projects"}}
                }
            }
        })
    }

    #[test]
    fn snapshot_carries_counts_actions_and_link() {
        let run = run_document(json!({
            "status": "finished",
            "log-read-url": "https://archivist/logs/1",
            "resource-imports": 0,
            "resource-additions": 3,
            "resource-changes": 1,
            "resource-destructions": 0
        }));
        let snapshot = parse_run_snapshot(&run, &workspace_document(), Phase::Plan, "app.terraform.io")
            .expect("snapshot");
        let result = &snapshot.result;
        assert!(snapshot.counts_known);
        assert_eq!(result.status, RunStatus::Planned);
        assert_eq!(result.counts.add, 3);
        assert_eq!(result.counts.change, 1);
        assert_eq!(result.resource_count, 12);
        assert_eq!(
            result.run_link.as_deref(),
            Some("https://app.terraform.io/app/acme/workspaces/net-dev/runs/run-abc")
        );
        assert!(result.actions.is_confirmable);
        assert_eq!(result.phase_id.as_deref(), Some("plan-1"));
        assert_eq!(result.cost_estimation_status.as_deref(), Some("finished"));
        assert_eq!(result.configuration_version_status.as_deref(), Some("uploaded"));
        assert_eq!(result.project_id.as_deref(), Some("prj-1"));
        assert_eq!(snapshot.policy_check_ids, vec!["polchk-1"]);
        assert_eq!(snapshot.log_read_url.as_deref(), Some("https://archivist/logs/1"));
    }

    #[test]
    fn null_counts_are_flagged_unknown() {
        let run = run_document(json!({
            "status": "errored",
            "resource-imports": null,
            "resource-additions": null,
            "resource-changes": null,
            "resource-destructions": null
        }));
        let snapshot = parse_run_snapshot(&run, &workspace_document(), Phase::Plan, "tfe.local")
            .expect("snapshot");
        assert!(!snapshot.counts_known);
        assert_eq!(snapshot.result.counts, ChangeCounts::default());
    }

    #[test]
    fn missing_phase_is_malformed() {
        let run = run_document(json!({"status": "pending"}));
        let err = parse_run_snapshot(&run, &workspace_document(), Phase::Apply, "tfe.local")
            .unwrap_err();
        assert!(err.message.contains("has no apply"), "{err}");
    }

    #[test]
    fn workspace_payload_sets_agent_pool_and_project() {
        let workspace = Workspace {
            hostname: "app.terraform.io".to_string(),
            organization: "acme".to_string(),
            project: Some("Platform".to_string()),
            name: "net-dev".to_string(),
            execution_mode: ExecutionMode::Agent,
            working_directory: None,
            terraform_version: Some("1.7.5".to_string()),
        };
        let payload = workspace_payload(&workspace, Some("apool-1"), Some("prj-9"));
        let attributes = &payload["data"]["attributes"];
        assert_eq!(attributes["execution-mode"], "agent");
        assert_eq!(attributes["agent-pool-id"], "apool-1");
        assert_eq!(attributes["working-directory"], "");
        assert_eq!(attributes["terraform-version"], "1.7.5");
        assert_eq!(attributes["auto-apply"], false);
        assert_eq!(payload["data"]["relationships"]["project"]["data"]["id"], "prj-9");
    }

    #[test]
    fn variable_lookup_matches_key_and_category() {
        let list = json!({"data": [
            {"id": "var-1", "attributes": {"key": "region", "category": "env"}},
            {"id": "var-2", "attributes": {"key": "region", "category": "terraform"}}
        ]});
        assert_eq!(
            find_variable_id(&list, "region", VariableCategory::Terraform).as_deref(),
            Some("var-2")
        );
        assert_eq!(find_variable_id(&list, "zone", VariableCategory::Env), None);
    }

    #[test]
    fn task_results_are_split_by_stage() {
        let stages = json!({"data": [
            {"attributes": {"stage": "post_plan"}, "relationships": {"task-results": {"data": [{"id": "taskrs-1"}]}}},
            {"attributes": {"stage": "pre_apply"}, "relationships": {"task-results": {"data": [{"id": "taskrs-2"}]}}}
        ]});
        assert_eq!(task_result_ids(&stages, Phase::Plan), vec!["taskrs-1"]);
        assert_eq!(task_result_ids(&stages, Phase::Apply), vec!["taskrs-2"]);
    }

    #[test]
    fn task_result_report_lists_fields() {
        let report = format_task_result(&json!({"data": {"attributes": {
            "task-id": "task-1",
            "task-name": "scanner",
            "stage": "post_plan",
            "workspace-task-enforcement-level": "mandatory",
            "status": "passed",
            "url": "https://scanner/1",
            "message": "no findings"
        }}}));
        assert!(report.starts_with("Run Task ID: task-1\nRun Task Name: scanner\n"));
        assert!(report.contains("Enforcement Level: mandatory\n"));
        assert!(report.ends_with("Message:\n\nno findings\n\n"));
    }

    #[test]
    fn state_outputs_skip_sensitive_and_follow_pages() {
        let mut outputs = StateOutputs::new();
        let next = collect_state_outputs(
            &json!({
                "data": [
                    {"attributes": {"name": "vpc_id", "sensitive": false, "value": "vpc-1"}},
                    {"attributes": {"name": "db_password", "sensitive": true, "value": "hunter2"}}
                ],
                "meta": {"pagination": {"next-page": 2}}
            }),
            &mut outputs,
        );
        assert_eq!(next, Some(2));
        assert_eq!(outputs.get("vpc_id"), Some(&json!("vpc-1")));
        assert!(!outputs.contains_key("db_password"));

        let last = collect_state_outputs(
            &json!({"data": [], "meta": {"pagination": {"next-page": null}}}),
            &mut outputs,
        );
        assert_eq!(last, None);
    }

    #[test]
    fn error_detail_joins_api_errors() {
        let body = r#"{"errors":[{"status":"422","title":"invalid attribute","detail":"Key has already been taken"}]}"#;
        assert_eq!(api_error_detail(body).as_deref(), Some("Key has already been taken"));
        assert_eq!(api_error_detail("not json"), None);
    }
}
