//! Markdown report for one phase of a run.
//!
//! Rendering is a pure function of the [`RunResult`] plus the artifact files it points at;
//! [`write_report`] is the only side effect. [`parse_report`] reads the status and counts
//! back out of a rendered report.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::{ChangeCounts, Phase, RunResult};
use crate::io::artifacts::{read_non_blank, write_atomic};

const REPORT_TEMPLATE: &str = include_str!("report.md");

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("report.md", REPORT_TEMPLATE)
        .expect("report template should be valid");
    env
});

static STATUS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Status: (\S+)\s*$").expect("status regex should be valid"));

static CHANGES_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^Changes: (\d+) to Import, (\d+) to Add, (\d+) to Change, (\d+) to Destroy\s*$",
    )
    .expect("changes regex should be valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    /// Written into the hidden marker so a commenter can find its own report.
    pub label: String,
    /// Execution-log lines kept in the log block.
    pub log_tail_lines: usize,
}

#[derive(Debug, Serialize)]
struct DetailBlock {
    title: &'static str,
    syntax: &'static str,
    body: String,
}

/// Last `lines` lines of `log`.
pub fn log_tail(log: &str, lines: usize) -> String {
    let all: Vec<&str> = log.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

fn detail_blocks(result: &RunResult, options: &ReportOptions) -> Vec<DetailBlock> {
    let artifacts = &result.artifacts;
    let mut blocks = Vec::new();
    if let Some(overview) = read_non_blank(artifacts.change_summary.as_deref()) {
        blocks.push(DetailBlock {
            title: "Change Overview",
            syntax: "diff",
            body: overview.trim_end().to_string(),
        });
    }
    if let Some(log) = read_non_blank(artifacts.execution_log.as_deref()) {
        blocks.push(DetailBlock {
            title: "Execution Log",
            syntax: "text",
            body: log_tail(&log, options.log_tail_lines),
        });
    }
    if let Some(tasks) = read_non_blank(artifacts.run_tasks.as_deref()) {
        blocks.push(DetailBlock {
            title: "Run Tasks",
            syntax: "text",
            body: tasks.trim_end().to_string(),
        });
    }
    if let Some(policies) = read_non_blank(artifacts.policy_checks.as_deref()) {
        blocks.push(DetailBlock {
            title: "Policy Checks",
            syntax: "text",
            body: policies.trim_end().to_string(),
        });
    }
    blocks
}

/// Render the report for `result`. Missing or blank artifacts produce no detail block.
pub fn render_report(result: &RunResult, options: &ReportOptions) -> Result<String> {
    let health = result.status.health();
    let phase = result.phase.unwrap_or(Phase::Plan);
    let template = ENGINE.get_template("report.md")?;
    let mut rendered = template
        .render(context! {
            label => &options.label,
            symbol => health.symbol(),
            indicator => health.as_str(),
            phase => phase.title(),
            workspace => result.workspace_name.as_deref().unwrap_or(&options.label),
            status => result.status.as_str(),
            counts => result.counts,
            run_id => &result.run_id,
            run_link => &result.run_link,
            blocks => detail_blocks(result, options),
        })
        .context("render summary report")?;
    rendered.push('\n');
    Ok(rendered)
}

/// Render and write the report to `{dir}/{run_id}-{phase}-summary.md`.
pub fn write_report(result: &RunResult, options: &ReportOptions, dir: &Path) -> Result<PathBuf> {
    let phase = result.phase.unwrap_or(Phase::Plan);
    let run_id = if result.run_id.is_empty() {
        "unknown-run"
    } else {
        result.run_id.as_str()
    };
    let path = dir.join(format!("{run_id}-{phase}-summary.md"));
    let report = render_report(result, options)?;
    write_atomic(&path, &report)?;
    debug!(path = %path.display(), "wrote summary report");
    Ok(path)
}

/// Status and counts recovered from a rendered report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReport {
    pub status: String,
    pub counts: ChangeCounts,
}

pub fn parse_report(report: &str) -> Option<ParsedReport> {
    let status = STATUS_LINE.captures(report)?.get(1)?.as_str().to_string();
    let changes = CHANGES_LINE.captures(report)?;
    let number = |index: usize| -> Option<u64> { changes.get(index)?.as_str().parse().ok() };
    Some(ParsedReport {
        status,
        counts: ChangeCounts {
            import: number(1)?,
            add: number(2)?,
            change: number(3)?,
            destroy: number(4)?,
        },
    })
}
