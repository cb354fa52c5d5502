//! GitHub Actions workflow-command annotations on stderr.

use std::io::{self, Write};

/// `::{level}::{line}` for every line of `message`.
pub fn workflow_commands(level: &str, message: &str) -> String {
    message
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("::{level}::{line}\n"))
        .collect()
}

fn emit(level: &str, message: &str) {
    // stderr write failures leave nothing else to report to
    let _ = io::stderr().write_all(workflow_commands(level, message).as_bytes());
}

pub fn annotate_error(message: &str) {
    emit("error", message);
}

pub fn annotate_warning(message: &str) {
    emit("warning", message);
}
