//! Change counts derived from a machine-readable execution log.
//!
//! The remote API leaves plan/apply counts null when a run errors. The execution log still
//! carries one JSON message per line; counting the per-resource hook messages recovers the
//! numbers.

use serde::Deserialize;

use crate::core::types::{ChangeCounts, Phase};

#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(rename = "type")]
    kind: Option<String>,
    hook: Option<Hook>,
}

#[derive(Debug, Deserialize)]
struct Hook {
    action: Option<String>,
}

/// Message type that carries one resource action for `phase`.
pub fn message_type(phase: Phase) -> &'static str {
    match phase {
        Phase::Plan => "planned_change",
        Phase::Apply => "apply_complete",
    }
}

/// Count import/create/update/delete hook messages. Lines that are not JSON are ignored.
pub fn counts_from_log(log: &str, phase: Phase) -> ChangeCounts {
    let wanted = message_type(phase);
    let mut counts = ChangeCounts::default();
    for line in log.lines() {
        let Ok(entry) = serde_json::from_str::<LogLine>(line) else {
            continue;
        };
        if entry.kind.as_deref() != Some(wanted) {
            continue;
        }
        match entry.hook.and_then(|hook| hook.action).as_deref() {
            Some("import") => counts.import += 1,
            Some("create") => counts.add += 1,
            Some("update") => counts.change += 1,
            Some("delete") => counts.destroy += 1,
            _ => {}
        }
    }
    counts
}
