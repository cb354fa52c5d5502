//! Tunables stored in `.tfrun.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default tunables file, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".tfrun.toml";

/// Upper bound on every `*_secs` tunable (7 days).
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Operational tunables (TOML).
///
/// Missing fields fall back to defaults suitable for a CI runner. Credentials never live
/// here; they come from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TfrunConfig {
    /// Delay between two observations of a run.
    pub poll_interval_secs: u64,

    /// Upper bound on waiting for a plan to settle.
    pub plan_timeout_secs: u64,

    /// Upper bound on waiting for an apply to settle.
    pub apply_timeout_secs: u64,

    /// Upper bound on a single `tfci` invocation.
    pub command_timeout_secs: u64,

    /// Upper bound on a single HTTP request.
    pub http_timeout_secs: u64,

    /// Truncate captured `tfci` stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Execution-log lines kept in a rendered summary.
    pub log_tail_lines: usize,

    /// Program and leading arguments used to invoke tfci (e.g. `["tfci"]`).
    pub tfci_command: Vec<String>,

    /// Comment attached when a blocked run is discarded.
    pub discard_comment: String,
}

impl Default for TfrunConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            plan_timeout_secs: 60 * 60,
            apply_timeout_secs: 60 * 60,
            command_timeout_secs: 2 * 60 * 60,
            http_timeout_secs: 30,
            output_limit_bytes: 1_000_000,
            log_tail_lines: 100,
            tfci_command: vec!["tfci".to_string()],
            discard_comment: "Run discarded: plan is not confirmable.".to_string(),
        }
    }
}

impl TfrunConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("poll_interval_secs", self.poll_interval_secs),
            ("plan_timeout_secs", self.plan_timeout_secs),
            ("apply_timeout_secs", self.apply_timeout_secs),
            ("command_timeout_secs", self.command_timeout_secs),
            ("http_timeout_secs", self.http_timeout_secs),
            ("output_limit_bytes", self.output_limit_bytes as u64),
            ("log_tail_lines", self.log_tail_lines as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
            if name.ends_with("_secs") && value > MAX_DURATION_SECS {
                return Err(anyhow!("{name} must be <= {MAX_DURATION_SECS}"));
            }
        }
        if self.tfci_command.is_empty() || self.tfci_command[0].trim().is_empty() {
            return Err(anyhow!("tfci_command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn plan_timeout(&self) -> Duration {
        Duration::from_secs(self.plan_timeout_secs)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Load tunables from a TOML file.
///
/// If the file is missing, returns `TfrunConfig::default()`.
pub fn load_config(path: &Path) -> Result<TfrunConfig> {
    if !path.exists() {
        let cfg = TfrunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TfrunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, TfrunConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "poll_interval_secs = 1\ntfci_command = [\"docker\", \"run\", \"tfci\"]\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.poll_interval_secs, 1);
        assert_eq!(cfg.tfci_command, vec!["docker", "run", "tfci"]);
        assert_eq!(cfg.plan_timeout_secs, TfrunConfig::default().plan_timeout_secs);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "apply_timeout_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("apply_timeout_secs must be > 0"));
    }

    #[test]
    fn oversized_durations_are_rejected() {
        for cfg in [
            TfrunConfig {
                plan_timeout_secs: u64::MAX,
                ..TfrunConfig::default()
            },
            TfrunConfig {
                command_timeout_secs: MAX_DURATION_SECS + 1,
                ..TfrunConfig::default()
            },
            TfrunConfig {
                http_timeout_secs: u64::MAX,
                ..TfrunConfig::default()
            },
        ] {
            let err = cfg.validate().unwrap_err();
            assert!(err.to_string().contains("must be <="), "{err}");
        }
        let cfg = TfrunConfig {
            apply_timeout_secs: MAX_DURATION_SECS,
            ..TfrunConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_tfci_command_is_rejected() {
        let cfg = TfrunConfig {
            tfci_command: Vec::new(),
            ..TfrunConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
