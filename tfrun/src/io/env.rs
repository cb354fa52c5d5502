//! Process environment captured once at start-up.

use std::collections::BTreeMap;

use crate::core::types::ValidationError;

/// Immutable copy of the environment variables tfrun cares about.
///
/// Nothing else in the crate reads `std::env`; tests build snapshots from pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self::from_pairs(std::env::vars())
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Value of `key`, treating blank values as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Required value; absence is a validation error naming the variable.
    pub fn require(&self, key: &str) -> Result<&str, ValidationError> {
        self.get(key)
            .ok_or_else(|| ValidationError::new(format!("environment variable {key} is required")))
    }

    /// Boolean flag (`true`/`false`, `1`/`0`, `yes`/`no`), `default` when unset.
    pub fn flag(&self, key: &str, default: bool) -> Result<bool, ValidationError> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(ValidationError::new(format!(
                "environment variable {key} must be a boolean, got '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_count_as_unset() {
        let env = EnvSnapshot::from_pairs([("TF_PROJECT", "  "), ("TF_WORKSPACE", "net")]);
        assert_eq!(env.get("TF_PROJECT"), None);
        assert_eq!(env.get("TF_WORKSPACE"), Some("net"));
        assert_eq!(env.get_or("TF_CLOUD_HOSTNAME", "app.terraform.io"), "app.terraform.io");
    }

    #[test]
    fn require_names_the_missing_variable() {
        let env = EnvSnapshot::default();
        let err = env.require("TF_API_TOKEN").unwrap_err();
        assert!(err.to_string().contains("TF_API_TOKEN"));
    }

    #[test]
    fn flag_parses_common_spellings() {
        let env = EnvSnapshot::from_pairs([("TF_VERIFY", "False"), ("BAD", "maybe")]);
        assert_eq!(env.flag("TF_VERIFY", true), Ok(false));
        assert_eq!(env.flag("UNSET", true), Ok(true));
        assert!(env.flag("BAD", true).is_err());
    }
}
