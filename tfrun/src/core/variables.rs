//! Parsing of variable blocks (inline input and var-files) into [`Variable`] entries.

use serde_json::{Map, Value};
use tracing::debug;

use crate::core::types::{ValidationError, Variable, VariableCategory, VariableSet};

/// Key substrings that mark a variable as sensitive.
pub const SENSITIVE_KEY_MARKERS: &[&str] =
    &["auth", "pass", "cred", "token", "jwt", "secret", "license"];

/// Whether a variable key names a secret (case insensitive).
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_MARKERS
        .iter()
        .any(|marker| key.contains(marker))
}

/// Parse a JSON or HCL block whose top level is a map of variable names to values.
///
/// `origin` names the block in error messages (a file path or an input name).
pub fn parse_block(contents: &str, origin: &str) -> Result<Map<String, Value>, ValidationError> {
    let parsed = match serde_json::from_str::<Value>(contents) {
        Ok(value) => value,
        Err(json_err) => {
            debug!(origin, err = %json_err, "not valid JSON, trying HCL");
            hcl::from_str::<Value>(contents).map_err(|hcl_err| {
                ValidationError::new(format!(
                    "unable to parse variables from {origin}: expected JSON or HCL ({hcl_err})"
                ))
            })?
        }
    };
    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(ValidationError::new(format!(
            "unable to parse variables from {origin}: expected a map at the top level, got {}",
            kind_of(&other)
        ))),
    }
}

/// Convert a parsed value into the upload form.
///
/// Objects, arrays and booleans are sent JSON-encoded as HCL expressions; scalars as their
/// string form. Null becomes an empty string.
pub fn encode_value(value: &Value) -> (String, bool) {
    match value {
        Value::Object(_) | Value::Array(_) | Value::Bool(_) => (value.to_string(), true),
        Value::String(text) => (text.clone(), false),
        Value::Number(number) => (number.to_string(), false),
        Value::Null => (String::new(), false),
    }
}

/// Build variables of one category from a parsed block, in key order.
pub fn variables_from_block(block: &Map<String, Value>, category: VariableCategory) -> Vec<Variable> {
    block
        .iter()
        .map(|(key, value)| {
            let (value, hcl) = encode_value(value);
            Variable {
                key: key.clone(),
                value,
                category,
                hcl,
                sensitive: is_sensitive_key(key),
            }
        })
        .collect()
}

/// Split a var-file list on commas and newlines, dropping blanks and normalising separators.
pub fn split_var_files(raw: &str) -> Vec<String> {
    raw.split([',', '\n'])
        .map(|entry| entry.trim().replace('\\', "/"))
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// A named block of variable text in the order it should be applied.
#[derive(Debug, Clone)]
pub struct VariableSource<'a> {
    pub origin: &'a str,
    pub contents: &'a str,
    pub category: VariableCategory,
}

/// Merge sources into one set; later sources override earlier keys within a category.
pub fn collect_variables(sources: &[VariableSource<'_>]) -> Result<VariableSet, ValidationError> {
    let mut set = VariableSet::new();
    for source in sources {
        if source.contents.trim().is_empty() {
            continue;
        }
        let block = parse_block(source.contents, source.origin)?;
        set.extend(variables_from_block(&block, source.category));
    }
    Ok(set)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}
