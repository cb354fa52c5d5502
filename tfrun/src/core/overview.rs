//! Human-readable change overview rendered from a plan's JSON output.
//!
//! The output mimics Terraform's own plan listing closely enough for review in a pull
//! request: one block per changed resource with an attribute-level diff. Unchanged
//! attributes are omitted, secrets and large values are masked.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde_json::{Map, Value};
use tracing::{debug, warn};

const LEGEND: &str = "Resource actions are indicated with the following symbols:
    + create resource
    - destroy resource
    ~ update in-place
    +/- create replacement and then destroy

Terraform will perform the following actions:
";

/// Attribute names containing one of these are always masked.
const SENSITIVE_ATTRIBUTE_MARKERS: &[&str] = &["auth", "pass", "token", "jwt", "secret"];

const LARGE_VALUE_CHARS: usize = 1000;
const INDENT: &str = "   ";
const FORCES_REPLACEMENT: &str = " -> (Forces Replacement)";

/// Render the `resource_changes` of a plan JSON document.
pub fn render_overview(plan: &Value) -> String {
    let mut out = String::from(LEGEND);
    let changes = plan
        .get("resource_changes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for resource in changes {
        render_resource(&mut out, resource);
    }
    out.push('\n');
    out
}

fn render_resource(out: &mut String, resource: &Value) {
    let text = |key: &str| resource.get(key).and_then(Value::as_str).unwrap_or("");
    let address = text("address");
    let change = resource.get("change").unwrap_or(&Value::Null);
    let actions: Vec<&str> = change
        .get("actions")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let has = |action: &str| actions.contains(&action);

    if has("no-op") {
        return;
    }
    let (symbol, message) = if has("create") && has("delete") {
        ("+/-", "This resource must be replaced.")
    } else if has("create") {
        ("+", "This resource will be created as defined.")
    } else if has("delete") {
        ("-", "This resource will be destroyed.")
    } else if has("update") {
        ("~", "This resource will be updated in-place.")
    } else if has("read") {
        debug!(address, "skipping data source read");
        return;
    } else {
        warn!(address, ?actions, "unrecognised plan actions, skipping resource");
        return;
    };

    let _ = write!(
        out,
        "\n# Provider: [{}]\n# Resource Type: [{}]\n# Resource Identifier: [{}]\n# Message: {}\n{} resource \"{}\" \"{}\" {{\n",
        text("provider_name"),
        text("type"),
        address,
        message,
        symbol,
        text("type"),
        text("name"),
    );

    let replace_paths = if symbol == "+/-" {
        first_replace_path(change)
    } else {
        BTreeSet::new()
    };
    let context = DiffContext {
        before_sensitive: object_or_null(change.get("before_sensitive")),
        after_sensitive: object_or_null(change.get("after_sensitive")),
        after_unknown: object_or_null(change.get("after_unknown")),
    };
    compare_values(
        out,
        change.get("before").unwrap_or(&Value::Null),
        change.get("after").unwrap_or(&Value::Null),
        &context,
        &replace_paths,
        1,
    );
    out.push_str("}\n");
}

/// Attribute names of the first replace path; only top-level attributes are marked.
fn first_replace_path(change: &Value) -> BTreeSet<String> {
    change
        .get("replace_paths")
        .and_then(Value::as_array)
        .and_then(|paths| paths.first())
        .and_then(Value::as_array)
        .map(|path| {
            path.iter()
                .filter_map(|step| match step {
                    Value::String(name) => Some(name.clone()),
                    Value::Number(index) => Some(index.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn object_or_null(value: Option<&Value>) -> &Value {
    match value {
        Some(value @ Value::Object(_)) => value,
        _ => &Value::Null,
    }
}

/// Sensitivity and unknown-value markers at the same depth as the values being compared.
struct DiffContext<'a> {
    before_sensitive: &'a Value,
    after_sensitive: &'a Value,
    after_unknown: &'a Value,
}

impl<'a> DiffContext<'a> {
    fn child(&self, key: &Key) -> DiffContext<'a> {
        DiffContext {
            before_sensitive: key.lookup(self.before_sensitive).unwrap_or(&Value::Null),
            after_sensitive: key.lookup(self.after_sensitive).unwrap_or(&Value::Null),
            after_unknown: key.lookup(self.after_unknown).unwrap_or(&Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Key {
    Index(usize),
    Name(String),
}

impl Key {
    fn lookup<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        match (self, value) {
            (Key::Name(name), Value::Object(map)) => map.get(name),
            (Key::Index(index), Value::Array(list)) => list.get(*index),
            _ => None,
        }
    }

    fn rendered(&self) -> String {
        match self {
            Key::Name(name) => quote_key(name),
            Key::Index(index) => index.to_string(),
        }
    }
}

fn keys_of(value: &Value) -> Vec<Key> {
    match value {
        Value::Object(map) => map.keys().cloned().map(Key::Name).collect(),
        Value::Array(list) => (0..list.len()).map(Key::Index).collect(),
        _ => Vec::new(),
    }
}

/// A marker is set when it is `true` or `[true]`.
fn is_marked(marker: Option<&Value>) -> bool {
    match marker {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Array(list)) => list.len() == 1 && list[0] == Value::Bool(true),
        _ => false,
    }
}

/// Decode strings holding embedded JSON documents (e.g. policy bodies) so they diff per field.
fn decode_embedded(value: &Value) -> Value {
    if let Value::String(text) = value
        && let Ok(decoded @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str::<Value>(text)
    {
        return decoded;
    }
    value.clone()
}

fn compare_values(
    out: &mut String,
    before: &Value,
    after: &Value,
    context: &DiffContext<'_>,
    replace_paths: &BTreeSet<String>,
    level: usize,
) {
    let unknown_keys = keys_of(context.after_unknown)
        .into_iter()
        .filter(|key| is_marked(key.lookup(context.after_unknown)));
    let keys: BTreeSet<Key> = keys_of(before)
        .into_iter()
        .chain(keys_of(after))
        .chain(unknown_keys)
        .collect();
    let tabs = INDENT.repeat(level);

    for key in keys {
        let before_value = key.lookup(before).unwrap_or(&Value::Null);
        let after_value = key
            .lookup(after)
            .or_else(|| key.lookup(context.after_unknown))
            .unwrap_or(&Value::Null);
        if before_value == after_value {
            continue;
        }
        let before_value = decode_embedded(before_value);
        let after_value = decode_embedded(after_value);

        let name_is_secret = matches!(&key, Key::Name(name)
            if SENSITIVE_ATTRIBUTE_MARKERS.iter().any(|marker| name.to_ascii_lowercase().contains(marker)));
        let before_sensitive = name_is_secret || is_marked(key.lookup(context.before_sensitive));
        let after_sensitive = name_is_secret || is_marked(key.lookup(context.after_sensitive));
        let after_unknown = is_marked(key.lookup(context.after_unknown));
        let marker = match &key {
            Key::Name(name) if level == 1 && replace_paths.contains(name) => FORCES_REPLACEMENT,
            _ => "",
        };
        let masked = before_sensitive || after_sensitive || after_unknown;

        let open = match &before_value {
            Value::Object(map) if !map.is_empty() && !after_value.is_null() && !masked => {
                Some(('{', '}'))
            }
            Value::Array(list) if !list.is_empty() && !after_value.is_null() && !masked => {
                Some(('[', ']'))
            }
            _ => None,
        };
        if let Some((open, close)) = open {
            match &key {
                Key::Name(_) => {
                    let _ = writeln!(out, "{tabs}{} = {open}{marker}", key.rendered());
                }
                Key::Index(_) => {
                    let _ = writeln!(out, "{tabs}{open}{marker}");
                }
            }
            compare_values(
                out,
                &before_value,
                &after_value,
                &context.child(&key),
                replace_paths,
                level + 1,
            );
            let _ = writeln!(out, "{tabs}{close}");
            continue;
        }

        let before_rendered = if before_sensitive {
            "(Sensitive Data)".to_string()
        } else {
            render_value(&before_value, level)
        };
        let after_rendered = if after_sensitive {
            "(Sensitive Data)".to_string()
        } else if after_unknown {
            "(Known After Apply)".to_string()
        } else {
            render_value(&after_value, level)
        };

        let added = before_value.is_null() && !after_value.is_null();
        let symbol = if added {
            "+"
        } else if after_value.is_null() {
            "-"
        } else {
            "~"
        };
        match (&key, added) {
            (Key::Index(_), true) => {
                let _ = writeln!(out, "{tabs}{symbol} {after_rendered}{marker}");
            }
            (_, true) => {
                let _ = writeln!(
                    out,
                    "{tabs}{symbol} {} = {after_rendered}{marker}",
                    key.rendered()
                );
            }
            _ => {
                let _ = writeln!(
                    out,
                    "{tabs}{symbol} {} = {before_rendered} -> {after_rendered}{marker}",
                    key.rendered()
                );
            }
        }
    }
}

/// Render a value whose line starts at indentation `level`.
fn render_value(value: &Value, level: usize) -> String {
    match value {
        Value::String(text) if text.chars().count() > LARGE_VALUE_CHARS => {
            "(Hidden Large Value)".to_string()
        }
        Value::String(text) => format!("\"{text}\""),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        Value::Number(number) => number.to_string(),
        Value::Object(map) => render_map(map, level),
        Value::Array(list) => render_list(list, level),
    }
}

fn render_map(map: &Map<String, Value>, level: usize) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }
    let inner = INDENT.repeat(level + 1);
    let mut out = String::from("{\n");
    for (key, value) in map {
        let _ = writeln!(out, "{inner}{} = {}", quote_key(key), render_value(value, level + 1));
    }
    out.push_str(&INDENT.repeat(level));
    out.push('}');
    out
}

fn render_list(list: &[Value], level: usize) -> String {
    if list.is_empty() {
        return "[]".to_string();
    }
    let inner = INDENT.repeat(level + 1);
    let mut out = String::from("[\n");
    for value in list {
        let _ = writeln!(out, "{inner}{}", render_value(value, level + 1));
    }
    out.push_str(&INDENT.repeat(level));
    out.push(']');
    out
}

/// Keys containing punctuation are quoted the way HCL would require.
fn quote_key(key: &str) -> String {
    if key.chars().any(|c| "@!#$%^&*()<>?/\\|}{~:".contains(c)) {
        format!("\"{key}\"")
    } else {
        key.to_string()
    }
}
