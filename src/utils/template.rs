//! `{{var}}` rendering over JSON variable maps.

use crate::error::{Error, Result};
use crate::utils::shell;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}")
            .unwrap_or_else(|e| panic!("bad placeholder regex: {}", e))
    })
}

/// Look up `key` in `variables`. A literal key wins; otherwise dots walk
/// nested objects and array indices.
pub fn lookup<'v>(variables: &'v Map<String, Value>, key: &str) -> Option<&'v Value> {
    if let Some(value) = variables.get(key) {
        return Some(value);
    }

    let mut parts = key.split('.');
    let mut current = variables.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set `key` in `variables`, creating nested objects along a dotted path.
/// A non-object value in the way is replaced.
pub fn assign(variables: &mut Map<String, Value>, key: &str, value: Value) {
    let mut parts: Vec<&str> = key.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };

    let mut current = variables;
    for part in parts {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}

/// Names of all placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder()
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

pub fn is_present(template: &str, key: &str) -> bool {
    placeholders(template).iter().any(|name| name == key)
}

/// Substitute every placeholder verbatim. Unresolved names fail with
/// `ConfigMissingKey`.
pub fn render(template: &str, variables: &Map<String, Value>) -> Result<String> {
    substitute(template, variables, plain)
}

/// Substitute every placeholder shell-quoted, for building command lines.
/// Arrays expand to one quoted word per item.
pub fn render_quoted(template: &str, variables: &Map<String, Value>) -> Result<String> {
    substitute(template, variables, |value| match value {
        Value::Array(items) => {
            let words: Vec<String> = items.iter().map(plain).collect();
            shell::quote_args(&words)
        }
        other => shell::quote_arg(&plain(other)),
    })
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(plain).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

fn substitute(
    template: &str,
    variables: &Map<String, Value>,
    format: impl Fn(&Value) -> String,
) -> Result<String> {
    let mut missing = None;
    let rendered = placeholder().replace_all(template, |caps: &Captures<'_>| {
        match lookup(variables, &caps[1]) {
            Some(value) => format(value),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(key) => Err(Error::config_missing_key(key, None)
            .with_hint("Define the variable on the environment or pass it with --set")),
        None => Ok(rendered.into_owned()),
    }
}
