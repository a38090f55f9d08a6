//! Variable binding for step configuration.
//!
//! Step configs may embed `${path}` tokens inside string scalars. Before a
//! step runs, `bind` walks the config and substitutes each token with the
//! current value at `path` in the execution's variables. Substitution is
//! always textual: strings are inserted verbatim and any other JSON value is
//! inserted compactly encoded, so `"${count}"` with `count = 3` becomes the
//! string `"3"`. Tokens whose path does not resolve are left untouched.

use cadence_types::workflow::Variables;
use serde_json::Value;

const TOKEN_OPEN: &str = "${";
const TOKEN_CLOSE: char = '}';

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Resolve a dotted path against the variable map.
///
/// The first segment selects a top-level variable. Later segments select an
/// object key, or an array element when the segment is a decimal index.
pub fn lookup<'a>(variables: &'a Variables, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?.trim();
    if first.is_empty() {
        return None;
    }
    let mut current = variables.get(first)?;
    for segment in segments {
        let segment = segment.trim();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Textual form used when a value is substituted into a string.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Bind every string scalar in `config` against `variables`.
pub fn bind(config: &Variables, variables: &Variables) -> Variables {
    config
        .iter()
        .map(|(key, value)| (key.clone(), bind_value(value, variables)))
        .collect()
}

/// Bind a single JSON value, recursing into arrays and objects.
pub fn bind_value(value: &Value, variables: &Variables) -> Value {
    match value {
        Value::String(s) => Value::String(bind_str(s, variables)),
        Value::Array(items) => Value::Array(items.iter().map(|v| bind_value(v, variables)).collect()),
        Value::Object(map) => Value::Object(bind(map, variables)),
        other => other.clone(),
    }
}

/// Substitute `${path}` tokens in a string.
pub fn bind_str(input: &str, variables: &Variables) -> String {
    if !input.contains(TOKEN_OPEN) {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find(TOKEN_OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + TOKEN_OPEN.len()..];
        let Some(end) = after_open.find(TOKEN_CLOSE) else {
            // Unterminated token: keep the remainder as written.
            out.push_str(&rest[start..]);
            return out;
        };
        let path = &after_open[..end];
        match lookup(variables, path) {
            Some(value) => out.push_str(&stringify(value)),
            None => out.push_str(&rest[start..start + TOKEN_OPEN.len() + end + 1]),
        }
        rest = &after_open[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Every `${path}` token in `input`, in order of appearance.
pub fn referenced_paths(input: &str) -> Vec<&str> {
    let mut paths = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find(TOKEN_OPEN) {
        let after_open = &rest[start + TOKEN_OPEN.len()..];
        let Some(end) = after_open.find(TOKEN_CLOSE) else {
            break;
        };
        paths.push(after_open[..end].trim());
        rest = &after_open[end + 1..];
    }
    paths
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Fold a step result into the variables.
///
/// Object results add or overwrite top-level keys. Any other result is not
/// merged.
pub fn merge(variables: &mut Variables, result: &Value) {
    if let Value::Object(map) = result {
        for (key, value) in map {
            variables.insert(key.clone(), value.clone());
        }
    }
}
