/*!
 * Command-line input helpers: target lists and property assignments
 */

use crate::error::{Result, RosterError};
use serde_json::{Map, Value};
use std::path::Path;

/// Read targets from a file, one per line
///
/// Blank lines and lines starting with `#` are skipped. Trailing commas are
/// dropped so a single CSV column can be used as-is.
pub fn read_targets(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(parse_targets(&contents))
}

pub fn parse_targets(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.trim().trim_end_matches(',').trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Parse `key=value` into a property
///
/// Values that parse as JSON scalars (`true`, `42`, `"quoted"`) keep their
/// type; anything else is a string.
pub fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| RosterError::Config(format!("expected key=value, got '{}'", raw)))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(RosterError::Config(format!("empty property name in '{}'", raw)));
    }

    let value = value.trim();
    let parsed = match serde_json::from_str::<Value>(value) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Null)) => v,
        _ => Value::String(value.to_string()),
    };
    Ok((key.to_string(), parsed))
}

/// Parse every assignment; later keys win
pub fn parse_properties<S: AsRef<str>>(raw: &[S]) -> Result<Map<String, Value>> {
    let mut properties = Map::new();
    for item in raw {
        let (key, value) = parse_assignment(item.as_ref())?;
        properties.insert(key, value);
    }
    Ok(properties)
}
