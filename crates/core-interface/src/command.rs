//! Structured command scripts and their structured results
//!
//! Commands sent to the execution engine are never assembled by string
//! concatenation. A [`CommandScript`] carries a command name plus named,
//! typed parameters; the engine decides how to put them on the wire.
//! [`CommandScript::render`] exists for logs and audit entries only.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A parameterized command for the remote execution engine
///
/// # Example
///
/// ```
/// use roster_core_interface::CommandScript;
///
/// let script = CommandScript::new("Add-TeamUser")
///     .param("GroupId", "team-42")
///     .param("User", "alice@school.edu")
///     .param("Role", "Member");
///
/// assert_eq!(script.name(), "Add-TeamUser");
/// assert_eq!(script.get_str("GroupId"), Some("team-42"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandScript {
    name: String,
    #[serde(default)]
    params: BTreeMap<String, Value>,
}

impl CommandScript {
    /// Start a new command with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add (or replace) a named parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a switch parameter (a flag with no value)
    pub fn switch(self, key: impl Into<String>) -> Self {
        self.param(key, Value::Bool(true))
    }

    /// Add a parameter only when a value is present
    pub fn param_opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.param(key, v),
            None => self,
        }
    }

    /// Command name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All parameters, ordered by name
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// Look up a parameter
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Look up a string parameter
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Human-readable form for logs and audit detail
    ///
    /// String values are single-quoted with embedded quotes doubled. The
    /// output is never sent to the engine.
    pub fn render(&self) -> String {
        let mut out = self.name.clone();
        for (key, value) in &self.params {
            out.push_str(" -");
            out.push_str(key);
            match value {
                Value::Bool(true) => {}
                other => {
                    out.push(' ');
                    out.push_str(&render_value(other));
                }
            }
        }
        out
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Null => "$null".to_string(),
        other => other.to_string(),
    }
}

impl fmt::Display for CommandScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A single structured record returned by the engine
pub type Record = Map<String, Value>;

/// Structured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Records returned by the command, in engine order
    pub records: Vec<Record>,
}

impl CommandOutput {
    /// Output with no records (commands that return nothing)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build output from records
    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Normalize an arbitrary JSON value into records
    ///
    /// Objects become a single record, arrays of objects become one record
    /// each, scalars are wrapped as `{"value": <scalar>}`, `null` is empty.
    pub fn from_json(value: Value) -> Self {
        let records = match value {
            Value::Null => Vec::new(),
            Value::Object(map) => vec![map],
            Value::Array(items) => items.into_iter().map(into_record).collect(),
            scalar => vec![into_record(scalar)],
        };
        Self { records }
    }

    /// Whether the command returned no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// First record, if any
    pub fn first(&self) -> Option<&Record> {
        self.records.first()
    }

    /// String field of the first record
    pub fn first_str(&self, field: &str) -> Option<&str> {
        self.first()
            .and_then(|r| r.get(field))
            .and_then(Value::as_str)
    }

    /// Collect a string field across all records
    pub fn strings(&self, field: &str) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|r| r.get(field).and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_quotes_strings() {
        let script = CommandScript::new("Set-Team")
            .param("GroupId", "t-1")
            .param("DisplayName", "O'Brien's Class")
            .switch("Archived");

        assert_eq!(
            script.render(),
            "Set-Team -Archived -DisplayName 'O''Brien''s Class' -GroupId 't-1'"
        );
    }

    #[test]
    fn test_render_arrays_and_numbers() {
        let script = CommandScript::new("Add-TeamUsers")
            .param("Users", json!(["a", "b"]))
            .param("Limit", 5);

        assert_eq!(script.render(), "Add-TeamUsers -Limit 5 -Users 'a','b'");
    }

    #[test]
    fn test_param_opt_skips_none() {
        let script = CommandScript::new("Get-Team")
            .param_opt("GroupId", Some("t-1"))
            .param_opt::<String>("MailNickName", None);

        assert_eq!(script.params().len(), 1);
        assert!(script.get("MailNickName").is_none());
    }

    #[test]
    fn test_output_from_json_shapes() {
        assert!(CommandOutput::from_json(Value::Null).is_empty());

        let single = CommandOutput::from_json(json!({"Id": "u-1"}));
        assert_eq!(single.first_str("Id"), Some("u-1"));

        let many = CommandOutput::from_json(json!([{"Id": "a"}, {"Id": "b"}, 7]));
        assert_eq!(many.len(), 3);
        assert_eq!(many.strings("Id"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(many.records[2].get("value"), Some(&json!(7)));
    }
}
