//! Cartridge records carried by the reader protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseError;

/// A decoded cartridge: what to show and what to launch
///
/// On the wire this is `{"name": "...", "icon": "..."|null, "pathName": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartridgeRecord {
    /// Display name
    pub name: String,
    /// Icon reference, if the cartridge carries one
    pub icon: Option<String>,
    /// Path of the executable to launch
    pub path_name: String,
}

impl CartridgeRecord {
    /// Create a new record
    pub fn new(
        name: impl Into<String>,
        icon: Option<String>,
        path_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            icon,
            path_name: path_name.into(),
        }
    }

    /// Build a record from a parsed JSON value, checking the schema strictly
    ///
    /// All three fields must be present. `icon` may be `null`, the others
    /// must be strings. Unknown extra fields are ignored.
    pub fn from_json(value: &Value) -> Result<Self, ParseError> {
        let obj = match value {
            Value::Object(map) => map,
            other => return Err(ParseError::NotAnObject(json_kind(other))),
        };

        let name = match obj.get("name") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(wrong_type("name", "a string")),
            None => return Err(ParseError::MissingField("name")),
        };

        let icon = match obj.get("icon") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) => None,
            Some(_) => return Err(wrong_type("icon", "a string or null")),
            None => return Err(ParseError::MissingField("icon")),
        };

        let path_name = match obj.get("pathName") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(wrong_type("pathName", "a string")),
            None => return Err(ParseError::MissingField("pathName")),
        };

        Ok(Self {
            name,
            icon,
            path_name,
        })
    }

    /// Whether this record carries something the dispatcher can launch
    pub fn is_launchable(&self) -> bool {
        !self.path_name.trim().is_empty()
    }
}

fn wrong_type(field: &'static str, expected: &'static str) -> ParseError {
    ParseError::WrongType { field, expected }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
