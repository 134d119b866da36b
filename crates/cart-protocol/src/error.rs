//! Error types for cartridge protocol decoding

use thiserror::Error;

/// Errors that can occur while decoding a protocol line
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line is not JSON (diagnostic text from the reader)
    #[error("not a JSON line: {0}")]
    NotJson(String),

    /// Line is JSON but not an object
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// A required field is absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field has the wrong JSON type
    #[error("field {field} must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}
