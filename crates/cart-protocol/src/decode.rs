//! Line classification for the reader protocol

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ParseError;
use crate::record::CartridgeRecord;

/// Line sent by the reader when the cartridge leaves the antenna
pub const DEFAULT_REMOVAL_TOKEN: &str = "TAG_REMOVED";

/// A protocol message extracted from one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A schema-valid cartridge record
    Record(CartridgeRecord),
    /// The reserved removal token
    Removed,
}

/// Classifies framed lines into protocol messages
#[derive(Debug, Clone)]
pub struct Decoder {
    removal_token: String,
}

impl Decoder {
    /// Create a decoder with the default removal token
    pub fn new() -> Self {
        Self::with_removal_token(DEFAULT_REMOVAL_TOKEN)
    }

    /// Create a decoder recognizing a custom removal token
    pub fn with_removal_token(token: impl Into<String>) -> Self {
        Self {
            removal_token: token.into(),
        }
    }

    /// The configured removal token
    pub fn removal_token(&self) -> &str {
        &self.removal_token
    }

    /// Decode one line
    ///
    /// Returns `None` for diagnostic text and for JSON that does not match
    /// the record schema. Neither case is an error for the session.
    pub fn decode(&self, line: &str) -> Option<Decoded> {
        match self.try_decode(line) {
            Ok(decoded) => Some(decoded),
            Err(ParseError::NotJson(text)) => {
                debug!("Reader diagnostic: {}", text);
                None
            }
            Err(e) => {
                warn!("Discarding malformed record ({}): {}", e, line);
                None
            }
        }
    }

    /// Decode one line, reporting why it was not a protocol message
    pub fn try_decode(&self, line: &str) -> Result<Decoded, ParseError> {
        let line = line.trim();

        if line == self.removal_token {
            info!("Cartridge removed");
            return Ok(Decoded::Removed);
        }

        let value: Value =
            serde_json::from_str(line).map_err(|_| ParseError::NotJson(line.to_string()))?;
        let record = CartridgeRecord::from_json(&value)?;

        info!("Cartridge detected: {} ({})", record.name, record.path_name);
        Ok(Decoded::Record(record))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_record() {
        let decoder = Decoder::new();
        let decoded = decoder.decode(r#"{"name":"Zelda","icon":null,"pathName":"C:/g.exe"}"#);

        assert_eq!(
            decoded,
            Some(Decoded::Record(CartridgeRecord::new("Zelda", None, "C:/g.exe")))
        );
    }

    #[test]
    fn test_diagnostic_text_is_ignored() {
        let decoder = Decoder::new();
        assert_eq!(decoder.decode("booting..."), None);
        assert_eq!(
            decoder.try_decode("booting..."),
            Err(ParseError::NotJson("booting...".to_string()))
        );
    }

    #[test]
    fn test_wrong_shape_is_ignored() {
        let decoder = Decoder::new();
        assert_eq!(decoder.decode(r#"{"name":"Zelda"}"#), None);
        assert_eq!(decoder.decode("42"), None);
        assert!(matches!(
            decoder.try_decode("42"),
            Err(ParseError::NotAnObject(_))
        ));
    }

    #[test]
    fn test_removal_token_checked_before_json() {
        let decoder = Decoder::new();
        assert_eq!(decoder.decode("TAG_REMOVED"), Some(Decoded::Removed));
        assert_eq!(decoder.decode("  TAG_REMOVED \r"), Some(Decoded::Removed));
    }

    #[test]
    fn test_custom_removal_token() {
        // A token that is also valid JSON must still be treated as removal
        let decoder = Decoder::with_removal_token("\"gone\"");
        assert_eq!(decoder.decode("\"gone\""), Some(Decoded::Removed));
        assert_eq!(decoder.decode("TAG_REMOVED"), None);
    }
}
