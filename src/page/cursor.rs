//! Opaque cursor encoding.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;

use super::ConnectionError;

/// Keyset position: the ordering attribute's value plus the row id that
/// breaks ties.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Value of the ordering attribute.
    pub value: Value,
    /// Row id.
    pub id: i64,
}

impl Cursor {
    pub fn new(value: Value, id: i64) -> Self {
        Self { value, id }
    }

    pub fn encode(&self) -> String {
        let raw = Value::Array(vec![self.value.clone(), Value::from(self.id)]);
        URL_SAFE_NO_PAD.encode(raw.to_string())
    }

    pub fn decode(encoded: &str) -> Result<Self, ConnectionError> {
        let invalid = || ConnectionError::InvalidCursor(encoded.to_string());
        let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| invalid())?;
        let raw: Value = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        match raw {
            Value::Array(mut parts) if parts.len() == 2 => {
                let id = parts[1].as_i64().ok_or_else(invalid)?;
                let value = parts.swap_remove(0);
                Ok(Self { value, id })
            }
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_what_it_encodes() {
        let cursor = Cursor::new(json!(1_700_000_000_123i64), 42);
        assert_eq!(Cursor::decode(&cursor.encode()).expect("decode"), cursor);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            Cursor::decode("not a cursor"),
            Err(ConnectionError::InvalidCursor(_))
        ));
        let wrong_shape = URL_SAFE_NO_PAD.encode(r#"{"id":1}"#);
        assert!(Cursor::decode(&wrong_shape).is_err());
    }
}
