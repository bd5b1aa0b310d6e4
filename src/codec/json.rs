//! JSON codec for frame headers.
//!
//! Headers are UTF-8 JSON objects. Every request carries `action` (integer
//! opcode) and `uuid` (correlation id); everything else depends on the
//! action. Keys are looked up by name, so field order on the wire does not
//! matter.
//!
//! # Example
//!
//! ```
//! use chat_relay::codec::JsonCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Login {
//!     username: String,
//!     password: String,
//! }
//!
//! let login = Login { username: "ann".into(), password: "pw".into() };
//! let encoded = JsonCodec::encode(&login).unwrap();
//! let decoded: Login = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, login);
//! ```

use serde_json::{Map, Value};

use crate::error::{RelayError, Result};

/// JSON codec for header field sets.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode JSON bytes that must form an object.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the header parses but is not an object.
    pub fn decode_object(bytes: &[u8]) -> Result<Map<String, Value>> {
        match serde_json::from_slice(bytes)? {
            Value::Object(map) => Ok(map),
            other => Err(RelayError::Protocol(format!(
                "Header must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
