//! Decoding of inbound dongle messages.
//!
//! A message body is a JSON object whose `payload` member maps field names to
//! numbers or numeric strings:
//!
//! ```json
//! {"payload": {"Temp": "21.5", "SoC": 87}}
//! ```

use serde_json::{Map, Value};
use thiserror::Error;

/// Top-level key holding the readings.
pub const PAYLOAD_KEY: &str = "payload";

/// Field name → raw value, as carried in one message.
pub type Readings = Map<String, Value>;

/// Errors that drop a whole message.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The body is not valid JSON.
    #[error("Failed to decode JSON payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// The body is JSON but lacks the readings object.
    #[error("Failed to process payload: {0}")]
    Structure(String),
}

/// A single field value that could not be turned into a number.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Failed to convert value for metric {field}: {reason}")]
pub struct CoercionError {
    /// Field name as it appeared in the payload.
    pub field: String,
    /// Why the conversion failed.
    pub reason: String,
}

impl CoercionError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Decode a raw message body and extract its readings object.
pub fn decode_readings(body: &[u8]) -> Result<Readings, PayloadError> {
    let mut object = match serde_json::from_slice::<Value>(body)? {
        Value::Object(object) => object,
        other => {
            return Err(PayloadError::Structure(format!(
                "expected a JSON object, got {}",
                kind_of(&other)
            )));
        }
    };

    match object.remove(PAYLOAD_KEY) {
        Some(Value::Object(readings)) => Ok(readings),
        Some(other) => Err(PayloadError::Structure(format!(
            "'{}' must be an object, got {}",
            PAYLOAD_KEY,
            kind_of(&other)
        ))),
        None => Err(PayloadError::Structure(format!(
            "missing '{}' key",
            PAYLOAD_KEY
        ))),
    }
}

/// Convert a raw payload value to a number.
///
/// Numbers pass through and strings are parsed after trimming whitespace.
/// Booleans, nulls, arrays and objects are rejected.
pub fn coerce_numeric(field: &str, value: &Value) -> Result<f64, CoercionError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| CoercionError::new(field, format!("number {} out of range", n))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| CoercionError::new(field, format!("could not parse {:?}: {}", s, e))),
        other => Err(CoercionError::new(
            field,
            format!("unsupported {} value", kind_of(other)),
        )),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
