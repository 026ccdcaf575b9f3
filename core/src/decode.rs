//! Structured-payload decoding for fetch results.
//!
//! The endpoints under test answer a lookup with a JSON array of records;
//! scenarios care about one string field of the first record. Any deviation
//! from that shape is a `Decode` error. There is no fallback value.

use serde_json::Value;

use crate::error::{HarnessError, Result};

/// Parse `body` and return the string at `key` in the first array element.
pub fn first_record_field(body: &[u8], key: &str) -> Result<String> {
    let json: Value = serde_json::from_slice(body)?;
    let records = json
        .as_array()
        .ok_or_else(|| HarnessError::Decode(format!("expected a JSON array, got {}", kind(&json))))?;
    let first = records
        .first()
        .ok_or_else(|| HarnessError::Decode("empty result array".to_string()))?;
    let record = first
        .as_object()
        .ok_or_else(|| HarnessError::Decode(format!("expected an object, got {}", kind(first))))?;
    match record.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(HarnessError::Decode(format!(
            "field {key:?} is {}, not a string",
            kind(other)
        ))),
        None => Err(HarnessError::Decode(format!("missing field {key:?}"))),
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
