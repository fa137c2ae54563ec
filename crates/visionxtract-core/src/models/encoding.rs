//! Base64 handling for binary payloads that cross JSON boundaries.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

/// Accepts either a base64 string or an array of byte values.
pub fn bytes_from_value(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(text) => decode(text).ok(),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|byte| u8::try_from(byte).ok()))
            .collect(),
        _ => None,
    }
}

/// `#[serde(with = "crate::models::encoding::base64_bytes")]`
pub mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        bytes_from_value(&value)
            .ok_or_else(|| serde::de::Error::custom("expected base64 string or byte array"))
    }
}
