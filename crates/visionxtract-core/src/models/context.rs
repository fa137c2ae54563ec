use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::{CoreError, CoreResult};

/// Well-known execution context keys shared by the tools and builders.
pub mod keys {
    pub const FILE_CONTENT: &str = "file_content";
    pub const DOCUMENT_NAME: &str = "document_name";
    pub const DOCUMENT_ID: &str = "document_id";
    pub const MIN_CONFIDENCE: &str = "min_confidence";
    pub const EXTRACT_ALL_FACES: &str = "extract_all_faces";
    pub const FACE_DETECTIONS: &str = "face_detections";
    pub const EXTRACTED_FACES: &str = "extracted_faces";
    pub const LANGUAGE_HINTS: &str = "language_hints";
    pub const EXTRACTION_PROMPT: &str = "extraction_prompt";
    pub const FULL_TEXT: &str = "full_text";
    pub const TEXT_BLOCKS: &str = "text_blocks";
    pub const DETECTED_LANGUAGES: &str = "detected_languages";
    pub const KEY_VALUE_PAIRS: &str = "key_value_pairs";
}

#[derive(Clone, Debug, PartialEq)]
pub enum ContextValue {
    Bytes(Vec<u8>),
    Json(Value),
}

/// Per-task key/value state. Owned by exactly one task and handed to each
/// step by `&mut`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionContext {
    entries: BTreeMap<String, ContextValue>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_bytes(&mut self, key: &str, bytes: Vec<u8>) {
        self.entries
            .insert(key.to_string(), ContextValue::Bytes(bytes));
    }

    pub fn insert_json(&mut self, key: &str, value: impl Into<Value>) {
        self.entries
            .insert(key.to_string(), ContextValue::Json(value.into()));
    }

    pub fn insert_serialized<T: Serialize>(&mut self, key: &str, value: &T) -> CoreResult<()> {
        let value = serde_json::to_value(value).map_err(|error| {
            CoreError::internal(format!("failed to store context key '{key}': {error}"))
        })?;
        self.insert_json(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.entries.remove(key)
    }

    pub fn bytes(&self, key: &str) -> Option<&[u8]> {
        match self.entries.get(key) {
            Some(ContextValue::Bytes(bytes)) => Some(bytes.as_slice()),
            _ => None,
        }
    }

    pub fn json(&self, key: &str) -> Option<&Value> {
        match self.entries.get(key) {
            Some(ContextValue::Json(value)) => Some(value),
            _ => None,
        }
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.json(key).and_then(Value::as_str)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.json(key).and_then(Value::as_f64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.json(key).and_then(Value::as_bool)
    }

    /// Decodes a JSON entry into `T`. Absent keys yield `Ok(None)`.
    pub fn decode<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        let Some(value) = self.json(key) else {
            return Ok(None);
        };
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|error| {
                CoreError::parse_failure(format!("context key '{key}' is malformed: {error}"))
            })
    }

    pub fn missing_keys(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|key| !self.entries.contains_key(**key))
            .map(|key| key.to_string())
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskResult {
    pub success: bool,
    pub context: ExecutionContext,
    pub error: Option<String>,
    pub step_count: usize,
}
