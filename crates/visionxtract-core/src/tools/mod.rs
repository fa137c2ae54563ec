pub mod document;
pub mod face;
pub mod image_ops;
pub mod json;
pub mod ocr;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use document::{DocumentTools, DocumentValidation};
pub use face::FaceTools;
pub use ocr::{OcrTools, TextExtraction};

use crate::models::{CoreError, CoreErrorKind, CoreResult, ExecutionContext};

/// A tool invocation requested by a decision process.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.to_string(), value.into());
        self
    }

    /// Typed optional argument. Explicit `null` reads as absent.
    pub fn argument<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        match self.arguments.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|error| {
                CoreError::invalid_input(format!(
                    "invalid argument '{key}' for tool '{}': {error}",
                    self.name
                ))
            }),
        }
    }
}

/// Output fed back to the decision process after a tool call.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolObservation {
    pub name: String,
    pub output: Value,
}

/// Named operations a task runner may dispatch against the task's context.
#[async_trait]
pub trait StepTools: Send + Sync {
    fn tool_names(&self) -> &'static [&'static str];

    async fn dispatch(&self, call: &ToolCall, context: &mut ExecutionContext)
    -> CoreResult<Value>;
}

pub(crate) fn unknown_tool(call: &ToolCall) -> CoreError {
    CoreError::new(
        CoreErrorKind::NotFound,
        format!("unknown tool '{}'", call.name),
    )
}

pub(crate) fn to_output<T: serde::Serialize>(value: &T) -> CoreResult<Value> {
    serde_json::to_value(value)
        .map_err(|error| CoreError::internal(format!("failed to encode tool output: {error}")))
}

/// Allocates tracking identifiers for uploaded documents.
pub trait DocumentIdSource: Send + Sync {
    fn allocate(&self, document_name: &str) -> String;
}

/// `doc_{name}_{millis % 1_000_000}`
#[derive(Clone, Copy, Debug, Default)]
pub struct TimestampDocumentIds;

impl DocumentIdSource for TimestampDocumentIds {
    fn allocate(&self, document_name: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        format!("doc_{document_name}_{}", millis % 1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DocumentIdSource, TimestampDocumentIds, ToolCall};

    #[test]
    fn timestamp_ids_embed_document_name() {
        let id = TimestampDocumentIds.allocate("passport.png");
        let suffix = id.strip_prefix("doc_passport.png_").unwrap();
        assert!(suffix.parse::<u64>().unwrap() < 1_000_000);
    }

    #[test]
    fn null_arguments_read_as_absent() {
        let call = ToolCall::new("detect_faces")
            .arg("min_confidence", json!(null))
            .arg("max_results", 2);
        assert_eq!(call.argument::<f64>("min_confidence").unwrap(), None);
        assert_eq!(call.argument::<usize>("max_results").unwrap(), Some(2));
        assert!(call.argument::<String>("max_results").is_err());
    }
}
