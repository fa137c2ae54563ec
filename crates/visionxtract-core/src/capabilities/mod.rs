//! Capability modules registered in the built-in catalog.

pub mod document_extraction;
pub mod face_extraction;
pub mod llm_judge;
pub mod ocr;

mod judge_review;

use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::models::{CoreError, CoreErrorKind, CoreResult};

pub(crate) fn parse_arguments<T: DeserializeOwned>(
    operation: &str,
    arguments: Option<Map<String, Value>>,
) -> CoreResult<T> {
    let arguments = arguments.ok_or_else(|| {
        CoreError::invalid_input(format!("operation '{operation}' requires named arguments"))
    })?;
    serde_json::from_value(Value::Object(arguments)).map_err(|error| {
        CoreError::invalid_input(format!("invalid arguments for '{operation}': {error}"))
            .for_operation(operation)
    })
}

pub(crate) fn to_value<T: Serialize>(value: &T) -> CoreResult<Value> {
    serde_json::to_value(value)
        .map_err(|error| CoreError::internal(format!("failed to encode result: {error}")))
}

pub(crate) fn unknown_operation(module: &str, operation: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::NotFound,
        format!("operation '{operation}' not found on module '{module}'"),
    )
    .for_module(module)
    .for_operation(operation)
}

pub(crate) fn elapsed_secs(started: Instant) -> f64 {
    started.elapsed().as_secs_f64()
}
