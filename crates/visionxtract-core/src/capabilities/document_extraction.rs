//! Composite extraction: faces and key-value pairs from one document, each
//! delegated to its own module through the transport-selecting client.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::capabilities::{
    elapsed_secs, face_extraction, ocr, parse_arguments, to_value, unknown_operation,
};
use crate::models::{
    CoreError, CoreResult, DocumentExtractionRequest, DocumentExtractionResponse,
    FaceExtractionRequest, FaceExtractionResponse, KeyValueRequest, KeyValueResponse,
    ModuleManifest,
};
use crate::registry::{CapabilityHandler, ModuleEntrypoint, ModuleServices};
use crate::transport::ModuleCall;

pub const MODULE_NAME: &str = "document_extraction";
pub const HANDLER_NAME: &str = "document_extraction_workflow";

const OPERATIONS: &[&str] = &["execute"];

pub fn entrypoint(
    services: &ModuleServices,
    _manifest: &ModuleManifest,
) -> CoreResult<ModuleEntrypoint> {
    let workflow = DocumentExtractionWorkflow::new(services.clone());
    Ok(ModuleEntrypoint::new()
        .with_handler(HANDLER_NAME, Arc::new(workflow))
        .with_export(HANDLER_NAME))
}

#[derive(Clone)]
pub struct DocumentExtractionWorkflow {
    services: ModuleServices,
}

impl DocumentExtractionWorkflow {
    pub fn new(services: ModuleServices) -> Self {
        Self { services }
    }

    /// Runs face extraction, then key-value extraction. A failed sub-call is
    /// recorded under `{module}_error` in the metadata.
    pub async fn execute(&self, request: &DocumentExtractionRequest) -> DocumentExtractionResponse {
        let started = Instant::now();
        let mut metadata = Map::new();

        let face_request = FaceExtractionRequest {
            min_confidence: request.min_confidence,
            extract_all_faces: request.extract_all_faces,
            evaluate_with_judge: request.evaluate_with_judge,
            judge_criteria: request.judge_criteria.clone(),
            judge_task_description: request.judge_task_description.clone(),
            ..FaceExtractionRequest::new(request.file_content.clone(), request.document_name.clone())
        };
        let face_started = Instant::now();
        let faces: Option<FaceExtractionResponse> = self
            .delegate(face_extraction::MODULE_NAME, &face_request, &mut metadata)
            .await;
        let face_extraction_time = elapsed_secs(face_started);

        let key_value_request = KeyValueRequest {
            language_hints: request.language_hints.clone(),
            extraction_prompt: request.extraction_prompt.clone(),
            evaluate_with_judge: request.evaluate_with_judge,
            judge_criteria: request.judge_criteria.clone(),
            judge_task_description: request.judge_task_description.clone(),
            ..KeyValueRequest::new(request.file_content.clone(), request.document_name.clone())
        };
        let key_value_started = Instant::now();
        let key_values: Option<KeyValueResponse> = self
            .delegate(ocr::MODULE_NAME, &key_value_request, &mut metadata)
            .await;
        let key_value_extraction_time = elapsed_secs(key_value_started);

        if request.evaluate_with_judge {
            if let Some(evaluation) =
                evaluation_of(faces.as_ref().and_then(|r| r.metadata.as_ref()))
            {
                metadata.insert("face_extraction_evaluation".to_string(), evaluation);
            }
            if let Some(evaluation) =
                evaluation_of(key_values.as_ref().and_then(|r| r.metadata.as_ref()))
            {
                metadata.insert("ocr_evaluation".to_string(), evaluation);
            }
        }

        let (faces_detected, faces_extracted, face_document_id) = match faces {
            Some(response) => (
                response.faces_detected,
                response.faces_extracted,
                response.document_id,
            ),
            None => (0, Vec::new(), String::new()),
        };
        let (key_value_pairs, full_text, key_value_document_id) = match key_values {
            Some(response) => (
                response.key_value_pairs,
                response.raw_text,
                response.document_id,
            ),
            None => (Vec::new(), String::new(), String::new()),
        };

        let document_id = if face_document_id.is_empty() {
            key_value_document_id
        } else {
            face_document_id
        };
        let status = compose_status(faces_detected, key_value_pairs.len());
        tracing::info!(
            module = MODULE_NAME,
            document = %request.document_name,
            status = %status,
            "document extraction finished"
        );

        DocumentExtractionResponse {
            document_id,
            faces_detected,
            faces_extracted,
            full_text,
            key_value_pairs,
            processing_time: elapsed_secs(started),
            face_extraction_time: Some(face_extraction_time),
            key_value_extraction_time: Some(key_value_extraction_time),
            status,
            metadata: (!metadata.is_empty()).then_some(metadata),
        }
    }

    async fn delegate<Req, Resp>(
        &self,
        module: &str,
        request: &Req,
        metadata: &mut Map<String, Value>,
    ) -> Option<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send,
    {
        match self.call(module, request).await {
            Ok(response) => Some(response),
            Err(error) => {
                tracing::warn!(
                    module,
                    kind = ?error.kind,
                    message = %error.message,
                    "sub-module call failed"
                );
                metadata.insert(format!("{module}_error"), Value::String(error.to_string()));
                None
            }
        }
    }

    async fn call<Req, Resp>(&self, module: &str, request: &Req) -> CoreResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send,
    {
        let payload = to_value(request)?;
        let client = self.services.client(module)?;
        let result = client.call(&ModuleCall::post("execute").payload(payload)).await;
        client.close();

        serde_json::from_value(Value::Object(result?)).map_err(|error| {
            CoreError::parse_failure(format!("malformed {module} response: {error}"))
                .for_module(module)
        })
    }
}

fn evaluation_of(metadata: Option<&Map<String, Value>>) -> Option<Value> {
    metadata.and_then(|metadata| metadata.get("evaluation")).cloned()
}

/// "success: 2 face(s) detected, 3 key-value pair(s) extracted", or
/// "completed" when both are empty.
pub fn compose_status(faces_detected: usize, key_value_pairs: usize) -> String {
    let mut parts = Vec::new();
    if faces_detected > 0 {
        parts.push(format!("{faces_detected} face(s) detected"));
    }
    if key_value_pairs > 0 {
        parts.push(format!("{key_value_pairs} key-value pair(s) extracted"));
    }

    if parts.is_empty() {
        "completed".to_string()
    } else {
        format!("success: {}", parts.join(", "))
    }
}

#[async_trait]
impl CapabilityHandler for DocumentExtractionWorkflow {
    fn operations(&self) -> &'static [&'static str] {
        OPERATIONS
    }

    async fn invoke(
        &self,
        operation: &str,
        arguments: Option<Map<String, Value>>,
    ) -> CoreResult<Value> {
        match operation {
            "execute" => {
                let request: DocumentExtractionRequest = parse_arguments(operation, arguments)?;
                to_value(&self.execute(&request).await)
            }
            _ => Err(unknown_operation(MODULE_NAME, operation)),
        }
    }
}
