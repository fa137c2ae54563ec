use serde_json::{Map, Value, json};

use crate::capabilities::llm_judge;
use crate::models::{
    CoreResult, EvaluationCriteria, EvaluationRequest, FaceExtractionResponse, KeyValueResponse,
};
use crate::registry::ModuleServices;

/// Reviews `request` with the judge module and returns the metadata to attach:
/// `evaluation` + `evaluated: true`, or `evaluation_error` + `evaluated: false`.
pub(crate) async fn review(
    services: &ModuleServices,
    subject: &str,
    request: EvaluationRequest,
) -> Map<String, Value> {
    let mut metadata = Map::new();
    match evaluate(services, &request).await {
        Ok(evaluation) => {
            metadata.insert("evaluation".to_string(), evaluation);
            metadata.insert("evaluated".to_string(), Value::Bool(true));
        }
        Err(error) => {
            tracing::warn!(
                subject,
                kind = ?error.kind,
                message = %error.message,
                "failed to evaluate extraction result with judge"
            );
            metadata.insert("evaluation_error".to_string(), Value::String(error.to_string()));
            metadata.insert("evaluated".to_string(), Value::Bool(false));
        }
    }
    metadata
}

async fn evaluate(services: &ModuleServices, request: &EvaluationRequest) -> CoreResult<Value> {
    let client = services.client(llm_judge::MODULE_NAME)?;
    let result = client.evaluate(request).await;
    client.close();
    result.and_then(|response| crate::capabilities::to_value(&response))
}

/// `None` when no faces were extracted.
pub(crate) fn face_request(
    response: &FaceExtractionResponse,
    document_name: &str,
    min_confidence: f64,
    criteria: Option<Vec<EvaluationCriteria>>,
    task_description: Option<String>,
) -> Option<EvaluationRequest> {
    if response.faces_extracted.is_empty() {
        return None;
    }

    let mut lines = vec![
        format!("Document: {document_name}"),
        format!("Faces detected: {}", response.faces_detected),
        format!("Min confidence threshold: {min_confidence}"),
    ];
    lines.extend(response.faces_extracted.iter().enumerate().map(|(index, face)| {
        format!(
            "Face {}: ID={}, Confidence={}",
            index + 1,
            face.face_id,
            face.bounding_box.confidence
        )
    }));

    Some(EvaluationRequest {
        content: lines.join("\n"),
        reference: None,
        criteria,
        task_description: Some(task_description.unwrap_or_else(|| {
            format!("Evaluate face extraction quality for document: {document_name}")
        })),
        context: json!({
            "document_name": document_name,
            "faces_detected": response.faces_detected,
            "min_confidence": min_confidence,
        })
        .as_object()
        .cloned(),
    })
}

/// `None` when no key-value pairs were extracted.
pub(crate) fn key_value_request(
    response: &KeyValueResponse,
    document_name: &str,
    language_hints: Option<&[String]>,
    criteria: Option<Vec<EvaluationCriteria>>,
    task_description: Option<String>,
) -> Option<EvaluationRequest> {
    if response.key_value_pairs.is_empty() {
        return None;
    }

    let content = response
        .key_value_pairs
        .iter()
        .map(|pair| format!("{}: {}", pair.key, pair.value))
        .collect::<Vec<_>>()
        .join("\n");

    Some(EvaluationRequest {
        content,
        reference: None,
        criteria,
        task_description: Some(task_description.unwrap_or_else(|| {
            format!("Evaluate key-value extraction quality for document: {document_name}")
        })),
        context: json!({
            "document_name": document_name,
            "language_hints": language_hints,
            "key_value_pairs_count": response.key_value_pairs.len(),
            "raw_text_length": response.raw_text.chars().count(),
        })
        .as_object()
        .cloned(),
    })
}
