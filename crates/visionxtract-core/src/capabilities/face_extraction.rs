//! Face detection and cropping over uploaded document images.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::agent::{
    ExecutionStrategy, FallbackPipeline, StepFailure, TaskDescription, TaskPrompt, execute_task,
};
use crate::capabilities::{
    elapsed_secs, judge_review, parse_arguments, to_value, unknown_operation,
};
use crate::models::encoding::bytes_from_value;
use crate::models::face::{default_min_confidence, default_true};
use crate::models::{
    BatchDocument, CoreError, CoreResult, ExecutionContext, ExtractedFace, FaceDetection,
    FaceExtractionRequest, FaceExtractionResponse, ModuleManifest, TaskSection, keys,
};
use crate::registry::{CapabilityHandler, ModuleEntrypoint, ModuleServices};
use crate::tools::FaceTools;
use crate::tools::face::FACE_TOOLS;

pub const MODULE_NAME: &str = "face_extraction";
pub const HANDLER_NAME: &str = "face_extraction_workflow";

const OPERATIONS: &[&str] = &["execute", "execute_batch"];

const REQUIRED_KEYS: &[&str] = &[keys::DOCUMENT_ID, keys::EXTRACTED_FACES];

pub fn entrypoint(
    services: &ModuleServices,
    manifest: &ModuleManifest,
) -> CoreResult<ModuleEntrypoint> {
    let workflow = FaceExtractionWorkflow::new(services.clone(), manifest);
    Ok(ModuleEntrypoint::new()
        .with_handler(HANDLER_NAME, Arc::new(workflow))
        .with_export(HANDLER_NAME))
}

#[derive(Clone, Debug, Deserialize)]
pub struct FaceBatchRequest {
    pub documents: Vec<BatchDocument>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_true")]
    pub extract_all_faces: bool,
}

#[derive(Clone)]
pub struct FaceExtractionWorkflow {
    tools: FaceTools,
    strategy: ExecutionStrategy,
    task: TaskSection,
    services: ModuleServices,
}

impl FaceExtractionWorkflow {
    pub fn new(services: ModuleServices, manifest: &ModuleManifest) -> Self {
        Self {
            tools: FaceTools::new(services.providers().vision.clone(), services.document_ids()),
            strategy: services.strategy(MODULE_NAME, manifest),
            task: manifest.task.clone(),
            services,
        }
    }

    /// Never fails: step errors end up in the response status.
    pub async fn execute(&self, request: &FaceExtractionRequest) -> FaceExtractionResponse {
        let started = Instant::now();

        let mut context = ExecutionContext::new();
        context.insert_bytes(keys::FILE_CONTENT, request.file_content.clone());
        context.insert_json(keys::DOCUMENT_NAME, request.document_name.clone());
        context.insert_json(keys::MIN_CONFIDENCE, request.min_confidence);
        context.insert_json(keys::EXTRACT_ALL_FACES, request.extract_all_faces);

        let task = self.task_description(request);
        let pipeline = FacePipeline {
            tools: &self.tools,
            document_name: &request.document_name,
        };
        let outcome =
            execute_task(&self.strategy, &task, &self.tools, &pipeline, context).await;

        let mut response = match &outcome.failure {
            Some(failure) => error_response(&outcome.context, failure, started),
            None => build_response(&outcome.context, started),
        };
        tracing::info!(
            module = MODULE_NAME,
            document = %request.document_name,
            path = ?outcome.path,
            faces = response.faces_detected,
            status = %response.status,
            "face extraction finished"
        );

        if request.evaluate_with_judge
            && let Some(review) = judge_review::face_request(
                &response,
                &request.document_name,
                request.min_confidence,
                request.judge_criteria.clone(),
                request.judge_task_description.clone(),
            )
        {
            let metadata = judge_review::review(&self.services, MODULE_NAME, review).await;
            response
                .metadata
                .get_or_insert_with(Map::new)
                .extend(metadata);
        }

        response
    }

    /// Runs every document concurrently; results keep the input order.
    pub async fn execute_batch(
        &self,
        request: &FaceBatchRequest,
    ) -> CoreResult<Vec<FaceExtractionResponse>> {
        if request.documents.is_empty() {
            return Err(CoreError::invalid_input("No valid documents provided"));
        }

        let requests: Vec<FaceExtractionRequest> = request
            .documents
            .iter()
            .map(|document| FaceExtractionRequest {
                min_confidence: request.min_confidence,
                extract_all_faces: request.extract_all_faces,
                ..FaceExtractionRequest::new(
                    document.file_content.clone(),
                    document.document_name.clone(),
                )
            })
            .collect();

        Ok(join_all(requests.iter().map(|request| self.execute(request))).await)
    }

    fn task_description(&self, request: &FaceExtractionRequest) -> TaskDescription {
        let name = &request.document_name;
        let min_confidence = request.min_confidence;

        let steps = if self.task.steps.is_empty() {
            FACE_TOOLS.iter().map(|step| step.to_string()).collect()
        } else {
            self.task.steps.clone()
        };

        let prompt = steps.iter().fold(
            TaskPrompt::new(
                "Extract faces from the uploaded document image and return the extracted face images.",
            )
            .parameter("Document name", name.clone())
            .parameter("Minimum confidence threshold", min_confidence.to_string())
            .parameter("Extract all faces", request.extract_all_faces.to_string())
            .variable("document_name", name.clone())
            .variable("min_confidence", min_confidence.to_string())
            .variable("extract_all_faces", request.extract_all_faces.to_string()),
            |prompt, step| {
                let instruction = match step.as_str() {
                    "validate_document" => format!(
                        "Call validate_document(document_name=\"{name}\") - Validate the image format"
                    ),
                    "upload_document" => format!(
                        "Call upload_document(document_name=\"{name}\") - Generate document_id for tracking"
                    ),
                    "detect_faces" => format!(
                        "Call detect_faces(min_confidence={min_confidence}) - Detect faces with confidence >= {min_confidence}"
                    ),
                    "extract_face_images" => "Call extract_face_images() - Extract face crops from the detected faces. This is REQUIRED - you must call this tool after detecting faces.".to_string(),
                    other => format!("Call {other}()"),
                };
                prompt.step(step, instruction)
            },
        );

        prompt
            .note("IMPORTANT: The file content is available in the tool execution context - you do not need to pass it as a parameter.")
            .note("After calling extract_face_images, the extracted faces will be available in the context.")
            .template(self.task.prompt_template.clone())
            .build()
    }
}

struct FacePipeline<'a> {
    tools: &'a FaceTools,
    document_name: &'a str,
}

#[async_trait]
impl FallbackPipeline for FacePipeline<'_> {
    fn required_keys(&self) -> &'static [&'static str] {
        REQUIRED_KEYS
    }

    async fn run(&self, context: &mut ExecutionContext) -> Result<(), StepFailure> {
        let validation = self
            .tools
            .document()
            .validate_document(context, self.document_name);
        if !validation.valid {
            return Err(StepFailure::InvalidInput(
                validation
                    .error
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        self.tools
            .document()
            .upload_document(context, self.document_name)
            .map_err(|error| StepFailure::Step(error.message))?;
        self.tools
            .detect_faces(context, None, None)
            .await
            .map_err(|error| StepFailure::Step(error.message))?;
        self.tools
            .extract_face_images(context)
            .await
            .map_err(|error| StepFailure::Step(error.message))?;
        Ok(())
    }
}

/// Builds the response from a completed context. Entries whose image data is
/// neither base64 text nor a byte array are skipped.
pub fn build_response(context: &ExecutionContext, started: Instant) -> FaceExtractionResponse {
    let faces: Vec<ExtractedFace> = context
        .json(keys::EXTRACTED_FACES)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(extracted_face)
        .collect();

    FaceExtractionResponse {
        document_id: context.str(keys::DOCUMENT_ID).unwrap_or_default().to_string(),
        faces_detected: faces.len(),
        faces_extracted: faces,
        processing_time: elapsed_secs(started),
        status: "success".to_string(),
        metadata: None,
    }
}

fn extracted_face(entry: &Value) -> Option<ExtractedFace> {
    let image_data = bytes_from_value(entry.get("image_data")?)?;
    let bounding_box: FaceDetection =
        serde_json::from_value(entry.get("bounding_box")?.clone()).ok()?;
    Some(ExtractedFace {
        face_id: entry.get("face_id")?.as_str()?.to_string(),
        image_data,
        bounding_box,
        source_document: entry
            .get("source_document")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn error_response(
    context: &ExecutionContext,
    failure: &StepFailure,
    started: Instant,
) -> FaceExtractionResponse {
    FaceExtractionResponse {
        document_id: context.str(keys::DOCUMENT_ID).unwrap_or_default().to_string(),
        faces_detected: 0,
        faces_extracted: Vec::new(),
        processing_time: elapsed_secs(started),
        status: failure.status(),
        metadata: None,
    }
}

#[async_trait]
impl CapabilityHandler for FaceExtractionWorkflow {
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
                let request: FaceExtractionRequest = parse_arguments(operation, arguments)?;
                to_value(&self.execute(&request).await)
            }
            "execute_batch" => {
                let request: FaceBatchRequest = parse_arguments(operation, arguments)?;
                let results = self.execute_batch(&request).await?;
                Ok(json!({
                    "total_processed": results.len(),
                    "results": to_value(&results)?,
                }))
            }
            _ => Err(unknown_operation(MODULE_NAME, operation)),
        }
    }
}
