//! Text recognition and key-value extraction over uploaded document images.

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
use crate::models::{
    BatchDocument, CoreError, CoreResult, ExecutionContext, KeyValuePair, KeyValueRequest,
    KeyValueResponse, ModuleManifest, OcrRequest, OcrResponse, TaskSection, TextBlock, keys,
};
use crate::registry::{CapabilityHandler, ModuleEntrypoint, ModuleServices};
use crate::tools::OcrTools;

pub const MODULE_NAME: &str = "ocr";
pub const HANDLER_NAME: &str = "ocr_workflow";

const OPERATIONS: &[&str] = &["execute", "extract_text", "execute_batch"];

const KEY_VALUE_STEPS: &[&str] = &[
    "validate_document",
    "upload_document",
    "extract_text",
    "extract_key_value_pairs",
];
const TEXT_STEPS: &[&str] = &["validate_document", "upload_document", "extract_text"];

const KEY_VALUE_KEYS: &[&str] = &[keys::DOCUMENT_ID, keys::KEY_VALUE_PAIRS];
const TEXT_KEYS: &[&str] = &[keys::DOCUMENT_ID, keys::FULL_TEXT];

pub fn entrypoint(
    services: &ModuleServices,
    manifest: &ModuleManifest,
) -> CoreResult<ModuleEntrypoint> {
    let workflow = OcrWorkflow::new(services.clone(), manifest);
    Ok(ModuleEntrypoint::new()
        .with_handler(HANDLER_NAME, Arc::new(workflow))
        .with_export(HANDLER_NAME))
}

#[derive(Clone, Debug, Deserialize)]
pub struct OcrBatchRequest {
    pub documents: Vec<BatchDocument>,
    #[serde(default)]
    pub language_hints: Option<Vec<String>>,
    #[serde(default)]
    pub extraction_prompt: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
    Text,
    KeyValues,
}

#[derive(Clone)]
pub struct OcrWorkflow {
    tools: OcrTools,
    strategy: ExecutionStrategy,
    task: TaskSection,
    services: ModuleServices,
}

impl OcrWorkflow {
    pub fn new(services: ModuleServices, manifest: &ModuleManifest) -> Self {
        let providers = services.providers();
        Self {
            tools: OcrTools::new(
                providers.vision.clone(),
                providers.generative.clone(),
                services.document_ids(),
            ),
            strategy: services.strategy(MODULE_NAME, manifest),
            task: manifest.task.clone(),
            services,
        }
    }

    /// Key-value extraction. Never fails: step errors end up in the status.
    pub async fn execute(&self, request: &KeyValueRequest) -> KeyValueResponse {
        let started = Instant::now();
        let mut context = seed_context(
            &request.file_content,
            &request.document_name,
            request.language_hints.as_deref(),
        );
        if let Some(prompt) = &request.extraction_prompt {
            context.insert_json(keys::EXTRACTION_PROMPT, prompt.clone());
        }

        let task = self.key_value_task(request);
        let pipeline = OcrPipeline {
            tools: &self.tools,
            document_name: &request.document_name,
            stage: Stage::KeyValues,
        };
        let outcome =
            execute_task(&self.strategy, &task, &self.tools, &pipeline, context).await;

        let mut response = match &outcome.failure {
            Some(failure) => KeyValueResponse {
                document_id: context_string(&outcome.context, keys::DOCUMENT_ID),
                key_value_pairs: Vec::new(),
                raw_text: context_string(&outcome.context, keys::FULL_TEXT),
                processing_time: elapsed_secs(started),
                status: failure.status(),
                metadata: None,
            },
            None => build_kv_response(&outcome.context, started),
        };
        tracing::info!(
            module = MODULE_NAME,
            document = %request.document_name,
            path = ?outcome.path,
            pairs = response.key_value_pairs.len(),
            status = %response.status,
            "key-value extraction finished"
        );

        if request.evaluate_with_judge
            && let Some(review) = judge_review::key_value_request(
                &response,
                &request.document_name,
                request.language_hints.as_deref(),
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

    /// Text recognition only.
    pub async fn extract_text(&self, request: &OcrRequest) -> OcrResponse {
        let started = Instant::now();
        let context = seed_context(
            &request.file_content,
            &request.document_name,
            request.language_hints.as_deref(),
        );

        let task = self.text_task(request);
        let pipeline = OcrPipeline {
            tools: &self.tools,
            document_name: &request.document_name,
            stage: Stage::Text,
        };
        let outcome =
            execute_task(&self.strategy, &task, &self.tools, &pipeline, context).await;

        let response = match &outcome.failure {
            Some(failure) => OcrResponse {
                document_id: context_string(&outcome.context, keys::DOCUMENT_ID),
                full_text: String::new(),
                text_blocks: Vec::new(),
                languages_detected: Vec::new(),
                processing_time: elapsed_secs(started),
                status: failure.status(),
                metadata: None,
            },
            None => build_text_response(&outcome.context, started),
        };
        tracing::info!(
            module = MODULE_NAME,
            document = %request.document_name,
            path = ?outcome.path,
            blocks = response.text_blocks.len(),
            status = %response.status,
            "text extraction finished"
        );
        response
    }

    /// Key-value extraction for every document concurrently, in input order.
    pub async fn execute_batch(
        &self,
        request: &OcrBatchRequest,
    ) -> CoreResult<Vec<KeyValueResponse>> {
        if request.documents.is_empty() {
            return Err(CoreError::invalid_input("No valid documents provided"));
        }

        let requests: Vec<KeyValueRequest> = request
            .documents
            .iter()
            .map(|document| KeyValueRequest {
                language_hints: request.language_hints.clone(),
                extraction_prompt: request.extraction_prompt.clone(),
                ..KeyValueRequest::new(document.file_content.clone(), document.document_name.clone())
            })
            .collect();

        Ok(join_all(requests.iter().map(|request| self.execute(request))).await)
    }

    fn key_value_task(&self, request: &KeyValueRequest) -> TaskDescription {
        self.task_prompt(
            "Extract key-value pairs from the uploaded document image.",
            KEY_VALUE_STEPS,
            &request.document_name,
            request.language_hints.as_deref(),
            request.extraction_prompt.as_deref(),
        )
        .note("After calling extract_key_value_pairs, the key-value pairs will be available in the context.")
        .template(self.task.prompt_template.clone())
        .build()
    }

    fn text_task(&self, request: &OcrRequest) -> TaskDescription {
        self.task_prompt(
            "Extract all text from the uploaded document image.",
            TEXT_STEPS,
            &request.document_name,
            request.language_hints.as_deref(),
            None,
        )
        .build()
    }

    fn task_prompt(
        &self,
        objective: &str,
        default_steps: &[&str],
        name: &str,
        language_hints: Option<&[String]>,
        extraction_prompt: Option<&str>,
    ) -> TaskPrompt {
        let hints = match language_hints {
            Some(hints) if !hints.is_empty() => json!(hints).to_string(),
            _ => "null".to_string(),
        };

        // Manifest steps only describe the key-value task.
        let steps: Vec<String> = if self.task.steps.is_empty() || default_steps == TEXT_STEPS {
            default_steps.iter().map(|step| step.to_string()).collect()
        } else {
            self.task.steps.clone()
        };

        let prompt = TaskPrompt::new(objective)
            .parameter("Document name", name)
            .parameter("Language hints", hints.clone())
            .variable("document_name", name)
            .variable("language_hints_json", hints.clone());

        steps
            .iter()
            .fold(prompt, |prompt, step| {
                let instruction = match step.as_str() {
                    "validate_document" => format!(
                        "Call validate_document(document_name=\"{name}\") - Validate the image format"
                    ),
                    "upload_document" => format!(
                        "Call upload_document(document_name=\"{name}\") - Generate a document_id for tracking"
                    ),
                    "extract_text" => format!(
                        "Call extract_text(language_hints={hints}) - Extract all text from the image using OCR"
                    ),
                    "extract_key_value_pairs" => match extraction_prompt {
                        Some(custom) => format!(
                            "Call extract_key_value_pairs(extraction_prompt={}) - Extract key-value pairs using custom prompt",
                            json!(custom)
                        ),
                        None => "Call extract_key_value_pairs() - Extract key-value pairs from the OCR text".to_string(),
                    },
                    other => format!("Call {other}()"),
                };
                prompt.step(step, instruction)
            })
            .note("IMPORTANT: The file content is available in the tool execution context.")
            .note("After calling extract_text, the extracted text will be available in the context.")
    }
}

fn seed_context(
    file_content: &[u8],
    document_name: &str,
    language_hints: Option<&[String]>,
) -> ExecutionContext {
    let mut context = ExecutionContext::new();
    context.insert_bytes(keys::FILE_CONTENT, file_content.to_vec());
    context.insert_json(keys::DOCUMENT_NAME, document_name);
    if let Some(hints) = language_hints {
        context.insert_json(keys::LANGUAGE_HINTS, json!(hints));
    }
    context
}

fn context_string(context: &ExecutionContext, key: &str) -> String {
    context.str(key).unwrap_or_default().to_string()
}

struct OcrPipeline<'a> {
    tools: &'a OcrTools,
    document_name: &'a str,
    stage: Stage,
}

#[async_trait]
impl FallbackPipeline for OcrPipeline<'_> {
    fn required_keys(&self) -> &'static [&'static str] {
        match self.stage {
            Stage::Text => TEXT_KEYS,
            Stage::KeyValues => KEY_VALUE_KEYS,
        }
    }

    async fn run(&self, context: &mut ExecutionContext) -> Result<(), StepFailure> {
        let document = self.tools.document();
        let validation = document.validate_document(context, self.document_name);
        if !validation.valid {
            return Err(StepFailure::InvalidInput(
                validation
                    .error
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        document
            .upload_document(context, self.document_name)
            .map_err(|error| StepFailure::Step(error.message))?;
        self.tools
            .extract_text(context, None)
            .await
            .map_err(|error| StepFailure::Step(error.message))?;

        if self.stage == Stage::KeyValues {
            self.tools
                .extract_key_value_pairs(context, None)
                .await
                .map_err(|error| StepFailure::Step(error.message))?;
        }
        Ok(())
    }
}

/// Normalizes the stored pairs: absent or non-text values become strings and
/// entries with neither key nor value are dropped.
pub fn build_kv_response(context: &ExecutionContext, started: Instant) -> KeyValueResponse {
    let key_value_pairs = context
        .json(keys::KEY_VALUE_PAIRS)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|entry| {
            let key = text_of(entry.get("key"));
            let value = text_of(entry.get("value"));
            if key.is_empty() && value.is_empty() {
                return None;
            }
            Some(KeyValuePair {
                key,
                value,
                confidence: entry.get("confidence").and_then(Value::as_f64),
            })
        })
        .collect();

    KeyValueResponse {
        document_id: context_string(context, keys::DOCUMENT_ID),
        key_value_pairs,
        raw_text: context_string(context, keys::FULL_TEXT),
        processing_time: elapsed_secs(started),
        status: "success".to_string(),
        metadata: None,
    }
}

pub fn build_text_response(context: &ExecutionContext, started: Instant) -> OcrResponse {
    let text_blocks = context
        .decode::<Vec<TextBlock>>(keys::TEXT_BLOCKS)
        .unwrap_or_else(|error| {
            tracing::warn!(module = MODULE_NAME, message = %error.message, "dropping malformed text blocks");
            None
        })
        .unwrap_or_default();
    let languages_detected = context
        .decode::<Vec<String>>(keys::DETECTED_LANGUAGES)
        .ok()
        .flatten()
        .unwrap_or_default();

    OcrResponse {
        document_id: context_string(context, keys::DOCUMENT_ID),
        full_text: context_string(context, keys::FULL_TEXT),
        text_blocks,
        languages_detected,
        processing_time: elapsed_secs(started),
        status: "success".to_string(),
        metadata: None,
    }
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl CapabilityHandler for OcrWorkflow {
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
                let request: KeyValueRequest = parse_arguments(operation, arguments)?;
                to_value(&self.execute(&request).await)
            }
            "extract_text" => {
                let request: OcrRequest = parse_arguments(operation, arguments)?;
                to_value(&self.extract_text(&request).await)
            }
            "execute_batch" => {
                let request: OcrBatchRequest = parse_arguments(operation, arguments)?;
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
