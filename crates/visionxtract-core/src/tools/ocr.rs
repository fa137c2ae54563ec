use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::models::{CoreError, CoreResult, ExecutionContext, TextBlock, keys};
use crate::providers::{GenerativeProvider, ImageAnalysisProvider};
use crate::tools::document::MISSING_CONTENT;
use crate::tools::face::document_name;
use crate::tools::json::parse_model_json;
use crate::tools::{DocumentIdSource, DocumentTools, StepTools, ToolCall, to_output, unknown_tool};

pub const OCR_TOOLS: &[&str] = &[
    "validate_document",
    "upload_document",
    "extract_text",
    "extract_key_value_pairs",
];

pub const MISSING_TEXT: &str = "OCR text not available in context. Please run extract_text first.";

const OCR_TEXT_PLACEHOLDER: &str = "{ocr_text}";

pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"Analyze the following OCR text and extract all key-value pairs.
A key-value pair consists of a label/key (like "Name", "Date", "Amount", etc.) and its corresponding value.

Extract all meaningful key-value pairs from the text. Keys should be descriptive labels (e.g., "Invoice Number", "Total Amount", "Customer Name").
Values should be the actual data corresponding to each key.

Return the results as a JSON array of objects, where each object has:
- "key": the label/field name
- "value": the corresponding value
- "confidence": optional confidence score (0.0 to 1.0)

Example format:
[
  {"key": "Invoice Number", "value": "INV-2024-001", "confidence": 0.95},
  {"key": "Date", "value": "2024-01-15", "confidence": 0.90},
  {"key": "Total Amount", "value": "$1,250.00", "confidence": 0.85}
]

OCR Text:
{ocr_text}

Extract all key-value pairs and return only valid JSON, no additional text."#;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextExtraction {
    pub full_text: String,
    pub text_blocks: Vec<TextBlock>,
    pub detected_languages: Vec<String>,
}

/// Text recognition and key-value extraction steps over a task's context.
#[derive(Clone)]
pub struct OcrTools {
    document: DocumentTools,
    vision: Arc<dyn ImageAnalysisProvider>,
    generative: Arc<dyn GenerativeProvider>,
}

impl OcrTools {
    pub fn new(
        vision: Arc<dyn ImageAnalysisProvider>,
        generative: Arc<dyn GenerativeProvider>,
        document_ids: Arc<dyn DocumentIdSource>,
    ) -> Self {
        Self {
            document: DocumentTools::new(document_ids),
            vision,
            generative,
        }
    }

    pub fn document(&self) -> &DocumentTools {
        &self.document
    }

    /// Recognizes text and stores `full_text`, `text_blocks` and
    /// `detected_languages`. Hints default to the context's `language_hints`.
    pub async fn extract_text(
        &self,
        context: &mut ExecutionContext,
        language_hints: Option<Vec<String>>,
    ) -> CoreResult<TextExtraction> {
        let content = context
            .bytes(keys::FILE_CONTENT)
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| CoreError::invalid_input(MISSING_CONTENT))?;

        let hints = match language_hints {
            Some(hints) => hints,
            None => context
                .decode::<Vec<String>>(keys::LANGUAGE_HINTS)?
                .unwrap_or_default(),
        };

        let annotation = self.vision.extract_text(content, &hints).await?;
        let found_text = !annotation.full_text.is_empty() || !annotation.regions.is_empty();

        let extraction = TextExtraction {
            text_blocks: annotation
                .regions
                .into_iter()
                .map(|region| TextBlock {
                    text: region.text,
                    x: f64::from(region.bounds.x),
                    y: f64::from(region.bounds.y),
                    width: f64::from(region.bounds.width),
                    height: f64::from(region.bounds.height),
                    confidence: region.confidence,
                    language: region.language,
                })
                .collect(),
            full_text: annotation.full_text,
            detected_languages: if found_text { hints } else { Vec::new() },
        };

        context.insert_json(keys::FULL_TEXT, extraction.full_text.clone());
        context.insert_serialized(keys::TEXT_BLOCKS, &extraction.text_blocks)?;
        context.insert_serialized(keys::DETECTED_LANGUAGES, &extraction.detected_languages)?;
        Ok(extraction)
    }

    /// Asks the generative provider for key-value pairs in the stored
    /// `full_text` and stores the raw entries under `key_value_pairs`.
    ///
    /// Empty text yields an empty list without a provider call.
    pub async fn extract_key_value_pairs(
        &self,
        context: &mut ExecutionContext,
        extraction_prompt: Option<String>,
    ) -> CoreResult<Vec<Value>> {
        let full_text = context
            .str(keys::FULL_TEXT)
            .ok_or_else(|| CoreError::invalid_input(MISSING_TEXT))?
            .to_string();

        if full_text.trim().is_empty() {
            context.insert_json(keys::KEY_VALUE_PAIRS, Value::Array(Vec::new()));
            return Ok(Vec::new());
        }

        let template = extraction_prompt
            .or_else(|| context.str(keys::EXTRACTION_PROMPT).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_EXTRACTION_PROMPT.to_string());
        let prompt = render_prompt(&template, &full_text);

        let response = self.generative.generate(&prompt).await.map_err(|error| {
            CoreError::upstream(format!(
                "Error during key-value extraction: {}",
                error.message
            ))
        })?;
        let pairs = parse_pairs(&response)?;

        context.insert_json(keys::KEY_VALUE_PAIRS, Value::Array(pairs.clone()));
        Ok(pairs)
    }
}

fn render_prompt(template: &str, full_text: &str) -> String {
    if template.contains(OCR_TEXT_PLACEHOLDER) {
        template.replace(OCR_TEXT_PLACEHOLDER, full_text)
    } else {
        format!("{template}\n\nOCR Text:\n{full_text}")
    }
}

/// A single object is treated as a one-element list; `null` and `{}` as none.
fn parse_pairs(response: &str) -> CoreResult<Vec<Value>> {
    let parsed = parse_model_json(response).map_err(|error| {
        CoreError::parse_failure(format!("Failed to parse JSON response: {error}"))
    })?;

    Ok(match parsed {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        Value::Object(map) if map.is_empty() => Vec::new(),
        other => vec![other],
    })
}

#[async_trait]
impl StepTools for OcrTools {
    fn tool_names(&self) -> &'static [&'static str] {
        OCR_TOOLS
    }

    async fn dispatch(
        &self,
        call: &ToolCall,
        context: &mut ExecutionContext,
    ) -> CoreResult<Value> {
        match call.name.as_str() {
            "validate_document" => {
                let name = document_name(call, context)?;
                to_output(&self.document.validate_document(context, &name))
            }
            "upload_document" => {
                let name = document_name(call, context)?;
                to_output(&self.document.upload_document(context, &name)?)
            }
            "extract_text" => {
                let extraction = self
                    .extract_text(context, call.argument("language_hints")?)
                    .await?;
                Ok(json!({
                    "full_text": extraction.full_text,
                    "text_block_count": extraction.text_blocks.len(),
                    "detected_languages": extraction.detected_languages,
                }))
            }
            "extract_key_value_pairs" => {
                let pairs = self
                    .extract_key_value_pairs(context, call.argument("extraction_prompt")?)
                    .await?;
                Ok(json!({ "count": pairs.len(), "key_value_pairs": pairs }))
            }
            _ => Err(unknown_tool(call)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DEFAULT_EXTRACTION_PROMPT, parse_pairs, render_prompt};

    #[test]
    fn default_prompt_embeds_text_once() {
        let prompt = render_prompt(DEFAULT_EXTRACTION_PROMPT, "Name: Ada");
        assert!(prompt.contains("OCR Text:\nName: Ada\n"));
        assert!(!prompt.contains("{ocr_text}"));
    }

    #[test]
    fn custom_prompt_without_placeholder_gets_text_appended() {
        let prompt = render_prompt("List the dates.", "Due 2024-01-15");
        assert!(prompt.ends_with("OCR Text:\nDue 2024-01-15"));
    }

    #[test]
    fn single_objects_are_wrapped() {
        assert_eq!(
            parse_pairs("```json\n{\"key\": \"Name\", \"value\": \"Ada\"}\n```").unwrap(),
            vec![json!({"key": "Name", "value": "Ada"})]
        );
        assert!(parse_pairs("{}").unwrap().is_empty());
        assert!(parse_pairs("null").unwrap().is_empty());
    }

    #[test]
    fn unparseable_output_is_a_parse_failure() {
        let error = parse_pairs("The document has no pairs.").unwrap_err();
        assert!(error.message.starts_with("Failed to parse JSON response:"));
    }
}
