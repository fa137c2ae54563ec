use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::EvaluationCriteria;
use crate::models::encoding::base64_bytes;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OcrRequest {
    #[serde(with = "base64_bytes")]
    pub file_content: Vec<u8>,
    pub document_name: String,
    #[serde(default)]
    pub language_hints: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyValueRequest {
    #[serde(with = "base64_bytes")]
    pub file_content: Vec<u8>,
    pub document_name: String,
    #[serde(default)]
    pub language_hints: Option<Vec<String>>,
    #[serde(default)]
    pub extraction_prompt: Option<String>,
    #[serde(default)]
    pub evaluate_with_judge: bool,
    #[serde(default)]
    pub judge_criteria: Option<Vec<EvaluationCriteria>>,
    #[serde(default)]
    pub judge_task_description: Option<String>,
}

impl KeyValueRequest {
    pub fn new(file_content: Vec<u8>, document_name: impl Into<String>) -> Self {
        Self {
            file_content,
            document_name: document_name.into(),
            language_hints: None,
            extraction_prompt: None,
            evaluate_with_judge: false,
            judge_criteria: None,
            judge_task_description: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OcrResponse {
    pub document_id: String,
    pub full_text: String,
    pub text_blocks: Vec<TextBlock>,
    pub languages_detected: Vec<String>,
    pub processing_time: f64,
    pub status: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyValueResponse {
    pub document_id: String,
    pub key_value_pairs: Vec<KeyValuePair>,
    pub raw_text: String,
    pub processing_time: f64,
    pub status: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}
