use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::encoding::base64_bytes;
use crate::models::face::default_min_confidence;
use crate::models::{EvaluationCriteria, ExtractedFace, KeyValuePair};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentExtractionRequest {
    #[serde(with = "base64_bytes")]
    pub file_content: Vec<u8>,
    pub document_name: String,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "crate::models::face::default_true")]
    pub extract_all_faces: bool,
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

impl DocumentExtractionRequest {
    pub fn new(file_content: Vec<u8>, document_name: impl Into<String>) -> Self {
        Self {
            file_content,
            document_name: document_name.into(),
            min_confidence: default_min_confidence(),
            extract_all_faces: true,
            language_hints: None,
            extraction_prompt: None,
            evaluate_with_judge: false,
            judge_criteria: None,
            judge_task_description: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentExtractionResponse {
    pub document_id: String,
    pub faces_detected: usize,
    pub faces_extracted: Vec<ExtractedFace>,
    pub full_text: String,
    pub key_value_pairs: Vec<KeyValuePair>,
    pub processing_time: f64,
    #[serde(default)]
    pub face_extraction_time: Option<f64>,
    #[serde(default)]
    pub key_value_extraction_time: Option<f64>,
    pub status: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// One document of a batch request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchDocument {
    #[serde(with = "base64_bytes")]
    pub file_content: Vec<u8>,
    pub document_name: String,
}
