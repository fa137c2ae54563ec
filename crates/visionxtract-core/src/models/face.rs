use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::encoding::base64_bytes;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Bounding box and normalized (0..=1) confidence of one detected face.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f64,
    #[serde(default)]
    pub landmarks: Option<Vec<FaceLandmark>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFace {
    pub face_id: String,
    #[serde(with = "base64_bytes")]
    pub image_data: Vec<u8>,
    pub bounding_box: FaceDetection,
    pub source_document: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceExtractionRequest {
    #[serde(with = "base64_bytes")]
    pub file_content: Vec<u8>,
    pub document_name: String,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_true")]
    pub extract_all_faces: bool,
    #[serde(default)]
    pub evaluate_with_judge: bool,
    #[serde(default)]
    pub judge_criteria: Option<Vec<crate::models::EvaluationCriteria>>,
    #[serde(default)]
    pub judge_task_description: Option<String>,
}

impl FaceExtractionRequest {
    pub fn new(file_content: Vec<u8>, document_name: impl Into<String>) -> Self {
        Self {
            file_content,
            document_name: document_name.into(),
            min_confidence: default_min_confidence(),
            extract_all_faces: true,
            evaluate_with_judge: false,
            judge_criteria: None,
            judge_task_description: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceExtractionResponse {
    pub document_id: String,
    pub faces_detected: usize,
    pub faces_extracted: Vec<ExtractedFace>,
    pub processing_time: f64,
    pub status: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

pub(crate) fn default_min_confidence() -> f64 {
    0.7
}

pub(crate) fn default_true() -> bool {
    true
}
