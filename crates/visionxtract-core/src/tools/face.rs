use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::models::{
    CoreError, CoreResult, ExecutionContext, ExtractedFace, FaceDetection, keys,
};
use crate::providers::ImageAnalysisProvider;
use crate::tools::image_ops::{self, FACE_PADDING};
use crate::tools::{DocumentIdSource, DocumentTools, StepTools, ToolCall, to_output, unknown_tool};

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;

pub const FACE_TOOLS: &[&str] = &[
    "validate_document",
    "upload_document",
    "detect_faces",
    "extract_face_images",
];

/// Face detection and cropping steps over a task's context.
#[derive(Clone)]
pub struct FaceTools {
    document: DocumentTools,
    vision: Arc<dyn ImageAnalysisProvider>,
}

impl FaceTools {
    pub fn new(
        vision: Arc<dyn ImageAnalysisProvider>,
        document_ids: Arc<dyn DocumentIdSource>,
    ) -> Self {
        Self {
            document: DocumentTools::new(document_ids),
            vision,
        }
    }

    pub fn document(&self) -> &DocumentTools {
        &self.document
    }

    /// Detects faces and stores them under `face_detections`.
    ///
    /// Unset parameters come from the context: `min_confidence` (default 0.7)
    /// and `extract_all_faces` (default true, otherwise one face at most).
    /// Results are truncated to `max_results` before the confidence filter.
    pub async fn detect_faces(
        &self,
        context: &mut ExecutionContext,
        min_confidence: Option<f64>,
        max_results: Option<usize>,
    ) -> CoreResult<Vec<FaceDetection>> {
        let Some(content) = context.bytes(keys::FILE_CONTENT) else {
            return Ok(Vec::new());
        };

        let min_confidence = min_confidence
            .or_else(|| context.f64(keys::MIN_CONFIDENCE))
            .unwrap_or(DEFAULT_MIN_CONFIDENCE);
        let max_results = max_results.or_else(|| {
            let extract_all = context.bool(keys::EXTRACT_ALL_FACES).unwrap_or(true);
            (!extract_all).then_some(1)
        });

        let annotations = self.vision.detect_faces(content).await?;
        let limit = max_results.unwrap_or(annotations.len());

        let detections: Vec<FaceDetection> = annotations
            .into_iter()
            .take(limit)
            .filter_map(|annotation| {
                let confidence = normalize_confidence(annotation.confidence);
                if confidence < min_confidence {
                    return None;
                }
                let bounds = annotation.bounds?;
                Some(FaceDetection {
                    x: bounds.x,
                    y: bounds.y,
                    width: bounds.width,
                    height: bounds.height,
                    confidence,
                    landmarks: (!annotation.landmarks.is_empty()).then_some(annotation.landmarks),
                })
            })
            .collect();

        context.insert_serialized(keys::FACE_DETECTIONS, &detections)?;
        Ok(detections)
    }

    /// Crops every stored detection into a PNG and stores the faces, image
    /// bytes base64-encoded, under `extracted_faces`.
    pub async fn extract_face_images(
        &self,
        context: &mut ExecutionContext,
    ) -> CoreResult<Vec<ExtractedFace>> {
        let Some(content) = context.bytes(keys::FILE_CONTENT) else {
            return Ok(Vec::new());
        };
        let content = content.to_vec();
        let detections: Vec<FaceDetection> =
            context.decode(keys::FACE_DETECTIONS)?.unwrap_or_default();
        let document_id = context.str(keys::DOCUMENT_ID).unwrap_or_default().to_string();

        let faces = if detections.is_empty() {
            Vec::new()
        } else {
            tokio::task::spawn_blocking(move || crop_faces(&content, detections, &document_id))
                .await
                .map_err(|join_error| {
                    CoreError::internal(format!("face cropping join failure: {join_error}"))
                })??
        };

        context.insert_serialized(keys::EXTRACTED_FACES, &faces)?;
        Ok(faces)
    }
}

fn crop_faces(
    content: &[u8],
    detections: Vec<FaceDetection>,
    document_id: &str,
) -> CoreResult<Vec<ExtractedFace>> {
    let image = image_ops::load(content)?;
    let mut faces = Vec::with_capacity(detections.len());

    for (index, detection) in detections.into_iter().enumerate() {
        let bounds = (detection.x, detection.y, detection.width, detection.height);
        let Some(image_data) = image_ops::crop_png(&image, bounds, FACE_PADDING)? else {
            tracing::debug!(document_id, face = index + 1, "skipping face outside image bounds");
            continue;
        };
        faces.push(ExtractedFace {
            face_id: format!("{document_id}_face_{}", index + 1),
            image_data,
            bounding_box: detection,
            source_document: document_id.to_string(),
        });
    }

    Ok(faces)
}

/// Providers report either a 0..=1 score or a 0..=100 percentage.
pub fn normalize_confidence(raw: f64) -> f64 {
    if raw > 1.0 { raw / 100.0 } else { raw }
}

#[async_trait]
impl StepTools for FaceTools {
    fn tool_names(&self) -> &'static [&'static str] {
        FACE_TOOLS
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
            "detect_faces" => {
                let detections = self
                    .detect_faces(
                        context,
                        call.argument("min_confidence")?,
                        call.argument("max_results")?,
                    )
                    .await?;
                to_output(&detections)
            }
            "extract_face_images" => {
                let faces = self.extract_face_images(context).await?;
                Ok(json!({
                    "faces_extracted": faces.len(),
                    "face_ids": faces.iter().map(|face| face.face_id.as_str()).collect::<Vec<_>>(),
                }))
            }
            _ => Err(unknown_tool(call)),
        }
    }
}

pub(crate) fn document_name(call: &ToolCall, context: &ExecutionContext) -> CoreResult<String> {
    call.argument::<String>("document_name")?
        .or_else(|| context.str(keys::DOCUMENT_NAME).map(str::to_string))
        .ok_or_else(|| CoreError::invalid_input("document_name is required"))
}
