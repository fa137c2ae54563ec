//! Seams for the image-analysis and generative-text services the tools call.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{CoreError, CoreResult, FaceLandmark};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    /// Axis-aligned box enclosing the given polygon vertices.
    pub fn from_vertices(vertices: &[(i32, i32)]) -> Option<Self> {
        let min_x = vertices.iter().map(|(x, _)| *x).min()?;
        let min_y = vertices.iter().map(|(_, y)| *y).min()?;
        let max_x = vertices.iter().map(|(x, _)| *x).max()?;
        let max_y = vertices.iter().map(|(_, y)| *y).max()?;
        Some(Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }
}

/// One raw face annotation. `confidence` is either 0..=1 or a 0..=100 percentage.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceAnnotation {
    pub bounds: Option<BoundingBox>,
    pub confidence: f64,
    pub landmarks: Vec<FaceLandmark>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextRegion {
    pub text: String,
    pub bounds: BoundingBox,
    pub confidence: Option<f64>,
    pub language: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextAnnotation {
    pub full_text: String,
    pub regions: Vec<TextRegion>,
}

#[async_trait]
pub trait ImageAnalysisProvider: Send + Sync {
    async fn detect_faces(&self, image: &[u8]) -> CoreResult<Vec<FaceAnnotation>>;

    async fn extract_text(
        &self,
        image: &[u8],
        language_hints: &[String],
    ) -> CoreResult<TextAnnotation>;
}

#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> CoreResult<String>;
}

/// Stand-in used when no provider credentials were wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredProvider;

#[async_trait]
impl ImageAnalysisProvider for UnconfiguredProvider {
    async fn detect_faces(&self, _image: &[u8]) -> CoreResult<Vec<FaceAnnotation>> {
        Err(CoreError::upstream("image analysis provider is not configured"))
    }

    async fn extract_text(
        &self,
        _image: &[u8],
        _language_hints: &[String],
    ) -> CoreResult<TextAnnotation> {
        Err(CoreError::upstream("image analysis provider is not configured"))
    }
}

#[async_trait]
impl GenerativeProvider for UnconfiguredProvider {
    async fn generate(&self, _prompt: &str) -> CoreResult<String> {
        Err(CoreError::upstream("generative provider is not configured"))
    }
}

#[derive(Clone)]
pub struct Providers {
    pub vision: Arc<dyn ImageAnalysisProvider>,
    pub generative: Arc<dyn GenerativeProvider>,
}

impl Providers {
    pub fn new(
        vision: Arc<dyn ImageAnalysisProvider>,
        generative: Arc<dyn GenerativeProvider>,
    ) -> Self {
        Self { vision, generative }
    }

    pub fn unconfigured() -> Self {
        Self::new(Arc::new(UnconfiguredProvider), Arc::new(UnconfiguredProvider))
    }
}

#[cfg(test)]
mod tests {
    use super::BoundingBox;

    #[test]
    fn bounding_box_encloses_vertices() {
        let bounds = BoundingBox::from_vertices(&[(10, 20), (50, 22), (48, 80), (12, 75)]);
        assert_eq!(
            bounds,
            Some(BoundingBox {
                x: 10,
                y: 20,
                width: 40,
                height: 60,
            })
        );
        assert_eq!(BoundingBox::from_vertices(&[]), None);
    }
}
