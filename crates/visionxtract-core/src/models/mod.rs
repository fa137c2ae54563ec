pub mod context;
pub mod document;
pub mod encoding;
pub mod error;
pub mod face;
pub mod judge;
pub mod module;
pub mod ocr;

pub use context::{ContextValue, ExecutionContext, TaskResult, keys};
pub use document::{BatchDocument, DocumentExtractionRequest, DocumentExtractionResponse};
pub use error::{CoreError, CoreErrorKind, CoreResult, TransportFault};
pub use face::{
    ExtractedFace, FaceDetection, FaceExtractionRequest, FaceExtractionResponse, FaceLandmark,
};
pub use judge::{
    ComparisonRequest, ComparisonResponse, ComparisonResult, EvaluationCriteria,
    EvaluationRequest, JudgeResponse, Score,
};
pub use module::{AgentSection, ModuleManifest, ModuleSection, TaskSection};
pub use ocr::{KeyValuePair, KeyValueRequest, KeyValueResponse, OcrRequest, OcrResponse, TextBlock};
