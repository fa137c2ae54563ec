use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::json;
use visionxtract_core::agent::{AgentProfile, DecisionProcess, DecisionSession, StepEvent, TaskDescription};
use visionxtract_core::capabilities::face_extraction::FaceExtractionWorkflow;
use visionxtract_core::capabilities::ocr::OcrWorkflow;
use visionxtract_core::config::PlatformConfig;
use visionxtract_core::models::encoding::encode;
use visionxtract_core::models::{
    CoreError, CoreResult, FaceExtractionRequest, FaceExtractionResponse, KeyValueRequest,
    KeyValueResponse, ModuleManifest, OcrRequest,
};
use visionxtract_core::providers::{
    BoundingBox, FaceAnnotation, GenerativeProvider, ImageAnalysisProvider, Providers,
    TextAnnotation, TextRegion,
};
use visionxtract_core::registry::{ModuleCatalog, ModuleEnvironment, ModuleRegistry};
use visionxtract_core::tools::image_ops::encode_png;
use visionxtract_core::tools::{DocumentIdSource, ToolCall, ToolObservation};

struct FakeVision {
    faces: Vec<FaceAnnotation>,
    text: TextAnnotation,
    face_calls: AtomicUsize,
    text_calls: AtomicUsize,
}

impl FakeVision {
    fn new(faces: Vec<FaceAnnotation>, text: TextAnnotation) -> Arc<Self> {
        Arc::new(Self {
            faces,
            text,
            face_calls: AtomicUsize::new(0),
            text_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ImageAnalysisProvider for FakeVision {
    async fn detect_faces(&self, _image: &[u8]) -> CoreResult<Vec<FaceAnnotation>> {
        self.face_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.faces.clone())
    }

    async fn extract_text(
        &self,
        _image: &[u8],
        _language_hints: &[String],
    ) -> CoreResult<TextAnnotation> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

struct FakeGenerator {
    reply: Result<String, String>,
    calls: AtomicUsize,
}

impl FakeGenerator {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GenerativeProvider for FakeGenerator {
    async fn generate(&self, _prompt: &str) -> CoreResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().map_err(CoreError::upstream)
    }
}

#[derive(Default)]
struct FixedIds {
    allocations: AtomicUsize,
}

impl DocumentIdSource for FixedIds {
    fn allocate(&self, document_name: &str) -> String {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        format!("doc_{document_name}_100")
    }
}

/// Planner that issues the given tool names one event at a time, then fails
/// or stops as told.
struct ScriptedPlanner {
    steps: Vec<&'static str>,
    fail_after: bool,
}

#[async_trait]
impl DecisionProcess for ScriptedPlanner {
    async fn open(
        &self,
        _session_id: &str,
        _profile: &AgentProfile,
        _task: &TaskDescription,
        _tool_names: &[&str],
    ) -> CoreResult<Box<dyn DecisionSession>> {
        Ok(Box::new(ScriptedSession {
            steps: self.steps.iter().copied().collect(),
            fail_after: self.fail_after,
        }))
    }
}

struct ScriptedSession {
    steps: VecDeque<&'static str>,
    fail_after: bool,
}

#[async_trait]
impl DecisionSession for ScriptedSession {
    async fn next_event(
        &mut self,
        _observations: &[ToolObservation],
    ) -> CoreResult<Option<StepEvent>> {
        match self.steps.pop_front() {
            Some(step) => Ok(Some(StepEvent {
                calls: vec![ToolCall::new(step)],
                message: None,
            })),
            None if self.fail_after => Err(CoreError::upstream("planner connection reset")),
            None => Ok(None),
        }
    }
}

/// Runs the face steps and keeps the profile each session was opened under.
#[derive(Default)]
struct ProfileRecorder {
    opened: Mutex<Vec<AgentProfile>>,
}

#[async_trait]
impl DecisionProcess for ProfileRecorder {
    async fn open(
        &self,
        _session_id: &str,
        profile: &AgentProfile,
        _task: &TaskDescription,
        _tool_names: &[&str],
    ) -> CoreResult<Box<dyn DecisionSession>> {
        self.opened.lock().unwrap().push(profile.clone());
        Ok(Box::new(ScriptedSession {
            steps: FACE_STEPS.iter().copied().collect(),
            fail_after: false,
        }))
    }
}

const FACE_STEPS: &[&str] = &[
    "validate_document",
    "upload_document",
    "detect_faces",
    "extract_face_images",
];

fn portrait_png() -> Vec<u8> {
    encode_png(&DynamicImage::ImageRgb8(RgbImage::from_pixel(
        64,
        64,
        Rgb([200, 180, 160]),
    )))
    .unwrap()
}

fn face(x: i32, y: i32, confidence: f64) -> FaceAnnotation {
    FaceAnnotation {
        bounds: Some(BoundingBox {
            x,
            y,
            width: 20,
            height: 20,
        }),
        confidence,
        landmarks: Vec::new(),
    }
}

struct Harness {
    _root: tempfile::TempDir,
    registry: Arc<ModuleRegistry>,
}

fn harness(
    vision: Arc<FakeVision>,
    generator: Arc<FakeGenerator>,
    ids: Arc<FixedIds>,
    planner: Option<Arc<dyn DecisionProcess>>,
) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let mut environment =
        ModuleEnvironment::new(Providers::new(vision, generator), PlatformConfig::default())
            .with_document_ids(ids);
    if let Some(planner) = planner {
        environment = environment.with_planner(planner);
    }
    Harness {
        registry: ModuleRegistry::new(root.path(), ModuleCatalog::builtin(), environment),
        _root: root,
    }
}

impl Harness {
    fn faces(&self) -> FaceExtractionWorkflow {
        FaceExtractionWorkflow::new(self.registry.services().clone(), &ModuleManifest::default())
    }

    fn ocr(&self) -> OcrWorkflow {
        OcrWorkflow::new(self.registry.services().clone(), &ModuleManifest::default())
    }

    fn root(&self) -> &Path {
        self.registry.root()
    }
}

fn normalized(mut response: FaceExtractionResponse) -> FaceExtractionResponse {
    response.processing_time = 0.0;
    response
}

fn normalized_pairs(mut response: KeyValueResponse) -> KeyValueResponse {
    response.processing_time = 0.0;
    response
}

#[tokio::test]
async fn invalid_image_short_circuits_before_any_later_step() {
    let vision = FakeVision::new(vec![face(10, 10, 0.9)], TextAnnotation::default());
    let ids = Arc::new(FixedIds::default());
    let harness = harness(vision.clone(), FakeGenerator::replying("[]"), ids.clone(), None);

    let response = harness
        .faces()
        .execute(&FaceExtractionRequest::new(b"not an image".to_vec(), "scan.png"))
        .await;

    assert!(response.status.starts_with("error: invalid image - "));
    assert_eq!(response.document_id, "");
    assert!(response.faces_extracted.is_empty());
    assert_eq!(ids.allocations.load(Ordering::SeqCst), 0);
    assert_eq!(vision.face_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deterministic_face_extraction_filters_and_crops() {
    let vision = FakeVision::new(
        vec![face(10, 10, 92.0), face(30, 30, 0.4), face(200, 200, 0.95)],
        TextAnnotation::default(),
    );
    let harness = harness(vision, FakeGenerator::replying("[]"), Arc::default(), None);

    let response = harness
        .faces()
        .execute(&FaceExtractionRequest::new(portrait_png(), "id.png"))
        .await;

    assert_eq!(response.status, "success");
    assert_eq!(response.document_id, "doc_id.png_100");
    // The low-confidence face is filtered; the off-image face cannot be cropped.
    assert_eq!(response.faces_detected, 1);
    let extracted = &response.faces_extracted[0];
    assert_eq!(extracted.face_id, "doc_id.png_100_face_1");
    assert_eq!(extracted.bounding_box.confidence, 0.92);
    assert!(extracted.image_data.starts_with(&[0x89, b'P', b'N', b'G']));
}

#[tokio::test]
async fn nothing_detected_is_an_empty_success() {
    let vision = FakeVision::new(Vec::new(), TextAnnotation::default());
    let harness = harness(vision.clone(), FakeGenerator::replying("[]"), Arc::default(), None);

    let response = harness
        .faces()
        .execute(&FaceExtractionRequest::new(portrait_png(), "blank.png"))
        .await;

    assert_eq!(response.status, "success");
    assert_eq!(response.faces_detected, 0);
    assert_eq!(response.document_id, "doc_blank.png_100");
    assert_eq!(vision.face_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn autonomous_and_deterministic_paths_agree() {
    let faces = vec![face(10, 10, 0.9), face(30, 20, 0.8)];
    let request = FaceExtractionRequest::new(portrait_png(), "id.png");

    let deterministic = harness(
        FakeVision::new(faces.clone(), TextAnnotation::default()),
        FakeGenerator::replying("[]"),
        Arc::default(),
        None,
    );
    let autonomous = harness(
        FakeVision::new(faces.clone(), TextAnnotation::default()),
        FakeGenerator::replying("[]"),
        Arc::default(),
        Some(Arc::new(ScriptedPlanner {
            steps: FACE_STEPS.to_vec(),
            fail_after: false,
        })),
    );

    let expected = normalized(deterministic.faces().execute(&request).await);
    let actual = normalized(autonomous.faces().execute(&request).await);

    assert_eq!(expected.faces_detected, 2);
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn autonomous_runs_open_under_the_configured_agent_profile() {
    let planner = Arc::new(ProfileRecorder::default());
    let harness = harness(
        FakeVision::new(vec![face(10, 10, 0.9)], TextAnnotation::default()),
        FakeGenerator::replying("[]"),
        Arc::default(),
        Some(planner.clone()),
    );
    let manifest =
        ModuleManifest::parse("agent:\n  name: id_card_agent\n  app_name: id_cards\n").unwrap();
    let workflow = FaceExtractionWorkflow::new(harness.registry.services().clone(), &manifest);

    let response = workflow
        .execute(&FaceExtractionRequest::new(portrait_png(), "id.png"))
        .await;

    assert_eq!(response.faces_detected, 1);
    let opened = planner.opened.lock().unwrap();
    assert_eq!(
        *opened,
        vec![AgentProfile {
            name: "id_card_agent".to_string(),
            model: "gemini-2.0-flash-exp".to_string(),
            app_name: "id_cards".to_string(),
        }]
    );
}

#[tokio::test]
async fn failed_autonomous_run_falls_back_to_the_same_output() {
    let faces = vec![face(10, 10, 0.9)];
    let request = FaceExtractionRequest::new(portrait_png(), "id.png");

    let deterministic = harness(
        FakeVision::new(faces.clone(), TextAnnotation::default()),
        FakeGenerator::replying("[]"),
        Arc::default(),
        None,
    );
    let failing = harness(
        FakeVision::new(faces.clone(), TextAnnotation::default()),
        FakeGenerator::replying("[]"),
        Arc::default(),
        Some(Arc::new(ScriptedPlanner {
            steps: vec!["validate_document", "upload_document"],
            fail_after: true,
        })),
    );

    let expected = normalized(deterministic.faces().execute(&request).await);
    let actual = normalized(failing.faces().execute(&request).await);
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn successful_but_incomplete_run_falls_back() {
    let vision = FakeVision::new(vec![face(10, 10, 0.9)], TextAnnotation::default());
    let harness = harness(
        vision.clone(),
        FakeGenerator::replying("[]"),
        Arc::default(),
        Some(Arc::new(ScriptedPlanner {
            steps: vec!["validate_document"],
            fail_after: false,
        })),
    );

    let response = harness
        .faces()
        .execute(&FaceExtractionRequest::new(portrait_png(), "id.png"))
        .await;

    assert_eq!(response.status, "success");
    assert_eq!(response.faces_detected, 1);
    assert_eq!(response.document_id, "doc_id.png_100");
    assert_eq!(vision.face_calls.load(Ordering::SeqCst), 1);
}

fn receipt_text() -> TextAnnotation {
    TextAnnotation {
        full_text: "Invoice Number: INV-7\nTotal: $12.00".to_string(),
        regions: vec![TextRegion {
            text: "Invoice".to_string(),
            bounds: BoundingBox {
                x: 1,
                y: 2,
                width: 40,
                height: 10,
            },
            confidence: Some(0.97),
            language: None,
        }],
    }
}

#[tokio::test]
async fn key_value_extraction_runs_all_four_steps() {
    let vision = FakeVision::new(Vec::new(), receipt_text());
    let generator = FakeGenerator::replying(
        "```json\n[{\"key\": \"Invoice Number\", \"value\": \"INV-7\", \"confidence\": 0.95}, {\"key\": \"Total\", \"value\": 12}]\n```",
    );
    let harness = harness(vision, generator.clone(), Arc::default(), None);

    let mut request = KeyValueRequest::new(portrait_png(), "receipt.png");
    request.language_hints = Some(vec!["en".to_string()]);
    let response = harness.ocr().execute(&request).await;

    assert_eq!(response.status, "success");
    assert_eq!(response.document_id, "doc_receipt.png_100");
    assert_eq!(response.raw_text, "Invoice Number: INV-7\nTotal: $12.00");
    assert_eq!(response.key_value_pairs.len(), 2);
    assert_eq!(response.key_value_pairs[1].value, "12");
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn blank_text_yields_no_pairs_without_asking_the_model() {
    let vision = FakeVision::new(Vec::new(), TextAnnotation::default());
    let generator = FakeGenerator::replying("[]");
    let harness = harness(vision, generator.clone(), Arc::default(), None);

    let response = harness
        .ocr()
        .execute(&KeyValueRequest::new(portrait_png(), "blank.png"))
        .await;

    assert_eq!(response.status, "success");
    assert!(response.key_value_pairs.is_empty());
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn key_value_failure_keeps_identifier_and_text() {
    let vision = FakeVision::new(Vec::new(), receipt_text());
    let harness = harness(
        vision,
        FakeGenerator::failing("quota exceeded"),
        Arc::default(),
        None,
    );

    let response = harness
        .ocr()
        .execute(&KeyValueRequest::new(portrait_png(), "receipt.png"))
        .await;

    assert_eq!(
        response.status,
        "error: Error during key-value extraction: quota exceeded"
    );
    assert_eq!(response.document_id, "doc_receipt.png_100");
    assert_eq!(response.raw_text, "Invoice Number: INV-7\nTotal: $12.00");
    assert!(response.key_value_pairs.is_empty());
}

#[tokio::test]
async fn autonomous_key_value_run_matches_fallback_output() {
    let reply = r#"[{"key": "Total", "value": "$12.00"}]"#;
    let request = KeyValueRequest::new(portrait_png(), "receipt.png");

    let deterministic = harness(
        FakeVision::new(Vec::new(), receipt_text()),
        FakeGenerator::replying(reply),
        Arc::default(),
        None,
    );
    // Stops after extract_text: success, but key_value_pairs is missing.
    let incomplete = harness(
        FakeVision::new(Vec::new(), receipt_text()),
        FakeGenerator::replying(reply),
        Arc::default(),
        Some(Arc::new(ScriptedPlanner {
            steps: vec!["validate_document", "upload_document", "extract_text"],
            fail_after: false,
        })),
    );

    let expected = normalized_pairs(deterministic.ocr().execute(&request).await);
    let actual = normalized_pairs(incomplete.ocr().execute(&request).await);
    assert_eq!(actual, expected);
    assert_eq!(expected.key_value_pairs.len(), 1);
}

#[tokio::test]
async fn text_only_extraction_reports_blocks_and_hint_languages() {
    let vision = FakeVision::new(Vec::new(), receipt_text());
    let harness = harness(vision.clone(), FakeGenerator::replying("[]"), Arc::default(), None);

    let response = harness
        .ocr()
        .extract_text(&OcrRequest {
            file_content: portrait_png(),
            document_name: "receipt.png".to_string(),
            language_hints: Some(vec!["en".to_string(), "de".to_string()]),
        })
        .await;

    assert_eq!(response.status, "success");
    assert_eq!(response.text_blocks.len(), 1);
    assert_eq!(response.text_blocks[0].width, 40.0);
    assert_eq!(response.languages_detected, vec!["en", "de"]);
    assert_eq!(vision.text_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batch_results_follow_input_order() {
    let vision = FakeVision::new(vec![face(10, 10, 0.9)], TextAnnotation::default());
    let harness = harness(vision, FakeGenerator::replying("[]"), Arc::default(), None);
    fs::create_dir_all(harness.root().join("face_extraction")).unwrap();
    harness.registry.discover(&["face_extraction"]);

    let arguments = json!({
        "documents": [
            {"file_content": encode(&portrait_png()), "document_name": "a.png"},
            {"file_content": encode(b"junk"), "document_name": "b.png"},
            {"file_content": encode(&portrait_png()), "document_name": "c.png"}
        ],
        "min_confidence": 0.5
    });
    let descriptor = harness.registry.module("face_extraction").unwrap();
    let (_, handler) = descriptor.entrypoint.resolve_capability("face_extraction").unwrap();
    let output = handler
        .invoke("execute_batch", arguments.as_object().cloned())
        .await
        .unwrap();

    assert_eq!(output["total_processed"], json!(3));
    let results = output["results"].as_array().unwrap();
    assert_eq!(results[0]["document_id"], json!("doc_a.png_100"));
    assert!(results[1]["status"].as_str().unwrap().starts_with("error: invalid image"));
    assert_eq!(results[2]["document_id"], json!("doc_c.png_100"));
}
