use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use visionxtract_core::config::{PlatformConfig, TransportSettings};
use visionxtract_core::models::{CoreErrorKind, CoreResult, EvaluationRequest};
use visionxtract_core::providers::{GenerativeProvider, Providers, UnconfiguredProvider};
use visionxtract_core::registry::{ModuleCatalog, ModuleEnvironment, ModuleRegistry};
use visionxtract_core::transport::{ModuleCall, ModuleClient, RequestedMode, TransportMode};

#[derive(Default)]
struct CountingJudge {
    calls: AtomicUsize,
}

#[async_trait]
impl GenerativeProvider for CountingJudge {
    async fn generate(&self, _prompt: &str) -> CoreResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({
            "scores": [{"criteria": "accuracy", "score": 0.9, "reasoning": "matches"}],
            "overall_score": 0.9,
            "reasoning": "good extraction"
        })
        .to_string())
    }
}

fn registry_with(root: &Path, units: &[&str], judge: Arc<CountingJudge>) -> Arc<ModuleRegistry> {
    for name in units {
        fs::create_dir_all(root.join(name)).unwrap();
    }
    let providers = Providers::new(Arc::new(UnconfiguredProvider), judge);
    ModuleRegistry::new(
        root,
        ModuleCatalog::builtin(),
        ModuleEnvironment::new(providers, PlatformConfig::default()),
    )
}

/// Serves one canned HTTP response and hands back the raw request it received.
fn one_shot_server(status: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let read = stream.read(&mut chunk).unwrap();
            request.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= header_end + 4 + content_length {
                    break;
                }
            }
            if read == 0 {
                break;
            }
        }

        stream.write_all(response.as_bytes()).unwrap();
        String::from_utf8_lossy(&request).to_string()
    });

    (address, handle)
}

#[test]
fn override_binds_remote_without_resolving_in_process() {
    let root = tempfile::tempdir().unwrap();
    let registry = registry_with(root.path(), &["ocr"], Arc::default());
    let settings = TransportSettings::default().with_override("ocr", "http://ocr.internal:9000/");

    let client = ModuleClient::connect(&registry, "ocr", RequestedMode::Auto, &settings).unwrap();

    assert_eq!(client.mode(), TransportMode::Remote);
    assert_eq!(client.base_url(), Some("http://ocr.internal:9000"));
    assert!(!registry.is_discovered());
}

#[test]
fn auto_resolution_is_deterministic() {
    let root = tempfile::tempdir().unwrap();
    let registry = registry_with(root.path(), &["face_extraction"], Arc::default());
    let settings = TransportSettings::default();

    let first =
        ModuleClient::connect(&registry, "face_extraction", RequestedMode::Auto, &settings)
            .unwrap();
    let second =
        ModuleClient::connect(&registry, "face_extraction", RequestedMode::Auto, &settings)
            .unwrap();

    assert_eq!(first.mode(), TransportMode::InProcess);
    assert_eq!(first.mode(), second.mode());
    assert_eq!(first.handler_name(), Some("face_extraction_workflow"));
    assert_eq!(first.handler_name(), second.handler_name());
}

#[test]
fn auto_falls_back_to_default_remote_address() {
    let root = tempfile::tempdir().unwrap();
    let registry = registry_with(root.path(), &[], Arc::default());
    let settings = TransportSettings::default().with_default_host("http://modules.local");

    let client = ModuleClient::connect(&registry, "ocr", RequestedMode::Auto, &settings).unwrap();

    assert_eq!(client.mode(), TransportMode::Remote);
    assert_eq!(client.base_url(), Some("http://modules.local:8002"));
}

#[test]
fn explicit_in_process_fails_loudly_when_unresolvable() {
    let root = tempfile::tempdir().unwrap();
    let registry = registry_with(root.path(), &["ocr"], Arc::default());

    let error = ModuleClient::connect(
        &registry,
        "llm_judge",
        RequestedMode::InProcess,
        &TransportSettings::default(),
    )
    .err()
    .unwrap();

    assert_eq!(error.kind, CoreErrorKind::Discovery);
    assert_eq!(error.module.as_deref(), Some("llm_judge"));
}

#[test]
fn explicit_remote_uses_the_default_address() {
    let root = tempfile::tempdir().unwrap();
    let registry = registry_with(root.path(), &["llm_judge"], Arc::default());

    let client = ModuleClient::connect(
        &registry,
        "llm_judge",
        RequestedMode::Remote,
        &TransportSettings::default(),
    )
    .unwrap();

    assert_eq!(client.mode(), TransportMode::Remote);
    assert_eq!(client.base_url(), Some("http://localhost:8003"));
}

#[tokio::test]
async fn in_process_call_to_missing_operation_is_not_found() {
    let root = tempfile::tempdir().unwrap();
    let judge = Arc::new(CountingJudge::default());
    let registry = registry_with(root.path(), &["llm_judge"], judge.clone());

    let client = ModuleClient::connect(
        &registry,
        "llm_judge",
        RequestedMode::InProcess,
        &TransportSettings::default(),
    )
    .unwrap();
    let error = client
        .call(&ModuleCall::post("evaluate").payload(json!({"content": "x"})))
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::NotFound);
    assert_eq!(error.operation.as_deref(), Some("evaluate"));
    assert!(error.transport.is_none());
    assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn evaluate_against_a_non_judge_module_is_a_precondition_failure() {
    let root = tempfile::tempdir().unwrap();
    let judge = Arc::new(CountingJudge::default());
    let registry = registry_with(root.path(), &["ocr"], judge.clone());

    let client =
        ModuleClient::connect(&registry, "ocr", RequestedMode::Auto, &TransportSettings::default())
            .unwrap();
    let error = client
        .evaluate(&EvaluationRequest {
            content: "Name: Ada".to_string(),
            ..EvaluationRequest::default()
        })
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::Precondition);
    assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn in_process_evaluate_maps_to_the_judge_workflow() {
    let root = tempfile::tempdir().unwrap();
    let judge = Arc::new(CountingJudge::default());
    let registry = registry_with(root.path(), &["llm_judge"], judge.clone());

    let client = ModuleClient::connect(
        &registry,
        "llm_judge",
        RequestedMode::Auto,
        &TransportSettings::default(),
    )
    .unwrap();
    let response = client
        .evaluate(&EvaluationRequest {
            content: "Name: Ada".to_string(),
            ..EvaluationRequest::default()
        })
        .await
        .unwrap();
    client.close();

    assert_eq!(response.overall_score, 0.9);
    assert_eq!(response.scores[0].weight, 0.3);
    assert_eq!(judge.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn remote_post_parses_a_successful_body() {
    let (address, server) = one_shot_server("200 OK", r#"{"document_id": "doc_1", "status": "success"}"#);
    let root = tempfile::tempdir().unwrap();
    let registry = registry_with(root.path(), &[], Arc::default());
    let settings = TransportSettings::default().with_override("ocr", address);

    let client = ModuleClient::connect(&registry, "ocr", RequestedMode::Auto, &settings).unwrap();
    let result = client
        .call(&ModuleCall::post("execute").payload(json!({"document_name": "form.png"})))
        .await
        .unwrap();

    assert_eq!(result["status"], json!("success"));
    let request = server.join().unwrap();
    assert!(request.starts_with("POST /api/ocr/execute HTTP/1.1"));
    assert!(request.contains(r#"{"document_name":"form.png"}"#));
}

#[tokio::test]
async fn remote_failure_carries_status_and_body() {
    let (address, server) = one_shot_server("500 Internal Server Error", r#"{"detail": "boom"}"#);
    let root = tempfile::tempdir().unwrap();
    let registry = registry_with(root.path(), &[], Arc::default());
    let settings = TransportSettings::default().with_override("face_extraction", address);

    let client =
        ModuleClient::connect(&registry, "face_extraction", RequestedMode::Auto, &settings)
            .unwrap();
    let error = client
        .call(&ModuleCall::post("execute").payload(json!({})))
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::Transport);
    assert_eq!(error.status(), Some(500));
    assert_eq!(
        error.transport.as_ref().map(|fault| fault.body.as_str()),
        Some(r#"{"detail": "boom"}"#)
    );
    assert!(server.join().unwrap().starts_with("POST /api/face-extraction/execute"));
}

#[tokio::test]
async fn remote_get_sends_params_as_query_and_wraps_non_objects() {
    let (address, server) = one_shot_server("200 OK", "[1, 2, 3]");
    let root = tempfile::tempdir().unwrap();
    let registry = registry_with(root.path(), &[], Arc::default());
    let settings = TransportSettings::default().with_override("llm_judge", address);

    let client =
        ModuleClient::connect(&registry, "llm_judge", RequestedMode::Remote, &settings).unwrap();
    let result = client
        .call(&ModuleCall::get("health").param("verbose", "true"))
        .await
        .unwrap();

    assert_eq!(result["result"], json!([1, 2, 3]));
    assert!(
        server
            .join()
            .unwrap()
            .starts_with("GET /api/llm-judge/health?verbose=true HTTP/1.1")
    );
}

#[tokio::test]
async fn unreachable_remote_is_a_transport_error_without_status() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let root = tempfile::tempdir().unwrap();
    let registry = registry_with(root.path(), &[], Arc::default());
    let settings = TransportSettings::default()
        .with_override("ocr", address)
        .with_timeout(Duration::from_secs(2));

    let client = ModuleClient::connect(&registry, "ocr", RequestedMode::Auto, &settings).unwrap();
    let error = client
        .call(&ModuleCall::post("execute"))
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::Transport);
    assert_eq!(error.status(), None);
}

#[tokio::test]
async fn empty_success_body_is_a_parse_failure() {
    let (address, server) = one_shot_server("200 OK", "");
    let root = tempfile::tempdir().unwrap();
    let registry = registry_with(root.path(), &[], Arc::default());
    let settings = TransportSettings::default().with_override("ocr", address);

    let client =
        ModuleClient::connect(&registry, "ocr", RequestedMode::Remote, &settings).unwrap();
    let error = client
        .call(&ModuleCall::post("execute").payload(json!({})))
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::ParseFailure);
    assert_eq!(error.module.as_deref(), Some("ocr"));
    assert_eq!(error.operation.as_deref(), Some("execute"));
    assert!(server.join().unwrap().starts_with("POST /api/ocr/execute"));
}
