use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::agent::{AgentProfile, DecisionProcess, DecisionSession, StepEvent, TaskDescription};
use crate::models::{CoreError, CoreResult};
use crate::providers::GenerativeProvider;
use crate::tools::json::parse_model_json;
use crate::tools::{ToolCall, ToolObservation};

const MAX_OBSERVATION_CHARS: usize = 2_000;

const REPLY_PROTOCOL: &str = r#"Reply with JSON only, in this shape:
{"tool_calls": [{"name": "<tool>", "arguments": {}}], "done": false}
Call the next step(s) you need. Once every step has been executed, reply with
{"tool_calls": [], "done": true}."#;

/// Decision process backed by the generative provider, speaking a small
/// JSON tool-call protocol.
pub struct GenerativeDecisionProcess {
    generator: Arc<dyn GenerativeProvider>,
}

impl GenerativeDecisionProcess {
    pub fn new(generator: Arc<dyn GenerativeProvider>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl DecisionProcess for GenerativeDecisionProcess {
    async fn open(
        &self,
        session_id: &str,
        profile: &AgentProfile,
        task: &TaskDescription,
        tool_names: &[&str],
    ) -> CoreResult<Box<dyn DecisionSession>> {
        Ok(Box::new(GenerativeSession {
            generator: self.generator.clone(),
            session_id: format!("{}/{session_id}", profile.app_name),
            model: profile.model.clone(),
            preamble: format!(
                "You are {}.\n\n{}\n\nAvailable tools: {}\n\n{REPLY_PROTOCOL}",
                profile.name,
                task.prompt,
                tool_names.join(", ")
            ),
            transcript: Vec::new(),
            finished: false,
        }))
    }
}

struct GenerativeSession {
    generator: Arc<dyn GenerativeProvider>,
    session_id: String,
    model: String,
    preamble: String,
    transcript: Vec<String>,
    finished: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PlannerReply {
    #[serde(default)]
    tool_calls: Vec<PlannedCall>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlannedCall {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

#[async_trait]
impl DecisionSession for GenerativeSession {
    async fn next_event(
        &mut self,
        observations: &[ToolObservation],
    ) -> CoreResult<Option<StepEvent>> {
        if self.finished {
            return Ok(None);
        }

        self.transcript.extend(observations.iter().map(|observation| {
            format!(
                "- {}: {}",
                observation.name,
                truncate(&observation.output.to_string(), MAX_OBSERVATION_CHARS)
            )
        }));

        let prompt = if self.transcript.is_empty() {
            self.preamble.clone()
        } else {
            format!(
                "{}\n\nTool results so far:\n{}",
                self.preamble,
                self.transcript.join("\n")
            )
        };

        let raw = self.generator.generate(&prompt).await?;
        let reply: PlannerReply = parse_model_json(&raw)
            .and_then(serde_json::from_value)
            .map_err(|error| {
                CoreError::parse_failure(format!("unreadable planner reply: {error}"))
            })?;

        tracing::debug!(
            session_id = %self.session_id,
            model = %self.model,
            calls = reply.tool_calls.len(),
            done = reply.done,
            "planner reply"
        );

        if reply.tool_calls.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        self.finished = reply.done;

        Ok(Some(StepEvent {
            calls: reply
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    name: call.name,
                    arguments: call.arguments,
                })
                .collect(),
            message: reply.message,
        }))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::{GenerativeDecisionProcess, truncate};
    use crate::agent::{AgentProfile, DecisionProcess, TaskDescription};
    use crate::models::{CoreErrorKind, CoreResult};
    use crate::providers::GenerativeProvider;
    use crate::tools::ToolObservation;

    struct Scripted {
        replies: Mutex<Vec<&'static str>>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerativeProvider for Scripted {
        async fn generate(&self, prompt: &str) -> CoreResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.replies.lock().unwrap().remove(0).to_string())
        }
    }

    fn scripted(replies: Vec<&'static str>) -> Arc<Scripted> {
        Arc::new(Scripted {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn session_relays_calls_and_feeds_back_observations() {
        let generator = scripted(vec![
            r#"```json
            {"tool_calls": [{"name": "upload_document", "arguments": {"document_name": "a.png"}}]}
            ```"#,
            r#"{"tool_calls": [], "done": true}"#,
        ]);
        let process = GenerativeDecisionProcess::new(generator.clone());
        let task = TaskDescription {
            prompt: "Upload the document.".to_string(),
            steps: vec!["upload_document".to_string()],
        };
        let mut session = process
            .open(
                "s-1",
                &AgentProfile::for_module("face_extraction", "gemini-2.0-flash-exp"),
                &task,
                &["upload_document"],
            ).await.unwrap();

        let first = session.next_event(&[]).await.unwrap().unwrap();
        assert_eq!(first.calls[0].name, "upload_document");
        assert_eq!(first.calls[0].arguments["document_name"], json!("a.png"));

        let observation = ToolObservation {
            name: "upload_document".to_string(),
            output: json!({"document_id": "doc_a.png_1"}),
        };
        assert!(session.next_event(&[observation]).await.unwrap().is_none());
        assert!(session.next_event(&[]).await.unwrap().is_none());

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with("You are face_extraction_agent.\n\nUpload the document."));
        assert!(prompts[0].contains("Available tools: upload_document"));
        assert!(prompts[1].contains("- upload_document: {\"document_id\":\"doc_a.png_1\"}"));
    }

    #[tokio::test]
    async fn unreadable_reply_is_a_parse_failure() {
        let process = GenerativeDecisionProcess::new(scripted(vec!["I will now call a tool."]));
        let mut session = process
            .open("s-2", &AgentProfile::default(), &TaskDescription::default(), &[])
            .await
            .unwrap();
        let error = session.next_event(&[]).await.unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::ParseFailure);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("hi", 5), "hi");
    }
}
