use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;
use uuid::Uuid;

use crate::agent::{AgentProfile, DecisionProcess, TaskDescription};
use crate::models::{CoreError, CoreResult, ExecutionContext, TaskResult};
use crate::tools::{StepTools, ToolObservation};

pub const DEFAULT_MAX_EVENTS: usize = 32;

/// Drives one autonomous task: a single sequential loop over the decision
/// process's events, dispatching each requested tool against the context.
pub struct AgentTaskRunner {
    process: Arc<dyn DecisionProcess>,
    profile: AgentProfile,
    max_events: usize,
}

impl AgentTaskRunner {
    pub fn new(process: Arc<dyn DecisionProcess>) -> Self {
        Self {
            process,
            profile: AgentProfile::default(),
            max_events: DEFAULT_MAX_EVENTS,
        }
    }

    pub fn with_profile(mut self, profile: AgentProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events.max(1);
        self
    }

    /// Never fails: stream errors and panics come back as `success: false`.
    pub async fn run(
        &self,
        task: &TaskDescription,
        tools: &dyn StepTools,
        context: ExecutionContext,
    ) -> TaskResult {
        let session_id = Uuid::new_v4().to_string();
        let mut context = context;
        let mut step_count = 0;

        tracing::debug!(
            session_id = %session_id,
            agent = %self.profile.name,
            model = %self.profile.model,
            app_name = %self.profile.app_name,
            "starting agent task run"
        );

        let outcome = AssertUnwindSafe(self.drive(
            &session_id,
            task,
            tools,
            &mut context,
            &mut step_count,
        ))
        .catch_unwind()
        .await;

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error.message),
            Err(panic) => Some(format!("decision process panicked: {}", panic_message(&*panic))),
        };

        if let Some(message) = &error {
            tracing::warn!(
                session_id = %session_id,
                agent = %self.profile.name,
                step_count,
                error = %message,
                "agent task run failed"
            );
        }

        TaskResult {
            success: error.is_none(),
            context,
            error,
            step_count,
        }
    }

    async fn drive(
        &self,
        session_id: &str,
        task: &TaskDescription,
        tools: &dyn StepTools,
        context: &mut ExecutionContext,
        step_count: &mut usize,
    ) -> CoreResult<()> {
        let mut session = self
            .process
            .open(session_id, &self.profile, task, tools.tool_names())
            .await?;
        let mut observations: Vec<ToolObservation> = Vec::new();
        let mut events = 0;

        while let Some(event) = session.next_event(&observations).await? {
            events += 1;
            if events > self.max_events {
                return Err(CoreError::internal(format!(
                    "decision process exceeded {} events",
                    self.max_events
                )));
            }

            *step_count += event.calls.len();
            tracing::debug!(
                session_id,
                event = events,
                calls = ?event.calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>(),
                "agent event"
            );

            observations = Vec::with_capacity(event.calls.len());
            for call in &event.calls {
                let output = match tools.dispatch(call, context).await {
                    Ok(output) => output,
                    Err(error) => json!({ "error": error.message }),
                };
                observations.push(ToolObservation {
                    name: call.name.clone(),
                    output,
                });
            }
        }

        tracing::debug!(session_id, events, step_count = *step_count, "agent run complete");
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
