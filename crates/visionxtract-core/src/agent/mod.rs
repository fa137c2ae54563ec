mod fallback;
mod planner;
mod runner;
mod task;

pub use fallback::{
    ExecutionPath, ExecutionStrategy, FallbackPipeline, StepFailure, TaskOutcome, execute_task,
};
pub use planner::GenerativeDecisionProcess;
pub use runner::{AgentTaskRunner, DEFAULT_MAX_EVENTS};
pub use task::{TaskDescription, TaskPrompt};

use async_trait::async_trait;

use crate::config::DEFAULT_MODEL_NAME;
use crate::models::{AgentSection, CoreResult};
use crate::tools::{ToolCall, ToolObservation};

/// Identity a run is opened under: the agent's name, the model it plans
/// with, and the application its sessions belong to.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentProfile {
    pub name: String,
    pub model: String,
    pub app_name: String,
}

impl AgentProfile {
    /// `{module}_agent` inside `{module}_app`.
    pub fn for_module(module: &str, model: &str) -> Self {
        Self {
            name: format!("{module}_agent"),
            model: model.to_string(),
            app_name: format!("{module}_app"),
        }
    }

    /// Applies whatever the manifest's `agent` section names.
    pub fn with_manifest(mut self, section: &AgentSection) -> Self {
        if let Some(name) = &section.name {
            self.name = name.clone();
        }
        if let Some(model) = &section.model {
            self.model = model.clone();
        }
        if let Some(app_name) = &section.app_name {
            self.app_name = app_name.clone();
        }
        self
    }
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self::for_module("visionxtract", DEFAULT_MODEL_NAME)
    }
}

/// One step-completion event: the tool calls the decision process issued.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepEvent {
    pub calls: Vec<ToolCall>,
    pub message: Option<String>,
}

/// External planner that decides which tools run, and in what order.
#[async_trait]
pub trait DecisionProcess: Send + Sync {
    async fn open(
        &self,
        session_id: &str,
        profile: &AgentProfile,
        task: &TaskDescription,
        tool_names: &[&str],
    ) -> CoreResult<Box<dyn DecisionSession>>;
}

/// A single planning session. `next_event` receives the observations from
/// the previous event's calls and returns `None` when the run is over.
#[async_trait]
pub trait DecisionSession: Send {
    async fn next_event(
        &mut self,
        observations: &[ToolObservation],
    ) -> CoreResult<Option<StepEvent>>;
}
