use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{AgentTaskRunner, TaskDescription};
use crate::models::{CoreErrorKind, ExecutionContext};
use crate::tools::StepTools;

/// Why a deterministic pipeline stopped early.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StepFailure {
    /// Input validation rejected the document.
    InvalidInput(String),
    /// Identifier allocation or an extraction step failed.
    Step(String),
}

impl StepFailure {
    pub fn status(&self) -> String {
        match self {
            Self::InvalidInput(details) => format!("error: invalid image - {details}"),
            Self::Step(details) => format!("error: {details}"),
        }
    }
}

/// Fixed-order re-execution of a capability's steps, writing the same
/// context keys the autonomous path writes.
#[async_trait]
pub trait FallbackPipeline: Send + Sync {
    /// Keys a completed context must hold.
    fn required_keys(&self) -> &'static [&'static str];

    async fn run(&self, context: &mut ExecutionContext) -> Result<(), StepFailure>;
}

#[derive(Clone, Default)]
pub enum ExecutionStrategy {
    #[default]
    Deterministic,
    Autonomous(Arc<AgentTaskRunner>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExecutionPath {
    Deterministic,
    Autonomous,
    Fallback,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskOutcome {
    pub context: ExecutionContext,
    pub path: ExecutionPath,
    pub failure: Option<StepFailure>,
    pub step_count: usize,
}

/// Runs `task` with the given strategy. An autonomous run that fails, or
/// that succeeds without every required key, is redone by `pipeline`.
pub async fn execute_task(
    strategy: &ExecutionStrategy,
    task: &TaskDescription,
    tools: &dyn StepTools,
    pipeline: &dyn FallbackPipeline,
    context: ExecutionContext,
) -> TaskOutcome {
    let runner = match strategy {
        ExecutionStrategy::Deterministic => {
            return run_pipeline(pipeline, context, ExecutionPath::Deterministic, 0).await;
        }
        ExecutionStrategy::Autonomous(runner) => runner,
    };

    let result = runner.run(task, tools, context).await;
    if !result.success {
        tracing::warn!(
            trigger = "runner_failed",
            step_count = result.step_count,
            error = %result.error.as_deref().unwrap_or_default(),
            "autonomous run failed; running deterministic fallback"
        );
        return run_pipeline(pipeline, result.context, ExecutionPath::Fallback, result.step_count)
            .await;
    }

    let missing = result.context.missing_keys(pipeline.required_keys());
    if !missing.is_empty() {
        tracing::warn!(
            trigger = "context_incomplete",
            kind = ?CoreErrorKind::ContextIncomplete,
            step_count = result.step_count,
            missing = ?missing,
            "autonomous run left the context incomplete; running deterministic fallback"
        );
        return run_pipeline(pipeline, result.context, ExecutionPath::Fallback, result.step_count)
            .await;
    }

    TaskOutcome {
        context: result.context,
        path: ExecutionPath::Autonomous,
        failure: None,
        step_count: result.step_count,
    }
}

async fn run_pipeline(
    pipeline: &dyn FallbackPipeline,
    mut context: ExecutionContext,
    path: ExecutionPath,
    step_count: usize,
) -> TaskOutcome {
    let failure = pipeline.run(&mut context).await.err();
    if let Some(failure) = &failure {
        tracing::debug!(path = ?path, status = %failure.status(), "deterministic pipeline stopped");
    }

    TaskOutcome {
        context,
        path,
        failure,
        step_count,
    }
}
