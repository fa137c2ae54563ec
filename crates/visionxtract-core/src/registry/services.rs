use std::sync::{Arc, Weak};

use crate::agent::{
    AgentProfile, AgentTaskRunner, DecisionProcess, ExecutionStrategy, GenerativeDecisionProcess,
};
use crate::config::{ExecutionMode, PlatformConfig};
use crate::models::{CoreError, CoreResult, ModuleManifest};
use crate::providers::Providers;
use crate::registry::ModuleRegistry;
use crate::tools::{DocumentIdSource, TimestampDocumentIds};
use crate::transport::{ModuleClient, RequestedMode};

/// Everything module factories may draw on, fixed when the registry is built.
#[derive(Clone)]
pub struct ModuleEnvironment {
    pub providers: Providers,
    pub config: Arc<PlatformConfig>,
    pub planner: Option<Arc<dyn DecisionProcess>>,
    pub document_ids: Arc<dyn DocumentIdSource>,
}

impl ModuleEnvironment {
    /// Uses the generative planner when the configuration asks for autonomous execution.
    pub fn new(providers: Providers, config: PlatformConfig) -> Self {
        let planner: Option<Arc<dyn DecisionProcess>> = match config.execution {
            ExecutionMode::Autonomous => Some(Arc::new(GenerativeDecisionProcess::new(
                providers.generative.clone(),
            ))),
            ExecutionMode::Deterministic => None,
        };

        Self {
            providers,
            config: Arc::new(config),
            planner,
            document_ids: Arc::new(TimestampDocumentIds),
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn DecisionProcess>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn without_planner(mut self) -> Self {
        self.planner = None;
        self
    }

    pub fn with_document_ids(mut self, document_ids: Arc<dyn DocumentIdSource>) -> Self {
        self.document_ids = document_ids;
        self
    }
}

/// Handle given to module factories. Holds the registry weakly so that
/// modules can reach each other without a reference cycle.
#[derive(Clone)]
pub struct ModuleServices {
    environment: ModuleEnvironment,
    registry: Weak<ModuleRegistry>,
}

impl ModuleServices {
    pub(crate) fn new(environment: ModuleEnvironment, registry: Weak<ModuleRegistry>) -> Self {
        Self {
            environment,
            registry,
        }
    }

    pub fn providers(&self) -> &Providers {
        &self.environment.providers
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.environment.config
    }

    pub fn document_ids(&self) -> Arc<dyn DocumentIdSource> {
        self.environment.document_ids.clone()
    }

    /// Autonomous when a planner is configured. The run's profile starts from
    /// the module name and configured model, then takes the manifest's `agent` section.
    pub fn strategy(&self, module: &str, manifest: &ModuleManifest) -> ExecutionStrategy {
        match &self.environment.planner {
            Some(planner) => {
                let profile = AgentProfile::for_module(module, &self.environment.config.model_name)
                    .with_manifest(&manifest.agent);
                let mut runner = AgentTaskRunner::new(planner.clone()).with_profile(profile);
                if let Some(max_events) = manifest.agent.max_events {
                    runner = runner.with_max_events(max_events);
                }
                ExecutionStrategy::Autonomous(Arc::new(runner))
            }
            None => ExecutionStrategy::Deterministic,
        }
    }

    /// AUTO client for a sibling module.
    pub fn client(&self, module: &str) -> CoreResult<ModuleClient> {
        let registry = self.registry.upgrade().ok_or_else(|| {
            CoreError::internal("module registry is no longer available").for_module(module)
        })?;
        ModuleClient::connect(
            &registry,
            module,
            RequestedMode::Auto,
            &self.environment.config.transport,
        )
    }
}
