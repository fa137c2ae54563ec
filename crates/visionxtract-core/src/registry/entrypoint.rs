use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::models::{CoreError, CoreErrorKind, CoreResult};

const JUDGE_MODULE: &str = "llm_judge";
const WORKFLOW_SUFFIX: &str = "_workflow";

/// A module's capability handler: a fixed set of named operations taking
/// JSON named arguments.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    fn operations(&self) -> &'static [&'static str];

    async fn invoke(
        &self,
        operation: &str,
        arguments: Option<Map<String, Value>>,
    ) -> CoreResult<Value>;

    fn supports(&self, operation: &str) -> bool {
        self.operations().contains(&operation)
    }
}

/// Named members a module exposes, plus the explicit export list.
#[derive(Clone, Default)]
pub struct ModuleEntrypoint {
    handlers: BTreeMap<String, Arc<dyn CapabilityHandler>>,
    exports: Vec<String>,
}

impl Debug for ModuleEntrypoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntrypoint")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("exports", &self.exports)
            .finish()
    }
}

impl ModuleEntrypoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, name: &str, handler: Arc<dyn CapabilityHandler>) -> Self {
        self.handlers.insert(name.to_string(), handler);
        self
    }

    pub fn with_export(mut self, name: &str) -> Self {
        self.exports.push(name.to_string());
        self
    }

    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Finds the canonical capability handler: first the export list, then
    /// the conventional names from [`capability_candidates`].
    pub fn resolve_capability(
        &self,
        module: &str,
    ) -> CoreResult<(String, Arc<dyn CapabilityHandler>)> {
        let exported = self
            .exports
            .iter()
            .filter(|name| name.ends_with(WORKFLOW_SUFFIX))
            .find_map(|name| self.handler(name).map(|handler| (name.clone(), handler)));
        if let Some(found) = exported {
            return Ok(found);
        }

        capability_candidates(module)
            .into_iter()
            .find_map(|name| self.handler(&name).map(|handler| (name, handler)))
            .ok_or_else(|| {
                CoreError::new(
                    CoreErrorKind::Discovery,
                    format!("module '{module}' exposes no capability handler"),
                )
                .for_module(module)
            })
    }
}

/// Conventional handler names tried, in order, when the export list names none.
pub fn capability_candidates(module: &str) -> Vec<String> {
    let mut candidates = vec![format!("{module}{WORKFLOW_SUFFIX}")];
    if module == JUDGE_MODULE {
        candidates.push(format!("judge{WORKFLOW_SUFFIX}"));
    }
    let compact = format!("{}{WORKFLOW_SUFFIX}", module.replace('_', ""));
    if !candidates.contains(&compact) {
        candidates.push(compact);
    }
    candidates
}
