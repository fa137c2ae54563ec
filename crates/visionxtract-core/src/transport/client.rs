use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::config::TransportSettings;
use crate::models::{
    ComparisonRequest, ComparisonResponse, CoreError, CoreErrorKind, CoreResult,
    EvaluationRequest, JudgeResponse,
};
use crate::registry::{CapabilityHandler, ModuleRegistry};
use crate::transport::remote::into_result_map;
use crate::transport::{ModuleCall, RemoteEndpoint, RequestedMode, TransportMode};

const EVALUATE: &str = "evaluate";
const COMPARE: &str = "compare";

/// Convenience capabilities and the modules that provide them.
const CAPABILITY_SUPPORT: &[(&str, &[&str])] = &[("llm_judge", &[EVALUATE, COMPARE])];

/// In-process operation names behind each convenience capability.
const IN_PROCESS_OPERATIONS: &[(&str, &str)] =
    &[(EVALUATE, "execute"), (COMPARE, "execute_comparison")];

pub fn supports_capability(module: &str, capability: &str) -> bool {
    CAPABILITY_SUPPORT
        .iter()
        .any(|(name, capabilities)| *name == module && capabilities.contains(&capability))
}

enum Binding {
    InProcess {
        handler_name: String,
        handler: Arc<dyn CapabilityHandler>,
    },
    Remote(RemoteEndpoint),
}

/// Client bound to one module through either a direct handler or HTTP. The
/// transport is chosen once in [`ModuleClient::connect`].
pub struct ModuleClient {
    module: String,
    binding: Binding,
}

impl ModuleClient {
    pub fn connect(
        registry: &ModuleRegistry,
        module: &str,
        requested: RequestedMode,
        settings: &TransportSettings,
    ) -> CoreResult<Self> {
        let binding = match requested {
            RequestedMode::Remote => Binding::Remote(remote_binding(module, settings)),
            RequestedMode::InProcess => resolve_in_process(registry, module)?,
            RequestedMode::Auto => {
                if let Some(address) = settings.override_for(module) {
                    tracing::debug!(module, address, "module address override configured");
                    Binding::Remote(RemoteEndpoint::open(module, address, settings.timeout))
                } else {
                    match resolve_in_process(registry, module) {
                        Ok(binding) => binding,
                        Err(error) => {
                            tracing::debug!(
                                module,
                                kind = ?error.kind,
                                message = %error.message,
                                "module unavailable in-process; using remote transport"
                            );
                            Binding::Remote(remote_binding(module, settings))
                        }
                    }
                }
            }
        };

        let client = Self {
            module: module.to_string(),
            binding,
        };
        tracing::debug!(module, mode = ?client.mode(), "module client connected");
        Ok(client)
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn mode(&self) -> TransportMode {
        match self.binding {
            Binding::InProcess { .. } => TransportMode::InProcess,
            Binding::Remote(_) => TransportMode::Remote,
        }
    }

    /// Remote base address, when bound remotely.
    pub fn base_url(&self) -> Option<&str> {
        match &self.binding {
            Binding::Remote(endpoint) => Some(endpoint.base_url()),
            Binding::InProcess { .. } => None,
        }
    }

    /// Name of the resolved in-process handler, when bound in-process.
    pub fn handler_name(&self) -> Option<&str> {
        match &self.binding {
            Binding::InProcess { handler_name, .. } => Some(handler_name),
            Binding::Remote(_) => None,
        }
    }

    pub async fn call(&self, call: &ModuleCall) -> CoreResult<Map<String, Value>> {
        match &self.binding {
            Binding::InProcess { handler, .. } => {
                if !handler.supports(&call.operation) {
                    return Err(CoreError::new(
                        CoreErrorKind::NotFound,
                        format!(
                            "operation '{}' not found on module '{}'",
                            call.operation, self.module
                        ),
                    )
                    .for_module(&self.module)
                    .for_operation(&call.operation));
                }

                let arguments = match &call.payload {
                    Some(Value::Object(map)) => Some(map.clone()),
                    _ => None,
                };
                let value = handler
                    .invoke(&call.operation, arguments)
                    .await
                    .map_err(|error| {
                        error
                            .for_module(&self.module)
                            .for_operation(&call.operation)
                    })?;
                Ok(into_result_map(value))
            }
            Binding::Remote(endpoint) => endpoint.send(call).await,
        }
    }

    pub async fn evaluate(&self, request: &EvaluationRequest) -> CoreResult<JudgeResponse> {
        self.capability(EVALUATE, request).await
    }

    pub async fn compare(&self, request: &ComparisonRequest) -> CoreResult<ComparisonResponse> {
        self.capability(COMPARE, request).await
    }

    /// Releases the client and, for remote bindings, its connection pool.
    pub fn close(self) {
        tracing::debug!(module = %self.module, mode = ?self.mode(), "module client closed");
    }

    async fn capability<Req, Resp>(&self, capability: &str, request: &Req) -> CoreResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        if !supports_capability(&self.module, capability) {
            return Err(CoreError::new(
                CoreErrorKind::Precondition,
                format!(
                    "{capability} is not supported by module '{}'",
                    self.module
                ),
            )
            .for_module(&self.module)
            .for_operation(capability));
        }

        let operation = match self.binding {
            Binding::InProcess { .. } => IN_PROCESS_OPERATIONS
                .iter()
                .find(|(name, _)| *name == capability)
                .map(|(_, operation)| *operation)
                .unwrap_or(capability),
            Binding::Remote(_) => capability,
        };

        let payload = serde_json::to_value(request).map_err(|error| {
            CoreError::invalid_input(format!("failed to encode {capability} request: {error}"))
                .for_module(&self.module)
        })?;
        let result = self
            .call(&ModuleCall::post(operation).payload(payload))
            .await?;

        serde_json::from_value(Value::Object(result)).map_err(|error| {
            CoreError::parse_failure(format!("malformed {capability} response: {error}"))
                .for_module(&self.module)
                .for_operation(capability)
        })
    }
}

fn remote_binding(module: &str, settings: &TransportSettings) -> RemoteEndpoint {
    let address = settings
        .override_for(module)
        .map(str::to_string)
        .unwrap_or_else(|| settings.default_address(module));
    RemoteEndpoint::open(module, &address, settings.timeout)
}

fn resolve_in_process(registry: &ModuleRegistry, module: &str) -> CoreResult<Binding> {
    let descriptor = registry.module(module).ok_or_else(|| {
        CoreError::new(
            CoreErrorKind::Discovery,
            format!("module '{module}' is not registered"),
        )
        .for_module(module)
    })?;
    let (handler_name, handler) = descriptor.entrypoint.resolve_capability(module)?;
    Ok(Binding::InProcess {
        handler_name,
        handler,
    })
}
