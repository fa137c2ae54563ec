use std::time::Duration;

use serde_json::{Map, Value};

use crate::models::{CoreError, CoreResult};
use crate::registry::kebab_case;
use crate::transport::{CallMethod, ModuleCall};

/// Pooled HTTP binding to one module's remote address.
#[derive(Clone, Debug)]
pub struct RemoteEndpoint {
    module: String,
    base_url: String,
    agent: ureq::Agent,
}

impl RemoteEndpoint {
    pub fn open(module: &str, base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            module: module.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/api/{kebab-module}/{operation}`
    pub fn url_for(&self, operation: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.base_url,
            kebab_case(&self.module),
            operation.trim_start_matches('/')
        )
    }

    pub async fn send(&self, call: &ModuleCall) -> CoreResult<Map<String, Value>> {
        let endpoint = self.clone();
        let call = call.clone();
        let module = self.module.clone();
        let operation = call.operation.clone();

        tokio::task::spawn_blocking(move || endpoint.send_blocking(&call))
            .await
            .map_err(|join_error| {
                CoreError::internal(format!("remote call join failure: {join_error}"))
                    .for_module(&module)
                    .for_operation(&operation)
            })?
    }

    fn send_blocking(&self, call: &ModuleCall) -> CoreResult<Map<String, Value>> {
        let url = self.url_for(&call.operation);
        let mut request = self.agent.request(call.method.as_str(), &url);
        for (key, value) in &call.params {
            request = request.query(key, value);
        }

        tracing::debug!(
            module = %self.module,
            operation = %call.operation,
            method = call.method.as_str(),
            url = %url,
            "sending remote module call"
        );

        let result = match call.method {
            CallMethod::Get => request.call(),
            CallMethod::Post => {
                let body = call.payload.clone().unwrap_or(Value::Object(Map::new()));
                request
                    .set("Content-Type", "application/json")
                    .send_string(&body.to_string())
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(self.fault(call, format!("HTTP {status} from {url}"), Some(status), body));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(self.fault(
                    call,
                    format!("transport failure calling {url}: {transport}"),
                    None,
                    String::new(),
                ));
            }
        };

        let status = response.status();
        let body = response.into_string().map_err(|error| {
            self.fault(
                call,
                format!("failed to read response body from {url}: {error}"),
                Some(status),
                String::new(),
            )
        })?;

        parse_body(&body).map_err(|error| {
            CoreError::parse_failure(format!("unparseable response from {url}: {error}"))
                .for_module(&self.module)
                .for_operation(&call.operation)
        })
    }

    fn fault(
        &self,
        call: &ModuleCall,
        message: String,
        status: Option<u16>,
        body: String,
    ) -> CoreError {
        CoreError::transport(message, status, body)
            .for_module(&self.module)
            .for_operation(&call.operation)
    }
}

/// Parses a 2xx body into a result map; non-object JSON lands under `result`.
fn parse_body(body: &str) -> Result<Map<String, Value>, serde_json::Error> {
    Ok(into_result_map(serde_json::from_str(body)?))
}

pub(crate) fn into_result_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}
