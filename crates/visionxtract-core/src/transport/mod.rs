mod client;
mod remote;

pub use client::{ModuleClient, supports_capability};
pub use remote::RemoteEndpoint;

use serde_json::Value;

/// Transport asked for at construction. `Auto` is resolved once.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RequestedMode {
    InProcess,
    Remote,
    Auto,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TransportMode {
    InProcess,
    Remote,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CallMethod {
    Get,
    Post,
}

impl CallMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// One operation invocation against a module.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleCall {
    pub method: CallMethod,
    pub operation: String,
    pub payload: Option<Value>,
    pub params: Vec<(String, String)>,
}

impl ModuleCall {
    pub fn post(operation: impl Into<String>) -> Self {
        Self::new(CallMethod::Post, operation)
    }

    pub fn get(operation: impl Into<String>) -> Self {
        Self::new(CallMethod::Get, operation)
    }

    fn new(method: CallMethod, operation: impl Into<String>) -> Self {
        Self {
            method,
            operation: operation.into(),
            payload: None,
            params: Vec::new(),
        }
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}
