use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    UpstreamTool,
    ContextIncomplete,
    Transport,
    Discovery,
    Precondition,
    NotFound,
    ParseFailure,
    Internal,
}

/// Status code and body of a failed remote module call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportFault {
    pub status: Option<u16>,
    pub body: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub module: Option<String>,
    pub operation: Option<String>,
    pub kind: CoreErrorKind,
    pub message: String,
    pub transport: Option<TransportFault>,
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            module: None,
            operation: None,
            kind,
            message: message.into(),
            transport: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::InvalidInput, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::UpstreamTool, message)
    }

    pub fn parse_failure(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::ParseFailure, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Internal, message)
    }

    pub fn transport(message: impl Into<String>, status: Option<u16>, body: String) -> Self {
        Self {
            transport: Some(TransportFault { status, body }),
            ..Self::new(CoreErrorKind::Transport, message)
        }
    }

    pub fn for_module(mut self, module: &str) -> Self {
        self.module.get_or_insert_with(|| module.to_string());
        self
    }

    pub fn for_operation(mut self, operation: &str) -> Self {
        self.operation.get_or_insert_with(|| operation.to_string());
        self
    }

    pub fn status(&self) -> Option<u16> {
        self.transport.as_ref().and_then(|fault| fault.status)
    }
}
