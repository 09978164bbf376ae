use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

use super::codec::MalformedMessage;
use super::protocol::JsonRpcError;
use super::session::SessionId;

/// Failures of a single tool invocation. Always reported back to the caller
/// as an error response correlated to the request; never fatal to a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    UnknownTool { name: String },

    #[error("Invalid argument '{field}': {reason}")]
    SchemaViolation { field: String, reason: String },

    #[error("Tool execution failed: {detail}")]
    HandlerFailure { detail: String },
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool { .. } => "UnknownTool",
            Self::SchemaViolation { .. } => "SchemaViolation",
            Self::HandlerFailure { .. } => "HandlerFailure",
        }
    }

    pub fn handler_failure(detail: impl Into<String>) -> Self {
        Self::HandlerFailure {
            detail: detail.into(),
        }
    }
}

impl From<ToolError> for JsonRpcError {
    fn from(err: ToolError) -> Self {
        let message = err.to_string();
        let kind = err.kind();
        match err {
            ToolError::UnknownTool { name } => JsonRpcError::custom(
                -32001,
                message,
                Some(json!({ "kind": kind, "tool": name })),
            ),
            ToolError::SchemaViolation { field, reason } => JsonRpcError::custom(
                -32602,
                message,
                Some(json!({ "kind": kind, "field": field, "reason": reason })),
            ),
            ToolError::HandlerFailure { detail } => JsonRpcError::custom(
                -32003,
                message,
                Some(json!({ "kind": kind, "detail": detail })),
            ),
        }
    }
}

/// Registration faults. Only raised while the registry is built at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool '{0}' is already registered")]
    DuplicateName(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Could not find session {0}")]
    UnknownSession(SessionId),

    #[error("Session id {0} is already in use")]
    IdCollision(SessionId),
}

/// Errors returned synchronously to the poster on the inbound side channel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Missing session_id query parameter")]
    MissingSessionId,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Malformed(#[from] MalformedMessage),
}

impl TransportError {
    fn kind(&self) -> &'static str {
        match self {
            Self::MissingSessionId => "MissingSessionId",
            Self::Session(SessionError::UnknownSession(_)) => "UnknownSession",
            Self::Session(SessionError::IdCollision(_)) => "SessionIdCollision",
            Self::Malformed(_) => "MalformedMessage",
        }
    }
}

impl ResponseError for TransportError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "details": self.to_string(),
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSessionId => StatusCode::BAD_REQUEST,
            Self::Session(SessionError::UnknownSession(_)) => StatusCode::NOT_FOUND,
            Self::Session(SessionError::IdCollision(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
        }
    }
}
