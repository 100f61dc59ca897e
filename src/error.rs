//! Error types for xapi-client.
//!
//! Two layers live here:
//!
//! - [`XapiError`] - the crate-wide error returned from every fallible call.
//! - [`RpcError`] / [`ErrorCode`] - the numeric error taxonomy carried inside
//!   JSON envelopes between a backend and the client facade.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::shell::ConnectionState;

/// Numeric error codes carried in error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Catch-all for errors without a more specific code.
    Unknown,
    /// The device rejected a command with a free-text reason.
    Command,
    /// A set operation's value was rejected.
    IllegalValue,
    /// The addressed path does not exist.
    InvalidPath,
    /// Malformed or missing command parameters.
    Parameter,
    /// The device's reply did not match the expected envelope shape.
    InvalidResponse,
    /// The device answered with an unrecognized status word.
    InvalidStatus,
    /// No handler exists for the requested method.
    MethodNotFound,
}

impl ErrorCode {
    /// Wire value of this code.
    pub const fn as_i64(self) -> i64 {
        match self {
            ErrorCode::Unknown => 0,
            ErrorCode::Command => 1,
            ErrorCode::IllegalValue => 2,
            ErrorCode::InvalidPath => 3,
            ErrorCode::Parameter => 4,
            ErrorCode::InvalidResponse => 5,
            ErrorCode::InvalidStatus => 6,
            ErrorCode::MethodNotFound => -32601,
        }
    }

    /// Map a wire value back to a code. Unrecognized values map to `Unknown`.
    pub const fn from_i64(code: i64) -> Self {
        match code {
            1 => ErrorCode::Command,
            2 => ErrorCode::IllegalValue,
            3 => ErrorCode::InvalidPath,
            4 => ErrorCode::Parameter,
            5 => ErrorCode::InvalidResponse,
            6 => ErrorCode::InvalidStatus,
            -32601 => ErrorCode::MethodNotFound,
            _ => ErrorCode::Unknown,
        }
    }
}

/// Error payload of an error envelope: `{code, message, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric code, see [`ErrorCode`].
    pub code: i64,
    /// Human readable message.
    pub message: String,
    /// Optional structured data (offending path, rejected value, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_i64(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The taxonomy code of this error.
    pub fn kind(&self) -> ErrorCode {
        ErrorCode::from_i64(self.code)
    }

    pub(crate) fn command(reason: impl Into<String>, data: Value) -> Self {
        Self::new(ErrorCode::Command, reason).with_data(data)
    }

    pub(crate) fn illegal_value(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::IllegalValue, reason)
    }

    pub(crate) fn invalid_path(xpath: &str, reason: &str) -> Self {
        Self::new(ErrorCode::InvalidPath, format!("{reason}: {xpath}"))
            .with_data(serde_json::json!({ "xpath": xpath, "reason": reason }))
    }

    pub(crate) fn parameter() -> Self {
        Self::new(ErrorCode::Parameter, "Invalid or missing parameters")
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidResponse, message)
    }

    pub(crate) fn invalid_status(status: &str) -> Self {
        Self::new(
            ErrorCode::InvalidStatus,
            format!("Invalid command status: {status}"),
        )
    }

    pub(crate) fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("Method not found: {method}"))
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Main error type for all xapi-client operations.
#[derive(Debug, Error)]
pub enum XapiError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The inbound stream ended in the middle of a JSON document.
    #[error("Unexpected end of input")]
    UnexpectedEof,

    /// Framing or protocol violation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Inbound data arrived while the connection was in a state that cannot accept it.
    #[error("Invalid connection state: {0}")]
    InvalidState(ConnectionState),

    /// A value that cannot be rendered on the wire.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// An error reported through an error envelope.
    #[error("{0}")]
    Rpc(RpcError),

    /// Connection closed before the call settled.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Use of a removed API.
    #[error("Deprecated: {0}")]
    Deprecated(&'static str),
}

impl XapiError {
    /// The taxonomy code this error is reported under.
    pub fn code(&self) -> ErrorCode {
        match self {
            XapiError::Rpc(e) => e.kind(),
            _ => ErrorCode::Unknown,
        }
    }

    /// Convert into an envelope error payload.
    pub fn into_rpc(self) -> RpcError {
        match self {
            XapiError::Rpc(e) => e,
            other => RpcError::new(ErrorCode::Unknown, other.to_string()),
        }
    }
}

impl From<RpcError> for XapiError {
    fn from(e: RpcError) -> Self {
        XapiError::Rpc(e)
    }
}

/// Result type alias using XapiError.
pub type Result<T> = std::result::Result<T, XapiError>;
