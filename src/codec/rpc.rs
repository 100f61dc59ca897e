//! Envelope builders.

use serde_json::{Map, Value};

use crate::error::{Result, XapiError};
use crate::protocol::{Request, Response, BODY_PARAM, FEEDBACK_EVENT_METHOD, JSONRPC_VERSION};

/// Assemble an outgoing request envelope.
///
/// Fails if any parameter other than [`BODY_PARAM`] contains a newline:
/// neither wire encoding can carry one outside the body framing.
pub fn build_request(
    id: Option<String>,
    method: impl Into<String>,
    params: Option<Map<String, Value>>,
) -> Result<Request> {
    if let Some(params) = &params {
        for (key, value) in params {
            if key != BODY_PARAM && contains_newline(value) {
                return Err(XapiError::InvalidValue(format!(
                    "Parameter '{key}' may not contain newlines"
                )));
            }
        }
    }

    Ok(Request {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        method: method.into(),
        params: params.map(Value::Object),
    })
}

/// Assemble a success envelope.
pub fn build_response(id: impl Into<String>, result: Value) -> Response {
    Response {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: id.into(),
        result: Some(result),
        error: None,
    }
}

/// Assemble an error envelope. Errors outside the taxonomy get code 0.
pub fn build_error_response(id: impl Into<String>, error: XapiError) -> Response {
    Response {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: id.into(),
        result: None,
        error: Some(error.into_rpc()),
    }
}

/// Wrap a feedback payload into an id-less event envelope.
pub fn build_feedback_event(payload: Value) -> Request {
    Request {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: None,
        method: FEEDBACK_EVENT_METHOD.to_string(),
        params: Some(payload),
    }
}

fn contains_newline(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains('\n'),
        Value::Array(items) => items.iter().any(contains_newline),
        Value::Object(map) => map.values().any(contains_newline),
        _ => false,
    }
}
