//! Classification of raw device replies.
//!
//! These functions turn a parsed shell-protocol reply into the value a
//! caller sees, or into a taxonomy error ([`RpcError`]).

use serde_json::{Map, Value};

use super::collapse;
use crate::error::{Result, RpcError, XapiError};
use crate::path::{NormalizedPath, Segment};
use crate::protocol::{Request, PATH_PARAM};
use crate::shell::RESULT_ID_FIELD;

/// Top-level key wrapping the outcome of a command.
pub const COMMAND_RESPONSE_KEY: &str = "CommandResponse";

const DEFAULT_PATH_REASON: &str = "No match on address expression";

/// Classify a command reply.
///
/// Requires exactly one child under `CommandResponse`, carrying a `status`.
/// Returns the child unchanged (not collapsed) on `OK`.
pub fn classify_command_result(response: &Value) -> Result<Value> {
    let envelope = response
        .get(COMMAND_RESPONSE_KEY)
        .and_then(Value::as_object)
        .ok_or_else(|| {
            RpcError::invalid_response("Invalid command response: missing CommandResponse")
        })?;

    let (key, node) = match single_entry(envelope) {
        Some(entry) => entry,
        None => {
            return Err(RpcError::invalid_response(
                "Invalid command response: wrong number of keys",
            )
            .into())
        }
    };

    let status = node
        .get("status")
        .ok_or_else(|| RpcError::invalid_response("Invalid command response: missing status"))?;

    match status.as_str() {
        Some("OK") => Ok(node.clone()),
        Some("ParameterError") => Err(RpcError::parameter().into()),
        Some("Error") => Err(command_error(key, node).into()),
        Some(other) => Err(RpcError::invalid_status(other).into()),
        None => Err(RpcError::invalid_status(&status.to_string()).into()),
    }
}

/// Locate the value a get request asked for.
///
/// Command-shaped replies are classified first so device errors surface.
/// A missing key yields `Ok(None)`.
pub fn extract_get_value(request: &Request, response: &Value) -> Result<Option<Value>> {
    if response.get(COMMAND_RESPONSE_KEY).is_some() {
        classify_command_result(response)?;
    }

    let path = path_param(request, PATH_PARAM)?;
    let collapsed = collapse(response);
    Ok(walk(&collapsed, path.segments()).cloned())
}

/// Inspect the reply to a set request.
///
/// A reply that carries more than the correlation id is searched for the
/// leaf at the request's path; a leaf flagged with `error` rejects the value.
pub fn extract_set_outcome(request: &Request, response: &Value) -> Result<()> {
    if response.get(COMMAND_RESPONSE_KEY).is_some() {
        classify_command_result(response)?;
        return Ok(());
    }

    let has_payload = response
        .as_object()
        .is_some_and(|map| map.keys().any(|key| key != RESULT_ID_FIELD));
    if !has_payload {
        return Ok(());
    }

    let path = path_param(request, PATH_PARAM)?;
    match walk(response, path.segments()) {
        Some(leaf) if is_truthy(leaf.get("error")) => {
            let reason = match collapse(leaf) {
                Value::String(s) => s,
                Value::Null => "Illegal value".to_string(),
                other => other.to_string(),
            };
            Err(RpcError::illegal_value(reason).into())
        }
        _ => Ok(()),
    }
}

/// Walk a reply tree along a path.
///
/// Arrays are searched for the element whose `id` equals the index
/// segment; objects are indexed by key.
pub fn walk<'a>(node: &'a Value, path: &[Segment]) -> Option<&'a Value> {
    let Some((first, rest)) = path.split_first() else {
        return Some(node);
    };

    let next = match (node, first) {
        (Value::Array(items), Segment::Index(index)) => {
            items.iter().find(|item| element_id(item) == Some(*index))
        }
        (Value::Object(map), Segment::Name(name)) => map.get(name),
        (Value::Object(map), Segment::Index(index)) => map.get(&index.to_string()),
        _ => None,
    }?;

    walk(next, rest)
}

/// The integer `id` attribute of an array element, if it has one.
pub fn element_id(value: &Value) -> Option<u64> {
    match collapse(value.get("id")?) {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a path-valued parameter, failing with a parameter error.
pub(crate) fn path_param(request: &Request, key: &str) -> Result<NormalizedPath> {
    request
        .param(key)
        .and_then(NormalizedPath::from_json)
        .ok_or_else(|| XapiError::Rpc(RpcError::parameter()))
}

fn single_entry(map: &Map<String, Value>) -> Option<(&String, &Value)> {
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Some(entry),
        _ => None,
    }
}

fn command_error(key: &str, node: &Value) -> RpcError {
    let collapsed = collapse(node);
    let text = |field: &str| collapsed.get(field).and_then(Value::as_str).map(str::to_string);

    if let Some(xpath) = text("XPath") {
        let reason = text("Reason").unwrap_or_else(|| DEFAULT_PATH_REASON.to_string());
        return RpcError::invalid_path(&xpath, &reason);
    }

    let reason = text("Error")
        .or_else(|| text("Reason"))
        .unwrap_or_else(|| key.to_string());
    RpcError::command(reason, collapsed)
}

fn is_truthy(marker: Option<&Value>) -> bool {
    match marker {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::build_request;
    use crate::error::ErrorCode;
    use crate::path::normalize;
    use serde_json::json;

    fn get_request(path: &str) -> Request {
        let mut params = Map::new();
        params.insert("Path".to_string(), normalize(path).to_json());
        build_request(Some("1".to_string()), "xGet", Some(params)).unwrap()
    }

    fn set_request(path: &str, value: Value) -> Request {
        let mut params = Map::new();
        params.insert("Path".to_string(), normalize(path).to_json());
        params.insert("Value".to_string(), value);
        build_request(Some("2".to_string()), "xSet", Some(params)).unwrap()
    }

    fn rpc_code(result: Result<impl std::fmt::Debug>) -> ErrorCode {
        match result {
            Err(XapiError::Rpc(e)) => e.kind(),
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_ok_returns_inner_node() {
        let response = json!({
            "CommandResponse": {"DialResult": {"status": "OK", "CallId": {"Value": "3"}}},
            "ResultId": "1"
        });
        let node = classify_command_result(&response).unwrap();
        assert_eq!(node, json!({"status": "OK", "CallId": {"Value": "3"}}));
    }

    #[test]
    fn test_classify_parameter_error() {
        let response = json!({"CommandResponse": {"DialResult": {"status": "ParameterError"}}});
        assert_eq!(rpc_code(classify_command_result(&response)), ErrorCode::Parameter);
    }

    #[test]
    fn test_classify_xpath_error() {
        let response = json!({
            "CommandResponse": {
                "Result": {
                    "status": "Error",
                    "Reason": {"Value": "No match on address expression."},
                    "XPath": {"Value": "/Foo/Bar"}
                }
            }
        });
        match classify_command_result(&response) {
            Err(XapiError::Rpc(e)) => {
                assert_eq!(e.kind(), ErrorCode::InvalidPath);
                assert_eq!(e.data.unwrap()["xpath"], "/Foo/Bar");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_classify_command_error_reason_preference() {
        let with_error = json!({"CommandResponse": {"DialResult": {
            "status": "Error", "Error": {"Value": "Busy"}, "Reason": {"Value": "ignored"}
        }}});
        let with_reason = json!({"CommandResponse": {"DialResult": {
            "status": "Error", "Reason": {"Value": "Invalid number"}
        }}});
        let bare = json!({"CommandResponse": {"DialResult": {"status": "Error"}}});

        let message = |r: &Value| match classify_command_result(r) {
            Err(XapiError::Rpc(e)) => {
                assert_eq!(e.kind(), ErrorCode::Command);
                e.message
            }
            other => panic!("unexpected: {other:?}"),
        };

        assert_eq!(message(&with_error), "Busy");
        assert_eq!(message(&with_reason), "Invalid number");
        assert_eq!(message(&bare), "DialResult");
    }

    #[test]
    fn test_classify_malformed() {
        let missing = json!({"Status": {}});
        let two_keys = json!({"CommandResponse": {"A": {"status": "OK"}, "B": {"status": "OK"}}});
        let empty = json!({"CommandResponse": {}});
        let no_status = json!({"CommandResponse": {"A": {}}});

        for response in [missing, two_keys, empty, no_status] {
            assert_eq!(
                rpc_code(classify_command_result(&response)),
                ErrorCode::InvalidResponse
            );
        }
    }

    #[test]
    fn test_classify_unknown_status() {
        let response = json!({"CommandResponse": {"A": {"status": "Maybe"}}});
        match classify_command_result(&response) {
            Err(XapiError::Rpc(e)) => {
                assert_eq!(e.kind(), ErrorCode::InvalidStatus);
                assert!(e.message.contains("Maybe"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_get_value() {
        let response = json!({"Status": {"Audio": {"Volume": {"Value": "75"}}}, "ResultId": "1"});
        let value = extract_get_value(&get_request("Status Audio Volume"), &response).unwrap();
        assert_eq!(value, Some(json!("75")));
    }

    #[test]
    fn test_get_value_missing_path() {
        let response = json!({"Status": {"Audio": {}}});
        let value = extract_get_value(&get_request("Status Audio Volume"), &response).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_get_value_through_array_ids() {
        let response = json!({"Status": {"Call": [
            {"id": "41", "Status": {"Value": "Idle"}},
            {"id": "42", "Status": {"Value": "Connected"}}
        ]}});
        let value = extract_get_value(&get_request("Status/Call[42]/Status"), &response).unwrap();
        assert_eq!(value, Some(json!("Connected")));

        let whole = extract_get_value(&get_request("Status/Call"), &response).unwrap();
        assert_eq!(whole.unwrap().as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_get_value_propagates_command_error() {
        let response = json!({"CommandResponse": {"Result": {
            "status": "Error", "XPath": {"Value": "/Status/Nope"}
        }}});
        let result = extract_get_value(&get_request("Status Nope"), &response);
        assert_eq!(rpc_code(result), ErrorCode::InvalidPath);
    }

    #[test]
    fn test_set_outcome_success() {
        let request = set_request("Configuration Audio DefaultVolume", json!(50));
        assert!(extract_set_outcome(&request, &json!({"ResultId": "2"})).is_ok());
        assert!(extract_set_outcome(&request, &json!({})).is_ok());
    }

    #[test]
    fn test_set_outcome_illegal_value() {
        let request = set_request("Configuration Audio DefaultVolume", json!(500));
        let response = json!({
            "Configuration": {"Audio": {"DefaultVolume": {"error": "True", "Value": "Out of range"}}},
            "ResultId": "2"
        });
        match extract_set_outcome(&request, &response) {
            Err(XapiError::Rpc(e)) => {
                assert_eq!(e.kind(), ErrorCode::IllegalValue);
                assert_eq!(e.message, "Out of range");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_set_outcome_unflagged_leaf_succeeds() {
        let request = set_request("Configuration Audio DefaultVolume", json!(50));
        let response = json!({
            "Configuration": {"Audio": {"DefaultVolume": {"Value": "50"}}},
            "ResultId": "2"
        });
        assert!(extract_set_outcome(&request, &response).is_ok());
    }

    #[test]
    fn test_element_id_forms() {
        assert_eq!(element_id(&json!({"id": 7})), Some(7));
        assert_eq!(element_id(&json!({"id": "8"})), Some(8));
        assert_eq!(element_id(&json!({"id": {"Value": "9"}})), Some(9));
        assert_eq!(element_id(&json!({"id": "x"})), None);
        assert_eq!(element_id(&json!({})), None);
    }
}
