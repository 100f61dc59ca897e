//! Collapse the device's self-describing `{Value: x, ...}` wrapping.
//!
//! The shell protocol reports every leaf as an object carrying the value
//! plus attributes:
//!
//! ```text
//! {"Audio": {"Volume": {"Value": "50", "valueSpaceRef": "..."}}}
//! ```
//!
//! [`collapse`] rewrites such leaves into the bare scalar:
//!
//! ```
//! use serde_json::json;
//! use xapi_client::codec::collapse;
//!
//! let wrapped = json!({"Audio": {"Volume": {"Value": "50", "valueSpaceRef": "/x"}}});
//! assert_eq!(collapse(&wrapped), json!({"Audio": {"Volume": "50"}}));
//! ```

use serde_json::{Map, Value};

/// Key holding the scalar of a wrapped leaf.
pub const VALUE_KEY: &str = "Value";

/// Recursively replace `{Value: scalar, ...}` leaves by the scalar.
///
/// Arrays are mapped element-wise. Objects without a scalar `Value` are
/// rewritten key by key. Scalars pass through unchanged.
pub fn collapse(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(collapse).collect()),
        Value::Object(map) => match map.get(VALUE_KEY) {
            Some(leaf) if is_scalar(leaf) => leaf.clone(),
            _ => Value::Object(
                map.iter()
                    .map(|(key, child)| (key.clone(), collapse(child)))
                    .collect::<Map<_, _>>(),
            ),
        },
        scalar => scalar.clone(),
    }
}

/// Feedback payloads are collapsed exactly like get results.
pub fn parse_feedback_payload(value: &Value) -> Value {
    collapse(value)
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}
