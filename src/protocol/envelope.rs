//! JSON-RPC-shaped envelopes exchanged between the client facade and a backend.
//!
//! - Outbound: `{jsonrpc, id?, method, params?}` ([`Request`])
//! - Inbound: `{jsonrpc, id, result}` or `{jsonrpc, id, error}` ([`Response`])
//! - Feedback: a [`Request`] without id whose method is [`FEEDBACK_EVENT_METHOD`]

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, RpcError, XapiError};

/// Protocol version string carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of out-of-band feedback events.
pub const FEEDBACK_EVENT_METHOD: &str = "xFeedback/Event";

/// Method name used to register a feedback query with the device.
pub const FEEDBACK_SUBSCRIBE_METHOD: &str = "xFeedback/Subscribe";

/// Method name used to drop a feedback registration.
pub const FEEDBACK_UNSUBSCRIBE_METHOD: &str = "xFeedback/Unsubscribe";

/// Method name for reading a configuration or status value.
pub const GET_METHOD: &str = "xGet";

/// Method name for writing a configuration value.
pub const SET_METHOD: &str = "xSet";

/// Prefix of every command method (`xCommand/Audio/Volume/Increase`).
pub const COMMAND_PREFIX: &str = "xCommand";

/// Reserved parameter key carrying a multi-line command body.
pub const BODY_PARAM: &str = "body";

/// Parameter carrying the target path of a get or set, as a JSON array.
pub const PATH_PARAM: &str = "Path";

/// Parameter carrying the value of a set.
pub const VALUE_PARAM: &str = "Value";

/// Parameter carrying the path of a feedback subscription.
pub const QUERY_PARAM: &str = "Query";

/// Parameter and result key carrying a feedback subscription id.
pub const ID_PARAM: &str = "Id";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Outbound call, or an inbound feedback event when `id` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_id"
    )]
    pub id: Option<String>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Look up a single parameter.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.get(key))
    }

    /// Parameter object, empty when the request carries none.
    pub fn params_map(&self) -> Map<String, Value> {
        match &self.params {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    /// The multi-line body, if any.
    pub fn body(&self) -> Option<&str> {
        self.param(BODY_PARAM).and_then(Value::as_str)
    }

    /// True for feedback event envelopes.
    pub fn is_feedback_event(&self) -> bool {
        self.method == FEEDBACK_EVENT_METHOD
    }
}

/// Reply to a [`Request`]: exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// Present (possibly `null`) on success.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// True if the envelope carries a result field.
    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }

    /// Turn the envelope into the outcome seen by the caller.
    pub fn into_result(self) -> Result<Value> {
        match (self.result, self.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(XapiError::Rpc(error)),
            (None, None) => Err(XapiError::Rpc(RpcError::invalid_response(
                "Response carries neither result nor error",
            ))),
        }
    }
}

/// Any envelope travelling from a backend to the facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Parse one envelope from text.
    pub fn parse(text: &str) -> Result<Message> {
        Ok(serde_json::from_str(text)?)
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(serde_json::Number),
}

impl From<WireId> for String {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Text(s) => s,
            WireId::Number(n) => n.to_string(),
        }
    }
}

// Ids are opaque text; numeric ids from the wire are kept in their decimal form.
fn deserialize_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    WireId::deserialize(d).map(String::from)
}

fn deserialize_optional_id<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<String>, D::Error> {
    Option::<WireId>::deserialize(d).map(|id| id.map(String::from))
}

fn deserialize_present<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}
