//! Rendering requests as shell command lines.
//!
//! ```text
//! xCommand Dial Number: "user@example.com" | resultId="1"
//! xStatus Audio Volume | resultId="2"
//! xConfiguration Audio DefaultVolume: 50 | resultId="3"
//! xfeedback register /Status/Call[42]/Status | resultId="4"
//! ```
//!
//! A command with a multi-line body is preceded by a `{N} ` header line,
//! where `N` is the UTF-8 byte length of the command line, the body and
//! their trailing newlines.

use serde_json::{Map, Value};

use crate::error::{Result, XapiError};
use crate::path::NormalizedPath;
use crate::protocol::{Request, BODY_PARAM, COMMAND_PREFIX};

/// Render a parameter value: `True`/`False`, or a JSON literal.
pub fn format_value(value: &Value) -> Result<String> {
    match value {
        Value::Bool(true) => Ok("True".to_string()),
        Value::Bool(false) => Ok("False".to_string()),
        Value::Number(_) | Value::String(_) => Ok(serde_json::to_string(value)?),
        other => Err(XapiError::InvalidValue(format!(
            "Cannot format value: {other}"
        ))),
    }
}

/// Render parameters as `Key: value` pairs in key order.
///
/// The body parameter is skipped. Array values expand to one pair per
/// element.
pub fn format_params(params: &Map<String, Value>) -> Result<Vec<String>> {
    let mut entries: Vec<(&String, &Value)> =
        params.iter().filter(|(key, _)| *key != BODY_PARAM).collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut pairs = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        match value {
            Value::Array(items) => {
                for item in items {
                    pairs.push(format!("{key}: {}", format_value(item)?));
                }
            }
            value => pairs.push(format!("{key}: {}", format_value(value)?)),
        }
    }
    Ok(pairs)
}

/// Command line for an `xCommand/...` request, without correlation tag.
pub fn command_line(request: &Request) -> Result<String> {
    let mut parts = vec![COMMAND_PREFIX.to_string()];
    parts.extend(
        request
            .method
            .split('/')
            .skip(1)
            .filter(|token| !token.is_empty())
            .map(str::to_string),
    );
    parts.extend(format_params(&request.params_map())?);
    Ok(parts.join(" "))
}

/// `x<tokens>` read of a configuration or status path.
pub fn get_line(path: &NormalizedPath) -> String {
    format!("x{}", path.tokens())
}

/// `x<tokens>: <value>` write of a configuration path.
pub fn set_line(path: &NormalizedPath, value: &Value) -> Result<String> {
    Ok(format!("x{}: {}", path.tokens(), format_value(value)?))
}

/// Register a feedback query (`/Status/Call[42]`).
pub fn subscribe_line(query: &str) -> String {
    format!("xfeedback register {query}")
}

/// Drop a previously registered feedback query.
pub fn unsubscribe_line(query: &str) -> String {
    format!("xfeedback deregister {query}")
}

/// Tag a command with its correlation id and frame an optional body.
pub fn frame_command(command: &str, id: &str, body: Option<&str>) -> String {
    let line = format!("{command} | resultId=\"{id}\"");
    match body {
        None => format!("{line}\n"),
        Some(body) => {
            let block = format!("{line}\n{body}\n");
            format!("{{{}}} \n{block}", block.len())
        }
    }
}
