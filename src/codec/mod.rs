//! Codec module - stateless translation between device replies and envelopes.
//!
//! - [`collapse`] undoes the device's `{Value: x}` leaf wrapping
//! - [`build_request`], [`build_response`], [`build_error_response`] assemble envelopes
//! - [`classify_command_result`], [`extract_get_value`], [`extract_set_outcome`]
//!   turn raw shell-protocol replies into results or taxonomy errors
//!
//! Nothing here holds state; every function can be called from any task.

mod collapse;
mod result;
mod rpc;

pub use collapse::{collapse, parse_feedback_payload, VALUE_KEY};
pub use result::{
    classify_command_result, element_id, extract_get_value, extract_set_outcome, walk,
    COMMAND_RESPONSE_KEY,
};
pub(crate) use result::path_param;
pub use rpc::{build_error_response, build_feedback_event, build_request, build_response};
