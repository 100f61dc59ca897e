//! Protocol module - envelopes and inbound document parsing.
//!
//! - [`envelope`] types shared by every backend and the client facade
//! - [`JsonStream`] for splitting the shell protocol's concatenated JSON replies

mod envelope;
mod json_stream;

pub use envelope::{
    Message, Request, Response, BODY_PARAM, COMMAND_PREFIX, FEEDBACK_EVENT_METHOD,
    FEEDBACK_SUBSCRIBE_METHOD, FEEDBACK_UNSUBSCRIBE_METHOD, GET_METHOD, ID_PARAM,
    JSONRPC_VERSION, PATH_PARAM, QUERY_PARAM, SET_METHOD, VALUE_PARAM,
};
pub use json_stream::{JsonStream, DEFAULT_MAX_DOCUMENT_SIZE};
