//! Handler module - request-type dispatch for backends.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps request types to handlers
//! - [`request_type`] - derives the request type from a method name
//!
//! # Example
//!
//! ```ignore
//! use xapi_client::handler::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//!
//! // Every xCommand/... method lands here
//! registry.register("xCommand", |request: Request, send: ShellSender| async move {
//!     send.send("xCommand Audio Volume Increase", request.body()).await
//! });
//! ```

mod registry;

pub use registry::{request_type, BoxFuture, Handler, HandlerRegistry, HandlerResult};
