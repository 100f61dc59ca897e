//! Handler registry for dispatching requests by request type.
//!
//! A request's type is derived from its method: every `xCommand/...` method
//! shares the [`COMMAND_PREFIX`] type, any other method is its own type.
//! Unregistered types are rejected with `MethodNotFound`.
//!
//! The registry is generic over the context handed to handlers, so each
//! backend decides what "sending" means for its transport.
//!
//! # Example
//!
//! ```ignore
//! use xapi_client::handler::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::<ShellSender>::new();
//!
//! registry.register("xGet", |request: Request, send: ShellSender| async move {
//!     let path = path_param(&request, PATH_PARAM)?;
//!     send.send(&format!("x{}", path.tokens()), None).await
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::{Result, RpcError};
use crate::protocol::{Request, COMMAND_PREFIX};

/// Result type for handler functions.
pub type HandlerResult = Result<Value>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for handler functions.
pub trait Handler<C>: Send + Sync + 'static {
    /// Handle a request, using `ctx` to reach the transport.
    fn call(&self, request: Request, ctx: C) -> BoxFuture<'static, HandlerResult>;
}

impl<C, F, Fut> Handler<C> for F
where
    F: Fn(Request, C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: Request, ctx: C) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(request, ctx))
    }
}

/// Map the method of a request to the tag its handler is registered under.
///
/// Only `xCommand` itself and `xCommand/...` methods share the command tag.
pub fn request_type(method: &str) -> &str {
    match method.strip_prefix(COMMAND_PREFIX) {
        Some("") => COMMAND_PREFIX,
        Some(rest) if rest.starts_with('/') => COMMAND_PREFIX,
        _ => method,
    }
}

/// Registry mapping request types to handlers.
pub struct HandlerRegistry<C> {
    handlers: HashMap<String, Box<dyn Handler<C>>>,
}

impl<C: Send + 'static> HandlerRegistry<C> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a request type, replacing any previous one.
    pub fn register<H>(&mut self, request_type: &str, handler: H)
    where
        H: Handler<C>,
    {
        self.handlers
            .insert(request_type.to_string(), Box::new(handler));
    }

    /// Get a handler by request type.
    pub fn get_handler(&self, request_type: &str) -> Option<&dyn Handler<C>> {
        self.handlers.get(request_type).map(|h| h.as_ref())
    }

    /// True if a handler is registered for the request type.
    pub fn contains(&self, request_type: &str) -> bool {
        self.handlers.contains_key(request_type)
    }

    /// Dispatch a request to the handler for its type.
    ///
    /// Falls back to a handler that always fails with `MethodNotFound`.
    pub fn dispatch(&self, request: Request, ctx: C) -> BoxFuture<'static, HandlerResult> {
        match self.get_handler(request_type(&request.method)) {
            Some(handler) => handler.call(request, ctx),
            None => {
                let err = RpcError::method_not_found(&request.method);
                Box::pin(async move { Err(err.into()) })
            }
        }
    }
}

impl<C: Send + 'static> Default for HandlerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::build_request;
    use crate::error::{ErrorCode, XapiError};
    use serde_json::json;

    fn request(method: &str) -> Request {
        build_request(Some("1".to_string()), method, None).unwrap()
    }

    #[test]
    fn test_request_type() {
        assert_eq!(request_type("xCommand/Audio/Volume/Increase"), "xCommand");
        assert_eq!(request_type("xCommand"), "xCommand");
        assert_eq!(request_type("xGet"), "xGet");
        assert_eq!(request_type("xFeedback/Subscribe"), "xFeedback/Subscribe");
        assert_eq!(request_type("xCommandFoo"), "xCommandFoo");
        assert_eq!(request_type("xCommandFoo/Bar"), "xCommandFoo/Bar");
    }

    #[test]
    fn test_register_handler() {
        let mut registry = HandlerRegistry::<()>::new();
        registry.register("xGet", |_req: Request, _ctx: ()| async { Ok(Value::Null) });

        assert!(registry.contains("xGet"));
        assert!(registry.get_handler("xGet").is_some());
        assert!(registry.get_handler("xSet").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_command_prefix() {
        let mut registry = HandlerRegistry::<&'static str>::new();
        registry.register("xCommand", |req: Request, ctx: &'static str| async move {
            Ok(json!({ "method": req.method, "ctx": ctx }))
        });

        let result = registry
            .dispatch(request("xCommand/Dial"), "shell")
            .await
            .unwrap();
        assert_eq!(result, json!({"method": "xCommand/Dial", "ctx": "shell"}));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let registry = HandlerRegistry::<()>::new();
        match registry.dispatch(request("xDoc"), ()).await {
            Err(XapiError::Rpc(e)) => assert_eq!(e.kind(), ErrorCode::MethodNotFound),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let mut registry = HandlerRegistry::<()>::new();
        registry.register("xSet", |_req: Request, _ctx: ()| async {
            Err(XapiError::InvalidValue("nope".to_string()))
        });

        let result = registry.dispatch(request("xSet"), ()).await;
        assert!(matches!(result, Err(XapiError::InvalidValue(_))));
    }
}
