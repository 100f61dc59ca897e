//! Backend contract shared by every transport adapter.
//!
//! A backend accepts [`Request`]s through [`Backend::execute`] and publishes
//! exactly one response envelope per request on its event channel, plus
//! feedback events, backend-level errors and a final `Closed`.
//!
//! ```text
//! Client ──execute(Request)──► Backend ──► device
//!    ▲                            │
//!    └──── BackendEvent ◄─────────┘
//! ```
//!
//! Two backends ship with the crate:
//! - [`ShellBackend`](crate::shell::ShellBackend) - line-oriented shell protocol over a byte stream
//! - [`EnvelopeBackend`] - JSON envelopes over a message channel

mod envelope;

pub use envelope::EnvelopeBackend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::codec::{build_error_response, build_response};
use crate::error::{Result, XapiError};
use crate::handler::{BoxFuture, HandlerRegistry};
use crate::protocol::{Message, Request};

/// Notification published by a backend.
#[derive(Debug)]
pub enum BackendEvent {
    /// A response envelope or a feedback event envelope.
    Message(Message),
    /// A failure not attributable to any single request.
    Error(XapiError),
    /// The transport closed. Always the last event.
    Closed,
}

/// Transport adapter contract.
pub trait Backend: Send + Sync + 'static {
    /// Resolves once requests may be sent; fails if the connection closed first.
    fn ready(&self) -> BoxFuture<'static, Result<()>>;

    /// Start processing a request. Never blocks; the outcome arrives as an event.
    fn execute(&self, request: Request);

    /// Take the event receiver. Returns `None` after the first call.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<BackendEvent>>;

    /// Close the backend. Idempotent; no events are published afterwards.
    fn close(&self);
}

/// Sending side of a backend's event channel.
///
/// Cloned into every task that reports outcomes. Once closed, events are
/// dropped silently.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<BackendEvent>,
    closed: Arc<AtomicBool>,
}

impl EventSink {
    /// Create a sink and the receiver the client consumes.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (sink, rx)
    }

    /// Publish an event unless the sink is closed.
    pub fn emit(&self, event: BackendEvent) {
        if self.is_closed() {
            tracing::trace!(?event, "Dropping event after close");
            return;
        }
        let _ = self.tx.send(event);
    }

    /// Publish an envelope.
    pub fn message(&self, message: impl Into<Message>) {
        self.emit(BackendEvent::Message(message.into()));
    }

    /// Publish a backend-level error.
    pub fn error(&self, error: XapiError) {
        self.emit(BackendEvent::Error(error));
    }

    /// Publish `Closed` once, then stop publishing.
    pub fn emit_closed(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(BackendEvent::Closed);
        }
    }

    /// Stop publishing without a `Closed` event.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// True once no more events will be published.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Run a request through a registry and publish exactly one response envelope.
pub(crate) async fn respond<C: Send + 'static>(
    registry: &HandlerRegistry<C>,
    request: Request,
    ctx: C,
    sink: &EventSink,
) {
    let id = request.id.clone().unwrap_or_default();
    let method = request.method.clone();

    let response = match registry.dispatch(request, ctx).await {
        Ok(result) => build_response(id, result),
        Err(e) => {
            tracing::debug!(%method, error = %e, "Request failed");
            build_error_response(id, e)
        }
    };

    sink.message(response);
}
