//! Envelope backend: JSON envelopes over a message channel.
//!
//! Used for transports that already speak the envelope protocol (a
//! WebSocket, once its handshake is done). Requests are forwarded verbatim
//! and every inbound message is parsed and published as-is.
//!
//! # Example
//!
//! ```ignore
//! let (to_device, from_client) = tokio::sync::mpsc::channel(64);
//! let (to_client, from_device) = tokio::sync::mpsc::channel(64);
//! let backend = EnvelopeBackend::new(to_device, from_device);
//! let client = Client::new(backend)?;
//! ```

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::{Backend, BackendEvent, EventSink};
use crate::codec::build_error_response;
use crate::error::{Result, XapiError};
use crate::handler::BoxFuture;
use crate::protocol::{Message, Request};

/// Backend forwarding envelopes over an already-established message channel.
pub struct EnvelopeBackend {
    outgoing: mpsc::Sender<String>,
    sink: EventSink,
    events: Mutex<Option<mpsc::UnboundedReceiver<BackendEvent>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    span: tracing::Span,
}

impl EnvelopeBackend {
    /// Create a backend over a pair of text channels. Must run inside a tokio runtime.
    pub fn new(outgoing: mpsc::Sender<String>, incoming: mpsc::Receiver<String>) -> Self {
        Self::with_span(outgoing, incoming, tracing::debug_span!("envelope_backend"))
    }

    /// Create a backend logging under the given span.
    pub fn with_span(
        outgoing: mpsc::Sender<String>,
        incoming: mpsc::Receiver<String>,
        span: tracing::Span,
    ) -> Self {
        let (sink, events) = EventSink::channel();
        let reader = tokio::spawn(read_loop(incoming, sink.clone()).instrument(span.clone()));

        Self {
            outgoing,
            sink,
            events: Mutex::new(Some(events)),
            reader: Mutex::new(Some(reader)),
            span,
        }
    }
}

async fn read_loop(mut incoming: mpsc::Receiver<String>, sink: EventSink) {
    while let Some(text) = incoming.recv().await {
        match Message::parse(&text) {
            Ok(message) => sink.message(message),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed envelope");
                sink.error(e);
            }
        }
    }
    tracing::debug!("Message channel closed");
    sink.emit_closed();
}

impl Backend for EnvelopeBackend {
    fn ready(&self) -> BoxFuture<'static, Result<()>> {
        let closed = self.sink.is_closed();
        Box::pin(async move {
            if closed {
                Err(XapiError::ConnectionClosed)
            } else {
                Ok(())
            }
        })
    }

    fn execute(&self, request: Request) {
        let outgoing = self.outgoing.clone();
        let sink = self.sink.clone();

        tokio::spawn(
            async move {
                let id = request.id.clone().unwrap_or_default();
                let sent = match serde_json::to_string(&request) {
                    Ok(text) => outgoing
                        .send(text)
                        .await
                        .map_err(|_| XapiError::ConnectionClosed),
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = sent {
                    sink.message(build_error_response(id, e));
                }
            }
            .instrument(self.span.clone()),
        );
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<BackendEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn close(&self) {
        self.sink.close();
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
    }
}

impl Drop for EnvelopeBackend {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::build_request;
    use crate::protocol::Response;
    use serde_json::json;

    #[tokio::test]
    async fn test_forwards_request_verbatim() {
        let (to_device, mut device_rx) = mpsc::channel(8);
        let (_device_tx, from_device) = mpsc::channel::<String>(8);
        let backend = EnvelopeBackend::new(to_device, from_device);

        backend.ready().await.unwrap();
        let request = build_request(Some("1".to_string()), "xGet", None).unwrap();
        backend.execute(request.clone());

        let text = device_rx.recv().await.unwrap();
        let forwarded: Request = serde_json::from_str(&text).unwrap();
        assert_eq!(forwarded, request);
    }

    #[tokio::test]
    async fn test_publishes_inbound_envelopes() {
        let (to_device, _device_rx) = mpsc::channel(8);
        let (device_tx, from_device) = mpsc::channel(8);
        let backend = EnvelopeBackend::new(to_device, from_device);
        let mut events = backend.events().unwrap();
        assert!(backend.events().is_none());

        device_tx
            .send(r#"{"jsonrpc":"2.0","id":"1","result":{"Volume":50}}"#.to_string())
            .await
            .unwrap();
        device_tx.send("not json".to_string()).await.unwrap();
        drop(device_tx);

        match events.recv().await {
            Some(BackendEvent::Message(Message::Response(Response { id, result, .. }))) => {
                assert_eq!(id, "1");
                assert_eq!(result, Some(json!({"Volume": 50})));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(events.recv().await, Some(BackendEvent::Error(_))));
        assert!(matches!(events.recv().await, Some(BackendEvent::Closed)));
    }

    #[tokio::test]
    async fn test_send_failure_becomes_error_envelope() {
        let (to_device, device_rx) = mpsc::channel(8);
        let (_device_tx, from_device) = mpsc::channel::<String>(8);
        let backend = EnvelopeBackend::new(to_device, from_device);
        let mut events = backend.events().unwrap();
        drop(device_rx);

        backend.execute(build_request(Some("9".to_string()), "xGet", None).unwrap());

        match events.recv().await {
            Some(BackendEvent::Message(Message::Response(resp))) => {
                assert_eq!(resp.id, "9");
                assert_eq!(resp.error.unwrap().message, "Connection closed");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
