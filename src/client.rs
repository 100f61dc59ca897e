//! Client facade and request correlation.
//!
//! The [`Client`] hands requests to a [`Backend`] and matches the replies
//! that come back to the call that issued them:
//!
//! 1. `execute` allocates an id and parks a completion under it
//! 2. the backend sends the request and publishes exactly one response
//! 3. the router task resolves or rejects the parked completion
//! 4. feedback events go to the [`FeedbackEngine`] instead
//!
//! # Example
//!
//! ```ignore
//! use xapi_client::{Client, ShellBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = tokio::net::TcpStream::connect("codec.local:4000").await?;
//!     let client = Client::builder()
//!         .span(tracing::info_span!("codec"))
//!         .build(ShellBackend::new(stream))?;
//!
//!     client.ready().await?;
//!     client.command("Audio Volume Increase", None, None).await?;
//!     let volume = client.status().get("Audio Volume").await?;
//!     println!("volume: {volume}");
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::backend::{Backend, BackendEvent};
use crate::codec::build_request;
use crate::component::{Config, Event, Status};
use crate::error::{Result, XapiError};
use crate::feedback::{FeedbackEngine, FeedbackHandle, Interceptor, Requester};
use crate::handler::BoxFuture;
use crate::path::{normalize, IntoPath};
use crate::protocol::{
    Message, BODY_PARAM, COMMAND_PREFIX, GET_METHOD, PATH_PARAM, SET_METHOD, VALUE_PARAM,
};

type Completion = oneshot::Sender<Result<Value>>;

/// Future of one call's outcome, returned by every facade operation.
///
/// The request is already on its way when this is returned; awaiting it
/// only waits for the reply.
#[must_use = "the call is sent regardless, but its outcome is lost if not awaited"]
pub struct PendingCall {
    state: PendingState,
}

enum PendingState {
    Waiting(oneshot::Receiver<Result<Value>>),
    Failed(Option<XapiError>),
}

impl PendingCall {
    fn waiting(rx: oneshot::Receiver<Result<Value>>) -> Self {
        Self {
            state: PendingState::Waiting(rx),
        }
    }

    fn failed(error: XapiError) -> Self {
        Self {
            state: PendingState::Failed(Some(error)),
        }
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            PendingState::Waiting(rx) => Pin::new(rx).poll(cx).map(|outcome| match outcome {
                Ok(outcome) => outcome,
                Err(_) => Err(XapiError::ConnectionClosed),
            }),
            PendingState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(XapiError::ConnectionClosed)))
            }
        }
    }
}

#[derive(Default)]
struct PendingTable {
    closed: bool,
    calls: HashMap<String, Completion>,
}

/// Id allocation and the correlation table.
struct Calls {
    backend: Arc<dyn Backend>,
    next_id: AtomicU64,
    pending: Mutex<PendingTable>,
}

impl Calls {
    fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(PendingTable::default()),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(&self, method: &str, params: Option<Map<String, Value>>) -> PendingCall {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let request = match build_request(Some(id.clone()), method, params) {
            Ok(request) => request,
            Err(e) => return PendingCall::failed(e),
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.table();
            if table.closed {
                return PendingCall::failed(XapiError::ConnectionClosed);
            }
            table.calls.insert(id, tx);
        }

        self.backend.execute(request);
        PendingCall::waiting(rx)
    }

    fn settle(&self, id: &str, outcome: Result<Value>) {
        let completion = self.table().calls.remove(id);
        match completion {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::warn!(%id, "Response for unknown request"),
        }
    }

    /// Refuse new calls and reject every outstanding one.
    fn close(&self) {
        let abandoned: Vec<Completion> = {
            let mut table = self.table();
            table.closed = true;
            table.calls.drain().map(|(_, tx)| tx).collect()
        };
        if !abandoned.is_empty() {
            tracing::debug!(count = abandoned.len(), "Rejecting outstanding calls");
        }
        for tx in abandoned {
            let _ = tx.send(Err(XapiError::ConnectionClosed));
        }
    }

    fn is_closed(&self) -> bool {
        self.table().closed
    }

    fn outstanding(&self) -> usize {
        self.table().calls.len()
    }
}

impl Requester for Calls {
    fn request(&self, method: &str, params: Map<String, Value>) -> BoxFuture<'static, Result<Value>> {
        Box::pin(self.execute(method, Some(params)))
    }
}

type ErrorListener = Arc<dyn Fn(&XapiError) + Send + Sync>;
type CloseListener = Arc<dyn Fn() + Send + Sync>;

/// Registered `error` and `close` listeners.
#[derive(Default)]
struct Notifiers {
    next_id: AtomicU64,
    errors: Mutex<HashMap<u64, ErrorListener>>,
    closes: Mutex<HashMap<u64, CloseListener>>,
    closed: AtomicBool,
}

impl Notifiers {
    fn error(&self, error: &XapiError) {
        let listeners: Vec<ErrorListener> = self
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener(error);
        }
    }

    /// Fire the close listeners, at most once.
    fn closed(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let listeners: Vec<CloseListener> = self
            .closes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

#[derive(Clone, Copy)]
enum NotifierKind {
    Error,
    Close,
}

/// Deregistration handle for [`Client::on_error`] and [`Client::on_close`].
pub struct ListenerHandle {
    id: u64,
    kind: NotifierKind,
    notifiers: Weak<Notifiers>,
}

impl ListenerHandle {
    /// Remove the listener. Returns `false` if it was already removed.
    pub fn off(&self) -> bool {
        let Some(notifiers) = self.notifiers.upgrade() else {
            return false;
        };
        match self.kind {
            NotifierKind::Error => notifiers
                .errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id)
                .is_some(),
            NotifierKind::Close => notifiers
                .closes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id)
                .is_some(),
        }
    }
}

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    interceptor: Option<Arc<dyn Interceptor>>,
    span: tracing::Span,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            interceptor: None,
            span: tracing::debug_span!("xapi"),
        }
    }

    /// Route feedback payloads through an interceptor before dispatch.
    pub fn interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptor = Some(Arc::new(interceptor));
        self
    }

    /// Log under the given span.
    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Build the client on top of a backend.
    ///
    /// Takes the backend's event channel and starts the router task, so it
    /// must run inside a tokio runtime.
    pub fn build<B: Backend>(self, backend: B) -> Result<Client> {
        let backend: Arc<dyn Backend> = Arc::new(backend);
        let events = backend
            .events()
            .ok_or_else(|| XapiError::Protocol("Backend events already taken".to_string()))?;

        let calls = Arc::new(Calls::new(backend));
        let mut feedback = FeedbackEngine::new(calls.clone()).with_span(self.span.clone());
        if let Some(interceptor) = self.interceptor {
            feedback.set_interceptor(interceptor);
        }
        let notifiers = Arc::new(Notifiers::default());

        let router = tokio::spawn(
            route(events, calls.clone(), feedback.clone(), notifiers.clone())
                .instrument(self.span.clone()),
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                calls,
                feedback,
                notifiers,
                router: Mutex::new(Some(router)),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume backend events until the backend closes.
async fn route(
    mut events: mpsc::UnboundedReceiver<BackendEvent>,
    calls: Arc<Calls>,
    feedback: FeedbackEngine,
    notifiers: Arc<Notifiers>,
) {
    while let Some(event) = events.recv().await {
        match event {
            BackendEvent::Message(Message::Request(request)) => {
                if request.is_feedback_event() {
                    feedback.dispatch(request.params.unwrap_or(Value::Null));
                } else {
                    tracing::warn!(method = %request.method, "Ignoring request from backend");
                }
            }
            BackendEvent::Message(Message::Response(response)) => {
                let id = response.id.clone();
                calls.settle(&id, response.into_result());
            }
            BackendEvent::Error(e) => {
                tracing::warn!(error = %e, "Backend error");
                notifiers.error(&e);
            }
            BackendEvent::Closed => break,
        }
    }

    tracing::debug!("Backend closed");
    calls.close();
    notifiers.closed();
}

struct ClientInner {
    calls: Arc<Calls>,
    feedback: FeedbackEngine,
    notifiers: Arc<Notifiers>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    fn close(&self) {
        self.calls.close();
        self.calls.backend.close();
        if let Some(router) = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            router.abort();
        }
        self.notifiers.closed();
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle to a device connection. Cheap to clone; the connection closes
/// when the last clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Build a client with default settings.
    pub fn new<B: Backend>(backend: B) -> Result<Self> {
        ClientBuilder::new().build(backend)
    }

    /// Wait until the backend can send requests.
    ///
    /// Calls issued earlier are queued, so awaiting this is optional.
    pub async fn ready(&self) -> Result<()> {
        self.inner.calls.backend.ready().await
    }

    /// Issue a raw call.
    pub fn execute(&self, method: &str, params: Option<Map<String, Value>>) -> PendingCall {
        self.inner.calls.execute(method, params)
    }

    /// Invoke a command (`"Audio Volume Set"`, `["Dial"]`).
    ///
    /// A `body` is sent verbatim after the command line.
    pub fn command(
        &self,
        path: impl IntoPath,
        params: Option<Map<String, Value>>,
        body: Option<&str>,
    ) -> PendingCall {
        let method = format!("{COMMAND_PREFIX}/{}", normalize(path));
        let mut params = params.unwrap_or_default();
        if let Some(body) = body {
            params.insert(BODY_PARAM.to_string(), Value::String(body.to_string()));
        }
        let params = (!params.is_empty()).then_some(params);
        self.execute(&method, params)
    }

    /// Read a configuration or status value by its full path.
    pub fn get(&self, path: impl IntoPath) -> PendingCall {
        let mut params = Map::new();
        params.insert(PATH_PARAM.to_string(), normalize(path).to_json());
        self.execute(GET_METHOD, Some(params))
    }

    /// Write a configuration value by its full path.
    pub fn set(&self, path: impl IntoPath, value: impl Into<Value>) -> PendingCall {
        let mut params = Map::new();
        params.insert(PATH_PARAM.to_string(), normalize(path).to_json());
        params.insert(VALUE_PARAM.to_string(), value.into());
        self.execute(SET_METHOD, Some(params))
    }

    /// Listen for feedback at a full path.
    pub fn on<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.inner.feedback.on(path, listener)
    }

    /// Listen for the next feedback at a full path.
    pub fn once<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.inner.feedback.once(path, listener)
    }

    /// The feedback engine.
    pub fn feedback(&self) -> &FeedbackEngine {
        &self.inner.feedback
    }

    /// Configuration subtree.
    pub fn config(&self) -> Config {
        Config::new(self.clone())
    }

    /// Status subtree.
    pub fn status(&self) -> Status {
        Status::new(self.clone())
    }

    /// Event subtree.
    pub fn event(&self) -> Event {
        Event::new(self.clone())
    }

    /// Be told about backend errors not tied to a call (malformed documents, I/O).
    pub fn on_error<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&XapiError) + Send + Sync + 'static,
    {
        let notifiers = &self.inner.notifiers;
        let id = notifiers.next_id.fetch_add(1, Ordering::Relaxed);
        notifiers
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        ListenerHandle {
            id,
            kind: NotifierKind::Error,
            notifiers: Arc::downgrade(notifiers),
        }
    }

    /// Be told once when the connection ends, from either side.
    pub fn on_close<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let notifiers = &self.inner.notifiers;
        let id = notifiers.next_id.fetch_add(1, Ordering::Relaxed);
        notifiers
            .closes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        ListenerHandle {
            id,
            kind: NotifierKind::Close,
            notifiers: Arc::downgrade(notifiers),
        }
    }

    /// Close the connection. Outstanding calls fail with `ConnectionClosed`.
    pub fn close(&self) {
        self.inner.close();
    }

    /// True once the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.inner.calls.is_closed()
    }

    /// Number of calls waiting for a reply.
    pub fn outstanding(&self) -> usize {
        self.inner.calls.outstanding()
    }
}
