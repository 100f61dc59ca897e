//! Feedback subscriptions and event dispatch.
//!
//! Listeners register at a path; the engine asks the device for feedback on
//! that path and routes every inbound payload to the listeners whose path
//! it touches.
//!
//! Paths are matched on their lowercase slash-joined form. Arrays are
//! walked twice per element, so one event reaches both un-indexed and
//! id-specific listeners:
//!
//! ```text
//! {Status: {Call: [{id: 42, Status: "Connected"}]}}
//!
//!   status/call/status     ◄── "Connected"   (Status/Call/Status, Status/Call[]/Status)
//!   status/call/42/status  ◄── "Connected"   (Status/Call[42]/Status)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let handle = client.feedback().on("Status/Audio/Volume", |volume, _root| {
//!     println!("volume is now {volume}");
//! });
//! // later
//! handle.off();
//! ```

mod group;

pub use group::FeedbackGroup;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::codec::element_id;
use crate::error::{Result, XapiError};
use crate::handler::BoxFuture;
use crate::path::{normalize, IntoPath, NormalizedPath};
use crate::protocol::{FEEDBACK_SUBSCRIBE_METHOD, FEEDBACK_UNSUBSCRIBE_METHOD, ID_PARAM, QUERY_PARAM};

/// Callback receiving the matched node and the whole payload.
pub type Listener = dyn Fn(&Value, &Value) + Send + Sync;

/// Channel through which the engine talks to the device.
pub trait Requester: Send + Sync + 'static {
    /// Issue a call and resolve with its result.
    fn request(&self, method: &str, params: Map<String, Value>) -> BoxFuture<'static, Result<Value>>;
}

/// Hook deciding if and when a payload is walked.
///
/// The default forwards every payload straight to the [`Dispatcher`]. An
/// interceptor may drop payloads, rewrite them, or keep a clone of the
/// dispatcher and walk them later.
pub trait Interceptor: Send + Sync + 'static {
    /// Inspect a payload and optionally dispatch it.
    fn intercept(&self, payload: Value, dispatcher: &Dispatcher);
}

impl<F> Interceptor for F
where
    F: Fn(Value, &Dispatcher) + Send + Sync + 'static,
{
    fn intercept(&self, payload: Value, dispatcher: &Dispatcher) {
        (self)(payload, dispatcher)
    }
}

fn pass_through(payload: Value, dispatcher: &Dispatcher) {
    dispatcher.dispatch(&payload);
}

#[derive(Clone)]
struct Entry {
    id: u64,
    listener: Arc<Listener>,
    /// Set for `once` registrations, which remove themselves before firing.
    once: Option<FeedbackHandle>,
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: HashMap<String, Vec<Entry>>,
}

impl ListenerTable {
    fn remove(&mut self, key: &str, id: u64) -> bool {
        let Some(entries) = self.entries.get_mut(key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.entries.remove(key);
        }
        removed
    }

    fn contains(&self, key: &str, id: u64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entries| entries.iter().any(|entry| entry.id == id))
    }
}

type SharedTable = Arc<Mutex<ListenerTable>>;

fn lock(table: &Mutex<ListenerTable>) -> std::sync::MutexGuard<'_, ListenerTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deregistration handle returned by [`FeedbackEngine::on`] and [`FeedbackEngine::once`].
///
/// Dropping the handle leaves the listener registered.
#[derive(Clone)]
pub struct FeedbackHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    key: String,
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
    unsubscribe: Mutex<Option<oneshot::Sender<()>>>,
}

impl FeedbackHandle {
    /// Remove the listener and unsubscribe from the device.
    ///
    /// The listener stops firing immediately; the unsubscribe call follows
    /// once the original subscribe call has resolved. Returns `false` if
    /// the listener was already removed.
    pub fn off(&self) -> bool {
        let removed = match self.inner.table.upgrade() {
            Some(table) => lock(&table).remove(&self.inner.key, self.inner.id),
            None => false,
        };

        let unsubscribe = self
            .inner
            .unsubscribe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = unsubscribe {
            let _ = tx.send(());
        }

        removed
    }

    /// True while the listener is registered.
    pub fn is_active(&self) -> bool {
        self.inner
            .table
            .upgrade()
            .is_some_and(|table| lock(&table).contains(&self.inner.key, self.inner.id))
    }

    /// Registration key (lowercase slash-joined path).
    pub fn key(&self) -> &str {
        &self.inner.key
    }
}

impl PartialEq for FeedbackHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for FeedbackHandle {}

impl std::fmt::Debug for FeedbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackHandle")
            .field("key", &self.inner.key)
            .field("id", &self.inner.id)
            .finish()
    }
}

/// Walks payloads and invokes matching listeners. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    table: SharedTable,
}

impl Dispatcher {
    /// Walk a payload, firing every listener whose path it reaches.
    pub fn dispatch(&self, payload: &Value) {
        let mut path = Vec::new();
        self.walk(payload, &mut path, payload);
    }

    fn walk(&self, node: &Value, path: &mut Vec<String>, root: &Value) {
        match node {
            Value::Array(items) => {
                for item in items {
                    self.walk(item, path, root);
                    if let Some(id) = element_id(item) {
                        path.push(id.to_string());
                        self.walk(item, path, root);
                        path.pop();
                    }
                }
            }
            _ => {
                self.emit(&path.join("/"), node, root);
                if let Value::Object(members) = node {
                    for (key, child) in members {
                        path.push(key.to_lowercase());
                        self.walk(child, path, root);
                        path.pop();
                    }
                }
            }
        }
    }

    fn emit(&self, key: &str, node: &Value, root: &Value) {
        let entries = match lock(&self.table).entries.get(key) {
            Some(entries) => entries.clone(),
            None => return,
        };

        // Listeners may register or remove others; each is re-checked before firing.
        for entry in entries {
            let live = match &entry.once {
                Some(handle) => handle.off(),
                None => lock(&self.table).contains(key, entry.id),
            };
            if live {
                (entry.listener)(node, root);
            }
        }
    }
}

/// Owner of every feedback listener of one client.
#[derive(Clone)]
pub struct FeedbackEngine {
    table: SharedTable,
    requester: Arc<dyn Requester>,
    interceptor: Arc<dyn Interceptor>,
    span: tracing::Span,
}

impl FeedbackEngine {
    /// Create an engine issuing subscriptions through `requester`.
    pub fn new(requester: Arc<dyn Requester>) -> Self {
        Self {
            table: Arc::new(Mutex::new(ListenerTable::default())),
            requester,
            interceptor: Arc::new(pass_through),
            span: tracing::debug_span!("feedback"),
        }
    }

    /// Route payloads through an interceptor before dispatch.
    pub fn with_interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptor = Arc::new(interceptor);
        self
    }

    /// Log under the given span.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub(crate) fn set_interceptor(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptor = interceptor;
    }

    /// Register a listener and subscribe to feedback on `path`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn on<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.register(normalize(path), Arc::new(listener), false)
    }

    /// Like [`on`](Self::on), but the listener is removed before its first call.
    pub fn once<F>(&self, path: impl IntoPath, listener: F) -> FeedbackHandle
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.register(normalize(path), Arc::new(listener), true)
    }

    /// Hand a payload to the interceptor.
    pub fn dispatch(&self, payload: Value) {
        self.interceptor.intercept(payload, &self.dispatcher());
    }

    /// A dispatcher bypassing the interceptor.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            table: self.table.clone(),
        }
    }

    /// Collect handles for removal as a unit.
    pub fn group(&self, handles: impl IntoIterator<Item = FeedbackHandle>) -> FeedbackGroup {
        FeedbackGroup::new(handles)
    }

    /// Bulk removal is gone; always fails.
    pub fn off(&self) -> Result<()> {
        Err(XapiError::Deprecated(
            "off() is removed, call off() on the handle returned by on() or once()",
        ))
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.table).entries.values().map(Vec::len).sum()
    }

    fn register(&self, path: NormalizedPath, listener: Arc<Listener>, once: bool) -> FeedbackHandle {
        let key = path.key();
        let unsubscribe = self.subscribe(&path);

        let mut table = lock(&self.table);
        table.next_id += 1;
        let id = table.next_id;

        let handle = FeedbackHandle {
            inner: Arc::new(HandleInner {
                key: key.clone(),
                id,
                table: Arc::downgrade(&self.table),
                unsubscribe: Mutex::new(Some(unsubscribe)),
            }),
        };
        table.entries.entry(key).or_default().push(Entry {
            id,
            listener,
            once: once.then(|| handle.clone()),
        });

        handle
    }

    /// Subscribe in the background; firing the returned sender unsubscribes.
    fn subscribe(&self, path: &NormalizedPath) -> oneshot::Sender<()> {
        let (off_tx, off_rx) = oneshot::channel();
        let requester = self.requester.clone();
        let query = path.query();

        let mut params = Map::new();
        params.insert(QUERY_PARAM.to_string(), path.to_json());

        tokio::spawn(
            async move {
                let id = match requester.request(FEEDBACK_SUBSCRIBE_METHOD, params).await {
                    Ok(result) => result.get(ID_PARAM).cloned(),
                    Err(e) => {
                        tracing::warn!(%query, error = %e, "Feedback subscribe failed");
                        None
                    }
                };

                // Dropped handle: keep the subscription.
                if off_rx.await.is_err() {
                    return;
                }
                let Some(id) = id else {
                    return;
                };

                let mut params = Map::new();
                params.insert(ID_PARAM.to_string(), id);
                if let Err(e) = requester.request(FEEDBACK_UNSUBSCRIBE_METHOD, params).await {
                    tracing::debug!(%query, error = %e, "Feedback unsubscribe failed");
                }
            }
            .instrument(self.span.clone()),
        );

        off_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    type Calls = mpsc::UnboundedReceiver<(String, Map<String, Value>)>;

    /// Records calls; subscribe resolves with `{"Id": 7}` once the gate opens.
    struct FakeRequester {
        calls: mpsc::UnboundedSender<(String, Map<String, Value>)>,
        gate: Option<Arc<Notify>>,
    }

    impl Requester for FakeRequester {
        fn request(&self, method: &str, params: Map<String, Value>) -> BoxFuture<'static, Result<Value>> {
            let _ = self.calls.send((method.to_string(), params));
            let gate = self.gate.clone();
            let subscribe = method == FEEDBACK_SUBSCRIBE_METHOD;
            Box::pin(async move {
                if subscribe {
                    if let Some(gate) = gate {
                        gate.notified().await;
                    }
                    Ok(json!({"Id": 7}))
                } else {
                    Ok(Value::Bool(true))
                }
            })
        }
    }

    fn engine() -> (FeedbackEngine, Calls) {
        let (tx, rx) = mpsc::unbounded_channel();
        let requester = FakeRequester { calls: tx, gate: None };
        (FeedbackEngine::new(Arc::new(requester)), rx)
    }

    fn gated_engine() -> (FeedbackEngine, Calls, Arc<Notify>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Notify::new());
        let requester = FakeRequester {
            calls: tx,
            gate: Some(gate.clone()),
        };
        (FeedbackEngine::new(Arc::new(requester)), rx, gate)
    }

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value, &Value) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |node: &Value, _root: &Value| {
            sink.lock().unwrap().push(node.clone())
        })
    }

    #[tokio::test]
    async fn test_on_subscribes_with_query() {
        let (engine, mut calls) = engine();
        engine.on("status audio volume", |_, _| {});

        let (method, params) = calls.recv().await.unwrap();
        assert_eq!(method, FEEDBACK_SUBSCRIBE_METHOD);
        assert_eq!(params["Query"], json!(["Status", "Audio", "Volume"]));
    }

    #[tokio::test]
    async fn test_dispatch_array_matches_indexed_and_unindexed() {
        let (engine, _calls) = engine();
        let (plain, l1) = recorder();
        let (wildcard, l2) = recorder();
        let (by_id, l3) = recorder();
        let (bracket, l4) = recorder();
        let (other, l5) = recorder();

        engine.on("Status/Call/Status", l1);
        engine.on("Status/Call[]/Status", l2);
        engine.on("Status/Call/42/Status", l3);
        engine.on("Status/Call[42]/Status", l4);
        engine.on("Status/Call[43]/Status", l5);

        engine.dispatch(json!({"Status": {"Call": [{"id": 42, "Status": "Connected"}]}}));

        for seen in [&plain, &wildcard, &by_id, &bracket] {
            assert_eq!(*seen.lock().unwrap(), vec![json!("Connected")]);
        }
        assert!(other.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listener_receives_root_payload() {
        let (engine, _calls) = engine();
        let roots = Arc::new(Mutex::new(Vec::new()));
        let sink = roots.clone();
        engine.on("Status Audio", move |_node: &Value, root: &Value| {
            sink.lock().unwrap().push(root.clone())
        });

        let payload = json!({"Status": {"Audio": {"Volume": "50"}}});
        engine.dispatch(payload.clone());
        assert_eq!(*roots.lock().unwrap(), vec![payload]);
    }

    #[tokio::test]
    async fn test_lowercase_keys_are_walked() {
        let (engine, _calls) = engine();
        let (seen, listener) = recorder();
        engine.on("Status Call id", listener);

        engine.dispatch(json!({"Status": {"Call": [{"id": "42", "Status": "Idle"}]}}));
        assert_eq!(*seen.lock().unwrap(), vec![json!("42")]);
    }

    #[tokio::test]
    async fn test_off_removes_only_that_registration() {
        let (engine, _calls) = engine();
        let count = Arc::new(AtomicUsize::new(0));
        let listener = {
            let count = count.clone();
            move |_: &Value, _: &Value| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };

        let first = engine.on("Status Audio Volume", listener.clone());
        let _second = engine.on("Status Audio Volume", listener);
        assert_eq!(engine.listener_count(), 2);

        assert!(first.off());
        assert!(!first.off());
        assert!(!first.is_active());

        engine.dispatch(json!({"Status": {"Audio": {"Volume": "10"}}}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_fires_once() {
        let (engine, _calls) = engine();
        let (seen, listener) = recorder();
        let handle = engine.once("Status Standby State", listener);

        engine.dispatch(json!({"Status": {"Standby": {"State": "Standby"}}}));
        engine.dispatch(json!({"Status": {"Standby": {"State": "Off"}}}));

        assert_eq!(*seen.lock().unwrap(), vec![json!("Standby")]);
        assert!(!handle.is_active());
        assert_eq!(engine.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_off_unsubscribes_with_resolved_id() {
        let (engine, mut calls) = engine();
        let handle = engine.on("Status Audio Volume", |_, _| {});
        assert_eq!(calls.recv().await.unwrap().0, FEEDBACK_SUBSCRIBE_METHOD);

        handle.off();
        let (method, params) = calls.recv().await.unwrap();
        assert_eq!(method, FEEDBACK_UNSUBSCRIBE_METHOD);
        assert_eq!(params["Id"], json!(7));
    }

    #[tokio::test]
    async fn test_unsubscribe_deferred_until_subscribe_resolves() {
        let (engine, mut calls, gate) = gated_engine();
        let (seen, listener) = recorder();
        let handle = engine.on("Status Audio Volume", listener);
        assert_eq!(calls.recv().await.unwrap().0, FEEDBACK_SUBSCRIBE_METHOD);

        handle.off();
        engine.dispatch(json!({"Status": {"Audio": {"Volume": "10"}}}));
        assert!(seen.lock().unwrap().is_empty());

        let early = tokio::time::timeout(Duration::from_millis(20), calls.recv()).await;
        assert!(early.is_err());

        gate.notify_one();
        let (method, params) = calls.recv().await.unwrap();
        assert_eq!(method, FEEDBACK_UNSUBSCRIBE_METHOD);
        assert_eq!(params["Id"], json!(7));
    }

    #[tokio::test]
    async fn test_interceptor_controls_dispatch() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let requester = FakeRequester { calls: tx, gate: None };
        let engine = FeedbackEngine::new(Arc::new(requester)).with_interceptor(
            |payload: Value, dispatcher: &Dispatcher| {
                if payload.get("Status").is_some() {
                    dispatcher.dispatch(&payload);
                }
            },
        );
        let (seen, listener) = recorder();
        engine.on("Status Audio Volume", listener);

        engine.dispatch(json!({"Event": {"Status": {"Audio": {"Volume": "1"}}}}));
        engine.dispatch(json!({"Status": {"Audio": {"Volume": "2"}}}));
        assert_eq!(*seen.lock().unwrap(), vec![json!("2")]);
    }

    #[tokio::test]
    async fn test_legacy_off_is_error() {
        let (engine, _calls) = engine();
        assert!(matches!(engine.off(), Err(XapiError::Deprecated(_))));
    }
}
