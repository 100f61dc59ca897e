//! [`Backend`] over a raw duplex byte stream speaking the shell protocol.
//!
//! Three kinds of tasks share one connection:
//!
//! ```text
//!            ┌──────────── read loop ◄──────────── transport (read half)
//!            │  ShellSession: handshake, documents
//!            ▼
//!   replies[id] ──► handler task ──► writer task ──► transport (write half)
//!   feedback    ──► EventSink
//! ```
//!
//! Each `execute` spawns a handler task that waits for the handshake, renders
//! the request as a command line and awaits the reply document carrying its
//! `ResultId`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::command::{
    command_line, frame_command, get_line, set_line, subscribe_line, unsubscribe_line,
};
use super::session::{SessionEvent, ShellSession};
use super::writer::{spawn_writer_task, WriterHandle};
use super::{ConnectionState, ShellConfig};
use crate::backend::{respond, Backend, BackendEvent, EventSink};
use crate::codec::{
    build_error_response, build_feedback_event, classify_command_result, collapse,
    extract_get_value, extract_set_outcome, path_param, COMMAND_RESPONSE_KEY,
};
use crate::error::{Result, RpcError, XapiError};
use crate::handler::{BoxFuture, HandlerRegistry, HandlerResult};
use crate::protocol::{
    Request, COMMAND_PREFIX, FEEDBACK_SUBSCRIBE_METHOD, FEEDBACK_UNSUBSCRIBE_METHOD, GET_METHOD,
    ID_PARAM, PATH_PARAM, QUERY_PARAM, SET_METHOD, VALUE_PARAM,
};

type Replies = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// Feedback queries registered with the device, by subscription id.
#[derive(Default)]
struct FeedbackQueries {
    next_id: u64,
    queries: HashMap<u64, String>,
}

/// Transmit side handed to shell handlers, bound to one request id.
#[derive(Clone)]
pub struct ShellSender {
    id: String,
    writer: WriterHandle,
    replies: Replies,
    queries: Arc<Mutex<FeedbackQueries>>,
}

impl ShellSender {
    /// Correlation id of the request being handled.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send a command line (plus optional body) and wait for its reply document.
    ///
    /// Fails with `ConnectionClosed` without queueing anything once the
    /// writer task has stopped.
    pub async fn send(&self, command: &str, body: Option<&str>) -> Result<Value> {
        if self.writer.is_closed() {
            return Err(XapiError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.id.clone(), tx);

        let framed = frame_command(command, &self.id, body);
        if let Err(e) = self.writer.send(Bytes::from(framed)).await {
            self.replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
            return Err(e);
        }

        rx.await.map_err(|_| XapiError::ConnectionClosed)
    }

    fn register_query(&self, query: String) -> u64 {
        let mut feedback = self.queries.lock().unwrap_or_else(PoisonError::into_inner);
        feedback.next_id += 1;
        let id = feedback.next_id;
        feedback.queries.insert(id, query);
        id
    }

    fn take_query(&self, id: u64) -> Option<String> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queries
            .remove(&id)
    }
}

async fn handle_command(request: Request, send: ShellSender) -> HandlerResult {
    let line = command_line(&request)?;
    let reply = send.send(&line, request.body()).await?;
    let node = classify_command_result(&reply)?;
    Ok(collapse(&node))
}

async fn handle_get(request: Request, send: ShellSender) -> HandlerResult {
    let path = path_param(&request, PATH_PARAM)?;
    let reply = send.send(&get_line(&path), None).await?;
    Ok(extract_get_value(&request, &reply)?.unwrap_or(Value::Null))
}

async fn handle_set(request: Request, send: ShellSender) -> HandlerResult {
    let path = path_param(&request, PATH_PARAM)?;
    let value = request
        .param(VALUE_PARAM)
        .ok_or_else(|| XapiError::Rpc(RpcError::parameter()))?;
    let line = set_line(&path, value)?;

    let reply = send.send(&line, None).await?;
    extract_set_outcome(&request, &reply)?;
    Ok(Value::Null)
}

async fn handle_subscribe(request: Request, send: ShellSender) -> HandlerResult {
    let query = path_param(&request, QUERY_PARAM)?.query();
    let reply = send.send(&subscribe_line(&query), None).await?;
    if reply.get(COMMAND_RESPONSE_KEY).is_some() {
        classify_command_result(&reply)?;
    }

    let id = send.register_query(query);
    let mut result = Map::new();
    result.insert(ID_PARAM.to_string(), Value::from(id));
    Ok(Value::Object(result))
}

async fn handle_unsubscribe(request: Request, send: ShellSender) -> HandlerResult {
    let id = request
        .param(ID_PARAM)
        .and_then(Value::as_u64)
        .ok_or_else(|| XapiError::Rpc(RpcError::parameter()))?;
    let query = send.take_query(id).ok_or_else(|| {
        XapiError::InvalidValue(format!("Unknown feedback subscription id: {id}"))
    })?;

    send.send(&unsubscribe_line(&query), None).await?;
    Ok(Value::Bool(true))
}

fn shell_handlers() -> HandlerRegistry<ShellSender> {
    let mut registry = HandlerRegistry::new();
    registry.register(COMMAND_PREFIX, handle_command);
    registry.register(GET_METHOD, handle_get);
    registry.register(SET_METHOD, handle_set);
    registry.register(FEEDBACK_SUBSCRIBE_METHOD, handle_subscribe);
    registry.register(FEEDBACK_UNSUBSCRIBE_METHOD, handle_unsubscribe);
    registry
}

/// State shared between the backend handle, the read loop and handler tasks.
struct Inner {
    registry: HandlerRegistry<ShellSender>,
    writer: WriterHandle,
    replies: Replies,
    queries: Arc<Mutex<FeedbackQueries>>,
    state: watch::Sender<ConnectionState>,
    sink: EventSink,
    span: tracing::Span,
}

impl Inner {
    fn sender(&self, id: String) -> ShellSender {
        ShellSender {
            id,
            writer: self.writer.clone(),
            replies: self.replies.clone(),
            queries: self.queries.clone(),
        }
    }

    /// Publish a state change. `Closed` is never left.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next || *state == ConnectionState::Closed {
                return false;
            }
            *state = next;
            true
        });
    }

    fn wait_ready(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let mut state = self.state.subscribe();
        async move {
            let ready = state
                .wait_for(|s| matches!(s, ConnectionState::Ready | ConnectionState::Closed))
                .await
                .map(|s| *s == ConnectionState::Ready)
                .unwrap_or(false);
            if ready {
                Ok(())
            } else {
                Err(XapiError::ConnectionClosed)
            }
        }
    }

    async fn handle(&self, event: SessionEvent) {
        match event {
            SessionEvent::Write(line) => {
                if let Err(e) = self.writer.send(Bytes::from(line)).await {
                    self.sink.error(e);
                }
            }
            SessionEvent::Ready => {
                tracing::debug!("Connection ready");
                self.set_state(ConnectionState::Ready);
            }
            SessionEvent::Reply { id, document } => {
                let pending = self
                    .replies
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                match pending {
                    Some(tx) => {
                        let _ = tx.send(document);
                    }
                    None => tracing::warn!(%id, "Reply for unknown request"),
                }
            }
            SessionEvent::Feedback(payload) => self.sink.message(build_feedback_event(payload)),
            SessionEvent::Error(e) => self.sink.error(e),
        }
    }

    /// Enter `closed` and abandon every outstanding reply.
    fn shut_down(&self) {
        self.set_state(ConnectionState::Closed);
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Backend speaking the shell protocol over a duplex byte stream.
///
/// # Example
///
/// ```ignore
/// let stream = tokio::net::TcpStream::connect("codec.local:4000").await?;
/// let backend = ShellBackend::new(stream);
/// let client = Client::new(backend)?;
/// client.ready().await?;
/// ```
pub struct ShellBackend {
    inner: Arc<Inner>,
    events: Mutex<Option<mpsc::UnboundedReceiver<BackendEvent>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl ShellBackend {
    /// Start a backend on the given stream with default settings.
    ///
    /// Must run inside a tokio runtime.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_config(stream, ShellConfig::default())
    }

    /// Start a backend on the given stream.
    pub fn with_config<S>(stream: S, config: ShellConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, config.writer_config());
        let (sink, events) = EventSink::channel();
        let (state, _) = watch::channel(ConnectionState::Idle);

        let mut session = ShellSession::with_max_document_size(config.max_document_size);
        match session.start() {
            Ok(()) => {
                state.send_replace(session.state());
            }
            Err(e) => sink.error(e),
        }

        let inner = Arc::new(Inner {
            registry: shell_handlers(),
            writer,
            replies: Arc::new(Mutex::new(HashMap::new())),
            queries: Arc::new(Mutex::new(FeedbackQueries::default())),
            state,
            sink,
            span: config.span.clone(),
        });

        let reader = tokio::spawn(
            read_loop(read_half, session, inner.clone(), config.read_buffer)
                .instrument(config.span),
        );

        Self {
            inner,
            events: Mutex::new(Some(events)),
            reader: Mutex::new(Some(reader)),
            writer_task: Mutex::new(Some(writer_task)),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }
}

/// Feed transport data to the session until EOF or a read error.
async fn read_loop<R>(mut reader: R, mut session: ShellSession, inner: Arc<Inner>, buffer_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::error!("Read loop error: {}", e);
                inner.sink.error(e.into());
                break;
            }
        };

        match session.feed(&buf[..n]) {
            Ok(events) => {
                for event in events {
                    inner.handle(event).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discarding inbound data");
                inner.sink.error(e);
            }
        }
        inner.set_state(session.state());
    }

    for event in session.finish() {
        inner.handle(event).await;
    }
    tracing::debug!("Transport closed");
    inner.sink.emit_closed();
    inner.shut_down();
}

impl Backend for ShellBackend {
    fn ready(&self) -> BoxFuture<'static, Result<()>> {
        Box::pin(self.inner.wait_ready())
    }

    fn execute(&self, request: Request) {
        let inner = self.inner.clone();
        let span = inner.span.clone();

        tokio::spawn(
            async move {
                let id = request.id.clone().unwrap_or_default();
                if let Err(e) = inner.wait_ready().await {
                    inner.sink.message(build_error_response(id, e));
                    return;
                }
                let sender = inner.sender(id);
                respond(&inner.registry, request, sender, &inner.sink).await;
            }
            .instrument(span),
        );
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<BackendEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn close(&self) {
        self.inner.sink.close();
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
        if let Some(writer) = self
            .writer_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            writer.abort();
        }
        self.inner.shut_down();
    }
}

impl Drop for ShellBackend {
    fn drop(&mut self) {
        self.close();
    }
}
