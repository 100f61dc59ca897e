//! Connection handshake and inbound routing for the shell protocol.
//!
//! [`ShellSession`] is a plain state machine with no I/O: the backend feeds
//! it every chunk read from the transport and acts on the returned
//! [`SessionEvent`]s (writes to send, readiness, replies, feedback).
//!
//! ```text
//! idle ─start─► connecting ─"OK"─► initializing ─"OK"─► ready
//!   │               │                    │                │
//!   └───────────────┴──────── EOF ───────┴────────────────┴──► closed
//! ```

use bytes::{Buf, BytesMut};
use serde_json::Value;

use super::{ConnectionState, ECHO_OFF, OUTPUT_MODE_JSON, RESULT_ID_FIELD};
use crate::codec::parse_feedback_payload;
use crate::error::{Result, XapiError};
use crate::protocol::{JsonStream, DEFAULT_MAX_DOCUMENT_SIZE};

/// Handshake marker line.
const OK_LINE: &str = "OK";

/// Outcome of feeding inbound data to a session.
#[derive(Debug)]
pub enum SessionEvent {
    /// A handshake line to send to the device.
    Write(String),
    /// The handshake completed; requests may be sent.
    Ready,
    /// A document answering the request with this correlation id.
    Reply { id: String, document: Value },
    /// A collapsed document with no correlation id.
    Feedback(Value),
    /// A malformed document. The stream continues with the next one.
    Error(XapiError),
}

/// Handshake state machine and document router for one connection.
pub struct ShellSession {
    state: ConnectionState,
    /// Unconsumed handshake text; holds at most one partial line between feeds.
    lines: BytesMut,
    documents: JsonStream,
    /// Limit for a single handshake line and for a single document.
    max_size: usize,
}

impl ShellSession {
    /// Create a session in the `idle` state.
    pub fn new() -> Self {
        Self::with_max_document_size(DEFAULT_MAX_DOCUMENT_SIZE)
    }

    /// Create a session with a custom document size limit.
    pub fn with_max_document_size(max_document_size: usize) -> Self {
        Self {
            state: ConnectionState::Idle,
            lines: BytesMut::new(),
            documents: JsonStream::with_max_document_size(max_document_size),
            max_size: max_document_size,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Begin waiting for the banner. Only valid from `idle`.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ConnectionState::Idle {
            return Err(XapiError::InvalidState(self.state));
        }
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Process a chunk of inbound data.
    ///
    /// Fails without consuming anything if the session is `idle` or `closed`.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<SessionEvent>> {
        let mut events = Vec::new();

        match self.state {
            ConnectionState::Idle | ConnectionState::Closed => {
                return Err(XapiError::InvalidState(self.state));
            }
            ConnectionState::Connecting | ConnectionState::Initializing => {
                self.lines.extend_from_slice(data);
                self.advance_handshake(&mut events);
                if self.lines.len() > self.max_size {
                    tracing::warn!(len = self.lines.len(), "Discarding oversized handshake line");
                    events.push(SessionEvent::Error(XapiError::Protocol(format!(
                        "Handshake line exceeds maximum size of {} bytes",
                        self.max_size
                    ))));
                    self.lines.clear();
                }
            }
            ConnectionState::Ready => self.route(data, &mut events),
        }

        Ok(events)
    }

    /// Handle end of input. The session is `closed` afterwards.
    ///
    /// A document cut off by the end of input is reported as an error.
    pub fn finish(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.state == ConnectionState::Ready {
            match self.documents.finish() {
                Ok(Some(document)) => events.push(classify(document)),
                Ok(None) => {}
                Err(e) => events.push(SessionEvent::Error(e)),
            }
        }
        self.close();
        events
    }

    /// Move to `closed`, dropping buffered input.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.lines.clear();
        self.documents.reset();
    }

    fn advance_handshake(&mut self, events: &mut Vec<SessionEvent>) {
        while self.state != ConnectionState::Ready && self.take_ok_line() {
            match self.state {
                ConnectionState::Connecting => {
                    tracing::debug!("Banner received, disabling echo");
                    events.push(SessionEvent::Write(format!("{ECHO_OFF}\n")));
                    self.state = ConnectionState::Initializing;
                }
                ConnectionState::Initializing => {
                    tracing::debug!("Echo disabled, switching output mode");
                    events.push(SessionEvent::Write(format!("{OUTPUT_MODE_JSON}\n")));
                    events.push(SessionEvent::Ready);
                    self.state = ConnectionState::Ready;
                    self.lines.clear();
                }
                _ => break,
            }
        }
    }

    /// Consume complete lines up to and including the first `OK` line.
    ///
    /// Without an `OK` line every complete line is dropped and the trailing
    /// partial line is kept for the next feed.
    fn take_ok_line(&mut self) -> bool {
        let mut consumed = 0;
        while let Some(pos) = self.lines[consumed..].iter().position(|&b| b == b'\n') {
            let line = &self.lines[consumed..consumed + pos];
            consumed += pos + 1;
            if is_ok_line(line) {
                self.lines.advance(consumed);
                return true;
            }
        }
        self.lines.advance(consumed);
        false
    }

    fn route(&mut self, data: &[u8], events: &mut Vec<SessionEvent>) {
        for parsed in self.documents.push(data) {
            match parsed {
                Ok(document) => events.push(classify(document)),
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed document from device");
                    events.push(SessionEvent::Error(e));
                }
            }
        }
    }
}

impl Default for ShellSession {
    fn default() -> Self {
        Self::new()
    }
}

fn is_ok_line(line: &[u8]) -> bool {
    std::str::from_utf8(line).is_ok_and(|text| text.trim() == OK_LINE)
}

/// Documents carrying a correlation id are replies, everything else is feedback.
fn classify(document: Value) -> SessionEvent {
    let id = match document.get(RESULT_ID_FIELD) {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };

    match id {
        Some(id) => SessionEvent::Reply { id, document },
        None => SessionEvent::Feedback(parse_feedback_payload(&document)),
    }
}
