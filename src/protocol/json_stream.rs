//! Incremental parser for back-to-back JSON documents.
//!
//! The device writes JSON documents one after another with no delimiter.
//! Reads can split a document anywhere (even mid-token) or carry several
//! documents at once. [`JsonStream`] scans bytes as they arrive, tracks
//! nesting and string state, and hands each complete top-level value to
//! `serde_json`.
//!
//! # Example
//!
//! ```
//! use xapi_client::protocol::JsonStream;
//!
//! let mut stream = JsonStream::new();
//!
//! assert!(stream.push(br#"{"a""#).is_empty());
//! let docs = stream.push(br#":1}{"b":2}"#);
//! assert_eq!(docs.len(), 2);
//! assert_eq!(docs[0].as_ref().unwrap()["a"], 1);
//! ```

use bytes::BytesMut;
use serde_json::Value;

use crate::error::{Result, XapiError};

/// Default limit for a single buffered document: 64MB.
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 64 * 1024 * 1024;

/// Scanner position relative to the current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between documents, skipping whitespace.
    Idle,
    /// Inside an object or array.
    Nested,
    /// Inside a top-level string.
    Text,
    /// Inside a top-level number or keyword; ends at the next delimiter.
    Literal,
    /// Discarding the rest of a rejected document until its nesting closes.
    Skip,
}

/// Streaming splitter/parser for concatenated JSON values.
pub struct JsonStream {
    /// Bytes of the document being accumulated.
    buffer: BytesMut,
    /// Open brackets of the current document.
    stack: Vec<u8>,
    state: State,
    in_string: bool,
    escaped: bool,
    max_document_size: usize,
}

impl JsonStream {
    /// Create a parser with the default document size limit.
    pub fn new() -> Self {
        Self::with_max_document_size(DEFAULT_MAX_DOCUMENT_SIZE)
    }

    /// Create a parser with a custom document size limit.
    pub fn with_max_document_size(max_document_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            stack: Vec::new(),
            state: State::Idle,
            in_string: false,
            escaped: false,
            max_document_size,
        }
    }

    /// Feed a chunk and collect every document it completes.
    ///
    /// Each entry is either a parsed value or the parse error for one
    /// malformed document. A rejected document is skipped up to its closing
    /// bracket without producing anything else, so later documents are
    /// unaffected.
    pub fn push(&mut self, data: &[u8]) -> Vec<Result<Value>> {
        let mut out = Vec::new();
        for &byte in data {
            self.step(byte, &mut out);
            if self.buffer.len() > self.max_document_size {
                out.push(Err(XapiError::Protocol(format!(
                    "Document exceeds maximum size of {} bytes",
                    self.max_document_size
                ))));
                self.skip_rest();
            }
        }
        out
    }

    /// Signal end of input.
    ///
    /// A pending bare literal (`42`, `true`) is completed. An unterminated
    /// object, array or string is an [`XapiError::UnexpectedEof`].
    pub fn finish(&mut self) -> Result<Option<Value>> {
        match self.state {
            State::Idle => Ok(None),
            State::Skip => {
                self.reset();
                Ok(None)
            }
            State::Literal => self.complete().map(Some),
            State::Nested | State::Text => {
                self.reset();
                Err(XapiError::UnexpectedEof)
            }
        }
    }

    /// True when no partial document is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Number of buffered bytes of the current partial document.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any partial document.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.stack.clear();
        self.state = State::Idle;
        self.in_string = false;
        self.escaped = false;
    }

    fn step(&mut self, byte: u8, out: &mut Vec<Result<Value>>) {
        match self.state {
            State::Idle => self.start(byte, out),
            State::Nested => self.nested(byte, out),
            State::Text => {
                self.buffer.extend_from_slice(&[byte]);
                if self.string_ends(byte) {
                    out.push(self.complete());
                }
            }
            State::Literal => {
                if is_delimiter(byte) {
                    out.push(self.complete());
                    self.start(byte, out);
                } else {
                    self.buffer.extend_from_slice(&[byte]);
                }
            }
            State::Skip => self.skip(byte, out),
        }
    }

    /// Abandon the current document but keep its string and nesting state,
    /// so the remainder is recognized and dropped.
    fn skip_rest(&mut self) {
        if self.state == State::Text {
            self.in_string = true;
        }
        self.buffer.clear();
        self.state = State::Skip;
    }

    fn skip(&mut self, byte: u8, out: &mut Vec<Result<Value>>) {
        if self.in_string {
            if self.string_ends(byte) {
                self.in_string = false;
                if self.stack.is_empty() {
                    self.state = State::Idle;
                }
            }
            return;
        }

        // Rejected top-level literal: it ends at the next delimiter.
        if self.stack.is_empty() {
            if is_delimiter(byte) {
                self.state = State::Idle;
                self.start(byte, out);
            }
            return;
        }

        match byte {
            b'"' => {
                self.in_string = true;
                self.escaped = false;
            }
            b'{' | b'[' => self.stack.push(byte),
            b'}' | b']' => {
                self.stack.pop();
                if self.stack.is_empty() {
                    self.state = State::Idle;
                }
            }
            _ => {}
        }
    }

    fn start(&mut self, byte: u8, out: &mut Vec<Result<Value>>) {
        match byte {
            b' ' | b'\t' | b'\r' | b'\n' => {}
            b'{' | b'[' => {
                self.buffer.extend_from_slice(&[byte]);
                self.stack.push(byte);
                self.state = State::Nested;
            }
            b'"' => {
                self.buffer.extend_from_slice(&[byte]);
                self.escaped = false;
                self.state = State::Text;
            }
            b'}' | b']' | b',' | b':' => {
                out.push(Err(XapiError::Protocol(format!(
                    "Unexpected '{}' between documents",
                    byte as char
                ))));
            }
            _ => {
                self.buffer.extend_from_slice(&[byte]);
                self.state = State::Literal;
            }
        }
    }

    fn nested(&mut self, byte: u8, out: &mut Vec<Result<Value>>) {
        self.buffer.extend_from_slice(&[byte]);

        if self.in_string {
            if self.string_ends(byte) {
                self.in_string = false;
            }
            return;
        }

        match byte {
            b'"' => {
                self.in_string = true;
                self.escaped = false;
            }
            b'{' | b'[' => self.stack.push(byte),
            b'}' | b']' => {
                let expected = if byte == b'}' { b'{' } else { b'[' };
                if self.stack.pop() != Some(expected) {
                    out.push(Err(XapiError::Protocol(format!(
                        "Mismatched '{}' in document",
                        byte as char
                    ))));
                    if self.stack.is_empty() {
                        self.reset();
                    } else {
                        self.skip_rest();
                    }
                    return;
                }
                if self.stack.is_empty() {
                    out.push(self.complete());
                }
            }
            _ => {}
        }
    }

    /// Track escapes inside a string; true on the closing quote.
    fn string_ends(&mut self, byte: u8) -> bool {
        if self.escaped {
            self.escaped = false;
            false
        } else if byte == b'\\' {
            self.escaped = true;
            false
        } else {
            byte == b'"'
        }
    }

    fn complete(&mut self) -> Result<Value> {
        let document = self.buffer.split().freeze();
        self.reset();
        Ok(serde_json::from_slice(&document)?)
    }
}

impl Default for JsonStream {
    fn default() -> Self {
        Self::new()
    }
}

fn is_delimiter(byte: u8) -> bool {
    matches!(
        byte,
        b' ' | b'\t' | b'\r' | b'\n' | b'{' | b'[' | b'}' | b']' | b'"' | b',' | b':'
    )
}
