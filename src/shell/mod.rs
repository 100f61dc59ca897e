//! Shell protocol backend.
//!
//! Speaks the device's line-oriented shell protocol over any duplex byte
//! stream (an SSH channel, a spawned process's stdio, a TCP stream).
//!
//! ```text
//! device ──bytes──► ShellSession ──► JsonStream ──► Reply / Feedback
//!   ▲                  (handshake)
//!   └──── writer task ◄── framed command lines ◄── handlers
//! ```
//!
//! - [`session`](ShellSession) - synchronous handshake state machine and document routing
//! - [`command`] - serialization of requests into command lines and framing
//! - [`ShellBackend`] - the [`Backend`](crate::backend::Backend) built on top

mod backend;
pub mod command;
mod config;
mod session;
mod writer;

pub use backend::{ShellBackend, ShellSender};
pub use config::ShellConfig;
pub use session::{SessionEvent, ShellSession};

use std::fmt;

/// Reply field echoing the correlation id given with `resultId="..."`.
pub const RESULT_ID_FIELD: &str = "ResultId";

/// Sent after the banner's `OK` to stop the device echoing our input.
pub const ECHO_OFF: &str = "echo off";

/// Sent after the second `OK` to switch replies to JSON documents.
pub const OUTPUT_MODE_JSON: &str = "xpreferences outputmode json";

/// Lifecycle of a shell connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Constructed, nothing read yet.
    Idle,
    /// Waiting for the banner's `OK` line.
    Connecting,
    /// Echo disabled, waiting for the second `OK` line.
    Initializing,
    /// Output mode switched; inbound data is JSON documents.
    Ready,
    /// Transport closed.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
