//! # xapi-client
//!
//! Client-side protocol engine for the XAPI device-control API.
//!
//! A device exposes a tree of Commands, Configuration, Status and Events.
//! This crate talks to it through one request/response/event contract,
//! whatever the transport underneath.
//!
//! ## Architecture
//!
//! - **Facade** ([`Client`]): request ids, reply correlation, feedback routing
//! - **Backends** ([`backend`]): [`ShellBackend`] for the line-oriented shell
//!   protocol over any byte stream, [`EnvelopeBackend`] for JSON envelopes
//!   over a message channel
//! - **Feedback** ([`feedback`]): path-keyed listeners over pushed payloads
//!
//! Authentication and session setup (SSH, process spawning, WebSocket
//! upgrade) happen before a stream or channel is handed to a backend.
//!
//! ## Example
//!
//! ```ignore
//! use xapi_client::{Client, ShellBackend};
//!
//! #[tokio::main]
//! async fn main() -> xapi_client::Result<()> {
//!     let stream = tokio::net::TcpStream::connect("codec.local:4000").await?;
//!     let client = Client::new(ShellBackend::new(stream))?;
//!
//!     let _calls = client.status().on("Call Status", |status, _| {
//!         println!("call status: {status}");
//!     });
//!
//!     client.command("Dial", None, None).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod codec;
pub mod component;
pub mod error;
pub mod feedback;
pub mod handler;
pub mod path;
pub mod protocol;
pub mod shell;

mod client;

pub use backend::{Backend, BackendEvent, EnvelopeBackend};
pub use client::{Client, ClientBuilder, ListenerHandle, PendingCall};
pub use component::{Config, Event, Status};
pub use error::{ErrorCode, Result, RpcError, XapiError};
pub use feedback::{FeedbackEngine, FeedbackGroup, FeedbackHandle};
pub use path::{normalize, NormalizedPath, Segment};
pub use shell::{ShellBackend, ShellConfig};
