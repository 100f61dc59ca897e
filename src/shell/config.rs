//! Shell backend configuration.

use crate::protocol::DEFAULT_MAX_DOCUMENT_SIZE;

use super::writer::{WriterConfig, DEFAULT_CHANNEL_CAPACITY};

/// Default size of the transport read buffer: 64KB.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Settings for a [`ShellBackend`](super::ShellBackend).
///
/// ```
/// use xapi_client::shell::ShellConfig;
///
/// let config = ShellConfig::default()
///     .read_buffer_size(16 * 1024)
///     .span(tracing::info_span!("codec", host = "room-1"));
/// assert_eq!(config.read_buffer, 16 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Bytes read from the transport per call.
    pub read_buffer: usize,
    /// Capacity of the outbound command queue.
    pub channel_capacity: usize,
    /// Largest single document the parser buffers before giving up on it.
    pub max_document_size: usize,
    /// Span the backend's tasks log under.
    pub span: tracing::Span,
}

impl ShellConfig {
    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer = size.max(1);
        self
    }

    /// Set the outbound queue capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the document size limit.
    pub fn max_document_size(mut self, size: usize) -> Self {
        self.max_document_size = size;
        self
    }

    /// Log under the given span.
    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub(crate) fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            channel_capacity: self.channel_capacity,
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            read_buffer: DEFAULT_READ_BUFFER_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            span: tracing::debug_span!("shell_backend"),
        }
    }
}
