//! The boundary between the coordinator and whatever carries the bytes.
//!
//! A transport hands over an already-open duplex stream split in two halves:
//! a [`MessageSource`] that the per-connection reader task drains, and a
//! [`MessageSink`] that replies and broadcasts write to.

use std::{io, sync::Arc};

use async_trait::async_trait;

/// Read side of a connection. Yields one discrete message per call.
#[async_trait]
pub trait MessageSource: Send {
    /// Returns `Ok(None)` once the peer has closed the stream.
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Write side of a connection, shared between the registry and delivery tasks.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, payload: &[u8]) -> io::Result<()>;

    async fn close(&self) -> io::Result<()>;
}

pub struct Connection {
    pub source: Box<dyn MessageSource>,
    pub sink: Arc<dyn MessageSink>,
}

impl Connection {
    pub fn new(source: impl MessageSource + 'static, sink: impl MessageSink + 'static) -> Self {
        Self {
            source: Box::new(source),
            sink: Arc::new(sink),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}
