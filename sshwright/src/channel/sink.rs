//! Byte sinks connecting a channel to its consumers and back.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{ChannelError, Result};

/// Receives raw output bytes from a channel's delivery task.
///
/// `close` is called exactly once, after the last `write` and before the
/// channel reports itself closed.
pub trait OutputSink: Send {
    /// Consume a chunk of raw output.
    fn write(&mut self, data: &[u8]);

    /// The stream has ended.
    fn close(&mut self) {}
}

/// Sink that drops everything, installed until a consumer is assigned.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl OutputSink for DiscardSink {
    fn write(&mut self, _data: &[u8]) {}
}

/// Write handle for a channel's standard input.
///
/// Writes are queued synchronously and delivered by the channel's transport
/// task in the order they were made. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct InputSink {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl InputSink {
    /// Create an input sink and the receiving end drained by the transport.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue bytes for the remote process's standard input.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        self.tx
            .send(data.into())
            .map_err(|_| ChannelError::Closed.into())
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
