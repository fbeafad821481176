use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

/// Work items for a connection's writer context.
#[derive(Debug)]
pub(crate) enum WriterCommand {
    Write(Bytes),
    ResponseBeginning,
    ResponseComplete,
    /// Close once every buffered byte has been flushed.
    Close,
    /// Stop immediately; the connection is already closed.
    Shutdown,
}

/// The protocol side of a connection.
///
/// The transport feeds every inbound chunk to [`process`](Self::process) from
/// the reader context and calls [`connection_closed`](Self::connection_closed)
/// exactly once, after teardown.
pub trait ConnectionProcessor: Send + 'static {
    /// Hands the processor its way back into the transport. Called once,
    /// before any data is delivered.
    fn attach(&mut self, _handle: ConnectionHandle) {}

    /// Consumes inbound bytes and returns how many were used. Any remainder
    /// is the processor's to keep.
    fn process(&mut self, bytes: &[u8]) -> usize;

    fn connection_closed(&mut self);
}

/// Callbacks a processor uses to drive its connection.
///
/// Every call is queued onto the writer context and returns immediately, so
/// a handle may be used from inside [`ConnectionProcessor::process`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: UnboundedSender<WriterCommand>,
    peer: Arc<str>,
}

impl ConnectionHandle {
    pub(crate) fn new(tx: UnboundedSender<WriterCommand>, peer: Arc<str>) -> Self {
        Self { tx, peer }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queues bytes for the peer. Returns `false` if the connection is gone.
    pub fn write_to_connection(&self, data: impl Into<Bytes>) -> bool {
        let data = data.into();
        let len = data.len();
        let sent = self.tx.send(WriterCommand::Write(data)).is_ok();
        if !sent {
            tracing::warn!(peer = %self.peer, bytes = len, "write requested after connection closed");
        }
        sent
    }

    /// Asks for the connection to close after pending writes drain. While a
    /// response is in progress the request waits for `response_complete`.
    pub fn close_connection(&self) {
        self.send(WriterCommand::Close);
    }

    pub fn response_beginning(&self) {
        self.send(WriterCommand::ResponseBeginning);
    }

    pub fn response_complete(&self) {
        self.send(WriterCommand::ResponseComplete);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: WriterCommand) {
        if self.tx.send(command).is_err() {
            tracing::trace!(peer = %self.peer, "connection already closed");
        }
    }
}
