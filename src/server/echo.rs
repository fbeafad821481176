use bytes::Bytes;

use crate::transport::{ConnectionHandle, ConnectionProcessor};

/// Echoes every inbound chunk back as one response.
///
/// A chunk consisting of the line `quit` closes the connection instead.
#[derive(Debug, Default)]
pub struct EchoProcessor {
    handle: Option<ConnectionHandle>,
}

impl EchoProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionProcessor for EchoProcessor {
    fn attach(&mut self, handle: ConnectionHandle) {
        self.handle = Some(handle);
    }

    fn process(&mut self, bytes: &[u8]) -> usize {
        let Some(handle) = &self.handle else {
            return 0;
        };

        // Reading `quit` started an exchange; completing it lets the close
        // go through.
        if bytes.trim_ascii() == b"quit" {
            handle.close_connection();
            handle.response_complete();
            return bytes.len();
        }

        handle.response_beginning();
        handle.write_to_connection(Bytes::copy_from_slice(bytes));
        handle.response_complete();
        bytes.len()
    }

    fn connection_closed(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(peer = %handle.peer(), "echo session finished");
        }
    }
}
