use std::io;

/// How the transport reacts to an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// No data or capacity right now; wait for the next readiness event.
    WouldBlock,
    /// The call was interrupted; retry immediately.
    Interrupted,
    /// The peer went away. Expected, closes the connection quietly.
    PeerReset,
    /// Anything else. Closes the connection and is logged loudly.
    Fatal,
}

pub fn classify(error: &io::Error) -> ErrorClass {
    match error.kind() {
        io::ErrorKind::WouldBlock => ErrorClass::WouldBlock,
        io::ErrorKind::Interrupted => ErrorClass::Interrupted,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ErrorClass::PeerReset,
        _ => ErrorClass::Fatal,
    }
}

/// Logs a connection-fatal error at a severity matching its class.
pub(crate) fn log_io_error(peer: &str, operation: &'static str, error: &io::Error) {
    match classify(error) {
        ErrorClass::PeerReset => {
            tracing::debug!(peer = %peer, operation, error = %error, "connection reset by peer")
        }
        _ => tracing::error!(peer = %peer, operation, error = %error, "socket operation failed"),
    }
}
