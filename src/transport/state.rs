use std::sync::{Mutex, MutexGuard, PoisonError};

/// Point-in-time copy of the connection flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    /// `false` while a request/response exchange is in flight.
    pub response_completed: bool,
    /// Set once the socket failed; never cleared.
    pub error_occurred: bool,
    /// The read side hit EOF or an error and will not deliver more data.
    pub read_finished: bool,
    /// A close was asked for while a response was in progress.
    pub close_requested: bool,
}

impl StateSnapshot {
    /// Whether the close policy allows tearing the connection down now.
    pub fn close_eligible(&self) -> bool {
        self.response_completed || self.error_occurred
    }

    /// Whether a completed response should be followed by a close.
    pub fn close_after_response(&self) -> bool {
        self.read_finished || self.close_requested
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            response_completed: true,
            error_occurred: false,
            read_finished: false,
            close_requested: false,
        }
    }
}

/// Connection health shared by the reader and writer contexts.
///
/// All flags live behind one mutex, so each transition and the snapshot it
/// returns are observed atomically by the other context. The lock is only
/// held for the flag access itself, never across I/O.
#[derive(Debug, Default)]
pub struct ConnectionState {
    inner: Mutex<StateSnapshot>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StateSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_response_completed(&self, value: bool) {
        self.lock().response_completed = value;
    }

    /// Marks the response complete and returns the resulting state.
    pub fn complete_response(&self) -> StateSnapshot {
        let mut state = self.lock();
        state.response_completed = true;
        *state
    }

    pub fn error_occurred(&self) -> bool {
        self.lock().error_occurred
    }

    /// Records a socket failure. Returns `true` if this call set the flag.
    pub fn mark_error(&self) -> bool {
        let mut state = self.lock();
        let first = !state.error_occurred;
        state.error_occurred = true;
        first
    }

    /// Records that no more inbound data will arrive and returns the
    /// resulting state.
    pub fn finish_read(&self) -> StateSnapshot {
        let mut state = self.lock();
        state.read_finished = true;
        *state
    }

    /// Remembers a close request and returns the resulting state. The
    /// request stays pending until the response completes.
    pub fn request_close(&self) -> StateSnapshot {
        let mut state = self.lock();
        state.close_requested = true;
        *state
    }

    pub fn snapshot(&self) -> StateSnapshot {
        *self.lock()
    }
}
