//! Non-blocking I/O pump shared by the read and write sides.
//!
//! A [`Registration`] is interest in one readiness direction of a socket.
//! It stays live until cancelled; cancellation is cooperative and wakes the
//! owner of the pump so it can run its teardown exactly once.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::transport::socket::Socket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug)]
struct RegistrationInner {
    direction: Direction,
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable handle to an event registration.
#[derive(Debug, Clone)]
pub struct Registration {
    inner: Arc<RegistrationInner>,
}

impl Registration {
    pub fn new(direction: Direction) -> Self {
        Self {
            inner: Arc::new(RegistrationInner {
                direction,
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the registration. Returns `true` only for the call that
    /// actually performed the cancellation.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::AcqRel);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Resolves once the registration is cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// What woke a pump.
#[derive(Debug)]
pub enum PumpEvent {
    Ready,
    Cancelled,
    Failed(io::Error),
}

/// Owns at most one registration for a single direction.
///
/// The read side registers once for its whole life; the write side registers
/// only while it holds unflushed bytes.
#[derive(Debug)]
pub struct IoPump {
    direction: Direction,
    registration: Option<Registration>,
}

impl IoPump {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            registration: None,
        }
    }

    pub fn with_registration(registration: Registration) -> Self {
        Self {
            direction: registration.direction(),
            registration: Some(registration),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the live registration, creating one if needed. The `bool` is
    /// `true` when a new registration was created.
    pub fn register(&mut self) -> (Registration, bool) {
        if let Some(reg) = self.registration.as_ref().filter(|r| !r.is_cancelled()) {
            return (reg.clone(), false);
        }
        let reg = Registration::new(self.direction);
        self.registration = Some(reg.clone());
        (reg, true)
    }

    pub fn is_registered(&self) -> bool {
        self.registration.as_ref().is_some_and(|r| !r.is_cancelled())
    }

    /// Cancels and drops the registration, if any.
    pub fn cancel(&mut self) -> bool {
        self.registration.take().is_some_and(|r| r.cancel())
    }

    /// Waits for the next event. Never resolves while unregistered, which
    /// lets callers keep an idle pump inside a `select!`.
    pub async fn next_event<S: Socket>(&self, socket: &S) -> PumpEvent {
        let Some(reg) = self.registration.as_ref() else {
            return std::future::pending().await;
        };
        tokio::select! {
            biased;
            _ = reg.cancelled() => PumpEvent::Cancelled,
            res = socket.ready(self.direction) => match res {
                Ok(()) => PumpEvent::Ready,
                Err(e) => PumpEvent::Failed(e),
            },
        }
    }
}
