#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sockpump::transport::{ConnectionHandle, ConnectionProcessor, Direction, Socket};
use tokio::sync::Notify;

/// What the next read on a [`MockSocket`] returns.
#[derive(Debug)]
pub enum Inbound {
    Data(Vec<u8>),
    Eof,
    Error(io::ErrorKind),
}

#[derive(Debug)]
struct MockState {
    inbound: VecDeque<Inbound>,
    written: Vec<u8>,
    max_write: usize,
    alternate_would_block: bool,
    block_next_write: bool,
    writes_paused: bool,
    write_error: Option<io::ErrorKind>,
    active: bool,
    blocking: Option<bool>,
}

#[derive(Debug)]
struct MockInner {
    state: Mutex<MockState>,
    readable: Notify,
    writable: Notify,
    closes: AtomicUsize,
}

/// Scripted in-memory socket. Clones share the same state, so a test can
/// keep one clone while the connection owns another.
#[derive(Debug, Clone)]
pub struct MockSocket {
    inner: Arc<MockInner>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                state: Mutex::new(MockState {
                    inbound: VecDeque::new(),
                    written: Vec::new(),
                    max_write: usize::MAX,
                    alternate_would_block: false,
                    block_next_write: false,
                    writes_paused: false,
                    write_error: None,
                    active: true,
                    blocking: None,
                }),
                readable: Notify::new(),
                writable: Notify::new(),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    /// Accepts at most `max` bytes per write call.
    pub fn with_max_write(self, max: usize) -> Self {
        self.inner.state.lock().unwrap().max_write = max;
        self
    }

    /// Every write that accepts bytes is followed by one `WouldBlock`.
    pub fn with_alternating_would_block(self) -> Self {
        self.inner.state.lock().unwrap().alternate_would_block = true;
        self
    }

    pub fn push(&self, inbound: Inbound) {
        self.inner.state.lock().unwrap().inbound.push_back(inbound);
        self.inner.readable.notify_waiters();
    }

    pub fn push_data(&self, data: &[u8]) {
        self.push(Inbound::Data(data.to_vec()));
    }

    pub fn push_eof(&self) {
        self.push(Inbound::Eof);
    }

    pub fn pause_writes(&self) {
        self.inner.state.lock().unwrap().writes_paused = true;
    }

    pub fn resume_writes(&self) {
        self.inner.state.lock().unwrap().writes_paused = false;
        self.inner.writable.notify_waiters();
    }

    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.inner.state.lock().unwrap().write_error = Some(kind);
        self.inner.writable.notify_waiters();
    }

    /// Marks the socket inactive the way a peer-side teardown would,
    /// without going through [`Socket::close`].
    pub fn deactivate(&self) {
        self.inner.state.lock().unwrap().active = false;
        self.inner.writable.notify_waiters();
    }

    pub fn written(&self) -> Vec<u8> {
        self.inner.state.lock().unwrap().written.clone()
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn blocking_mode(&self) -> Option<bool> {
        self.inner.state.lock().unwrap().blocking
    }

    fn read_ready(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        !state.inbound.is_empty() || !state.active
    }

    fn write_ready(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        !state.writes_paused || state.write_error.is_some() || !state.active
    }
}

impl Socket for MockSocket {
    fn peer(&self) -> String {
        "mock:0".to_string()
    }

    fn ready(&self, direction: Direction) -> impl Future<Output = io::Result<()>> + Send + '_ {
        async move {
            let notify = match direction {
                Direction::Read => &self.inner.readable,
                Direction::Write => &self.inner.writable,
            };
            loop {
                let notified = notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                let ready = match direction {
                    Direction::Read => self.read_ready(),
                    Direction::Write => self.write_ready(),
                };
                if ready {
                    return Ok(());
                }
                notified.await;
            }
        }
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.inner.state.lock().unwrap();
        if !state.active {
            return Ok(0);
        }
        match state.inbound.pop_front() {
            Some(Inbound::Data(mut data)) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.inbound.push_front(Inbound::Data(data.split_off(n)));
                }
                Ok(n)
            }
            Some(Inbound::Eof) => {
                state.inbound.push_front(Inbound::Eof);
                Ok(0)
            }
            Some(Inbound::Error(kind)) => Err(kind.into()),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.inner.state.lock().unwrap();
        if !state.active {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if let Some(kind) = state.write_error {
            return Err(kind.into());
        }
        if state.writes_paused || state.block_next_write {
            state.block_next_write = false;
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(state.max_write);
        state.written.extend_from_slice(&buf[..n]);
        state.block_next_write = state.alternate_would_block;
        Ok(n)
    }

    fn close(&self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.state.lock().unwrap().active = false;
        self.inner.readable.notify_waiters();
        self.inner.writable.notify_waiters();
    }

    fn is_active(&self) -> bool {
        self.inner.state.lock().unwrap().active
    }

    fn set_blocking(&self, blocking: bool) -> io::Result<()> {
        self.inner.state.lock().unwrap().blocking = Some(blocking);
        Ok(())
    }
}

/// Observations shared between a test and its [`RecordingProcessor`].
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    received: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicUsize>,
    attached: Arc<Mutex<Option<ConnectionHandle>>>,
}

impl Recorder {
    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.attached.lock().unwrap().clone()
    }
}

/// Records everything the transport hands it and never writes on its own.
#[derive(Debug)]
pub struct RecordingProcessor {
    recorder: Recorder,
    consume_limit: Option<usize>,
}

impl RecordingProcessor {
    pub fn new() -> (Self, Recorder) {
        let recorder = Recorder::default();
        let processor = Self {
            recorder: recorder.clone(),
            consume_limit: None,
        };
        (processor, recorder)
    }

    /// Reports at most `limit` bytes consumed per chunk.
    pub fn consuming_at_most(mut self, limit: usize) -> Self {
        self.consume_limit = Some(limit);
        self
    }
}

impl ConnectionProcessor for RecordingProcessor {
    fn attach(&mut self, handle: ConnectionHandle) {
        *self.recorder.attached.lock().unwrap() = Some(handle);
    }

    fn process(&mut self, bytes: &[u8]) -> usize {
        self.recorder.received.lock().unwrap().extend_from_slice(bytes);
        self.consume_limit.map_or(bytes.len(), |limit| limit.min(bytes.len()))
    }

    fn connection_closed(&mut self) {
        self.recorder.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Fixed pseudo-random payload so ordering bugs show up as mismatches.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
