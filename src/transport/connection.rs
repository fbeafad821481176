use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ConnectionConfig;
use crate::transport::buffer::WriteBuffer;
use crate::transport::error::{ErrorClass, classify, log_io_error};
use crate::transport::processor::{ConnectionHandle, ConnectionProcessor, WriterCommand};
use crate::transport::pump::{Direction, IoPump, PumpEvent, Registration};
use crate::transport::socket::Socket;
use crate::transport::state::{ConnectionState, StateSnapshot};

/// Result of asking a connection to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// A response is still being produced; the connection stays open.
    Deferred,
    /// Handed to the writer; the connection closes once pending writes
    /// are flushed.
    Closing,
    /// The connection was torn down by this call.
    Closed,
    AlreadyClosed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared<S: Socket> {
    socket: S,
    peer: Arc<str>,
    config: ConnectionConfig,
    state: ConnectionState,
    processor: Mutex<Option<Box<dyn ConnectionProcessor>>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    read_registration: Mutex<Option<Registration>>,
    write_registration: Mutex<Option<Registration>>,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
    last_activity: Mutex<Instant>,
    pending_write: AtomicUsize,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
}

impl<S: Socket> Shared<S> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    /// Drains everything the socket has buffered. Returns `false` once the
    /// read side is finished.
    fn read_available(&self, scratch: &mut [u8]) -> bool {
        loop {
            if self.is_closed() {
                return false;
            }
            match self.socket.try_read(scratch) {
                Ok(0) => {
                    tracing::debug!(peer = %self.peer, "peer closed the connection");
                    return false;
                }
                Ok(n) => {
                    self.state.set_response_completed(false);
                    self.touch();
                    self.feed(&scratch[..n]);
                }
                Err(e) => match classify(&e) {
                    ErrorClass::WouldBlock => return true,
                    ErrorClass::Interrupted => continue,
                    ErrorClass::PeerReset | ErrorClass::Fatal => {
                        self.read_failed(&e);
                        return false;
                    }
                },
            }
        }
    }

    fn read_failed(&self, error: &io::Error) {
        self.state.mark_error();
        log_io_error(&self.peer, "read", error);
    }

    fn feed(&self, bytes: &[u8]) {
        let mut processor = lock(&self.processor);
        let Some(processor) = processor.as_mut() else {
            return;
        };
        let consumed = processor.process(bytes);
        if consumed != bytes.len() {
            tracing::warn!(
                peer = %self.peer,
                received = bytes.len(),
                consumed,
                "processor consumed a different number of bytes than it received"
            );
        }
    }

    fn request_close(&self) -> CloseOutcome {
        if self.is_closed() {
            return CloseOutcome::AlreadyClosed;
        }
        // Recorded under the state lock, so a concurrent response_complete
        // either sees the request or this call sees the completed response.
        let state = self.state.request_close();
        if state.error_occurred {
            self.close();
            return CloseOutcome::Closed;
        }
        if !state.response_completed {
            tracing::trace!(peer = %self.peer, "close deferred while a response is in progress");
            return CloseOutcome::Deferred;
        }
        if self.writer_tx.send(WriterCommand::Close).is_err() {
            self.close();
            return CloseOutcome::Closed;
        }
        CloseOutcome::Closing
    }

    /// The single teardown path. Runs its body at most once.
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(reg) = lock(&self.read_registration).take() {
            reg.cancel();
        }
        if let Some(reg) = lock(&self.write_registration).take() {
            reg.cancel();
        }
        if let Some(timer) = lock(&self.idle_timer).take() {
            timer.abort();
        }
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
        self.socket.close();

        let processor = lock(&self.processor).take();
        if let Some(mut processor) = processor {
            processor.connection_closed();
        }
        self.closed_tx.send_replace(true);
        tracing::debug!(
            peer = %self.peer,
            error = self.state.error_occurred(),
            "connection closed"
        );
    }
}

impl<S: Socket> Drop for Shared<S> {
    fn drop(&mut self) {
        if *self.closed.get_mut() {
            return;
        }
        self.socket.close();
        let processor = self.processor.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut processor) = processor {
            processor.connection_closed();
        }
    }
}

/// One accepted socket wired to a protocol processor.
///
/// Opening a connection spawns three tasks on the current tokio runtime:
/// the reader, the writer and the idle timer. The writer task is the only
/// place the outbound buffer and the write registration are touched; every
/// processor callback reaches it through a queue.
///
/// Dropping a `Connection` does not close it. The connection lives until
/// the peer leaves, the processor asks to close, an error occurs or the
/// idle timer prunes it.
pub struct Connection<S: Socket> {
    shared: Arc<Shared<S>>,
}

impl<S: Socket> Connection<S> {
    /// Takes ownership of `socket` and starts pumping it into `processor`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<P: ConnectionProcessor>(socket: S, processor: P, config: ConnectionConfig) -> Self {
        let peer: Arc<str> = socket.peer().into();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);

        let mut processor: Box<dyn ConnectionProcessor> = Box::new(processor);
        processor.attach(ConnectionHandle::new(writer_tx.clone(), peer.clone()));

        let read_registration = Registration::new(Direction::Read);
        let shared = Arc::new(Shared {
            socket,
            peer,
            config,
            state: ConnectionState::new(),
            processor: Mutex::new(Some(processor)),
            closed: AtomicBool::new(false),
            closed_tx,
            read_registration: Mutex::new(Some(read_registration.clone())),
            write_registration: Mutex::new(None),
            idle_timer: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            pending_write: AtomicUsize::new(0),
            writer_tx,
        });

        tokio::spawn(Writer::new(shared.clone()).run(writer_rx));
        if !shared.config.idle_timeout().is_zero() {
            *lock(&shared.idle_timer) = Some(tokio::spawn(idle_timer(shared.clone())));
        }

        match shared.socket.set_blocking(false) {
            Ok(()) => {
                tokio::spawn(read_loop(shared.clone(), IoPump::with_registration(read_registration)));
                tracing::debug!(peer = %shared.peer, "connection opened");
            }
            Err(e) => {
                shared.state.mark_error();
                log_io_error(&shared.peer, "configure", &e);
                shared.close();
            }
        }

        Self { shared }
    }

    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    /// `true` while the socket is present and reports itself active.
    pub fn is_open(&self) -> bool {
        !self.shared.is_closed() && self.shared.socket.is_active()
    }

    pub fn state(&self) -> StateSnapshot {
        self.shared.state.snapshot()
    }

    /// The same callbacks the processor received in
    /// [`ConnectionProcessor::attach`].
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.shared.writer_tx.clone(), self.shared.peer.clone())
    }

    /// Closes unless a response is still being produced. Buffered output is
    /// flushed first unless the connection has failed.
    pub fn request_close(&self) -> CloseOutcome {
        self.shared.request_close()
    }

    /// Tears the connection down now, whatever its state. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Bytes accepted from the processor but not yet taken by the socket.
    pub fn pending_write_bytes(&self) -> usize {
        self.shared.pending_write.load(Ordering::Acquire)
    }
}

async fn read_loop<S: Socket>(shared: Arc<Shared<S>>, mut pump: IoPump) {
    let mut scratch = vec![0u8; shared.config.read_chunk_size.max(1)];
    loop {
        match pump.next_event(&shared.socket).await {
            PumpEvent::Ready => {}
            PumpEvent::Cancelled => break,
            PumpEvent::Failed(e) => {
                shared.read_failed(&e);
                break;
            }
        }
        if !shared.read_available(&mut scratch) {
            break;
        }
    }
    pump.cancel();
    shared.state.finish_read();
    tracing::trace!(peer = %shared.peer, "read registration cancelled");
    shared.request_close();
}

async fn idle_timer<S: Socket>(shared: Arc<Shared<S>>) {
    let timeout = shared.config.idle_timeout();
    loop {
        let deadline = *lock(&shared.last_activity) + timeout;
        tokio::time::sleep_until(deadline).await;
        if shared.is_closed() {
            return;
        }
        if *lock(&shared.last_activity) + timeout > Instant::now() {
            continue;
        }
        let pending = shared.pending_write.load(Ordering::Acquire);
        if pending == 0 && shared.state.snapshot().close_eligible() {
            tracing::debug!(peer = %shared.peer, "closing idle connection");
            shared.close();
            return;
        }
        tracing::trace!(
            peer = %shared.peer,
            pending,
            "idle timeout while busy, re-arming"
        );
        shared.touch();
    }
}

/// The writer context: sole owner of the outbound buffer and the write
/// registration.
struct Writer<S: Socket> {
    shared: Arc<Shared<S>>,
    buffer: WriteBuffer,
    pump: IoPump,
    close_when_drained: bool,
}

impl<S: Socket> Writer<S> {
    fn new(shared: Arc<Shared<S>>) -> Self {
        Self {
            shared,
            buffer: WriteBuffer::new(),
            pump: IoPump::new(Direction::Write),
            close_when_drained: false,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(WriterCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                event = self.pump.next_event(&self.shared.socket) => match event {
                    PumpEvent::Ready => self.flush(),
                    PumpEvent::Cancelled => self.unregister(),
                    PumpEvent::Failed(e) => self.fail(e),
                },
            }
            if self.shared.is_closed() {
                break;
            }
            if self.close_when_drained && self.buffer.is_empty() {
                self.shared.close();
                break;
            }
        }

        if !self.buffer.is_empty() {
            tracing::debug!(
                peer = %self.shared.peer,
                bytes = self.buffer.remaining(),
                "discarding unflushed bytes on close"
            );
        }
        self.buffer.reset();
        self.unregister();
        self.publish();
    }

    fn handle(&mut self, command: WriterCommand) {
        match command {
            WriterCommand::Write(data) => self.queue_write(&data),
            WriterCommand::ResponseBeginning => self.shared.state.set_response_completed(false),
            WriterCommand::ResponseComplete => {
                let state = self.shared.state.complete_response();
                self.shared.touch();
                if state.close_after_response() {
                    self.close_when_drained = true;
                }
            }
            WriterCommand::Close => self.close_requested(),
            WriterCommand::Shutdown => {}
        }
    }

    fn close_requested(&mut self) {
        let state = self.shared.state.request_close();
        if state.error_occurred {
            self.shared.close();
        } else if state.response_completed {
            self.close_when_drained = true;
        } else {
            tracing::trace!(peer = %self.shared.peer, "close deferred until the response completes");
        }
    }

    fn queue_write(&mut self, data: &[u8]) {
        if self.shared.is_closed() || !self.shared.socket.is_active() {
            tracing::warn!(
                peer = %self.shared.peer,
                bytes = data.len(),
                "write requested after socket closed"
            );
            self.shared.close();
            return;
        }
        if data.is_empty() {
            return;
        }

        // Anything already buffered must reach the socket first.
        let written = if self.buffer.is_empty() {
            match self.write_now(data) {
                Ok(n) => n,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        } else {
            0
        };
        if written > 0 {
            self.shared.touch();
        }

        if written < data.len() {
            self.buffer.append(&data[written..]);
            self.register();
        }
        self.publish();
    }

    fn write_now(&self, data: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < data.len() {
            match self.shared.socket.try_write(&data[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) => match classify(&e) {
                    ErrorClass::WouldBlock => break,
                    ErrorClass::Interrupted => continue,
                    ErrorClass::PeerReset | ErrorClass::Fatal => return Err(e),
                },
            }
        }
        Ok(written)
    }

    /// Write-ready handler: flushes at most one chunk worth of bytes.
    fn flush(&mut self) {
        if self.buffer.is_empty() {
            self.unregister();
            return;
        }
        if !self.shared.socket.is_active() {
            tracing::warn!(
                peer = %self.shared.peer,
                bytes = self.buffer.remaining(),
                "socket closed with bytes still to be written"
            );
            self.buffer.reset();
            self.unregister();
            self.publish();
            self.shared.close();
            return;
        }

        let mut budget = self.shared.config.write_chunk_size.max(1);
        while budget > 0 && !self.buffer.is_empty() {
            let chunk = self.buffer.drain(budget);
            match self.shared.socket.try_write(chunk) {
                Ok(0) => {
                    self.fail(io::ErrorKind::WriteZero.into());
                    return;
                }
                Ok(n) => {
                    self.buffer.advance(n);
                    budget = budget.saturating_sub(n);
                    self.shared.touch();
                }
                Err(e) => match classify(&e) {
                    ErrorClass::WouldBlock => break,
                    ErrorClass::Interrupted => continue,
                    ErrorClass::PeerReset | ErrorClass::Fatal => {
                        self.fail(e);
                        return;
                    }
                },
            }
        }

        if self.buffer.is_empty() {
            self.buffer.compact();
            self.unregister();
            tracing::trace!(peer = %self.shared.peer, "write buffer drained");
        }
        self.publish();
    }

    fn register(&mut self) {
        let (registration, created) = self.pump.register();
        if created {
            tracing::trace!(
                peer = %self.shared.peer,
                direction = %self.pump.direction(),
                "registered for readiness"
            );
            *lock(&self.shared.write_registration) = Some(registration);
        }
    }

    fn unregister(&mut self) {
        self.pump.cancel();
        lock(&self.shared.write_registration).take();
    }

    fn fail(&mut self, error: io::Error) {
        self.buffer.reset();
        self.unregister();
        self.publish();
        self.shared.state.mark_error();
        log_io_error(&self.shared.peer, "write", &error);
        self.shared.close();
    }

    fn publish(&self) {
        // A registration is held exactly while bytes are buffered. A close
        // from another task may cancel it first.
        let registered = self.pump.is_registered();
        debug_assert!(
            registered != self.buffer.is_empty() || self.shared.is_closed(),
            "write registration out of step with the buffer"
        );
        self.shared
            .pending_write
            .store(self.buffer.remaining(), Ordering::Release);
    }
}
