use std::future::Future;
use std::io;
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};

use socket2::SockRef;
use tokio::net::TcpStream;

use crate::transport::pump::Direction;

/// A bidirectional, non-blocking byte stream.
///
/// The transport never blocks on a socket: it waits for readiness with
/// [`ready`](Socket::ready) and then performs `try_*` calls until the socket
/// reports [`io::ErrorKind::WouldBlock`].
pub trait Socket: Send + Sync + 'static {
    /// Human readable identity of the remote end, used in logs.
    fn peer(&self) -> String;

    /// Resolves once the socket may be readable or writable.
    ///
    /// Readiness can be spurious; the following `try_*` call may still
    /// return `WouldBlock`.
    fn ready(&self, direction: Direction) -> impl Future<Output = io::Result<()>> + Send + '_;

    /// Reads into `buf`. `Ok(0)` means the peer closed its side.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes from `buf`, returning how many bytes the socket accepted.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Closes the stream. Further reads and writes fail or report EOF.
    fn close(&self);

    /// `false` once the socket has been closed.
    fn is_active(&self) -> bool;

    fn set_blocking(&self, blocking: bool) -> io::Result<()>;
}

/// [`Socket`] over a tokio TCP stream.
#[derive(Debug)]
pub struct TcpSocket {
    stream: TcpStream,
    peer: String,
    active: AtomicBool,
}

impl TcpSocket {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            stream,
            peer,
            active: AtomicBool::new(true),
        }
    }
}

impl Socket for TcpSocket {
    fn peer(&self) -> String {
        self.peer.clone()
    }

    fn ready(&self, direction: Direction) -> impl Future<Output = io::Result<()>> + Send + '_ {
        async move {
            match direction {
                Direction::Read => self.stream.readable().await,
                Direction::Write => self.stream.writable().await,
            }
        }
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }

    fn close(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        // The descriptor itself is released when the stream is dropped.
        if let Err(e) = SockRef::from(&self.stream).shutdown(Shutdown::Both) {
            tracing::trace!(peer = %self.peer, error = %e, "shutdown on close failed");
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_blocking(&self, blocking: bool) -> io::Result<()> {
        if blocking {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tokio sockets must stay in non-blocking mode",
            ));
        }
        SockRef::from(&self.stream).set_nonblocking(true)
    }
}
