//! Per-connection socket transport.
//!
//! This module sits between a non-blocking byte-stream socket and a protocol
//! processor. It owns the socket, pumps inbound bytes into the processor,
//! buffers and flushes outbound bytes, and decides when the connection may be
//! torn down.
//!
//! # Architecture
//!
//! - **`socket`**: the [`Socket`] primitive and its TCP implementation
//! - **`pump`**: direction-parametrized readiness registrations
//! - **`buffer`**: the outbound [`WriteBuffer`]
//! - **`state`**: the flags shared by the reader and writer, behind one lock
//! - **`processor`**: the [`ConnectionProcessor`] contract and the
//!   [`ConnectionHandle`] callbacks handed to it
//! - **`connection`**: the [`Connection`] façade, its reader and writer
//!   contexts, the idle timer and the close path
//! - **`error`**: classification of I/O errors
//!
//! # Data flow
//!
//! ```text
//!   socket readable ──► reader task ──► processor.process(bytes)
//!                                            │
//!                                            │ handle.write_to_connection()
//!                                            ▼
//!                                      writer queue ──► writer task ──► socket
//!                                            ▲              │ WouldBlock
//!                                            │              ▼
//!                                            │        WriteBuffer + write
//!                                            │        registration
//!                                            │
//!   handle.response_complete() ──────────────┘ ──► close policy
//! ```
//!
//! # Closing
//!
//! A connection is closed exactly once, by whichever of these comes first:
//! read EOF after the response completed, an I/O error, an explicit close
//! request from the processor, or the idle timer firing while no response is
//! in progress. A close requested while a response is being produced is
//! deferred until the processor reports the response complete.

pub mod buffer;
pub mod connection;
pub mod error;
pub mod processor;
pub mod pump;
pub mod socket;
pub mod state;

pub use buffer::WriteBuffer;
pub use connection::{CloseOutcome, Connection};
pub use processor::{ConnectionHandle, ConnectionProcessor};
pub use pump::{Direction, IoPump, PumpEvent, Registration};
pub use socket::{Socket, TcpSocket};
pub use state::{ConnectionState, StateSnapshot};
