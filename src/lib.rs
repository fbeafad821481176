//! sockpump - event-driven socket transport
//!
//! Core library for per-connection socket pumping, plus a small TCP server.

pub mod config;
pub mod server;
pub mod transport;
