//! TCP front end: accepts sockets and hands them to the transport.

pub mod echo;
pub mod listener;

pub use echo::EchoProcessor;
