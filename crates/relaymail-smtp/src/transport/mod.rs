//! Byte transport underneath a session.
//!
//! The session never touches sockets directly. It drives a [`Transport`],
//! which connects, moves bytes, upgrades to TLS on request and reports what
//! the peer did through [`TransportEvent`].

mod tcp;
mod tls;

use bytes::Bytes;

pub use tcp::TcpTransport;
pub use tls::create_tls_connector;

use crate::Result;

/// Something the transport observed on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes arrived from the server.
    Received(Bytes),
    /// The server closed the connection.
    Closed,
}

/// Ordered byte stream to an SMTP server.
///
/// Socket failures surface as `Err` from any method. Implementations must be
/// cancel-safe in [`next_event`](Transport::next_event): the session wraps it
/// in a timeout and may drop the future.
pub trait Transport: Send {
    /// Opens the connection.
    fn connect(&mut self, host: &str, port: u16) -> impl Future<Output = Result<()>> + Send;

    /// Performs a TLS handshake over the open connection.
    fn start_tls(&mut self, host: &str) -> impl Future<Output = Result<()>> + Send;

    /// Writes all bytes.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Waits for the next event.
    fn next_event(&mut self) -> impl Future<Output = Result<TransportEvent>> + Send;

    /// Closes the connection. Idempotent.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Returns true once TLS is established.
    fn is_encrypted(&self) -> bool;
}
