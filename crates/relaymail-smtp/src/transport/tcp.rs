//! TCP transport with optional TLS.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use super::tls::create_tls_connector;
use super::{Transport, TransportEvent};
use crate::{Error, Result};

/// Read chunk size.
const READ_CHUNK: usize = 4096;

/// A stream that can be either plaintext or TLS.
enum SmtpStream {
    Plain(TcpStream),
    /// Boxed to reduce enum size.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// [`Transport`] over `tokio::net::TcpStream`, upgraded with `tokio-rustls`.
pub struct TcpTransport {
    stream: Option<SmtpStream>,
    buffer: BytesMut,
    verify_certificates: bool,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("connected", &self.stream.is_some())
            .field("encrypted", &self.is_encrypted())
            .field("verify_certificates", &self.verify_certificates)
            .finish_non_exhaustive()
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TcpTransport {
    /// Creates an unconnected transport.
    #[must_use]
    pub fn new(verify_certificates: bool) -> Self {
        Self {
            stream: None,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            verify_certificates,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut SmtpStream> {
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }
}

impl Transport for TcpTransport {
    async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::InvalidState("transport already connected".to_string()));
        }
        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;
        tracing::debug!(host, port, "TCP connected");
        self.buffer.clear();
        self.stream = Some(SmtpStream::Plain(tcp));
        Ok(())
    }

    async fn start_tls(&mut self, host: &str) -> Result<()> {
        let tcp = match self.stream.take() {
            Some(SmtpStream::Plain(tcp)) => tcp,
            Some(tls @ SmtpStream::Tls(_)) => {
                self.stream = Some(tls);
                return Err(Error::InvalidState("stream is already TLS".to_string()));
            }
            None => return Err(Error::ConnectionClosed),
        };

        let connector = create_tls_connector(self.verify_certificates);
        let server_name = ServerName::try_from(host.to_string())?;
        let tls = connector.connect(server_name, tcp).await?;
        tracing::debug!(host, "TLS established");
        self.buffer.clear();
        self.stream = Some(SmtpStream::Tls(Box::new(tls)));
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<TransportEvent> {
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        self.buffer.reserve(READ_CHUNK);
        let n = stream.read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Ok(TransportEvent::Closed);
        }
        Ok(TransportEvent::Received(self.buffer.split().freeze()))
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take()
            && let Err(e) = stream.shutdown().await
        {
            tracing::debug!(?e, "Shutdown failed");
        }
        self.buffer.clear();
    }

    fn is_encrypted(&self) -> bool {
        matches!(self.stream, Some(SmtpStream::Tls(_)))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_unconnected_transport() {
        let mut transport = TcpTransport::default();
        assert!(!transport.is_encrypted());
        assert!(matches!(
            transport.send(b"QUIT\r\n").await,
            Err(Error::ConnectionClosed)
        ));
        assert!(matches!(
            transport.next_event().await,
            Err(Error::ConnectionClosed)
        ));
        transport.close().await;
    }

    #[tokio::test]
    async fn test_round_trip_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"220 ready\r\n").await.unwrap();
            let mut line = [0u8; 6];
            socket.read_exact(&mut line).await.unwrap();
            assert_eq!(&line, b"QUIT\r\n");
        });

        let mut transport = TcpTransport::new(true);
        transport.connect("127.0.0.1", port).await.unwrap();
        let event = transport.next_event().await.unwrap();
        assert_eq!(event, TransportEvent::Received("220 ready\r\n".into()));

        transport.send(b"QUIT\r\n").await.unwrap();
        server.await.unwrap();
        assert_eq!(transport.next_event().await.unwrap(), TransportEvent::Closed);
        transport.close().await;
    }

    #[tokio::test]
    async fn test_start_tls_requires_connection() {
        let mut transport = TcpTransport::new(false);
        assert!(matches!(
            transport.start_tls("localhost").await,
            Err(Error::ConnectionClosed)
        ));
    }
}
