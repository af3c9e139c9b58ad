//! Synchronous wrapper around [`Session`].

use tokio::runtime::{Builder, Runtime};

use super::{Session, SessionConfig, SessionHandler};
use crate::Result;
use crate::message::MailSource;
use crate::protocol::{ClientState, SendReport, ServerInfo};
use crate::transport::{TcpTransport, Transport};
use crate::types::{AuthMethod, Reply};

/// A [`Session`] that blocks the calling thread on every operation.
///
/// Owns a current-thread tokio runtime; do not use it from inside another
/// runtime.
pub struct BlockingSession<T: Transport = TcpTransport> {
    runtime: Runtime,
    inner: Session<T>,
}

impl BlockingSession<TcpTransport> {
    /// Creates a blocking session that connects over TCP.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be created.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::from_session(Session::new(config))
    }
}

impl<T: Transport> BlockingSession<T> {
    /// Wraps an async session.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be created.
    pub fn from_session(inner: Session<T>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime, inner })
    }

    /// Replaces the event handler.
    #[must_use]
    pub fn with_handler(self, handler: impl SessionHandler + 'static) -> Self {
        Self {
            runtime: self.runtime,
            inner: self.inner.with_handler(handler),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ClientState {
        self.inner.state()
    }

    /// Returns what the server advertised.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        self.inner.server_info()
    }

    /// Returns the most recent server reply.
    #[must_use]
    pub const fn last_reply(&self) -> Option<&Reply> {
        self.inner.last_reply()
    }

    /// Returns the code of the most recent server reply.
    #[must_use]
    pub fn response_code(&self) -> Option<u16> {
        self.inner.response_code()
    }

    /// Returns the text of the most recent server reply.
    #[must_use]
    pub fn response_text(&self) -> Option<String> {
        self.inner.response_text()
    }

    /// See [`Session::connect`].
    ///
    /// # Errors
    ///
    /// As [`Session::connect`].
    pub fn connect(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.connect())
    }

    /// See [`Session::login`].
    ///
    /// # Errors
    ///
    /// As [`Session::login`].
    pub fn login(&mut self, username: &str, password: &str, method: AuthMethod) -> Result<()> {
        self.runtime
            .block_on(self.inner.login(username, password, method))
    }

    /// See [`Session::authenticate`].
    ///
    /// # Errors
    ///
    /// As [`Session::authenticate`].
    pub fn authenticate(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.authenticate())
    }

    /// See [`Session::send_mail`].
    ///
    /// # Errors
    ///
    /// As [`Session::send_mail`].
    pub fn send_mail(&mut self, message: &impl MailSource) -> Result<SendReport> {
        self.runtime.block_on(self.inner.send_mail(message))
    }

    /// See [`Session::quit`].
    pub fn quit(&mut self) {
        self.runtime.block_on(self.inner.quit());
    }

    /// Returns the wrapped session.
    #[must_use]
    pub fn into_inner(self) -> Session<T> {
        self.inner
    }
}
