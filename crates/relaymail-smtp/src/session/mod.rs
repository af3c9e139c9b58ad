//! Async SMTP session.
//!
//! [`Session`] drives the sans-I/O [`Protocol`] over a [`Transport`]. It
//! writes what the protocol queues, feeds it what the server sends, bounds
//! every wait with the configured timeouts and reports what happened to a
//! [`SessionHandler`].
//!
//! ## Example
//!
//! ```ignore
//! use relaymail_smtp::{Address, AuthMethod, ConnectionType, Message, Session, SessionConfig};
//!
//! let config = SessionConfig::builder("smtp.example.com")
//!     .connection_type(ConnectionType::StartTls)
//!     .build();
//! let mut session = Session::new(config);
//!
//! session.connect().await?;
//! session.login("user@example.com", "password", AuthMethod::Plain).await?;
//!
//! let message = Message::new(Address::new("user@example.com")?, raw_bytes)
//!     .to(Address::new("friend@example.org")?);
//! let report = session.send_mail(&message).await?;
//!
//! session.quit().await;
//! ```

mod blocking;
mod config;
mod handler;

use tokio::time::timeout;

pub use blocking::BlockingSession;
pub use config::{
    ConnectionType, Credentials, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, SessionConfig,
    SessionConfigBuilder,
};
pub use handler::{ChannelHandler, LoggingHandler, NoopHandler, SessionEvent, SessionHandler};

use crate::message::MailSource;
use crate::protocol::{ClientState, Outcome, Progress, Protocol, SendReport, ServerInfo};
use crate::transport::{TcpTransport, Transport, TransportEvent};
use crate::types::{AuthMethod, Reply};
use crate::{Error, Result};

/// An SMTP client session over one transport.
pub struct Session<T: Transport = TcpTransport> {
    config: SessionConfig,
    protocol: Protocol,
    transport: T,
    handler: Box<dyn SessionHandler>,
    /// State last reported to the handler.
    observed: ClientState,
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.protocol.state())
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl Session<TcpTransport> {
    /// Creates a session that connects over TCP.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let transport = TcpTransport::new(config.verify_certificates);
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> Session<T> {
    /// Creates a session over the given transport.
    #[must_use]
    pub fn with_transport(config: SessionConfig, transport: T) -> Self {
        let protocol = Protocol::new(config.client_name.clone(), config.connection_type);
        Self {
            config,
            protocol,
            transport,
            handler: Box::new(LoggingHandler),
            observed: ClientState::Unconnected,
        }
    }

    /// Replaces the event handler.
    #[must_use]
    pub fn with_handler(mut self, handler: impl SessionHandler + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ClientState {
        self.protocol.state()
    }

    /// Returns true once the channel is protected by TLS.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.protocol.is_encrypted()
    }

    /// Returns true after a successful login.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.protocol.is_authenticated()
    }

    /// Returns what the server advertised.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        self.protocol.server_info()
    }

    /// Returns the most recent server reply.
    #[must_use]
    pub const fn last_reply(&self) -> Option<&Reply> {
        self.protocol.last_reply()
    }

    /// Returns the code of the most recent server reply.
    #[must_use]
    pub fn response_code(&self) -> Option<u16> {
        self.last_reply().map(|reply| reply.code.as_u16())
    }

    /// Returns the text of the most recent server reply.
    #[must_use]
    pub fn response_text(&self) -> Option<String> {
        self.last_reply().map(Reply::message_text)
    }

    /// Returns the transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Connects, reads the greeting, sends EHLO (or HELO) and, for
    /// [`ConnectionType::StartTls`], upgrades the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless unconnected,
    /// [`Error::ConnectionTimeout`] if the transport does not come up in
    /// time, a transport error if it fails, or the error for a rejected
    /// greeting, EHLO/HELO or STARTTLS. After a rejected reply the session
    /// stays connected and must be quit.
    pub async fn connect(&mut self) -> Result<()> {
        let result = self.do_connect().await;
        self.finish(result)
    }

    /// Authenticates with the given credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless ready and not yet
    /// authenticated, or [`Error::AuthenticationFailed`] if the server
    /// rejects the exchange. The session is ready again afterwards.
    pub async fn login(&mut self, username: &str, password: &str, method: AuthMethod) -> Result<()> {
        let credentials = Credentials::new(username, password);
        let result = self.do_login(&credentials, method).await;
        self.finish(result)
    }

    /// Authenticates with the credentials and method from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if no credentials are configured,
    /// otherwise as [`login`](Self::login).
    pub async fn authenticate(&mut self) -> Result<()> {
        let result = match self.config.credentials.clone() {
            Some(credentials) => {
                let method = self.config.auth_method;
                self.do_login(&credentials, method).await
            }
            None => Err(Error::InvalidInput("no credentials configured".to_string())),
        };
        self.finish(result)
    }

    /// Sends one message.
    ///
    /// Recipients the server refuses are skipped and listed in the report.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless ready, [`Error::InvalidInput`]
    /// for a message without recipients, or the error for the rejected step
    /// (every recipient refused reports the last refusal).
    pub async fn send_mail(&mut self, message: &impl MailSource) -> Result<SendReport> {
        let result = self.do_send(message).await;
        self.finish(result)
    }

    /// Sends QUIT, waits up to the response timeout for an answer and closes
    /// the transport. Does nothing when unconnected.
    pub async fn quit(&mut self) {
        if self.protocol.state() == ClientState::Unconnected {
            return;
        }

        if self.protocol.quit() {
            self.sync_state();
            let wait = self.config.response_timeout;
            if self.flush().await.is_ok() && timeout(wait, self.await_goodbye()).await.is_err() {
                tracing::debug!(?wait, "No reply to QUIT");
            }
        }

        if self.protocol.state() != ClientState::Unconnected {
            self.disconnect().await;
        }
        self.sync_state();
    }

    async fn do_connect(&mut self) -> Result<()> {
        self.protocol.begin_connect()?;
        self.sync_state();

        let host = self.config.host.clone();
        let port = self.config.port;
        let implicit_tls = self.config.connection_type == ConnectionType::ImplicitTls;
        tracing::info!(host = %host, port, connection_type = ?self.config.connection_type, "Connecting");

        let transport = &mut self.transport;
        let opened = timeout(self.config.connect_timeout, async {
            transport.connect(&host, port).await?;
            if implicit_tls {
                transport.start_tls(&host).await?;
            }
            Ok::<(), Error>(())
        })
        .await;

        match opened {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.disconnect().await;
                return Err(e);
            }
            Err(_) => {
                self.disconnect().await;
                return Err(Error::ConnectionTimeout(self.config.connect_timeout));
            }
        }

        self.protocol
            .transport_connected(self.transport.is_encrypted())?;
        self.sync_state();
        self.handler.on_connected();

        loop {
            match self.drive().await? {
                Progress::StartTls => self.upgrade(&host).await?,
                Progress::Done(Outcome::Ready) => break,
                other => return Err(unexpected(&other)),
            }
        }

        self.sync_state();
        self.handler.on_ready(self.protocol.server_info());
        Ok(())
    }

    async fn do_login(&mut self, credentials: &Credentials, method: AuthMethod) -> Result<()> {
        self.protocol.login(credentials, method)?;
        self.sync_state();

        match self.drive().await? {
            Progress::Done(Outcome::Authenticated) => {
                self.sync_state();
                self.handler.on_authenticated();
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    async fn do_send(&mut self, message: &impl MailSource) -> Result<SendReport> {
        self.protocol
            .send_mail(message.envelope(), message.content())?;
        self.sync_state();

        match self.drive().await? {
            Progress::Done(Outcome::Sent(report)) => {
                self.sync_state();
                self.handler.on_mail_sent(&report);
                Ok(report)
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Runs the exchange until the protocol asks for a TLS upgrade or
    /// finishes the current operation.
    async fn drive(&mut self) -> Result<Progress> {
        loop {
            self.flush().await?;
            match self.protocol.poll_progress()? {
                Some(Progress::Pending) => self.sync_state(),
                Some(progress) => return Ok(progress),
                None => self.receive().await?,
            }
        }
    }

    async fn upgrade(&mut self, host: &str) -> Result<()> {
        let wait = self.config.connect_timeout;
        match timeout(wait, self.transport.start_tls(host)).await {
            Ok(Ok(())) => self.protocol.encrypted(),
            Ok(Err(e)) => {
                tracing::warn!(?e, "TLS upgrade failed");
                self.disconnect().await;
                Err(e)
            }
            Err(_) => {
                tracing::warn!(?wait, "TLS upgrade timed out");
                self.disconnect().await;
                Err(Error::StartTlsFailed(format!(
                    "TLS handshake timed out after {wait:?}"
                )))
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        while let Some(transmit) = self.protocol.poll_transmit() {
            if let Err(e) = self.transport.send(&transmit.data).await {
                self.disconnect().await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Waits for the next chunk of server bytes.
    async fn receive(&mut self) -> Result<()> {
        let wait = self.config.response_timeout;
        match timeout(wait, self.transport.next_event()).await {
            Err(_) => {
                tracing::warn!(?wait, state = %self.protocol.state(), "Response timed out");
                Err(Error::ResponseTimeout(wait))
            }
            Ok(Ok(TransportEvent::Received(bytes))) => {
                self.protocol.handle_input(&bytes);
                Ok(())
            }
            Ok(Ok(TransportEvent::Closed)) => {
                tracing::warn!("Connection closed by server");
                self.disconnect().await;
                Err(Error::ConnectionClosed)
            }
            Ok(Err(e)) => {
                self.disconnect().await;
                Err(e)
            }
        }
    }

    async fn await_goodbye(&mut self) {
        loop {
            if !matches!(self.protocol.poll_progress(), Ok(None)) {
                return;
            }
            match self.transport.next_event().await {
                Ok(TransportEvent::Received(bytes)) => self.protocol.handle_input(&bytes),
                Ok(TransportEvent::Closed) | Err(_) => return,
            }
        }
    }

    async fn disconnect(&mut self) {
        self.transport.close().await;
        self.protocol.closed();
        self.sync_state();
        self.handler.on_disconnected();
    }

    fn sync_state(&mut self) {
        let state = self.protocol.state();
        if state != self.observed {
            self.handler.on_state_changed(self.observed, state);
            self.observed = state;
        }
    }

    fn finish<R>(&mut self, result: Result<R>) -> Result<R> {
        self.sync_state();
        if let Err(e) = &result {
            self.handler.on_error(e);
        }
        result
    }
}

fn unexpected(progress: &Progress) -> Error {
    Error::InvalidState(format!("unexpected protocol progress: {progress:?}"))
}
