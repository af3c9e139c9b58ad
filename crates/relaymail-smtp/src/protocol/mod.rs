//! Sans-I/O SMTP client state machine.
//!
//! [`Protocol`] performs no I/O. The driver:
//! - starts an operation (`login()`, `send_mail()`, `quit()`, ...)
//! - writes everything returned by `poll_transmit()`
//! - feeds received bytes to `handle_input()`
//! - calls `poll_progress()` until it reports [`Progress::Done`], an error,
//!   or `None` (more bytes needed)
//!
//! Timeouts are the driver's business; the machine only knows which reply it
//! is waiting for.
//!
//! ```ignore
//! let mut protocol = Protocol::new("client.example.com", ConnectionType::Plain);
//! protocol.begin_connect()?;
//! protocol.transport_connected(false)?;
//!
//! protocol.handle_input(b"220 mx.example.com ESMTP\r\n");
//! assert!(matches!(protocol.poll_progress()?, Some(Progress::Pending)));
//! let ehlo = protocol.poll_transmit(); // EHLO client.example.com
//! ```

mod state;
mod transmit;

use std::collections::{HashSet, VecDeque};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub use state::ClientState;
pub use transmit::Transmit;

use state::{AuthStep, Handshake, MailStep, Phase};

use crate::command::Command;
use crate::message::Envelope;
use crate::parser::ResponseReader;
use crate::session::{ConnectionType, Credentials};
use crate::types::{Address, AuthMethod, Extension, Reply, ReplyCode};
use crate::{Error, Result};

/// Server capabilities from the greeting and EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
    }

    /// Returns the advertised AUTH mechanisms this client can use.
    #[must_use]
    pub fn auth_methods(&self) -> Vec<AuthMethod> {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Auth(methods) => Some(methods.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// A recipient refused by `RCPT TO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecipient {
    /// The refused address.
    pub address: Address,
    /// The server's reply.
    pub reply: Reply,
}

/// Outcome of a completed mail transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Recipients the server accepted, in envelope order.
    pub accepted: Vec<Address>,
    /// Recipients the server refused.
    pub rejected: Vec<RejectedRecipient>,
}

impl SendReport {
    /// Returns true if every recipient was accepted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// What a finished exchange produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Greeting and EHLO (and STARTTLS, when configured) completed.
    Ready,
    /// AUTH succeeded.
    Authenticated,
    /// Message accepted for delivery.
    Sent(SendReport),
    /// QUIT answered.
    Closed,
}

/// Result of processing one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The exchange continues; send any queued transmits and keep reading.
    Pending,
    /// STARTTLS accepted; upgrade the transport, then call
    /// [`Protocol::encrypted`].
    StartTls,
    /// The current operation finished.
    Done(Outcome),
}

/// State of an in-flight mail transaction.
#[derive(Debug)]
struct Transaction {
    recipients: Vec<Address>,
    payload: Option<Transmit>,
    report: SendReport,
    /// Error to report once the RSET that follows a failure is answered.
    failure: Option<Error>,
}

/// Sans-I/O SMTP client protocol state machine.
#[derive(Debug)]
pub struct Protocol {
    phase: Phase,
    client_name: String,
    connection_type: ConnectionType,
    encrypted: bool,
    authenticated: bool,
    server_info: ServerInfo,
    reader: ResponseReader,
    outbound: VecDeque<Transmit>,
    last_reply: Option<Reply>,
    /// Base64 answers still owed to AUTH LOGIN challenges.
    auth_answers: VecDeque<String>,
    transaction: Option<Transaction>,
}

impl Protocol {
    /// Creates an unconnected protocol instance.
    #[must_use]
    pub fn new(client_name: impl Into<String>, connection_type: ConnectionType) -> Self {
        Self {
            phase: Phase::Unconnected,
            client_name: client_name.into(),
            connection_type,
            encrypted: false,
            authenticated: false,
            server_info: ServerInfo::default(),
            reader: ResponseReader::new(),
            outbound: VecDeque::new(),
            last_reply: None,
            auth_answers: VecDeque::new(),
            transaction: None,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ClientState {
        self.phase.client_state()
    }

    /// Returns true once the channel is protected by TLS.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Returns true after a successful AUTH exchange.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Returns what the server advertised.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Returns the most recent complete reply.
    #[must_use]
    pub const fn last_reply(&self) -> Option<&Reply> {
        self.last_reply.as_ref()
    }

    /// Marks the start of a transport connect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is unconnected.
    pub fn begin_connect(&mut self) -> Result<()> {
        self.expect_state(ClientState::Unconnected, "connect")?;
        self.phase = Phase::Connecting;
        Ok(())
    }

    /// Records that the transport is up; the server greeting is next.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless a connect is in progress.
    pub fn transport_connected(&mut self, encrypted: bool) -> Result<()> {
        self.expect_state(ClientState::Connecting, "complete a connect")?;
        self.encrypted = encrypted;
        self.phase = Phase::Connected(Handshake::Greeting);
        Ok(())
    }

    /// Records a completed STARTTLS upgrade and re-issues EHLO.
    ///
    /// Everything learned over plaintext is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the server accepted STARTTLS.
    pub fn encrypted(&mut self) -> Result<()> {
        if self.phase != Phase::Connected(Handshake::Encrypting) {
            return Err(Error::InvalidState(format!(
                "no TLS upgrade pending, session is {}",
                self.state()
            )));
        }
        self.encrypted = true;
        self.server_info.extensions.clear();
        if self.reader.has_pending() {
            tracing::warn!("Discarding plaintext sent ahead of the TLS upgrade");
        }
        self.reader.clear();
        self.send_ehlo(Handshake::TlsEhlo);
        Ok(())
    }

    /// Starts an AUTH exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is ready and not yet
    /// authenticated, or [`Error::InvalidInput`] for an empty username.
    pub fn login(&mut self, credentials: &Credentials, method: AuthMethod) -> Result<()> {
        self.expect_state(ClientState::Ready, "log in")?;
        if self.authenticated {
            return Err(Error::InvalidState("already authenticated".to_string()));
        }
        if credentials.username.is_empty() {
            return Err(Error::InvalidInput("username must not be empty".to_string()));
        }

        match method {
            AuthMethod::Plain => {
                let payload = format!(
                    "{}\0{}\0{}",
                    credentials.authzid, credentials.username, credentials.password
                );
                self.send(&Command::Auth {
                    method,
                    initial_response: Some(STANDARD.encode(payload)),
                });
                self.phase = Phase::Authenticating(AuthStep::Plain);
            }
            AuthMethod::Login => {
                self.auth_answers = VecDeque::from([
                    STANDARD.encode(&credentials.username),
                    STANDARD.encode(&credentials.password),
                ]);
                self.send(&Command::Auth {
                    method,
                    initial_response: None,
                });
                self.phase = Phase::Authenticating(AuthStep::Login);
            }
        }
        Ok(())
    }

    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is ready, or
    /// [`Error::InvalidInput`] if the envelope names no recipients.
    pub fn send_mail(&mut self, envelope: Envelope, content: &[u8]) -> Result<()> {
        self.expect_state(ClientState::Ready, "send mail")?;
        let recipients: Vec<Address> = envelope.recipients().cloned().collect();
        if recipients.is_empty() {
            return Err(Error::InvalidInput("message has no recipients".to_string()));
        }

        self.transaction = Some(Transaction {
            recipients,
            payload: Some(Transmit::payload(content)),
            report: SendReport::default(),
            failure: None,
        });
        self.send(&Command::MailFrom {
            from: envelope.from,
        });
        self.phase = Phase::Sending(MailStep::MailFrom);
        Ok(())
    }

    /// Queues QUIT. Returns false when there is nobody to say goodbye to.
    pub fn quit(&mut self) -> bool {
        match self.phase {
            Phase::Unconnected | Phase::Connecting | Phase::Disconnecting => false,
            _ => {
                self.outbound.clear();
                self.auth_answers.clear();
                self.transaction = None;
                self.send(&Command::Quit);
                self.phase = Phase::Disconnecting;
                true
            }
        }
    }

    /// Resets to unconnected after the transport went away.
    ///
    /// The last reply stays available.
    pub fn closed(&mut self) {
        self.phase = Phase::Unconnected;
        self.encrypted = false;
        self.authenticated = false;
        self.server_info = ServerInfo::default();
        self.reader.clear();
        self.outbound.clear();
        self.auth_answers.clear();
        self.transaction = None;
    }

    /// Returns the next bytes to send.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.outbound.pop_front()
    }

    /// Feeds bytes received from the server.
    pub fn handle_input(&mut self, data: &[u8]) {
        self.reader.feed(data);
    }

    /// Processes the next complete reply, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns the error the reply maps to in the current step. AUTH and mail
    /// failures leave the session ready; handshake failures leave it
    /// connected.
    pub fn poll_progress(&mut self) -> Result<Option<Progress>> {
        let reply = match self.reader.next_reply() {
            Ok(Some(reply)) => reply,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.abort_exchange();
                if let Phase::Connected(step) = self.phase
                    && step.in_starttls()
                {
                    return Err(Error::StartTlsFailed(e.to_string()));
                }
                return Err(e);
            }
        };

        tracing::debug!("S: {reply}");
        self.last_reply = Some(reply.clone());

        let progress = match self.phase {
            Phase::Connected(step) => self.on_handshake(step, &reply),
            Phase::Authenticating(step) => self.on_auth(step, &reply),
            Phase::Sending(step) => self.on_mail(step, reply),
            Phase::Disconnecting => Ok(Progress::Done(Outcome::Closed)),
            Phase::Unconnected | Phase::Connecting | Phase::Ready => {
                tracing::warn!(code = reply.code.as_u16(), state = %self.state(), "Unsolicited reply");
                Ok(Progress::Pending)
            }
        };
        progress.map(Some)
    }

    fn on_handshake(&mut self, step: Handshake, reply: &Reply) -> Result<Progress> {
        match step {
            Handshake::Greeting => {
                if reply.code != ReplyCode::SERVICE_READY {
                    return Err(Error::from_reply(reply));
                }
                self.server_info.hostname = first_word(reply);
                self.send_ehlo(Handshake::Ehlo);
                Ok(Progress::Pending)
            }
            Handshake::Ehlo | Handshake::TlsEhlo => {
                if reply.is_success() {
                    self.server_info.extensions = reply
                        .message
                        .iter()
                        .skip(1)
                        .map(String::as_str)
                        .map(Extension::parse)
                        .collect();
                    Ok(self.greeted())
                } else if reply.is_permanent_error() {
                    tracing::debug!(code = reply.code.as_u16(), "EHLO refused, trying HELO");
                    self.send(&Command::Helo {
                        hostname: self.client_name.clone(),
                    });
                    let next = if step == Handshake::TlsEhlo {
                        Handshake::TlsHelo
                    } else {
                        Handshake::Helo
                    };
                    self.phase = Phase::Connected(next);
                    Ok(Progress::Pending)
                } else {
                    Err(handshake_error(step, reply))
                }
            }
            Handshake::Helo | Handshake::TlsHelo => {
                if !reply.is_success() {
                    return Err(handshake_error(step, reply));
                }
                self.server_info.extensions.clear();
                Ok(self.greeted())
            }
            Handshake::StartTls => {
                if reply.code != ReplyCode::SERVICE_READY {
                    tracing::warn!(code = reply.code.as_u16(), "STARTTLS refused");
                    return Err(Error::starttls_rejected(reply));
                }
                self.phase = Phase::Connected(Handshake::Encrypting);
                Ok(Progress::StartTls)
            }
            Handshake::Encrypting => Err(Error::starttls_rejected(reply)),
        }
    }

    /// Greeting exchange done: upgrade if required, otherwise ready.
    fn greeted(&mut self) -> Progress {
        if self.connection_type == ConnectionType::StartTls && !self.encrypted {
            if !self.server_info.supports_starttls() {
                tracing::warn!(host = %self.server_info.hostname, "Server does not advertise STARTTLS");
            }
            self.send(&Command::StartTls);
            self.phase = Phase::Connected(Handshake::StartTls);
            return Progress::Pending;
        }

        tracing::info!(
            host = %self.server_info.hostname,
            encrypted = self.encrypted,
            "Session ready"
        );
        self.phase = Phase::Ready;
        Progress::Done(Outcome::Ready)
    }

    fn on_auth(&mut self, step: AuthStep, reply: &Reply) -> Result<Progress> {
        let next = match step {
            AuthStep::Plain | AuthStep::LoginPassword if reply.is_success() => {
                tracing::info!("Authenticated");
                self.authenticated = true;
                self.phase = Phase::Ready;
                return Ok(Progress::Done(Outcome::Authenticated));
            }
            AuthStep::Login if reply.code == ReplyCode::AUTH_CONTINUE => AuthStep::LoginUser,
            AuthStep::LoginUser if reply.code == ReplyCode::AUTH_CONTINUE => {
                AuthStep::LoginPassword
            }
            _ => return Err(self.auth_rejected(reply)),
        };

        let Some(answer) = self.auth_answers.pop_front() else {
            return Err(self.auth_rejected(reply));
        };
        self.send(&Command::AuthResponse(answer));
        self.phase = Phase::Authenticating(next);
        Ok(Progress::Pending)
    }

    fn auth_rejected(&mut self, reply: &Reply) -> Error {
        tracing::warn!(code = reply.code.as_u16(), "Authentication rejected");
        self.auth_answers.clear();
        self.phase = Phase::Ready;
        Error::auth_failed(reply)
    }

    fn on_mail(&mut self, step: MailStep, reply: Reply) -> Result<Progress> {
        let Some(tx) = self.transaction.as_mut() else {
            self.phase = Phase::Ready;
            return Err(Error::InvalidState("no mail transaction in progress".to_string()));
        };

        match step {
            MailStep::MailFrom => {
                if !reply.is_success() {
                    tracing::warn!(code = reply.code.as_u16(), "Sender rejected");
                    return Err(self.end_transaction(&reply));
                }
                let first = tx.recipients[0].clone();
                self.send(&Command::RcptTo { to: first });
                self.phase = Phase::Sending(MailStep::Recipient(0));
            }
            MailStep::Recipient(index) => {
                let address = tx.recipients[index].clone();
                if reply.is_success() {
                    tx.report.accepted.push(address);
                } else {
                    tracing::warn!(code = reply.code.as_u16(), %address, "Recipient rejected");
                    tx.report.rejected.push(RejectedRecipient {
                        address,
                        reply: reply.clone(),
                    });
                }

                let next = index + 1;
                if let Some(to) = tx.recipients.get(next).cloned() {
                    self.send(&Command::RcptTo { to });
                    self.phase = Phase::Sending(MailStep::Recipient(next));
                } else if tx.report.accepted.is_empty() {
                    tx.failure = Some(Error::from_reply(&reply));
                    self.reset_transaction();
                } else {
                    self.send(&Command::Data);
                    self.phase = Phase::Sending(MailStep::Data);
                }
            }
            MailStep::Data => {
                if reply.code == ReplyCode::START_DATA
                    && let Some(payload) = tx.payload.take()
                {
                    tracing::debug!("C: {}", payload.label);
                    self.outbound.push_back(payload);
                    self.phase = Phase::Sending(MailStep::Body);
                } else {
                    tracing::warn!(code = reply.code.as_u16(), "DATA rejected");
                    tx.failure = Some(Error::from_reply(&reply));
                    self.reset_transaction();
                }
            }
            MailStep::Body => {
                if !reply.is_success() {
                    tracing::warn!(code = reply.code.as_u16(), "Message rejected");
                    return Err(self.end_transaction(&reply));
                }
                let report = self
                    .transaction
                    .take()
                    .map(|tx| tx.report)
                    .unwrap_or_default();
                tracing::info!(
                    accepted = report.accepted.len(),
                    rejected = report.rejected.len(),
                    "Message sent"
                );
                self.phase = Phase::Ready;
                return Ok(Progress::Done(Outcome::Sent(report)));
            }
            MailStep::Reset => {
                let failure = self.transaction.take().and_then(|tx| tx.failure);
                self.phase = Phase::Ready;
                return Err(failure.unwrap_or_else(|| Error::from_reply(&reply)));
            }
        }
        Ok(Progress::Pending)
    }

    fn reset_transaction(&mut self) {
        self.send(&Command::Rset);
        self.phase = Phase::Sending(MailStep::Reset);
    }

    fn end_transaction(&mut self, reply: &Reply) -> Error {
        self.transaction = None;
        self.phase = Phase::Ready;
        Error::from_reply(reply)
    }

    /// Drops a half-finished AUTH or mail exchange after an unreadable reply.
    fn abort_exchange(&mut self) {
        if matches!(self.phase, Phase::Authenticating(_) | Phase::Sending(_)) {
            self.auth_answers.clear();
            self.transaction = None;
            self.phase = Phase::Ready;
        }
    }

    fn send_ehlo(&mut self, step: Handshake) {
        self.send(&Command::Ehlo {
            hostname: self.client_name.clone(),
        });
        self.phase = Phase::Connected(step);
    }

    fn send(&mut self, cmd: &Command) {
        let transmit = Transmit::command(cmd);
        tracing::debug!("C: {}", transmit.label);
        self.outbound.push_back(transmit);
    }

    fn expect_state(&self, expected: ClientState, operation: &str) -> Result<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "cannot {operation} while {state}, requires {expected}"
            )))
        }
    }
}

/// Maps a refused greeting step to its error; inside STARTTLS every refusal
/// is a transport failure.
fn handshake_error(step: Handshake, reply: &Reply) -> Error {
    if step.in_starttls() {
        Error::starttls_rejected(reply)
    } else {
        Error::from_reply(reply)
    }
}

fn first_word(reply: &Reply) -> String {
    reply
        .message
        .first()
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or_default()
        .to_string()
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
    use crate::error::ErrorKind;

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    fn sent(protocol: &mut Protocol) -> Vec<String> {
        std::iter::from_fn(|| protocol.poll_transmit())
            .map(|t| String::from_utf8(t.data).unwrap())
            .collect()
    }

    fn reply(protocol: &mut Protocol, data: &str) -> Result<Option<Progress>> {
        protocol.handle_input(data.as_bytes());
        protocol.poll_progress()
    }

    fn ready(connection_type: ConnectionType) -> Protocol {
        let mut p = Protocol::new("client.test", connection_type);
        p.begin_connect().unwrap();
        p.transport_connected(false).unwrap();
        reply(&mut p, "220 mx.test ESMTP\r\n").unwrap();
        reply(&mut p, "250-mx.test\r\n250-AUTH PLAIN LOGIN\r\n250 SIZE 1000\r\n").unwrap();
        sent(&mut p);
        p
    }

    fn envelope(to: &[&str]) -> Envelope {
        let mut envelope = Envelope::new(addr("me@test"));
        envelope.to = to.iter().map(|a| addr(a)).collect();
        envelope
    }

    mod handshake_tests {
        use super::*;

        #[test]
        fn greeting_then_ehlo_reaches_ready() {
            let mut p = Protocol::new("client.test", ConnectionType::Plain);
            assert_eq!(p.state(), ClientState::Unconnected);
            p.begin_connect().unwrap();
            assert_eq!(p.state(), ClientState::Connecting);
            p.transport_connected(false).unwrap();
            assert_eq!(p.state(), ClientState::Connected);

            assert_eq!(p.poll_progress().unwrap(), None);
            let progress = reply(&mut p, "220 mx.test ESMTP ready\r\n").unwrap();
            assert_eq!(progress, Some(Progress::Pending));
            assert_eq!(sent(&mut p), vec!["EHLO client.test\r\n"]);

            let progress =
                reply(&mut p, "250-mx.test hello\r\n250-8BITMIME\r\n250 AUTH LOGIN\r\n").unwrap();
            assert_eq!(progress, Some(Progress::Done(Outcome::Ready)));
            assert_eq!(p.state(), ClientState::Ready);
            assert_eq!(p.server_info().hostname, "mx.test");
            assert!(p.server_info().supports(&Extension::EightBitMime));
            assert_eq!(p.server_info().auth_methods(), vec![AuthMethod::Login]);
        }

        #[test]
        fn ehlo_refused_falls_back_to_helo() {
            let mut p = Protocol::new("client.test", ConnectionType::Plain);
            p.begin_connect().unwrap();
            p.transport_connected(false).unwrap();
            reply(&mut p, "220 old.test\r\n").unwrap();
            sent(&mut p);

            let progress = reply(&mut p, "502 command not implemented\r\n").unwrap();
            assert_eq!(progress, Some(Progress::Pending));
            assert_eq!(sent(&mut p), vec!["HELO client.test\r\n"]);

            let progress = reply(&mut p, "250 old.test\r\n").unwrap();
            assert_eq!(progress, Some(Progress::Done(Outcome::Ready)));
            assert!(p.server_info().extensions.is_empty());
        }

        #[test]
        fn bad_greeting_stays_connected() {
            let mut p = Protocol::new("client.test", ConnectionType::Plain);
            p.begin_connect().unwrap();
            p.transport_connected(false).unwrap();

            let err = reply(&mut p, "554 go away\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ClientError);
            assert_eq!(p.state(), ClientState::Connected);
            assert!(sent(&mut p).is_empty());
        }

        #[test]
        fn transient_ehlo_failure_is_server_error() {
            let mut p = Protocol::new("client.test", ConnectionType::Plain);
            p.begin_connect().unwrap();
            p.transport_connected(false).unwrap();
            reply(&mut p, "220 mx.test\r\n").unwrap();

            let err = reply(&mut p, "421 shutting down\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ServerError);
            assert_eq!(err.code(), Some(421));
        }

        #[test]
        fn starttls_upgrade_reissues_ehlo() {
            let mut p = Protocol::new("client.test", ConnectionType::StartTls);
            p.begin_connect().unwrap();
            p.transport_connected(false).unwrap();
            reply(&mut p, "220 mx.test\r\n").unwrap();
            reply(&mut p, "250-mx.test\r\n250 STARTTLS\r\n").unwrap();
            assert_eq!(sent(&mut p), vec!["EHLO client.test\r\n", "STARTTLS\r\n"]);
            assert!(p.server_info().supports_starttls());

            let progress = reply(&mut p, "220 go ahead\r\n").unwrap();
            assert_eq!(progress, Some(Progress::StartTls));
            assert_eq!(p.state(), ClientState::Connected);

            p.encrypted().unwrap();
            assert!(p.is_encrypted());
            assert!(p.server_info().extensions.is_empty());
            assert_eq!(sent(&mut p), vec!["EHLO client.test\r\n"]);

            let progress = reply(&mut p, "250-mx.test\r\n250 AUTH PLAIN\r\n").unwrap();
            assert_eq!(progress, Some(Progress::Done(Outcome::Ready)));
            assert!(!p.server_info().supports_starttls());
        }

        #[test]
        fn starttls_rejected_is_socket_error() {
            let mut p = Protocol::new("client.test", ConnectionType::StartTls);
            p.begin_connect().unwrap();
            p.transport_connected(false).unwrap();
            reply(&mut p, "220 mx.test\r\n").unwrap();
            reply(&mut p, "250 mx.test\r\n").unwrap();

            let err = reply(&mut p, "454 TLS not available\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SocketError);
            assert_eq!(err.code(), Some(454));
            assert!(p.encrypted().is_err());
        }

        fn upgraded() -> Protocol {
            let mut p = Protocol::new("client.test", ConnectionType::StartTls);
            p.begin_connect().unwrap();
            p.transport_connected(false).unwrap();
            reply(&mut p, "220 mx.test\r\n").unwrap();
            reply(&mut p, "250-mx.test\r\n250 STARTTLS\r\n").unwrap();
            reply(&mut p, "220 go ahead\r\n").unwrap();
            p.encrypted().unwrap();
            sent(&mut p);
            p
        }

        #[test]
        fn plaintext_pipelined_before_upgrade_is_dropped() {
            let mut p = Protocol::new("client.test", ConnectionType::StartTls);
            p.begin_connect().unwrap();
            p.transport_connected(false).unwrap();
            reply(&mut p, "220 mx.test\r\n").unwrap();
            reply(&mut p, "250-mx.test\r\n250 STARTTLS\r\n").unwrap();

            let progress = reply(&mut p, "220 go ahead\r\n250 forged\r\n").unwrap();
            assert_eq!(progress, Some(Progress::StartTls));

            p.encrypted().unwrap();
            assert_eq!(p.poll_progress().unwrap(), None);
            assert_eq!(p.state(), ClientState::Connected);
        }

        #[test]
        fn refused_ehlo_after_upgrade_is_socket_error() {
            let mut p = upgraded();
            let err = reply(&mut p, "421 closing\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SocketError);
            assert_eq!(err.code(), Some(421));
            assert_eq!(p.state(), ClientState::Connected);
        }

        #[test]
        fn refused_helo_after_upgrade_is_socket_error() {
            let mut p = upgraded();
            let progress = reply(&mut p, "502 no EHLO\r\n").unwrap();
            assert_eq!(progress, Some(Progress::Pending));
            assert_eq!(sent(&mut p), vec!["HELO client.test\r\n"]);

            let err = reply(&mut p, "554 not welcome\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SocketError);
            assert_eq!(err.code(), Some(554));
        }

        #[test]
        fn helo_after_upgrade_reaches_ready() {
            let mut p = upgraded();
            reply(&mut p, "500 what\r\n").unwrap();
            let progress = reply(&mut p, "250 mx.test\r\n").unwrap();
            assert_eq!(progress, Some(Progress::Done(Outcome::Ready)));
            assert!(p.is_encrypted());
        }

        #[test]
        fn malformed_starttls_reply_is_socket_error() {
            let mut p = Protocol::new("client.test", ConnectionType::StartTls);
            p.begin_connect().unwrap();
            p.transport_connected(false).unwrap();
            reply(&mut p, "220 mx.test\r\n").unwrap();
            reply(&mut p, "250 mx.test\r\n").unwrap();

            let err = reply(&mut p, "2x0 garbled\r\n").unwrap_err();
            assert!(matches!(err, Error::StartTlsFailed(_)));
            assert_eq!(err.kind(), ErrorKind::SocketError);
        }

        #[test]
        fn malformed_plain_ehlo_reply_stays_server_error() {
            let mut p = Protocol::new("client.test", ConnectionType::Plain);
            p.begin_connect().unwrap();
            p.transport_connected(false).unwrap();
            reply(&mut p, "220 mx.test\r\n").unwrap();

            let err = reply(&mut p, "2x0 garbled\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ServerError);
        }

        #[test]
        fn implicit_tls_skips_starttls() {
            let mut p = Protocol::new("client.test", ConnectionType::ImplicitTls);
            p.begin_connect().unwrap();
            p.transport_connected(true).unwrap();
            reply(&mut p, "220 mx.test\r\n").unwrap();
            let progress = reply(&mut p, "250 mx.test\r\n").unwrap();
            assert_eq!(progress, Some(Progress::Done(Outcome::Ready)));
            assert!(p.is_encrypted());
        }

        #[test]
        fn connect_requires_unconnected() {
            let mut p = ready(ConnectionType::Plain);
            let err = p.begin_connect().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
            assert!(p.transport_connected(false).is_err());
        }
    }

    mod auth_tests {
        use super::*;

        #[test]
        fn plain_single_round_trip() {
            let mut p = ready(ConnectionType::Plain);
            p.login(&Credentials::new("user", "pass"), AuthMethod::Plain)
                .unwrap();
            assert_eq!(p.state(), ClientState::Authenticating);
            assert_eq!(sent(&mut p), vec!["AUTH PLAIN AHVzZXIAcGFzcw==\r\n"]);

            let progress = reply(&mut p, "235 2.7.0 accepted\r\n").unwrap();
            assert_eq!(progress, Some(Progress::Done(Outcome::Authenticated)));
            assert!(p.is_authenticated());
            assert_eq!(p.state(), ClientState::Ready);
        }

        #[test]
        fn plain_with_authzid() {
            let mut p = ready(ConnectionType::Plain);
            let creds = Credentials::new("user", "pass").authzid("admin");
            p.login(&creds, AuthMethod::Plain).unwrap();
            let expected = format!("AUTH PLAIN {}\r\n", STANDARD.encode("admin\0user\0pass"));
            assert_eq!(sent(&mut p), vec![expected]);
        }

        #[test]
        fn plain_rejected_returns_to_ready() {
            let mut p = ready(ConnectionType::Plain);
            p.login(&Credentials::new("user", "pass"), AuthMethod::Plain)
                .unwrap();
            let err = reply(&mut p, "530 5.7.0 must issue STARTTLS first\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
            assert_eq!(err.code(), Some(530));
            assert_eq!(p.state(), ClientState::Ready);
            assert!(!p.is_authenticated());
        }

        #[test]
        fn login_sends_two_answers() {
            let mut p = ready(ConnectionType::Plain);
            p.login(&Credentials::new("user", "pass"), AuthMethod::Login)
                .unwrap();
            assert_eq!(sent(&mut p), vec!["AUTH LOGIN\r\n"]);

            reply(&mut p, "334 VXNlcm5hbWU6\r\n").unwrap();
            assert_eq!(sent(&mut p), vec!["dXNlcg==\r\n"]);
            reply(&mut p, "334 UGFzc3dvcmQ6\r\n").unwrap();
            assert_eq!(sent(&mut p), vec!["cGFzcw==\r\n"]);

            let progress = reply(&mut p, "235 ok\r\n").unwrap();
            assert_eq!(progress, Some(Progress::Done(Outcome::Authenticated)));
        }

        #[test]
        fn login_aborts_on_non_continuation() {
            let mut p = ready(ConnectionType::Plain);
            p.login(&Credentials::new("user", "pass"), AuthMethod::Login)
                .unwrap();
            reply(&mut p, "334 VXNlcm5hbWU6\r\n").unwrap();
            sent(&mut p);

            let err = reply(&mut p, "535 bad user\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
            assert!(sent(&mut p).is_empty());
            assert_eq!(p.state(), ClientState::Ready);
        }

        #[test]
        fn login_unexpected_success_before_challenge_fails() {
            let mut p = ready(ConnectionType::Plain);
            p.login(&Credentials::new("user", "pass"), AuthMethod::Login)
                .unwrap();
            let err = reply(&mut p, "250 what\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        }

        #[test]
        fn login_twice_is_invalid() {
            let mut p = ready(ConnectionType::Plain);
            p.login(&Credentials::new("user", "pass"), AuthMethod::Plain)
                .unwrap();
            reply(&mut p, "235 ok\r\n").unwrap();

            let err = p
                .login(&Credentials::new("user", "pass"), AuthMethod::Plain)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
        }

        #[test]
        fn empty_username_is_invalid_input() {
            let mut p = ready(ConnectionType::Plain);
            let err = p
                .login(&Credentials::new("", "pass"), AuthMethod::Login)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
            assert!(sent(&mut p).is_empty());
        }
    }

    mod mail_tests {
        use super::*;

        #[test]
        fn full_transaction() {
            let mut p = ready(ConnectionType::Plain);
            p.send_mail(envelope(&["a@test", "b@test"]), b"Subject: hi\n\n.dot\n")
                .unwrap();
            assert_eq!(p.state(), ClientState::Sending);
            assert_eq!(sent(&mut p), vec!["MAIL FROM:<me@test>\r\n"]);

            reply(&mut p, "250 ok\r\n").unwrap();
            assert_eq!(sent(&mut p), vec!["RCPT TO:<a@test>\r\n"]);
            reply(&mut p, "250 ok\r\n").unwrap();
            assert_eq!(sent(&mut p), vec!["RCPT TO:<b@test>\r\n"]);
            reply(&mut p, "250 ok\r\n").unwrap();
            assert_eq!(sent(&mut p), vec!["DATA\r\n"]);
            reply(&mut p, "354 go ahead\r\n").unwrap();
            assert_eq!(
                sent(&mut p),
                vec!["Subject: hi\r\n\r\n..dot\r\n.\r\n".to_string()]
            );

            let progress = reply(&mut p, "250 queued\r\n").unwrap().unwrap();
            let Progress::Done(Outcome::Sent(report)) = progress else {
                panic!("expected sent outcome, got {progress:?}");
            };
            assert_eq!(report.accepted, vec![addr("a@test"), addr("b@test")]);
            assert!(report.is_complete());
            assert_eq!(p.state(), ClientState::Ready);
        }

        #[test]
        fn rejected_recipient_is_skipped() {
            let mut p = ready(ConnectionType::Plain);
            p.send_mail(envelope(&["a@test", "nobody@test"]), b"body")
                .unwrap();
            reply(&mut p, "250 ok\r\n").unwrap();
            reply(&mut p, "250 ok\r\n").unwrap();
            reply(&mut p, "550 no such user\r\n").unwrap();
            assert_eq!(
                sent(&mut p),
                vec![
                    "MAIL FROM:<me@test>\r\n",
                    "RCPT TO:<a@test>\r\n",
                    "RCPT TO:<nobody@test>\r\n",
                    "DATA\r\n"
                ]
            );
            reply(&mut p, "354 go\r\n").unwrap();
            let progress = reply(&mut p, "250 ok\r\n").unwrap().unwrap();
            let Progress::Done(Outcome::Sent(report)) = progress else {
                panic!("expected sent outcome");
            };
            assert_eq!(report.accepted, vec![addr("a@test")]);
            assert_eq!(report.rejected.len(), 1);
            assert_eq!(report.rejected[0].address, addr("nobody@test"));
            assert_eq!(report.rejected[0].reply.code, ReplyCode::MAILBOX_UNAVAILABLE);
        }

        #[test]
        fn all_recipients_rejected_resets() {
            let mut p = ready(ConnectionType::Plain);
            p.send_mail(envelope(&["x@test", "y@test"]), b"body").unwrap();
            reply(&mut p, "250 ok\r\n").unwrap();
            reply(&mut p, "550 no\r\n").unwrap();
            reply(&mut p, "451 later\r\n").unwrap();
            let commands = sent(&mut p);
            assert_eq!(commands.last().unwrap(), "RSET\r\n");
            assert!(!commands.contains(&"DATA\r\n".to_string()));

            let err = reply(&mut p, "250 flushed\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ServerError);
            assert_eq!(err.code(), Some(451));
            assert_eq!(p.state(), ClientState::Ready);
        }

        #[test]
        fn sender_rejected_returns_to_ready() {
            let mut p = ready(ConnectionType::Plain);
            p.send_mail(envelope(&["a@test"]), b"body").unwrap();
            sent(&mut p);
            let err = reply(&mut p, "553 sender not allowed\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ClientError);
            assert!(sent(&mut p).is_empty());
            assert_eq!(p.state(), ClientState::Ready);
        }

        #[test]
        fn data_rejected_sends_rset() {
            let mut p = ready(ConnectionType::Plain);
            p.send_mail(envelope(&["a@test"]), b"body").unwrap();
            reply(&mut p, "250 ok\r\n").unwrap();
            reply(&mut p, "250 ok\r\n").unwrap();
            sent(&mut p);
            reply(&mut p, "554 no data for you\r\n").unwrap();
            assert_eq!(sent(&mut p), vec!["RSET\r\n"]);

            let err = reply(&mut p, "250 ok\r\n").unwrap_err();
            assert_eq!(err.code(), Some(554));
            assert_eq!(p.state(), ClientState::Ready);
        }

        #[test]
        fn end_of_data_rejected() {
            let mut p = ready(ConnectionType::Plain);
            p.send_mail(envelope(&["a@test"]), b"body").unwrap();
            reply(&mut p, "250 ok\r\n").unwrap();
            reply(&mut p, "250 ok\r\n").unwrap();
            reply(&mut p, "354 go\r\n").unwrap();
            let err = reply(&mut p, "452 mailbox full\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ServerError);
            assert_eq!(p.state(), ClientState::Ready);
        }

        #[test]
        fn no_recipients_sends_nothing() {
            let mut p = ready(ConnectionType::Plain);
            let err = p.send_mail(envelope(&[]), b"body").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
            assert!(sent(&mut p).is_empty());
            assert_eq!(p.state(), ClientState::Ready);
        }

        #[test]
        fn send_requires_ready() {
            let mut p = Protocol::new("client.test", ConnectionType::Plain);
            let err = p.send_mail(envelope(&["a@test"]), b"body").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
        }

        #[test]
        fn malformed_reply_aborts_transaction() {
            let mut p = ready(ConnectionType::Plain);
            p.send_mail(envelope(&["a@test"]), b"body").unwrap();
            let err = reply(&mut p, "hello there\r\n").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ServerError);
            assert_eq!(p.state(), ClientState::Ready);
        }
    }

    mod quit_tests {
        use super::*;

        #[test]
        fn quit_then_close() {
            let mut p = ready(ConnectionType::Plain);
            assert!(p.quit());
            assert_eq!(p.state(), ClientState::Disconnecting);
            assert_eq!(sent(&mut p), vec!["QUIT\r\n"]);

            let progress = reply(&mut p, "221 bye\r\n").unwrap();
            assert_eq!(progress, Some(Progress::Done(Outcome::Closed)));
            p.closed();
            assert_eq!(p.state(), ClientState::Unconnected);
            assert_eq!(p.last_reply().unwrap().code, ReplyCode::CLOSING);
        }

        #[test]
        fn quit_when_unconnected_is_noop() {
            let mut p = Protocol::new("client.test", ConnectionType::Plain);
            assert!(!p.quit());
            assert!(sent(&mut p).is_empty());
        }

        #[test]
        fn quit_mid_transaction_drops_it() {
            let mut p = ready(ConnectionType::Plain);
            p.send_mail(envelope(&["a@test"]), b"body").unwrap();
            assert!(p.quit());
            assert_eq!(sent(&mut p), vec!["QUIT\r\n"]);
        }

        #[test]
        fn closed_forgets_session() {
            let mut p = ready(ConnectionType::Plain);
            p.login(&Credentials::new("user", "pass"), AuthMethod::Plain)
                .unwrap();
            reply(&mut p, "235 ok\r\n").unwrap();
            p.closed();
            assert!(!p.is_authenticated());
            assert!(p.server_info().hostname.is_empty());
            p.begin_connect().unwrap();
        }
    }
}
