//! Session event callbacks.
//!
//! A [`Session`](super::Session) reports state changes, milestones and
//! failures to a [`SessionHandler`]. Every method has a no-op default, so an
//! implementation only overrides what it cares about.
//!
//! # Example
//!
//! ```ignore
//! use relaymail_smtp::{ChannelHandler, Session, SessionConfig, SessionEvent};
//!
//! let (handler, mut events) = ChannelHandler::new();
//! let mut session = Session::new(SessionConfig::new("smtp.example.com")).with_handler(handler);
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! });
//! ```

use tokio::sync::mpsc;

use crate::error::{Error, ErrorKind};
use crate::protocol::{ClientState, SendReport, ServerInfo};

/// Receiver of session notifications.
pub trait SessionHandler: Send {
    /// Called on every state transition.
    fn on_state_changed(&mut self, from: ClientState, to: ClientState) {
        let _ = (from, to);
    }

    /// Called when the transport is up, before the greeting.
    fn on_connected(&mut self) {}

    /// Called when the session reaches Ready after the greeting exchange.
    fn on_ready(&mut self, server: &ServerInfo) {
        let _ = server;
    }

    /// Called after a successful AUTH exchange.
    fn on_authenticated(&mut self) {}

    /// Called when the server accepted a message.
    fn on_mail_sent(&mut self, report: &SendReport) {
        let _ = report;
    }

    /// Called once the transport is closed.
    fn on_disconnected(&mut self) {}

    /// Called for every error an operation returns.
    fn on_error(&mut self, error: &Error) {
        let _ = error;
    }
}

/// A handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}

/// A handler that logs events using tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl SessionHandler for LoggingHandler {
    fn on_state_changed(&mut self, from: ClientState, to: ClientState) {
        tracing::trace!(%from, %to, "State changed");
    }

    fn on_connected(&mut self) {
        tracing::debug!("Transport connected");
    }

    fn on_ready(&mut self, server: &ServerInfo) {
        tracing::debug!(host = %server.hostname, extensions = server.extensions.len(), "READY");
    }

    fn on_authenticated(&mut self) {
        tracing::debug!("AUTHENTICATED");
    }

    fn on_mail_sent(&mut self, report: &SendReport) {
        tracing::debug!(
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            "SENT"
        );
    }

    fn on_disconnected(&mut self) {
        tracing::debug!("DISCONNECTED");
    }

    fn on_error(&mut self, error: &Error) {
        tracing::warn!(kind = ?error.kind(), code = ?error.code(), %error, "Session error");
    }
}

/// Notification delivered by [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// State transition.
    StateChanged {
        /// Previous state.
        from: ClientState,
        /// New state.
        to: ClientState,
    },
    /// Transport connected.
    Connected,
    /// Greeting exchange completed.
    Ready {
        /// Hostname from the greeting.
        hostname: String,
    },
    /// AUTH succeeded.
    Authenticated,
    /// Message accepted.
    MailSent(SendReport),
    /// Transport closed.
    Disconnected,
    /// An operation failed.
    Error {
        /// Classification.
        kind: ErrorKind,
        /// Server reply code, when the failure came from a reply.
        code: Option<u16>,
        /// Human-readable description.
        message: String,
    },
}

/// A handler that forwards events to a channel.
///
/// Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelHandler {
    /// Creates a handler and the receiver its events go to.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }
}

impl SessionHandler for ChannelHandler {
    fn on_state_changed(&mut self, from: ClientState, to: ClientState) {
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn on_connected(&mut self) {
        self.emit(SessionEvent::Connected);
    }

    fn on_ready(&mut self, server: &ServerInfo) {
        self.emit(SessionEvent::Ready {
            hostname: server.hostname.clone(),
        });
    }

    fn on_authenticated(&mut self) {
        self.emit(SessionEvent::Authenticated);
    }

    fn on_mail_sent(&mut self, report: &SendReport) {
        self.emit(SessionEvent::MailSent(report.clone()));
    }

    fn on_disconnected(&mut self) {
        self.emit(SessionEvent::Disconnected);
    }

    fn on_error(&mut self, error: &Error) {
        self.emit(SessionEvent::Error {
            kind: error.kind(),
            code: error.code(),
            message: error.to_string(),
        });
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

    #[test]
    fn test_noop_handler() {
        let mut handler = NoopHandler;
        handler.on_connected();
        handler.on_error(&Error::ConnectionClosed);
    }

    #[test]
    fn test_logging_handler() {
        let mut handler = LoggingHandler;
        handler.on_state_changed(ClientState::Unconnected, ClientState::Connecting);
        handler.on_ready(&ServerInfo::default());
        handler.on_mail_sent(&SendReport::default());
    }

    #[test]
    fn test_channel_handler_forwards() {
        let (mut handler, mut events) = ChannelHandler::new();
        handler.on_state_changed(ClientState::Ready, ClientState::Sending);
        handler.on_error(&Error::Client {
            code: 550,
            message: "no such user".to_string(),
        });

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::StateChanged {
                from: ClientState::Ready,
                to: ClientState::Sending
            }
        );
        let SessionEvent::Error {
            kind,
            code,
            message,
        } = events.try_recv().unwrap()
        else {
            panic!("expected error event");
        };
        assert_eq!(kind, ErrorKind::ClientError);
        assert_eq!(code, Some(550));
        assert!(message.contains("no such user"));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_channel_handler_survives_dropped_receiver() {
        let (mut handler, events) = ChannelHandler::new();
        drop(events);
        handler.on_authenticated();
    }
}
