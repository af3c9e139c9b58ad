//! Error types for SMTP sessions.

use std::io;
use std::time::Duration;

use crate::types::Reply;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], as reported to event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transport did not connect (or finish its TLS handshake) in time.
    ConnectionTimeout,
    /// No complete reply arrived within the response timeout.
    ResponseTimeout,
    /// The server rejected the credentials or broke the AUTH exchange.
    AuthenticationFailed,
    /// Transient (4xx), unexpected or malformed server reply.
    ServerError,
    /// Permanent (5xx) server reply.
    ClientError,
    /// Transport-level failure: I/O, TLS, closed socket, refused STARTTLS.
    SocketError,
    /// Operation invoked from a state that does not allow it.
    InvalidState,
    /// Caller supplied unusable input (address, recipients, credentials).
    InvalidInput,
}

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport connection did not complete within the connection timeout.
    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// No reply within the response timeout.
    #[error("No response within {0:?}")]
    ResponseTimeout(Duration),

    /// Authentication rejected by the server.
    #[error("Authentication failed {code}: {message}")]
    AuthenticationFailed {
        /// Reply code (e.g., 535).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Server returned a transient (4xx) or unexpected reply.
    #[error("Server error {code}: {message}")]
    Server {
        /// Reply code (e.g., 451).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Server returned a permanent (5xx) reply.
    #[error("Client error {code}: {message}")]
    Client {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Reply could not be parsed.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// Server refused STARTTLS or the EHLO/HELO that follows the upgrade.
    #[error("STARTTLS rejected {code}: {message}")]
    StartTlsRejected {
        /// Reply code.
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// STARTTLS exchange broke down without a usable reply.
    #[error("STARTTLS failed: {0}")]
    StartTlsFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host name is not usable as a TLS server name.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Server closed the connection.
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Caller input rejected before anything was sent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid state for operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// Builds the error for a negative reply by its class: 5xx is a client
    /// error, everything else (4xx, unexpected codes) a server error.
    #[must_use]
    pub fn from_reply(reply: &Reply) -> Self {
        let code = reply.code.as_u16();
        let message = reply.message_text();
        if reply.is_permanent_error() {
            Self::Client { code, message }
        } else {
            Self::Server { code, message }
        }
    }

    /// Builds an authentication failure from a reply.
    #[must_use]
    pub fn auth_failed(reply: &Reply) -> Self {
        Self::AuthenticationFailed {
            code: reply.code.as_u16(),
            message: reply.message_text(),
        }
    }

    /// Builds the error for a reply refused inside the STARTTLS exchange.
    #[must_use]
    pub fn starttls_rejected(reply: &Reply) -> Self {
        Self::StartTlsRejected {
            code: reply.code.as_u16(),
            message: reply.message_text(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionTimeout(_) => ErrorKind::ConnectionTimeout,
            Self::ResponseTimeout(_) => ErrorKind::ResponseTimeout,
            Self::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            Self::Server { .. } | Self::MalformedReply(_) => ErrorKind::ServerError,
            Self::Client { .. } => ErrorKind::ClientError,
            Self::StartTlsRejected { .. }
            | Self::StartTlsFailed(_)
            | Self::Io(_)
            | Self::Tls(_)
            | Self::InvalidDnsName(_)
            | Self::ConnectionClosed => ErrorKind::SocketError,
            Self::InvalidAddress(_) | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::InvalidState(_) => ErrorKind::InvalidState,
        }
    }

    /// Returns the server reply code carried by this error, if any.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::AuthenticationFailed { code, .. }
            | Self::Server { code, .. }
            | Self::Client { code, .. }
            | Self::StartTlsRejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.code().is_some_and(|code| (500..600).contains(&code))
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.code().is_some_and(|code| (400..500).contains(&code))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::types::ReplyCode;

    fn reply(code: u16, text: &str) -> Reply {
        Reply::new(ReplyCode::new(code), vec![text.to_string()])
    }

    #[test]
    fn test_from_reply_by_class() {
        let err = Error::from_reply(&reply(451, "try later"));
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert!(err.is_transient());

        let err = Error::from_reply(&reply(550, "no such user"));
        assert_eq!(err.kind(), ErrorKind::ClientError);
        assert!(err.is_permanent());
        assert_eq!(err.code(), Some(550));
    }

    #[test]
    fn test_unexpected_positive_reply_is_server_error() {
        let err = Error::from_reply(&reply(250, "odd"));
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert!(!err.is_transient());
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_auth_failed_keeps_code() {
        let err = Error::auth_failed(&reply(535, "bad credentials"));
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert_eq!(err.code(), Some(535));
        assert!(err.to_string().contains("bad credentials"));
    }

    #[test]
    fn test_socket_kinds() {
        assert_eq!(Error::ConnectionClosed.kind(), ErrorKind::SocketError);
        let io = Error::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(io.kind(), ErrorKind::SocketError);
        let tls = Error::StartTlsRejected {
            code: 454,
            message: "TLS not available".into(),
        };
        assert_eq!(tls.kind(), ErrorKind::SocketError);
        assert_eq!(tls.code(), Some(454));
    }

    #[test]
    fn test_starttls_refusal_keeps_reply() {
        let err = Error::starttls_rejected(&reply(554, "no EHLO for you"));
        assert_eq!(err.kind(), ErrorKind::SocketError);
        assert_eq!(err.code(), Some(554));
        assert!(err.is_permanent());
        assert!(err.to_string().contains("no EHLO for you"));

        let err = Error::StartTlsFailed("handshake timed out".into());
        assert_eq!(err.kind(), ErrorKind::SocketError);
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_timeouts_have_no_code() {
        let err = Error::ResponseTimeout(Duration::from_secs(5));
        assert_eq!(err.kind(), ErrorKind::ResponseTimeout);
        assert_eq!(err.code(), None);
        assert_eq!(
            Error::ConnectionTimeout(Duration::from_secs(1)).kind(),
            ErrorKind::ConnectionTimeout
        );
    }
}
