//! # relaymail-smtp
//!
//! An SMTP client session: connect to a relay, optionally upgrade to TLS,
//! authenticate and hand over messages, tracking every reply on the way.
//!
//! ## Features
//!
//! - **Sans-I/O core**: [`protocol::Protocol`] is a pure state machine; the
//!   async [`Session`] only moves bytes and enforces timeouts
//! - **Security modes**: plaintext (port 25), implicit TLS (port 465) and
//!   STARTTLS (port 587)
//! - **Authentication**: AUTH PLAIN and AUTH LOGIN
//! - **Pluggable transport**: anything implementing [`Transport`]
//! - **Notifications**: [`SessionHandler`] callbacks or a [`ChannelHandler`]
//!   event stream
//! - **Blocking API**: [`BlockingSession`] for synchronous callers
//!
//! ## Quick Start
//!
//! ```ignore
//! use relaymail_smtp::{Address, AuthMethod, ConnectionType, Message, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> relaymail_smtp::Result<()> {
//!     let config = SessionConfig::builder("smtp.example.com")
//!         .connection_type(ConnectionType::StartTls)
//!         .client_name("client.example.com")
//!         .build();
//!
//!     let mut session = Session::new(config);
//!     session.connect().await?;
//!     session.login("user@example.com", "password", AuthMethod::Plain).await?;
//!
//!     let message = Message::new(
//!         Address::new("sender@example.com")?,
//!         "Subject: Test\r\n\r\nHello, World!\r\n",
//!     )
//!     .to(Address::new("recipient@example.com")?);
//!
//!     let report = session.send_mail(&message).await?;
//!     println!("accepted: {:?}", report.accepted);
//!
//!     session.quit().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Unconnected ── connect() ──→ Connecting ──→ Connected ──→ Ready
//!                                  (greeting, EHLO, STARTTLS)  │
//!        ┌──────────────── login() ─── Authenticating ←────────┤
//!        │                                                     │
//!        ├──────────────── send_mail() ─── Sending ←───────────┤
//!        ↓                                                     │
//!      Ready ── quit() ──→ Disconnecting ──→ Unconnected ←─────┘
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP command serialization and payload encoding
//! - [`parser`]: Incremental reply reader
//! - [`protocol`]: Sans-I/O state machine
//! - [`session`]: Async and blocking session drivers
//! - [`transport`]: Transport trait and the TCP/TLS implementation
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
mod error;
pub mod message;
pub mod parser;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use message::{Envelope, MailSource, Message};
pub use protocol::{ClientState, RejectedRecipient, SendReport, ServerInfo};
pub use session::{
    BlockingSession, ChannelHandler, ConnectionType, Credentials, LoggingHandler, NoopHandler,
    Session, SessionConfig, SessionConfigBuilder, SessionEvent, SessionHandler,
};
pub use transport::{TcpTransport, Transport, TransportEvent};
pub use types::{Address, AuthMethod, Extension, Reply, ReplyCode};
