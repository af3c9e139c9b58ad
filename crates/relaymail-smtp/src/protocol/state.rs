//! Session state types.
//!
//! Callers see the coarse [`ClientState`]. The protocol machine tracks a
//! finer `Phase` whose variants nest the micro-steps of the greeting,
//! STARTTLS, AUTH and mail-transaction exchanges.

/// Lifecycle position of a session.
///
/// The documented path is
/// `Unconnected → Connecting → Connected → Ready → {Authenticating → Ready | Sending → Ready} → Disconnecting → Unconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientState {
    /// No transport.
    #[default]
    Unconnected,
    /// Transport connect in progress.
    Connecting,
    /// Transport up; greeting, EHLO or STARTTLS in progress.
    Connected,
    /// Idle and able to authenticate or send.
    Ready,
    /// AUTH exchange in progress.
    Authenticating,
    /// Mail transaction in progress.
    Sending,
    /// QUIT sent, transport closing.
    Disconnecting,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Authenticating => "authenticating",
            Self::Sending => "sending",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Internal state, refining [`ClientState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Phase {
    #[default]
    Unconnected,
    Connecting,
    Connected(Handshake),
    Ready,
    Authenticating(AuthStep),
    Sending(MailStep),
    Disconnecting,
}

impl Phase {
    pub(crate) const fn client_state(&self) -> ClientState {
        match self {
            Self::Unconnected => ClientState::Unconnected,
            Self::Connecting => ClientState::Connecting,
            Self::Connected(_) => ClientState::Connected,
            Self::Ready => ClientState::Ready,
            Self::Authenticating(_) => ClientState::Authenticating,
            Self::Sending(_) => ClientState::Sending,
            Self::Disconnecting => ClientState::Disconnecting,
        }
    }
}

/// Greeting and STARTTLS steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handshake {
    /// Waiting for the 220 banner.
    Greeting,
    /// EHLO sent.
    Ehlo,
    /// EHLO refused, HELO sent.
    Helo,
    /// STARTTLS sent.
    StartTls,
    /// 220 to STARTTLS received, transport upgrading.
    Encrypting,
    /// EHLO re-issued over the upgraded channel.
    TlsEhlo,
    /// Post-upgrade EHLO refused, HELO sent.
    TlsHelo,
}

impl Handshake {
    /// True for the steps of the STARTTLS exchange, where every failure is a
    /// transport failure.
    pub(crate) const fn in_starttls(self) -> bool {
        matches!(
            self,
            Self::StartTls | Self::Encrypting | Self::TlsEhlo | Self::TlsHelo
        )
    }
}

/// AUTH steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthStep {
    /// `AUTH PLAIN <initial-response>` sent.
    Plain,
    /// `AUTH LOGIN` sent.
    Login,
    /// Username sent after the first 334.
    LoginUser,
    /// Password sent after the second 334.
    LoginPassword,
}

/// Mail transaction steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MailStep {
    MailFrom,
    /// `RCPT TO` for the recipient at this index sent.
    Recipient(usize),
    Data,
    /// Payload and terminator sent.
    Body,
    /// RSET sent after a failed transaction.
    Reset,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unconnected() {
        assert_eq!(Phase::default().client_state(), ClientState::Unconnected);
        assert_eq!(ClientState::default(), ClientState::Unconnected);
    }

    #[test]
    fn test_sub_states_collapse() {
        assert_eq!(
            Phase::Connected(Handshake::Encrypting).client_state(),
            ClientState::Connected
        );
        assert_eq!(
            Phase::Authenticating(AuthStep::LoginPassword).client_state(),
            ClientState::Authenticating
        );
        assert_eq!(
            Phase::Sending(MailStep::Recipient(3)).client_state(),
            ClientState::Sending
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ClientState::Ready.to_string(), "ready");
        assert_eq!(ClientState::Disconnecting.to_string(), "disconnecting");
    }
}
