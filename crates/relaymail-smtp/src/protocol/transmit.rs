//! Outgoing protocol data.

use crate::command::{Command, encode_payload};

/// Bytes the driver must write to the transport, in order.
///
/// The protocol layer produces these; the I/O layer sends them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Raw bytes to send to the server.
    pub data: Vec<u8>,
    /// Log-safe description of the data.
    pub label: String,
}

impl Transmit {
    /// Serializes a command line.
    #[must_use]
    pub fn command(cmd: &Command) -> Self {
        Self {
            data: cmd.serialize(),
            label: cmd.redacted(),
        }
    }

    /// Encodes a message body with its end-of-data terminator.
    #[must_use]
    pub fn payload(content: &[u8]) -> Self {
        let data = encode_payload(content);
        let label = format!("<{} bytes of message data>", data.len());
        Self { data, label }
    }
}

impl AsRef<[u8]> for Transmit {
    fn as_ref(&self) -> &[u8] {
        &self.data
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
    fn test_command_transmit() {
        let t = Transmit::command(&Command::Quit);
        assert_eq!(t.data, b"QUIT\r\n");
        assert_eq!(t.label, "QUIT");
    }

    #[test]
    fn test_payload_transmit() {
        let t = Transmit::payload(b"Subject: x\r\n\r\nhi\r\n");
        assert_eq!(t.data, b"Subject: x\r\n\r\nhi\r\n.\r\n");
        assert_eq!(t.label, "<22 bytes of message data>");
        assert_eq!(t.as_ref().len(), 22);
    }
}
