//! Message envelope and payload.
//!
//! The session does not build messages. Anything that can name a sender,
//! recipients, and hand over the finished RFC 5322 bytes implements
//! [`MailSource`]; [`Message`] is the plain value type shipped with the crate.

use crate::types::Address;

/// Sender and recipients of one mail transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Reverse-path for `MAIL FROM`.
    pub from: Address,
    /// Primary recipients.
    pub to: Vec<Address>,
    /// Carbon-copy recipients.
    pub cc: Vec<Address>,
    /// Blind carbon-copy recipients.
    pub bcc: Vec<Address>,
}

impl Envelope {
    /// Creates an envelope with a sender and no recipients.
    #[must_use]
    pub const fn new(from: Address) -> Self {
        Self {
            from,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
        }
    }

    /// Returns all recipients (to, cc, bcc), in that order.
    pub fn recipients(&self) -> impl Iterator<Item = &Address> {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }

    /// Returns the number of `RCPT TO` commands this envelope produces.
    #[must_use]
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }
}

/// Producer of one message: its envelope and its header+body bytes.
pub trait MailSource {
    /// Returns the envelope.
    fn envelope(&self) -> Envelope;

    /// Returns the complete message (headers, blank line, body).
    fn content(&self) -> &[u8];
}

/// A ready-to-send message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    envelope: Envelope,
    content: Vec<u8>,
}

impl Message {
    /// Creates a message from a sender and the formatted content.
    #[must_use]
    pub fn new(from: Address, content: impl Into<Vec<u8>>) -> Self {
        Self {
            envelope: Envelope::new(from),
            content: content.into(),
        }
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, recipient: Address) -> Self {
        self.envelope.to.push(recipient);
        self
    }

    /// Adds a CC recipient.
    #[must_use]
    pub fn cc(mut self, recipient: Address) -> Self {
        self.envelope.cc.push(recipient);
        self
    }

    /// Adds a BCC recipient.
    #[must_use]
    pub fn bcc(mut self, recipient: Address) -> Self {
        self.envelope.bcc.push(recipient);
        self
    }
}

impl MailSource for Message {
    fn envelope(&self) -> Envelope {
        self.envelope.clone()
    }

    fn content(&self) -> &[u8] {
        &self.content
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    #[test]
    fn test_recipients_flatten_in_order() {
        let message = Message::new(addr("me@example.com"), "Subject: x\r\n\r\nbody")
            .bcc(addr("hidden@example.com"))
            .to(addr("a@example.com"))
            .cc(addr("c@example.com"))
            .to(addr("b@example.com"));

        let envelope = message.envelope();
        let all: Vec<&str> = envelope.recipients().map(Address::as_str).collect();
        assert_eq!(
            all,
            vec![
                "a@example.com",
                "b@example.com",
                "c@example.com",
                "hidden@example.com"
            ]
        );
        assert_eq!(envelope.recipient_count(), 4);
    }

    #[test]
    fn test_content_is_untouched() {
        let message = Message::new(addr("me@example.com"), "Subject: x\n\nbody");
        assert_eq!(message.content(), b"Subject: x\n\nbody");
        assert_eq!(message.envelope().from.as_str(), "me@example.com");
    }
}
