//! SMTP command builder.

use crate::types::{Address, AuthMethod};

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        method: AuthMethod,
        /// Initial response (base64, for PLAIN)
        initial_response: Option<String>,
    },
    /// Base64 answer to a 334 challenge
    AuthResponse(String),
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: Address,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Serializes the command to bytes, CRLF included.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        match self {
            Self::Helo { hostname } => {
                buf.extend_from_slice(b"HELO ");
                buf.extend_from_slice(hostname.as_bytes());
            }
            Self::Ehlo { hostname } => {
                buf.extend_from_slice(b"EHLO ");
                buf.extend_from_slice(hostname.as_bytes());
            }
            Self::StartTls => {
                buf.extend_from_slice(b"STARTTLS");
            }
            Self::Auth {
                method,
                initial_response,
            } => {
                buf.extend_from_slice(b"AUTH ");
                buf.extend_from_slice(method.as_str().as_bytes());
                if let Some(resp) = initial_response {
                    buf.push(b' ');
                    buf.extend_from_slice(resp.as_bytes());
                }
            }
            Self::AuthResponse(resp) => {
                buf.extend_from_slice(resp.as_bytes());
            }
            Self::MailFrom { from } => {
                buf.extend_from_slice(b"MAIL FROM:<");
                buf.extend_from_slice(from.as_str().as_bytes());
                buf.push(b'>');
            }
            Self::RcptTo { to } => {
                buf.extend_from_slice(b"RCPT TO:<");
                buf.extend_from_slice(to.as_str().as_bytes());
                buf.push(b'>');
            }
            Self::Data => {
                buf.extend_from_slice(b"DATA");
            }
            Self::Rset => {
                buf.extend_from_slice(b"RSET");
            }
            Self::Quit => {
                buf.extend_from_slice(b"QUIT");
            }
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns the command line for logs, with credentials masked.
    #[must_use]
    pub fn redacted(&self) -> String {
        match self {
            Self::Auth {
                method,
                initial_response: Some(_),
            } => format!("AUTH {method} <redacted>"),
            Self::AuthResponse(_) => "<redacted>".to_string(),
            _ => {
                let line = self.serialize();
                String::from_utf8_lossy(&line[..line.len() - 2]).into_owned()
            }
        }
    }
}

/// Encodes a message body for transmission after `DATA`.
///
/// Line endings are normalized to CRLF, lines starting with `.` are
/// dot-stuffed (RFC 5321 section 4.5.2), and the `.` terminator line is
/// appended.
#[must_use]
pub fn encode_payload(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 64 + 5);

    let body = message.strip_suffix(b"\n").unwrap_or(message);
    if !message.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_commands() {
        let cmd = Command::Ehlo {
            hostname: "client.example.com".to_string(),
        };
        assert_eq!(cmd.serialize(), b"EHLO client.example.com\r\n");
        let cmd = Command::Helo {
            hostname: "client.example.com".to_string(),
        };
        assert_eq!(cmd.serialize(), b"HELO client.example.com\r\n");
    }

    #[test]
    fn test_auth_plain() {
        let cmd = Command::Auth {
            method: AuthMethod::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(cmd.serialize(), b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n");
        assert_eq!(cmd.redacted(), "AUTH PLAIN <redacted>");
    }

    #[test]
    fn test_auth_login() {
        let cmd = Command::Auth {
            method: AuthMethod::Login,
            initial_response: None,
        };
        assert_eq!(cmd.serialize(), b"AUTH LOGIN\r\n");
        assert_eq!(cmd.redacted(), "AUTH LOGIN");

        let answer = Command::AuthResponse("dXNlcg==".to_string());
        assert_eq!(answer.serialize(), b"dXNlcg==\r\n");
        assert_eq!(answer.redacted(), "<redacted>");
    }

    #[test]
    fn test_envelope_commands() {
        let cmd = Command::MailFrom {
            from: Address::new("sender@example.com").unwrap(),
        };
        assert_eq!(cmd.serialize(), b"MAIL FROM:<sender@example.com>\r\n");
        let cmd = Command::RcptTo {
            to: Address::new("recipient@example.com").unwrap(),
        };
        assert_eq!(cmd.serialize(), b"RCPT TO:<recipient@example.com>\r\n");
        assert_eq!(cmd.redacted(), "RCPT TO:<recipient@example.com>");
    }

    #[test]
    fn test_null_reverse_path() {
        let cmd = Command::MailFrom {
            from: Address::new("").unwrap(),
        };
        assert_eq!(cmd.serialize(), b"MAIL FROM:<>\r\n");
    }

    #[test]
    fn test_bare_commands() {
        assert_eq!(Command::StartTls.serialize(), b"STARTTLS\r\n");
        assert_eq!(Command::Data.serialize(), b"DATA\r\n");
        assert_eq!(Command::Rset.serialize(), b"RSET\r\n");
        assert_eq!(Command::Quit.serialize(), b"QUIT\r\n");
    }

    #[test]
    fn test_payload_crlf_terminated() {
        let out = encode_payload(b"Subject: Hi\r\n\r\nHello\r\n");
        assert_eq!(out, b"Subject: Hi\r\n\r\nHello\r\n.\r\n");
    }

    #[test]
    fn test_payload_normalizes_lf() {
        let out = encode_payload(b"Subject: Hi\n\nHello");
        assert_eq!(out, b"Subject: Hi\r\n\r\nHello\r\n.\r\n");
    }

    #[test]
    fn test_payload_dot_stuffing() {
        let out = encode_payload(b"line\r\n.hidden\r\n..two\r\n");
        assert_eq!(out, b"line\r\n..hidden\r\n...two\r\n.\r\n");
    }

    #[test]
    fn test_payload_empty() {
        assert_eq!(encode_payload(b""), b".\r\n");
    }
}
