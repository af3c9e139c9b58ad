//! Incremental SMTP reply reader.
//!
//! SMTP replies can be single-line or multi-line:
//! - Single: `250 OK\r\n`
//! - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
//!
//! Bytes arrive from the transport in arbitrary chunks. [`ResponseReader`]
//! buffers them, cuts complete lines, and hands out one [`Reply`] once the
//! final line of a reply has been seen.

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Maximum line length to prevent memory exhaustion.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// One parsed reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReplyLine {
    code: ReplyCode,
    last: bool,
    text: String,
}

/// Accumulates transport bytes into complete replies.
#[derive(Debug)]
pub struct ResponseReader {
    buffer: BytesMut,
    /// Lines of the reply currently being assembled.
    pending: Vec<ReplyLine>,
}

impl Default for ResponseReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseReader {
    /// Creates an empty reader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            pending: Vec::new(),
        }
    }

    /// Appends received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete reply, or `None` if more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedReply`] for a line that is not a valid reply
    /// line, or when an unterminated line grows past [`MAX_LINE_LENGTH`].
    /// The offending bytes are discarded so the reader can be reused.
    pub fn next_reply(&mut self) -> Result<Option<Reply>> {
        while let Some(raw) = self.take_line() {
            if raw.is_empty() {
                continue;
            }

            let line = match parse_line(&raw) {
                Ok(line) => line,
                Err(e) => {
                    self.pending.clear();
                    return Err(e);
                }
            };

            if let Some(first) = self.pending.first()
                && first.code != line.code
            {
                let expected = first.code;
                self.pending.clear();
                return Err(Error::MalformedReply(format!(
                    "code changed from {expected} to {} inside a multi-line reply",
                    line.code
                )));
            }

            let last = line.last;
            self.pending.push(line);

            if last {
                let lines = std::mem::take(&mut self.pending);
                let code = lines[0].code;
                let message = lines.into_iter().map(|l| l.text).collect();
                return Ok(Some(Reply::new(code, message)));
            }
        }

        if self.buffer.len() > MAX_LINE_LENGTH {
            self.clear();
            return Err(Error::MalformedReply("line too long".to_string()));
        }

        Ok(None)
    }

    /// Returns true if bytes or partial reply lines are buffered.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.pending.is_empty()
    }

    /// Drops everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending.clear();
    }

    /// Cuts one LF-terminated line off the buffer, without CR/LF.
    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line = self.buffer.split_to(pos);
        self.buffer.advance(1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Parses `NNN`, `NNN text` or `NNN-text`.
fn parse_line(line: &str) -> Result<ReplyLine> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(Error::MalformedReply(format!("Invalid reply line: {line}")));
    }

    let code = line[..3]
        .parse::<u16>()
        .map_err(|_| Error::MalformedReply(format!("Invalid reply code: {line}")))?;
    if !(100..600).contains(&code) {
        return Err(Error::MalformedReply(format!("Reply code out of range: {code}")));
    }

    let last = match bytes.get(3) {
        None | Some(b' ') => true,
        Some(b'-') => false,
        Some(_) => {
            return Err(Error::MalformedReply(format!(
                "Invalid separator in reply line: {line}"
            )));
        }
    };

    Ok(ReplyLine {
        code: ReplyCode::new(code),
        last,
        text: line.get(4..).unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn read_all(input: &[u8]) -> Result<Option<Reply>> {
        let mut reader = ResponseReader::new();
        reader.feed(input);
        reader.next_reply()
    }

    #[test]
    fn test_single_line_reply() {
        let reply = read_all(b"250 OK\r\n").unwrap().unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.message, vec!["OK"]);
    }

    #[test]
    fn test_multi_line_reply() {
        let reply = read_all(b"250-smtp.example.com\r\n250-SIZE 100\r\n250 PIPELINING\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(
            reply.message,
            vec!["smtp.example.com", "SIZE 100", "PIPELINING"]
        );
    }

    #[test]
    fn test_bare_code_line() {
        let reply = read_all(b"250\r\n").unwrap().unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.message, vec![""]);
    }

    #[test]
    fn test_bare_lf_accepted() {
        let reply = read_all(b"220 ready\n").unwrap().unwrap();
        assert_eq!(reply.message_text(), "ready");
    }

    #[test]
    fn test_incomplete_line_is_buffered() {
        let mut reader = ResponseReader::new();
        reader.feed(b"220 smtp.exa");
        assert!(reader.next_reply().unwrap().is_none());
        assert!(reader.has_pending());
        reader.feed(b"mple.com ESMTP\r\n");
        let reply = reader.next_reply().unwrap().unwrap();
        assert_eq!(reply.message_text(), "smtp.example.com ESMTP");
        assert!(!reader.has_pending());
    }

    #[test]
    fn test_incomplete_multi_line_is_buffered() {
        let mut reader = ResponseReader::new();
        reader.feed(b"250-SIZE 100\r\n");
        assert!(reader.next_reply().unwrap().is_none());
        reader.feed(b"250 PIPELINING\r\n");
        let reply = reader.next_reply().unwrap().unwrap();
        assert_eq!(reply.message_text(), "SIZE 100\nPIPELINING");
    }

    #[test]
    fn test_two_replies_in_one_chunk() {
        let mut reader = ResponseReader::new();
        reader.feed(b"250 first\r\n354 second\r\n");
        assert_eq!(reader.next_reply().unwrap().unwrap().code.as_u16(), 250);
        assert_eq!(reader.next_reply().unwrap().unwrap().code.as_u16(), 354);
        assert!(reader.next_reply().unwrap().is_none());
    }

    #[test]
    fn test_blank_lines_skipped() {
        let reply = read_all(b"\r\n250 OK\r\n").unwrap().unwrap();
        assert_eq!(reply.code.as_u16(), 250);
    }

    #[test]
    fn test_malformed_lines() {
        assert!(read_all(b"25\r\n").is_err());
        assert!(read_all(b"ABC OK\r\n").is_err());
        assert!(read_all(b"250_OK\r\n").is_err());
        assert!(read_all(b"099 low\r\n").is_err());
        assert!(read_all(b"600 high\r\n").is_err());
    }

    #[test]
    fn test_code_mismatch_in_multi_line() {
        let err = read_all(b"250-first\r\n251 second\r\n").unwrap_err();
        assert!(matches!(err, Error::MalformedReply(_)));
    }

    #[test]
    fn test_reader_recovers_after_error() {
        let mut reader = ResponseReader::new();
        reader.feed(b"garbage\r\n250 OK\r\n");
        assert!(reader.next_reply().is_err());
        assert_eq!(reader.next_reply().unwrap().unwrap().code.as_u16(), 250);
    }

    #[test]
    fn test_line_length_limit() {
        let mut reader = ResponseReader::new();
        reader.feed("2".repeat(MAX_LINE_LENGTH + 1).as_bytes());
        let err = reader.next_reply().unwrap_err();
        assert!(err.to_string().contains("line too long"));
        assert!(!reader.has_pending());
    }

    proptest! {
        #[test]
        fn split_ehlo_reply_reassembles(offset in 0usize..30) {
            let input: &[u8] = b"250-SIZE 100\r\n250 PIPELINING\r\n";
            let mut reader = ResponseReader::new();

            reader.feed(&input[..offset]);
            let early = reader.next_reply().unwrap();
            prop_assert!(early.is_none());

            reader.feed(&input[offset..]);
            let reply = reader.next_reply().unwrap().unwrap();
            prop_assert_eq!(reply.code.as_u16(), 250);
            prop_assert_eq!(reply.message_text(), "SIZE 100\nPIPELINING");
            prop_assert!(reader.next_reply().unwrap().is_none());
        }

        #[test]
        fn byte_at_a_time_matches_whole(text in "[a-zA-Z0-9 .]{0,40}") {
            let input = format!("220-{text}\r\n220 done\r\n");
            let mut reader = ResponseReader::new();
            let mut replies = Vec::new();
            for byte in input.as_bytes() {
                reader.feed(std::slice::from_ref(byte));
                if let Some(reply) = reader.next_reply().unwrap() {
                    replies.push(reply);
                }
            }
            prop_assert_eq!(replies.len(), 1);
            prop_assert_eq!(&replies[0].message[0], &text);
        }
    }
}
