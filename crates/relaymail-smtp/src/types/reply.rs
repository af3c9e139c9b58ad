//! SMTP reply types.

/// One complete SMTP reply, possibly assembled from several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Text of each reply line, without the code and separator.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Returns true if this is a positive completion reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient_error(&self) -> bool {
        self.code.is_transient()
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code.is_permanent()
    }

    /// Returns the text of all lines joined with `\n`.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.message.join(" / "))
    }
}

/// Reply class, the hundreds digit of a reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// 1xx.
    Informational,
    /// 2xx.
    PositiveCompletion,
    /// 3xx.
    PositiveIntermediate,
    /// 4xx.
    TransientNegative,
    /// 5xx.
    PermanentNegative,
    /// Anything outside 100..=599.
    Unknown,
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the reply class.
    #[must_use]
    pub const fn class(self) -> ReplyClass {
        match self.0 / 100 {
            1 => ReplyClass::Informational,
            2 => ReplyClass::PositiveCompletion,
            3 => ReplyClass::PositiveIntermediate,
            4 => ReplyClass::TransientNegative,
            5 => ReplyClass::PermanentNegative,
            _ => ReplyClass::Unknown,
        }
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self.class(), ReplyClass::PositiveCompletion)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self.class(), ReplyClass::TransientNegative)
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        matches!(self.class(), ReplyClass::PermanentNegative)
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        matches!(self.class(), ReplyClass::PositiveIntermediate)
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Codes the session state machine waits for
impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);
    /// 550 Mailbox unavailable (not found, access denied)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 554 Transaction failed
    pub const TRANSACTION_FAILED: Self = Self(554);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    mod reply_code_tests {
        use super::*;

        #[test]
        fn classes() {
            assert_eq!(ReplyCode::new(101).class(), ReplyClass::Informational);
            assert_eq!(ReplyCode::OK.class(), ReplyClass::PositiveCompletion);
            assert_eq!(
                ReplyCode::START_DATA.class(),
                ReplyClass::PositiveIntermediate
            );
            assert_eq!(
                ReplyCode::SERVICE_UNAVAILABLE.class(),
                ReplyClass::TransientNegative
            );
            assert_eq!(
                ReplyCode::AUTH_FAILED.class(),
                ReplyClass::PermanentNegative
            );
            assert_eq!(ReplyCode::new(999).class(), ReplyClass::Unknown);
            assert_eq!(ReplyCode::new(42).class(), ReplyClass::Unknown);
        }

        #[test]
        fn predicates() {
            assert!(ReplyCode::new(235).is_success());
            assert!(ReplyCode::AUTH_CONTINUE.is_intermediate());
            assert!(ReplyCode::SERVICE_UNAVAILABLE.is_transient());
            assert!(ReplyCode::AUTH_FAILED.is_permanent());
            assert!(!ReplyCode::OK.is_transient());
            assert!(!ReplyCode::OK.is_permanent());
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", ReplyCode::OK), "250");
            assert_eq!(ReplyCode::TRANSACTION_FAILED.as_u16(), 554);
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn message_text_multiple_lines() {
            let reply = Reply::new(
                ReplyCode::OK,
                vec!["SIZE 100".to_string(), "PIPELINING".to_string()],
            );
            assert_eq!(reply.message_text(), "SIZE 100\nPIPELINING");
            assert_eq!(reply.to_string(), "250 SIZE 100 / PIPELINING");
        }

        #[test]
        fn message_text_empty() {
            let reply = Reply::new(ReplyCode::OK, vec![]);
            assert_eq!(reply.message_text(), "");
        }

        #[test]
        fn error_predicates() {
            let reply = Reply::new(ReplyCode::MAILBOX_UNAVAILABLE, vec!["no".into()]);
            assert!(reply.is_permanent_error());
            assert!(!reply.is_transient_error());
            assert!(!reply.is_success());
        }
    }
}
