//! EHLO extensions and authentication methods.

use serde::{Deserialize, Serialize};

/// Service extension advertised in an EHLO reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS (RFC 3207)
    StartTls,
    /// AUTH (RFC 4954), with the mechanisms this client can use
    Auth(Vec<AuthMethod>),
    /// SIZE (RFC 1870), with the optional fixed limit
    Size(Option<usize>),
    /// 8BITMIME
    EightBitMime,
    /// PIPELINING
    Pipelining,
    /// SMTPUTF8
    SmtpUtf8,
    /// DSN
    Dsn,
    /// Anything else, verbatim
    Unknown(String),
}

impl Extension {
    /// Parses one line of an EHLO reply (after the code).
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else {
            return Self::Unknown(line.to_string());
        };

        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(parts.filter_map(AuthMethod::parse).collect()),
            "SIZE" => Self::Size(parts.next().and_then(|s| s.parse().ok())),
            "8BITMIME" => Self::EightBitMime,
            "PIPELINING" => Self::Pipelining,
            "SMTPUTF8" => Self::SmtpUtf8,
            "DSN" => Self::Dsn,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// SASL mechanism used by `login`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// PLAIN: credentials in a single `AUTH PLAIN` line.
    Plain,
    /// LOGIN: username and password sent as answers to two 334 challenges.
    #[default]
    Login,
}

impl AuthMethod {
    /// Parses a mechanism name; mechanisms this client cannot speak yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if s.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    /// Returns the mechanism name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    mod extension_parse_tests {
        use super::*;

        #[test]
        fn parse_starttls_any_case() {
            assert_eq!(Extension::parse("STARTTLS"), Extension::StartTls);
            assert_eq!(Extension::parse("starttls"), Extension::StartTls);
        }

        #[test]
        fn parse_auth_keeps_known_mechanisms() {
            assert_eq!(
                Extension::parse("AUTH PLAIN LOGIN CRAM-MD5 XOAUTH2"),
                Extension::Auth(vec![AuthMethod::Plain, AuthMethod::Login])
            );
        }

        #[test]
        fn parse_size() {
            assert_eq!(
                Extension::parse("SIZE 52428800"),
                Extension::Size(Some(52_428_800))
            );
            assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
        }

        #[test]
        fn parse_flags() {
            assert_eq!(Extension::parse("8BITMIME"), Extension::EightBitMime);
            assert_eq!(Extension::parse("PIPELINING"), Extension::Pipelining);
            assert_eq!(Extension::parse("SMTPUTF8"), Extension::SmtpUtf8);
            assert_eq!(Extension::parse("DSN"), Extension::Dsn);
        }

        #[test]
        fn parse_unknown_and_empty() {
            assert_eq!(
                Extension::parse("X-CUSTOM 1"),
                Extension::Unknown("X-CUSTOM 1".to_string())
            );
            assert!(matches!(Extension::parse(""), Extension::Unknown(_)));
        }
    }

    mod auth_method_tests {
        use super::*;

        #[test]
        fn parse() {
            assert_eq!(AuthMethod::parse("plain"), Some(AuthMethod::Plain));
            assert_eq!(AuthMethod::parse("LOGIN"), Some(AuthMethod::Login));
            assert_eq!(AuthMethod::parse("CRAM-MD5"), None);
        }

        #[test]
        fn default_is_login() {
            assert_eq!(AuthMethod::default(), AuthMethod::Login);
        }

        #[test]
        fn serde_lowercase() {
            let json = serde_json::to_string(&AuthMethod::Plain).unwrap();
            assert_eq!(json, "\"plain\"");
            let method: AuthMethod = serde_json::from_str("\"login\"").unwrap();
            assert_eq!(method, AuthMethod::Login);
        }
    }
}
