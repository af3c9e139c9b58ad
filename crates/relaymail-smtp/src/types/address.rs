//! Envelope address type.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Email address for the SMTP envelope.
///
/// Syntax is left to the server. The only characters refused are the ones
/// that would break the command line (`CR`, `LF`, `<`, `>`). An empty address
/// is accepted and serializes as the null reverse-path `<>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address contains characters that cannot appear
    /// inside `<...>` on a command line.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        if let Some(bad) = addr.chars().find(|c| matches!(c, '\r' | '\n' | '<' | '>')) {
            return Err(Error::InvalidAddress(format!(
                "{addr:?} contains forbidden character {bad:?}"
            )));
        }
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert_eq!(addr.to_string(), "user@example.com");
    }

    #[test]
    fn test_syntax_is_not_checked() {
        assert!(Address::new("postmaster").is_ok());
        assert!(Address::new("").is_ok());
    }

    #[test]
    fn test_line_breaks_rejected() {
        assert!(Address::new("a@b.c\r\nRCPT TO:<x@y.z>").is_err());
        assert!(Address::new("a@b.c\n").is_err());
    }

    #[test]
    fn test_angle_brackets_rejected() {
        assert!(Address::new("<user@example.com>").is_err());
    }

    #[test]
    fn test_parse() {
        let addr: Address = "user@example.com".parse().unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
    }

    #[test]
    fn test_serde_validates() {
        let addr: Address = serde_json::from_str("\"user@example.com\"").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert!(serde_json::from_str::<Address>("\"bad\\r\\n\"").is_err());
    }
}
