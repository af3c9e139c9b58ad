//! Session configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::AuthMethod;

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default response timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// No encryption (port 25). **Not recommended for production.**
    #[default]
    Plain,
    /// TLS from the start (port 465).
    ImplicitTls,
    /// Start with plaintext, upgrade with STARTTLS (port 587).
    StartTls,
}

impl ConnectionType {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Plain => 25,
            Self::ImplicitTls => 465,
            Self::StartTls => 587,
        }
    }
}

/// Username/password pair for AUTH.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Authentication identity.
    pub username: String,
    /// Password.
    pub password: String,
    /// Authorization identity for PLAIN; empty means "same as username".
    #[serde(default)]
    pub authzid: String,
}

impl Credentials {
    /// Creates credentials with an empty authorization identity.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            authzid: String::new(),
        }
    }

    /// Sets the authorization identity sent with PLAIN.
    #[must_use]
    pub fn authzid(mut self, authzid: impl Into<String>) -> Self {
        self.authzid = authzid.into();
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("authzid", &self.authzid)
            .finish()
    }
}

/// SMTP session configuration.
///
/// Owned by the session once it is created, so none of it can change
/// after `connect()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub connection_type: ConnectionType,
    /// Name announced in EHLO/HELO.
    pub client_name: String,
    /// Credentials used by `authenticate()`.
    pub credentials: Option<Credentials>,
    /// Mechanism used by `authenticate()`.
    pub auth_method: AuthMethod,
    /// Bound on transport connect and TLS handshakes.
    pub connect_timeout: Duration,
    /// Bound on each wait for a server reply.
    pub response_timeout: Duration,
    /// Whether TLS server certificates are validated.
    pub verify_certificates: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl SessionConfig {
    /// Creates a plaintext configuration on port 25.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: ConnectionType::Plain.default_port(),
            connection_type: ConnectionType::Plain,
            client_name: "localhost".to_string(),
            credentials: None,
            auth_method: AuthMethod::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            verify_certificates: true,
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(host)
    }
}

/// Builder for session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
    port: Option<u16>,
}

impl SessionConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            config: SessionConfig::new(host),
            port: None,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.config.connection_type = connection_type;
        self
    }

    /// Sets the name announced in EHLO/HELO.
    #[must_use]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = name.into();
        self
    }

    /// Sets the credentials and mechanism used by `authenticate()`.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials, method: AuthMethod) -> Self {
        self.config.credentials = Some(credentials);
        self.config.auth_method = method;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the response timeout.
    #[must_use]
    pub const fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Enables or disables TLS certificate validation.
    #[must_use]
    pub const fn verify_certificates(mut self, verify: bool) -> Self {
        self.config.verify_certificates = verify;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> SessionConfig {
        let mut config = self.config;
        config.port = self
            .port
            .unwrap_or_else(|| config.connection_type.default_port());
        config
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
    fn test_default_ports() {
        assert_eq!(ConnectionType::Plain.default_port(), 25);
        assert_eq!(ConnectionType::ImplicitTls.default_port(), 465);
        assert_eq!(ConnectionType::StartTls.default_port(), 587);
    }

    #[test]
    fn test_config_new() {
        let config = SessionConfig::new("smtp.example.com");
        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.port, 25);
        assert_eq!(config.connection_type, ConnectionType::Plain);
        assert_eq!(config.client_name, "localhost");
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.response_timeout, DEFAULT_RESPONSE_TIMEOUT);
        assert!(config.verify_certificates);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::builder("smtp.example.com")
            .connection_type(ConnectionType::StartTls)
            .client_name("client.example.com")
            .credentials(Credentials::new("user", "pass"), AuthMethod::Plain)
            .response_timeout(Duration::from_secs(30))
            .build();

        assert_eq!(config.port, 587);
        assert_eq!(config.client_name, "client.example.com");
        assert_eq!(config.auth_method, AuthMethod::Plain);
        assert_eq!(config.credentials.unwrap().username, "user");
        assert_eq!(config.response_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_builder_explicit_port() {
        let config = SessionConfig::builder("smtp.example.com")
            .connection_type(ConnectionType::ImplicitTls)
            .port(2465)
            .build();

        assert_eq!(config.port, 2465);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("user", "hunter2");
        let printed = format!("{creds:?}");
        assert!(printed.contains("user"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(
            r#"{
                "host": "smtp.example.com",
                "port": 587,
                "connection_type": "start_tls",
                "credentials": { "username": "user", "password": "pass" },
                "auth_method": "plain"
            }"#,
        )
        .unwrap();

        assert_eq!(config.connection_type, ConnectionType::StartTls);
        assert_eq!(config.auth_method, AuthMethod::Plain);
        assert_eq!(config.client_name, "localhost");
        assert_eq!(config.response_timeout, DEFAULT_RESPONSE_TIMEOUT);
        assert!(config.verify_certificates);
        assert_eq!(config.credentials.unwrap().authzid, "");
    }
}
