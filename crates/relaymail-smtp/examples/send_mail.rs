//! Sends one message using settings from the environment.
//!
//! ```text
//! SMTP_HOST=smtp.example.com SMTP_SECURITY=start_tls \
//! SMTP_USER=me@example.com SMTP_PASSWORD=secret \
//! MAIL_FROM=me@example.com MAIL_TO=you@example.org,them@example.org \
//! RUST_LOG=relaymail_smtp=debug cargo run --example send_mail
//! ```
//!
//! `SMTP_CONFIG` may instead point at a JSON-serialized `SessionConfig`.

use std::env;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use relaymail_smtp::{
    Address, AuthMethod, ConnectionType, Credentials, Message, Session, SessionConfig,
};

fn load_config() -> Result<SessionConfig> {
    if let Ok(path) = env::var("SMTP_CONFIG") {
        let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
        return serde_json::from_str(&raw).with_context(|| format!("parsing {path}"));
    }

    let host = env::var("SMTP_HOST").context("SMTP_HOST is not set")?;
    let security = match env::var("SMTP_SECURITY").as_deref() {
        Ok("implicit_tls") => ConnectionType::ImplicitTls,
        Ok("start_tls") => ConnectionType::StartTls,
        _ => ConnectionType::Plain,
    };

    let mut builder = SessionConfig::builder(host).connection_type(security);
    if let Ok(port) = env::var("SMTP_PORT") {
        builder = builder.port(port.parse().context("SMTP_PORT is not a port number")?);
    }
    if let (Ok(user), Ok(password)) = (env::var("SMTP_USER"), env::var("SMTP_PASSWORD")) {
        builder = builder.credentials(Credentials::new(user, password), AuthMethod::Plain);
    }
    Ok(builder.build())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaymail_smtp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    let from = Address::new(env::var("MAIL_FROM").context("MAIL_FROM is not set")?)?;
    let to = env::var("MAIL_TO").context("MAIL_TO is not set")?;

    let content = format!(
        "From: <{from}>\r\nTo: {to}\r\nSubject: relaymail test\r\n\r\nSent by the relaymail send_mail example.\r\n"
    );
    let message = to
        .split(',')
        .map(str::trim)
        .filter(|rcpt| !rcpt.is_empty())
        .try_fold(Message::new(from, content), |message, rcpt| {
            Address::new(rcpt).map(|address| message.to(address))
        })?;

    let has_credentials = config.credentials.is_some();
    let mut session = Session::new(config);

    let outcome = async {
        session.connect().await?;
        if has_credentials {
            session.authenticate().await?;
        }
        session.send_mail(&message).await
    }
    .await;
    session.quit().await;

    let report = outcome?;
    tracing::info!(accepted = ?report.accepted, "Delivered to relay");
    for rejected in &report.rejected {
        tracing::warn!(address = %rejected.address, reply = %rejected.reply, "Recipient refused");
    }
    Ok(())
}
