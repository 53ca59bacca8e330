//! Outbound mail collaborator.
//!
//! One operation: submit a raw, already-rewritten message with an
//! explicit envelope. Two backends are provided — an SMTP relay driven
//! through lettre, and an HTTP mail API accepting the standard
//! raw-send JSON shape (`Destinations`/`Source`/`RawMessage`).

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::error::MailerError;

/// Outbound mail dispatch.
///
/// `source` is the envelope sender, `destinations` the envelope
/// recipients; both are independent of whatever the message headers
/// say. Returns an opaque provider result suitable for logging.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_raw(
        &self,
        destinations: &[String],
        source: &str,
        raw: &[u8],
    ) -> Result<String, MailerError>;
}

// ── SMTP backend ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SmtpConfig {
    /// Build from environment variables. Returns `None` when
    /// `MAIL_RELAY_SMTP_HOST` is unset.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("MAIL_RELAY_SMTP_HOST").ok()?;
        let port = std::env::var("MAIL_RELAY_SMTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(587);
        Some(Self {
            host,
            port,
            username: std::env::var("MAIL_RELAY_SMTP_USERNAME").ok(),
            password: std::env::var("MAIL_RELAY_SMTP_PASSWORD").ok(),
        })
    }
}

/// Sends through an SMTP relay. The transport is synchronous, so each
/// send runs on the blocking pool.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_raw(
        &self,
        destinations: &[String],
        source: &str,
        raw: &[u8],
    ) -> Result<String, MailerError> {
        let envelope = build_envelope(destinations, source)?;
        let config = self.config.clone();
        let raw = raw.to_vec();

        let response = tokio::task::spawn_blocking(move || {
            let mut builder = SmtpTransport::relay(&config.host)
                .map_err(|e| MailerError::Smtp(format!("SMTP relay error: {e}")))?
                .port(config.port);
            if let (Some(username), Some(password)) = (config.username, config.password) {
                builder = builder.credentials(Credentials::new(username, password));
            }
            let transport = builder.build();
            transport
                .send_raw(&envelope, &raw)
                .map_err(|e| MailerError::Smtp(format!("SMTP send failed: {e}")))
        })
        .await
        .map_err(|e| MailerError::Task(e.to_string()))??;

        Ok(format!("smtp {}", response.code()))
    }
}

// ── HTTP API backend ────────────────────────────────────────────────────

/// Sends through an HTTP endpoint speaking the raw-send JSON shape.
pub struct ApiMailer {
    endpoint: String,
    token: SecretString,
    client: reqwest::Client,
}

impl ApiMailer {
    pub fn new(endpoint: impl Into<String>, token: SecretString) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Mailer for ApiMailer {
    async fn send_raw(
        &self,
        destinations: &[String],
        source: &str,
        raw: &[u8],
    ) -> Result<String, MailerError> {
        let body = serde_json::json!({
            "Destinations": destinations,
            "Source": source,
            "RawMessage": { "Data": STANDARD.encode(raw) },
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| MailerError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailerError::Api {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body = resp.text().await.unwrap_or_default();
        if body.is_empty() {
            Ok(format!("http {}", status.as_u16()))
        } else {
            Ok(body)
        }
    }
}

fn build_envelope(destinations: &[String], source: &str) -> Result<Envelope, MailerError> {
    let from = source
        .parse::<Address>()
        .map_err(|e| MailerError::InvalidAddress {
            address: source.to_string(),
            reason: e.to_string(),
        })?;
    let mut to = Vec::with_capacity(destinations.len());
    for destination in destinations {
        to.push(
            destination
                .parse::<Address>()
                .map_err(|e| MailerError::InvalidAddress {
                    address: destination.clone(),
                    reason: e.to_string(),
                })?,
        );
    }
    Envelope::new(Some(from), to).map_err(|e| MailerError::InvalidAddress {
        address: source.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_sender_and_all_destinations() {
        let destinations = vec![
            "ops@forward.example".to_string(),
            "archive@forward.example".to_string(),
        ];
        let envelope = build_envelope(&destinations, "info@example.com").unwrap();
        assert_eq!(envelope.from().map(|a| a.to_string()).as_deref(), Some("info@example.com"));
        assert_eq!(envelope.to().len(), 2);
    }

    #[test]
    fn envelope_rejects_invalid_source() {
        let destinations = vec!["ops@forward.example".to_string()];
        let err = build_envelope(&destinations, "not-an-address").unwrap_err();
        assert!(matches!(err, MailerError::InvalidAddress { .. }));
    }

    #[test]
    fn envelope_rejects_invalid_destination() {
        let destinations = vec!["also not an address".to_string()];
        let err = build_envelope(&destinations, "info@example.com").unwrap_err();
        match err {
            MailerError::InvalidAddress { address, .. } => {
                assert_eq!(address, "also not an address")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn envelope_requires_destinations() {
        assert!(build_envelope(&[], "info@example.com").is_err());
    }

    #[test]
    fn smtp_config_absent_without_host() {
        // SAFETY: test-only env mutation; no other test reads this variable.
        unsafe { std::env::remove_var("MAIL_RELAY_SMTP_HOST") };
        assert!(SmtpConfig::from_env().is_none());
    }
}
