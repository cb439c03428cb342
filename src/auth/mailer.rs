use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::{MailConfig, MailTransport};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail delivery is not configured")]
    NotConfigured,
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("mail task failed: {0}")]
    Task(String),
}

/// Outgoing mail. Registration treats a failed send as fatal.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Whether the mailer can deliver at all. Registration is refused otherwise.
    fn is_configured(&self) -> bool;

    async fn send(&self, to: &str, subject: &str, body: String) -> Result<(), MailError>;
}

pub fn verification_link(frontend_url: &str, token: &str) -> String {
    format!(
        "{}/verify-email?token={}",
        frontend_url.trim_end_matches('/'),
        token
    )
}

pub fn verification_body(first_name: &str, link: &str, hours: u64) -> String {
    format!(
        "Hi {first_name},\n\n\
         Welcome to CampusMate! Please confirm your email address by opening the link below:\n\n\
         {link}\n\n\
         The link expires in {hours} hours. If you did not create an account you can ignore this message.\n"
    )
}

/// Writes messages to the log. Used in development when no SMTP relay exists.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, to: &str, subject: &str, body: String) -> Result<(), MailError> {
        tracing::info!(to = %to, subject = %subject, "Outgoing mail (log transport)\n{}", body);
        Ok(())
    }
}

pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        let host = config
            .smtp_host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or(MailError::NotConfigured)?;
        let username = config
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or(MailError::NotConfigured)?;
        let password = config.password.clone().unwrap_or_default();

        let transport = SmtpTransport::starttls_relay(host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(username, password))
            .build();

        Ok(Self {
            transport,
            from: config.from.parse()?,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, to: &str, subject: &str, body: String) -> Result<(), MailError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        // SmtpTransport blocks; keep it off the async workers
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| MailError::Task(e.to_string()))??;
        Ok(())
    }
}

/// Stands in when SMTP is selected but incomplete. Registration reports the
/// service as unavailable instead of creating accounts nobody can verify.
pub struct UnconfiguredMailer;

#[async_trait]
impl Mailer for UnconfiguredMailer {
    fn is_configured(&self) -> bool {
        false
    }

    async fn send(&self, _to: &str, _subject: &str, _body: String) -> Result<(), MailError> {
        Err(MailError::NotConfigured)
    }
}

pub fn build_mailer(config: &MailConfig) -> Arc<dyn Mailer> {
    match config.transport {
        MailTransport::Log => {
            tracing::info!("Mail transport: log");
            Arc::new(LogMailer)
        }
        MailTransport::Smtp => match SmtpMailer::from_config(config) {
            Ok(mailer) => {
                tracing::info!(
                    "Mail transport: smtp via {}",
                    config.smtp_host.as_deref().unwrap_or_default()
                );
                Arc::new(mailer)
            }
            Err(e) => {
                tracing::warn!("SMTP mail transport unavailable: {}", e);
                Arc::new(UnconfiguredMailer)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_link_joins_base_and_token() {
        assert_eq!(
            verification_link("https://campus.example.edu/", "abc"),
            "https://campus.example.edu/verify-email?token=abc"
        );
    }

    #[test]
    fn verification_body_mentions_link_and_expiry() {
        let body = verification_body("Ada", "https://x/verify-email?token=t", 24);
        assert!(body.contains("Hi Ada"));
        assert!(body.contains("https://x/verify-email?token=t"));
        assert!(body.contains("24 hours"));
    }

    #[test]
    fn smtp_without_host_is_not_configured() {
        let config = MailConfig {
            transport: MailTransport::Smtp,
            ..MailConfig::default()
        };
        assert!(matches!(
            SmtpMailer::from_config(&config),
            Err(MailError::NotConfigured)
        ));
        assert!(!build_mailer(&config).is_configured());
    }

    #[test]
    fn log_transport_is_configured() {
        assert!(build_mailer(&MailConfig::default()).is_configured());
    }

    #[tokio::test]
    async fn unconfigured_mailer_refuses_to_send() {
        let result = UnconfiguredMailer
            .send("a@example.edu", "hi", "body".into())
            .await;
        assert!(matches!(result, Err(MailError::NotConfigured)));
    }
}
