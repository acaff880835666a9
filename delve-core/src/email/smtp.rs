//! SMTP transport using lettre over STARTTLS.

use super::{DeliveryReceipt, EmailConfig, EmailTransport, OutgoingEmail, parse_address};
use crate::error::DeliveryError;
use async_trait::async_trait;
use chrono::Utc;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

pub struct SmtpTransport {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
}

impl SmtpTransport {
    pub fn new(host: String, port: u16, username: String, password: String, timeout: Duration) -> Self {
        Self {
            host,
            port,
            username,
            password,
            timeout,
        }
    }

    pub fn from_config(config: &EmailConfig) -> Result<Self, DeliveryError> {
        if config.smtp_host.is_empty() {
            return Err(DeliveryError::NotConfigured {
                reason: "email.smtp_host is empty".to_string(),
            });
        }
        let password = if config.smtp_username.is_empty() {
            String::new()
        } else {
            std::env::var(&config.password_env).map_err(|_| DeliveryError::NotConfigured {
                reason: format!("environment variable {} is not set", config.password_env),
            })?
        };
        Ok(Self::new(
            config.smtp_host.clone(),
            config.smtp_port,
            config.smtp_username.clone(),
            password,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    /// Build the MIME message: plain text and HTML alternatives.
    pub(crate) fn build_message(email: &OutgoingEmail) -> Result<Message, DeliveryError> {
        let from = Mailbox::new(None, parse_address(&email.from)?);
        let to = Mailbox::new(None, parse_address(&email.to)?);
        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .message_id(None)
            .multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                email.html_body.clone(),
            ))
            .map_err(|e| DeliveryError::Compose {
                message: format!("Failed to build email: {e}"),
            })
    }

    fn failed(message: String) -> DeliveryError {
        DeliveryError::TransportFailed {
            transport: "smtp".to_string(),
            message,
        }
    }
}

#[async_trait]
impl EmailTransport for SmtpTransport {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, DeliveryError> {
        let message = Self::build_message(email)?;
        let message_id = message
            .headers()
            .get_raw("Message-ID")
            .map(|id| id.to_string());

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(|e| Self::failed(format!("SMTP relay error: {e}")))?
            .port(self.port)
            .timeout(Some(self.timeout));
        if !self.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.username.clone(),
                self.password.clone(),
            ));
        }
        let mailer = builder.build();

        let response = mailer
            .send(message)
            .await
            .map_err(|e| Self::failed(format!("SMTP send error: {e}")))?;

        Ok(DeliveryReceipt {
            transport: "smtp".to_string(),
            message_id,
            status: response.code().to_string(),
            accepted_at: Utc::now(),
        })
    }
}
