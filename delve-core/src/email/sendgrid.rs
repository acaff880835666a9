//! SendGrid v3 mail-send transport.

use super::{DeliveryReceipt, EmailConfig, EmailTransport, OutgoingEmail};
use crate::error::DeliveryError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::time::Duration;

pub const SENDGRID_BASE_URL: &str = "https://api.sendgrid.com";

pub struct SendGridTransport {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl SendGridTransport {
    pub fn new(api_key: String, base_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| SENDGRID_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn from_config(config: &EmailConfig) -> Result<Self, DeliveryError> {
        let api_key =
            std::env::var(&config.sendgrid_api_key_env).map_err(|_| DeliveryError::NotConfigured {
                reason: format!("environment variable {} is not set", config.sendgrid_api_key_env),
            })?;
        Ok(Self::new(
            api_key,
            config.sendgrid_base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub(crate) fn request_body(email: &OutgoingEmail) -> Value {
        json!({
            "personalizations": [{"to": [{"email": email.to}]}],
            "from": {"email": email.from},
            "subject": email.subject,
            "content": [
                {"type": "text/plain", "value": email.text_body},
                {"type": "text/html", "value": email.html_body}
            ]
        })
    }
}

#[async_trait]
impl EmailTransport for SendGridTransport {
    fn name(&self) -> &str {
        "sendgrid"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, DeliveryError> {
        let url = format!("{}/v3/mail/send", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(email))
            .send()
            .await
            .map_err(|e| DeliveryError::TransportFailed {
                transport: "sendgrid".to_string(),
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(DeliveryError::TransportFailed {
                transport: "sendgrid".to_string(),
                message: format!("HTTP {status}: {snippet}"),
            });
        }

        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Ok(DeliveryReceipt {
            transport: "sendgrid".to_string(),
            message_id,
            status: status.as_u16().to_string(),
            accepted_at: Utc::now(),
        })
    }
}
