//! Email delivery of finished reports.
//!
//! The report is composed deterministically: markdown is rendered to HTML
//! with `pulldown-cmark` and wrapped in a handlebars layout. A pluggable
//! [`EmailTransport`] hands the message to SMTP or the SendGrid API.

pub mod sendgrid;
pub mod smtp;

use crate::error::{DelveError, DeliveryError};
use crate::research::steps::{ResearchTool, ToolKind};
use crate::types::ReportData;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use pulldown_cmark::{Event, Options, Parser, html};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::info;

pub use sendgrid::SendGridTransport;
pub use smtp::SmtpTransport;

const SUBJECT_MAX_CHARS: usize = 120;

const REPORT_LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{subject}}</title>
</head>
<body style="font-family: -apple-system, 'Segoe UI', Helvetica, Arial, sans-serif; line-height: 1.5; max-width: 760px; margin: 0 auto; padding: 24px; color: #1f2328;">
<p style="padding: 12px 16px; background: #f6f8fa; border-left: 4px solid #0969da;"><strong>Summary:</strong> {{summary}}</p>
{{{body}}}
{{#if follow_ups}}
<h2>Follow-up questions</h2>
<ul>
{{#each follow_ups}}<li>{{this}}</li>
{{/each}}</ul>
{{/if}}
</body>
</html>
"#;

/// Which transport delivers mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailTransportKind {
    #[default]
    Sendgrid,
    Smtp,
}

/// Email delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Send the report after a successful run.
    pub enabled: bool,
    pub transport: EmailTransportKind,
    pub from_address: String,
    pub to_address: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    /// Environment variable holding the SMTP password.
    pub password_env: String,
    /// Environment variable holding the SendGrid API key.
    pub sendgrid_api_key_env: String,
    /// Optional SendGrid endpoint override.
    pub sendgrid_base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            transport: EmailTransportKind::Sendgrid,
            from_address: String::new(),
            to_address: String::new(),
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            password_env: "DELVE_SMTP_PASSWORD".to_string(),
            sendgrid_api_key_env: "SENDGRID_API_KEY".to_string(),
            sendgrid_base_url: None,
            timeout_secs: 30,
        }
    }
}

impl EmailConfig {
    /// Validate this email config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.enabled {
            return warnings;
        }
        for (field, address) in [("from_address", &self.from_address), ("to_address", &self.to_address)] {
            if address.is_empty() {
                warnings.push(format!("{field} is empty; email delivery will fail"));
            } else if let Err(e) = parse_address(address) {
                warnings.push(format!("{field}: {e}"));
            }
        }
        match self.transport {
            EmailTransportKind::Smtp if self.smtp_host.is_empty() => {
                warnings.push("smtp_host is empty".to_string());
            }
            EmailTransportKind::Smtp if std::env::var(&self.password_env).is_err() => {
                warnings.push(format!("{} is not set", self.password_env));
            }
            EmailTransportKind::Sendgrid if std::env::var(&self.sendgrid_api_key_env).is_err() => {
                warnings.push(format!("{} is not set", self.sendgrid_api_key_env));
            }
            _ => {}
        }
        warnings
    }
}

pub(crate) fn parse_address(address: &str) -> Result<lettre::Address, DeliveryError> {
    address
        .parse::<lettre::Address>()
        .map_err(|e| DeliveryError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// A fully composed message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    /// Plain-text alternative; the original markdown.
    pub text_body: String,
}

/// Proof that a transport accepted a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub transport: String,
    pub message_id: Option<String>,
    pub status: String,
    pub accepted_at: DateTime<Utc>,
}

/// Hands composed messages to a mail system.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Build the configured transport. Secrets are read from the environment.
pub fn create_transport(config: &EmailConfig) -> Result<Arc<dyn EmailTransport>, DeliveryError> {
    match config.transport {
        EmailTransportKind::Smtp => Ok(Arc::new(SmtpTransport::from_config(config)?)),
        EmailTransportKind::Sendgrid => Ok(Arc::new(SendGridTransport::from_config(config)?)),
    }
}

/// Turns a report into an [`OutgoingEmail`].
#[derive(Debug, Clone)]
pub struct EmailComposer {
    from: String,
    to: String,
}

impl EmailComposer {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn compose(&self, query: &str, report: &ReportData) -> Result<OutgoingEmail, DeliveryError> {
        parse_address(&self.from)?;
        parse_address(&self.to)?;

        let subject = subject_for(query);
        let data = json!({
            "subject": subject,
            "summary": report.short_summary,
            "body": markdown_to_html(&report.markdown_report),
            "follow_ups": report.follow_up_questions,
        });
        let html_body = Handlebars::new()
            .render_template(REPORT_LAYOUT, &data)
            .map_err(|e| DeliveryError::Compose {
                message: format!("Template render error: {}", e),
            })?;

        Ok(OutgoingEmail {
            from: self.from.clone(),
            to: self.to.clone(),
            subject,
            html_body,
            text_body: report.markdown_report.clone(),
        })
    }
}

/// Single-line subject derived from the query, bounded in length.
pub fn subject_for(query: &str) -> String {
    let flat = query.split_whitespace().collect::<Vec<_>>().join(" ");
    let subject = format!("Research report: {flat}");
    if subject.chars().count() <= SUBJECT_MAX_CHARS {
        return subject;
    }
    let mut truncated: String = subject.chars().take(SUBJECT_MAX_CHARS - 1).collect();
    truncated.push('…');
    truncated
}

/// Render report markdown to HTML. Raw HTML in the source is escaped.
pub fn markdown_to_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS;
    let events = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

/// Input to the email step.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub query: String,
    pub report: ReportData,
}

/// Composes and sends a report over a transport.
pub struct EmailDispatcher {
    composer: EmailComposer,
    transport: Arc<dyn EmailTransport>,
}

impl EmailDispatcher {
    pub fn new(composer: EmailComposer, transport: Arc<dyn EmailTransport>) -> Self {
        Self {
            composer,
            transport,
        }
    }

    pub fn from_config(config: &EmailConfig) -> Result<Self, DeliveryError> {
        if !config.enabled {
            return Err(DeliveryError::NotConfigured {
                reason: "email.enabled is false".to_string(),
            });
        }
        let composer = EmailComposer::new(&config.from_address, &config.to_address);
        Ok(Self::new(composer, create_transport(config)?))
    }

    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<DeliveryReceipt, DeliveryError> {
        let email = self.composer.compose(&request.query, &request.report)?;
        let receipt = self.transport.send(&email).await?;
        info!(
            transport = %receipt.transport,
            status = %receipt.status,
            message_id = ?receipt.message_id,
            "Report emailed"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl ResearchTool for EmailDispatcher {
    type Input = DispatchRequest;
    type Output = DeliveryReceipt;

    fn kind(&self) -> ToolKind {
        ToolKind::Email
    }

    async fn invoke(&self, input: DispatchRequest) -> Result<DeliveryReceipt, DelveError> {
        Ok(self.dispatch(&input).await?)
    }
}

/// A transport that records messages instead of sending them, for tests.
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
    failure: Option<String>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    /// A transport whose every send fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, DeliveryError> {
        if let Some(message) = &self.failure {
            return Err(DeliveryError::TransportFailed {
                transport: self.name().to_string(),
                message: message.clone(),
            });
        }
        let mut sent = self.sent.lock().map_err(|e| DeliveryError::TransportFailed {
            transport: "recording".to_string(),
            message: e.to_string(),
        })?;
        sent.push(email.clone());
        Ok(DeliveryReceipt {
            transport: "recording".to_string(),
            message_id: Some(format!("recorded-{}", sent.len())),
            status: "accepted".to_string(),
            accepted_at: Utc::now(),
        })
    }
}
