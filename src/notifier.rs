//! Delivery of the issued key by transactional email (SendGrid v3)
//!
//! The outcome is a value, not an error: only `Sent` lets the pipeline go on
//! to post its confirmation comment.

use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{EmailConfig, ProgramConfig};
use crate::provisioner::ProvisionedCredential;
use crate::validator::ValidatedEmail;

/// Tri-state result of a delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { status: u16 },
    Rejected { status: u16, reason: String },
    TransportFailed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Operator-facing hint for an error status from the provider
pub fn diagnose(status: u16) -> &'static str {
    match status {
        400 => "malformed request; check the sender, recipient and message payload",
        401 => "invalid or revoked email API key",
        403 => "API key lacks mail-send permission or the sender identity is not verified",
        413 => "message payload too large",
        429 => "rate limited by the email provider",
        500..=599 => "email provider outage; try again later",
        _ => "unexpected client error from the email provider",
    }
}

/// Classify the provider's answer to a send request
pub fn classify_response(status: u16, body: &str) -> DeliveryOutcome {
    if status < 300 {
        info!("Email sent successfully (status {})", status);
        return DeliveryOutcome::Sent { status };
    }

    if status < 400 {
        warn!("Unexpected status code {} from email provider", status);
        warn!("Response body: {}", body);
        return DeliveryOutcome::Rejected {
            status,
            reason: format!("unexpected status {}: {}", status, body),
        };
    }

    let hint = diagnose(status);
    error!("Email provider HTTP error {}: {} ({})", status, body, hint);
    DeliveryOutcome::Rejected {
        status,
        reason: format!("{}: {}", hint, body),
    }
}

/// Format a dollar amount without a trailing `.0` for whole values
pub fn format_limit(limit: f64) -> String {
    if limit.fract() == 0.0 {
        format!("${:.0}", limit)
    } else {
        format!("${:.2}", limit)
    }
}

/// A rendered notification ready for submission. The body carries the key.
pub struct EmailMessage {
    pub to: ValidatedEmail,
    pub from_email: String,
    pub from_name: String,
    pub subject: String,
    pub html: String,
}

impl fmt::Debug for EmailMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailMessage")
            .field("to", &self.to)
            .field("from_email", &self.from_email)
            .field("subject", &self.subject)
            .field("html", &"[REDACTED]")
            .finish()
    }
}

/// Builds the key notification
pub struct RewardMessage<'a> {
    pub email: &'a EmailConfig,
    pub program: &'a ProgramConfig,
}

impl<'a> RewardMessage<'a> {
    pub fn new(email: &'a EmailConfig, program: &'a ProgramConfig) -> Self {
        Self { email, program }
    }

    /// Consumes the credential: after rendering, the message is its only holder
    pub fn render(&self, to: &ValidatedEmail, credential: ProvisionedCredential) -> EmailMessage {
        let html = format!(
            r#"
<p>Thank you for contributing to the <strong>{program}</strong>!</p>
<p>🎉 Here's your <strong>{limit} {provider} API key</strong>:</p>
<pre style="background-color:#f4f4f4;padding:10px;border-radius:6px;"><code>{key}</code></pre>
<p>To use this in goose (CLI or Desktop):</p>
<ul>
  <li>Go to your <strong>Provider Settings</strong></li>
  <li>Select <strong>{provider}</strong> from the provider list</li>
  <li>Paste your API key</li>
</ul>
<p>📚 Full setup instructions:<br>
<a href="{docs}">{docs}</a></p>
<p>Happy coding!<br>– the {from_name}</p>
"#,
            program = self.program.email_program_name,
            limit = format_limit(credential.limit()),
            provider = self.program.provider_name,
            key = credential.expose(),
            docs = self.email.docs_url,
            from_name = self.email.from_name,
        );

        EmailMessage {
            to: to.clone(),
            from_email: self.email.from_email.clone(),
            from_name: self.email.from_name.clone(),
            subject: self.email.subject.clone(),
            html,
        }
    }
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a str,
}

/// SendGrid v3 `mail/send` body
#[derive(Debug, Serialize)]
struct MailSend<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

impl<'a> From<&'a EmailMessage> for MailSend<'a> {
    fn from(message: &'a EmailMessage) -> Self {
        Self {
            personalizations: vec![Personalization {
                to: vec![Address {
                    email: message.to.as_str(),
                    name: None,
                }],
            }],
            from: Address {
                email: &message.from_email,
                name: Some(&message.from_name),
            },
            subject: &message.subject,
            content: vec![Content {
                kind: "text/html",
                value: &message.html,
            }],
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> DeliveryOutcome;
}

pub struct SendGridClient {
    client: reqwest::Client,
    api_base: String,
    api_key: SecretString,
}

impl SendGridClient {
    pub fn new(client: reqwest::Client, config: &EmailConfig, api_key: SecretString) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn send_url(&self) -> String {
        format!("{}/v3/mail/send", self.api_base)
    }
}

#[async_trait]
impl EmailSender for SendGridClient {
    async fn send(&self, message: &EmailMessage) -> DeliveryOutcome {
        info!("Sending email to {}", message.to);

        let result = self
            .client
            .post(self.send_url())
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&MailSend::from(message))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!("Unexpected error sending email: {}", e);
                return DeliveryOutcome::TransportFailed {
                    reason: e.to_string(),
                };
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => classify_response(status, &body),
            Err(e) => {
                error!("Failed to read email provider response: {}", e);
                DeliveryOutcome::TransportFailed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
