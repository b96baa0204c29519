//! Notification delivery for alerts

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::config::{CurrencyConfig, SmtpConfig};
use crate::error::{Error, Result};
use crate::models::AlertRule;

/// Delivers an alert for a triggered rule
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send the alert; failures are logged and reported as `false`
    async fn send(&self, rule: &AlertRule, observed: Decimal) -> bool;
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Sender or recipient does not parse as a mailbox
    #[error("invalid address: {0}")]
    Address(String),

    /// Subject or body rejected by the message builder
    #[error("failed to build message: {0}")]
    Message(String),

    /// Relay refused or connection failed
    #[error("SMTP error: {0}")]
    Smtp(String),
}

/// Plain-text mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one message to `to`
    async fn send(&self, to: &str, subject: &str, body: &str) -> std::result::Result<(), NotificationError>;
}

/// STARTTLS SMTP relay
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build a relay transport from configuration
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let address: Address = config
            .from_address
            .parse()
            .map_err(|e| Error::config(format!("smtp.from_address: {e}")))?;
        let from = Mailbox::new(Some(config.from_name.clone()), address);

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| Error::config(format!("smtp.host: {e}")))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> std::result::Result<(), NotificationError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e: lettre::address::AddressError| NotificationError::Address(e.to_string()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotificationError::Message(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotificationError::Smtp(e.to_string()))?;

        Ok(())
    }
}

/// Formats rate alerts and sends them by email
pub struct EmailNotifier<M> {
    mailer: M,
    anchor: String,
    signature: String,
}

impl<M: Mailer> EmailNotifier<M> {
    /// Create a notifier; `signature` closes every message
    pub fn new(mailer: M, anchor: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            mailer,
            anchor: anchor.into(),
            signature: signature.into(),
        }
    }

    /// Create a notifier using the configured anchor currency and sender name
    pub fn from_config(mailer: M, currencies: &CurrencyConfig, smtp: &SmtpConfig) -> Self {
        Self::new(mailer, currencies.anchor.clone(), smtp.from_name.clone())
    }

    /// Subject line for a rule
    pub fn subject(rule: &AlertRule) -> String {
        format!("Currency Alert: {} Rate Alert", rule.series_key)
    }

    /// Message body for a rule checked at `checked_at`
    pub fn body(&self, rule: &AlertRule, observed: Decimal, checked_at: DateTime<Local>) -> String {
        format!(
            "Hello,\n\
             \n\
             This is an automatic notification regarding your currency rate alert.\n\
             \n\
             Currency: {code}/{anchor}\n\
             Current Rate: {observed:.4} {anchor}\n\
             Your Alert Threshold: {threshold:.4} {anchor}\n\
             Alert Condition: Rate is {direction} threshold\n\
             \n\
             Time of Check: {time}\n\
             \n\
             This is an automated message, please do not reply.\n\
             \n\
             Best regards,\n\
             {signature}\n",
            code = rule.series_key,
            anchor = self.anchor,
            observed = observed.round_dp(4),
            threshold = rule.threshold.round_dp(4),
            direction = rule.direction,
            time = checked_at.format("%Y-%m-%d %H:%M:%S"),
            signature = self.signature,
        )
    }
}

#[async_trait]
impl<M: Mailer> NotificationSink for EmailNotifier<M> {
    async fn send(&self, rule: &AlertRule, observed: Decimal) -> bool {
        let subject = Self::subject(rule);
        let body = self.body(rule, observed, Local::now());

        match self.mailer.send(&rule.recipient, &subject, &body).await {
            Ok(()) => {
                info!(rule_id = %rule.id, recipient = %rule.recipient, currency = %rule.series_key, "Alert email sent");
                true
            }
            Err(e) => {
                error!(rule_id = %rule.id, recipient = %rule.recipient, error = %e, "Failed to send alert email");
                false
            }
        }
    }
}
