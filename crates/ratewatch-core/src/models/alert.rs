//! Alert data models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lettre::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::series::CurrencyCode;

/// Which side of the threshold triggers the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Trigger when the observed value is strictly greater than the threshold
    Above,
    /// Trigger when the observed value is strictly less than the threshold
    Below,
}

impl Direction {
    /// Lowercase name used in messages
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "above" => Ok(Self::Above),
            "below" => Ok(Self::Below),
            other => Err(Error::validation(format!(
                "direction must be 'above' or 'below', got '{other}'"
            ))),
        }
    }
}

/// A threshold alert rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier
    pub id: Uuid,

    /// Currency the rule watches
    pub series_key: CurrencyCode,

    /// Threshold value, always positive
    #[serde(with = "rust_decimal::serde::float")]
    pub threshold: Decimal,

    /// Email address notified when the rule triggers
    pub recipient: String,

    /// Side of the threshold that triggers
    pub direction: Direction,

    /// When the rule was created
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    /// Check if a value triggers this alert; equality never does
    pub fn check(&self, value: Decimal) -> bool {
        match self.direction {
            Direction::Above => value > self.threshold,
            Direction::Below => value < self.threshold,
        }
    }
}

/// Input for creating a new alert rule, as received over the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleInput {
    /// Currency code, any case
    pub currency: String,
    /// Must be greater than zero
    #[serde(with = "rust_decimal::serde::float")]
    pub threshold: Decimal,
    /// Recipient address
    pub email: String,
    /// Side of the threshold that triggers
    pub direction: Direction,
}

impl AlertRuleInput {
    /// Validate the input into a rule candidate
    pub fn validate(self) -> Result<NewAlertRule> {
        let series_key = CurrencyCode::parse(&self.currency)?;

        if self.threshold <= Decimal::ZERO {
            return Err(Error::validation("threshold must be greater than zero"));
        }

        let recipient = self.email.trim();
        recipient
            .parse::<Address>()
            .map_err(|e| Error::validation(format!("invalid email address '{recipient}': {e}")))?;

        Ok(NewAlertRule {
            series_key,
            threshold: self.threshold,
            recipient: recipient.to_string(),
            direction: self.direction,
        })
    }
}

/// A validated rule that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlertRule {
    /// Watched currency
    pub series_key: CurrencyCode,
    /// Positive threshold
    pub threshold: Decimal,
    /// Validated, trimmed address
    pub recipient: String,
    /// Side of the threshold that triggers
    pub direction: Direction,
}

impl NewAlertRule {
    /// Whether a stored rule carries the same condition and recipient
    pub fn same_as(&self, rule: &AlertRule) -> bool {
        self.series_key == rule.series_key
            && self.threshold == rule.threshold
            && self.recipient == rule.recipient
            && self.direction == rule.direction
    }
}

/// Outcome of evaluating one rule against one observed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    /// The rule that was evaluated
    pub rule: AlertRule,
    /// Value the rule was evaluated against
    pub observed_value: Decimal,
    /// Whether the condition held
    pub triggered: bool,
}
