//! Series data models

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Series key used for the gold price series
pub const GOLD_SERIES_KEY: &str = "GOLD";

/// ISO 4217-style three-letter currency code, always uppercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parse and normalize a code; rejects anything but three ASCII letters
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::validation(format!(
                "currency code must be three letters, got '{raw}'"
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// The code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

/// An instrument the upstream publishes a daily series for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Series {
    /// Mid exchange rate of a currency against the anchor currency
    Currency(CurrencyCode),
    /// Price of one gram of gold
    Gold,
}

impl Series {
    /// Key stamped onto every point of this series
    pub fn key(&self) -> &str {
        match self {
            Self::Currency(code) => code.as_str(),
            Self::Gold => GOLD_SERIES_KEY,
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl From<CurrencyCode> for Series {
    fn from(code: CurrencyCode) -> Self {
        Self::Currency(code)
    }
}

/// A single dated observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Publication date
    pub date: NaiveDate,
    /// Observed value
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    /// Currency code or [`GOLD_SERIES_KEY`]
    pub series_key: String,
}

impl SeriesPoint {
    /// Create a point for a series
    pub fn new(series: &Series, date: NaiveDate, value: Decimal) -> Self {
        Self {
            date,
            value,
            series_key: series.key().to_string(),
        }
    }
}

/// The most recent value resolved for a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Date the value was published for
    pub date: NaiveDate,
    /// The value itself
    pub value: Decimal,
}

impl From<&SeriesPoint> for Observation {
    fn from(point: &SeriesPoint) -> Self {
        Self {
            date: point.date,
            value: point.value,
        }
    }
}
