//! Supported protocol operations and their arguments

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::envelope::ProtocolRequest;
use super::ProtocolError;
use crate::models::CurrencyCode;

/// A validated call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Mid rates of one currency over a date range
    GetExchangeRates {
        /// Quoted currency
        currency: CurrencyCode,
        /// First day, inclusive
        start: NaiveDate,
        /// Last day, inclusive
        end: NaiveDate,
    },
    /// Mid rate of one currency on one day
    GetHistoricalRates {
        /// Quoted currency
        currency: CurrencyCode,
        /// Publication day
        date: NaiveDate,
    },
    /// Convert an amount between two currencies through the anchor currency
    ConvertCurrency {
        /// Currency the amount is in
        from: CurrencyCode,
        /// Currency to convert into
        to: CurrencyCode,
        /// Positive amount in `from`
        amount: Decimal,
    },
}

impl Operation {
    /// Wire name of the operation
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetExchangeRates { .. } => "get_exchange_rates",
            Self::GetHistoricalRates { .. } => "get_historical_rates",
            Self::ConvertCurrency { .. } => "convert_currency",
        }
    }

    /// Resolve the operation name and validate its parameters
    pub fn from_request(request: &ProtocolRequest) -> Result<Self, ProtocolError> {
        match request.operation.as_str() {
            "get_exchange_rates" => {
                let currency = currency(request, "currency_code")?;
                let start = date(request, "start_date")?;
                let end = date(request, "end_date")?;
                if start > end {
                    return Err(ProtocolError::InvertedRange { start, end });
                }
                Ok(Self::GetExchangeRates {
                    currency,
                    start,
                    end,
                })
            }
            "get_historical_rates" => Ok(Self::GetHistoricalRates {
                currency: currency(request, "currency_code")?,
                date: date(request, "date")?,
            }),
            "convert_currency" => {
                let from = currency(request, "from_currency")?;
                let to = currency(request, "to_currency")?;
                let amount = amount(request, "amount")?;
                Ok(Self::ConvertCurrency { from, to, amount })
            }
            other => Err(ProtocolError::UnknownMethod(other.to_string())),
        }
    }
}

fn currency(request: &ProtocolRequest, field: &'static str) -> Result<CurrencyCode, ProtocolError> {
    let raw = request.param(field)?;
    CurrencyCode::parse(raw).map_err(|_| ProtocolError::InvalidCurrency {
        field,
        value: raw.to_string(),
    })
}

fn date(request: &ProtocolRequest, field: &'static str) -> Result<NaiveDate, ProtocolError> {
    let raw = request.param(field)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| ProtocolError::InvalidDate {
        field,
        value: raw.to_string(),
    })
}

fn amount(request: &ProtocolRequest, field: &'static str) -> Result<Decimal, ProtocolError> {
    let raw = request.param(field)?;
    let amount = Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| ProtocolError::InvalidAmount(raw.to_string()))?;

    if amount <= Decimal::ZERO {
        return Err(ProtocolError::NonPositiveAmount);
    }
    Ok(amount)
}
