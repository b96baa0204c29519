//! SOAP-style RPC adapter
//!
//! A call is parsed from its envelope, resolved to an [`Operation`],
//! executed against the upstream and answered with either a response
//! envelope or a fault. Faults are all-or-nothing: no partial result is
//! ever returned alongside one.

mod envelope;
mod operations;

pub use envelope::{
    fault_envelope, parse_request, request_envelope, response_envelope, ProtocolRequest,
};
pub use operations::Operation;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use chrono::{Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{CurrencyCode, Series, SeriesPoint};
use crate::upstream::{FetchOutcome, UpstreamClient, UpstreamError};

use envelope::element;

/// Reasons a call ends in a fault
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Body is not a well-formed request envelope
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Operation name is not one we serve
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Required parameter absent or blank
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Parameter is not a `YYYY-MM-DD` date
    #[error("Invalid date for {field}: {value}")]
    InvalidDate {
        /// Parameter name
        field: &'static str,
        /// Value as received
        value: String,
    },

    /// Parameter is not a three-letter currency code
    #[error("Invalid currency code for {field}: {value}")]
    InvalidCurrency {
        /// Parameter name
        field: &'static str,
        /// Value as received
        value: String,
    },

    /// Amount is not a decimal number
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Amount is zero or negative
    #[error("Amount must be positive")]
    NonPositiveAmount,

    /// Conversion result does not fit in a decimal
    #[error("Amount too large")]
    AmountTooLarge,

    /// Range start is after its end
    #[error("Start date {start} is after end date {end}")]
    InvertedRange {
        /// First requested day
        start: NaiveDate,
        /// Last requested day
        end: NaiveDate,
    },

    /// No rate published today or yesterday
    #[error("No rate found for {0}")]
    NoRate(CurrencyCode),

    /// Upstream call failed
    #[error("{0}")]
    Upstream(#[from] UpstreamError),
}

impl ProtocolError {
    /// `soap:Server` for upstream-side failures, `soap:Client` otherwise
    pub fn fault_code(&self) -> &'static str {
        match self {
            Self::NoRate(_) | Self::Upstream(_) => "soap:Server",
            _ => "soap:Client",
        }
    }
}

/// Final state of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolReply {
    /// Operation response, without the envelope
    Responded(String),
    /// The call failed
    Faulted {
        /// `soap:Client` or `soap:Server`
        faultcode: &'static str,
        /// Human-readable reason
        faultstring: String,
    },
}

impl ProtocolReply {
    /// Whether the call faulted
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Faulted { .. })
    }

    /// The complete envelope to send back
    pub fn to_xml(&self) -> String {
        match self {
            Self::Responded(body) => response_envelope(body),
            Self::Faulted {
                faultcode,
                faultstring,
            } => fault_envelope(faultcode, faultstring),
        }
    }
}

impl From<ProtocolError> for ProtocolReply {
    fn from(err: ProtocolError) -> Self {
        Self::Faulted {
            faultcode: err.fault_code(),
            faultstring: err.to_string(),
        }
    }
}

/// Executes envelope calls against the upstream
pub struct ProtocolAdapter {
    client: Arc<dyn UpstreamClient>,
    anchor: CurrencyCode,
}

impl ProtocolAdapter {
    /// Create an adapter; `anchor` is the currency every rate is quoted in
    pub fn new(client: Arc<dyn UpstreamClient>, anchor: CurrencyCode) -> Self {
        Self { client, anchor }
    }

    /// Handle a raw envelope
    pub async fn handle(&self, xml: &str) -> ProtocolReply {
        self.handle_as_of(xml, Utc::now().date_naive()).await
    }

    /// Handle a raw envelope with `today` as the current date
    pub async fn handle_as_of(&self, xml: &str, today: NaiveDate) -> ProtocolReply {
        let result = match parse_request(xml).and_then(|r| Operation::from_request(&r)) {
            Ok(operation) => {
                info!(operation = operation.name(), "Dispatching protocol call");
                self.dispatch(operation, today).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(body) => ProtocolReply::Responded(body),
            Err(e) => {
                warn!(faultcode = e.fault_code(), error = %e, "Protocol call faulted");
                e.into()
            }
        }
    }

    async fn dispatch(&self, operation: Operation, today: NaiveDate) -> std::result::Result<String, ProtocolError> {
        match operation {
            Operation::GetExchangeRates {
                currency,
                start,
                end,
            } => self.exchange_rates(currency, start, end).await,
            Operation::GetHistoricalRates { currency, date } => {
                self.historical_rate(currency, date).await
            }
            Operation::ConvertCurrency { from, to, amount } => {
                self.convert(from, to, amount, today).await
            }
        }
    }

    async fn exchange_rates(
        &self,
        currency: CurrencyCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> std::result::Result<String, ProtocolError> {
        let series = Series::Currency(currency.clone());
        let outcome = self.client.fetch_range(&series, start, end).await?;

        let body = match outcome {
            FetchOutcome::Points(points) if !points.is_empty() => {
                points.iter().map(rate_element).collect::<String>()
            }
            _ => element("error", &format!("No data found for {currency}")),
        };
        Ok(format!("<getExchangeRatesResponse>{body}</getExchangeRatesResponse>"))
    }

    async fn historical_rate(
        &self,
        currency: CurrencyCode,
        date: NaiveDate,
    ) -> std::result::Result<String, ProtocolError> {
        let series = Series::Currency(currency.clone());
        let outcome = self.client.fetch_day(&series, date).await?;

        let body = match outcome.into_points().first() {
            Some(point) => format!(
                "<rate>{}{}{}</rate>",
                element("date", &point.date.to_string()),
                element("value", &point.value.to_string()),
                element("currency", currency.as_str()),
            ),
            None => element("error", &format!("No data found for {currency} on {date}")),
        };
        Ok(format!("<getHistoricalRatesResponse>{body}</getHistoricalRatesResponse>"))
    }

    async fn convert(
        &self,
        from: CurrencyCode,
        to: CurrencyCode,
        amount: Decimal,
        today: NaiveDate,
    ) -> std::result::Result<String, ProtocolError> {
        let from_rate = self.rate(&from, today).await?;
        let to_rate = self.rate(&to, today).await?;

        let result = amount
            .checked_mul(from_rate)
            .ok_or(ProtocolError::AmountTooLarge)?
            .checked_div(to_rate)
            .ok_or_else(|| {
                if to_rate.is_zero() {
                    ProtocolError::NoRate(to.clone())
                } else {
                    ProtocolError::AmountTooLarge
                }
            })?
            .round_dp(4);

        debug!(%from, %to, %amount, %from_rate, %to_rate, %result, "Converted amount");

        Ok(format!(
            "<convertCurrencyResponse>{}{}{}{}{}</convertCurrencyResponse>",
            element("result", &format!("{result:.4}")),
            element("from_currency", from.as_str()),
            element("to_currency", to.as_str()),
            element("amount", &amount.normalize().to_string()),
            element("date", &today.to_string()),
        ))
    }

    /// Rate of `code` in the anchor currency: today, else yesterday
    async fn rate(&self, code: &CurrencyCode, today: NaiveDate) -> std::result::Result<Decimal, ProtocolError> {
        if *code == self.anchor {
            return Ok(Decimal::ONE);
        }

        let series = Series::Currency(code.clone());
        if let Some(point) = newest(self.client.fetch_today(&series).await?) {
            return Ok(point.value);
        }

        let yesterday = today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| ProtocolError::NoRate(code.clone()))?;
        debug!(currency = %code, %yesterday, "No rate published today, trying yesterday");

        newest(self.client.fetch_day(&series, yesterday).await?)
            .map(|p| p.value)
            .ok_or_else(|| ProtocolError::NoRate(code.clone()))
    }
}

fn newest(outcome: FetchOutcome) -> Option<SeriesPoint> {
    outcome.into_points().into_iter().max_by_key(|p| p.date)
}

fn rate_element(point: &SeriesPoint) -> String {
    format!(
        "<rate>{}{}</rate>",
        element("date", &point.date.to_string()),
        element("value", &point.value.to_string()),
    )
}

/// Router serving `POST /soap`
pub fn router(adapter: Arc<ProtocolAdapter>) -> Router {
    Router::new()
        .route("/soap", post(handle_envelope))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(adapter)
}

async fn handle_envelope(State(adapter): State<Arc<ProtocolAdapter>>, body: Bytes) -> Response {
    let reply = match std::str::from_utf8(&body) {
        Ok(xml) => adapter.handle(xml).await,
        Err(e) => {
            let err = ProtocolError::InvalidEnvelope(format!("body is not valid UTF-8: {e}"));
            warn!(faultcode = err.fault_code(), error = %err, "Protocol call faulted");
            err.into()
        }
    };
    let status = if reply.is_fault() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };

    (
        status,
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        reply.to_xml(),
    )
        .into_response()
}

/// Serve the adapter on `addr` until `shutdown` is cancelled
pub async fn serve(adapter: Arc<ProtocolAdapter>, addr: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind protocol listener on {addr}: {e}")))?;

    info!("Protocol listener on {}", addr);

    axum::serve(listener, router(adapter))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    Ok(())
}
