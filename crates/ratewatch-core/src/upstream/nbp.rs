//! NBP (Narodowy Bank Polski) public API client
//!
//! Currency rates come from table A (`/exchangerates/rates/a/...`), gold
//! prices from `/cenyzlota/...`. A 404 is how NBP says "nothing published".

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use super::{FetchOutcome, UpstreamClient, UpstreamError};
use crate::config::UpstreamConfig;
use crate::error::{Error, Result};
use crate::models::{Series, SeriesPoint};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// HTTP client for the NBP API
#[derive(Clone)]
pub struct NbpClient {
    client: Client,
    base_url: String,
}

impl NbpClient {
    /// Create a client from upstream configuration
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of a series resource; `tail` is a date, a date range or `today`
    fn series_url(&self, series: &Series, tail: &str) -> String {
        match series {
            Series::Currency(code) => {
                format!("{}/exchangerates/rates/a/{}/{}/", self.base_url, code, tail)
            }
            Series::Gold => format!("{}/cenyzlota/{}/", self.base_url, tail),
        }
    }

    async fn get(&self, series: &Series, url: String) -> std::result::Result<FetchOutcome, UpstreamError> {
        debug!(series = %series, url = %url, "Requesting upstream");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout { url: url.clone() }
                } else {
                    UpstreamError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(series = %series, url = %url, "No data published for period");
            return Ok(FetchOutcome::NoData);
        }
        if !status.is_success() {
            warn!(series = %series, url = %url, status = status.as_u16(), "Upstream rejected request");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        parse_body(series, &body).map(FetchOutcome::Points)
    }
}

#[async_trait]
impl UpstreamClient for NbpClient {
    async fn fetch_range(
        &self,
        series: &Series,
        start: NaiveDate,
        end: NaiveDate,
    ) -> std::result::Result<FetchOutcome, UpstreamError> {
        let tail = format!("{}/{}", start.format(DATE_FORMAT), end.format(DATE_FORMAT));
        self.get(series, self.series_url(series, &tail)).await
    }

    async fn fetch_day(
        &self,
        series: &Series,
        date: NaiveDate,
    ) -> std::result::Result<FetchOutcome, UpstreamError> {
        let tail = date.format(DATE_FORMAT).to_string();
        self.get(series, self.series_url(series, &tail)).await
    }

    async fn fetch_today(&self, series: &Series) -> std::result::Result<FetchOutcome, UpstreamError> {
        self.get(series, self.series_url(series, "today")).await
    }
}

/// Table A payload for one currency
#[derive(Debug, Deserialize)]
struct RateTable {
    rates: Vec<RateEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateEntry {
    effective_date: NaiveDate,
    #[serde(deserialize_with = "decimal_from_number")]
    mid: Decimal,
}

/// Gold payloads are a bare array
#[derive(Debug, Deserialize)]
struct GoldEntry {
    data: NaiveDate,
    #[serde(deserialize_with = "decimal_from_number")]
    cena: Decimal,
}

fn parse_body(series: &Series, body: &str) -> std::result::Result<Vec<SeriesPoint>, UpstreamError> {
    let malformed = |e: serde_json::Error| UpstreamError::Malformed(format!("{series}: {e}"));

    let points = match series {
        Series::Currency(_) => serde_json::from_str::<RateTable>(body)
            .map_err(malformed)?
            .rates
            .into_iter()
            .map(|r| SeriesPoint::new(series, r.effective_date, r.mid))
            .collect(),
        Series::Gold => serde_json::from_str::<Vec<GoldEntry>>(body)
            .map_err(malformed)?
            .into_iter()
            .map(|g| SeriesPoint::new(series, g.data, g.cena))
            .collect(),
    };

    Ok(points)
}

/// Read a JSON number through its textual form so `4.1545` stays exact
fn decimal_from_number<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(serde::de::Error::custom)
}
