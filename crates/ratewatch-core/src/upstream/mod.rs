//! Upstream rate source
//!
//! One call is one bounded request against the upstream. "No data for this
//! period" is a normal outcome ([`FetchOutcome::NoData`]), distinct from the
//! transport and payload failures in [`UpstreamError`].

mod nbp;

pub use nbp::NbpClient;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{Series, SeriesPoint};

/// Result of a single upstream request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Points published for the requested period, in upstream order
    Points(Vec<SeriesPoint>),
    /// The upstream explicitly reported nothing published for the period
    NoData,
}

impl FetchOutcome {
    /// Points of the outcome, empty for [`FetchOutcome::NoData`]
    pub fn into_points(self) -> Vec<SeriesPoint> {
        match self {
            Self::Points(points) => points,
            Self::NoData => Vec::new(),
        }
    }

    /// Whether the outcome carries no points at all
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Points(points) => points.is_empty(),
            Self::NoData => true,
        }
    }
}

/// Upstream failures; all of them mean "unavailable" to the caller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// No response within the configured timeout
    #[error("request to {url} timed out")]
    Timeout {
        /// Requested URL
        url: String,
    },

    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success status other than 404
    #[error("upstream returned status {status} for {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Body did not decode into the expected shape
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
}

/// A client able to make one bounded request against the upstream
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Fetch every point published in `[start, end]`
    async fn fetch_range(
        &self,
        series: &Series,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchOutcome, UpstreamError>;

    /// Fetch the point published for a single day
    async fn fetch_day(
        &self,
        series: &Series,
        date: NaiveDate,
    ) -> Result<FetchOutcome, UpstreamError> {
        self.fetch_range(series, date, date).await
    }

    /// Fetch the value published today, if any has been published yet
    async fn fetch_today(&self, series: &Series) -> Result<FetchOutcome, UpstreamError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted upstream used by the fetcher, resolver and protocol tests

    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    use super::*;

    /// A request the fake received
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Range(String, NaiveDate, NaiveDate),
        Day(String, NaiveDate),
        Today(String),
    }

    /// Replays queued responses in order, recording every call
    #[derive(Default)]
    pub struct ScriptedUpstream {
        responses: Mutex<VecDeque<Result<FetchOutcome, UpstreamError>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedUpstream {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, response: Result<FetchOutcome, UpstreamError>) -> &Self {
            self.responses.lock().push_back(response);
            self
        }

        pub fn push_points(&self, series: &Series, points: &[(NaiveDate, &str)]) -> &Self {
            let points = points
                .iter()
                .map(|(date, value)| SeriesPoint::new(series, *date, value.parse::<Decimal>().unwrap()))
                .collect();
            self.push(Ok(FetchOutcome::Points(points)))
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn next(&self, call: Call) -> Result<FetchOutcome, UpstreamError> {
            self.calls.lock().push(call);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or(Ok(FetchOutcome::NoData))
        }
    }

    #[async_trait]
    impl UpstreamClient for ScriptedUpstream {
        async fn fetch_range(
            &self,
            series: &Series,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<FetchOutcome, UpstreamError> {
            self.next(Call::Range(series.key().to_string(), start, end))
        }

        async fn fetch_day(
            &self,
            series: &Series,
            date: NaiveDate,
        ) -> Result<FetchOutcome, UpstreamError> {
            self.next(Call::Day(series.key().to_string(), date))
        }

        async fn fetch_today(&self, series: &Series) -> Result<FetchOutcome, UpstreamError> {
            self.next(Call::Today(series.key().to_string()))
        }
    }

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }
}
