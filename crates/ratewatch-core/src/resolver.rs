//! Latest value resolution
//!
//! The upstream does not publish on weekends and holidays, so "latest" is
//! the newest point in a short lookback window, with a single fallback to
//! the upstream's "today" resource when the window comes back empty.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::models::{Observation, Series};
use crate::upstream::{FetchOutcome, UpstreamClient, UpstreamError};

/// Default lookback window in calendar days
pub const DEFAULT_LOOKBACK_DAYS: u32 = 10;

/// Anything able to produce the latest value of a series
#[async_trait]
pub trait LatestValueSource: Send + Sync {
    /// The most recent published value, or `None` if nothing could be found
    async fn latest(&self, series: &Series) -> Option<Observation>;
}

/// Resolves the latest value of a series against the upstream
#[derive(Clone)]
pub struct LatestValueResolver {
    client: Arc<dyn UpstreamClient>,
    lookback_days: u32,
}

impl LatestValueResolver {
    /// Create a resolver with the given lookback window
    pub fn new(client: Arc<dyn UpstreamClient>, lookback_days: u32) -> Self {
        Self {
            client,
            lookback_days,
        }
    }

    /// Resolve the latest value as seen on `today`
    pub async fn latest_as_of(&self, series: &Series, today: NaiveDate) -> Option<Observation> {
        let start = today
            .checked_sub_days(Days::new(u64::from(self.lookback_days)))
            .unwrap_or(today);

        let window = self.client.fetch_range(series, start, today).await;
        if let Some(found) = newest(series, window, "lookback window") {
            info!(series = %series, date = %found.date, value = %found.value, "Resolved latest value");
            return Some(found);
        }

        let fallback = self.client.fetch_today(series).await;
        if let Some(found) = newest(series, fallback, "today fallback") {
            info!(series = %series, date = %found.date, value = %found.value, "Resolved latest value from fallback");
            return Some(found);
        }

        warn!(series = %series, "Could not resolve latest value");
        None
    }
}

#[async_trait]
impl LatestValueSource for LatestValueResolver {
    async fn latest(&self, series: &Series) -> Option<Observation> {
        self.latest_as_of(series, Utc::now().date_naive()).await
    }
}

/// Newest point of a fetch; failures are logged and treated as empty
fn newest(
    series: &Series,
    outcome: Result<FetchOutcome, UpstreamError>,
    stage: &str,
) -> Option<Observation> {
    match outcome {
        Ok(outcome) => {
            let found = outcome
                .into_points()
                .iter()
                .max_by_key(|p| p.date)
                .map(Observation::from);
            if found.is_none() {
                debug!(series = %series, stage, "No points returned");
            }
            found
        }
        Err(e) => {
            warn!(series = %series, stage, error = %e, "Upstream request failed");
            None
        }
    }
}
