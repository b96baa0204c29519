//! Chunked range fetching
//!
//! The upstream refuses ranges wider than a fixed number of days, so long
//! ranges are split into contiguous chunks, fetched in ascending order and
//! merged. A chunk that fails is skipped and reported in
//! [`SeriesFetch::missing`]; the rest of the range is still fetched.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{Series, SeriesPoint};
use crate::upstream::UpstreamClient;

/// NBP's limit on the span of a single request
pub const DEFAULT_MAX_RANGE_DAYS: u32 = 93;

/// An inclusive sub-range of a requested span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkRange {
    /// First day of the chunk
    pub start: NaiveDate,
    /// Last day of the chunk
    pub end: NaiveDate,
}

/// Merged result of a chunked fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeriesFetch {
    /// Points sorted ascending by date, one per date
    pub points: Vec<SeriesPoint>,
    /// Chunks whose upstream call failed
    pub missing: Vec<ChunkRange>,
}

impl SeriesFetch {
    /// Whether every chunk was fetched
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Split `[start, end]` into contiguous chunks at most `limit_days` wide
pub fn chunk_ranges(start: NaiveDate, end: NaiveDate, limit_days: u32) -> Vec<ChunkRange> {
    let mut chunks = Vec::new();
    if limit_days == 0 {
        return chunks;
    }

    let mut cursor = start;
    while cursor <= end {
        let chunk_end = cursor
            .checked_add_days(Days::new(u64::from(limit_days - 1)))
            .map_or(end, |d| d.min(end));
        chunks.push(ChunkRange {
            start: cursor,
            end: chunk_end,
        });

        match chunk_end.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
    }

    chunks
}

/// Keep the first point seen for each date, then order by date
pub fn merge_points(points: Vec<SeriesPoint>) -> Vec<SeriesPoint> {
    let mut seen = HashSet::with_capacity(points.len());
    let mut merged: Vec<SeriesPoint> = points
        .into_iter()
        .filter(|p| seen.insert((p.series_key.clone(), p.date)))
        .collect();
    merged.sort_by_key(|p| p.date);
    merged
}

/// Fetches arbitrarily long ranges from a bounded upstream
#[derive(Clone)]
pub struct RangeFetcher {
    client: Arc<dyn UpstreamClient>,
    max_range_days: u32,
}

impl RangeFetcher {
    /// Create a fetcher; `max_range_days` must be at least one
    pub fn new(client: Arc<dyn UpstreamClient>, max_range_days: u32) -> Result<Self> {
        if max_range_days == 0 {
            return Err(Error::config("upstream.max_range_days must be at least 1"));
        }
        Ok(Self {
            client,
            max_range_days,
        })
    }

    /// Chunk width in days
    pub fn max_range_days(&self) -> u32 {
        self.max_range_days
    }

    /// Fetch `[start, end]` for a series
    pub async fn fetch(&self, series: &Series, start: NaiveDate, end: NaiveDate) -> Result<SeriesFetch> {
        if start > end {
            return Err(Error::validation(format!(
                "start date {start} is after end date {end}"
            )));
        }

        let chunks = chunk_ranges(start, end, self.max_range_days);
        debug!(series = %series, %start, %end, chunks = chunks.len(), "Fetching range");

        let mut accumulated = Vec::new();
        let mut missing = Vec::new();

        for chunk in chunks {
            info!(series = %series, start = %chunk.start, end = %chunk.end, "Fetching chunk");
            match self.client.fetch_range(series, chunk.start, chunk.end).await {
                Ok(outcome) => accumulated.extend(outcome.into_points()),
                Err(e) => {
                    warn!(
                        series = %series,
                        start = %chunk.start,
                        end = %chunk.end,
                        error = %e,
                        "Chunk fetch failed, leaving a gap"
                    );
                    missing.push(chunk);
                }
            }
        }

        Ok(SeriesFetch {
            points: merge_points(accumulated),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CurrencyCode;
    use crate::upstream::testing::{date, Call, ScriptedUpstream};
    use crate::upstream::{FetchOutcome, UpstreamError};
    use pretty_assertions::assert_eq;

    fn eur() -> Series {
        Series::Currency(CurrencyCode::parse("EUR").unwrap())
    }

    #[test]
    fn chunks_cover_range_contiguously() {
        let start = date(2023, 1, 1);
        let end = date(2023, 12, 31);
        let chunks = chunk_ranges(start, end, 93);

        // 365 days / 93 rounds up to 4
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].start, start);
        assert_eq!(chunks.last().unwrap().end, end);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end.succ_opt().unwrap(), pair[1].start);
        }
        for chunk in &chunks {
            assert!((chunk.end - chunk.start).num_days() < 93);
        }
    }

    #[test]
    fn chunk_count_is_ceiling_of_span_over_limit() {
        let start = date(2020, 1, 1);
        for span in [1_i64, 92, 93, 94, 186, 187, 500] {
            let end = start + chrono::Duration::days(span - 1);
            let expected = (span + 92) / 93;
            assert_eq!(chunk_ranges(start, end, 93).len() as i64, expected, "span {span}");
        }
    }

    #[test]
    fn single_day_is_one_chunk() {
        let day = date(2023, 5, 5);
        assert_eq!(chunk_ranges(day, day, 93), vec![ChunkRange { start: day, end: day }]);
    }

    #[test]
    fn merge_keeps_first_seen_value() {
        let series = eur();
        let points = vec![
            SeriesPoint::new(&series, date(2023, 4, 3), "4.68".parse().unwrap()),
            SeriesPoint::new(&series, date(2023, 4, 4), "4.69".parse().unwrap()),
            SeriesPoint::new(&series, date(2023, 4, 4), "9.99".parse().unwrap()),
            SeriesPoint::new(&series, date(2023, 4, 1), "4.60".parse().unwrap()),
        ];

        let merged = merge_points(points);
        let dates: Vec<_> = merged.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![date(2023, 4, 1), date(2023, 4, 3), date(2023, 4, 4)]);
        assert_eq!(merged[2].value, "4.69".parse().unwrap());
    }

    #[tokio::test]
    async fn hundred_day_range_uses_two_chunks() {
        let series = eur();
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream
            .push_points(&series, &[(date(2023, 1, 2), "4.6784"), (date(2023, 4, 3), "4.6800")])
            .push_points(&series, &[(date(2023, 4, 3), "4.7000"), (date(2023, 4, 4), "4.6900")]);

        let fetcher = RangeFetcher::new(upstream.clone(), 93).unwrap();
        let result = fetcher
            .fetch(&series, date(2023, 1, 1), date(2023, 4, 10))
            .await
            .unwrap();

        assert_eq!(
            upstream.calls(),
            vec![
                Call::Range("EUR".into(), date(2023, 1, 1), date(2023, 4, 3)),
                Call::Range("EUR".into(), date(2023, 4, 4), date(2023, 4, 10)),
            ]
        );
        assert!(result.is_complete());
        assert_eq!(result.points.len(), 3);
        assert_eq!(result.points[1].date, date(2023, 4, 3));
        assert_eq!(result.points[1].value, "4.6800".parse().unwrap());
    }

    #[tokio::test]
    async fn failed_chunk_is_skipped_and_reported() {
        let series = eur();
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream
            .push_points(&series, &[(date(2023, 1, 2), "4.60")])
            .push(Err(UpstreamError::Timeout { url: "x".into() }))
            .push(Ok(FetchOutcome::NoData))
            .push_points(&series, &[(date(2023, 12, 29), "4.34")]);

        let fetcher = RangeFetcher::new(upstream.clone(), 93).unwrap();
        let result = fetcher
            .fetch(&series, date(2023, 1, 1), date(2023, 12, 31))
            .await
            .unwrap();

        assert_eq!(upstream.calls().len(), 4);
        assert_eq!(result.points.len(), 2);
        assert_eq!(
            result.missing,
            vec![ChunkRange {
                start: date(2023, 4, 4),
                end: date(2023, 7, 5),
            }]
        );
    }

    #[tokio::test]
    async fn inverted_range_is_rejected_without_calls() {
        let upstream = Arc::new(ScriptedUpstream::new());
        let fetcher = RangeFetcher::new(upstream.clone(), 93).unwrap();

        let err = fetcher
            .fetch(&eur(), date(2023, 2, 1), date(2023, 1, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(upstream.calls().is_empty());
    }

    #[test]
    fn zero_limit_is_a_config_error() {
        let upstream = Arc::new(ScriptedUpstream::new());
        assert!(RangeFetcher::new(upstream, 0).is_err());
    }
}
