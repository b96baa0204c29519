//! API handlers for the HTTP REST API

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::alerting::{RuleCheck, RuleStore, ThresholdCheck};
use crate::config::CurrencyConfig;
use crate::error::Error;
use crate::fetcher::RangeFetcher;
use crate::models::{AlertRule, AlertRuleInput, CurrencyCode, Series, SeriesPoint};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Chunked history reader
    pub fetcher: RangeFetcher,
    /// Alert rule storage
    pub rules: Arc<dyn RuleStore>,
    /// Immediate check for newly created rules
    pub checks: Arc<ThresholdCheck>,
    /// Anchor and supported currencies
    pub currencies: Arc<CurrencyConfig>,
}

fn error_response(err: Error) -> (StatusCode, String) {
    let status = match &err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Upstream(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the server answers
    pub status: String,
    /// Crate version
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Supported currency codes
pub async fn list_currencies(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.currencies.supported.clone())
}

/// Query parameters for historical data
#[derive(Debug, Deserialize)]
pub struct DataQuery {
    /// First day, inclusive
    pub start_date: NaiveDate,
    /// Last day, inclusive
    pub end_date: NaiveDate,
    /// Comma-separated codes, required for currency data
    pub currencies: Option<String>,
}

/// A chunk that could not be fetched
#[derive(Debug, Serialize)]
pub struct MissingRange {
    /// Series the gap belongs to
    pub series_key: String,
    /// First day of the gap
    pub start: NaiveDate,
    /// Last day of the gap
    pub end: NaiveDate,
}

/// Historical data response
#[derive(Debug, Serialize)]
pub struct DataResponse {
    /// Points of every requested series, sorted by date per series
    pub data: Vec<SeriesPoint>,
    /// Chunks that failed upstream
    pub missing: Vec<MissingRange>,
}

/// Historical currency rates or gold prices
pub async fn get_data(
    State(state): State<AppState>,
    Path(data_type): Path<String>,
    Query(query): Query<DataQuery>,
) -> Result<Json<DataResponse>, (StatusCode, String)> {
    let series = match data_type.as_str() {
        "gold" => vec![Series::Gold],
        "currency" => requested_series(&state.currencies, query.currencies.as_deref())?,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("Unknown data type '{other}', expected 'currency' or 'gold'"),
            ))
        }
    };

    let mut data = Vec::new();
    let mut missing = Vec::new();

    for series in &series {
        let fetched = state
            .fetcher
            .fetch(series, query.start_date, query.end_date)
            .await
            .map_err(error_response)?;

        missing.extend(fetched.missing.into_iter().map(|chunk| MissingRange {
            series_key: series.key().to_string(),
            start: chunk.start,
            end: chunk.end,
        }));
        data.extend(fetched.points);
    }

    data.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.series_key.cmp(&b.series_key)));

    Ok(Json(DataResponse { data, missing }))
}

fn requested_series(
    currencies: &CurrencyConfig,
    raw: Option<&str>,
) -> Result<Vec<Series>, (StatusCode, String)> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or((
        StatusCode::BAD_REQUEST,
        "Currency codes are required for currency data".to_string(),
    ))?;

    let mut series = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        match CurrencyCode::parse(code) {
            Ok(code) if currencies.is_supported(code.as_str()) => {
                let entry = Series::Currency(code);
                if !series.contains(&entry) {
                    series.push(entry);
                }
            }
            _ => warn!(currency = code, "Skipping unsupported currency"),
        }
    }
    Ok(series)
}

/// Create an alert rule and check it once right away
pub async fn create_notification(
    State(state): State<AppState>,
    Json(input): Json<AlertRuleInput>,
) -> Result<(StatusCode, Json<AlertRule>), (StatusCode, String)> {
    if !state.currencies.is_supported(input.currency.trim()) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Currency '{}' is not supported", input.currency.trim()),
        ));
    }

    let candidate = input.validate().map_err(error_response)?;

    if state
        .rules
        .exists_duplicate(&candidate)
        .await
        .map_err(error_response)?
    {
        return Err(error_response(Error::conflict(
            "an identical alert rule already exists for this address",
        )));
    }

    let rule = state.rules.create(candidate).await.map_err(error_response)?;
    info!(rule_id = %rule.id, currency = %rule.series_key, direction = %rule.direction, "Created alert rule");

    match state.checks.check_rule(&rule).await {
        RuleCheck::Unresolved => {
            warn!(rule_id = %rule.id, "Immediate check skipped, no current rate");
        }
        RuleCheck::Evaluated { result, .. } => {
            info!(rule_id = %rule.id, triggered = result.triggered, "Immediate check complete");
        }
    }

    Ok((StatusCode::CREATED, Json(rule)))
}

/// Pagination for rule listing
#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    /// Rules to skip from the start
    pub skip: Option<usize>,
    /// Maximum number of rules returned
    pub limit: Option<usize>,
}

/// List alert rules
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<Vec<AlertRule>>, (StatusCode, String)> {
    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(100);

    let rules = state.rules.list().await.map_err(error_response)?;

    Ok(Json(rules.into_iter().skip(skip).take(limit).collect()))
}
