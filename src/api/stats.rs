use crate::aggregate::timeseries::{Granularity, TimeBucket};
use crate::aggregate::{AggregateOptions, MetricsResult, PageStats, ReferrerStats, TimeWindow};
use crate::api::errors::ApiError;
use crate::ingest::handler::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// Upper bound on the `limit` query parameter.
const MAX_LIMIT: usize = 100;

/// Longest explicit `start`..`end` window, in days.
const MAX_WINDOW_DAYS: i64 = 366;

/// Query parameters for the site read endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    #[serde(default = "default_period")]
    pub period: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub compare: bool,
}

fn default_period() -> String {
    "7d".to_string()
}

/// Validate that a `site_id` parameter is safe for use in queries and storage.
///
/// - Must be non-empty and at most 256 bytes.
/// - Must contain only alphanumeric ASCII characters or `.`, `-`, `_`, `:`.
///
/// Used by both the read handlers and the collector so that a site accepted
/// at ingestion is also queryable.
pub fn validate_site_id(site_id: &str) -> Result<(), ApiError> {
    if site_id.is_empty() {
        return Err(ApiError::BadRequest(
            "site_id must not be empty".to_string(),
        ));
    }
    if site_id.len() > 256 {
        return Err(ApiError::BadRequest(
            "site_id must be at most 256 characters".to_string(),
        ));
    }
    let valid = site_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));
    if !valid {
        return Err(ApiError::BadRequest(
            "site_id may only contain alphanumeric characters, '.', '-', '_', ':'".to_string(),
        ));
    }
    Ok(())
}

/// Span of a relative timeframe preset.
fn preset_span(period: &str) -> Option<Duration> {
    match period {
        "24h" => Some(Duration::hours(24)),
        "7d" => Some(Duration::days(7)),
        "30d" => Some(Duration::days(30)),
        "90d" => Some(Duration::days(90)),
        _ => None,
    }
}

fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest(format!("Invalid {name}: expected an RFC 3339 timestamp")))
}

impl StatsParams {
    /// Resolve the query window, relative to `now` for presets.
    ///
    /// Explicit `start` and `end` take precedence over `period`, must be
    /// given together, and may span at most a year.
    pub fn window(&self, now: DateTime<Utc>) -> Result<TimeWindow, ApiError> {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => {
                let start = parse_timestamp("start", start)?;
                let end = parse_timestamp("end", end)?;
                let window = TimeWindow::new(start, end)?;
                if window.duration() > Duration::days(MAX_WINDOW_DAYS) {
                    return Err(ApiError::BadRequest(format!(
                        "Window must span at most {MAX_WINDOW_DAYS} days"
                    )));
                }
                Ok(window)
            }
            (None, None) => {
                let span = preset_span(&self.period).ok_or_else(|| {
                    ApiError::BadRequest(format!(
                        "Invalid period: {}. Use '24h', '7d', '30d', '90d', or provide start and end.",
                        self.period
                    ))
                })?;
                Ok(TimeWindow::ending_at(now, span))
            }
            _ => Err(ApiError::BadRequest(
                "start and end must be provided together".to_string(),
            )),
        }
    }

    /// Requested list length, falling back to `default` and capped.
    pub fn limit_or(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).min(MAX_LIMIT)
    }
}

fn resolve(site_id: &str, params: &StatsParams) -> Result<TimeWindow, ApiError> {
    validate_site_id(site_id)?;
    params.window(Utc::now())
}

/// GET /api/sites/{site_id}/metrics: Consolidated metrics, optionally with
/// changes against the preceding window.
pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Json<MetricsResult>, ApiError> {
    let window = resolve(&site_id, &params)?;
    let options = AggregateOptions {
        include_changes: params.compare,
        limit: params.limit_or(state.default_limit),
    };
    let result = state.aggregator.aggregate(&site_id, window, options).await?;
    Ok(Json(result))
}

/// GET /api/sites/{site_id}/visitors: Time-bucketed visitor/pageview counts.
pub async fn get_visitors(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<TimeBucket>>, ApiError> {
    let window = resolve(&site_id, &params)?;
    let granularity = Granularity::for_window(&window);
    let result = state
        .aggregator
        .timeseries(&site_id, window, granularity)
        .await?;
    Ok(Json(result))
}

/// GET /api/sites/{site_id}/pages: Top pages.
pub async fn get_pages(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<PageStats>>, ApiError> {
    let window = resolve(&site_id, &params)?;
    let limit = params.limit_or(state.default_limit);
    let result = state.aggregator.top_pages(&site_id, window, limit).await?;
    Ok(Json(result))
}

/// GET /api/sites/{site_id}/referrers: Top referrer domains.
pub async fn get_referrers(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<ReferrerStats>>, ApiError> {
    let window = resolve(&site_id, &params)?;
    let limit = params.limit_or(state.default_limit);
    let result = state
        .aggregator
        .top_referrers(&site_id, window, limit)
        .await?;
    Ok(Json(result))
}
