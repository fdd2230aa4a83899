//! Candle endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use terminal_core::{SeriesKey, Timeframe};
use terminal_services::CacheEntry;
use tracing::{debug, info};

use crate::AppState;

/// Query parameters for candles
#[derive(Debug, Deserialize)]
pub struct CandlesQuery {
    /// Re-fetch even if the series is cached
    #[serde(default)]
    pub refresh: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Timeframe listing entry
#[derive(Debug, Serialize)]
pub struct TimeframeInfo {
    pub label: &'static str,
    pub duration_secs: Option<i64>,
    /// Built from a finer series rather than fetched directly
    pub resampled: bool,
}

/// Create candle routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/candles/{symbol}/{timeframe}", get(get_candles))
        .route("/timeframes", get(list_timeframes))
}

/// Get the bar series for a symbol and timeframe
///
/// A series that cannot be fetched comes back empty rather than as an error,
/// so the chart renders an empty state.
async fn get_candles(
    State(state): State<AppState>,
    Path((symbol, timeframe_str)): Path<(String, String)>,
    Query(query): Query<CandlesQuery>,
) -> impl IntoResponse {
    let timeframe: Timeframe = match timeframe_str.parse() {
        Ok(tf) => tf,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: e })).into_response();
        }
    };

    let symbol = symbol.trim();
    if symbol.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Missing symbol".to_string(),
            }),
        )
            .into_response();
    }

    let key = SeriesKey::new(symbol, timeframe);
    info!("Fetching candles for {}", key);

    let fetcher = Arc::clone(&state.history);
    let entry = if query.refresh {
        state.cache.refresh(&key, fetcher).await
    } else {
        state.cache.load(&key, fetcher).await
    };

    let entry = match entry {
        Some(entry) => entry,
        None => {
            debug!("No data for {}, returning empty series", key);
            Arc::new(CacheEntry::new(key, Vec::new()))
        }
    };

    (StatusCode::OK, Json(entry.as_ref())).into_response()
}

/// List supported timeframes
async fn list_timeframes() -> Json<Vec<TimeframeInfo>> {
    Json(
        Timeframe::ALL
            .into_iter()
            .map(|tf| TimeframeInfo {
                label: tf.as_str(),
                duration_secs: tf.duration_secs(),
                resampled: tf.resample_source().is_some(),
            })
            .collect(),
    )
}
