//! OHLCV bar data structures

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TerminalError;
use crate::timeframe::Timeframe;

/// Bars with fewer samples than this are flagged as incomplete
pub const INCOMPLETE_BAR_THRESHOLD: usize = 100;

/// A single OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bucket start (epoch seconds)
    pub time: i64,

    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub close: Decimal,

    pub volume: u64,
}

impl Bar {
    /// Up when the bar closed at or above its open
    pub fn direction(&self) -> Direction {
        if self.close >= self.open {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    /// Check `low <= min(open, close) <= max(open, close) <= high`
    pub fn is_well_formed(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low <= body_low && body_high <= self.high
    }
}

/// Candle color for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// One point of the volume histogram drawn under the candles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumePoint {
    pub time: i64,
    pub value: u64,
    pub direction: Direction,
}

impl From<&Bar> for VolumePoint {
    fn from(bar: &Bar) -> Self {
        Self {
            time: bar.time,
            value: bar.volume,
            direction: bar.direction(),
        }
    }
}

/// Summary figures shown in the chart header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub first_close: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_bar: Option<Bar>,
}

impl SeriesStats {
    /// Compute stats for a bar sequence
    pub fn from_bars(bars: &[Bar]) -> Self {
        Self {
            first_close: bars.first().map(|b| b.close),
            last_bar: bars.last().cloned(),
        }
    }
}

/// Identifies one cached bar sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }

    /// Same symbol at a different timeframe
    pub fn with_timeframe(&self, timeframe: Timeframe) -> Self {
        Self {
            symbol: self.symbol.clone(),
            timeframe,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// A patched trailing bar, as pushed to chart clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarUpdate {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar: Bar,
    pub volume: VolumePoint,
}

// ============================================================================
// History response bars
// ============================================================================

/// Bar timestamp as the history backend sends it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTime {
    Numeric(f64),
    Text(String),
}

/// Bar exactly as returned by the history endpoint, before time mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub time: RawTime,

    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub close: Decimal,

    /// Midpoint series report -1 here
    #[serde(default)]
    pub volume: i64,
}

impl RawBar {
    /// Map the server timestamp to epoch seconds
    pub fn to_bar(&self) -> Result<Bar, TerminalError> {
        let time = match &self.time {
            RawTime::Numeric(secs) if secs.is_finite() => normalize_epoch(secs.floor() as i64),
            RawTime::Numeric(secs) => {
                return Err(TerminalError::parse(format!("Invalid bar time: {}", secs)))
            }
            RawTime::Text(text) => parse_bar_time(text)
                .ok_or_else(|| TerminalError::parse(format!("Invalid bar time: {}", text)))?,
        };

        Ok(Bar {
            time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume.max(0) as u64,
        })
    }
}

/// Millisecond timestamps are scaled down to seconds
fn normalize_epoch(value: i64) -> i64 {
    if value > 10_000_000_000 {
        value / 1000
    } else {
        value
    }
}

/// Parse a history timestamp into epoch seconds
///
/// Accepts RFC 3339, naive ISO datetimes (taken as UTC), `YYYY-MM-DD`,
/// `YYYYMMDD`, the backend's `YYYYMMDD  HH:MM:SS` form and integer epoch
/// strings. Dates resolve to midnight UTC.
pub fn parse_bar_time(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    // Eight digits is a compact date, not a 1970 epoch
    if text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(text, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp());
    }

    if let Ok(epoch) = text.parse::<i64>() {
        return Some(normalize_epoch(epoch));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp());
    }

    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y%m%d  %H:%M:%S",
        "%Y%m%d %H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc().timestamp());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}
