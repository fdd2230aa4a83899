//! Real-time tick updates

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price/volume update for a symbol
///
/// Every field except `symbol` is optional because the bridge nulls out
/// values it has not seen yet (or that came through as NaN).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,

    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last: Option<Decimal>,

    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub bid: Option<Decimal>,

    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ask: Option<Decimal>,

    /// Cumulative volume for the current bar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,

    /// Exchange timestamp (fractional epoch seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

impl Tick {
    /// Tick carrying only a last price
    pub fn last(symbol: impl Into<String>, last: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            last: Some(last),
            bid: None,
            ask: None,
            volume: None,
            time: None,
        }
    }

    pub fn with_volume(mut self, volume: u64) -> Self {
        self.volume = Some(volume);
        self
    }
}
