//! IBKR bridge API types

use serde::{Deserialize, Serialize};
use terminal_core::{RawBar, Timeframe};

/// Default bridge REST base URL
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";

/// Default bridge tick stream URL
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws/stream";

/// Body of `POST /api/history`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    pub symbol: String,
    pub duration_str: String,
    pub bar_size: String,
    pub what_to_show: WhatToShow,
    #[serde(rename = "useRTH")]
    pub use_rth: bool,
    /// Empty string means "now"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub end_date_time: String,
}

impl HistoryRequest {
    /// Build the request for a timeframe, `None` if it has no native bar size
    pub fn for_timeframe(symbol: &str, timeframe: Timeframe) -> Option<Self> {
        let (bar_size, duration_str) = timeframe.history_params()?;
        Some(Self {
            symbol: symbol.to_string(),
            duration_str: duration_str.to_string(),
            bar_size: bar_size.to_string(),
            what_to_show: WhatToShow::for_symbol(symbol),
            use_rth: false,
            end_date_time: String::new(),
        })
    }
}

/// Which price series the bridge aggregates into bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WhatToShow {
    Trades,
    Midpoint,
}

impl WhatToShow {
    /// FX pairs (`EUR.USD`) have no trade prints, only midpoints
    pub fn for_symbol(symbol: &str) -> Self {
        if is_fx_symbol(symbol) {
            WhatToShow::Midpoint
        } else {
            WhatToShow::Trades
        }
    }
}

/// `BASE.QUOTE` notation marks a currency pair
pub fn is_fx_symbol(symbol: &str) -> bool {
    match symbol.split_once('.') {
        Some((base, quote)) => !base.is_empty() && !quote.is_empty(),
        None => false,
    }
}

/// Response of `POST /api/history`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub bar_count: Option<usize>,
    #[serde(default)]
    pub bars: Vec<RawBar>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_request_wire_format() {
        let request = HistoryRequest::for_timeframe("AAPL", Timeframe::OneMinute).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["symbol"], "AAPL");
        assert_eq!(json["barSize"], "1 min");
        assert_eq!(json["durationStr"], "1 D");
        assert_eq!(json["whatToShow"], "TRADES");
        assert_eq!(json["useRTH"], false);
        assert!(json.get("endDateTime").is_none());
    }

    #[test]
    fn test_fx_symbols_use_midpoint() {
        let request = HistoryRequest::for_timeframe("EUR.USD", Timeframe::OneDay).unwrap();
        assert_eq!(request.what_to_show, WhatToShow::Midpoint);
        assert!(!is_fx_symbol("BRK."));
        assert!(!is_fx_symbol("MSFT"));
    }

    #[test]
    fn test_unmapped_timeframe_has_no_request() {
        assert!(HistoryRequest::for_timeframe("AAPL", Timeframe::SixHours).is_none());
    }

    #[test]
    fn test_history_response_decodes() {
        let json = r#"{"symbol":"AAPL","barCount":1,"bars":[
            {"time":"2024-01-02T09:30:00-05:00","open":185.0,"high":186.1,"low":184.9,"close":185.6,"volume":1200}
        ]}"#;
        let response: HistoryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.bar_count, Some(1));
        assert_eq!(response.bars.len(), 1);
    }
}
