//! Chart timeframe definitions
//!
//! A timeframe names a bucket width. Each one also knows how to ask the
//! history backend for bars of that width, or which finer timeframe it is
//! resampled from when the backend has no native bar size for it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported chart timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1s")]
    OneSecond,
    #[serde(rename = "5s")]
    FiveSeconds,
    #[serde(rename = "10s")]
    TenSeconds,
    #[serde(rename = "15s")]
    FifteenSeconds,
    #[serde(rename = "30s")]
    ThirtySeconds,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "2m")]
    TwoMinutes,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "10m")]
    TenMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "3h")]
    ThreeHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d", alias = "1D")]
    OneDay,
    #[serde(rename = "1w", alias = "1W")]
    OneWeek,
    /// Calendar month. Months are not fixed-width, so this has no duration.
    #[serde(rename = "1M")]
    OneMonth,
}

impl Timeframe {
    /// Every timeframe, finest first
    pub const ALL: [Timeframe; 21] = [
        Timeframe::OneSecond,
        Timeframe::FiveSeconds,
        Timeframe::TenSeconds,
        Timeframe::FifteenSeconds,
        Timeframe::ThirtySeconds,
        Timeframe::OneMinute,
        Timeframe::TwoMinutes,
        Timeframe::ThreeMinutes,
        Timeframe::FiveMinutes,
        Timeframe::TenMinutes,
        Timeframe::FifteenMinutes,
        Timeframe::ThirtyMinutes,
        Timeframe::OneHour,
        Timeframe::TwoHours,
        Timeframe::ThreeHours,
        Timeframe::FourHours,
        Timeframe::SixHours,
        Timeframe::TwelveHours,
        Timeframe::OneDay,
        Timeframe::OneWeek,
        Timeframe::OneMonth,
    ];

    /// Short label used on the wire and in the UI (e.g. "1m", "4h", "1d")
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneSecond => "1s",
            Timeframe::FiveSeconds => "5s",
            Timeframe::TenSeconds => "10s",
            Timeframe::FifteenSeconds => "15s",
            Timeframe::ThirtySeconds => "30s",
            Timeframe::OneMinute => "1m",
            Timeframe::TwoMinutes => "2m",
            Timeframe::ThreeMinutes => "3m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::TenMinutes => "10m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::ThirtyMinutes => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::TwoHours => "2h",
            Timeframe::ThreeHours => "3h",
            Timeframe::FourHours => "4h",
            Timeframe::SixHours => "6h",
            Timeframe::TwelveHours => "12h",
            Timeframe::OneDay => "1d",
            Timeframe::OneWeek => "1w",
            Timeframe::OneMonth => "1M",
        }
    }

    /// Bucket width in seconds, `None` when the timeframe is not fixed-width
    pub fn duration_secs(&self) -> Option<i64> {
        const MINUTE: i64 = 60;
        const HOUR: i64 = 60 * MINUTE;
        const DAY: i64 = 24 * HOUR;

        let secs = match self {
            Timeframe::OneSecond => 1,
            Timeframe::FiveSeconds => 5,
            Timeframe::TenSeconds => 10,
            Timeframe::FifteenSeconds => 15,
            Timeframe::ThirtySeconds => 30,
            Timeframe::OneMinute => MINUTE,
            Timeframe::TwoMinutes => 2 * MINUTE,
            Timeframe::ThreeMinutes => 3 * MINUTE,
            Timeframe::FiveMinutes => 5 * MINUTE,
            Timeframe::TenMinutes => 10 * MINUTE,
            Timeframe::FifteenMinutes => 15 * MINUTE,
            Timeframe::ThirtyMinutes => 30 * MINUTE,
            Timeframe::OneHour => HOUR,
            Timeframe::TwoHours => 2 * HOUR,
            Timeframe::ThreeHours => 3 * HOUR,
            Timeframe::FourHours => 4 * HOUR,
            Timeframe::SixHours => 6 * HOUR,
            Timeframe::TwelveHours => 12 * HOUR,
            Timeframe::OneDay => DAY,
            Timeframe::OneWeek => 7 * DAY,
            Timeframe::OneMonth => return None,
        };
        Some(secs)
    }

    /// Where bars for this timeframe come from
    pub fn series_source(&self) -> SeriesSource {
        let (bar_size, duration) = match self {
            Timeframe::OneSecond => ("1 secs", "1 D"),
            Timeframe::FiveSeconds => ("5 secs", "1 D"),
            Timeframe::TenSeconds => ("10 secs", "1 D"),
            Timeframe::FifteenSeconds => ("15 secs", "1 D"),
            Timeframe::ThirtySeconds => ("30 secs", "1 D"),
            Timeframe::OneMinute => ("1 min", "1 D"),
            Timeframe::TwoMinutes => ("2 mins", "1 D"),
            Timeframe::ThreeMinutes => ("3 mins", "1 D"),
            Timeframe::FiveMinutes => ("5 mins", "5 D"),
            Timeframe::TenMinutes => ("10 mins", "5 D"),
            Timeframe::FifteenMinutes => ("15 mins", "5 D"),
            Timeframe::ThirtyMinutes => ("30 mins", "5 D"),
            Timeframe::OneHour => ("1 hour", "1 M"),
            Timeframe::TwoHours => ("2 hours", "2 M"),
            Timeframe::ThreeHours => ("3 hours", "2 M"),
            Timeframe::FourHours => ("4 hours", "2 M"),
            Timeframe::SixHours | Timeframe::TwelveHours => {
                return SeriesSource::Resampled(Timeframe::OneHour)
            }
            Timeframe::OneDay => ("1 day", "1 Y"),
            Timeframe::OneWeek => ("1 week", "2 Y"),
            Timeframe::OneMonth => ("1 month", "3 Y"),
        };
        SeriesSource::Native { bar_size, duration }
    }

    /// Native history request `(barSize, durationStr)` for this timeframe
    ///
    /// `None` means the backend cannot serve this width directly.
    pub fn history_params(&self) -> Option<(&'static str, &'static str)> {
        match self.series_source() {
            SeriesSource::Native { bar_size, duration } => Some((bar_size, duration)),
            SeriesSource::Resampled(_) => None,
        }
    }

    /// Finer timeframe this one is built from when it has no native bar size
    pub fn resample_source(&self) -> Option<Timeframe> {
        match self.series_source() {
            SeriesSource::Resampled(source) => Some(source),
            SeriesSource::Native { .. } => None,
        }
    }
}

/// How a timeframe's series is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesSource {
    /// Requested from the history backend at this bar size
    Native {
        bar_size: &'static str,
        duration: &'static str,
    },
    /// Aggregated from a finer timeframe the backend does serve
    Resampled(Timeframe),
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "1m" and "1M" are different timeframes, so only day/week accept either case
        let s = s.trim();
        match s {
            "1D" => return Ok(Timeframe::OneDay),
            "1W" => return Ok(Timeframe::OneWeek),
            _ => {}
        }
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| format!("Unknown timeframe: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip_through_from_str() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>(), Ok(tf));
        }
    }

    #[test]
    fn test_minute_and_month_are_distinct() {
        assert_eq!("1m".parse::<Timeframe>(), Ok(Timeframe::OneMinute));
        assert_eq!("1M".parse::<Timeframe>(), Ok(Timeframe::OneMonth));
        assert_eq!("1D".parse::<Timeframe>(), Ok(Timeframe::OneDay));
        assert!("7m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_durations() {
        assert_eq!(Timeframe::OneMinute.duration_secs(), Some(60));
        assert_eq!(Timeframe::FourHours.duration_secs(), Some(14_400));
        assert_eq!(Timeframe::OneDay.duration_secs(), Some(86_400));
        assert_eq!(Timeframe::OneMonth.duration_secs(), None);
    }

    #[test]
    fn test_history_params() {
        assert_eq!(Timeframe::OneMinute.history_params(), Some(("1 min", "1 D")));
        assert_eq!(Timeframe::OneDay.history_params(), Some(("1 day", "1 Y")));
        assert_eq!(Timeframe::SixHours.history_params(), None);
        assert_eq!(Timeframe::SixHours.resample_source(), Some(Timeframe::OneHour));
    }

    #[test]
    fn test_resample_sources_are_native() {
        for tf in Timeframe::ALL {
            if let SeriesSource::Resampled(source) = tf.series_source() {
                assert!(source < tf);
                assert!(source.history_params().is_some());
            }
        }
    }

    #[test]
    fn test_serde_uses_labels() {
        let json = serde_json::to_string(&Timeframe::FifteenMinutes).unwrap();
        assert_eq!(json, "\"15m\"");
        let tf: Timeframe = serde_json::from_str("\"1D\"").unwrap();
        assert_eq!(tf, Timeframe::OneDay);
    }
}
