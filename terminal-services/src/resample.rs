//! Resampler
//!
//! Aggregates a time-ascending bar sequence into coarser buckets.

use std::collections::BTreeMap;

use terminal_core::{Bar, Timeframe};

/// Aggregate `bars` into buckets of `target`
///
/// Each bar lands in `floor(time / d) * d`. The first bar of a bucket seeds
/// it; later bars widen high/low, replace close and add volume. Buckets
/// come out ascending with no gap filling. A target without a fixed
/// duration (`1M`) returns the input unchanged.
///
/// Input must be time-ascending for `close` to be the bucket's latest close.
pub fn resample(bars: &[Bar], target: Timeframe) -> Vec<Bar> {
    match target.duration_secs() {
        Some(secs) => resample_secs(bars, secs),
        None => bars.to_vec(),
    }
}

/// Resample to a free-form timeframe label
///
/// Labels outside the timeframe table fall back to the identity.
pub fn resample_label(bars: &[Bar], label: &str) -> Vec<Bar> {
    match label.parse::<Timeframe>() {
        Ok(target) => resample(bars, target),
        Err(_) => bars.to_vec(),
    }
}

/// Bucket start for `time` at width `secs`
pub fn bucket_start(time: i64, secs: i64) -> i64 {
    time.div_euclid(secs) * secs
}

fn resample_secs(bars: &[Bar], secs: i64) -> Vec<Bar> {
    if secs <= 0 {
        return bars.to_vec();
    }

    let mut buckets: BTreeMap<i64, Bar> = BTreeMap::new();

    for bar in bars {
        let bucket = bucket_start(bar.time, secs);
        buckets
            .entry(bucket)
            .and_modify(|agg| {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume = agg.volume.saturating_add(bar.volume);
            })
            .or_insert_with(|| Bar {
                time: bucket,
                ..bar.clone()
            });
    }

    buckets.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn bar(
        time: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: u64,
    ) -> Bar {
        Bar {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn minute_bars() -> Vec<Bar> {
        vec![
            bar(0, dec!(10), dec!(12), dec!(9), dec!(11), 100),
            bar(60, dec!(11), dec!(15), dec!(10), dec!(14), 50),
            bar(120, dec!(14), dec!(14), dec!(8), dec!(9), 25),
            bar(300, dec!(9), dec!(10), dec!(9), dec!(10), 10),
            bar(360, dec!(10), dec!(11), dec!(7), dec!(8), 5),
        ]
    }

    #[test]
    fn test_aggregates_into_five_minute_buckets() {
        let out = resample(&minute_bars(), Timeframe::FiveMinutes);

        assert_eq!(
            out,
            vec![
                bar(0, dec!(10), dec!(15), dec!(8), dec!(9), 175),
                bar(300, dec!(9), dec!(11), dec!(7), dec!(8), 15),
            ]
        );
    }

    #[test]
    fn test_bucket_alignment() {
        let input = minute_bars();
        for target in Timeframe::ALL {
            let Some(secs) = target.duration_secs() else {
                continue;
            };
            for out in resample(&input, target) {
                assert_eq!(out.time.rem_euclid(secs), 0, "{} not aligned", target);
            }
        }
    }

    #[test]
    fn test_volume_is_conserved() {
        let input = minute_bars();
        let total: u64 = input.iter().map(|b| b.volume).sum();

        for target in [Timeframe::FiveMinutes, Timeframe::OneHour, Timeframe::OneDay] {
            let out = resample(&input, target);
            assert_eq!(out.iter().map(|b| b.volume).sum::<u64>(), total);
        }
    }

    #[test]
    fn test_output_bars_stay_well_formed() {
        for out in resample(&minute_bars(), Timeframe::TwoMinutes) {
            assert!(out.is_well_formed());
        }
    }

    #[test]
    fn test_negative_times_floor() {
        let input = vec![bar(-30, dec!(1), dec!(1), dec!(1), dec!(1), 1)];
        let out = resample(&input, Timeframe::OneMinute);
        assert_eq!(out[0].time, -60);
    }

    #[test]
    fn test_duplicate_timestamps_fold_into_one_bucket() {
        let input = vec![
            bar(0, dec!(10), dec!(11), dec!(9), dec!(10), 1),
            bar(0, dec!(10), dec!(13), dec!(9), dec!(12), 2),
        ];
        let out = resample(&input, Timeframe::OneMinute);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].high, dec!(13));
        assert_eq!(out[0].close, dec!(12));
        assert_eq!(out[0].volume, 3);
    }

    #[test]
    fn test_identity_fallbacks() {
        let input = minute_bars();
        assert_eq!(resample(&input, Timeframe::OneMonth), input);
        assert_eq!(resample_label(&input, "7m"), input);
        assert_eq!(resample_label(&input, "5m"), resample(&input, Timeframe::FiveMinutes));
    }

    #[test]
    fn test_empty_input() {
        assert!(resample(&[], Timeframe::OneHour).is_empty());
    }
}
