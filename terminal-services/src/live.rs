//! Live Updater
//!
//! Patches the trailing bar of a cached series with a tick.

use terminal_core::{Bar, Tick, VolumePoint};

use crate::bar_cache::CacheEntry;

/// Extend the entry's last bar with `tick.last`
///
/// No-op (`None`) unless the symbols match, the tick carries a last price
/// and the entry has at least one bar. Close takes the tick price, high and
/// low widen to include it, open and time stay put. A tick volume
/// overwrites the bar's volume. Never appends a bar and never looks at
/// `tick.time`.
pub fn apply_tick(entry: &mut CacheEntry, tick: &Tick) -> Option<Bar> {
    if tick.symbol != entry.key.symbol {
        return None;
    }
    let last = tick.last?;
    let bar = entry.bars.last_mut()?;

    bar.close = last;
    bar.high = bar.high.max(last);
    bar.low = bar.low.min(last);
    if let Some(volume) = tick.volume {
        bar.volume = volume;
    }
    let updated = bar.clone();

    match entry.volume.last_mut() {
        Some(point) if point.time == updated.time => *point = VolumePoint::from(&updated),
        _ => entry.volume.push(VolumePoint::from(&updated)),
    }
    entry.stats.last_bar = Some(updated.clone());

    Some(updated)
}
