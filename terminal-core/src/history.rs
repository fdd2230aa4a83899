//! History backend abstraction

use async_trait::async_trait;

use crate::bar::RawBar;
use crate::error::TerminalResult;
use crate::timeframe::Timeframe;

/// Source of historical bars
///
/// Implementations should only be asked for timeframes whose
/// [`Timeframe::history_params`] is `Some`.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch raw bars for `symbol` at the timeframe's native bar size
    async fn fetch_bars(&self, symbol: &str, timeframe: Timeframe) -> TerminalResult<Vec<RawBar>>;
}
