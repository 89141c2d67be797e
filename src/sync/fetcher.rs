use std::future::Future;

use crate::error::SyncError;
use crate::model::candle::Candle;

/// Source of historical candle snapshots.
///
/// Implementations never touch shared state; the supervisor decides whether the
/// returned candles are still wanted.
pub trait HistoricalFetcher: Send + Sync + 'static {
    /// Candles of the trailing `window_ms` ending now, capped at the source's
    /// maximum count.
    fn fetch_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        window_ms: u64,
        generation: u64,
    ) -> impl Future<Output = Result<Vec<Candle>, SyncError>> + Send;
}
