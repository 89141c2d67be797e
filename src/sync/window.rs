use crate::model::candle::Candle;

pub const DEFAULT_WINDOW_MS: u64 = 20 * 60 * 1000;

/// Trailing slice of `series` whose buckets satisfy `now - bucket <= window`.
///
/// `series` must be ascending by bucket; the result is then always a suffix.
/// Buckets ahead of `now` count as inside the window.
pub fn query(series: &[Candle], now_ms: u64, window_ms: u64) -> &[Candle] {
    let start = series.partition_point(|c| now_ms.saturating_sub(c.time_bucket) > window_ms);
    &series[start..]
}

/// Wall-clock epoch milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
