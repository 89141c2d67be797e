use std::collections::{BTreeMap, HashMap};

use crate::model::candle::Candle;

pub const DEFAULT_MAX_LENGTH: usize = 200;

/// What a single tick did to a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new bucket was appended.
    Appended,
    /// A new bucket was appended and the oldest entry was evicted.
    Evicted,
    /// The forming (last) candle was replaced.
    Updated,
    /// The tick is older than the last bucket and was dropped.
    Stale,
    /// The tick belongs to another interval than the series and was dropped.
    IntervalMismatch,
}

/// Bounded, strictly time-ordered candles of one symbol at one interval.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSeries {
    symbol: String,
    interval: String,
    max_length: usize,
    candles: Vec<Candle>,
}

impl SymbolSeries {
    pub fn new(symbol: &str, interval: &str, max_length: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            max_length: max_length.max(1),
            candles: Vec::with_capacity(max_length.max(1) + 1),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> &str {
        &self.interval
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Apply one live tick.
    ///
    /// Newer buckets are appended (evicting the oldest entry past `max_length`),
    /// the still-forming last bucket is replaced, older buckets are dropped.
    pub fn merge(&mut self, tick: Candle) -> MergeOutcome {
        match self.candles.last_mut() {
            Some(last) if tick.time_bucket == last.time_bucket => {
                *last = tick;
                MergeOutcome::Updated
            }
            Some(last) if tick.time_bucket < last.time_bucket => MergeOutcome::Stale,
            _ => {
                self.candles.push(tick);
                if self.trim() {
                    MergeOutcome::Evicted
                } else {
                    MergeOutcome::Appended
                }
            }
        }
    }

    /// Reconcile a historical snapshot with what the series already holds.
    ///
    /// The snapshot is sorted and deduplicated (last occurrence per bucket wins),
    /// then unioned with the existing entries. Buckets already closed in the
    /// series (any entry followed by a newer one) are kept as they are; the
    /// series' forming bucket and every bucket it lacks take the snapshot value.
    /// Entries newer than the snapshot's last bucket stay after it untouched.
    ///
    /// A snapshot for a different interval replaces the series outright.
    /// Returns the resulting length.
    pub fn merge_snapshot(&mut self, interval: &str, snapshot: Vec<Candle>) -> usize {
        let incoming = normalize_snapshot(snapshot);

        if self.interval != interval {
            self.interval = interval.to_string();
            self.candles = incoming;
            self.trim();
            return self.candles.len();
        }

        let forming = self.candles.last().map(|c| c.time_bucket);
        let mut merged: BTreeMap<u64, Candle> = self
            .candles
            .drain(..)
            .map(|c| (c.time_bucket, c))
            .collect();
        for candle in incoming {
            let closed_in_series =
                merged.contains_key(&candle.time_bucket) && Some(candle.time_bucket) != forming;
            if !closed_in_series {
                merged.insert(candle.time_bucket, candle);
            }
        }
        self.candles = merged.into_values().collect();
        self.trim();
        self.candles.len()
    }

    fn trim(&mut self) -> bool {
        if self.candles.len() > self.max_length {
            let excess = self.candles.len() - self.max_length;
            self.candles.drain(..excess);
            true
        } else {
            false
        }
    }
}

/// Sort ascending by bucket, keeping the last occurrence of each bucket.
fn normalize_snapshot(mut snapshot: Vec<Candle>) -> Vec<Candle> {
    snapshot.sort_by_key(|c| c.time_bucket);
    let mut out: Vec<Candle> = Vec::with_capacity(snapshot.len());
    for candle in snapshot {
        match out.last_mut() {
            Some(last) if last.time_bucket == candle.time_bucket => *last = candle,
            _ => out.push(candle),
        }
    }
    out
}

/// Per-symbol store of series. The only writer of candle data.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    max_length: usize,
    series: HashMap<String, SymbolSeries>,
}

impl CandleBuffer {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            series: HashMap::new(),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn series(&self, symbol: &str) -> Option<&SymbolSeries> {
        self.series.get(symbol)
    }

    pub fn candles(&self, symbol: &str) -> &[Candle] {
        self.series
            .get(symbol)
            .map(SymbolSeries::candles)
            .unwrap_or(&[])
    }

    pub fn merge_tick(&mut self, symbol: &str, interval: &str, tick: Candle) -> MergeOutcome {
        let series = self.series_mut(symbol, interval);
        if series.interval() != interval {
            return MergeOutcome::IntervalMismatch;
        }
        series.merge(tick)
    }

    pub fn merge_snapshot(&mut self, symbol: &str, interval: &str, snapshot: Vec<Candle>) -> usize {
        self.series_mut(symbol, interval)
            .merge_snapshot(interval, snapshot)
    }

    fn series_mut(&mut self, symbol: &str, interval: &str) -> &mut SymbolSeries {
        let max_length = self.max_length;
        self.series
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolSeries::new(symbol, interval, max_length))
    }
}

impl Default for CandleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(t: u64, close: f64) -> Candle {
        Candle::new(t, close, close, close, close)
    }

    #[test]
    fn normalize_sorts_and_keeps_last_duplicate() {
        let out = normalize_snapshot(vec![c(3000, 3.0), c(1000, 1.0), c(3000, 3.5), c(2000, 2.0)]);
        let buckets: Vec<u64> = out.iter().map(|c| c.time_bucket).collect();
        assert_eq!(buckets, vec![1000, 2000, 3000]);
        assert!((out[2].close - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_max_length_is_clamped_to_one() {
        let mut series = SymbolSeries::new("ETHUSDT", "1m", 0);
        series.merge(c(1000, 1.0));
        series.merge(c(2000, 2.0));
        assert_eq!(series.len(), 1);
        assert_eq!(series.last().map(|c| c.time_bucket), Some(2000));
    }
}
