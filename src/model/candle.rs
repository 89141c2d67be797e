/// One interval's OHLC state, keyed by the epoch-millisecond start of its bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub time_bucket: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(time_bucket: u64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time_bucket,
            open,
            high,
            low,
            close,
        }
    }

    /// Prices must be finite and the range must not be inverted.
    pub fn is_valid(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.high >= self.low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_rejects_nan_and_inverted_range() {
        assert!(Candle::new(0, 10.0, 11.0, 9.0, 10.5).is_valid());
        assert!(!Candle::new(0, f64::NAN, 11.0, 9.0, 10.5).is_valid());
        assert!(!Candle::new(0, 10.0, 11.0, f64::INFINITY, 10.5).is_valid());
        assert!(!Candle::new(0, 10.0, 9.0, 11.0, 10.0).is_valid());
    }
}
