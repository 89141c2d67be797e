use std::fmt;

/// The live target of the engine. A fresh value is built on every switch;
/// `generation` only ever grows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub symbol: String,
    pub interval: String,
    pub generation: u64,
}

impl Subscription {
    pub fn new(symbol: &str, interval: &str, generation: u64) -> Self {
        Self {
            symbol: symbol.trim().to_ascii_uppercase(),
            interval: interval.trim().to_string(),
            generation,
        }
    }

    /// Binance stream name, e.g. `ethusdt@kline_1m`.
    pub fn stream_name(&self) -> String {
        format!(
            "{}@kline_{}",
            self.symbol.to_ascii_lowercase(),
            self.interval
        )
    }

    pub fn same_target(&self, symbol: &str, interval: &str) -> bool {
        self.symbol.eq_ignore_ascii_case(symbol.trim()) && self.interval == interval.trim()
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} (gen {})", self.symbol, self.interval, self.generation)
    }
}
