use serde::Deserialize;
use serde_json::Value;

use crate::error::SyncError;
use crate::model::candle::Candle;

/// Deserialize Binance string-encoded numbers to f64.
pub fn string_to_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

/// Bucket open time, sent either as a JSON number or as numeric text.
pub fn number_or_string_to_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse::<u64>().map_err(serde::de::Error::custom),
    }
}

/// Binance kline stream event (symbol@kline_interval).
#[derive(Debug, Deserialize)]
pub struct BinanceKlineEvent {
    #[serde(rename = "e", default)]
    pub event_type: String,
    #[serde(rename = "E", default)]
    pub event_time: u64,
    #[serde(rename = "s", default)]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: BinanceKline,
}

#[derive(Debug, Deserialize)]
pub struct BinanceKline {
    #[serde(rename = "t", deserialize_with = "number_or_string_to_u64")]
    pub open_time: u64,
    #[serde(rename = "i", default)]
    pub interval: String,
    #[serde(rename = "o", deserialize_with = "string_to_f64")]
    pub open: f64,
    #[serde(rename = "h", deserialize_with = "string_to_f64")]
    pub high: f64,
    #[serde(rename = "l", deserialize_with = "string_to_f64")]
    pub low: f64,
    #[serde(rename = "c", deserialize_with = "string_to_f64")]
    pub close: f64,
    #[serde(rename = "x", default)]
    pub is_closed: bool,
}

impl BinanceKline {
    pub fn to_candle(&self) -> Candle {
        Candle::new(self.open_time, self.open, self.high, self.low, self.close)
    }
}

/// Binance API error response.
#[derive(Debug, Deserialize)]
pub struct BinanceApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

/// Parse one inbound stream message into a candle tick.
pub fn parse_kline_message(text: &str) -> Result<Candle, SyncError> {
    let event: BinanceKlineEvent = serde_json::from_str(text)?;
    let candle = event.kline.to_candle();
    if !candle.is_valid() {
        return Err(SyncError::Parse(format!(
            "invalid kline values at bucket {}",
            candle.time_bucket
        )));
    }
    Ok(candle)
}

/// Map one REST kline row `[openTime, open, high, low, close, ...]` to a candle.
/// Fields past the fifth position are ignored.
pub fn kline_row_to_candle(row: &[Value]) -> Result<Candle, SyncError> {
    if row.len() < 5 {
        return Err(SyncError::Parse(format!(
            "kline row has {} fields, expected at least 5",
            row.len()
        )));
    }
    let time_bucket = row[0]
        .as_u64()
        .ok_or_else(|| SyncError::Parse(format!("invalid open time: {}", row[0])))?;
    let candle = Candle::new(
        time_bucket,
        value_to_f64(&row[1], "open")?,
        value_to_f64(&row[2], "high")?,
        value_to_f64(&row[3], "low")?,
        value_to_f64(&row[4], "close")?,
    );
    if !candle.is_valid() {
        return Err(SyncError::Parse(format!(
            "invalid kline values at bucket {}",
            time_bucket
        )));
    }
    Ok(candle)
}

fn value_to_f64(v: &Value, field: &str) -> Result<f64, SyncError> {
    match v {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| SyncError::Parse(format!("{} '{}': {}", field, s, e))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| SyncError::Parse(format!("{}: invalid number", field))),
        other => Err(SyncError::Parse(format!(
            "{}: expected numeric value, got {}",
            field, other
        ))),
    }
}
