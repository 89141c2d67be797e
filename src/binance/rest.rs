use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde_json::Value;

use super::types::{kline_row_to_candle, BinanceApiErrorResponse};
use crate::error::SyncError;
use crate::model::candle::Candle;
use crate::sync::fetcher::HistoricalFetcher;
use crate::sync::window::now_ms;

/// Binance caps `/api/v3/klines` at 1000 rows per request.
pub const MAX_KLINES_LIMIT: usize = 1000;

pub struct BinanceRestClient {
    http: reqwest::Client,
    base_url: String,
    snapshot_limit: usize,
    // Simple rate limiter: request count in current minute window
    request_count: AtomicU64,
    window_start: std::sync::Mutex<Instant>,
}

impl BinanceRestClient {
    pub fn new(base_url: &str, snapshot_limit: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            snapshot_limit: snapshot_limit.clamp(1, MAX_KLINES_LIMIT),
            request_count: AtomicU64::new(0),
            window_start: std::sync::Mutex::new(Instant::now()),
        }
    }

    pub fn snapshot_limit(&self) -> usize {
        self.snapshot_limit
    }

    fn check_rate_limit(&self) {
        if let Ok(mut start) = self.window_start.lock() {
            if start.elapsed().as_secs() >= 60 {
                *start = Instant::now();
                self.request_count.store(0, Ordering::Relaxed);
            }
        }
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count > 960 {
            tracing::warn!(count, "Approaching rate limit (80% of 1200/min)");
        }
    }

    pub async fn ping(&self) -> Result<(), SyncError> {
        let url = format!("{}/api/v3/ping", self.base_url);
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("ping failed: {}", e)))?
            .error_for_status()
            .map_err(|e| SyncError::Network(format!("ping returned error status: {}", e)))?;
        Ok(())
    }

    /// GET /api/v3/klines for `[start_ms, end_ms]`, ascending by open time.
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: u64,
        end_ms: u64,
        limit: usize,
    ) -> Result<Vec<Candle>, SyncError> {
        self.check_rate_limit();

        let url = format!("{}/api/v3/klines", self.base_url);
        let query = klines_query(symbol, interval, start_ms, end_ms, limit);
        let resp = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("get_klines HTTP failed: {}", e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SyncError::Network(format!("get_klines body read failed: {}", e)))?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<BinanceApiErrorResponse>(&body) {
                return Err(SyncError::BinanceApi {
                    code: err.code,
                    msg: err.msg,
                });
            }
            return Err(SyncError::Network(format!(
                "get_klines returned {}: {}",
                status, body
            )));
        }

        parse_klines_body(&body)
    }
}

impl HistoricalFetcher for BinanceRestClient {
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        window_ms: u64,
        generation: u64,
    ) -> Result<Vec<Candle>, SyncError> {
        let end_ms = now_ms();
        let start_ms = end_ms.saturating_sub(window_ms);
        tracing::debug!(symbol, interval, start_ms, end_ms, generation, "Fetching kline snapshot");
        let candles = self
            .get_klines(
                &symbol.to_ascii_uppercase(),
                interval,
                start_ms,
                end_ms,
                self.snapshot_limit,
            )
            .await?;
        tracing::info!(symbol, interval, generation, count = candles.len(), "Fetched historical klines");
        Ok(candles)
    }
}

pub fn klines_query(
    symbol: &str,
    interval: &str,
    start_ms: u64,
    end_ms: u64,
    limit: usize,
) -> Vec<(&'static str, String)> {
    vec![
        ("symbol", symbol.to_ascii_uppercase()),
        ("interval", interval.to_string()),
        ("startTime", start_ms.to_string()),
        ("endTime", end_ms.to_string()),
        ("limit", limit.clamp(1, MAX_KLINES_LIMIT).to_string()),
    ]
}

/// Decode a klines response body. Any unparseable row fails the whole snapshot.
pub fn parse_klines_body(body: &str) -> Result<Vec<Candle>, SyncError> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)?;
    let mut candles = rows
        .iter()
        .map(|row| kline_row_to_candle(row))
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.time_bucket);
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn klines_query_uppercases_symbol_and_clamps_limit() {
        let q = klines_query("ethusdt", "1m", 1_000, 2_000, 5_000);
        assert_eq!(
            q,
            vec![
                ("symbol", "ETHUSDT".to_string()),
                ("interval", "1m".to_string()),
                ("startTime", "1000".to_string()),
                ("endTime", "2000".to_string()),
                ("limit", "1000".to_string()),
            ]
        );
    }

    #[test]
    fn parse_klines_body_sorts_rows() {
        let body = r#"[
            [120000,"2.0","2.5","1.5","2.2","10",179999,"0",1,"0","0","0"],
            [60000,"1.0","1.5","0.5","1.2","10",119999,"0",1,"0","0","0"]
        ]"#;
        let candles = parse_klines_body(body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time_bucket, 60_000);
        assert_eq!(candles[1].time_bucket, 120_000);
    }

    #[test]
    fn parse_klines_body_rejects_error_objects_and_bad_rows() {
        assert!(matches!(
            parse_klines_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#),
            Err(SyncError::Parse(_))
        ));
        assert!(matches!(
            parse_klines_body(r#"[[60000,"x","1","1","1"]]"#),
            Err(SyncError::Parse(_))
        ));
    }

    #[test]
    fn snapshot_limit_is_clamped() {
        assert_eq!(BinanceRestClient::new("https://x/", 0).snapshot_limit(), 1);
        assert_eq!(BinanceRestClient::new("https://x", 5000).snapshot_limit(), 1000);
    }
}
