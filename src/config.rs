use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "KLINE_SYNC_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub binance: BinanceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    pub rest_base_url: String,
    pub ws_base_url: String,
    /// Symbol selected at startup; always part of the whitelist.
    pub symbol: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Interval selected at startup; always part of the whitelist.
    pub kline_interval: String,
    #[serde(default)]
    pub intervals: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_history_window_ms")]
    pub history_window_ms: u64,
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            window_ms: default_window_ms(),
            history_window_ms: default_history_window_ms(),
            snapshot_limit: default_snapshot_limit(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_max_length() -> usize {
    200
}

fn default_window_ms() -> u64 {
    20 * 60 * 1000
}

fn default_history_window_ms() -> u64 {
    10 * 60 * 1000
}

fn default_snapshot_limit() -> usize {
    200
}

fn default_channel_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_backoff_factor(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_refresh_rate_ms")]
    pub refresh_rate_ms: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: default_refresh_rate_ms(),
        }
    }
}

fn default_refresh_rate_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Parse a Binance kline interval string (e.g. "1s", "1m", "1h", "1d", "1w", "1M") into milliseconds.
pub fn parse_interval_ms(s: &str) -> Result<u64> {
    if s.len() < 2 {
        bail!("invalid interval '{}': expected format like '1m'", s);
    }

    let (num_str, suffix) = s.split_at(s.len() - 1);
    let n: u64 = num_str.parse().with_context(|| {
        format!(
            "invalid interval '{}': quantity must be a positive integer",
            s
        )
    })?;
    if n == 0 {
        bail!("invalid interval '{}': quantity must be > 0", s);
    }

    let unit_ms = match suffix {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 7 * 86_400_000,
        "M" => 30 * 86_400_000,
        _ => bail!(
            "invalid interval '{}': unsupported suffix '{}', expected one of s/m/h/d/w/M",
            s,
            suffix
        ),
    };

    n.checked_mul(unit_ms)
        .with_context(|| format!("invalid interval '{}': value is too large", s))
}

impl BinanceConfig {
    pub fn kline_interval_ms(&self) -> Result<u64> {
        parse_interval_ms(&self.kline_interval)
    }

    /// Symbol whitelist: the startup symbol first, then `symbols`, upper-cased
    /// and deduplicated.
    pub fn tradable_symbols(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.symbol.trim().is_empty() {
            out.push(self.symbol.trim().to_ascii_uppercase());
        }
        for sym in &self.symbols {
            let s = sym.trim().to_ascii_uppercase();
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out
    }

    /// Interval whitelist: the startup interval first, then `intervals`,
    /// deduplicated. Case is significant ("1m" vs "1M").
    pub fn kline_intervals(&self) -> Vec<String> {
        let mut out = Vec::new();
        for iv in std::iter::once(&self.kline_interval).chain(self.intervals.iter()) {
            let iv = iv.trim();
            if !iv.is_empty() && !out.iter().any(|v: &String| v == iv) {
                out.push(iv.to_string());
            }
        }
        out
    }
}

impl Config {
    /// Load `.env`, then the TOML file named by `KLINE_SYNC_CONFIG`
    /// (default `config/default.toml`).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.binance.tradable_symbols().is_empty() {
            bail!("binance.symbol must not be empty");
        }
        let intervals = self.binance.kline_intervals();
        if intervals.is_empty() {
            bail!("binance.kline_interval must not be empty");
        }
        for iv in &intervals {
            parse_interval_ms(iv).with_context(|| format!("binance.intervals contains '{}'", iv))?;
        }
        if self.sync.max_length == 0 {
            bail!("sync.max_length must be > 0");
        }
        if self.sync.window_ms == 0 {
            bail!("sync.window_ms must be > 0");
        }
        if self.sync.snapshot_limit == 0 || self.sync.snapshot_limit > 1000 {
            bail!("sync.snapshot_limit must be within 1..=1000");
        }
        if self.reconnect.enabled && self.reconnect.initial_delay_ms == 0 {
            bail!("reconnect.initial_delay_ms must be > 0 when reconnect is enabled");
        }
        Ok(())
    }
}
