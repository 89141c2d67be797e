use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("binance API error (code {code}): {msg}")]
    BinanceApi { code: i64, msg: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("unknown interval '{0}'")]
    UnknownInterval(String),

    #[error("switch superseded by generation {generation}")]
    Superseded { generation: u64 },

    #[error("engine is shut down")]
    Closed,
}

impl SyncError {
    /// Transport failures and non-success responses from the snapshot endpoint.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::BinanceApi { .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
