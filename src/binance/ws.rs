use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite;

use super::types::parse_kline_message;
use crate::error::SyncError;
use crate::model::subscription::Subscription;
use crate::sync::stream::{ConnectionHandle, StreamConnector, StreamSink};

/// Opens one `<symbol>@kline_<interval>` stream per subscription. No automatic
/// reconnection: an unexpected end is reported and left to the supervisor.
pub struct BinanceWsClient {
    ws_base_url: String,
}

impl BinanceWsClient {
    pub fn new(ws_base_url: &str) -> Self {
        Self {
            ws_base_url: ws_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self, subscription: &Subscription) -> String {
        format!("{}/{}", self.ws_base_url, subscription.stream_name())
    }
}

impl StreamConnector for BinanceWsClient {
    fn open(&self, subscription: &Subscription, sink: StreamSink) -> ConnectionHandle {
        let (handle, shutdown) = ConnectionHandle::new();
        let url = self.stream_url(subscription);
        tokio::spawn(run_stream(url, sink, shutdown));
        handle
    }
}

async fn run_stream(url: String, sink: StreamSink, mut shutdown: watch::Receiver<bool>) {
    match connect_once(&url, &sink, &mut shutdown).await {
        Ok(()) => {
            sink.closed(true).await;
        }
        Err(e) => {
            sink.error(e).await;
            sink.closed(false).await;
        }
    }
}

/// Runs until shutdown is requested (`Ok`) or the transport fails (`Err`).
async fn connect_once(
    url: &str,
    sink: &StreamSink,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SyncError> {
    if *shutdown.borrow() {
        return Ok(());
    }
    tracing::debug!(url, connection = sink.connection(), "Connecting");

    let connected = tokio::select! {
        res = tokio_tungstenite::connect_async(url) => res,
        _ = shutdown.changed() => return Ok(()),
    };
    let (ws_stream, _resp) =
        connected.map_err(|e| SyncError::Connection(format!("WebSocket connect failed: {}", e)))?;

    if !sink.connected().await {
        return Ok(());
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        let delivered = match parse_kline_message(&text) {
                            Ok(candle) => sink.tick(candle).await,
                            Err(e) => {
                                tracing::debug!(error = %e, "Failed to parse WS message");
                                sink.error(e).await
                            }
                        };
                        if !delivered {
                            let _ = write.close().await;
                            return Ok(());
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tokio-tungstenite handles pong automatically
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return Err(SyncError::Connection(format!(
                            "WebSocket closed by server: {:?}",
                            frame
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(SyncError::Connection(format!("WebSocket read error: {}", e)));
                    }
                    None => {
                        return Err(SyncError::Connection("WebSocket stream ended".to_string()));
                    }
                }
            }
            _ = shutdown.changed() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                let _ = write.close().await;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_joins_base_and_stream_name() {
        let client = BinanceWsClient::new("wss://stream.binance.com:9443/ws/");
        let sub = Subscription::new("DOTUSDT", "3m", 1);
        assert_eq!(
            client.stream_url(&sub),
            "wss://stream.binance.com:9443/ws/dotusdt@kline_3m"
        );
    }
}
