#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Notify};

use kline_sync::error::SyncError;
use kline_sync::model::candle::Candle;
use kline_sync::model::subscription::Subscription;
use kline_sync::sync::{
    ConnectionHandle, HistoricalFetcher, StreamConnector, StreamSink, SupervisorSettings,
};

pub fn candle(t: u64, close: f64) -> Candle {
    Candle::new(t, close, close + 1.0, close - 1.0, close)
}

pub fn settings() -> SupervisorSettings {
    SupervisorSettings::new(&["ETHUSDT", "BNBUSDT", "DOTUSDT"], &["1m", "3m", "5m"])
}

#[derive(Default)]
struct FetcherState {
    responses: HashMap<(String, String), Result<Vec<Candle>, SyncError>>,
    gates: HashMap<String, Arc<Notify>>,
    calls: Vec<(String, String, u64)>,
}

/// Fetcher answering from a table; symbols can be gated until released.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    state: Arc<Mutex<FetcherState>>,
}

impl ScriptedFetcher {
    pub fn respond(&self, symbol: &str, interval: &str, result: Result<Vec<Candle>, SyncError>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert((symbol.to_string(), interval.to_string()), result);
    }

    pub fn gate(&self, symbol: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(symbol.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<(String, String, u64)> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl HistoricalFetcher for ScriptedFetcher {
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        _window_ms: u64,
        generation: u64,
    ) -> Result<Vec<Candle>, SyncError> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state
                .calls
                .push((symbol.to_string(), interval.to_string(), generation));
            state.gates.get(symbol).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let state = self.state.lock().unwrap();
        state
            .responses
            .get(&(symbol.to_string(), interval.to_string()))
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub struct OpenedStream {
    pub subscription: Subscription,
    pub sink: StreamSink,
    pub signal: watch::Receiver<bool>,
}

/// Connector that records every open and hands the sinks to the test.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    opened: Arc<Mutex<Vec<OpenedStream>>>,
}

impl ScriptedConnector {
    pub fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn sink(&self, index: usize) -> StreamSink {
        self.opened.lock().unwrap()[index].sink.clone()
    }

    pub fn subscription(&self, index: usize) -> Subscription {
        self.opened.lock().unwrap()[index].subscription.clone()
    }

    pub fn is_closed(&self, index: usize) -> bool {
        *self.opened.lock().unwrap()[index].signal.borrow()
    }
}

impl StreamConnector for ScriptedConnector {
    fn open(&self, subscription: &Subscription, sink: StreamSink) -> ConnectionHandle {
        let (handle, signal) = ConnectionHandle::new();
        self.opened.lock().unwrap().push(OpenedStream {
            subscription: subscription.clone(),
            sink,
            signal,
        });
        handle
    }
}
