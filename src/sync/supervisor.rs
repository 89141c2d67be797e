use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::backoff::ExponentialBackoff;
use super::buffer::{CandleBuffer, MergeOutcome, DEFAULT_MAX_LENGTH};
use super::fetcher::HistoricalFetcher;
use super::stream::{ConnectionHandle, StreamConnector, StreamSink};
use super::window::{self, DEFAULT_WINDOW_MS};
use crate::config::Config;
use crate::error::SyncError;
use crate::event::{StreamEvent, SyncEvent, SyncNotice};
use crate::model::candle::Candle;
use crate::model::subscription::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    SwitchingTarget,
    Connecting,
    Streaming,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub symbols: Vec<String>,
    pub intervals: Vec<String>,
    pub max_length: usize,
    pub window_ms: u64,
    pub history_window_ms: u64,
    pub channel_capacity: usize,
    /// `None` keeps the no-auto-retry contract.
    pub reconnect: Option<ReconnectSettings>,
}

impl SupervisorSettings {
    pub fn new(symbols: &[&str], intervals: &[&str]) -> Self {
        Self {
            symbols: symbols.iter().map(|s| s.to_ascii_uppercase()).collect(),
            intervals: intervals.iter().map(|s| s.to_string()).collect(),
            max_length: DEFAULT_MAX_LENGTH,
            window_ms: DEFAULT_WINDOW_MS,
            history_window_ms: DEFAULT_WINDOW_MS / 2,
            channel_capacity: 256,
            reconnect: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let reconnect = config.reconnect.enabled.then(|| ReconnectSettings {
            initial_delay: Duration::from_millis(config.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(config.reconnect.max_delay_ms),
            factor: config.reconnect.factor,
        });
        Self {
            symbols: config.binance.tradable_symbols(),
            intervals: config.binance.kline_intervals(),
            max_length: config.sync.max_length,
            window_ms: config.sync.window_ms,
            history_window_ms: config.sync.history_window_ms,
            channel_capacity: config.sync.channel_capacity,
            reconnect,
        }
    }

    fn resolve_symbol(&self, symbol: &str) -> Result<String, SyncError> {
        let wanted = symbol.trim().to_ascii_uppercase();
        self.symbols
            .iter()
            .find(|s| **s == wanted)
            .cloned()
            .ok_or_else(|| SyncError::UnknownSymbol(symbol.trim().to_string()))
    }

    fn resolve_interval(&self, interval: &str) -> Result<String, SyncError> {
        let wanted = interval.trim();
        self.intervals
            .iter()
            .find(|i| i.as_str() == wanted)
            .cloned()
            .ok_or_else(|| SyncError::UnknownInterval(wanted.to_string()))
    }
}

/// Result of a switch that got far enough to be decided.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchOutcome {
    pub generation: u64,
    pub result: Result<Subscription, SyncError>,
}

struct ActiveConnection {
    id: u64,
    handle: ConnectionHandle,
}

/// Owns the target lifecycle and is the single writer of the candle buffer.
///
/// All asynchronous work (snapshot fetches, stream deliveries, reconnect
/// timers) reports back through one mailbox as [`SyncEvent`]s tagged with the
/// generation they were started under. [`handle_event`](Self::handle_event)
/// applies an event as one indivisible step and ignores anything from a
/// superseded generation or connection.
pub struct StreamSupervisor<F, C> {
    fetcher: Arc<F>,
    connector: C,
    settings: SupervisorSettings,
    buffer: CandleBuffer,
    state: SupervisorState,
    generation: u64,
    /// Target the buffer is serving; replaced only once a snapshot merges.
    subscription: Option<Subscription>,
    /// Requested target whose snapshot is still in flight.
    pending: Option<Subscription>,
    connection: Option<ActiveConnection>,
    next_connection_id: u64,
    last_connection_error: Option<SyncError>,
    fetch_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    backoff: Option<ExponentialBackoff>,
    reconnect_attempt: u32,
    events_tx: mpsc::Sender<SyncEvent>,
    events_rx: mpsc::Receiver<SyncEvent>,
    notices: broadcast::Sender<SyncNotice>,
}

impl<F: HistoricalFetcher, C: StreamConnector> StreamSupervisor<F, C> {
    pub fn new(fetcher: F, connector: C, settings: SupervisorSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(settings.channel_capacity.max(1));
        let (notices, _) = broadcast::channel(64);
        let backoff = settings
            .reconnect
            .as_ref()
            .map(|r| ExponentialBackoff::new(r.initial_delay, r.max_delay, r.factor));
        Self {
            fetcher: Arc::new(fetcher),
            connector,
            buffer: CandleBuffer::new(settings.max_length),
            settings,
            state: SupervisorState::Idle,
            generation: 0,
            subscription: None,
            pending: None,
            connection: None,
            next_connection_id: 0,
            last_connection_error: None,
            fetch_task: None,
            reconnect_task: None,
            backoff,
            reconnect_attempt: 0,
            events_tx,
            events_rx,
            notices,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    pub fn pending(&self) -> Option<&Subscription> {
        self.pending.as_ref()
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn buffer(&self) -> &CandleBuffer {
        &self.buffer
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Candles of the current target's symbol.
    pub fn current_candles(&self) -> &[Candle] {
        match &self.subscription {
            Some(sub) => self.buffer.candles(&sub.symbol),
            None => &[],
        }
    }

    /// Current target's candles inside the configured display window.
    pub fn visible(&self, now_ms: u64) -> &[Candle] {
        window::query(self.current_candles(), now_ms, self.settings.window_ms)
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    pub(crate) fn notice_sender(&self) -> broadcast::Sender<SyncNotice> {
        self.notices.clone()
    }

    /// Next event from the mailbox.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events_rx.recv().await
    }

    /// Retarget the engine. Closes the current connection right away and
    /// starts a snapshot fetch for the new target; the rest happens when the
    /// fetch reports back. Never waits on the network.
    pub fn switch_target(&mut self, symbol: &str, interval: &str) -> Result<Subscription, SyncError> {
        if self.state == SupervisorState::Closed {
            return Err(SyncError::Closed);
        }
        let symbol = self.settings.resolve_symbol(symbol)?;
        let interval = self.settings.resolve_interval(interval)?;

        self.generation += 1;
        self.close_connection();
        self.cancel_background_tasks();
        self.reset_backoff();

        let subscription = Subscription::new(&symbol, &interval, self.generation);
        self.pending = Some(subscription.clone());
        self.state = SupervisorState::SwitchingTarget;
        tracing::info!(
            symbol = %subscription.symbol,
            interval = %subscription.interval,
            generation = subscription.generation,
            "Switching target"
        );
        self.notify(SyncNotice::SwitchStarted(subscription.clone()));

        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.events_tx.clone();
        let window_ms = self.settings.history_window_ms;
        let (sym, iv, generation) = (symbol, interval, self.generation);
        self.fetch_task = Some(tokio::spawn(async move {
            let result = fetcher
                .fetch_snapshot(&sym, &iv, window_ms, generation)
                .await;
            let _ = tx.send(SyncEvent::Snapshot { generation, result }).await;
        }));

        Ok(subscription)
    }

    /// Apply one mailbox event. Returns the outcome when the event decides
    /// the pending switch of the current generation.
    pub fn handle_event(&mut self, event: SyncEvent) -> Option<SwitchOutcome> {
        match event {
            SyncEvent::Snapshot { generation, result } => self.on_snapshot(generation, result),
            SyncEvent::Stream {
                generation,
                connection,
                event,
            } => {
                self.on_stream_event(generation, connection, event);
                None
            }
            SyncEvent::Reconnect { generation } => {
                self.on_reconnect(generation);
                None
            }
        }
    }

    /// Close the active connection and stop accepting switches. Terminal.
    pub fn shutdown(&mut self) {
        if self.state == SupervisorState::Closed {
            return;
        }
        self.close_connection();
        self.cancel_background_tasks();
        self.pending = None;
        self.state = SupervisorState::Closed;
        tracing::info!(generation = self.generation, "Supervisor shut down");
        self.notify(SyncNotice::Shutdown);
    }

    fn on_snapshot(
        &mut self,
        generation: u64,
        result: Result<Vec<Candle>, SyncError>,
    ) -> Option<SwitchOutcome> {
        if self.state == SupervisorState::Closed || generation != self.generation {
            tracing::debug!(
                generation,
                current = self.generation,
                "Discarding snapshot from superseded generation"
            );
            return None;
        }
        let subscription = self.pending.take()?;
        self.fetch_task = None;

        match result {
            Ok(candles) => {
                let fetched = candles.len();
                let len = self
                    .buffer
                    .merge_snapshot(&subscription.symbol, &subscription.interval, candles);
                tracing::info!(
                    symbol = %subscription.symbol,
                    interval = %subscription.interval,
                    generation,
                    fetched,
                    len,
                    "Snapshot merged"
                );
                self.subscription = Some(subscription.clone());
                self.notify(SyncNotice::SnapshotMerged {
                    subscription: subscription.clone(),
                    candles: len,
                });
                self.open_connection(&subscription);
                Some(SwitchOutcome {
                    generation,
                    result: Ok(subscription),
                })
            }
            Err(error) => {
                tracing::warn!(
                    symbol = %subscription.symbol,
                    interval = %subscription.interval,
                    generation,
                    error = %error,
                    "Snapshot fetch failed, keeping previous target"
                );
                self.state = SupervisorState::Idle;
                self.notify(SyncNotice::SwitchFailed {
                    subscription,
                    error: error.clone(),
                });
                Some(SwitchOutcome {
                    generation,
                    result: Err(error),
                })
            }
        }
    }

    fn on_stream_event(&mut self, generation: u64, connection: u64, event: StreamEvent) {
        let is_current = self.state != SupervisorState::Closed
            && generation == self.generation
            && matches!(&self.connection, Some(active) if active.id == connection);
        if !is_current {
            tracing::trace!(generation, connection, "Dropping event from superseded connection");
            return;
        }
        let Some(subscription) = self.subscription.clone() else {
            return;
        };
        if subscription.generation != generation {
            return;
        }

        match event {
            StreamEvent::Connected => {
                self.state = SupervisorState::Streaming;
                self.last_connection_error = None;
                self.reset_backoff();
                tracing::info!(stream = %subscription.stream_name(), generation, "Stream connected");
                self.notify(SyncNotice::Connected(subscription));
            }
            StreamEvent::Tick(candle) => {
                let outcome =
                    self.buffer
                        .merge_tick(&subscription.symbol, &subscription.interval, candle);
                match outcome {
                    MergeOutcome::Stale | MergeOutcome::IntervalMismatch => {
                        tracing::debug!(
                            symbol = %subscription.symbol,
                            bucket = candle.time_bucket,
                            ?outcome,
                            "Tick dropped"
                        );
                    }
                    _ => {}
                }
            }
            StreamEvent::Error(error @ SyncError::Parse(_)) => {
                tracing::debug!(error = %error, "Dropped malformed stream payload");
                self.notify(SyncNotice::PayloadDropped {
                    subscription,
                    error,
                });
            }
            StreamEvent::Error(error) => {
                tracing::warn!(stream = %subscription.stream_name(), error = %error, "Stream error");
                self.last_connection_error = Some(error);
            }
            StreamEvent::Closed { requested } => {
                self.connection = None;
                if requested {
                    tracing::info!(stream = %subscription.stream_name(), "Stream closed");
                    return;
                }
                tracing::warn!(
                    stream = %subscription.stream_name(),
                    generation,
                    "Stream closed unexpectedly, serving last known candles"
                );
                self.state = SupervisorState::Idle;
                let error = self.last_connection_error.take();
                self.notify(SyncNotice::ConnectionLost {
                    subscription: subscription.clone(),
                    error,
                });
                self.schedule_reconnect(&subscription);
            }
        }
    }

    fn on_reconnect(&mut self, generation: u64) {
        self.reconnect_task = None;
        if self.state == SupervisorState::Closed
            || generation != self.generation
            || self.connection.is_some()
        {
            tracing::debug!(generation, current = self.generation, "Discarding reconnect timer");
            return;
        }
        if let Some(subscription) = self.subscription.clone().filter(|s| s.generation == generation) {
            tracing::info!(stream = %subscription.stream_name(), attempt = self.reconnect_attempt, "Reconnecting stream");
            self.open_connection(&subscription);
        }
    }

    fn open_connection(&mut self, subscription: &Subscription) {
        self.next_connection_id += 1;
        let id = self.next_connection_id;
        let sink = StreamSink::new(self.events_tx.clone(), subscription.generation, id);
        let handle = self.connector.open(subscription, sink);
        self.connection = Some(ActiveConnection { id, handle });
        self.state = SupervisorState::Connecting;
        tracing::debug!(stream = %subscription.stream_name(), connection = id, "Stream opening");
    }

    fn close_connection(&mut self) {
        if let Some(active) = self.connection.take() {
            if active.handle.close() {
                tracing::debug!(connection = active.id, "Stream close requested");
            }
        }
    }

    fn schedule_reconnect(&mut self, subscription: &Subscription) {
        let Some(backoff) = self.backoff.as_mut() else {
            return;
        };
        let delay = backoff.next_delay();
        self.reconnect_attempt += 1;
        let delay_ms = delay.as_millis() as u64;
        self.notify(SyncNotice::Reconnecting {
            subscription: subscription.clone(),
            attempt: self.reconnect_attempt,
            delay_ms,
        });
        let tx = self.events_tx.clone();
        let generation = subscription.generation;
        self.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SyncEvent::Reconnect { generation }).await;
        }));
    }

    fn cancel_background_tasks(&mut self) {
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }

    fn reset_backoff(&mut self) {
        if let Some(backoff) = self.backoff.as_mut() {
            backoff.reset();
        }
        self.reconnect_attempt = 0;
    }

    fn notify(&self, notice: SyncNotice) {
        let _ = self.notices.send(notice);
    }
}

impl<F, C> Drop for StreamSupervisor<F, C> {
    fn drop(&mut self) {
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }
}
