use tokio::sync::{mpsc, watch};

use crate::error::SyncError;
use crate::event::{StreamEvent, SyncEvent};
use crate::model::candle::Candle;
use crate::model::subscription::Subscription;

/// Opens live candle subscriptions.
pub trait StreamConnector: Send + Sync + 'static {
    /// Start exactly one subscription for `subscription`, delivering its events
    /// through `sink`. Must not block; connection failures arrive as events.
    fn open(&self, subscription: &Subscription, sink: StreamSink) -> ConnectionHandle;
}

/// Owner side of one open subscription. Closing is idempotent and also
/// happens on drop.
#[derive(Debug)]
pub struct ConnectionHandle {
    shutdown: watch::Sender<bool>,
}

impl ConnectionHandle {
    /// Returns the handle and the signal the transport task must watch.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (shutdown, signal) = watch::channel(false);
        (Self { shutdown }, signal)
    }

    /// Returns `true` only for the call that actually requested the close.
    pub fn close(&self) -> bool {
        self.shutdown.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Delivery endpoint handed to a connection; tags every event with the
/// generation and connection id it was opened under.
#[derive(Debug, Clone)]
pub struct StreamSink {
    tx: mpsc::Sender<SyncEvent>,
    generation: u64,
    connection: u64,
}

impl StreamSink {
    pub(crate) fn new(tx: mpsc::Sender<SyncEvent>, generation: u64, connection: u64) -> Self {
        Self {
            tx,
            generation,
            connection,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connection(&self) -> u64 {
        self.connection
    }

    /// Returns `false` once the supervisor is gone.
    pub async fn send(&self, event: StreamEvent) -> bool {
        self.tx
            .send(SyncEvent::Stream {
                generation: self.generation,
                connection: self.connection,
                event,
            })
            .await
            .is_ok()
    }

    pub async fn connected(&self) -> bool {
        self.send(StreamEvent::Connected).await
    }

    pub async fn tick(&self, candle: Candle) -> bool {
        self.send(StreamEvent::Tick(candle)).await
    }

    pub async fn error(&self, error: SyncError) -> bool {
        self.send(StreamEvent::Error(error)).await
    }

    pub async fn closed(&self, requested: bool) -> bool {
        self.send(StreamEvent::Closed { requested }).await
    }
}
