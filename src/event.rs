use crate::error::SyncError;
use crate::model::candle::Candle;
use crate::model::subscription::Subscription;

/// Events delivered from a live stream connection.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected,
    Tick(Candle),
    /// A malformed payload (dropped) or a transport failure.
    Error(SyncError),
    Closed { requested: bool },
}

/// Supervisor mailbox. Every asynchronous result is tagged with the generation
/// it was started under.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Snapshot {
        generation: u64,
        result: Result<Vec<Candle>, SyncError>,
    },
    Stream {
        generation: u64,
        connection: u64,
        event: StreamEvent,
    },
    Reconnect {
        generation: u64,
    },
}

/// Lifecycle notifications for observers of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotice {
    SwitchStarted(Subscription),
    SnapshotMerged {
        subscription: Subscription,
        candles: usize,
    },
    SwitchFailed {
        subscription: Subscription,
        error: SyncError,
    },
    Connected(Subscription),
    ConnectionLost {
        subscription: Subscription,
        error: Option<SyncError>,
    },
    Reconnecting {
        subscription: Subscription,
        attempt: u32,
        delay_ms: u64,
    },
    PayloadDropped {
        subscription: Subscription,
        error: SyncError,
    },
    Shutdown,
}
