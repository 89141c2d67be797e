//! Query and control surface for the presentation layer.
//!
//! [`SyncEngine::spawn`] moves a [`StreamSupervisor`] onto its own task, which
//! becomes the single logical thread that mutates candle data. Callers talk
//! to it through commands and read the current series through a `watch`
//! channel, so reads never wait on the network or on a merge.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::error::SyncError;
use crate::event::SyncNotice;
use crate::model::candle::Candle;
use crate::model::subscription::Subscription;
use crate::sync::fetcher::HistoricalFetcher;
use crate::sync::stream::StreamConnector;
use crate::sync::supervisor::{StreamSupervisor, SupervisorState};
use crate::sync::window;

/// Latest published copy of the current target's series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesView {
    pub subscription: Option<Subscription>,
    pub candles: Vec<Candle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: SupervisorState,
    pub generation: u64,
    /// Target being served.
    pub subscription: Option<Subscription>,
    /// Target whose snapshot is still in flight, if any.
    pub pending: Option<Subscription>,
    pub candles: usize,
}

impl EngineStatus {
    /// The target the engine is heading for: the pending one, else the served one.
    pub fn target(&self) -> Option<&Subscription> {
        self.pending.as_ref().or(self.subscription.as_ref())
    }
}

type SwitchReply = oneshot::Sender<Result<Subscription, SyncError>>;

enum Command {
    SelectTarget {
        symbol: String,
        interval: String,
        reply: SwitchReply,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct SyncEngine {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<Arc<SeriesView>>,
    notices: broadcast::Sender<SyncNotice>,
    window_ms: u64,
}

impl SyncEngine {
    pub fn spawn<F: HistoricalFetcher, C: StreamConnector>(
        supervisor: StreamSupervisor<F, C>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(32);
        let (view_tx, view) = watch::channel(Arc::new(SeriesView::default()));
        let notices = supervisor.notice_sender();
        let window_ms = supervisor.settings().window_ms;
        tokio::spawn(run(supervisor, command_rx, view_tx));
        Self {
            commands,
            view,
            notices,
            window_ms,
        }
    }

    /// Switch to `(symbol, interval)` and wait until the switch is decided.
    ///
    /// Resolves with the live subscription once the snapshot is merged and the
    /// stream is opening, with `Superseded` if a later request won first, or
    /// with the fetch error (the buffer keeps its previous contents).
    pub async fn select_target(&self, symbol: &str, interval: &str) -> Result<Subscription, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::SelectTarget {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
                reply,
            })
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Current target's candles inside the display window ending at `now_ms`.
    pub fn visible_candles(&self, now_ms: u64) -> Vec<Candle> {
        let view = self.view.borrow();
        window::query(&view.candles, now_ms, self.window_ms).to_vec()
    }

    pub fn series(&self) -> Arc<SeriesView> {
        Arc::clone(&self.view.borrow())
    }

    /// Receiver that wakes whenever a new series copy is published.
    pub fn watch_series(&self) -> watch::Receiver<Arc<SeriesView>> {
        self.view.clone()
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    pub async fn status(&self) -> Result<EngineStatus, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Status { reply })
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    /// Close the active stream and stop the engine. Later calls fail with `Closed`.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)
    }
}

async fn run<F: HistoricalFetcher, C: StreamConnector>(
    mut supervisor: StreamSupervisor<F, C>,
    mut commands: mpsc::Receiver<Command>,
    view_tx: watch::Sender<Arc<SeriesView>>,
) {
    let mut pending: BTreeMap<u64, SwitchReply> = BTreeMap::new();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::SelectTarget { symbol, interval, reply }) => {
                        match supervisor.switch_target(&symbol, &interval) {
                            Ok(subscription) => {
                                for (_, waiter) in std::mem::take(&mut pending) {
                                    let _ = waiter.send(Err(SyncError::Superseded {
                                        generation: subscription.generation,
                                    }));
                                }
                                pending.insert(subscription.generation, reply);
                                publish(&supervisor, &view_tx);
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    Some(Command::Status { reply }) => {
                        let _ = reply.send(EngineStatus {
                            state: supervisor.state(),
                            generation: supervisor.generation(),
                            subscription: supervisor.subscription().cloned(),
                            pending: supervisor.pending().cloned(),
                            candles: supervisor.current_candles().len(),
                        });
                    }
                    Some(Command::Shutdown { reply }) => {
                        supervisor.shutdown();
                        fail_pending(&mut pending);
                        publish(&supervisor, &view_tx);
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        supervisor.shutdown();
                        fail_pending(&mut pending);
                        break;
                    }
                }
            }
            Some(event) = supervisor.next_event() => {
                let outcome = supervisor.handle_event(event);
                publish(&supervisor, &view_tx);
                if let Some(outcome) = outcome {
                    if let Some(waiter) = pending.remove(&outcome.generation) {
                        let _ = waiter.send(outcome.result);
                    }
                }
            }
        }
    }
    tracing::debug!("Engine task finished");
}

fn fail_pending(pending: &mut BTreeMap<u64, SwitchReply>) {
    for (_, waiter) in std::mem::take(pending) {
        let _ = waiter.send(Err(SyncError::Closed));
    }
}

fn publish<F: HistoricalFetcher, C: StreamConnector>(
    supervisor: &StreamSupervisor<F, C>,
    view_tx: &watch::Sender<Arc<SeriesView>>,
) {
    let subscription = supervisor.subscription().cloned();
    let candles = supervisor.current_candles();
    view_tx.send_if_modified(|view| {
        if view.subscription == subscription && view.candles.as_slice() == candles {
            return false;
        }
        *view = Arc::new(SeriesView {
            subscription,
            candles: candles.to_vec(),
        });
        true
    });
}
