mod common;

use std::time::Duration;

use common::{candle, settings, ScriptedConnector, ScriptedFetcher};
use kline_sync::engine::SyncEngine;
use kline_sync::error::SyncError;
use kline_sync::sync::{StreamSupervisor, SupervisorState};

fn engine(fetcher: &ScriptedFetcher, connector: &ScriptedConnector) -> SyncEngine {
    SyncEngine::spawn(StreamSupervisor::new(
        fetcher.clone(),
        connector.clone(),
        settings(),
    ))
}

async fn wait_for_generation(engine: &SyncEngine, generation: u64) {
    for _ in 0..200 {
        if engine.status().await.unwrap().generation >= generation {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("engine never reached generation {generation}");
}

#[tokio::test]
async fn later_selection_supersedes_pending_one() {
    let fetcher = ScriptedFetcher::default();
    let connector = ScriptedConnector::default();
    let _gate = fetcher.gate("BNBUSDT");
    fetcher.respond("BNBUSDT", "1m", Ok(vec![candle(60_000, 7.0)]));
    fetcher.respond("DOTUSDT", "1m", Ok(vec![candle(60_000, 5.0), candle(120_000, 6.0)]));
    let engine = engine(&fetcher, &connector);

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.select_target("BNBUSDT", "1m").await }
    });
    wait_for_generation(&engine, 1).await;

    let second = engine.select_target("DOTUSDT", "1m").await.unwrap();
    assert_eq!(second.symbol, "DOTUSDT");
    assert_eq!(second.generation, 2);
    assert_eq!(
        first.await.unwrap(),
        Err(SyncError::Superseded { generation: 2 })
    );

    let view = engine.series();
    assert_eq!(view.subscription.as_ref().map(|s| s.symbol.as_str()), Some("DOTUSDT"));
    let closes: Vec<f64> = view.candles.iter().map(|c| c.close).collect();
    assert_eq!(closes, vec![5.0, 6.0]);

    assert_eq!(connector.opened(), 1);
    assert_eq!(connector.subscription(0).symbol, "DOTUSDT");
    let status = engine.status().await.unwrap();
    assert_eq!(status.state, SupervisorState::Connecting);
    assert_eq!(status.candles, 2);
}

#[tokio::test]
async fn failed_selection_keeps_last_known_candles() {
    let fetcher = ScriptedFetcher::default();
    let connector = ScriptedConnector::default();
    fetcher.respond("ETHUSDT", "1m", Ok(vec![candle(60_000, 1.0), candle(120_000, 2.0)]));
    fetcher.respond(
        "ETHUSDT",
        "3m",
        Err(SyncError::BinanceApi {
            code: -1121,
            msg: "Invalid symbol.".to_string(),
        }),
    );
    let engine = engine(&fetcher, &connector);

    engine.select_target("ETHUSDT", "1m").await.unwrap();
    let err = engine.select_target("ETHUSDT", "3m").await.unwrap_err();
    assert!(matches!(err, SyncError::BinanceApi { code: -1121, .. }));

    let closes: Vec<f64> = engine.series().candles.iter().map(|c| c.close).collect();
    assert_eq!(closes, vec![1.0, 2.0]);
    let status = engine.status().await.unwrap();
    assert_eq!(status.state, SupervisorState::Idle);
    assert_eq!(status.generation, 2);
    assert!(status.pending.is_none());
    let served = status.subscription.expect("previous target");
    assert_eq!(served.interval, "1m");
    assert_eq!(served.generation, 1);
    assert_eq!(engine.series().subscription.as_ref(), Some(&served));
}

#[tokio::test]
async fn failed_switch_to_other_symbol_keeps_visible_window() {
    let fetcher = ScriptedFetcher::default();
    let connector = ScriptedConnector::default();
    fetcher.respond("ETHUSDT", "1m", Ok(vec![candle(60_000, 1.0), candle(120_000, 2.0)]));
    fetcher.respond(
        "BNBUSDT",
        "1m",
        Err(SyncError::Network("connection refused".to_string())),
    );
    let engine = engine(&fetcher, &connector);

    engine.select_target("ETHUSDT", "1m").await.unwrap();
    assert_eq!(engine.visible_candles(120_000).len(), 2);

    let err = engine.select_target("BNBUSDT", "1m").await.unwrap_err();
    assert!(err.is_network());
    assert_eq!(engine.visible_candles(120_000).len(), 2);
    let view = engine.series();
    assert_eq!(view.subscription.as_ref().map(|s| s.symbol.as_str()), Some("ETHUSDT"));

    let status = engine.status().await.unwrap();
    assert_eq!(status.target().map(|s| s.symbol.as_str()), Some("ETHUSDT"));
    assert_eq!(status.candles, 2);
}

#[tokio::test]
async fn status_reports_pending_target_while_fetching() {
    let fetcher = ScriptedFetcher::default();
    let connector = ScriptedConnector::default();
    let gate = fetcher.gate("DOTUSDT");
    fetcher.respond("ETHUSDT", "1m", Ok(vec![candle(60_000, 1.0)]));
    let engine = engine(&fetcher, &connector);
    engine.select_target("ETHUSDT", "1m").await.unwrap();

    let pending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.select_target("DOTUSDT", "3m").await }
    });
    wait_for_generation(&engine, 2).await;

    let status = engine.status().await.unwrap();
    assert_eq!(status.state, SupervisorState::SwitchingTarget);
    assert_eq!(status.subscription.as_ref().map(|s| s.symbol.as_str()), Some("ETHUSDT"));
    assert_eq!(status.target().map(|s| s.symbol.as_str()), Some("DOTUSDT"));

    gate.notify_one();
    let live = pending.await.unwrap().unwrap();
    assert_eq!((live.symbol.as_str(), live.interval.as_str()), ("DOTUSDT", "3m"));
}

#[tokio::test]
async fn rejected_target_is_reported_immediately() {
    let fetcher = ScriptedFetcher::default();
    let connector = ScriptedConnector::default();
    let engine = engine(&fetcher, &connector);

    assert_eq!(
        engine.select_target("XRPUSDT", "1m").await,
        Err(SyncError::UnknownSymbol("XRPUSDT".to_string()))
    );
    assert_eq!(engine.status().await.unwrap().generation, 0);
}

#[tokio::test]
async fn visible_candles_follow_display_window() {
    let fetcher = ScriptedFetcher::default();
    let connector = ScriptedConnector::default();
    fetcher.respond(
        "ETHUSDT",
        "1m",
        Ok(vec![
            candle(600_000, 1.0),
            candle(800_000, 2.0),
            candle(1_000_000, 3.0),
            candle(2_000_000, 4.0),
        ]),
    );
    let engine = engine(&fetcher, &connector);
    engine.select_target("ETHUSDT", "1m").await.unwrap();

    assert_eq!(engine.window_ms(), 1_200_000);
    let visible: Vec<u64> = engine
        .visible_candles(2_000_000)
        .iter()
        .map(|c| c.time_bucket)
        .collect();
    assert_eq!(visible, vec![800_000, 1_000_000, 2_000_000]);
    assert!(engine.visible_candles(10_000_000).is_empty());
}

#[tokio::test]
async fn streamed_tick_is_published_to_watchers() {
    let fetcher = ScriptedFetcher::default();
    let connector = ScriptedConnector::default();
    fetcher.respond("DOTUSDT", "5m", Ok(vec![candle(300_000, 5.0)]));
    let engine = engine(&fetcher, &connector);
    engine.select_target("DOTUSDT", "5m").await.unwrap();

    let mut series = engine.watch_series();
    series.borrow_and_update();
    let sink = connector.sink(0);
    sink.connected().await;
    sink.tick(candle(300_000, 5.5)).await;

    tokio::time::timeout(Duration::from_secs(2), series.changed())
        .await
        .expect("view published")
        .unwrap();
    let closes: Vec<f64> = series.borrow().candles.iter().map(|c| c.close).collect();
    assert_eq!(closes, vec![5.5]);
}

#[tokio::test]
async fn shutdown_closes_stream_and_rejects_later_calls() {
    let fetcher = ScriptedFetcher::default();
    let connector = ScriptedConnector::default();
    fetcher.respond("ETHUSDT", "1m", Ok(vec![candle(60_000, 1.0)]));
    let engine = engine(&fetcher, &connector);
    let mut notices = engine.notices();

    engine.select_target("ETHUSDT", "1m").await.unwrap();
    engine.shutdown().await.unwrap();

    assert!(connector.is_closed(0));
    assert_eq!(
        engine.select_target("DOTUSDT", "1m").await,
        Err(SyncError::Closed)
    );
    assert_eq!(engine.status().await, Err(SyncError::Closed));
    assert_eq!(engine.shutdown().await, Err(SyncError::Closed));
    assert_eq!(engine.series().candles.len(), 1);

    let saw_shutdown = std::iter::from_fn(|| notices.try_recv().ok())
        .any(|n| n == kline_sync::event::SyncNotice::Shutdown);
    assert!(saw_shutdown);
}

#[tokio::test]
async fn shutdown_fails_pending_selection() {
    let fetcher = ScriptedFetcher::default();
    let connector = ScriptedConnector::default();
    let _gate = fetcher.gate("BNBUSDT");
    let engine = engine(&fetcher, &connector);

    let pending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.select_target("BNBUSDT", "3m").await }
    });
    wait_for_generation(&engine, 1).await;
    engine.shutdown().await.unwrap();

    assert_eq!(pending.await.unwrap(), Err(SyncError::Closed));
    assert_eq!(connector.opened(), 0);
}
