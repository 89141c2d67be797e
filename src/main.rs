use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use kline_sync::binance::rest::BinanceRestClient;
use kline_sync::binance::ws::BinanceWsClient;
use kline_sync::config::Config;
use kline_sync::engine::SyncEngine;
use kline_sync::error::SyncError;
use kline_sync::event::SyncNotice;
use kline_sync::input::{parse_console_command, ConsoleCommand};
use kline_sync::sync::window::now_ms;
use kline_sync::model::subscription::Subscription;
use kline_sync::sync::{StreamSupervisor, SupervisorSettings, SupervisorState};

/// Fire a switch without holding up the console loop.
fn request_target(engine: &SyncEngine, symbol: String, interval: String) {
    let engine = engine.clone();
    tokio::spawn(async move {
        match engine.select_target(&symbol, &interval).await {
            Ok(sub) => tracing::info!(subscription = %sub, "Target live"),
            Err(SyncError::Superseded { generation }) => {
                tracing::debug!(symbol = %symbol, interval = %interval, generation, "Switch superseded")
            }
            Err(e) => tracing::warn!(symbol = %symbol, interval = %interval, error = %e, "Switch failed"),
        }
    });
}

fn connection_lost_hint(reconnect_enabled: bool) -> &'static str {
    if reconnect_enabled {
        "reconnect scheduled"
    } else {
        "select the target again to resubscribe"
    }
}

fn log_notice(notice: &SyncNotice, reconnect_enabled: bool) {
    match notice {
        SyncNotice::SwitchFailed {
            subscription,
            error,
        } => tracing::warn!(subscription = %subscription, error = %error, "Switch failed, serving previous candles"),
        SyncNotice::ConnectionLost {
            subscription,
            error,
        } => tracing::warn!(
            subscription = %subscription,
            error = ?error,
            "Stream lost; {}",
            connection_lost_hint(reconnect_enabled)
        ),
        SyncNotice::Reconnecting {
            subscription,
            attempt,
            delay_ms,
        } => tracing::info!(subscription = %subscription, attempt, delay_ms, "Reconnect scheduled"),
        other => tracing::debug!(notice = ?other, "Engine notice"),
    }
}

fn print_window(engine: &SyncEngine) {
    let series = engine.series();
    let visible = engine.visible_candles(now_ms());
    let label = series
        .subscription
        .as_ref()
        .map(|s| format!("{}@{}", s.symbol, s.interval))
        .unwrap_or_else(|| "-".to_string());
    println!("{} | {} visible of {} buffered", label, visible.len(), series.candles.len());
    for c in &visible {
        let ts = chrono::DateTime::from_timestamp_millis(c.time_bucket as i64)
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_default();
        println!(
            "  {}  o={:<12} h={:<12} l={:<12} c={:<12}",
            ts, c.open, c.high, c.low, c.close
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required by rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set KLINE_SYNC_CONFIG or provide config/default.toml");
            std::process::exit(1);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .logging
            .level
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        subscriber.with_ansi(false).json().init();
    } else {
        subscriber.init();
    }

    tracing::info!(
        symbol = %config.binance.symbol,
        interval = %config.binance.kline_interval,
        rest_url = %config.binance.rest_base_url,
        ws_url = %config.binance.ws_base_url,
        "Starting kline-sync"
    );

    let rest_client = BinanceRestClient::new(&config.binance.rest_base_url, config.sync.snapshot_limit);
    match rest_client.ping().await {
        Ok(()) => tracing::info!("Binance ping OK"),
        Err(e) => tracing::error!(error = %e, "Failed to ping Binance"),
    }

    let supervisor = StreamSupervisor::new(
        rest_client,
        BinanceWsClient::new(&config.binance.ws_base_url),
        SupervisorSettings::from_config(&config),
    );
    let engine = SyncEngine::spawn(supervisor);

    let mut notices = engine.notices();
    let reconnect_enabled = config.reconnect.enabled;
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(SyncNotice::Shutdown) => break,
                Ok(notice) => log_notice(&notice, reconnect_enabled),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Notice receiver lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let startup = Subscription::new(&config.binance.symbol, &config.binance.kline_interval, 0);
    request_target(&engine, startup.symbol.clone(), startup.interval.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut refresh = tokio::time::interval(Duration::from_millis(config.ui.refresh_rate_ms.max(100)));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        // stdin closed; keep streaming until Ctrl+C
                        tokio::signal::ctrl_c().await.ok();
                        tracing::info!("Ctrl+C received");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        continue;
                    }
                };
                match parse_console_command(&line) {
                    Some(
                        cmd @ (ConsoleCommand::SelectTarget { .. }
                        | ConsoleCommand::SwitchTimeframe(_)
                        | ConsoleCommand::SwitchSymbol(_)),
                    ) => {
                        let status = match engine.status().await {
                            Ok(status) => status,
                            Err(e) => {
                                println!("status unavailable: {}", e);
                                continue;
                            }
                        };
                        let current = status.target().unwrap_or(&startup);
                        let Some((symbol, interval)) = cmd.target(Some(current)) else {
                            continue;
                        };
                        let live = status.pending.is_none()
                            && matches!(status.state, SupervisorState::Connecting | SupervisorState::Streaming)
                            && status
                                .subscription
                                .as_ref()
                                .is_some_and(|sub| sub.same_target(&symbol, &interval));
                        if live {
                            println!("already on {}@{}", symbol, interval);
                        } else {
                            request_target(&engine, symbol, interval);
                        }
                    }
                    Some(ConsoleCommand::ShowWindow) => print_window(&engine),
                    Some(ConsoleCommand::Status) => match engine.status().await {
                        Ok(status) => println!(
                            "state={:?} generation={} target={} candles={}",
                            status.state,
                            status.generation,
                            status
                                .subscription
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| "-".to_string()),
                            status.candles
                        ),
                        Err(e) => println!("status unavailable: {}", e),
                    },
                    Some(ConsoleCommand::Quit) => {
                        tracing::info!("User quit");
                        break;
                    }
                    None => println!("commands: <SYMBOL> <interval> | <SYMBOL> | <interval> | show | status | quit"),
                }
            }
            _ = refresh.tick() => {
                let visible = engine.visible_candles(now_ms());
                let series = engine.series();
                if let (Some(sub), Some(last)) = (series.subscription.as_ref(), visible.last()) {
                    tracing::info!(
                        symbol = %sub.symbol,
                        interval = %sub.interval,
                        visible = visible.len(),
                        last_bucket = last.time_bucket,
                        last_close = last.close,
                        "Window"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received");
                break;
            }
        }
    }

    engine.shutdown().await.ok();
    tracing::info!("kline-sync stopped");
    Ok(())
}
