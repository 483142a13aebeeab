//! Single-owner trading loop
//!
//! One task owns the `SwingTrader`. Ticks, fetched option chains and export
//! timer ticks arrive on its inbox; orders and Greeks refreshes leave as messages to
//! two worker tasks that hold the execution engine. Governor waits happen in
//! those workers only, so the owner never stalls on a broker call.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::TraderConfig;
use crate::execution::{ExecutionEngine, MarketData};
use crate::options::OptionContract;
use crate::trading_core::{Candle, Signal, SwingTrader, TradeAction};
use crate::types::{ist_now, TickBatch};

/// Messages for the trading loop
#[derive(Debug)]
pub enum TraderEvent {
    /// Feed frame and the time it was received
    Ticks(TickBatch, NaiveDateTime),
    /// Result of a Greeks refresh; `None` when the fetch failed
    OptionChain(Option<Vec<OptionContract>>),
    /// Rebuild the structure now instead of waiting for market time to pass
    Reevaluate,
    Shutdown,
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub ticks: u64,
    pub signals: u32,
    pub completed_structures: usize,
    pub late_ticks: u64,
}

/// History for the warm start, at the finest configured width.
///
/// A failed or empty fetch is logged and yields an empty series; the loop
/// then builds candles from ticks alone.
pub async fn fetch_warm_start(market_data: &dyn MarketData, config: &TraderConfig, now: NaiveDateTime) -> Vec<Candle> {
    let width = config.timeframes.iter().copied().min().unwrap_or(config.strategy_timeframe);
    let from = now - TimeDelta::days(config.warm_start_days);

    match market_data.fetch_historical(&config.spot_token, from, now, width).await {
        Ok(candles) if candles.is_empty() => {
            warn!("No historical data for {} between {} and {}", config.instrument, from, now);
            Vec::new()
        }
        Ok(candles) => {
            info!("Fetched {} historical {}m candles for {}", candles.len(), width, config.instrument);
            candles
        }
        Err(e) => {
            warn!("Historical fetch for {} failed: {}", config.instrument, e);
            Vec::new()
        }
    }
}

fn spawn_order_task(engine: Arc<ExecutionEngine>, mut orders: mpsc::Receiver<Signal>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(signal) = orders.recv().await {
            match engine.execute_signal(&signal).await {
                Ok(Some(order_id)) => {
                    engine.poll_status(&order_id).await;
                }
                Ok(None) => {}
                Err(e) => error!("Failed to place order: {:#}", e),
            }
        }
        debug!("Order task stopped");
    })
}

fn spawn_greeks_task(
    engine: Arc<ExecutionEngine>,
    instrument: String,
    mut requests: mpsc::Receiver<NaiveDate>,
    inbox: mpsc::Sender<TraderEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(today) = requests.recv().await {
            let chain = match engine.fetch_greeks(&instrument, today).await {
                Ok(chain) => Some(chain),
                Err(e) => {
                    warn!("Greeks refresh failed: {:#}", e);
                    None
                }
            };
            if inbox.send(TraderEvent::OptionChain(chain)).await.is_err() {
                break;
            }
        }
        debug!("Greeks task stopped");
    })
}

async fn dispatch(
    actions: Vec<TradeAction>,
    trader: &mut SwingTrader,
    orders: &mpsc::Sender<Signal>,
    refreshes: &mpsc::Sender<NaiveDate>,
) {
    for action in actions {
        match action {
            TradeAction::PlaceOrder(signal) => {
                if orders.send(signal).await.is_err() {
                    error!("Order task is gone, signal dropped");
                }
            }
            TradeAction::RefreshGreeks { force } => {
                let today = trader.clock().unwrap_or_else(ist_now).date();
                debug!("Greeks refresh requested (force: {})", force);
                if let Err(e) = refreshes.try_send(today) {
                    debug!("Greeks refresh not queued: {}", e);
                    if matches!(e, mpsc::error::TrySendError::Closed(_)) {
                        trader.on_refresh_failed();
                    }
                }
            }
        }
    }
}

fn export(trader: &SwingTrader) {
    let stamp = ist_now().format("%Y%m%d_%H%M%S").to_string();
    let dir = &trader.config().data_dir;
    if let Err(e) = trader.export_candles(dir, &stamp) {
        warn!("Candle export failed: {:#}", e);
    }
    if let Err(e) = trader.export_ticks(dir, &stamp) {
        warn!("Tick export failed: {:#}", e);
    }
}

fn every(secs: u64) -> tokio::time::Interval {
    let period = Duration::from_secs(secs.max(1));
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

/// Run the trading loop until `Shutdown` arrives.
///
/// `inbox_tx` must feed `inbox`; the Greeks worker posts fetched chains on it.
pub async fn run_live(
    config: TraderConfig,
    engine: Arc<ExecutionEngine>,
    history: Vec<Candle>,
    mut inbox: mpsc::Receiver<TraderEvent>,
    inbox_tx: mpsc::Sender<TraderEvent>,
) -> Result<SessionSummary> {
    info!(
        "Starting {} swing trader: {}m strategy candles, execution {}",
        config.instrument, config.strategy_timeframe, engine.config().mode
    );

    let (order_tx, order_rx) = mpsc::channel::<Signal>(16);
    let (refresh_tx, refresh_rx) = mpsc::channel::<NaiveDate>(1);
    let order_task = spawn_order_task(engine.clone(), order_rx);
    let greeks_task = spawn_greeks_task(engine, config.instrument.clone(), refresh_rx, inbox_tx);

    let mut export_timer = every(config.export_interval_secs);

    let mut trader = SwingTrader::new(config);
    let actions = trader.warm_start(&history);
    dispatch(actions, &mut trader, &order_tx, &refresh_tx).await;

    loop {
        tokio::select! {
            event = inbox.recv() => {
                let actions = match event {
                    Some(TraderEvent::Ticks(batch, received_at)) => trader.on_raw_ticks(&batch, received_at),
                    Some(TraderEvent::OptionChain(Some(chain))) => {
                        let at = trader.clock().unwrap_or_else(ist_now);
                        trader.on_option_chain(chain, at);
                        Vec::new()
                    }
                    Some(TraderEvent::OptionChain(None)) => {
                        trader.on_refresh_failed();
                        Vec::new()
                    }
                    Some(TraderEvent::Reevaluate) => trader.reevaluate(),
                    Some(TraderEvent::Shutdown) | None => break,
                };
                dispatch(actions, &mut trader, &order_tx, &refresh_tx).await;
            }
            _ = export_timer.tick() => export(&trader),
        }
    }

    info!("Shutting down: {} ticks processed, {} signals", trader.tick_count(), trader.signals_emitted());
    export(&trader);

    // In-flight orders run to completion
    drop(order_tx);
    drop(refresh_tx);
    if let Err(e) = order_task.await {
        error!("Order task panicked: {}", e);
    }
    greeks_task.abort();

    let late_ticks = trader
        .aggregator(trader.config().strategy_timeframe)
        .map(|a| a.late_ticks())
        .unwrap_or_default();

    Ok(SessionSummary {
        ticks: trader.tick_count(),
        signals: trader.signals_emitted(),
        completed_structures: trader.engine().completed_structures().len(),
        late_ticks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{
        ClassLimits, CsvOrderJournal, ExecutionConfig, ExecutionEvent, ExecutionMode, GovernorConfig, PaperBroker,
    };
    use crate::options::contract::test_contract;
    use crate::trading_core::swing::tests::pattern;
    use crate::types::RawTick;
    use tokio::time::sleep;

    fn spot(price: i64) -> RawTick {
        RawTick {
            token: "99926000".into(),
            last_traded_price: price,
            last_traded_quantity: Some(50),
            volume: None,
            open: None,
            high: None,
            low: None,
            close: None,
            exchange_timestamp: None,
        }
    }

    fn config(dir: &std::path::Path) -> TraderConfig {
        let free = ClassLimits { per_minute: 1000, min_interval_ms: 0 };
        TraderConfig {
            data_dir: dir.join("candles"),
            execution: ExecutionConfig {
                mode: ExecutionMode::Paper,
                order_history_dir: dir.join("orders"),
                governor: GovernorConfig {
                    order_placement: free,
                    status_poll: free,
                    greeks_fetch: free,
                    ..GovernorConfig::default()
                },
                ..ExecutionConfig::default()
            },
            ..TraderConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakout_flows_to_paper_fill() {
        let dir = std::env::temp_dir().join(format!("swing-live-{}", uuid::Uuid::new_v4()));
        let config = config(&dir);
        let history = pattern();
        let last = history[history.len() - 1].open_time;

        let broker = Arc::new(PaperBroker::new(
            history.clone(),
            vec![test_contract("NIFTY26MAR2624000CE", 0.5, 0.0, 0.0, 20.0)],
        ));
        let journal = Arc::new(CsvOrderJournal::new(config.execution.order_history_dir.clone()));
        let engine = Arc::new(ExecutionEngine::new(config.execution.clone(), broker.clone(), broker.clone(), journal));
        let mut events = engine.subscribe();

        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(run_live(config, engine.clone(), history, rx, tx.clone()));

        // Warm start arms the setup and pulls the chain
        sleep(Duration::from_secs(1)).await;
        tx.send(TraderEvent::Ticks(vec![spot(10_980)], last + TimeDelta::seconds(1))).await.unwrap();
        tx.send(TraderEvent::Ticks(vec![spot(11_020)], last + TimeDelta::seconds(2))).await.unwrap();
        sleep(Duration::from_secs(1)).await;
        tx.send(TraderEvent::Shutdown).await.unwrap();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.signals, 1);
        assert_eq!(summary.completed_structures, 1);
        assert_eq!(broker.order_count(), 1);
        assert!(matches!(events.try_recv(), Ok(ExecutionEvent::OrderPlaced { .. })));

        // Shutdown export writes the spot quotes next to the candles
        let exported: Vec<String> = std::fs::read_dir(dir.join("candles"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(exported.iter().any(|name| name.starts_with("spot_ticks_")));
        assert!(exported.iter().any(|name| name.starts_with("NIFTY_5min_")));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_without_history() {
        let dir = std::env::temp_dir().join(format!("swing-live-{}", uuid::Uuid::new_v4()));
        let config = config(&dir);
        let broker = Arc::new(PaperBroker::new(Vec::new(), Vec::new()));
        let journal = Arc::new(CsvOrderJournal::new(config.execution.order_history_dir.clone()));
        let engine = Arc::new(ExecutionEngine::new(config.execution.clone(), broker.clone(), broker, journal));

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_live(config, engine, Vec::new(), rx, tx.clone()));
        tx.send(TraderEvent::Reevaluate).await.unwrap();
        tx.send(TraderEvent::Shutdown).await.unwrap();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary, SessionSummary::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_warm_start_fetch_uses_finest_width() {
        let history = pattern();
        let now = history[history.len() - 1].open_time;
        let broker = PaperBroker::new(history.clone(), Vec::new());

        let candles = fetch_warm_start(&broker, &TraderConfig::default(), now).await;
        // 1-minute request over 5-minute rows returns them unchanged
        assert_eq!(candles.len(), history.len());

        let empty = PaperBroker::new(Vec::new(), Vec::new());
        assert!(fetch_warm_start(&empty, &TraderConfig::default(), now).await.is_empty());
    }
}
