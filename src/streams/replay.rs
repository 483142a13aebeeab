//! Historical replay: history, recorded feed frames and an option chain from
//! files, run through the trading loop against the paper broker.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::live::{fetch_warm_start, run_live, SessionSummary, TraderEvent};
use crate::config::TraderConfig;
use crate::execution::{CsvOrderJournal, ExecutionEngine, PaperBroker};
use crate::options::expiry::normalize_strike;
use crate::options::OptionContract;
use crate::trading_core::Candle;
use crate::types::{ist_from_millis, ist_now, RawTick};

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, Deserialize)]
struct HistoryRow {
    #[serde(alias = "timestamp", alias = "datetime")]
    open_time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Provider rows carry an offset (`2026-03-02T09:15:00+05:30`); exports don't.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// OHLCV candles from CSV. Rows with an unreadable time are skipped.
pub fn load_history(path: &Path) -> Result<Vec<Candle>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open history {}", path.display()))?;

    let mut candles = Vec::new();
    let mut skipped = 0usize;
    for row in reader.deserialize::<HistoryRow>() {
        let row = row.with_context(|| format!("Bad history row in {}", path.display()))?;
        match parse_timestamp(&row.open_time) {
            Some(open_time) => candles.push(Candle {
                open_time,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            }),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("Skipped {} history rows with unreadable timestamps", skipped);
    }

    info!("Loaded {} history rows from {}", candles.len(), path.display());
    Ok(candles)
}

/// Recorded feed quotes, one per CSV row, prices still scaled.
pub fn load_ticks(path: &Path) -> Result<Vec<RawTick>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open ticks {}", path.display()))?;
    let ticks = reader
        .deserialize::<RawTick>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Bad tick row in {}", path.display()))?;

    info!("Loaded {} ticks from {}", ticks.len(), path.display());
    Ok(ticks)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChainFile {
    Rows(Vec<OptionContract>),
    Envelope { data: Vec<OptionContract> },
}

/// Option chain JSON: a bare array or the provider's `{"data": [...]}` reply.
pub fn load_chain(path: &Path) -> Result<Vec<OptionContract>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chain {}", path.display()))?;
    let file: ChainFile =
        serde_json::from_str(&text).with_context(|| format!("Invalid chain {}", path.display()))?;

    let mut chain = match file {
        ChainFile::Rows(rows) | ChainFile::Envelope { data: rows } => rows,
    };
    for contract in &mut chain {
        contract.strike = normalize_strike(contract.strike);
    }

    info!("Loaded {} option contracts from {}", chain.len(), path.display());
    Ok(chain)
}

/// Consecutive quotes sharing an exchange timestamp form one frame.
fn frames(ticks: Vec<RawTick>) -> Vec<Vec<RawTick>> {
    let mut out: Vec<Vec<RawTick>> = Vec::new();
    for tick in ticks {
        match out.last_mut() {
            Some(frame) if frame[0].exchange_timestamp == tick.exchange_timestamp => frame.push(tick),
            _ => out.push(vec![tick]),
        }
    }
    out
}

/// Replay files through the full loop with orders going to the paper broker.
pub async fn run_replay(config: TraderConfig, history: &Path, ticks: &Path, chain: &Path) -> Result<SessionSummary> {
    let history = load_history(history)?;
    let ticks = load_ticks(ticks)?;
    let chain = load_chain(chain)?;

    let start = ticks
        .iter()
        .find_map(|t| t.exchange_timestamp.and_then(ist_from_millis))
        .or_else(|| history.last().map(|c| c.open_time))
        .unwrap_or_else(ist_now);

    let broker = Arc::new(PaperBroker::new(history, chain));
    let warm = fetch_warm_start(broker.as_ref(), &config, start).await;
    let journal = Arc::new(CsvOrderJournal::new(config.execution.order_history_dir.clone()));
    let engine = Arc::new(ExecutionEngine::new(config.execution.clone(), broker.clone(), broker.clone(), journal));

    let (tx, rx) = mpsc::channel(1024);
    let trader = tokio::spawn(run_live(config, engine, warm, rx, tx.clone()));

    for frame in frames(ticks) {
        let received_at = frame[0].exchange_timestamp.and_then(ist_from_millis).unwrap_or(start);
        tx.send(TraderEvent::Ticks(frame, received_at))
            .await
            .context("Trading loop stopped during replay")?;
    }
    tx.send(TraderEvent::Shutdown).await.context("Trading loop stopped before shutdown")?;

    let summary = trader.await.context("Trading loop panicked")??;
    info!(
        "Replay finished: {} ticks, {} signals, {} structures completed, {} late ticks, {} orders",
        summary.ticks,
        summary.signals,
        summary.completed_structures,
        summary.late_ticks,
        broker.order_count()
    );
    Ok(summary)
}
