//! Core Trading Logic
//!
//! Broker-agnostic owner of the candle aggregators, the structure engine and
//! the option chain cache. Used by both:
//! - Replay (ticks and chains from files, paper broker)
//! - Live trading (feed channel plus broker collaborators)
//!
//! The trader never performs I/O. It returns `TradeAction`s and the caller
//! routes them to the order and Greeks tasks.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, TimeDelta};
use tracing::{debug, info, warn};

use super::candles::{Candle, CandleAggregator};
use super::swing::{Signal, SignalTable, SwingStructureEngine};
use crate::config::TraderConfig;
use crate::options::{OptionContract, RiskModel, StrikeSelector};
use crate::types::{ist_to_millis, RawTick, Tick};

/// Spot quotes kept for export; trimmed to `TICK_BUFFER_KEEP` once past this
pub const TICK_BUFFER_CAP: usize = 10_000;
pub const TICK_BUFFER_KEEP: usize = 5_000;

/// Actions the trading loop should take
#[derive(Debug, Clone, PartialEq)]
pub enum TradeAction {
    /// Fetch a fresh option chain; `force` skips the freshness check
    RefreshGreeks { force: bool },
    /// Submit the bracket order for a live signal
    PlaceOrder(Signal),
}

pub struct SwingTrader {
    config: TraderConfig,
    aggregators: Vec<CandleAggregator>,
    strategy_slot: usize,
    engine: SwingStructureEngine,
    chain: Vec<OptionContract>,
    chain_updated_at: Option<NaiveDateTime>,
    refresh_in_flight: bool,
    /// Latest market time seen, from ticks or warm-start history
    clock: Option<NaiveDateTime>,
    /// Market time of the last structure rebuild
    reevaluated_at: Option<NaiveDateTime>,
    spot_ticks: Vec<RawTick>,
    tick_count: u64,
    signals_emitted: u32,
}

impl SwingTrader {
    pub fn new(config: TraderConfig) -> Self {
        let mut widths = config.timeframes.clone();
        if !widths.contains(&config.strategy_timeframe) {
            widths.push(config.strategy_timeframe);
        }
        widths.sort_unstable();
        widths.dedup();

        let aggregators: Vec<CandleAggregator> = widths
            .iter()
            .map(|w| CandleAggregator::new(config.instrument.clone(), *w, config.max_history))
            .collect();
        let strategy_slot = widths
            .iter()
            .position(|w| *w == config.strategy_timeframe)
            .unwrap_or_default();

        let selector = StrikeSelector::new(config.selector.clone(), RiskModel::new(config.risk.clone()));
        let engine = SwingStructureEngine::new(config.swing.clone(), selector);

        Self {
            config,
            aggregators,
            strategy_slot,
            engine,
            chain: Vec::new(),
            chain_updated_at: None,
            refresh_in_flight: false,
            clock: None,
            reevaluated_at: None,
            spot_ticks: Vec::new(),
            tick_count: 0,
            signals_emitted: 0,
        }
    }

    pub fn config(&self) -> &TraderConfig {
        &self.config
    }

    pub fn engine(&self) -> &SwingStructureEngine {
        &self.engine
    }

    pub fn aggregator(&self, width_minutes: u32) -> Option<&CandleAggregator> {
        self.aggregators.iter().find(|a| a.width_minutes() == width_minutes)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn signals_emitted(&self) -> u32 {
        self.signals_emitted
    }

    pub fn option_chain(&self) -> &[OptionContract] {
        &self.chain
    }

    pub fn clock(&self) -> Option<NaiveDateTime> {
        self.clock
    }

    fn advance_clock(&mut self, at: NaiveDateTime) {
        self.clock = Some(self.clock.map_or(at, |c| c.max(at)));
    }

    /// Strategy window: most recent candles of the strategy timeframe
    pub fn window(&self) -> Vec<Candle> {
        self.aggregators[self.strategy_slot].snapshot(self.config.window_limit)
    }

    /// Seed every timeframe from one history series, then run a first scan.
    pub fn warm_start(&mut self, history: &[Candle]) -> Vec<TradeAction> {
        for agg in &mut self.aggregators {
            if let Err(e) = agg.seed(history) {
                warn!("{}m warm start skipped: {}", agg.width_minutes(), e);
            }
        }
        if let Some(last) = history.iter().map(|c| c.open_time).max() {
            self.advance_clock(last);
        }
        self.reevaluate()
    }

    /// Quotes for other tokens are ignored. Spot quotes are buffered for export.
    pub fn on_raw_ticks(&mut self, batch: &[RawTick], received_at: NaiveDateTime) -> Vec<TradeAction> {
        let spot: Vec<&RawTick> = batch.iter().filter(|r| r.token == self.config.spot_token).collect();
        let mut actions = Vec::new();
        for raw in spot {
            let tick = raw.to_tick(received_at);
            self.record_spot_tick(raw, tick.timestamp);
            actions.extend(self.on_tick(&tick));
        }
        actions
    }

    fn record_spot_tick(&mut self, raw: &RawTick, at: NaiveDateTime) {
        let mut raw = raw.clone();
        // Replay groups frames by exchange time
        raw.exchange_timestamp = raw.exchange_timestamp.or_else(|| ist_to_millis(at));
        self.spot_ticks.push(raw);
        if self.spot_ticks.len() > TICK_BUFFER_CAP {
            let excess = self.spot_ticks.len() - TICK_BUFFER_KEEP;
            self.spot_ticks.drain(..excess);
        }
    }

    pub fn spot_ticks(&self) -> &[RawTick] {
        &self.spot_ticks
    }

    /// Fold one tick into every timeframe.
    ///
    /// A strategy candle sealed by this tick rebuilds the structure before the
    /// live breakout check, as does a rebuild overdue by market time.
    pub fn on_tick(&mut self, tick: &Tick) -> Vec<TradeAction> {
        self.tick_count += 1;
        self.advance_clock(tick.timestamp);
        let mut sealed = false;
        for (slot, agg) in self.aggregators.iter_mut().enumerate() {
            if agg.update(tick).is_some() && slot == self.strategy_slot {
                sealed = true;
            }
        }

        let mut actions = Vec::new();
        if sealed || self.reevaluation_due() {
            actions.extend(self.reevaluate());
        }

        if self.engine.pending().is_some() && self.chain_is_stale(tick.timestamp) && !self.refresh_in_flight {
            self.refresh_in_flight = true;
            actions.push(TradeAction::RefreshGreeks { force: false });
        }

        let window = self.window();
        if let Some(signal) = self.engine.check_live_tick(tick.ltp, &window, &self.chain, tick.timestamp) {
            self.signals_emitted += 1;
            info!("SIGNAL ALERT: breakout at {:.2}", tick.ltp);
            actions.push(TradeAction::PlaceOrder(signal));
        }

        self.drain_refresh_request(&mut actions);
        actions
    }

    fn reevaluation_due(&self) -> bool {
        let period = TimeDelta::seconds(self.config.reevaluate_interval_secs as i64);
        match (self.clock, self.reevaluated_at) {
            (Some(now), Some(last)) => now - last >= period,
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn chain_is_stale(&self, now: NaiveDateTime) -> bool {
        let max_age = TimeDelta::seconds(self.config.greeks_refresh_interval_secs as i64);
        self.chain_updated_at.map_or(true, |t| now - t >= max_age)
    }

    fn drain_refresh_request(&mut self, actions: &mut Vec<TradeAction>) {
        if self.engine.take_refresh_request() {
            self.refresh_in_flight = true;
            actions.retain(|a| !matches!(a, TradeAction::RefreshGreeks { .. }));
            actions.push(TradeAction::RefreshGreeks { force: true });
        }
    }

    /// Rebuild the structure over the current window.
    pub fn reevaluate(&mut self) -> Vec<TradeAction> {
        self.reevaluated_at = self.clock;
        let window = self.window();
        if window.is_empty() {
            warn!("No {}m candles yet, skipping re-evaluation", self.config.strategy_timeframe);
            return Vec::new();
        }

        let table: SignalTable = self.engine.reevaluate(&window);
        let fired = table.fired().count();
        if fired > 0 {
            info!("Re-evaluation over {} candles recorded {} historical breakouts", window.len(), fired);
        }
        self.engine.log_structure();

        let mut actions = Vec::new();
        self.drain_refresh_request(&mut actions);
        actions
    }

    /// Install a fetched chain. An empty fetch keeps the previous chain.
    pub fn on_option_chain(&mut self, chain: Vec<OptionContract>, at: NaiveDateTime) {
        self.refresh_in_flight = false;
        if chain.is_empty() {
            warn!("Empty option chain received; continuing with {} cached contracts", self.chain.len());
            return;
        }
        info!("Option chain refreshed: {} contracts", chain.len());
        self.chain = chain;
        self.chain_updated_at = Some(at);
    }

    pub fn on_refresh_failed(&mut self) {
        self.refresh_in_flight = false;
        if !self.chain.is_empty() {
            warn!("Continuing with previously fetched options data");
        }
    }

    /// True when a non-forced refresh may go out now
    pub fn refresh_due(&self, now: NaiveDateTime) -> bool {
        self.chain_is_stale(now)
    }

    pub fn new_session(&mut self) {
        debug!("Resetting signal attempts for new session");
        self.engine.reset_signal_attempts();
    }

    pub fn export_candles(&self, dir: &Path, stamp: &str) -> Result<()> {
        for agg in &self.aggregators {
            agg.export_csv(dir, stamp)?;
        }
        Ok(())
    }

    /// Write buffered spot quotes to `<dir>/spot_ticks_<stamp>.csv` in the
    /// layout `load_ticks` reads back.
    pub fn export_ticks(&self, dir: &Path, stamp: &str) -> Result<Option<PathBuf>> {
        if self.spot_ticks.is_empty() {
            debug!("No spot ticks to export");
            return Ok(None);
        }

        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!("spot_ticks_{}.csv", stamp));
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        for tick in &self.spot_ticks {
            writer.serialize(tick)?;
        }
        writer.flush()?;

        info!("Exported {} spot ticks to {}", self.spot_ticks.len(), path.display());
        Ok(Some(path))
    }
}
