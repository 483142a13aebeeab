//! Six-point bullish swing structure
//!
//! Points form in order over a window of candles:
//!
//! ```text
//!            H1              D (highest high B..=C)
//!           /  \    B      / \
//!          /    \  / \    /   C
//!         /      A    \  /
//!   L1 __/             \/
//! ```
//!
//! - L1: running swing-low floor, seeded from the first candle
//! - H1: swing high after L1, above L1
//! - A: first swing low after H1, above L1
//! - B: swing low at least two candles after A, above A
//! - C: first lower low after B that stays above B
//! - D: highest high between B and C inclusive
//!
//! Once D exists a `PendingSetup` is armed. Price trading above D fires the
//! breakout, all points reset and L1 restarts from the triggering candle.
//! The batch scan (`generate_signals`) records breakouts in a `SignalTable`;
//! the live path (`check_live_tick`) sizes an option and returns a `Signal`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::candles::Candle;
use crate::error::SetupError;
use crate::options::{OptionContract, StrikeSelector};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingConfig {
    /// Added to D for the underlying entry
    pub entry_buffer: f64,
    /// Subtracted from C for the underlying stop
    pub stop_buffer: f64,
    /// Target distance as a multiple of entry - stop
    pub reward_multiple: f64,
    /// Live signals honoured per session
    pub max_signal_attempts: u32,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            entry_buffer: 0.05,
            stop_buffer: 0.05,
            reward_multiple: 2.0,
            max_signal_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointRole {
    L1,
    H1,
    A,
    B,
    C,
    D,
}

impl std::fmt::Display for PointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::H1 => write!(f, "H1"),
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
            Self::D => write!(f, "D"),
        }
    }
}

/// Price and position of one structure point in the processed window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructurePoint {
    pub price: f64,
    pub index: usize,
    /// Candle the point sits on; survives window shifts where `index` does not
    pub open_time: NaiveDateTime,
}

impl StructurePoint {
    fn high_of(candles: &[Candle], index: usize) -> Self {
        Self { price: candles[index].high, index, open_time: candles[index].open_time }
    }

    fn low_of(candles: &[Candle], index: usize) -> Self {
        Self { price: candles[index].low, index, open_time: candles[index].open_time }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructurePoints {
    pub l1: Option<StructurePoint>,
    pub h1: Option<StructurePoint>,
    pub a: Option<StructurePoint>,
    pub b: Option<StructurePoint>,
    pub c: Option<StructurePoint>,
    pub d: Option<StructurePoint>,
}

impl StructurePoints {
    pub fn get(&self, role: PointRole) -> Option<&StructurePoint> {
        match role {
            PointRole::L1 => self.l1.as_ref(),
            PointRole::H1 => self.h1.as_ref(),
            PointRole::A => self.a.as_ref(),
            PointRole::B => self.b.as_ref(),
            PointRole::C => self.c.as_ref(),
            PointRole::D => self.d.as_ref(),
        }
    }

    pub fn get_mut(&mut self, role: PointRole) -> &mut Option<StructurePoint> {
        match role {
            PointRole::L1 => &mut self.l1,
            PointRole::H1 => &mut self.h1,
            PointRole::A => &mut self.a,
            PointRole::B => &mut self.b,
            PointRole::C => &mut self.c,
            PointRole::D => &mut self.d,
        }
    }

    /// Latest candle index any point sits on
    pub fn last_index(&self) -> Option<usize> {
        PointRole::ALL.iter().filter_map(|r| self.get(*r)).map(|p| p.index).max()
    }
}

impl PointRole {
    pub const ALL: [PointRole; 6] = [Self::L1, Self::H1, Self::A, Self::B, Self::C, Self::D];
}

/// Armed trade waiting for price to clear D
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSetup {
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    /// Points as they stood when D was computed
    pub points: StructurePoints,
}

impl PendingSetup {
    pub fn risk_reward(&self) -> f64 {
        let risk = self.entry_price - self.stop_loss;
        if risk > 0.0 {
            (self.target - self.entry_price) / risk
        } else {
            0.0
        }
    }
}

/// Breakout recorded by the batch scan at one candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub open_time: NaiveDateTime,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target: f64,
}

/// One slot per processed candle; `None` where nothing fired
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalTable {
    rows: Vec<Option<SignalRow>>,
}

impl SignalTable {
    fn with_len(len: usize) -> Self {
        Self { rows: vec![None; len] }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<&SignalRow> {
        self.rows.get(index).and_then(Option::as_ref)
    }

    /// (candle index, row) for every breakout
    pub fn fired(&self) -> impl Iterator<Item = (usize, &SignalRow)> {
        self.rows.iter().enumerate().filter_map(|(i, r)| r.as_ref().map(|r| (i, r)))
    }
}

/// A structure that ran to breakout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStructure {
    pub setup: PendingSetup,
    pub trigger_index: usize,
    pub trigger_time: NaiveDateTime,
}

/// Live breakout with the option chosen to express it
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    pub option: OptionContract,
    pub quantity: u32,
    pub total_risk: f64,
    pub timestamp: NaiveDateTime,
}

/// Strict local maximum of highs. The first and last candle never qualify.
pub fn is_swing_high(candles: &[Candle], i: usize) -> bool {
    if i == 0 || i + 1 >= candles.len() {
        return false;
    }
    let h = candles[i].high;
    h > candles[i - 1].high && h > candles[i + 1].high
}

/// Strict local minimum of lows. The first and last candle never qualify.
pub fn is_swing_low(candles: &[Candle], i: usize) -> bool {
    if i == 0 || i + 1 >= candles.len() {
        return false;
    }
    let l = candles[i].low;
    l < candles[i - 1].low && l < candles[i + 1].low
}

/// Detects the structure and tracks its lifecycle
#[derive(Debug, Clone)]
pub struct SwingStructureEngine {
    config: SwingConfig,
    selector: StrikeSelector,
    points: StructurePoints,
    pending: Option<PendingSetup>,
    completed: Vec<CompletedStructure>,
    signal_attempts: u32,
    refresh_requested: bool,
    /// L1 was reseeded by a live breakout and should survive re-evaluation
    live_anchor: bool,
}

impl SwingStructureEngine {
    pub fn new(config: SwingConfig, selector: StrikeSelector) -> Self {
        Self {
            config,
            selector,
            points: StructurePoints::default(),
            pending: None,
            completed: Vec::new(),
            signal_attempts: 0,
            refresh_requested: false,
            live_anchor: false,
        }
    }

    pub fn config(&self) -> &SwingConfig {
        &self.config
    }

    pub fn points(&self) -> &StructurePoints {
        &self.points
    }

    pub fn pending(&self) -> Option<&PendingSetup> {
        self.pending.as_ref()
    }

    pub fn completed_structures(&self) -> &[CompletedStructure] {
        &self.completed
    }

    pub fn signal_attempts(&self) -> u32 {
        self.signal_attempts
    }

    /// Start a new session's attempt budget
    pub fn reset_signal_attempts(&mut self) {
        self.signal_attempts = 0;
    }

    /// True once after D has been computed; the caller should force a Greeks refresh
    pub fn take_refresh_request(&mut self) -> bool {
        std::mem::take(&mut self.refresh_requested)
    }

    pub fn has_live_anchor(&self) -> bool {
        self.live_anchor
    }

    pub(crate) fn set_state(&mut self, points: StructurePoints, pending: Option<PendingSetup>, live_anchor: bool) {
        self.points = points;
        self.pending = pending;
        self.live_anchor = live_anchor;
    }

    /// Clear the given role and everything downstream of it.
    fn reset_from(&mut self, role: PointRole) {
        let start = PointRole::ALL.iter().position(|r| *r == role).unwrap_or(0);
        for r in &PointRole::ALL[start..] {
            *self.points.get_mut(*r) = None;
        }
        self.pending = None;
    }

    fn seed_l1(&mut self, candles: &[Candle]) -> Option<usize> {
        self.reset_from(PointRole::L1);
        self.live_anchor = false;
        let first = candles.iter().position(Candle::is_finite)?;
        let l1 = StructurePoint::low_of(candles, first);
        info!("L1 SEED: {:.2} @ {}", l1.price, l1.open_time);
        self.points.l1 = Some(l1);
        Some(first)
    }

    /// Scan the whole window from scratch.
    pub fn generate_signals(&mut self, candles: &[Candle]) -> SignalTable {
        match self.seed_l1(candles) {
            Some(first) => self.scan(candles, first + 1),
            None => {
                warn!("No usable candles to seed L1");
                SignalTable::with_len(candles.len())
            }
        }
    }

    /// Apply the structure rules to `candles[start..]` on top of current state.
    pub fn scan(&mut self, candles: &[Candle], start: usize) -> SignalTable {
        let mut table = SignalTable::with_len(candles.len());
        for i in start.max(1)..candles.len() {
            if !candles[i].is_finite() {
                warn!("Skipping candle {} at {} with non-finite prices", i, candles[i].open_time);
                continue;
            }
            if let Some(row) = self.step(candles, i) {
                table.rows[i] = Some(row);
            }
        }
        table
    }

    fn step(&mut self, candles: &[Candle], i: usize) -> Option<SignalRow> {
        let candle = candles[i];
        let swing_low = is_swing_low(candles, i);
        let swing_high = is_swing_high(candles, i);

        // L1 ratchets down on any lower swing low
        if swing_low {
            if let Some(l1) = self.points.l1 {
                if candle.low < l1.price {
                    self.reset_from(PointRole::H1);
                    self.points.l1 = Some(StructurePoint::low_of(candles, i));
                    info!("POINT UPDATE: L1 {:.2} -> {:.2} @ {}", l1.price, candle.low, candle.open_time);
                }
            }
        }

        if swing_high {
            if let Some(l1) = self.points.l1 {
                if i > l1.index && candle.high > l1.price {
                    match self.points.h1 {
                        None => {
                            self.points.h1 = Some(StructurePoint::high_of(candles, i));
                            info!("POINT: H1 {:.2} @ {}", candle.high, candle.open_time);
                        }
                        Some(h1) if candle.high > h1.price => {
                            self.reset_from(PointRole::A);
                            self.points.h1 = Some(StructurePoint::high_of(candles, i));
                            info!("POINT UPDATE: H1 {:.2} -> {:.2} @ {}", h1.price, candle.high, candle.open_time);
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        if let (Some(l1), Some(h1), None) = (self.points.l1, self.points.h1, self.points.a) {
            if swing_low && i > h1.index && candle.low > l1.price {
                self.points.a = Some(StructurePoint::low_of(candles, i));
                info!("POINT: A {:.2} @ {}", candle.low, candle.open_time);
            }
        }

        if let (Some(a), None) = (self.points.a, self.points.b) {
            if swing_low && i > a.index + 1 && candle.low > a.price {
                self.points.b = Some(StructurePoint::low_of(candles, i));
                info!("POINT: B {:.2} @ {}", candle.low, candle.open_time);
            }
        }

        if let (Some(b), None) = (self.points.b, self.points.c) {
            let lower_low = candle.low < candles[i - 1].low;
            if i > b.index && lower_low && candle.low > b.price {
                let c = StructurePoint::low_of(candles, i);
                match self.arm_setup(candles, b, c) {
                    Ok(()) => {}
                    Err(e) => error!("Setup not armed at {}: {}", candle.open_time, e),
                }
            }
        }

        let pending = self.pending.as_ref()?;
        let d = pending.points.d?;
        if candle.high > d.price {
            let row = SignalRow {
                open_time: candle.open_time,
                entry_price: pending.entry_price,
                stop_loss: pending.stop_loss,
                target: pending.target,
            };
            info!(
                "BREAKOUT: {} high {:.2} > D {:.2} | Entry: {:.2} Stop: {:.2} Target: {:.2}",
                candle.open_time, candle.high, d.price, row.entry_price, row.stop_loss, row.target
            );
            self.complete(i, candle.open_time);
            self.points.l1 = Some(StructurePoint::low_of(candles, i));
            return Some(row);
        }
        None
    }

    /// Highest high over B..=C; the first index wins ties.
    pub fn compute_d(candles: &[Candle], b: StructurePoint, c: StructurePoint) -> Result<StructurePoint, SetupError> {
        if b.index > c.index {
            return Err(SetupError::InvertedRange { b: b.index, c: c.index });
        }
        if c.index >= candles.len() {
            return Err(SetupError::OutOfRange { b: b.index, c: c.index, len: candles.len() });
        }

        let mut best: Option<usize> = None;
        for i in b.index..=c.index {
            let high = candles[i].high;
            if !high.is_finite() {
                continue;
            }
            if best.map_or(true, |j| high > candles[j].high) {
                best = Some(i);
            }
        }

        best.map(|i| StructurePoint::high_of(candles, i)).ok_or(SetupError::NoFiniteHigh)
    }

    fn build_setup(&self, c: &StructurePoint, d: &StructurePoint, points: StructurePoints) -> PendingSetup {
        let entry_price = d.price + self.config.entry_buffer;
        let stop_loss = c.price - self.config.stop_buffer;
        let target = entry_price + self.config.reward_multiple * (entry_price - stop_loss);
        PendingSetup { entry_price, stop_loss, target, points }
    }

    /// Set C, compute D and arm the setup. Nothing changes on error.
    fn arm_setup(&mut self, candles: &[Candle], b: StructurePoint, c: StructurePoint) -> Result<(), SetupError> {
        let d = Self::compute_d(candles, b, c)?;

        let mut points = self.points.clone();
        points.c = Some(c);
        points.d = Some(d);
        let setup = self.build_setup(&c, &d, points.clone());

        info!("POINT: C {:.2} @ {}", c.price, c.open_time);
        info!(
            "SETUP ARMED: D {:.2} @ {} | Entry: {:.2} Stop: {:.2} Target: {:.2}",
            d.price, d.open_time, setup.entry_price, setup.stop_loss, setup.target
        );

        self.points = points;
        self.pending = Some(setup);
        self.refresh_requested = true;
        Ok(())
    }

    fn complete(&mut self, trigger_index: usize, trigger_time: NaiveDateTime) {
        if let Some(setup) = self.pending.take() {
            self.completed.push(CompletedStructure { setup, trigger_index, trigger_time });
        }
        self.reset_from(PointRole::L1);
    }

    /// Check a live price against D.
    ///
    /// `candles` is the current strategy window; its last candle becomes the new
    /// L1 after a breakout. `chain` is the option table to size from.
    pub fn check_live_tick(
        &mut self,
        price: f64,
        candles: &[Candle],
        chain: &[OptionContract],
        at: NaiveDateTime,
    ) -> Option<Signal> {
        if !price.is_finite() {
            return None;
        }
        let (c, d) = (self.points.c?, self.points.d?);
        debug!("Live {:.2} vs D {:.2}", price, d.price);
        if price <= d.price {
            return None;
        }

        if self.signal_attempts >= self.config.max_signal_attempts {
            debug!(
                "Breakout {:.2} > D {:.2} ignored, {} of {} signal attempts used",
                price, d.price, self.signal_attempts, self.config.max_signal_attempts
            );
            return None;
        }

        info!("LIVE BREAKOUT: {:.2} > D {:.2}", price, d.price);

        if self.pending.is_none() {
            let setup = self.build_setup(&c, &d, self.points.clone());
            self.pending = Some(setup);
        }

        if chain.is_empty() {
            error!("No options data for breakout at {:.2}; requesting refresh", price);
            self.refresh_requested = true;
            return None;
        }

        let Some(selection) = self.selector.select(chain, price) else {
            error!("No option strike could be selected at {:.2}", price);
            return None;
        };

        let setup = self.pending.as_ref()?;
        let signal = Signal {
            entry_price: setup.entry_price,
            stop_loss: setup.stop_loss,
            target: setup.target,
            option: selection.option,
            quantity: selection.quantity,
            total_risk: selection.total_risk,
            timestamp: at,
        };
        self.signal_attempts += 1;

        info!(
            "SIGNAL: {} x{} | Entry: {:.2} Stop: {:.2} Target: {:.2} | Risk: {:.2}",
            signal.option, signal.quantity, signal.entry_price, signal.stop_loss, signal.target, signal.total_risk
        );

        match candles.last() {
            Some(last) => {
                let trigger_index = candles.len() - 1;
                self.complete(trigger_index, last.open_time);
                self.points.l1 = Some(StructurePoint::low_of(candles, trigger_index));
                self.live_anchor = true;
            }
            None => self.complete(0, at),
        }

        Some(signal)
    }

    /// Multi-line description of the current structure and pending setup
    pub fn structure_summary(&self) -> String {
        let mut out = String::from("===== CURRENT BULLISH STRUCTURE =====\n");
        for role in PointRole::ALL {
            match self.points.get(role) {
                Some(p) => out.push_str(&format!("{}: {:.2} at {}\n", role, p.price, p.open_time)),
                None => out.push_str(&format!("{}: not formed\n", role)),
            }
        }
        if let Some(setup) = &self.pending {
            out.push_str(&format!(
                "Pending | Entry: {:.2} Stop: {:.2} Target: {:.2} | R:R 1:{:.2}\n",
                setup.entry_price,
                setup.stop_loss,
                setup.target,
                setup.risk_reward()
            ));
        }
        out
    }

    pub fn log_structure(&self) {
        for line in self.structure_summary().lines() {
            info!("{}", line);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::options::contract::test_contract;
    use chrono::{NaiveDate, TimeDelta};

    pub(crate) fn bars(hl: &[(f64, f64)]) -> Vec<Candle> {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(9, 15, 0).unwrap();
        hl.iter()
            .enumerate()
            .map(|(i, &(high, low))| Candle {
                open_time: start + TimeDelta::minutes(5 * i as i64),
                open: low,
                high,
                low,
                close: high,
                volume: 0.0,
            })
            .collect()
    }

    /// Full L1..D pattern. B = 98 at 7, D = 110 at 8, C = 99.5 at 9.
    pub(crate) fn pattern_rows() -> Vec<(f64, f64)> {
        vec![
            (100.0, 95.0),  // 0  L1 seed
            (103.0, 96.0),  // 1
            (108.0, 97.0),  // 2  H1
            (104.0, 92.0),  // 3  lower swing low resets L1 -> 92
            (112.0, 98.0),  // 4  H1
            (106.0, 96.5),  // 5  A
            (108.0, 99.0),  // 6  swing high below H1
            (107.0, 98.0),  // 7  B (7 > 5 + 1, above A)
            (110.0, 100.0), // 8  D
            (109.0, 99.5),  // 9  C: lower low, above B
            (109.5, 101.0), // 10
        ]
    }

    pub(crate) fn pattern() -> Vec<Candle> {
        bars(&pattern_rows())
    }

    fn engine() -> SwingStructureEngine {
        SwingStructureEngine::new(SwingConfig::default(), StrikeSelector::default())
    }

    fn chain() -> Vec<OptionContract> {
        // Sized for spot near 20000; around D it falls back to one lot
        vec![test_contract("NIFTY20000CE", 850.0 / 75.0 / 100.0, 0.0, 0.0, 150.0)]
    }

    #[test]
    fn test_swing_primitive() {
        let c = bars(&[(10.0, 5.0), (12.0, 4.0), (11.0, 6.0), (11.0, 6.0)]);
        assert!(is_swing_high(&c, 1));
        assert!(is_swing_low(&c, 1));
        assert!(!is_swing_high(&c, 0));
        assert!(!is_swing_low(&c, 3));
        // equal neighbour is not strict
        assert!(!is_swing_high(&c, 2));
    }

    #[test]
    fn test_points_and_setup() {
        let candles = pattern();
        let mut engine = engine();
        let table = engine.generate_signals(&candles);

        let p = engine.points();
        assert_eq!(p.l1.unwrap().price, 92.0);
        assert_eq!(p.l1.unwrap().index, 3);
        assert_eq!(p.h1.unwrap().index, 4);
        assert_eq!(p.a.unwrap().index, 5);
        assert_eq!(p.b.unwrap().index, 7);
        assert_eq!(p.c.unwrap().index, 9);
        assert_eq!(p.c.unwrap().price, 99.5);
        assert_eq!(p.d.unwrap().price, 110.0);
        assert_eq!(p.d.unwrap().index, 8);

        let setup = engine.pending().unwrap();
        assert!((setup.entry_price - 110.05).abs() < 1e-9);
        assert!((setup.stop_loss - 99.45).abs() < 1e-9);
        assert!((setup.target - (110.05 + 2.0 * 10.6)).abs() < 1e-9);
        assert!((setup.risk_reward() - 2.0).abs() < 1e-9);
        assert_eq!(table.fired().count(), 0);
        assert!(engine.take_refresh_request());
        assert!(!engine.take_refresh_request());
    }

    #[test]
    fn test_batch_breakout_resets_and_reseeds_l1() {
        let mut rows = pattern_rows();
        rows.push((110.5, 105.0));
        let candles = bars(&rows);

        let mut engine = engine();
        let table = engine.generate_signals(&candles);

        let fired: Vec<_> = table.fired().collect();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, 11);
        assert!((fired[0].1.entry_price - 110.05).abs() < 1e-9);

        assert!(engine.pending().is_none());
        assert_eq!(engine.points().l1.unwrap().index, 11);
        assert_eq!(engine.points().l1.unwrap().price, 105.0);
        assert!(engine.points().h1.is_none());
        assert_eq!(engine.completed_structures().len(), 1);
        // Batch breakouts never consume live attempts
        assert_eq!(engine.signal_attempts(), 0);
    }

    #[test]
    fn test_rescan_is_deterministic() {
        let mut rows = pattern_rows();
        rows.push((110.5, 105.0));
        let candles = bars(&rows);

        let mut first = engine();
        let mut second = engine();
        let a = first.generate_signals(&candles);
        let b = second.generate_signals(&candles);
        assert_eq!(a, b);
        assert_eq!(first.points(), second.points());

        // Same engine, same window again
        let again = first.generate_signals(&candles);
        assert_eq!(again, a);
        assert_eq!(first.points(), second.points());
    }

    #[test]
    fn test_d_first_max_wins_ties() {
        let candles = bars(&[(10.0, 1.0), (15.0, 1.0), (15.0, 1.0), (12.0, 1.0)]);
        let b = StructurePoint::low_of(&candles, 0);
        let c = StructurePoint::low_of(&candles, 3);
        let d = SwingStructureEngine::compute_d(&candles, b, c).unwrap();
        assert_eq!(d.index, 1);
        assert_eq!(d.price, 15.0);
    }

    #[test]
    fn test_d_rejects_bad_range() {
        let candles = bars(&[(10.0, 1.0), (15.0, 1.0)]);
        let b = StructurePoint::low_of(&candles, 1);
        let c = StructurePoint::low_of(&candles, 0);
        assert_eq!(
            SwingStructureEngine::compute_d(&candles, b, c),
            Err(SetupError::InvertedRange { b: 1, c: 0 })
        );
        let far = StructurePoint { index: 9, ..c };
        assert_eq!(
            SwingStructureEngine::compute_d(&candles, c, far),
            Err(SetupError::OutOfRange { b: 0, c: 9, len: 2 })
        );
    }

    #[test]
    fn test_higher_h1_resets_downstream() {
        // A forms at 3, then a higher swing high at 4 replaces H1 and clears A
        let candles = bars(&[
            (100.0, 95.0),
            (105.0, 96.0),
            (103.0, 97.0),
            (104.0, 96.5),
            (107.0, 98.0),
            (106.0, 99.0),
        ]);
        let mut engine = engine();
        engine.generate_signals(&candles);
        let p = engine.points();
        assert_eq!(p.h1.unwrap().index, 4);
        assert!(p.a.is_none());
    }

    #[test]
    fn test_live_breakout_requires_strictly_above_d() {
        let candles = pattern();
        let mut engine = engine();
        engine.generate_signals(&candles);
        let at = candles.last().unwrap().open_time;

        assert!(engine.check_live_tick(110.0, &candles, &chain(), at).is_none());
        assert!(engine.pending().is_some());

        let signal = engine.check_live_tick(110.01, &candles, &chain(), at).unwrap();
        assert!((signal.entry_price - 110.05).abs() < 1e-9);
        assert_eq!(signal.quantity, 75);
        assert_eq!(engine.signal_attempts(), 1);

        // Structure is consumed and L1 restarts from the live candle
        assert!(engine.pending().is_none());
        assert!(engine.points().d.is_none());
        assert_eq!(engine.points().l1.unwrap().index, candles.len() - 1);
        assert!(engine.has_live_anchor());
    }

    #[test]
    fn test_live_attempt_cap() {
        let candles = pattern();
        let mut engine = engine();
        engine.generate_signals(&candles);
        let at = candles.last().unwrap().open_time;
        assert!(engine.check_live_tick(111.0, &candles, &chain(), at).is_some());

        // A second structure on the same session is ignored
        engine.generate_signals(&candles);
        assert!(engine.pending().is_some());
        assert!(engine.check_live_tick(111.0, &candles, &chain(), at).is_none());
        assert!(engine.pending().is_some());

        engine.reset_signal_attempts();
        assert!(engine.check_live_tick(111.0, &candles, &chain(), at).is_some());
    }

    #[test]
    fn test_live_without_chain_requests_refresh() {
        let candles = pattern();
        let mut engine = engine();
        engine.generate_signals(&candles);
        engine.take_refresh_request();
        let at = candles.last().unwrap().open_time;

        assert!(engine.check_live_tick(112.0, &candles, &[], at).is_none());
        assert!(engine.take_refresh_request());
        assert_eq!(engine.signal_attempts(), 0);
        assert!(engine.pending().is_some());
    }

    #[test]
    fn test_no_structure_no_live_signal() {
        let mut engine = engine();
        let candles = bars(&[(100.0, 95.0), (101.0, 96.0)]);
        engine.generate_signals(&candles);
        assert!(engine.check_live_tick(1e6, &candles, &chain(), candles[1].open_time).is_none());
    }

    #[test]
    fn test_non_finite_candle_skipped() {
        let mut candles = pattern();
        candles[1].high = f64::NAN;
        let mut engine = engine();
        let table = engine.generate_signals(&candles);
        assert_eq!(table.len(), candles.len());
        assert!(engine.pending().is_some());
    }

    #[test]
    fn test_summary_mentions_pending() {
        let mut engine = engine();
        engine.generate_signals(&pattern());
        let summary = engine.structure_summary();
        assert!(summary.contains("D: 110.00"));
        assert!(summary.contains("R:R 1:2.00"));
    }
}
