//! Tick to candle aggregation
//!
//! One `CandleAggregator` per timeframe. Buckets are aligned to the wall
//! clock minute within the hour, so a 5-minute aggregator opens candles at
//! :00, :05, :10 and so on.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SeedError;
use crate::types::Tick;

/// OHLCV candle keyed by the start of its bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    fn opened_at(open_time: NaiveDateTime, price: f64) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    /// True when every price field is a real number
    pub fn is_finite(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }

    fn absorb(&mut self, price: f64, volume: Option<f64>) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        if let Some(v) = volume {
            self.volume += v;
        }
    }
}

/// Start of the `width_minutes` bucket containing `ts`.
///
/// The minute is floored within the hour; seconds and sub-seconds are dropped.
pub fn bucket_start(ts: NaiveDateTime, width_minutes: u32) -> NaiveDateTime {
    let width = width_minutes.max(1);
    let extra_minutes = ts.minute() % width;
    ts - TimeDelta::minutes(extra_minutes as i64)
        - TimeDelta::seconds(ts.second() as i64)
        - TimeDelta::nanoseconds(ts.nanosecond() as i64)
}

/// Merge ascending candles into `width_minutes` buckets.
///
/// First open, max high, min low, last close, summed volume. Candles already
/// aligned to the width come back unchanged.
pub fn resample(candles: &[Candle], width_minutes: u32) -> Vec<Candle> {
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());

    for candle in candles {
        let start = bucket_start(candle.open_time, width_minutes);
        match out.last_mut() {
            Some(last) if last.open_time == start => {
                last.high = last.high.max(candle.high);
                last.low = last.low.min(candle.low);
                last.close = candle.close;
                last.volume += candle.volume;
            }
            _ => out.push(Candle {
                open_time: start,
                ..*candle
            }),
        }
    }

    out
}

/// Builds candles of one width from a tick stream
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    name: String,
    width_minutes: u32,
    completed: Vec<Candle>,
    current: Option<Candle>,
    max_history: usize,
    late_ticks: u64,
    last_price: Option<f64>,
}

impl CandleAggregator {
    pub fn new(name: impl Into<String>, width_minutes: u32, max_history: usize) -> Self {
        Self {
            name: name.into(),
            width_minutes: width_minutes.max(1),
            completed: Vec::new(),
            current: None,
            max_history: max_history.max(1),
            late_ticks: 0,
            last_price: None,
        }
    }

    pub fn width_minutes(&self) -> u32 {
        self.width_minutes
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ticks dropped because their bucket was already sealed
    pub fn late_ticks(&self) -> u64 {
        self.late_ticks
    }

    pub fn latest_price(&self) -> Option<f64> {
        self.last_price
    }

    /// The in-progress candle, if any
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Completed plus in-progress candle count
    pub fn len(&self) -> usize {
        self.completed.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fold a tick into the current bucket. Returns the candle sealed by this
    /// tick when it opens a new bucket.
    ///
    /// Seeded candles are closed except the newest: a first live tick inside
    /// its bucket reopens it, since history may end mid-bucket.
    pub fn update(&mut self, tick: &Tick) -> Option<Candle> {
        if !tick.ltp.is_finite() {
            warn!("{} {}m: dropping tick with non-finite price at {}", self.name, self.width_minutes, tick.timestamp);
            return None;
        }

        let start = bucket_start(tick.timestamp, self.width_minutes);

        if self.current.is_none() {
            // The first tick after a warm start may land in the last seeded bucket
            match self.completed.last().map(|c| c.open_time) {
                Some(last) if start == last => {
                    self.current = self.completed.pop();
                }
                Some(last) if start < last => {
                    self.record_late(tick, start);
                    return None;
                }
                _ => {}
            }
        }

        if self.current.as_ref().is_some_and(|c| start < c.open_time) {
            self.record_late(tick, start);
            return None;
        }

        self.last_price = Some(tick.ltp);

        match &mut self.current {
            Some(candle) if start == candle.open_time => {
                candle.absorb(tick.ltp, tick.volume);
                None
            }
            Some(candle) => {
                let sealed = *candle;
                *candle = Candle::opened_at(start, tick.ltp);
                self.completed.push(sealed);
                self.trim();
                debug!(
                    "{} {}m CLOSED: {} O:{:.2} H:{:.2} L:{:.2} C:{:.2}",
                    self.name, self.width_minutes, sealed.open_time, sealed.open, sealed.high, sealed.low, sealed.close
                );
                Some(sealed)
            }
            None => {
                self.current = Some(Candle::opened_at(start, tick.ltp));
                None
            }
        }
    }

    fn record_late(&mut self, tick: &Tick, start: NaiveDateTime) {
        self.late_ticks += 1;
        debug!(
            "{} {}m: late tick @ {:.2} for bucket {} dropped ({} so far)",
            self.name, self.width_minutes, tick.ltp, start, self.late_ticks
        );
    }

    fn trim(&mut self) {
        if self.completed.len() > self.max_history {
            let excess = self.completed.len() - self.max_history;
            self.completed.drain(..excess);
        }
    }

    /// Most recent `limit` candles in ascending order, in-progress candle last.
    pub fn snapshot(&self, limit: usize) -> Vec<Candle> {
        let total = self.len();
        let skip = total.saturating_sub(limit);
        self.completed
            .iter()
            .chain(self.current.iter())
            .skip(skip)
            .copied()
            .collect()
    }

    /// Warm-start from historical candles of any finer interval.
    ///
    /// Rows are sorted, cleaned of non-finite prices and resampled to this
    /// aggregator's width. Only buckets newer than what is already held are
    /// appended. Returns the number of candles added.
    pub fn seed(&mut self, history: &[Candle]) -> Result<usize, SeedError> {
        if history.is_empty() {
            warn!("Empty history, {} {}m candles not seeded", self.name, self.width_minutes);
            return Err(SeedError::Empty);
        }

        let mut rows: Vec<Candle> = history
            .iter()
            .filter(|c| {
                if c.is_finite() {
                    true
                } else {
                    warn!("{} {}m: skipping history row at {} with non-finite prices", self.name, self.width_minutes, c.open_time);
                    false
                }
            })
            .copied()
            .collect();

        if rows.is_empty() {
            return Err(SeedError::NoUsableRows { rows: history.len() });
        }

        rows.sort_by_key(|c| c.open_time);
        let resampled = resample(&rows, self.width_minutes);

        let newest_held = self
            .current
            .as_ref()
            .or(self.completed.last())
            .map(|c| c.open_time);

        let before = self.completed.len();
        for candle in resampled {
            if newest_held.is_some_and(|t| candle.open_time <= t) {
                continue;
            }
            if let Some(current) = self.current.take() {
                self.completed.push(current);
            }
            self.completed.push(candle);
        }
        let added = self.completed.len() - before;
        self.trim();

        if let Some(last) = self.completed.last() {
            self.last_price.get_or_insert(last.close);
        }

        info!("Initialized {} historical {}m candles for {}", added, self.width_minutes, self.name);
        Ok(added)
    }

    /// Write every held candle to `<dir>/<name>_<width>min_<stamp>.csv`.
    pub fn export_csv(&self, dir: &Path, stamp: &str) -> Result<Option<PathBuf>> {
        let candles = self.snapshot(usize::MAX);
        if candles.is_empty() {
            warn!("No data to export for {} {}m", self.name, self.width_minutes);
            return Ok(None);
        }

        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!("{}_{}min_{}.csv", self.name, self.width_minutes, stamp));
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        for candle in &candles {
            writer.serialize(candle)?;
        }
        writer.flush()?;

        info!("Exported {} candles to {}", candles.len(), path.display());
        Ok(Some(path))
    }
}
