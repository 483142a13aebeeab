//! Carry structure state across window re-evaluations
//!
//! Point indices are positions in the window they were found in. When the
//! strategy window is rebuilt from the aggregator, older candles fall off the
//! front and every index shifts. A snapshot keeps the points together with
//! their candle open times and re-anchors them onto the new window.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::candles::Candle;
use super::swing::{
    PendingSetup, PointRole, SignalTable, StructurePoint, StructurePoints, SwingStructureEngine,
};
use crate::error::RestoreError;

/// Detached copy of the engine's structure state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureSnapshot {
    pub points: StructurePoints,
    pub pending: Option<PendingSetup>,
    pub live_anchor: bool,
}

fn reanchor_points(points: &StructurePoints, candles: &[Candle]) -> Result<StructurePoints, RestoreError> {
    let mut out = StructurePoints::default();
    for role in PointRole::ALL {
        let Some(point) = points.get(role) else { continue };
        let index = candles
            .iter()
            .position(|c| c.open_time == point.open_time)
            .ok_or(RestoreError::MissingCandle {
                role: role_name(role),
                open_time: point.open_time,
            })?;
        *out.get_mut(role) = Some(StructurePoint { index, ..*point });
    }

    let idx = |p: &Option<StructurePoint>| p.map(|p| p.index);
    let chain = [idx(&out.l1), idx(&out.h1), idx(&out.a), idx(&out.b), idx(&out.c)];
    let set: Vec<usize> = chain.iter().flatten().copied().collect();
    if set.windows(2).any(|w| w[0] > w[1]) {
        return Err(RestoreError::OutOfOrder("points must advance L1 -> H1 -> A -> B -> C"));
    }
    if let (Some(b), Some(c), Some(d)) = (out.b, out.c, out.d) {
        if d.index < b.index || d.index > c.index {
            return Err(RestoreError::OutOfOrder("D must lie between B and C"));
        }
    }
    Ok(out)
}

fn role_name(role: PointRole) -> &'static str {
    match role {
        PointRole::L1 => "L1",
        PointRole::H1 => "H1",
        PointRole::A => "A",
        PointRole::B => "B",
        PointRole::C => "C",
        PointRole::D => "D",
    }
}

impl StructureSnapshot {
    /// Worth carrying into the next window: an armed setup, or an L1 restarted
    /// by a live breakout.
    pub fn is_worth_keeping(&self) -> bool {
        self.pending.is_some() || self.live_anchor
    }

    /// Same state with indices pointing into `candles`.
    pub fn reanchor(&self, candles: &[Candle]) -> Result<StructureSnapshot, RestoreError> {
        let points = reanchor_points(&self.points, candles)?;
        let pending = match &self.pending {
            Some(setup) => Some(PendingSetup {
                points: reanchor_points(&setup.points, candles)?,
                ..setup.clone()
            }),
            None => None,
        };
        Ok(StructureSnapshot { points, pending, live_anchor: self.live_anchor })
    }
}

impl SwingStructureEngine {
    pub fn snapshot(&self) -> StructureSnapshot {
        StructureSnapshot {
            points: self.points().clone(),
            pending: self.pending().cloned(),
            live_anchor: self.has_live_anchor(),
        }
    }

    /// Install a snapshot re-anchored onto `candles`. On error the engine is
    /// left untouched.
    pub fn restore(&mut self, snapshot: &StructureSnapshot, candles: &[Candle]) -> Result<(), RestoreError> {
        let anchored = snapshot.reanchor(candles)?;
        self.set_state(anchored.points, anchored.pending, anchored.live_anchor);
        Ok(())
    }

    /// Rebuild state over a fresh window, keeping a snapshot worth keeping.
    ///
    /// A restored structure resumes the scan after its latest point. Anything
    /// else, including a snapshot whose candles have left the window, gets a
    /// full rescan from the first candle.
    pub fn reevaluate(&mut self, candles: &[Candle]) -> SignalTable {
        let snapshot = self.snapshot();
        if snapshot.is_worth_keeping() {
            match self.restore(&snapshot, candles) {
                Ok(()) => {
                    let resume = self.points().last_index().map_or(1, |i| i + 1);
                    info!("Structure carried over, resuming scan at candle {}", resume);
                    return self.scan(candles, resume);
                }
                Err(e) => warn!("Structure dropped on re-evaluation: {}", e),
            }
        }
        self.generate_signals(candles)
    }
}
