//! Strike and size selection against a monetary risk band

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::contract::{OptionContract, DEFAULT_LOT_SIZE};
use super::risk::RiskModel;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Lowest acceptable total risk in rupees
    pub target_risk_min: f64,
    /// Highest acceptable total risk in rupees
    pub target_risk_max: f64,
    /// Units per lot used for sizing
    pub lot_size: u32,
    /// Largest lot count tried per contract
    pub max_lots: u32,
    /// Underlying stop used for sizing, as a fraction below the current price
    pub underlying_stop_fraction: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            target_risk_min: 800.0,
            target_risk_max: 900.0,
            lot_size: DEFAULT_LOT_SIZE,
            max_lots: 50,
            underlying_stop_fraction: 0.005, // 0.5% below spot
        }
    }
}

impl SelectorConfig {
    pub fn target_mid(&self) -> f64 {
        (self.target_risk_min + self.target_risk_max) / 2.0
    }
}

/// Chosen contract with its quantity in units
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub option: OptionContract,
    pub quantity: u32,
    pub total_risk: f64,
    /// False when no lot count landed inside the band and the closest
    /// single-lot contract was taken instead
    pub in_band: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StrikeSelector {
    config: SelectorConfig,
    risk: RiskModel,
}

impl StrikeSelector {
    pub fn new(config: SelectorConfig, risk: RiskModel) -> Self {
        Self { config, risk }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn risk_model(&self) -> &RiskModel {
        &self.risk
    }

    /// Pick the contract and lot count whose total risk sits closest to the
    /// middle of the band.
    ///
    /// Every contract is priced for a drop from `current_price` to
    /// `current_price * (1 - underlying_stop_fraction)`. Contracts whose risk
    /// cannot be computed are skipped. Returns `None` only when nothing could
    /// be priced.
    pub fn select(&self, contracts: &[OptionContract], current_price: f64) -> Option<Selection> {
        if contracts.is_empty() {
            warn!("No options data available for strike selection");
            return None;
        }

        let underlying_stop = current_price * (1.0 - self.config.underlying_stop_fraction);
        let mid = self.config.target_mid();
        let lot_size = self.config.lot_size;

        let priced: Vec<OptionContract> = contracts
            .iter()
            .filter_map(|contract| {
                let mut contract = contract.clone();
                match self.risk.apply(&mut contract, current_price, underlying_stop) {
                    Ok(_) => Some(contract),
                    Err(e) => {
                        debug!("Skipping {}: {}", contract.symbol, e);
                        None
                    }
                }
            })
            .collect();

        if priced.is_empty() {
            warn!("No valid options with stop loss calculation");
            return None;
        }

        // (contract index, quantity, total risk)
        let mut in_band: Vec<(usize, u32, f64)> = Vec::new();
        for (idx, contract) in priced.iter().enumerate() {
            let risk_per_lot = contract.risk_per_lot().unwrap_or_default();
            for lots in 1..=self.config.max_lots {
                let quantity = lots * lot_size;
                let total_risk = risk_per_lot * quantity as f64;

                if total_risk >= self.config.target_risk_min && total_risk <= self.config.target_risk_max {
                    in_band.push((idx, quantity, total_risk));
                }
                if total_risk > self.config.target_risk_max {
                    break;
                }
            }
        }

        let best = in_band
            .into_iter()
            .min_by(|a, b| (a.2 - mid).abs().total_cmp(&(b.2 - mid).abs()));

        if let Some((idx, quantity, total_risk)) = best {
            let option = priced[idx].clone();
            info!(
                "STRIKE: {} x{} | risk {:.2} in [{:.0}, {:.0}]",
                option, quantity, total_risk, self.config.target_risk_min, self.config.target_risk_max
            );
            return Some(Selection { option, quantity, total_risk, in_band: true });
        }

        let one_lot_risk = |c: &OptionContract| c.risk_per_lot().unwrap_or_default() * lot_size as f64;
        let closest = priced
            .into_iter()
            .min_by(|a, b| (one_lot_risk(a) - mid).abs().total_cmp(&(one_lot_risk(b) - mid).abs()))?;
        let total_risk = one_lot_risk(&closest);

        warn!(
            "STRIKE: nothing inside [{:.0}, {:.0}], falling back to {} x{} | risk {:.2}",
            self.config.target_risk_min, self.config.target_risk_max, closest, lot_size, total_risk
        );
        Some(Selection { option: closest, quantity: lot_size, total_risk, in_band: false })
    }
}
