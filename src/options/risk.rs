//! Greeks-based premium risk for a given underlying move
//!
//! Premium lost if the underlying travels from entry to stop is approximated
//! by a second-order Taylor term plus a short theta decay allowance:
//!
//! ```text
//! move   = |entry - stop|
//! risk   = delta * move + 0.5 * gamma * move^2 + (|theta| / periods) * window
//! stop   = max(last_price - risk, floor)
//! target = last_price + reward_multiple * (last_price - stop)
//! ```
//!
//! Negative or zero Greeks are not rejected and flow through the formula.

use serde::{Deserialize, Serialize};

use super::contract::{OptionContract, RiskLevels};
use crate::error::RiskError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Theta is quoted per day; split into this many decay periods
    pub theta_periods_per_day: f64,
    /// Holding window charged for decay, in minutes
    pub theta_window_minutes: f64,
    /// Lowest stop the model will place on a premium
    pub min_stop_price: f64,
    /// Target distance as a multiple of premium risk
    pub reward_multiple: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            theta_periods_per_day: 144.0, // 24 * 6
            theta_window_minutes: 10.0,
            min_stop_price: 0.1,
            reward_multiple: 2.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskModel {
    config: RiskConfig,
}

impl RiskModel {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Premium risk for `option` if the underlying moves from
    /// `underlying_entry` to `underlying_stop`.
    pub fn compute_stop_loss(
        &self,
        option: &OptionContract,
        underlying_entry: f64,
        underlying_stop: f64,
    ) -> Result<RiskLevels, RiskError> {
        let inputs = [
            ("underlying_entry", underlying_entry),
            ("underlying_stop", underlying_stop),
            ("delta", option.delta),
            ("gamma", option.gamma),
            ("theta", option.theta),
            ("last_price", option.last_price),
        ];
        if let Some(&(field, _)) = inputs.iter().find(|(_, v)| !v.is_finite()) {
            return Err(RiskError::NonFinite {
                symbol: option.symbol.clone(),
                field,
            });
        }

        let underlying_move = (underlying_entry - underlying_stop).abs();
        let delta_impact = option.delta * underlying_move;
        let gamma_impact = 0.5 * option.gamma * underlying_move.powi(2);
        let theta_impact = (option.theta.abs() / self.config.theta_periods_per_day)
            * (self.config.theta_window_minutes / 60.0);
        let total = delta_impact + gamma_impact + theta_impact;

        if !total.is_finite() {
            return Err(RiskError::NonFinite {
                symbol: option.symbol.clone(),
                field: "risk_per_lot",
            });
        }

        let (stop_loss, target) = if option.last_price > 0.0 {
            let stop = (option.last_price - total).max(self.config.min_stop_price);
            let target = option.last_price + self.config.reward_multiple * (option.last_price - stop);
            (Some(stop), Some(target))
        } else {
            (None, None)
        };

        Ok(RiskLevels {
            risk_per_lot: total,
            stop_loss,
            target,
            delta_impact,
            gamma_impact,
            theta_impact,
        })
    }

    /// Run the model and attach the result to the contract.
    pub fn apply(
        &self,
        option: &mut OptionContract,
        underlying_entry: f64,
        underlying_stop: f64,
    ) -> Result<RiskLevels, RiskError> {
        let levels = self.compute_stop_loss(option, underlying_entry, underlying_stop)?;
        option.risk = Some(levels);
        Ok(levels)
    }
}
