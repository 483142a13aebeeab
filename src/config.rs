//! Trader configuration
//!
//! Every field has a default; a JSON file only needs the values it changes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::execution::ExecutionConfig;
use crate::options::{RiskConfig, SelectorConfig};
use crate::trading_core::SwingConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraderConfig {
    /// Underlying name used for option chain lookups
    pub instrument: String,
    /// Feed token of the underlying; ticks for other tokens are ignored
    pub spot_token: String,

    /// Candle widths built from the tick stream, in minutes
    pub timeframes: Vec<u32>,
    /// Width the swing structure runs on
    pub strategy_timeframe: u32,
    /// Candles handed to the structure engine on each pass
    pub window_limit: usize,
    /// Completed candles kept per timeframe
    pub max_history: usize,
    /// Days of history fetched for the warm start
    pub warm_start_days: i64,

    pub reevaluate_interval_secs: u64,
    /// Minimum age of the cached chain before a non-forced refresh
    pub greeks_refresh_interval_secs: u64,
    pub export_interval_secs: u64,
    /// Candle CSV exports land here
    pub data_dir: PathBuf,

    pub swing: SwingConfig,
    pub risk: RiskConfig,
    pub selector: SelectorConfig,
    pub execution: ExecutionConfig,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            instrument: "NIFTY".to_string(),
            spot_token: "99926000".to_string(), // NIFTY 50 index
            timeframes: vec![1, 5, 15],
            strategy_timeframe: 5,
            window_limit: 100,
            max_history: 2_000,
            warm_start_days: 5,
            reevaluate_interval_secs: 300,
            greeks_refresh_interval_secs: 10,
            export_interval_secs: 1_800,
            data_dir: PathBuf::from("data"),
            swing: SwingConfig::default(),
            risk: RiskConfig::default(),
            selector: SelectorConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl TraderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }
}
