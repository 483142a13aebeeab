//! Configuration for execution engine

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Execution mode determines whether orders are simulated or sent to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionMode {
    /// Simulated execution (no actual orders)
    #[default]
    Simulation,
    /// Broker paper account
    Paper,
    /// Live account
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulation => write!(f, "Simulation"),
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Budget for one class of outbound call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassLimits {
    /// Calls allowed per rolling minute window
    pub per_minute: u32,
    /// Minimum spacing between consecutive calls
    pub min_interval_ms: u64,
}

impl ClassLimits {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Rate limits and backoff policy for broker calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub order_placement: ClassLimits,
    pub status_poll: ClassLimits,
    pub greeks_fetch: ClassLimits,

    /// Throttle backoff grows by this many seconds per attempt
    pub transient_step_secs: u64,
    /// Throttle backoff ceiling
    pub transient_cap_secs: u64,

    /// Upper bound of the uniform jitter added to exponential backoff
    pub backoff_jitter_secs: f64,
    /// Exponential backoff ceiling
    pub backoff_cap_secs: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            order_placement: ClassLimits { per_minute: 500, min_interval_ms: 50 }, // 20/s
            status_poll: ClassLimits { per_minute: 500, min_interval_ms: 50 },
            greeks_fetch: ClassLimits { per_minute: 180, min_interval_ms: 50 },
            transient_step_secs: 5,
            transient_cap_secs: 30,
            backoff_jitter_secs: 0.1,
            backoff_cap_secs: 5.0,
        }
    }
}

/// Configuration for the execution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Execution mode (simulation, paper, or live)
    pub mode: ExecutionMode,

    /// Derivatives segment orders are routed to
    pub exchange: String,

    /// Order variety; `BO` places a bracket with broker-managed exits
    pub variety: String,

    /// Product type (intraday square-off)
    pub product: String,

    /// Order validity
    pub duration: String,

    /// Directory for the daily order journal
    pub order_history_dir: PathBuf,

    /// Status lookups per order before giving up
    pub status_poll_attempts: u32,

    /// Per-call timeout for order status lookups
    pub status_timeout_ms: u64,

    /// Greeks fetch attempts per expiry
    pub greeks_attempts: u32,

    /// Expiries fetched per refresh
    pub greeks_expiries: usize,

    pub governor: GovernorConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Simulation,
            exchange: "NFO".to_string(),
            variety: "BO".to_string(),
            product: "INTRADAY".to_string(),
            duration: "DAY".to_string(),
            order_history_dir: PathBuf::from("data/orders"),
            status_poll_attempts: 3,
            status_timeout_ms: 5_000,
            greeks_attempts: 3,
            greeks_expiries: 1, // nearest weekly only
            governor: GovernorConfig::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    /// Orders only leave the process outside simulation
    pub fn routes_to_broker(&self) -> bool {
        self.mode != ExecutionMode::Simulation
    }
}
