// Library crate - swing structure detection, option sizing and governed execution

pub mod config;
pub mod error;
pub mod execution;
pub mod options;
pub mod streams;
pub mod trading_core;
pub mod types;

// Re-export commonly used types
pub use config::TraderConfig;
pub use trading_core::{Candle, Signal, SwingTrader, TradeAction};
pub use types::*;
