//! Trading Core - candle building and the bullish swing structure strategy
//!
//! - Multi-timeframe candle aggregation from ticks
//! - Six-point swing structure detection and breakout signals
//! - Structure snapshots carried across window re-evaluations
//! - The single-owner trader that ties them to the option chain cache

pub mod candles;
pub mod snapshot;
pub mod swing;
pub mod trader;

// Re-export commonly used types
pub use candles::{bucket_start, resample, Candle, CandleAggregator};
pub use snapshot::StructureSnapshot;
pub use swing::{
    CompletedStructure, PendingSetup, PointRole, Signal, SignalRow, SignalTable, StructurePoint, StructurePoints,
    SwingConfig, SwingStructureEngine,
};
pub use trader::{SwingTrader, TradeAction};
