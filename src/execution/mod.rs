//! Execution module for governed option order flow
//!
//! Broker calls pass through the `RateGovernor`; collaborators sit behind the
//! `MarketData`, `OrderGateway` and `AuditSink` traits.

mod broker;
mod config;
mod engine;
mod governor;
mod journal;
pub(crate) mod order;
mod paper;

pub use broker::{MarketData, OrderGateway};
pub use config::{ClassLimits, ExecutionConfig, ExecutionMode, GovernorConfig};
pub use engine::{ExecutionEngine, ExecutionEvent};
pub use governor::{CallClass, RateGovernor};
pub use journal::{AuditSink, CsvOrderJournal};
pub use order::{OrderRecord, OrderRequest, OrderSide, OrderState, OrderStatus, OrderType};
pub use paper::PaperBroker;
