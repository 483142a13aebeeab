//! Broker collaborator seams
//!
//! The trading core never talks to a broker directly. Market data and order
//! routing sit behind these traits so the replay run can use the in-process
//! paper broker and a live adapter can be dropped in without touching the
//! engine.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::order::{OrderRequest, OrderStatus};
use crate::error::ProviderError;
use crate::options::{Expiry, OptionContract};
use crate::trading_core::Candle;

/// Candles and option chains for the underlying
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Candles of `width_minutes` between `from` and `to`. Empty means no data.
    async fn fetch_historical(
        &self,
        instrument: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
        width_minutes: u32,
    ) -> Result<Vec<Candle>, ProviderError>;

    /// Raw expiry labels listed for `name`, in whatever format the provider uses.
    async fn option_expiries(&self, name: &str) -> Result<Vec<String>, ProviderError>;

    /// Contracts with Greeks for one expiry. May be empty.
    async fn fetch_option_chain(&self, name: &str, expiry: &Expiry) -> Result<Vec<OptionContract>, ProviderError>;
}

/// Order routing
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Broker order id, or `None` when the broker accepted the call but
    /// returned no id.
    async fn place_order(&self, request: &OrderRequest) -> Result<Option<String>, ProviderError>;

    /// `None` when the order book does not list `order_id`.
    async fn order_status(&self, order_id: &str) -> Result<Option<OrderStatus>, ProviderError>;
}
