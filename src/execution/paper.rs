//! In-process broker for replay runs
//!
//! Serves history and option chains loaded from files and fills every order
//! immediately at the contract's last price.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::info;

use super::broker::{MarketData, OrderGateway};
use super::order::{OrderRequest, OrderState, OrderStatus};
use crate::error::ProviderError;
use crate::options::{parse_expiry, Expiry, OptionContract};
use crate::trading_core::candles::{resample, Candle};

pub struct PaperBroker {
    history: Vec<Candle>,
    chain: Vec<OptionContract>,
    orders: Mutex<HashMap<String, OrderStatus>>,
    next_id: AtomicU64,
}

fn poisoned<T>(_: T) -> ProviderError {
    ProviderError::Transport("paper broker state poisoned".to_string())
}

impl PaperBroker {
    pub fn new(history: Vec<Candle>, chain: Vec<OptionContract>) -> Self {
        Self {
            history,
            chain,
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().map(|o| o.len()).unwrap_or_default()
    }
}

#[async_trait]
impl MarketData for PaperBroker {
    async fn fetch_historical(
        &self,
        _instrument: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
        width_minutes: u32,
    ) -> Result<Vec<Candle>, ProviderError> {
        let rows: Vec<Candle> = self
            .history
            .iter()
            .filter(|c| c.open_time >= from && c.open_time <= to)
            .cloned()
            .collect();
        Ok(resample(&rows, width_minutes))
    }

    async fn option_expiries(&self, _name: &str) -> Result<Vec<String>, ProviderError> {
        let labels: BTreeSet<String> = self.chain.iter().map(|c| c.expiry.clone()).collect();
        Ok(labels.into_iter().collect())
    }

    async fn fetch_option_chain(&self, _name: &str, expiry: &Expiry) -> Result<Vec<OptionContract>, ProviderError> {
        Ok(self
            .chain
            .iter()
            .filter(|c| parse_expiry(&c.expiry) == Some(expiry.date))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrderGateway for PaperBroker {
    async fn place_order(&self, request: &OrderRequest) -> Result<Option<String>, ProviderError> {
        let fill_price = self
            .chain
            .iter()
            .find(|c| c.token == request.symbol_token && c.symbol == request.trading_symbol)
            .map(|c| c.last_price)
            .ok_or_else(|| ProviderError::Rejected(format!("unknown contract {}", request.trading_symbol)))?;

        let order_id = format!("PAPER{:06}", self.next_id.fetch_add(1, Ordering::SeqCst));
        info!(
            "PAPER FILL: {} {} x{} @ {:.2} ({})",
            request.side, request.trading_symbol, request.quantity, fill_price, order_id
        );

        let status = OrderStatus {
            order_id: order_id.clone(),
            state: OrderState::Filled,
            filled_quantity: request.quantity,
            average_price: fill_price,
        };
        self.orders.lock().map_err(poisoned)?.insert(order_id.clone(), status);
        Ok(Some(order_id))
    }

    async fn order_status(&self, order_id: &str) -> Result<Option<OrderStatus>, ProviderError> {
        Ok(self.orders.lock().map_err(poisoned)?.get(order_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::order::tests::signal;
    use crate::execution::ExecutionConfig;
    use crate::options::contract::test_contract;
    use crate::trading_core::swing::tests::pattern;
    use chrono::{NaiveDate, TimeDelta};

    #[tokio::test]
    async fn test_fills_at_last_price() {
        let s = signal();
        let broker = PaperBroker::new(Vec::new(), vec![s.option.clone()]);
        let request = OrderRequest::bracket(&s, &ExecutionConfig::default()).unwrap();

        let id = broker.place_order(&request).await.unwrap().unwrap();
        assert_eq!(id, "PAPER000001");
        let status = broker.order_status(&id).await.unwrap().unwrap();
        assert_eq!(status.state, OrderState::Filled);
        assert_eq!(status.average_price, 120.0);
        assert_eq!(broker.order_status("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_contract_rejected() {
        let broker = PaperBroker::new(Vec::new(), Vec::new());
        let request = OrderRequest::bracket(&signal(), &ExecutionConfig::default()).unwrap();
        let err = broker.place_order(&request).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(broker.order_count(), 0);
    }

    #[tokio::test]
    async fn test_chain_filtered_by_expiry() {
        let mut weekly = test_contract("NIFTY26MAR2624000CE", 0.5, 0.0, 0.0, 100.0);
        weekly.expiry = "26-Mar-26".into();
        let mut monthly = test_contract("NIFTY30APR2624000CE", 0.5, 0.0, 0.0, 180.0);
        monthly.expiry = "30APR2026".into();
        let broker = PaperBroker::new(Vec::new(), vec![weekly, monthly]);

        assert_eq!(broker.option_expiries("NIFTY").await.unwrap().len(), 2);
        let expiry = Expiry::new(NaiveDate::from_ymd_opt(2026, 3, 26).unwrap());
        let chain = broker.fetch_option_chain("NIFTY", &expiry).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].last_price, 100.0);
    }

    #[tokio::test]
    async fn test_history_window_resampled() {
        let history = pattern();
        let from = history[0].open_time;
        let broker = PaperBroker::new(history, Vec::new());

        let candles = broker
            .fetch_historical("NIFTY", from, from + TimeDelta::minutes(25), 15)
            .await
            .unwrap();
        // 09:15..09:40 five-minute rows -> 09:15 and 09:30 buckets
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].high, 108.0);
    }
}
