//! Bracket order requests, broker status and the journal record

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::ExecutionConfig;
use crate::trading_core::Signal;

/// Order side; breakouts only ever buy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
        }
    }
}

/// Order state as reported by the broker's order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Accepted by us, not yet seen in the order book
    Placed,
    /// Open or trigger pending at the exchange
    Working,
    /// Order completely filled
    Filled,
    /// Order cancelled
    Cancelled,
    /// Order rejected by exchange
    Rejected,
    /// Lookup timed out or the order book did not list the order
    Unknown,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placed => write!(f, "PLACED"),
            Self::Working => write!(f, "WORKING"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Bracket order as handed to the order gateway
///
/// `squareoff` and `stoploss` are premium distances from the contract's last
/// price, which is how the broker expects bracket legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_ref: Uuid,
    pub trading_symbol: String,
    pub symbol_token: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub exchange: String,
    pub product: String,
    pub duration: String,
    pub variety: String,
    pub quantity: u32,
    pub squareoff: f64,
    pub stoploss: f64,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

impl OrderRequest {
    /// Market BUY bracket on the signal's option.
    pub fn bracket(signal: &Signal, config: &ExecutionConfig) -> Result<Self> {
        let option = &signal.option;
        let (Some(stop), Some(target)) = (option.stop_loss(), option.target()) else {
            bail!("{} has no premium stop/target (last price {:.2})", option.symbol, option.last_price);
        };
        if signal.quantity == 0 {
            bail!("Refusing zero-quantity order for {}", option.symbol);
        }

        Ok(Self {
            client_ref: Uuid::new_v4(),
            trading_symbol: option.symbol.clone(),
            symbol_token: option.token.clone(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            exchange: config.exchange.clone(),
            product: config.product.clone(),
            duration: config.duration.clone(),
            variety: config.variety.clone(),
            quantity: signal.quantity,
            squareoff: round2(target - option.last_price),
            stoploss: round2(option.last_price - stop),
        })
    }
}

/// Order book entry for one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub state: OrderState,
    pub filled_quantity: u32,
    pub average_price: f64,
}

/// One row of the append-only order journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub timestamp: String,
    pub symbol: String,
    pub token: String,
    pub strike: f64,
    pub option_type: String,
    pub expiry: String,
    pub quantity: u32,
    /// Premium at signal time
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    /// Underlying levels the signal was built from
    pub underlying_entry: f64,
    pub underlying_stop: f64,
    pub underlying_target: f64,
    pub status: OrderState,
    pub variety: String,
}

impl OrderRecord {
    pub fn placed(order_id: &str, signal: &Signal, request: &OrderRequest, at: NaiveDateTime) -> Self {
        let option = &signal.option;
        Self {
            order_id: order_id.to_string(),
            timestamp: at.format("%Y-%m-%d %H:%M:%S").to_string(),
            symbol: option.symbol.clone(),
            token: option.token.clone(),
            strike: option.strike,
            option_type: option.option_type.to_string(),
            expiry: option.expiry.clone(),
            quantity: request.quantity,
            entry_price: option.last_price,
            stop_loss: option.stop_loss().unwrap_or_default(),
            target: option.target().unwrap_or_default(),
            underlying_entry: signal.entry_price,
            underlying_stop: signal.stop_loss,
            underlying_target: signal.target,
            status: OrderState::Placed,
            variety: request.variety.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::options::contract::test_contract;
    use crate::options::RiskModel;
    use chrono::NaiveDate;

    pub(crate) fn signal() -> Signal {
        let mut option = test_contract("NIFTY26MAR2624000CE", 0.5, 0.0, 0.0, 120.0);
        option.token = "43521".into();
        // 100 point underlying move -> 50 premium risk
        RiskModel::default().apply(&mut option, 24000.0, 23900.0).unwrap();
        Signal {
            entry_price: 24010.05,
            stop_loss: 23950.95,
            target: 24128.25,
            option,
            quantity: 75,
            total_risk: 3750.0,
            timestamp: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(10, 20, 0).unwrap(),
        }
    }

    #[test]
    fn test_bracket_distances() {
        let order = OrderRequest::bracket(&signal(), &ExecutionConfig::default()).unwrap();
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.exchange, "NFO");
        assert_eq!(order.variety, "BO");
        assert_eq!(order.quantity, 75);
        assert_eq!(order.stoploss, 50.0); // 120 - 70
        assert_eq!(order.squareoff, 100.0); // 220 - 120
    }

    #[test]
    fn test_bracket_needs_premium_levels() {
        let mut s = signal();
        s.option.risk = None;
        assert!(OrderRequest::bracket(&s, &ExecutionConfig::default()).is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Rejected.is_terminal());
        assert!(!OrderState::Working.is_terminal());
    }

    #[test]
    fn test_record_from_signal() {
        let s = signal();
        let order = OrderRequest::bracket(&s, &ExecutionConfig::default()).unwrap();
        let record = OrderRecord::placed("250302000123", &s, &order, s.timestamp);
        assert_eq!(record.timestamp, "2026-03-02 10:20:00");
        assert_eq!(record.option_type, "CE");
        assert_eq!(record.entry_price, 120.0);
        assert_eq!(record.stop_loss, 70.0);
        assert_eq!(record.target, 220.0);
        assert_eq!(record.status, OrderState::Placed);
    }
}
