//! Option contract rows as served by the Greeks endpoint

use serde::{Deserialize, Deserializer, Serialize};

/// Contract multiplier used when a row omits its lot size
pub const DEFAULT_LOT_SIZE: u32 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(alias = "CE", alias = "Call", alias = "call", alias = "ce")]
    #[serde(rename = "CALL")]
    Call,
    #[serde(alias = "PE", alias = "Put", alias = "put", alias = "pe")]
    #[serde(rename = "PUT")]
    Put,
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CE"),
            Self::Put => write!(f, "PE"),
        }
    }
}

/// Stop, target and per-unit risk derived for one contract
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLevels {
    /// Expected premium loss per unit if the underlying reaches its stop
    pub risk_per_lot: f64,
    /// None when the contract has no traded price
    pub stop_loss: Option<f64>,
    pub target: Option<f64>,
    pub delta_impact: f64,
    pub gamma_impact: f64,
    pub theta_impact: f64,
}

/// One option with Greeks and quotes
///
/// Provider rows are loose: numbers may come as strings, nulls or be missing
/// entirely. Missing, null and blank read as zero; unparseable text reads as
/// NaN so the risk model rejects the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, alias = "strike_float", alias = "strikePrice", deserialize_with = "loose_f64")]
    pub strike: f64,
    #[serde(alias = "optionType")]
    pub option_type: OptionType,
    #[serde(default, alias = "expiry_date", alias = "expiryDate")]
    pub expiry: String,
    #[serde(default = "default_lot_size", alias = "lotsize", deserialize_with = "loose_lot_size")]
    pub lot_size: u32,

    #[serde(default, deserialize_with = "loose_f64")]
    pub delta: f64,
    #[serde(default, deserialize_with = "loose_f64")]
    pub gamma: f64,
    #[serde(default, deserialize_with = "loose_f64")]
    pub theta: f64,
    #[serde(default, deserialize_with = "loose_f64")]
    pub vega: f64,
    #[serde(default, alias = "impliedVolatility", deserialize_with = "loose_f64")]
    pub implied_volatility: f64,

    #[serde(default, alias = "ltp", deserialize_with = "loose_f64")]
    pub last_price: f64,
    #[serde(default, alias = "bid_price", deserialize_with = "loose_f64")]
    pub bid: f64,
    #[serde(default, alias = "ask_price", deserialize_with = "loose_f64")]
    pub ask: f64,
    #[serde(default, deserialize_with = "loose_f64")]
    pub volume: f64,
    #[serde(default, deserialize_with = "loose_f64")]
    pub open_interest: f64,

    /// Filled in once the risk model has run
    #[serde(default)]
    pub risk: Option<RiskLevels>,
}

impl OptionContract {
    pub fn stop_loss(&self) -> Option<f64> {
        self.risk.and_then(|r| r.stop_loss)
    }

    pub fn target(&self) -> Option<f64> {
        self.risk.and_then(|r| r.target)
    }

    pub fn risk_per_lot(&self) -> Option<f64> {
        self.risk.map(|r| r.risk_per_lot)
    }
}

impl std::fmt::Display for OptionContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {} {}", self.symbol, self.strike, self.option_type, self.expiry)
    }
}

fn default_lot_size() -> u32 {
    DEFAULT_LOT_SIZE
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Number(f64),
    Text(String),
}

impl LooseNumber {
    fn value(self) -> f64 {
        match self {
            Self::Number(n) => n,
            Self::Text(s) if s.trim().is_empty() => 0.0,
            Self::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }
}

fn loose_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<LooseNumber>::deserialize(deserializer)?;
    Ok(raw.map(LooseNumber::value).unwrap_or(0.0))
}

fn loose_lot_size<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<LooseNumber>::deserialize(deserializer)?;
    Ok(match raw.map(LooseNumber::value) {
        Some(v) if v >= 1.0 => v as u32,
        _ => DEFAULT_LOT_SIZE,
    })
}

#[cfg(test)]
pub(crate) fn test_contract(symbol: &str, delta: f64, gamma: f64, theta: f64, last_price: f64) -> OptionContract {
    OptionContract {
        symbol: symbol.to_string(),
        token: String::new(),
        strike: 24000.0,
        option_type: OptionType::Call,
        expiry: "26MAR2026".to_string(),
        lot_size: DEFAULT_LOT_SIZE,
        delta,
        gamma,
        theta,
        vega: 0.0,
        implied_volatility: 0.0,
        last_price,
        bid: 0.0,
        ask: 0.0,
        volume: 0.0,
        open_interest: 0.0,
        risk: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loose_provider_row() {
        let row = r#"{
            "symbol": "NIFTY26MAR2624000CE",
            "token": "43521",
            "strike_float": "24000.0",
            "optionType": "CE",
            "expiry_date": "26MAR2026",
            "lotsize": "75",
            "delta": "0.52",
            "gamma": 0.0011,
            "theta": null,
            "impliedVolatility": "13.4",
            "last_price": 182.5
        }"#;

        let contract: OptionContract = serde_json::from_str(row).unwrap();
        assert_eq!(contract.option_type, OptionType::Call);
        assert_eq!(contract.strike, 24000.0);
        assert_eq!(contract.lot_size, 75);
        assert_eq!(contract.delta, 0.52);
        assert_eq!(contract.theta, 0.0);
        assert_eq!(contract.vega, 0.0);
        assert_eq!(contract.implied_volatility, 13.4);
        assert!(contract.risk.is_none());
        assert_eq!(contract.to_string(), "NIFTY26MAR2624000CE 24000 CE 26MAR2026");
    }

    #[test]
    fn test_malformed_number_is_not_zero() {
        let row = r#"{"option_type": "CE", "delta": "n/a", "gamma": "", "lotsize": "lots"}"#;
        let contract: OptionContract = serde_json::from_str(row).unwrap();
        assert!(contract.delta.is_nan());
        assert_eq!(contract.gamma, 0.0);
        assert_eq!(contract.lot_size, DEFAULT_LOT_SIZE);
    }

    #[test]
    fn test_missing_lot_size_defaults() {
        let contract: OptionContract = serde_json::from_str(r#"{"option_type": "PUT"}"#).unwrap();
        assert_eq!(contract.option_type, OptionType::Put);
        assert_eq!(contract.lot_size, DEFAULT_LOT_SIZE);
        assert_eq!(contract.last_price, 0.0);
    }
}
