//! Typed failures for the trading core
//!
//! Application code (`main`, the stream wiring, file loaders) uses
//! `anyhow::Result`. The core returns these enums so callers can tell a skipped
//! contract from a provider outage from a bad snapshot.

use std::time::Duration;

use chrono::NaiveDateTime;

/// Risk computation failed for one contract.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RiskError {
    #[error("non-finite input `{field}` for {symbol}")]
    NonFinite { symbol: String, field: &'static str },
}

/// Warm-start history could not be used.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeedError {
    #[error("history is empty")]
    Empty,
    #[error("no usable rows in {rows} history rows")]
    NoUsableRows { rows: usize },
}

/// A pending setup could not be derived from the B and C points.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SetupError {
    #[error("B index {b} is after C index {c}")]
    InvertedRange { b: usize, c: usize },
    #[error("range {b}..={c} is outside the {len} processed candles")]
    OutOfRange { b: usize, c: usize, len: usize },
    #[error("no finite high between B and C")]
    NoFiniteHigh,
}

/// A structure snapshot does not fit the candle window it is restored onto.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RestoreError {
    #[error("{role} candle at {open_time} is no longer in the window")]
    MissingCandle {
        role: &'static str,
        open_time: NaiveDateTime,
    },
    #[error("restored points are out of order: {0}")]
    OutOfOrder(&'static str),
}

/// Failure reported by a market-data or order collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rejected call: {0}")]
    Rejected(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Message fragments the provider uses when throttling a caller.
const THROTTLE_SIGNATURES: [&str; 3] = ["rate limit", "too many requests", "exceeding access"];

impl ProviderError {
    /// Throttling replies and timeouts are worth retrying after a pause.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Rejected(msg) | Self::Transport(msg) => {
                let msg = msg.to_lowercase();
                THROTTLE_SIGNATURES.iter().any(|sig| msg.contains(sig))
            }
        }
    }
}
