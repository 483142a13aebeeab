//! Option contracts, premium risk and strike selection
//!
//! - `contract`: provider rows with Greeks and quotes
//! - `risk`: Greeks-based stop and target for an underlying move
//! - `selector`: contract and lot count inside a rupee risk band
//! - `expiry`: instrument master date and strike handling

pub mod contract;
pub mod expiry;
pub mod risk;
pub mod selector;

pub use contract::{OptionContract, OptionType, RiskLevels, DEFAULT_LOT_SIZE};
pub use expiry::{nearest_expiries, parse_expiry, Expiry};
pub use risk::{RiskConfig, RiskModel};
pub use selector::{Selection, SelectorConfig, StrikeSelector};
