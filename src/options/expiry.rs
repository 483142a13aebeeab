//! Expiry and strike normalisation for instrument master rows

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Layouts seen in instrument masters: `31-Dec-26`, `31DEC2026`, `31-12-2026`
const EXPIRY_FORMATS: [&str; 3] = ["%d-%b-%y", "%d%b%Y", "%d-%m-%Y"];

/// Strikes above this are quoted in paise
const PAISE_STRIKE_THRESHOLD: f64 = 100_000.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiry {
    pub date: NaiveDate,
    /// Code used by the Greeks endpoint, e.g. `26MAR2026`
    pub api_code: String,
    /// Human form, e.g. `26-Mar-2026`
    pub display: String,
}

impl Expiry {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            api_code: date.format("%d%b%Y").to_string().to_uppercase(),
            display: date.format("%d-%b-%Y").to_string(),
        }
    }
}

pub fn parse_expiry(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    EXPIRY_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// The `count` earliest distinct expiries on or after `today`.
/// Unparseable entries are ignored.
pub fn nearest_expiries<'a, I>(raw_expiries: I, today: NaiveDate, count: usize) -> Vec<Expiry>
where
    I: IntoIterator<Item = &'a str>,
{
    let dates: BTreeSet<NaiveDate> = raw_expiries
        .into_iter()
        .filter_map(parse_expiry)
        .filter(|d| *d >= today)
        .collect();

    let expiries: Vec<Expiry> = dates.into_iter().take(count).map(Expiry::new).collect();

    if expiries.is_empty() {
        info!("No future expiry dates found");
    } else {
        for (i, exp) in expiries.iter().enumerate() {
            info!("  {}. {} (API format: {})", i + 1, exp.display, exp.api_code);
        }
    }
    expiries
}

/// Strike in rupees, converting master rows that carry paise.
pub fn normalize_strike(raw: f64) -> f64 {
    if raw > PAISE_STRIKE_THRESHOLD {
        raw / 100.0
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_all_master_layouts() {
        assert_eq!(parse_expiry("31-Dec-26"), Some(date(2026, 12, 31)));
        assert_eq!(parse_expiry("31DEC2026"), Some(date(2026, 12, 31)));
        assert_eq!(parse_expiry("31-12-2026"), Some(date(2026, 12, 31)));
        assert_eq!(parse_expiry("next thursday"), None);
    }

    #[test]
    fn test_nearest_future_expiries() {
        let raw = ["26MAR2026", "05-Mar-26", "26MAR2026", "26-02-2026", "garbage", "30APR2026"];
        let found = nearest_expiries(raw, date(2026, 3, 2), 2);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].date, date(2026, 3, 5));
        assert_eq!(found[0].api_code, "05MAR2026");
        assert_eq!(found[0].display, "05-Mar-2026");
        assert_eq!(found[1].date, date(2026, 3, 26));
    }

    #[test]
    fn test_expiry_today_is_included() {
        let found = nearest_expiries(["02MAR2026"], date(2026, 3, 2), 2);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_strike_from_master() {
        assert_eq!(normalize_strike(2_400_000.0), 24000.0);
        assert_eq!(normalize_strike(24000.0), 24000.0);
    }
}
