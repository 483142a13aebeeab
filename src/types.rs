use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use serde::{Deserialize, Serialize};

/// Feed prices arrive as integer paise.
pub const PRICE_SCALE: f64 = 0.01;

/// One quote as delivered by the feed, prices still scaled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTick {
    pub token: String,
    pub last_traded_price: i64,
    #[serde(default)]
    pub last_traded_quantity: Option<u64>,
    #[serde(default)]
    pub volume: Option<u64>,
    #[serde(default)]
    pub open: Option<i64>,
    #[serde(default)]
    pub high: Option<i64>,
    #[serde(default)]
    pub low: Option<i64>,
    #[serde(default)]
    pub close: Option<i64>,
    /// Exchange time in epoch milliseconds
    #[serde(default)]
    pub exchange_timestamp: Option<i64>,
}

/// Frames pushed by the feed carry several quotes at once
pub type TickBatch = Vec<RawTick>;

/// A single price observation in exchange-local time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: NaiveDateTime,
    pub ltp: f64,
    pub volume: Option<f64>,
}

impl Tick {
    pub fn new(timestamp: NaiveDateTime, ltp: f64) -> Self {
        Self {
            timestamp,
            ltp,
            volume: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }
}

/// Convert an epoch-millisecond timestamp to IST wall-clock time.
pub fn ist_from_millis(millis: i64) -> Option<NaiveDateTime> {
    DateTime::<Utc>::from_timestamp_millis(millis).map(|utc| utc.with_timezone(&Kolkata).naive_local())
}

/// Epoch milliseconds for an IST wall-clock time.
pub fn ist_to_millis(at: NaiveDateTime) -> Option<i64> {
    Kolkata.from_local_datetime(&at).earliest().map(|t| t.timestamp_millis())
}

/// Current IST wall-clock time.
pub fn ist_now() -> NaiveDateTime {
    Utc::now().with_timezone(&Kolkata).naive_local()
}

impl RawTick {
    /// Descale the quote. The exchange timestamp wins over `received_at` when present.
    pub fn to_tick(&self, received_at: NaiveDateTime) -> Tick {
        let timestamp = self
            .exchange_timestamp
            .and_then(ist_from_millis)
            .unwrap_or(received_at);

        Tick {
            timestamp,
            ltp: self.last_traded_price as f64 * PRICE_SCALE,
            volume: self.last_traded_quantity.map(|q| q as f64),
        }
    }
}
