//! Closed-trade records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A position close booked by the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    /// Side of the closing order (`Buy` or `Sell`).
    pub closing_side: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub avg_exit_price: Decimal,
    pub closed_pnl: Decimal,
    pub exec_type: String,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub created_time_ms: i64,
}

impl ClosedTrade {
    pub fn entry_value(&self) -> Decimal {
        self.avg_entry_price * self.quantity
    }

    pub fn exit_value(&self) -> Decimal {
        self.avg_exit_price * self.quantity
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created_time_ms)
    }
}
