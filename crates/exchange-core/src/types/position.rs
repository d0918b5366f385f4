//! Position snapshots reported by the exchange.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a derivatives position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Parse the venue's order-side notation (`Buy` holds long, `Sell` holds short).
    /// Flat positions report an empty or `None` side and yield `None`.
    pub fn from_venue(side: &str) -> Option<Self> {
        match side {
            "Buy" => Some(Self::Long),
            "Sell" => Some(Self::Short),
            _ => None,
        }
    }

    /// Venue notation for this side.
    pub fn as_venue_str(&self) -> &'static str {
        match self {
            Self::Long => "Buy",
            Self::Short => "Sell",
        }
    }

    /// Order side that reduces a position held on this side.
    pub fn closing_order_side(&self) -> &'static str {
        match self {
            Self::Long => "Sell",
            Self::Short => "Buy",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "Long"),
            Self::Short => write!(f, "Short"),
        }
    }
}

/// Point-in-time view of one position, as returned by a snapshot read or
/// carried by a stream event. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    /// `None` when the venue reports a flat position.
    pub side: Option<PositionSide>,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl PositionSnapshot {
    pub fn open(
        symbol: impl Into<String>,
        side: PositionSide,
        size: Decimal,
        entry_price: Decimal,
        mark_price: Decimal,
    ) -> Self {
        let unrealized_pnl = match side {
            PositionSide::Long => (mark_price - entry_price) * size,
            PositionSide::Short => (entry_price - mark_price) * size,
        };
        Self {
            symbol: symbol.into(),
            side: Some(side),
            size,
            entry_price,
            mark_price,
            unrealized_pnl,
        }
    }

    /// A flat position for `symbol`, as the venue reports after a close.
    pub fn closed(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            side: None,
            size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            mark_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.size.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_venue_side_mapping() {
        assert_eq!(PositionSide::from_venue("Buy"), Some(PositionSide::Long));
        assert_eq!(PositionSide::from_venue("Sell"), Some(PositionSide::Short));
        assert_eq!(PositionSide::from_venue(""), None);
        assert_eq!(PositionSide::from_venue("None"), None);

        assert_eq!(PositionSide::Long.closing_order_side(), "Sell");
        assert_eq!(PositionSide::Short.closing_order_side(), "Buy");
    }

    #[test]
    fn test_open_snapshot_unrealized_pnl() {
        let long = PositionSnapshot::open("BTCUSDT", PositionSide::Long, dec!(2), dec!(100), dec!(110));
        assert_eq!(long.unrealized_pnl, dec!(20));

        let short = PositionSnapshot::open("BTCUSDT", PositionSide::Short, dec!(2), dec!(100), dec!(110));
        assert_eq!(short.unrealized_pnl, dec!(-20));
        assert!(!short.is_closed());
    }

    #[test]
    fn test_closed_snapshot() {
        let flat = PositionSnapshot::closed("ETHUSDT");
        assert!(flat.is_closed());
        assert_eq!(flat.side, None);
    }
}
