//! Account balance, ledger and baseline types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ledger type tag the venue uses for booked profit/loss.
pub const REALIZED_PNL_TYPE: &str = "REALIZED_PNL";

/// Account equity for the settlement coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEquity {
    pub coin: String,
    /// Mark-to-market value including unrealized PnL.
    pub equity: Decimal,
    /// Realized wallet balance.
    pub wallet_balance: Decimal,
}

impl AccountEquity {
    pub fn new(coin: impl Into<String>, equity: Decimal) -> Self {
        Self {
            coin: coin.into(),
            equity,
            wallet_balance: equity,
        }
    }
}

/// Kind of a transaction-log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    RealizedPnl,
    Other(String),
}

impl LedgerEntryKind {
    pub fn from_venue(kind: &str) -> Self {
        if kind == REALIZED_PNL_TYPE {
            Self::RealizedPnl
        } else {
            Self::Other(kind.to_string())
        }
    }
}

/// One entry of the realized-PnL ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub coin: String,
    pub kind: LedgerEntryKind,
    /// Signed amount; negative for losses.
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn realized_pnl(coin: impl Into<String>, amount: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            coin: coin.into(),
            kind: LedgerEntryKind::RealizedPnl,
            amount,
            timestamp,
        }
    }

    pub fn is_realized_pnl(&self) -> bool {
        self.kind == LedgerEntryKind::RealizedPnl
    }
}

/// Wallet change notification from the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub coin: String,
    pub equity: Decimal,
    pub wallet_balance: Decimal,
}

/// Outcome reported by the balance endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceStatus {
    Success,
    Error,
}

/// Body of `GET /balance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceResponse {
    /// Account equity at 00:00 UTC today.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub initial_balance: Option<Decimal>,
    pub status: BalanceStatus,
}

impl BalanceResponse {
    pub fn success(initial_balance: Decimal) -> Self {
        Self {
            initial_balance: Some(initial_balance),
            status: BalanceStatus::Success,
        }
    }

    pub fn error() -> Self {
        Self {
            initial_balance: None,
            status: BalanceStatus::Error,
        }
    }
}
