//! Abstract capability set of the trading venue.
//!
//! The risk engine only ever talks to the venue through [`ExchangeGateway`];
//! the Bybit implementation lives in [`crate::api::bybit`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::types::{AccountEquity, ClosedTrade, GatewayEvent, LedgerEntry, PositionSnapshot};
use crate::Result;

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Current equity of the settlement coin.
    async fn account_equity(&self) -> Result<AccountEquity>;

    /// All positions with a non-zero size.
    async fn open_positions(&self) -> Result<Vec<PositionSnapshot>>;

    /// Transaction-log entries dated at or after `start_time_ms` (unix millis).
    async fn realized_pnl_since(&self, start_time_ms: i64) -> Result<Vec<LedgerEntry>>;

    /// Set the protective stop of `symbol` to an absolute price.
    async fn set_stop_price(&self, symbol: &str, price: Decimal) -> Result<()>;

    /// Close every open position at market.
    async fn flatten_all(&self) -> Result<()>;

    /// Closed-position records, newest last, optionally starting at `start_time_ms`.
    async fn closed_pnl_since(&self, start_time_ms: Option<i64>) -> Result<Vec<ClosedTrade>>;

    /// Live stream of position and wallet change notifications, in venue order.
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<GatewayEvent>>;
}
