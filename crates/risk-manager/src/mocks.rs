//! mockall doubles for the gateway and baseline source.
//!
//! Available to other crates' tests through the `test-util` feature.

use async_trait::async_trait;
use exchange_core::types::{AccountEquity, ClosedTrade, GatewayEvent, LedgerEntry, PositionSnapshot};
use exchange_core::{ExchangeGateway, Result};
use mockall::mock;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::baseline::BaselineSource;

mock! {
    pub Gateway {}

    #[async_trait]
    impl ExchangeGateway for Gateway {
        async fn account_equity(&self) -> Result<AccountEquity>;
        async fn open_positions(&self) -> Result<Vec<PositionSnapshot>>;
        async fn realized_pnl_since(&self, start_time_ms: i64) -> Result<Vec<LedgerEntry>>;
        async fn set_stop_price(&self, symbol: &str, price: Decimal) -> Result<()>;
        async fn flatten_all(&self) -> Result<()>;
        async fn closed_pnl_since(&self, start_time_ms: Option<i64>) -> Result<Vec<ClosedTrade>>;
        async fn subscribe_events(&self) -> Result<mpsc::Receiver<GatewayEvent>>;
    }
}

mock! {
    pub Source {}

    #[async_trait]
    impl BaselineSource for Source {
        async fn initial_balance(&self) -> Result<Decimal>;
    }
}

pub fn equity(value: Decimal) -> AccountEquity {
    AccountEquity::new("USDT", value)
}
