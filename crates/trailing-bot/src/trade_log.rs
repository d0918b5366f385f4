//! Closed-trade reporter.
//!
//! Woken by the dispatcher after stream activity; logs every closed-PnL
//! record newer than its cursor, oldest first.

use exchange_core::types::ClosedTrade;
use exchange_core::{ExchangeGateway, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct ClosedTradeReporter {
    gateway: Arc<dyn ExchangeGateway>,
    /// Earliest `createdTime` (unix millis) not yet reported.
    cursor: i64,
}

impl ClosedTradeReporter {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, start_time_ms: i64) -> Self {
        Self {
            gateway,
            cursor: start_time_ms,
        }
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Log trades closed since the cursor and advance it past the newest.
    pub async fn report_new(&mut self) -> Result<Vec<ClosedTrade>> {
        let mut trades: Vec<ClosedTrade> = self
            .gateway
            .closed_pnl_since(Some(self.cursor))
            .await?
            .into_iter()
            .filter(|t| t.created_time_ms >= self.cursor)
            .collect();
        trades.sort_by_key(|t| t.created_time_ms);

        for trade in &trades {
            log_trade(trade);
        }
        if let Some(last) = trades.last() {
            self.cursor = last.created_time_ms + 1;
        }
        Ok(trades)
    }

    /// Report on every nudge until the nudge channel closes.
    pub async fn run(mut self, mut nudges: mpsc::Receiver<()>) {
        while nudges.recv().await.is_some() {
            if let Err(e) = self.report_new().await {
                warn!(error = %e, "Closed-trade fetch failed, retrying on next event");
            }
        }
    }

    pub fn spawn(self, nudges: mpsc::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(nudges))
    }
}

fn price_or_na(price: Option<Decimal>) -> String {
    price.map_or_else(|| "N/A".to_string(), |p| p.normalize().to_string())
}

fn log_trade(trade: &ClosedTrade) {
    let closed_at = trade
        .closed_at()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_default();

    info!(
        symbol = %trade.symbol,
        side = %trade.closing_side,
        qty = %trade.quantity,
        entry_value = %trade.entry_value(),
        exit_value = %trade.exit_value(),
        entry_price = %trade.avg_entry_price,
        exit_price = %trade.avg_exit_price,
        stop_loss = %price_or_na(trade.stop_loss),
        take_profit = %price_or_na(trade.take_profit),
        closed_pnl = %trade.closed_pnl,
        fill_type = %trade.exec_type,
        closed_at = %closed_at,
        "Trade closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_core::Error;
    use risk_manager::mocks::MockGateway;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    fn trade(symbol: &str, created_time_ms: i64) -> ClosedTrade {
        ClosedTrade {
            symbol: symbol.to_string(),
            closing_side: "Sell".to_string(),
            quantity: dec!(0.01),
            avg_entry_price: dec!(50000),
            avg_exit_price: dec!(50200),
            closed_pnl: dec!(2),
            exec_type: "Trade".to_string(),
            take_profit: None,
            stop_loss: Some(dec!(49949)),
            created_time_ms,
        }
    }

    #[test]
    fn test_price_or_na() {
        assert_eq!(price_or_na(None), "N/A");
        assert_eq!(price_or_na(Some(dec!(49949.000))), "49949");
    }

    #[tokio::test]
    async fn test_reports_in_order_and_advances_cursor() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_closed_pnl_since()
            .withf(|start| *start == Some(1_000))
            .times(1)
            .returning(|_| Ok(vec![trade("ETHUSDT", 3_000), trade("BTCUSDT", 2_000), trade("OLD", 500)]));

        let mut reporter = ClosedTradeReporter::new(Arc::new(gateway), 1_000);
        let reported = assert_ok!(reporter.report_new().await);

        let symbols: Vec<_> = reported.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(reporter.cursor(), 3_001);
    }

    #[tokio::test]
    async fn test_failure_keeps_cursor() {
        let mut gateway = MockGateway::new();
        gateway.expect_closed_pnl_since().returning(|_| {
            Err(Error::Api {
                message: "rate limited".to_string(),
                status: Some(429),
            })
        });

        let mut reporter = ClosedTradeReporter::new(Arc::new(gateway), 1_000);
        assert_err!(reporter.report_new().await);
        assert_eq!(reporter.cursor(), 1_000);
    }

    #[tokio::test]
    async fn test_run_reports_per_nudge() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_closed_pnl_since()
            .times(2)
            .returning(|_| Ok(vec![]));

        let (tx, rx) = mpsc::channel(1);
        let handle = ClosedTradeReporter::new(Arc::new(gateway), 0).spawn(rx);
        tx.send(()).await.unwrap();
        tx.send(()).await.unwrap();
        drop(tx);
        handle.await.unwrap();
    }
}
