//! Daily baseline equity: resolution, storage and the daily refresh.
//!
//! The baseline is the account equity pinned to 00:00 UTC. It is rebuilt by
//! taking current equity and backing out every realized-PnL ledger entry
//! booked since midnight.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use exchange_core::api::BalanceServiceClient;
use exchange_core::types::LedgerEntry;
use exchange_core::{Error, ExchangeGateway, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;

/// The day's drawdown reference. `value == None` means drawdown checks are
/// disarmed until the next successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaselineEquity {
    pub value: Option<Decimal>,
    pub resolved_for: Option<NaiveDate>,
}

impl BaselineEquity {
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn resolved(value: Decimal, date: NaiveDate) -> Self {
        Self {
            value: Some(value),
            resolved_for: Some(date),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }
}

/// Shared handle to the process-wide baseline.
///
/// Every mutation goes through [`BaselineCell::lock`], so the daily refresh
/// and a breach rebase never interleave.
#[derive(Debug, Clone, Default)]
pub struct BaselineCell {
    inner: Arc<Mutex<BaselineEquity>>,
}

impl BaselineCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> BaselineEquity {
        *self.inner.lock().await
    }

    pub async fn set(&self, baseline: BaselineEquity) {
        *self.inner.lock().await = baseline;
    }

    pub async fn lock(&self) -> MutexGuard<'_, BaselineEquity> {
        self.inner.lock().await
    }
}

/// Midnight UTC of the day containing `now`.
pub fn utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// Time left until the next UTC midnight after `now`.
pub fn duration_until_next_midnight(now: DateTime<Utc>) -> Duration {
    let next = utc_midnight(now) + chrono::Duration::days(1);
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Computes the baseline from the venue's equity and realized-PnL ledger.
pub struct BaselineResolver {
    gateway: Arc<dyn ExchangeGateway>,
    settlement_coin: String,
    log_breakdown: bool,
}

impl BaselineResolver {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, settlement_coin: impl Into<String>) -> Self {
        Self {
            gateway,
            settlement_coin: settlement_coin.into(),
            log_breakdown: false,
        }
    }

    /// Emit every step of the calculation at `info`.
    pub fn with_breakdown_logging(mut self, enabled: bool) -> Self {
        self.log_breakdown = enabled;
        self
    }

    /// Baseline equity for the UTC day containing `now`.
    ///
    /// Only a failed equity read is fatal; a failed or empty ledger query
    /// yields the current equity unchanged.
    pub async fn resolve(&self, now: DateTime<Utc>) -> Result<BaselineEquity> {
        let current = self
            .gateway
            .account_equity()
            .await
            .map_err(|e| Error::data_unavailable(format!("account equity: {}", e)))?
            .equity;
        let midnight = utc_midnight(now);

        if self.log_breakdown {
            info!(coin = %self.settlement_coin, equity = %current, "Baseline step 1: current equity");
            info!(since = %midnight, "Baseline step 2: querying realized PnL since midnight");
        }

        let entries = match self.gateway.realized_pnl_since(midnight.timestamp_millis()).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Realized PnL query failed, using current equity as baseline");
                Vec::new()
            }
        };

        let realized_today = self.sum_realized(&entries, midnight);
        let baseline = current - realized_today;

        if self.log_breakdown {
            info!(realized_today = %realized_today, "Baseline step 3: realized PnL total");
            info!(
                "Baseline step 4: {} - ({}) = {}",
                current, realized_today, baseline
            );
        }

        debug!(baseline = %baseline, date = %midnight.date_naive(), "Resolved baseline");
        Ok(BaselineEquity::resolved(baseline, midnight.date_naive()))
    }

    fn sum_realized(&self, entries: &[LedgerEntry], midnight: DateTime<Utc>) -> Decimal {
        let mut total = Decimal::ZERO;
        for entry in entries
            .iter()
            .filter(|e| e.coin == self.settlement_coin && e.is_realized_pnl())
            .filter(|e| e.timestamp >= midnight)
        {
            total += entry.amount;
            if self.log_breakdown {
                info!(
                    time = %entry.timestamp,
                    amount = %entry.amount,
                    running_total = %total,
                    "Realized PnL entry"
                );
            }
        }
        total
    }
}

/// Anything that can produce today's start-of-day equity.
#[async_trait]
pub trait BaselineSource: Send + Sync {
    async fn initial_balance(&self) -> Result<Decimal>;
}

#[async_trait]
impl BaselineSource for BaselineResolver {
    async fn initial_balance(&self) -> Result<Decimal> {
        self.resolve(Utc::now())
            .await?
            .value
            .ok_or_else(|| Error::data_unavailable("baseline"))
    }
}

#[async_trait]
impl BaselineSource for BalanceServiceClient {
    async fn initial_balance(&self) -> Result<Decimal> {
        BalanceServiceClient::initial_balance(self).await
    }
}

/// Fetches the baseline with retries and keeps the shared cell current.
pub struct BaselineClient {
    source: Arc<dyn BaselineSource>,
    cell: BaselineCell,
    policy: RetryPolicy,
}

impl BaselineClient {
    pub fn new(source: Arc<dyn BaselineSource>, cell: BaselineCell) -> Self {
        Self {
            source,
            cell,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn fetch_today(&self) -> BaselineEquity {
        self.fetch_for(Utc::now().date_naive()).await
    }

    /// Fetch and store the baseline for `date`. Exhausted retries leave the
    /// baseline invalid, which disarms drawdown checks.
    pub async fn fetch_for(&self, date: NaiveDate) -> BaselineEquity {
        let source = &self.source;
        let result = self
            .policy
            .run("baseline fetch", || source.initial_balance())
            .await;

        let baseline = match result {
            Ok(value) => {
                info!(baseline = %value, date = %date, "Baseline equity resolved");
                BaselineEquity::resolved(value, date)
            }
            Err(e) => {
                error!(error = %e, date = %date, "Baseline unavailable, drawdown checks disabled");
                BaselineEquity::invalid()
            }
        };

        self.cell.set(baseline).await;
        baseline
    }

    /// Fetch now, then again at every UTC midnight.
    pub async fn run_daily(self) {
        loop {
            self.fetch_today().await;

            let wait = duration_until_next_midnight(Utc::now());
            info!(wait_secs = wait.as_secs(), "Next baseline refresh scheduled");
            tokio::time::sleep(wait).await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run_daily())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{equity, MockGateway, MockSource};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_utc_midnight() {
        let midnight = utc_midnight(noon());
        assert_eq!(midnight, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_duration_until_next_midnight() {
        assert_eq!(duration_until_next_midnight(noon()), Duration::from_secs(12 * 3600));

        let late = Utc.with_ymd_and_hms(2024, 3, 15, 23, 59, 30).unwrap();
        assert_eq!(duration_until_next_midnight(late), Duration::from_secs(30));

        let midnight = Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap();
        assert_eq!(duration_until_next_midnight(midnight), Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_resolve_subtracts_todays_realized_pnl() {
        let midnight = utc_midnight(noon());
        let mut gateway = MockGateway::new();
        gateway
            .expect_account_equity()
            .returning(|| Ok(equity(dec!(10100))));
        gateway
            .expect_realized_pnl_since()
            .withf(move |start| *start == midnight.timestamp_millis())
            .returning(move |_| {
                Ok(vec![
                    LedgerEntry::realized_pnl("USDT", dec!(50), midnight + chrono::Duration::hours(1)),
                    LedgerEntry::realized_pnl("USDT", dec!(-20), midnight + chrono::Duration::hours(2)),
                ])
            });

        let resolver = BaselineResolver::new(Arc::new(gateway), "USDT").with_breakdown_logging(true);
        let baseline = resolver.resolve(noon()).await.unwrap();

        assert_eq!(baseline.value, Some(dec!(10070)));
        assert_eq!(baseline.resolved_for, Some(midnight.date_naive()));
    }

    #[tokio::test]
    async fn test_resolve_ignores_other_coins_and_kinds() {
        let midnight = utc_midnight(noon());
        let mut gateway = MockGateway::new();
        gateway
            .expect_account_equity()
            .returning(|| Ok(equity(dec!(5000))));
        gateway.expect_realized_pnl_since().returning(move |_| {
            let at = midnight + chrono::Duration::hours(3);
            let mut fee = LedgerEntry::realized_pnl("USDT", dec!(-3), at);
            fee.kind = exchange_core::types::LedgerEntryKind::Other("TRADE".to_string());
            Ok(vec![
                LedgerEntry::realized_pnl("USDC", dec!(100), at),
                fee,
                LedgerEntry::realized_pnl("USDT", dec!(10), midnight - chrono::Duration::minutes(1)),
                LedgerEntry::realized_pnl("USDT", dec!(25), at),
            ])
        });

        let resolver = BaselineResolver::new(Arc::new(gateway), "USDT");
        let baseline = resolver.resolve(noon()).await.unwrap();
        assert_eq!(baseline.value, Some(dec!(4975)));
    }

    #[tokio::test]
    async fn test_resolve_without_trades_returns_current_equity() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_account_equity()
            .returning(|| Ok(equity(dec!(10000))));
        gateway.expect_realized_pnl_since().returning(|_| Ok(vec![]));

        let resolver = BaselineResolver::new(Arc::new(gateway), "USDT");
        assert_eq!(resolver.resolve(noon()).await.unwrap().value, Some(dec!(10000)));
    }

    #[tokio::test]
    async fn test_resolve_ledger_failure_falls_back_to_equity() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_account_equity()
            .returning(|| Ok(equity(dec!(10000))));
        gateway.expect_realized_pnl_since().returning(|_| {
            Err(Error::Api {
                message: "rate limited".to_string(),
                status: Some(429),
            })
        });

        let resolver = BaselineResolver::new(Arc::new(gateway), "USDT");
        assert_eq!(resolver.resolve(noon()).await.unwrap().value, Some(dec!(10000)));
    }

    #[tokio::test]
    async fn test_resolve_equity_failure_is_data_unavailable() {
        let mut gateway = MockGateway::new();
        gateway.expect_account_equity().returning(|| {
            Err(Error::Api {
                message: "unauthorized".to_string(),
                status: Some(401),
            })
        });
        gateway.expect_realized_pnl_since().never();

        let resolver = BaselineResolver::new(Arc::new(gateway), "USDT");
        assert!(matches!(
            resolver.resolve(noon()).await,
            Err(Error::DataUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_client_stores_resolved_value() {
        let mut source = MockSource::new();
        source
            .expect_initial_balance()
            .times(1)
            .returning(|| Ok(dec!(10070)));

        let cell = BaselineCell::new();
        let client = BaselineClient::new(Arc::new(source), cell.clone()).with_policy(fast_policy());
        let date = noon().date_naive();
        let baseline = client.fetch_for(date).await;

        assert_eq!(baseline, BaselineEquity::resolved(dec!(10070), date));
        assert_eq!(cell.snapshot().await, baseline);
    }

    #[tokio::test]
    async fn test_client_gives_up_after_five_failures() {
        let mut source = MockSource::new();
        source
            .expect_initial_balance()
            .times(5)
            .returning(|| Err(Error::data_unavailable("balance service down")));

        let cell = BaselineCell::new();
        cell.set(BaselineEquity::resolved(dec!(9000), noon().date_naive()))
            .await;

        let client = BaselineClient::new(Arc::new(source), cell.clone()).with_policy(fast_policy());
        let baseline = client.fetch_for(noon().date_naive()).await;

        assert!(!baseline.is_valid());
        assert!(!cell.snapshot().await.is_valid());
    }
}
