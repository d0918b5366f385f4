//! Account-wide drawdown circuit breaker.

use exchange_core::config::RiskSettings;
use exchange_core::ExchangeGateway;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::baseline::BaselineCell;

/// Drawdown monitor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawdownConfig {
    /// Loss since baseline, as a percent of baseline, that trips the breaker.
    pub drawdown_percent: Decimal,
    pub enabled: bool,
    pub check_interval: Duration,
}

impl Default for DrawdownConfig {
    fn default() -> Self {
        Self::from_settings(&RiskSettings::default())
    }
}

impl DrawdownConfig {
    pub fn from_settings(settings: &RiskSettings) -> Self {
        Self {
            drawdown_percent: settings.drawdown_percent,
            enabled: settings.drawdown_enabled,
            check_interval: Duration::from_secs(settings.drawdown_check_interval_secs.max(1)),
        }
    }

    /// Maximum tolerated loss for `baseline`.
    pub fn limit_for(&self, baseline: Decimal) -> Decimal {
        baseline * self.drawdown_percent / Decimal::ONE_HUNDRED
    }
}

/// Result of one drawdown check.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawdownCheck {
    /// No valid baseline; nothing to compare against.
    Disarmed,
    /// Equity could not be read this cycle.
    Skipped,
    WithinLimit { drawdown: Decimal, limit: Decimal },
    /// Positions were flattened and the baseline moved to `rebased_to`.
    Breached {
        drawdown: Decimal,
        limit: Decimal,
        rebased_to: Decimal,
    },
    /// Breach detected but the flatten failed; the baseline is unchanged.
    FlattenFailed { drawdown: Decimal, limit: Decimal },
}

/// Periodically compares equity with the day's baseline.
pub struct DrawdownMonitor {
    gateway: Arc<dyn ExchangeGateway>,
    baseline: BaselineCell,
    config: DrawdownConfig,
}

impl DrawdownMonitor {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, baseline: BaselineCell, config: DrawdownConfig) -> Self {
        Self {
            gateway,
            baseline,
            config,
        }
    }

    /// Run a single check.
    ///
    /// The baseline stays locked for the whole check, so a concurrent daily
    /// refresh waits until any flatten and rebase have finished.
    pub async fn check_once(&self) -> DrawdownCheck {
        let mut baseline = self.baseline.lock().await;
        let Some(reference) = baseline.value else {
            debug!("Drawdown check skipped, baseline not set");
            return DrawdownCheck::Disarmed;
        };

        let current = match self.gateway.account_equity().await {
            Ok(equity) => equity.equity,
            Err(e) => {
                warn!(error = %e, "Equity read failed, skipping drawdown check");
                return DrawdownCheck::Skipped;
            }
        };

        let drawdown = reference - current;
        let limit = self.config.limit_for(reference);

        if drawdown <= limit {
            debug!(
                baseline = %reference,
                equity = %current,
                drawdown = %drawdown,
                limit = %limit,
                "Drawdown within limit"
            );
            return DrawdownCheck::WithinLimit { drawdown, limit };
        }

        warn!(
            baseline = %reference,
            equity = %current,
            drawdown = %drawdown,
            limit = %limit,
            "Drawdown limit breached, flattening all positions"
        );

        match self.gateway.flatten_all().await {
            Ok(()) => {
                baseline.value = Some(current);
                info!(baseline = %current, "Positions flattened, baseline rebased");
                DrawdownCheck::Breached {
                    drawdown,
                    limit,
                    rebased_to: current,
                }
            }
            Err(e) => {
                error!(error = %e, "Flatten failed, will retry next check");
                DrawdownCheck::FlattenFailed { drawdown, limit }
            }
        }
    }

    pub async fn run(self) {
        info!(
            drawdown_percent = %self.config.drawdown_percent,
            interval_secs = self.config.check_interval.as_secs(),
            "Drawdown monitor started"
        );

        let mut interval = tokio::time::interval(self.config.check_interval);
        loop {
            interval.tick().await;
            self.check_once().await;
        }
    }

    /// Spawn the monitor loop, or nothing when drawdown checks are disabled.
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            info!("Drawdown monitor disabled");
            return None;
        }
        Some(tokio::spawn(self.run()))
    }
}
